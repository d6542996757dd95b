// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

#![allow(unsafe_code)]

//! A cache-conscious ordered set/multiset with hint-accelerated operations
//! and concurrent insertion.
//!
//! Nodes are block-sized (see [`node`]); full nodes first try to shed keys
//! into their left sibling and only split when that fails, with a *biased*
//! split point past the midpoint so ascending workloads fill leaves to ~75%
//! instead of 50%.
//!
//! Concurrent inserts descend optimistically: every level is covered by a
//! read lease on the node's [`OptimisticLock`](crate::sync::OptimisticLock)
//! and the whole operation restarts if any validation fails. A split locks
//! the ancestor chain up to the nearest non-full node (the node's sphere of
//! influence) in root-ward order before restructuring. Reads concurrent
//! with reads are free; erasing is not supported here (see
//! [`btree_delete`](crate::btree_delete)).

mod node;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::ord::{KeyOrder, KeyUpdater, NaturalOrder, NoUpdater};
use crate::range::{Cursor, Range, RangeIter};
use crate::sync::{AccessCounter, Lease, LruCache, OptimisticLock};

use node::{max_keys_for, split_point, NodeHdr, NodeRef};

/// A caller-owned set of operation hints: per operation kind, the node the
/// last call terminated at. Hints are only ever an accelerator — a stale
/// hint is detected by a covers-check under a read lease and falls back to
/// the regular descent.
pub struct OperationHints<K> {
    last_insert: LruCache<*mut NodeHdr<K>>,
    last_find: LruCache<*mut NodeHdr<K>>,
    last_lower_bound: LruCache<*mut NodeHdr<K>>,
    last_upper_bound: LruCache<*mut NodeHdr<K>>,
}

impl<K> Default for OperationHints<K> {
    fn default() -> Self {
        Self {
            last_insert: LruCache::new(std::ptr::null_mut()),
            last_find: LruCache::new(std::ptr::null_mut()),
            last_lower_bound: LruCache::new(std::ptr::null_mut()),
            last_upper_bound: LruCache::new(std::ptr::null_mut()),
        }
    }
}

impl<K> OperationHints<K> {
    /// Forgets all remembered nodes.
    pub fn clear(&mut self) {
        self.last_insert.clear(std::ptr::null_mut());
        self.last_find.clear(std::ptr::null_mut());
        self.last_lower_bound.clear(std::ptr::null_mut());
        self.last_upper_bound.clear(std::ptr::null_mut());
    }
}

/// A B-tree backed ordered collection of keys.
///
/// `C` is the strong order (slot identity and lookups), `W` the weak order
/// (insertion descent), `U` the in-place updater applied on weak-equal
/// duplicates, and `IS_SET` selects set versus multiset semantics. Use the
/// [`BTreeSet`]/[`BTreeMultiset`] aliases unless the weak machinery is
/// needed.
pub struct BTree<K, C = NaturalOrder, W = C, U = NoUpdater, const IS_SET: bool = true> {
    root: AtomicPtr<NodeHdr<K>>,
    root_lock: OptimisticLock,
    leftmost: AtomicPtr<NodeHdr<K>>,
    max_keys: u16,
    comp: C,
    weak_comp: W,
    updater: U,
    insert_stats: AccessCounter,
    contains_stats: AccessCounter,
    lower_bound_stats: AccessCounter,
    upper_bound_stats: AccessCounter,
    _keys: PhantomData<K>,
}

/// A B-tree based set.
pub type BTreeSet<K, C = NaturalOrder, W = C, U = NoUpdater> = BTree<K, C, W, U, true>;

/// A B-tree based multiset.
pub type BTreeMultiset<K, C = NaturalOrder, W = C, U = NoUpdater> = BTree<K, C, W, U, false>;

unsafe impl<K, C, W, U, const IS_SET: bool> Send for BTree<K, C, W, U, IS_SET>
where
    K: Copy + Send,
    C: Send,
    W: Send,
    U: Send,
{
}

unsafe impl<K, C, W, U, const IS_SET: bool> Sync for BTree<K, C, W, U, IS_SET>
where
    K: Copy + Send + Sync,
    C: Sync,
    W: Sync,
    U: Sync,
{
}

impl<K, C, W, U, const IS_SET: bool> Default for BTree<K, C, W, U, IS_SET>
where
    K: Copy,
    C: KeyOrder<K> + Default,
    W: KeyOrder<K> + Default,
    U: KeyUpdater<K> + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, C, W, U, const IS_SET: bool> BTree<K, C, W, U, IS_SET>
where
    K: Copy,
    C: KeyOrder<K>,
    W: KeyOrder<K>,
    U: KeyUpdater<K>,
{
    /// Creates an empty tree with default-constructed capabilities.
    #[must_use]
    pub fn new() -> Self
    where
        C: Default,
        W: Default,
        U: Default,
    {
        Self::with_order(C::default(), W::default(), U::default())
    }

    /// Creates an empty tree from explicit order/updater instances.
    #[must_use]
    pub fn with_order(comp: C, weak_comp: W, updater: U) -> Self {
        Self {
            root: AtomicPtr::new(std::ptr::null_mut()),
            root_lock: OptimisticLock::new(),
            leftmost: AtomicPtr::new(std::ptr::null_mut()),
            max_keys: max_keys_for::<K>(),
            comp,
            weak_comp,
            updater,
            insert_stats: AccessCounter::default(),
            contains_stats: AccessCounter::default(),
            lower_bound_stats: AccessCounter::default(),
            upper_bound_stats: AccessCounter::default(),
            _keys: PhantomData,
        }
    }

    /// The number of keys per node of this instantiation.
    #[must_use]
    pub fn max_keys_per_node(&self) -> usize {
        self.max_keys as usize
    }

    /// Whether the tree holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.load(Ordering::Acquire).is_null()
    }

    /// The number of stored keys, counted by walking the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        let root = self.root_ref();
        if root.is_null() {
            0
        } else {
            Self::count_entries(root)
        }
    }

    fn count_entries(node: NodeRef<K>) -> usize {
        let mut sum = node.num_elements();
        if node.is_inner() {
            for i in 0..=node.num_elements() {
                sum += Self::count_entries(node.child(i));
            }
        }
        sum
    }

    fn root_ref(&self) -> NodeRef<K> {
        NodeRef::from_raw(self.root.load(Ordering::Acquire))
    }

    fn leftmost_ref(&self) -> NodeRef<K> {
        NodeRef::from_raw(self.leftmost.load(Ordering::Acquire))
    }

    // ---- node-level search (linear; keys per node are few) ----

    fn search_lower<O: KeyOrder<K>>(ord: &O, node: NodeRef<K>, n: usize, k: &K) -> usize {
        let mut i = 0;
        while i < n && ord.less(&node.key(i), k) {
            i += 1;
        }
        i
    }

    fn search_upper<O: KeyOrder<K>>(ord: &O, node: NodeRef<K>, n: usize, k: &K) -> usize {
        let mut i = 0;
        while i < n && !ord.less(k, &node.key(i)) {
            i += 1;
        }
        i
    }

    // ---- covers predicates ----

    fn covers_impl<O: KeyOrder<K>>(ord: &O, node: NodeRef<K>, k: &K) -> bool {
        let n = node.num_elements();
        if n == 0 {
            return false;
        }
        if IS_SET {
            // for sets the boundary keys themselves count as covered
            !ord.less(k, &node.key(0)) && !ord.less(&node.key(n - 1), k)
        } else {
            // for multisets equal boundary keys may live in sibling nodes
            ord.less(&node.key(0), k) && ord.less(k, &node.key(n - 1))
        }
    }

    fn covers(&self, node: NodeRef<K>, k: &K) -> bool {
        Self::covers_impl(&self.comp, node, k)
    }

    fn weak_covers(&self, node: NodeRef<K>, k: &K) -> bool {
        Self::covers_impl(&self.weak_comp, node, k)
    }

    /// Covers check for upper-bound hints: the strictly-greater target must
    /// fall inside this node, so the last key must be beyond `k`.
    fn covers_upper_bound(&self, node: NodeRef<K>, k: &K) -> bool {
        let n = node.num_elements();
        n != 0 && !self.comp.less(k, &node.key(0)) && self.comp.less(k, &node.key(n - 1))
    }

    // ---- insertion ----

    /// Inserts `k`; returns whether a new element was added. For sets with
    /// an active updater, a weak-equal duplicate is updated in place and the
    /// updater's verdict is returned.
    pub fn insert(&self, k: K) -> bool {
        self.insert_with(k, &mut OperationHints::default())
    }

    /// Inserts every key of the iterator, sharing one hint context.
    pub fn insert_all<I: IntoIterator<Item = K>>(&self, keys: I) {
        let mut hints = OperationHints::default();
        for k in keys {
            self.insert_with(k, &mut hints);
        }
    }

    /// `insert` with a caller-owned hint context.
    pub fn insert_with(&self, k: K, hints: &mut OperationHints<K>) -> bool {
        'restart: loop {
            // an empty tree needs the root lock to install the first leaf
            loop {
                if !self.root.load(Ordering::Acquire).is_null() {
                    break;
                }
                if !self.root_lock.try_start_write() {
                    continue;
                }
                if !self.root.load(Ordering::Relaxed).is_null() {
                    self.root_lock.end_write();
                    break;
                }
                let leaf = NodeRef::<K>::alloc(self.max_keys, false);
                leaf.set_key(0, k);
                leaf.set_num_elements(1);
                self.leftmost.store(leaf.raw(), Ordering::Release);
                self.root.store(leaf.raw(), Ordering::Release);
                self.root_lock.end_write();
                hints.last_insert.access(leaf.raw());
                return true;
            }

            // probe the hint: accept only if it still covers k under a lease
            let mut cur = NodeRef::<K>::null();
            let mut cur_lease = Lease::default();
            let hit = hints.last_insert.any(|cand| {
                if cand.is_null() {
                    return false;
                }
                let cand = NodeRef::from_raw(cand);
                let lease = cand.lock().start_read();
                if !self.weak_covers(cand, &k) {
                    return false;
                }
                if !cand.lock().validate(lease) {
                    return false;
                }
                cur = cand;
                cur_lease = lease;
                true
            });
            if hit {
                self.insert_stats.add_hit();
            } else {
                self.insert_stats.add_miss();
            }

            if cur.is_null() {
                // lease-validated root acquisition
                loop {
                    let root_lease = self.root_lock.start_read();
                    let root = self.root_ref();
                    if root.is_null() {
                        continue 'restart;
                    }
                    let lease = root.lock().start_read();
                    if self.root_lock.end_read(root_lease) {
                        cur = root;
                        cur_lease = lease;
                        break;
                    }
                }
            }

            loop {
                if cur.is_inner() {
                    let n = cur.num_elements();
                    let idx = Self::search_lower(&self.weak_comp, cur, n, &k);

                    // early exit for sets
                    if IS_SET && idx != n && self.weak_comp.equal(&cur.key(idx), &k) {
                        if !cur.lock().validate(cur_lease) {
                            continue 'restart;
                        }
                        if U::ACTIVE {
                            if !cur.lock().try_upgrade_to_write(cur_lease) {
                                continue 'restart;
                            }
                            let updated =
                                self.updater.update(unsafe { cur.key_mut(idx) }, &k);
                            cur.lock().end_write();
                            return updated;
                        }
                        return false;
                    }

                    let next = cur.child(idx);
                    if next.is_null() {
                        // raced with a writer mid-restructure
                        continue 'restart;
                    }
                    let next_lease = next.lock().start_read();
                    if !cur.lock().end_read(cur_lease) {
                        continue 'restart;
                    }
                    cur = next;
                    cur_lease = next_lease;
                    continue;
                }

                // at the target leaf
                let n = cur.num_elements();
                let mut idx = Self::search_upper(&self.weak_comp, cur, n, &k);

                if IS_SET && idx != 0 && self.weak_comp.equal(&cur.key(idx - 1), &k) {
                    if !cur.lock().validate(cur_lease) {
                        continue 'restart;
                    }
                    if U::ACTIVE {
                        if !cur.lock().try_upgrade_to_write(cur_lease) {
                            continue 'restart;
                        }
                        let updated =
                            self.updater.update(unsafe { cur.key_mut(idx - 1) }, &k);
                        cur.lock().end_write();
                        return updated;
                    }
                    return false;
                }

                if !cur.lock().try_upgrade_to_write(cur_lease) {
                    hints.last_insert.access(cur.raw());
                    continue 'restart;
                }

                if cur.num_elements() >= self.max_keys as usize {
                    // lock the sphere of influence root-ward
                    let mut locked: Vec<Option<NodeRef<K>>> = Vec::new();
                    let mut below = cur;
                    let mut parent = below.parent();
                    loop {
                        if !parent.is_null() {
                            parent.lock().start_write();
                            loop {
                                // the node may have been re-parented before
                                // we got the lock
                                if parent == below.parent() {
                                    break;
                                }
                                parent.lock().abort_write();
                                parent = below.parent();
                                parent.lock().start_write();
                            }
                            locked.push(Some(parent));
                        } else {
                            self.root_lock.start_write();
                            locked.push(None);
                        }

                        if parent.is_null() || !parent.is_full() {
                            break;
                        }
                        below = parent;
                        parent = parent.parent();
                    }

                    let old_root = self.root.load(Ordering::Relaxed);
                    let moved = self.rebalance_or_split(cur, idx, &mut locked);
                    idx -= moved;

                    // release leaf-ward
                    for entry in locked.iter().rev() {
                        match entry {
                            Some(node) => node.lock().end_write(),
                            None => {
                                if old_root == self.root.load(Ordering::Relaxed) {
                                    self.root_lock.abort_write();
                                } else {
                                    self.root_lock.end_write();
                                }
                            }
                        }
                    }

                    if idx > cur.num_elements() {
                        // the insertion point moved into the new sibling
                        cur.lock().end_write();
                        continue 'restart;
                    }
                }

                debug_assert!(cur.num_elements() < self.max_keys as usize);

                let n = cur.num_elements();
                cur.shift_keys_right(idx, n);
                cur.set_key(idx, k);
                cur.set_num_elements(n + 1);
                cur.lock().end_write();

                hints.last_insert.access(cur.raw());
                return true;
            }
        }
    }

    /// Moves keys into the left sibling to make room for an insertion at
    /// `idx`, or splits the node. Returns the number of keys moved left
    /// (0 on split); the bound by `idx` guarantees the pending insertion
    /// stays in this node.
    fn rebalance_or_split(
        &self,
        node: NodeRef<K>,
        idx: usize,
        locked: &mut Vec<Option<NodeRef<K>>>,
    ) -> usize {
        let max = self.max_keys as usize;
        debug_assert_eq!(node.num_elements(), max);

        let parent = node.parent();
        let pos = node.position();

        if !parent.is_null() && pos > 0 {
            let left = parent.child(pos - 1);

            if !left.lock().try_start_write() {
                // the left sibling is busy: fall back to splitting
                self.split(node, locked);
                return 0;
            }

            let left_n = left.num_elements();
            let num = (max - left_n).min(idx);
            if num > 0 {
                // the separator key rotates through the parent
                let splitter = parent.key(pos - 1);
                left.set_key(left_n, splitter);
                for i in 0..num - 1 {
                    left.set_key(left_n + 1 + i, node.key(i));
                }
                parent.set_key(pos - 1, node.key(num - 1));

                let n = node.num_elements();
                for i in 0..n - num {
                    node.set_key(i, node.key(i + num));
                }

                if node.is_inner() {
                    for i in 0..num {
                        let child = node.child(i);
                        left.set_child(left_n + i + 1, child);
                        child.set_parent(left);
                        child.set_position(left_n + i + 1);
                    }
                    for i in 0..=(n - num) {
                        let child = node.child(i + num);
                        node.set_child(i, child);
                        child.set_position(i);
                    }
                }

                left.set_num_elements(left_n + num);
                node.set_num_elements(n - num);

                left.lock().end_write();
                return num;
            }

            left.lock().abort_write();
        }

        self.split(node, locked);
        0
    }

    /// Splits a full node at the biased split point, pushing the separator
    /// into the parent (growing the tree at the root if necessary).
    fn split(&self, node: NodeRef<K>, locked: &mut Vec<Option<NodeRef<K>>>) {
        debug_assert!(node.lock().is_write_locked());
        let max = self.max_keys as usize;
        debug_assert_eq!(node.num_elements(), max);

        let sp = split_point(max);

        let sibling = NodeRef::<K>::alloc(self.max_keys, node.is_inner());
        sibling.lock().start_write();
        locked.push(Some(sibling));

        for (j, i) in (sp + 1..max).enumerate() {
            sibling.set_key(j, node.key(i));
        }
        if node.is_inner() {
            for (j, i) in (sp + 1..=max).enumerate() {
                let child = node.child(i);
                sibling.set_child(j, child);
                child.set_parent(sibling);
                child.set_position(j);
            }
        }

        node.set_num_elements(sp);
        sibling.set_num_elements(max - sp - 1);

        self.grow_parent(node, sibling, locked);
    }

    /// Registers `sibling` as the right neighbour of `node` in the parent,
    /// installing a fresh root when `node` was the root.
    fn grow_parent(
        &self,
        node: NodeRef<K>,
        sibling: NodeRef<K>,
        locked: &mut Vec<Option<NodeRef<K>>>,
    ) {
        let parent = node.parent();
        // the separator is the key one past the shrunken count
        let separator = node.key(node.num_elements());

        if parent.is_null() {
            debug_assert_eq!(self.root.load(Ordering::Relaxed), node.raw());

            let new_root = NodeRef::<K>::alloc(self.max_keys, true);
            new_root.set_num_elements(1);
            new_root.set_key(0, separator);
            new_root.set_child(0, node);
            new_root.set_child(1, sibling);
            node.set_parent(new_root);
            sibling.set_parent(new_root);
            sibling.set_position(1);

            self.root.store(new_root.raw(), Ordering::Release);
        } else {
            self.insert_inner(parent, node.position(), node, separator, sibling, locked);
        }
    }

    /// Inserts a separator/child pair into an inner node, recursing through
    /// `rebalance_or_split` when it is full.
    fn insert_inner(
        &self,
        node: NodeRef<K>,
        pos: usize,
        predecessor: NodeRef<K>,
        key: K,
        new_node: NodeRef<K>,
        locked: &mut Vec<Option<NodeRef<K>>>,
    ) {
        let mut pos = pos;

        if node.num_elements() >= self.max_keys as usize {
            let moved = self.rebalance_or_split(node, pos, locked);
            pos -= moved;

            if pos > node.num_elements() {
                // complete the insertion in the new right sibling; it may
                // have been reshaped, so locate the predecessor again
                let other = node.parent().child(node.position() + 1);
                debug_assert!(other.lock().is_write_locked());

                let mut i = 0;
                while i <= other.num_elements() {
                    if other.child(i) == predecessor {
                        break;
                    }
                    i += 1;
                }
                let pos = if i > other.num_elements() { 0 } else { i };
                self.insert_inner(other, pos, predecessor, key, new_node, locked);
                return;
            }
        }

        let n = node.num_elements();
        for i in (pos..n).rev() {
            node.set_key(i + 1, node.key(i));
            let child = node.child(i + 1);
            node.set_child(i + 2, child);
            child.bump_position();
        }

        debug_assert_eq!(node.child(pos), predecessor);

        node.set_key(pos, key);
        node.set_child(pos + 1, new_node);
        new_node.set_parent(node);
        new_node.set_position(pos + 1);
        node.set_num_elements(n + 1);
    }

    // ---- lookup ----

    /// Whether `k` is stored (strong equality).
    #[must_use]
    pub fn contains(&self, k: &K) -> bool {
        self.contains_with(k, &mut OperationHints::default())
    }

    /// `contains` with a caller-owned hint context.
    #[must_use]
    pub fn contains_with(&self, k: &K, hints: &mut OperationHints<K>) -> bool {
        self.find_with(k, hints).item().is_some()
    }

    /// A cursor at `k` (strong equality), or the end cursor.
    #[must_use]
    pub fn find(&self, k: &K) -> BTreeCursor<K> {
        self.find_with(k, &mut OperationHints::default())
    }

    /// `find` with a caller-owned hint context.
    #[must_use]
    pub fn find_with(&self, k: &K, hints: &mut OperationHints<K>) -> BTreeCursor<K> {
        if self.is_empty() {
            return BTreeCursor::end();
        }

        let mut cur = self.root_ref();
        let hit = hints.last_find.any(|cand| {
            if cand.is_null() {
                return false;
            }
            let cand = NodeRef::from_raw(cand);
            if !self.covers(cand, k) {
                return false;
            }
            cur = cand;
            true
        });
        if hit {
            self.contains_stats.add_hit();
        } else {
            self.contains_stats.add_miss();
        }

        loop {
            let n = cur.num_elements();
            let idx = Self::search_lower(&self.comp, cur, n, k);

            if idx < n && self.comp.equal(&cur.key(idx), k) {
                hints.last_find.access(cur.raw());
                return BTreeCursor::at(cur, idx);
            }

            if cur.is_leaf() {
                hints.last_find.access(cur.raw());
                return BTreeCursor::end();
            }

            cur = cur.child(idx);
        }
    }

    /// A cursor at the smallest stored key `>= k`, or the end cursor.
    #[must_use]
    pub fn lower_bound(&self, k: &K) -> BTreeCursor<K> {
        self.lower_bound_with(k, &mut OperationHints::default())
    }

    /// `lower_bound` with a caller-owned hint context.
    #[must_use]
    pub fn lower_bound_with(&self, k: &K, hints: &mut OperationHints<K>) -> BTreeCursor<K> {
        if self.is_empty() {
            return BTreeCursor::end();
        }

        let mut cur = self.root_ref();
        let hit = hints.last_lower_bound.any(|cand| {
            if cand.is_null() {
                return false;
            }
            let cand = NodeRef::from_raw(cand);
            if !self.covers(cand, k) {
                return false;
            }
            cur = cand;
            true
        });
        if hit {
            self.lower_bound_stats.add_hit();
        } else {
            self.lower_bound_stats.add_miss();
        }

        let mut res = BTreeCursor::end();
        loop {
            let n = cur.num_elements();
            let idx = Self::search_lower(&self.comp, cur, n, k);

            if cur.is_leaf() {
                hints.last_lower_bound.access(cur.raw());
                return if idx != n {
                    BTreeCursor::at(cur, idx)
                } else {
                    res
                };
            }

            if IS_SET && idx != n && self.comp.equal(&cur.key(idx), k) {
                return BTreeCursor::at(cur, idx);
            }

            if idx != n {
                res = BTreeCursor::at(cur, idx);
            }

            cur = cur.child(idx);
        }
    }

    /// A cursor at the smallest stored key `> k`, or the end cursor.
    #[must_use]
    pub fn upper_bound(&self, k: &K) -> BTreeCursor<K> {
        self.upper_bound_with(k, &mut OperationHints::default())
    }

    /// `upper_bound` with a caller-owned hint context.
    #[must_use]
    pub fn upper_bound_with(&self, k: &K, hints: &mut OperationHints<K>) -> BTreeCursor<K> {
        if self.is_empty() {
            return BTreeCursor::end();
        }

        let mut cur = self.root_ref();
        let hit = hints.last_upper_bound.any(|cand| {
            if cand.is_null() {
                return false;
            }
            let cand = NodeRef::from_raw(cand);
            if !self.covers_upper_bound(cand, k) {
                return false;
            }
            cur = cand;
            true
        });
        if hit {
            self.upper_bound_stats.add_hit();
        } else {
            self.upper_bound_stats.add_miss();
        }

        let mut res = BTreeCursor::end();
        loop {
            let n = cur.num_elements();
            let idx = Self::search_upper(&self.comp, cur, n, k);

            if cur.is_leaf() {
                hints.last_upper_bound.access(cur.raw());
                return if idx != n {
                    BTreeCursor::at(cur, idx)
                } else {
                    res
                };
            }

            if idx != n {
                res = BTreeCursor::at(cur, idx);
            }

            cur = cur.child(idx);
        }
    }

    // ---- iteration / partitioning ----

    /// A cursor at the smallest stored key.
    #[must_use]
    pub fn begin_cursor(&self) -> BTreeCursor<K> {
        let leftmost = self.leftmost_ref();
        if leftmost.is_null() {
            BTreeCursor::end()
        } else {
            BTreeCursor::at(leftmost, 0)
        }
    }

    /// The end cursor.
    #[must_use]
    pub fn end_cursor() -> BTreeCursor<K> {
        BTreeCursor::end()
    }

    /// An iterator over all stored keys in strong-order.
    #[must_use]
    pub fn iter(&self) -> RangeIter<'_, BTreeCursor<K>> {
        Range::new(self.begin_cursor(), Self::end_cursor()).into_iter()
    }

    /// Splits the iteration into up to roughly `num` disjoint ranges whose
    /// concatenation is the full iteration, for parallel consumers.
    #[must_use]
    pub fn partition(&self, num: usize) -> Vec<Range<'_, BTreeCursor<K>>> {
        self.chunks(num)
    }

    /// Alias of [`partition`](Self::partition).
    #[must_use]
    pub fn chunks(&self, num: usize) -> Vec<Range<'_, BTreeCursor<K>>> {
        let mut res = Vec::new();
        if self.is_empty() {
            return res;
        }
        Self::collect_chunks(
            self.root_ref(),
            &mut res,
            num.max(1),
            self.begin_cursor(),
            Self::end_cursor(),
        );
        res
    }

    fn collect_chunks<'a>(
        node: NodeRef<K>,
        res: &mut Vec<Range<'a, BTreeCursor<K>>>,
        num: usize,
        begin: BTreeCursor<K>,
        end: BTreeCursor<K>,
    ) {
        debug_assert!(num > 0);
        let n = node.num_elements();

        // biased insertion can leave empty nodes behind
        if n == 0 {
            if begin != end {
                res.push(Range::new(begin, end));
            }
            return;
        }

        if num == 1 {
            res.push(Range::new(begin, end));
            return;
        }

        if node.is_leaf() || num < n + 1 {
            let step = (n / num).max(1);

            res.push(Range::new(begin, BTreeCursor::at(node, step - 1)));
            let mut i = step - 1;
            while i < n - step {
                res.push(Range::new(
                    BTreeCursor::at(node, i),
                    BTreeCursor::at(node, i + step),
                ));
                i += step;
            }
            res.push(Range::new(BTreeCursor::at(node, i), end));
            return;
        }

        // spread the requested chunks over the children
        let part = num / (n + 1);
        debug_assert!(part > 0);
        Self::collect_chunks(node.child(0), res, part, begin, BTreeCursor::at(node, 0));
        for i in 1..n {
            Self::collect_chunks(
                node.child(i),
                res,
                part,
                BTreeCursor::at(node, i - 1),
                BTreeCursor::at(node, i),
            );
        }
        Self::collect_chunks(
            node.child(n),
            res,
            num - part * n,
            BTreeCursor::at(node, n - 1),
            end,
        );
    }

    // ---- bulk load ----

    /// Builds a tree bottom-up from a slice sorted under the strong order;
    /// considerably faster than inserting one by one.
    #[must_use]
    pub fn load(sorted: &[K]) -> Self
    where
        C: Default,
        W: Default,
        U: Default,
    {
        let tree = Self::new();
        if sorted.is_empty() {
            return tree;
        }

        let root = Self::build_subtree(sorted, tree.max_keys);
        let leftmost = root.leftmost_leaf();
        tree.root.store(root.raw(), Ordering::Relaxed);
        tree.leftmost.store(leftmost.raw(), Ordering::Relaxed);
        tree
    }

    fn build_subtree(elements: &[K], max_keys: u16) -> NodeRef<K> {
        let max = max_keys as usize;
        let length = elements.len();

        if length <= max {
            let leaf = NodeRef::<K>::alloc(max_keys, false);
            for (i, k) in elements.iter().enumerate() {
                leaf.set_key(i, *k);
            }
            leaf.set_num_elements(length);
            return leaf;
        }

        // shrink the key count until the subtrees sit comfortably above the
        // minimum fill
        let mut num_keys = max;
        let mut step = (length - num_keys) / (num_keys + 1);
        while num_keys > 1 && step < max / 2 {
            num_keys -= 1;
            step = (length - num_keys) / (num_keys + 1);
        }

        let node = NodeRef::<K>::alloc(max_keys, true);
        node.set_num_elements(num_keys);

        let mut at = 0;
        for i in 0..num_keys {
            node.set_key(i, elements[at + step]);

            let child = Self::build_subtree(&elements[at..at + step], max_keys);
            child.set_parent(node);
            child.set_position(i);
            node.set_child(i, child);

            at += step + 1;
        }

        let child = Self::build_subtree(&elements[at..], max_keys);
        child.set_parent(node);
        child.set_position(num_keys);
        node.set_child(num_keys, child);

        node
    }

    // ---- maintenance ----

    /// Removes all keys.
    pub fn clear(&mut self) {
        let root = self.root_ref();
        if !root.is_null() {
            unsafe { root.free_recursive() };
        }
        self.root.store(std::ptr::null_mut(), Ordering::Relaxed);
        self.leftmost.store(std::ptr::null_mut(), Ordering::Relaxed);
    }

    /// Exchanges the contents of two trees without copying.
    pub fn swap(&mut self, other: &mut Self) {
        debug_assert_eq!(self.max_keys, other.max_keys);
        std::mem::swap(&mut self.root, &mut other.root);
        std::mem::swap(&mut self.leftmost, &mut other.leftmost);
    }

    fn clone_subtree(node: NodeRef<K>) -> NodeRef<K> {
        let copy = NodeRef::<K>::alloc(node.max_keys(), node.is_inner());
        let n = node.num_elements();
        copy.set_position(node.position());
        copy.set_num_elements(n);
        for i in 0..n {
            copy.set_key(i, node.key(i));
        }
        if node.is_inner() {
            for i in 0..=n {
                let child = Self::clone_subtree(node.child(i));
                child.set_parent(copy);
                copy.set_child(i, child);
            }
        }
        copy
    }

    // ---- debugging ----

    /// The number of tree levels.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut node = self.root_ref();
        if node.is_null() {
            return 0;
        }
        let mut d = 1;
        while node.is_inner() {
            node = node.child(0);
            d += 1;
        }
        d
    }

    /// The number of allocated nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        fn walk<K: Copy>(node: NodeRef<K>) -> usize {
            let mut sum = 1;
            if node.is_inner() {
                for i in 0..=node.num_elements() {
                    sum += walk(node.child(i));
                }
            }
            sum
        }
        let root = self.root_ref();
        if root.is_null() {
            0
        } else {
            walk(root)
        }
    }

    /// Verifies the structural invariants; for tests and debugging.
    #[must_use]
    pub fn check(&self) -> bool {
        let root = self.root_ref();
        root.is_null() || self.check_node(root, root)
    }

    fn check_node(&self, node: NodeRef<K>, root: NodeRef<K>) -> bool {
        let n = node.num_elements();
        let max = self.max_keys as usize;

        if n > max {
            return false;
        }

        if node == root {
            if !node.parent().is_null() {
                return false;
            }
        } else {
            let parent = node.parent();
            if parent.is_null() || parent.child(node.position()) != node {
                return false;
            }
            let bound = |a: &K, b: &K| {
                if IS_SET {
                    self.comp.less(a, b)
                } else {
                    !self.comp.less(b, a)
                }
            };
            if node.position() != 0 && !bound(&parent.key(node.position() - 1), &node.key(0)) {
                return false;
            }
            if node.position() != parent.num_elements()
                && !bound(&node.key(n - 1), &parent.key(node.position()))
            {
                return false;
            }
        }

        for i in 1..n {
            let a = node.key(i - 1);
            let b = node.key(i);
            let ordered = if IS_SET {
                self.comp.less(&a, &b)
            } else {
                !self.comp.less(&b, &a)
            };
            if !ordered {
                return false;
            }
        }

        if node.is_inner() {
            for i in 0..=n {
                if !self.check_node(node.child(i), root) {
                    return false;
                }
            }
        }

        true
    }

    /// Bytes used by this tree's nodes (including this header).
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + self.node_count() * BLOCK_SIZE_ESTIMATE
    }
}

/// Nodes are laid out into the block budget, so the budget is the estimate.
const BLOCK_SIZE_ESTIMATE: usize = node::BLOCK_SIZE;

impl<K, C, W, U, const IS_SET: bool> Drop for BTree<K, C, W, U, IS_SET> {
    fn drop(&mut self) {
        let root = self.root.load(Ordering::Relaxed);
        if !root.is_null() {
            // SAFETY: drop has exclusive access; nodes form a tree
            unsafe { NodeRef::from_raw(root).free_recursive() };
        }
    }
}

impl<K, C, W, U, const IS_SET: bool> Clone for BTree<K, C, W, U, IS_SET>
where
    K: Copy,
    C: KeyOrder<K> + Clone,
    W: KeyOrder<K> + Clone,
    U: KeyUpdater<K> + Clone,
{
    fn clone(&self) -> Self {
        let copy = Self::with_order(
            self.comp.clone(),
            self.weak_comp.clone(),
            self.updater.clone(),
        );
        let root = self.root_ref();
        if !root.is_null() {
            let new_root = Self::clone_subtree(root);
            copy.leftmost
                .store(new_root.leftmost_leaf().raw(), Ordering::Relaxed);
            copy.root.store(new_root.raw(), Ordering::Relaxed);
        }
        copy
    }
}

impl<K, C, W, U, const IS_SET: bool> PartialEq for BTree<K, C, W, U, IS_SET>
where
    K: Copy,
    C: KeyOrder<K>,
    W: KeyOrder<K>,
    U: KeyUpdater<K>,
{
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        if self.len() != other.len() {
            return false;
        }
        other.iter().all(|k| self.contains(&k))
    }
}

impl<K, C, W, U, const IS_SET: bool> std::fmt::Debug for BTree<K, C, W, U, IS_SET>
where
    K: Copy + std::fmt::Debug,
    C: KeyOrder<K>,
    W: KeyOrder<K>,
    U: KeyUpdater<K>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A forward cursor over a [`BTree`], ordered by the strong comparator.
pub struct BTreeCursor<K> {
    node: NodeRef<K>,
    pos: usize,
}

// Cursors only read through their node pointer; partitions hand them to
// worker threads.
unsafe impl<K: Send + Sync> Send for BTreeCursor<K> {}
unsafe impl<K: Send + Sync> Sync for BTreeCursor<K> {}

impl<K> Clone for BTreeCursor<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for BTreeCursor<K> {}

impl<K> PartialEq for BTreeCursor<K> {
    fn eq(&self, other: &Self) -> bool {
        // all end states are equivalent
        (self.node.is_null() && other.node.is_null())
            || (self.node == other.node && self.pos == other.pos)
    }
}

impl<K: Copy> BTreeCursor<K> {
    fn end() -> Self {
        Self {
            node: NodeRef::null(),
            pos: 0,
        }
    }

    fn at(node: NodeRef<K>, pos: usize) -> Self {
        Self { node, pos }
    }
}

impl<K: Copy> Cursor for BTreeCursor<K> {
    type Item = K;

    fn item(&self) -> Option<K> {
        if self.node.is_null() {
            return None;
        }
        Some(self.node.key(self.pos))
    }

    fn advance(&mut self) {
        if self.node.is_null() {
            return;
        }

        if self.node.is_leaf() {
            // fast path: more keys in this leaf
            self.pos += 1;
            if self.pos < self.node.num_elements() {
                return;
            }
        } else {
            // descend to the leftmost leaf of the next subtree
            let mut cur = self.node.child(self.pos + 1);
            while cur.is_inner() {
                cur = cur.child(0);
            }
            self.node = cur;
            self.pos = 0;
            if !cur.is_empty() {
                return;
            }
        }

        // climb until a parent slot remains
        let mut cur = self.node;
        let mut pos = self.pos;
        while !cur.is_null() && pos == cur.num_elements() {
            pos = cur.position();
            cur = cur.parent();
        }
        if cur.is_null() {
            *self = Self::end();
        } else {
            self.node = cur;
            self.pos = pos;
        }
    }
}

#[cfg(test)]
mod tests;
