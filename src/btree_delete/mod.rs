// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

#![allow(unsafe_code)]

//! The deletion-capable sibling of [`btree`](crate::btree).
//!
//! Same ordered set/multiset contract, biased split and hint machinery,
//! plus `erase`: removing a key swaps inner-node victims with their
//! in-order predecessor so deletion always happens at a leaf, then walks
//! rootward restoring the minimum-fill invariant by merging with or
//! borrowing from siblings. Cursors are bidirectional and `end` points one
//! past the last element.
//!
//! This variant is single-threaded: all mutation goes through `&mut self`
//! and nodes carry no locks.

mod node;

use std::marker::PhantomData;

use crate::ord::{KeyOrder, KeyUpdater, NaturalOrder, NoUpdater};
use crate::range::{Cursor, Range, RangeIter};
use crate::sync::{AccessCounter, LruCache};

use node::{max_keys_for, min_keys, split_point, NodeHdr, NodeRef};

/// A caller-owned set of operation hints for the deletion-capable tree.
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
    /// Forgets all remembered nodes; required after any `erase`.
    pub fn clear(&mut self) {
        self.last_insert.clear(std::ptr::null_mut());
        self.last_find.clear(std::ptr::null_mut());
        self.last_lower_bound.clear(std::ptr::null_mut());
        self.last_upper_bound.clear(std::ptr::null_mut());
    }
}

/// An ordered collection of keys supporting erasure. See the module docs
/// and the [`BTreeDeleteSet`]/[`BTreeDeleteMultiset`] aliases.
pub struct BTreeDelete<K, C = NaturalOrder, W = C, U = NoUpdater, const IS_SET: bool = true> {
    root: NodeRef<K>,
    leftmost: NodeRef<K>,
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

/// A deletion-capable B-tree set.
pub type BTreeDeleteSet<K, C = NaturalOrder, W = C, U = NoUpdater> =
    BTreeDelete<K, C, W, U, true>;

/// A deletion-capable B-tree multiset.
pub type BTreeDeleteMultiset<K, C = NaturalOrder, W = C, U = NoUpdater> =
    BTreeDelete<K, C, W, U, false>;

unsafe impl<K, C, W, U, const IS_SET: bool> Send for BTreeDelete<K, C, W, U, IS_SET>
where
    K: Copy + Send,
    C: Send,
    W: Send,
    U: Send,
{
}

impl<K, C, W, U, const IS_SET: bool> Default for BTreeDelete<K, C, W, U, IS_SET>
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

impl<K, C, W, U, const IS_SET: bool> BTreeDelete<K, C, W, U, IS_SET>
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
            root: NodeRef::null(),
            leftmost: NodeRef::null(),
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

    /// The minimum fill of every non-root node.
    #[must_use]
    pub fn min_keys_per_node(&self) -> usize {
        min_keys(self.max_keys as usize)
    }

    /// Whether the tree holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }

    /// The number of stored keys, counted by walking the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.root.is_null() {
            0
        } else {
            Self::count_entries(self.root)
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

    // ---- node search / covers ----

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

    fn covers_impl<O: KeyOrder<K>>(ord: &O, node: NodeRef<K>, k: &K) -> bool {
        let n = node.num_elements();
        if n == 0 {
            return false;
        }
        if IS_SET {
            !ord.less(k, &node.key(0)) && !ord.less(&node.key(n - 1), k)
        } else {
            ord.less(&node.key(0), k) && ord.less(k, &node.key(n - 1))
        }
    }

    fn covers(&self, node: NodeRef<K>, k: &K) -> bool {
        Self::covers_impl(&self.comp, node, k)
    }

    fn weak_covers(&self, node: NodeRef<K>, k: &K) -> bool {
        Self::covers_impl(&self.weak_comp, node, k)
    }

    fn covers_upper_bound(&self, node: NodeRef<K>, k: &K) -> bool {
        let n = node.num_elements();
        n != 0 && !self.comp.less(k, &node.key(0)) && self.comp.less(k, &node.key(n - 1))
    }

    // ---- insertion (sequential) ----

    /// Inserts `k`; returns whether a new element was added (or, for an
    /// active updater on a weak-equal duplicate, the updater's verdict).
    pub fn insert(&mut self, k: K) -> bool {
        self.insert_with(k, &mut OperationHints::default())
    }

    /// Inserts every key of the iterator, sharing one hint context.
    pub fn insert_all<I: IntoIterator<Item = K>>(&mut self, keys: I) {
        let mut hints = OperationHints::default();
        for k in keys {
            self.insert_with(k, &mut hints);
        }
    }

    /// `insert` with a caller-owned hint context.
    pub fn insert_with(&mut self, k: K, hints: &mut OperationHints<K>) -> bool {
        if self.root.is_null() {
            let leaf = NodeRef::<K>::alloc(self.max_keys, false);
            leaf.set_key(0, k);
            leaf.set_num_elements(1);
            self.root = leaf;
            self.leftmost = leaf;
            hints.last_insert.access(leaf.raw());
            return true;
        }

        let mut cur = self.root;
        let hit = hints.last_insert.any(|cand| {
            if cand.is_null() {
                return false;
            }
            let cand = NodeRef::from_raw(cand);
            if !self.weak_covers(cand, &k) {
                return false;
            }
            cur = cand;
            true
        });
        if hit {
            self.insert_stats.add_hit();
        } else {
            self.insert_stats.add_miss();
        }

        loop {
            if cur.is_inner() {
                let n = cur.num_elements();
                let idx = Self::search_lower(&self.weak_comp, cur, n, &k);

                if IS_SET && idx != n && self.weak_comp.equal(&cur.key(idx), &k) {
                    if U::ACTIVE {
                        let mut stored = cur.key(idx);
                        let updated = self.updater.update(&mut stored, &k);
                        cur.set_key(idx, stored);
                        return updated;
                    }
                    return false;
                }

                cur = cur.child(idx);
                continue;
            }

            let n = cur.num_elements();
            let mut idx = Self::search_upper(&self.weak_comp, cur, n, &k);

            if IS_SET && idx != 0 && self.weak_comp.equal(&cur.key(idx - 1), &k) {
                if U::ACTIVE {
                    let mut stored = cur.key(idx - 1);
                    let updated = self.updater.update(&mut stored, &k);
                    cur.set_key(idx - 1, stored);
                    return updated;
                }
                return false;
            }

            if cur.num_elements() >= self.max_keys as usize {
                let moved = self.rebalance_or_split(cur, idx);
                idx -= moved;

                if idx > cur.num_elements() {
                    // continue in the freshly created right sibling
                    idx -= cur.num_elements() + 1;
                    cur = cur.parent().child(cur.position() + 1);
                }
            }

            debug_assert!(cur.num_elements() < self.max_keys as usize);

            let n = cur.num_elements();
            cur.shift_keys_right(idx, n);
            cur.set_key(idx, k);
            cur.set_num_elements(n + 1);

            hints.last_insert.access(cur.raw());
            return true;
        }
    }

    fn rebalance_or_split(&mut self, node: NodeRef<K>, idx: usize) -> usize {
        let max = self.max_keys as usize;
        debug_assert_eq!(node.num_elements(), max);

        let parent = node.parent();
        let pos = node.position();

        if !parent.is_null() && pos > 0 {
            let left = parent.child(pos - 1);
            let left_n = left.num_elements();
            let num = (max - left_n).min(idx);

            if num > 0 {
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
                return num;
            }
        }

        self.split(node);
        0
    }

    fn split(&mut self, node: NodeRef<K>) {
        let max = self.max_keys as usize;
        debug_assert_eq!(node.num_elements(), max);

        let sp = split_point(max);

        let sibling = NodeRef::<K>::alloc(self.max_keys, node.is_inner());
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

        self.grow_parent(node, sibling);
    }

    fn grow_parent(&mut self, node: NodeRef<K>, sibling: NodeRef<K>) {
        let parent = node.parent();
        let separator = node.key(node.num_elements());

        if parent.is_null() {
            debug_assert_eq!(self.root, node);

            let new_root = NodeRef::<K>::alloc(self.max_keys, true);
            new_root.set_num_elements(1);
            new_root.set_key(0, separator);
            new_root.set_child(0, node);
            new_root.set_child(1, sibling);
            node.set_parent(new_root);
            sibling.set_parent(new_root);
            sibling.set_position(1);

            self.root = new_root;
        } else {
            self.insert_inner(parent, node.position(), node, separator, sibling);
        }
    }

    fn insert_inner(
        &mut self,
        node: NodeRef<K>,
        pos: usize,
        predecessor: NodeRef<K>,
        key: K,
        new_node: NodeRef<K>,
    ) {
        let mut pos = pos;

        if node.num_elements() >= self.max_keys as usize {
            let moved = self.rebalance_or_split(node, pos);
            pos -= moved;

            if pos > node.num_elements() {
                pos = pos - node.num_elements() - 1;
                let other = node.parent().child(node.position() + 1);
                self.insert_inner(other, pos, predecessor, key, new_node);
                return;
            }
        }

        let n = node.num_elements();
        for i in (pos..n).rev() {
            node.set_key(i + 1, node.key(i));
            let child = node.child(i + 1);
            node.set_child(i + 2, child);
            child.set_position(child.position() + 1);
        }

        debug_assert_eq!(node.child(pos), predecessor);

        node.set_key(pos, key);
        node.set_child(pos + 1, new_node);
        new_node.set_parent(node);
        new_node.set_position(pos + 1);
        node.set_num_elements(n + 1);
    }

    // ---- erasure ----

    /// Erases `k`; returns the number of removed keys (at most one for
    /// sets).
    pub fn erase(&mut self, k: &K) -> usize {
        if self.is_empty() {
            return 0;
        }

        if IS_SET {
            let mut iter = self.internal_find(k);
            if iter.item().is_none() {
                return 0;
            }
            self.erase_at(&mut iter);
            1
        } else {
            let mut lower = self.internal_lower_bound(k);
            let matched = lower
                .item()
                .is_some_and(|found| self.comp.equal(&found, k));
            if !matched {
                return 0;
            }
            let count = Self::distance(lower, self.internal_upper_bound(k));
            for _ in 0..count {
                self.erase_at(&mut lower);
            }
            count
        }
    }

    /// The number of stored keys equal to `k` under the strong order.
    #[must_use]
    pub fn count(&self, k: &K) -> usize {
        if self.is_empty() {
            return 0;
        }
        Self::distance(self.internal_lower_bound(k), self.internal_upper_bound(k))
    }

    fn distance(from: BTreeDeleteCursor<K>, to: BTreeDeleteCursor<K>) -> usize {
        let mut cur = from;
        let mut n = 0;
        while cur != to && cur.item().is_some() {
            n += 1;
            cur.advance();
        }
        n
    }

    /// Erases the key under the cursor and advances it to the next element.
    /// All other cursors and hints into this tree become invalid.
    pub fn erase_at(&mut self, iter: &mut BTreeDeleteCursor<K>) {
        debug_assert!(iter.item().is_some());

        let mut internal_delete = false;
        if iter.node.is_inner() {
            // swap with the in-order predecessor so the removal happens at
            // a leaf
            let at_inner = *iter;
            iter.retreat();
            let inner_key = at_inner.node.key(at_inner.pos);
            at_inner.node.set_key(at_inner.pos, iter.node.key(iter.pos));
            iter.node.set_key(iter.pos, inner_key);
            internal_delete = true;
        }
        debug_assert!(iter.node.is_leaf());

        // remove the key from the leaf
        let n = iter.node.num_elements();
        if iter.pos + 1 < n {
            iter.node.shift_keys_left(iter.pos + 1, n);
        }
        iter.node.set_num_elements(n - 1);

        // walk rootward restoring the minimum fill
        let mut res = *iter;
        let mut cur = *iter;
        loop {
            let parent = cur.node.parent();
            if parent.is_null() {
                if cur.node.num_elements() == 0 {
                    if cur.node.is_leaf() {
                        // the whole tree became empty
                        unsafe { cur.node.free_alone() };
                        self.root = NodeRef::null();
                        self.leftmost = NodeRef::null();
                        res = BTreeDeleteCursor::null();
                    } else {
                        // the root's single child takes over
                        let child = cur.node.child(0);
                        child.set_parent(NodeRef::null());
                        self.root = child;
                        unsafe { cur.node.free_alone() };
                    }
                }
                break;
            }
            if cur.node.num_elements() >= self.min_keys_per_node() {
                break;
            }
            let merged = self.merge_or_rebalance(&mut cur);
            if cur.node.is_leaf() {
                res = cur;
            }
            if !merged {
                break;
            }
            cur.node = cur.node.parent();
        }
        *iter = res;

        if !iter.node.is_null() {
            if iter.pos == iter.node.num_elements() {
                iter.resolve_position();
            }
            if internal_delete {
                iter.advance();
            }
        }
    }

    /// Fixes up an undersized node by merging with or borrowing from a
    /// sibling; returns whether a merge occurred (so the caller continues
    /// at the parent).
    fn merge_or_rebalance(&mut self, iter: &mut BTreeDeleteCursor<K>) -> bool {
        debug_assert!(iter.node.num_elements() < self.min_keys_per_node());
        let max = self.max_keys as usize;

        let parent = iter.node.parent();
        let pos = iter.node.position();
        let n = iter.node.num_elements();

        if pos < parent.num_elements() {
            let right = parent.child(pos + 1);
            if n + right.num_elements() + 1 <= max {
                self.merge(iter.node, right);
                return true;
            }
            if pos > 0 {
                let left = parent.child(pos - 1);
                if left.num_elements() + n + 1 <= max {
                    self.merge_into_left(left, iter);
                    return true;
                }
                self.rebalance_from_left(left, iter);
                return false;
            }
            self.rebalance_from_right(iter.node, right);
            false
        } else {
            debug_assert!(pos > 0);
            let left = parent.child(pos - 1);
            if left.num_elements() + n + 1 <= max {
                self.merge_into_left(left, iter);
                true
            } else {
                self.rebalance_from_left(left, iter);
                false
            }
        }
    }

    fn merge_into_left(&mut self, left: NodeRef<K>, iter: &mut BTreeDeleteCursor<K>) {
        let left_n = left.num_elements();
        self.merge(left, iter.node);
        iter.node = left;
        iter.pos += left_n + 1;
    }

    /// Merges `right` into `left` through the parent separator and frees
    /// the right node.
    fn merge(&mut self, left: NodeRef<K>, right: NodeRef<K>) {
        let parent = left.parent();
        debug_assert!(!parent.is_null());

        let pos = left.position();
        debug_assert!(pos < parent.num_elements());

        let left_n = left.num_elements();
        let right_n = right.num_elements();

        // the separator moves down into the left node
        left.set_key(left_n, parent.key(pos));

        // close the gap in the parent
        let parent_n = parent.num_elements();
        for i in pos + 1..parent_n {
            parent.set_key(i - 1, parent.key(i));
            let sibling = parent.child(i + 1);
            sibling.set_position(sibling.position() - 1);
            parent.set_child(i, sibling);
        }
        parent.set_num_elements(parent_n - 1);

        for j in 0..right_n {
            left.set_key(left_n + 1 + j, right.key(j));
        }

        if left.is_inner() {
            debug_assert!(right.is_inner());
            for j in 0..=right_n {
                let child = right.child(j);
                child.set_parent(left);
                child.set_position(left_n + 1 + j);
                left.set_child(left_n + 1 + j, child);
            }
        }

        left.set_num_elements(left_n + right_n + 1);

        // children have been re-homed; only the block itself goes
        unsafe { right.free_alone() };
    }

    fn rebalance_from_right(&mut self, left: NodeRef<K>, right: NodeRef<K>) {
        let parent = left.parent();
        debug_assert!(!parent.is_null());
        let pos = left.position();
        debug_assert!(pos < parent.num_elements());

        let left_n = left.num_elements();
        let right_n = right.num_elements();
        let to_move = (right_n - self.min_keys_per_node()) / 2 + 1;

        // rotate through the parent separator
        left.set_key(left_n, parent.key(pos));
        for j in 0..to_move - 1 {
            left.set_key(left_n + 1 + j, right.key(j));
        }
        parent.set_key(pos, right.key(to_move - 1));

        for i in to_move..right_n {
            right.set_key(i - to_move, right.key(i));
        }

        if left.is_inner() {
            debug_assert!(right.is_inner());
            for j in 0..to_move {
                let child = right.child(j);
                child.set_parent(left);
                child.set_position(left_n + 1 + j);
                left.set_child(left_n + 1 + j, child);
            }
            for i in to_move..=right_n {
                let child = right.child(i);
                child.set_position(i - to_move);
                right.set_child(i - to_move, child);
            }
        }

        left.set_num_elements(left_n + to_move);
        right.set_num_elements(right_n - to_move);
    }

    fn rebalance_from_left(&mut self, left: NodeRef<K>, iter: &mut BTreeDeleteCursor<K>) {
        let right = iter.node;
        let parent = right.parent();
        debug_assert!(!parent.is_null());
        let pos = right.position();
        debug_assert!(pos > 0);

        let left_n = left.num_elements();
        let right_n = right.num_elements();
        let to_move = (left_n - self.min_keys_per_node()) / 2 + 1;

        // make room at the front of the right node
        for i in (to_move..right_n + to_move).rev() {
            right.set_key(i, right.key(i - to_move));
        }

        right.set_key(to_move - 1, parent.key(pos - 1));
        for (j, i) in (left_n - to_move + 1..).take(to_move - 1).enumerate() {
            right.set_key(j, left.key(i));
        }
        parent.set_key(pos - 1, left.key(left_n - to_move));

        if right.is_inner() {
            debug_assert!(left.is_inner());
            for i in (to_move..=right_n + to_move).rev() {
                let child = right.child(i - to_move);
                child.set_position(i);
                right.set_child(i, child);
            }
            for (j, i) in (left_n - to_move + 1..).take(to_move).enumerate() {
                let child = left.child(i);
                child.set_parent(right);
                child.set_position(j);
                right.set_child(j, child);
            }
        }

        iter.pos += to_move;

        left.set_num_elements(left_n - to_move);
        right.set_num_elements(right_n + to_move);
    }

    // ---- lookup ----

    fn internal_find(&self, k: &K) -> BTreeDeleteCursor<K> {
        let mut cur = BTreeDeleteCursor::at(self.root, 0);
        loop {
            let n = cur.node.num_elements();
            let idx = Self::search_lower(&self.comp, cur.node, n, k);
            cur.pos = idx;

            if idx < n && self.comp.equal(&cur.node.key(idx), k) {
                return cur;
            }
            if cur.node.is_leaf() {
                return BTreeDeleteCursor::null();
            }
            cur.node = cur.node.child(idx);
        }
    }

    fn internal_lower_bound(&self, k: &K) -> BTreeDeleteCursor<K> {
        let mut cur = BTreeDeleteCursor::at(self.root, 0);
        let mut res = BTreeDeleteCursor::null();
        loop {
            let n = cur.node.num_elements();
            let idx = Self::search_lower(&self.comp, cur.node, n, k);
            cur.pos = idx;

            if idx < n {
                res = cur;
                if IS_SET && self.comp.equal(&cur.node.key(idx), k) {
                    break;
                }
            }
            if cur.node.is_leaf() {
                break;
            }
            cur.node = cur.node.child(idx);
        }
        if res.node.is_null() {
            res = cur;
        }
        res
    }

    fn internal_upper_bound(&self, k: &K) -> BTreeDeleteCursor<K> {
        let mut cur = BTreeDeleteCursor::at(self.root, 0);
        let mut res = BTreeDeleteCursor::null();
        loop {
            let n = cur.node.num_elements();
            let idx = Self::search_upper(&self.comp, cur.node, n, k);
            cur.pos = idx;

            if idx < n {
                res = cur;
            }
            if cur.node.is_leaf() {
                break;
            }
            cur.node = cur.node.child(idx);
        }
        if res.node.is_null() {
            res = cur;
        }
        res
    }

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

    /// A cursor at `k` (strong equality), or an end cursor.
    #[must_use]
    pub fn find(&self, k: &K) -> BTreeDeleteCursor<K> {
        self.find_with(k, &mut OperationHints::default())
    }

    /// `find` with a caller-owned hint context.
    #[must_use]
    pub fn find_with(&self, k: &K, hints: &mut OperationHints<K>) -> BTreeDeleteCursor<K> {
        if self.is_empty() {
            return BTreeDeleteCursor::null();
        }

        let mut cur = self.root;
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
                return BTreeDeleteCursor::at(cur, idx);
            }
            if cur.is_leaf() {
                hints.last_find.access(cur.raw());
                return BTreeDeleteCursor::null();
            }
            cur = cur.child(idx);
        }
    }

    /// A cursor at the smallest stored key `>= k`, or an end cursor.
    #[must_use]
    pub fn lower_bound(&self, k: &K) -> BTreeDeleteCursor<K> {
        self.lower_bound_with(k, &mut OperationHints::default())
    }

    /// `lower_bound` with a caller-owned hint context.
    #[must_use]
    pub fn lower_bound_with(&self, k: &K, hints: &mut OperationHints<K>) -> BTreeDeleteCursor<K> {
        if self.is_empty() {
            return BTreeDeleteCursor::null();
        }

        let mut cur = self.root;
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

        let mut res = BTreeDeleteCursor::null();
        loop {
            let n = cur.num_elements();
            let idx = Self::search_lower(&self.comp, cur, n, k);

            if cur.is_leaf() {
                hints.last_lower_bound.access(cur.raw());
                return if idx != n {
                    BTreeDeleteCursor::at(cur, idx)
                } else {
                    res
                };
            }
            if IS_SET && idx != n && self.comp.equal(&cur.key(idx), k) {
                return BTreeDeleteCursor::at(cur, idx);
            }
            if idx != n {
                res = BTreeDeleteCursor::at(cur, idx);
            }
            cur = cur.child(idx);
        }
    }

    /// A cursor at the smallest stored key `> k`, or an end cursor.
    #[must_use]
    pub fn upper_bound(&self, k: &K) -> BTreeDeleteCursor<K> {
        self.upper_bound_with(k, &mut OperationHints::default())
    }

    /// `upper_bound` with a caller-owned hint context.
    #[must_use]
    pub fn upper_bound_with(&self, k: &K, hints: &mut OperationHints<K>) -> BTreeDeleteCursor<K> {
        if self.is_empty() {
            return BTreeDeleteCursor::null();
        }

        let mut cur = self.root;
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

        let mut res = BTreeDeleteCursor::null();
        loop {
            let n = cur.num_elements();
            let idx = Self::search_upper(&self.comp, cur, n, k);

            if cur.is_leaf() {
                hints.last_upper_bound.access(cur.raw());
                return if idx != n {
                    BTreeDeleteCursor::at(cur, idx)
                } else {
                    res
                };
            }
            if idx != n {
                res = BTreeDeleteCursor::at(cur, idx);
            }
            cur = cur.child(idx);
        }
    }

    // ---- iteration / partitioning ----

    /// The rightmost leaf; computed on demand.
    fn rightmost(&self) -> NodeRef<K> {
        if self.root.is_null() {
            NodeRef::null()
        } else {
            self.root.rightmost_leaf()
        }
    }

    /// A cursor at the smallest stored key.
    #[must_use]
    pub fn begin_cursor(&self) -> BTreeDeleteCursor<K> {
        if self.leftmost.is_null() {
            BTreeDeleteCursor::null()
        } else {
            BTreeDeleteCursor::at(self.leftmost, 0)
        }
    }

    /// The cursor one past the largest stored key.
    #[must_use]
    pub fn end_cursor(&self) -> BTreeDeleteCursor<K> {
        let rightmost = self.rightmost();
        if rightmost.is_null() {
            BTreeDeleteCursor::null()
        } else {
            BTreeDeleteCursor::at(rightmost, rightmost.num_elements())
        }
    }

    /// An iterator over all stored keys in strong-order.
    #[must_use]
    pub fn iter(&self) -> RangeIter<'_, BTreeDeleteCursor<K>> {
        Range::new(self.begin_cursor(), self.end_cursor()).into_iter()
    }

    /// Splits the iteration into up to roughly `num` disjoint ranges.
    #[must_use]
    pub fn partition(&self, num: usize) -> Vec<Range<'_, BTreeDeleteCursor<K>>> {
        let mut res = Vec::new();
        if self.is_empty() {
            return res;
        }
        Self::collect_chunks(
            self.root,
            &mut res,
            num.max(1),
            self.begin_cursor(),
            self.end_cursor(),
        );
        res
    }

    fn collect_chunks<'a>(
        node: NodeRef<K>,
        res: &mut Vec<Range<'a, BTreeDeleteCursor<K>>>,
        num: usize,
        begin: BTreeDeleteCursor<K>,
        end: BTreeDeleteCursor<K>,
    ) {
        debug_assert!(num > 0);
        let n = node.num_elements();

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

            res.push(Range::new(begin, BTreeDeleteCursor::at(node, step - 1)));
            let mut i = step - 1;
            while i < n - step {
                res.push(Range::new(
                    BTreeDeleteCursor::at(node, i),
                    BTreeDeleteCursor::at(node, i + step),
                ));
                i += step;
            }
            res.push(Range::new(BTreeDeleteCursor::at(node, i), end));
            return;
        }

        let part = num / (n + 1);
        debug_assert!(part > 0);
        Self::collect_chunks(node.child(0), res, part, begin, BTreeDeleteCursor::at(node, 0));
        for i in 1..n {
            Self::collect_chunks(
                node.child(i),
                res,
                part,
                BTreeDeleteCursor::at(node, i - 1),
                BTreeDeleteCursor::at(node, i),
            );
        }
        Self::collect_chunks(
            node.child(n),
            res,
            num - part * n,
            BTreeDeleteCursor::at(node, n - 1),
            end,
        );
    }

    // ---- bulk load / maintenance ----

    /// Builds a tree bottom-up from a slice sorted under the strong order.
    #[must_use]
    pub fn load(sorted: &[K]) -> Self
    where
        C: Default,
        W: Default,
        U: Default,
    {
        let mut tree = Self::new();
        if sorted.is_empty() {
            return tree;
        }
        let root = Self::build_subtree(sorted, tree.max_keys);
        tree.leftmost = root.leftmost_leaf();
        tree.root = root;
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

    /// Removes all keys.
    pub fn clear(&mut self) {
        if !self.root.is_null() {
            unsafe { self.root.free_recursive() };
        }
        self.root = NodeRef::null();
        self.leftmost = NodeRef::null();
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

    /// Verifies the structural invariants, including the minimum fill of
    /// every non-root node.
    #[must_use]
    pub fn check(&self) -> bool {
        self.root.is_null() || self.check_node(self.root)
    }

    fn check_node(&self, node: NodeRef<K>) -> bool {
        let n = node.num_elements();
        let max = self.max_keys as usize;

        if n > max {
            return false;
        }
        if node == self.root {
            if !node.parent().is_null() {
                return false;
            }
        } else {
            if n < self.min_keys_per_node() {
                return false;
            }
            let parent = node.parent();
            if parent.is_null() || parent.child(node.position()) != node {
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
                if !self.check_node(node.child(i)) {
                    return false;
                }
            }
        }

        true
    }
}

impl<K, C, W, U, const IS_SET: bool> Drop for BTreeDelete<K, C, W, U, IS_SET> {
    fn drop(&mut self) {
        if !self.root.is_null() {
            unsafe { self.root.free_recursive() };
        }
    }
}

impl<K, C, W, U, const IS_SET: bool> Clone for BTreeDelete<K, C, W, U, IS_SET>
where
    K: Copy,
    C: KeyOrder<K> + Clone,
    W: KeyOrder<K> + Clone,
    U: KeyUpdater<K> + Clone,
{
    fn clone(&self) -> Self {
        let mut copy = Self::with_order(
            self.comp.clone(),
            self.weak_comp.clone(),
            self.updater.clone(),
        );
        if !self.root.is_null() {
            let root = Self::clone_subtree(self.root);
            copy.leftmost = root.leftmost_leaf();
            copy.root = root;
        }
        copy
    }
}

impl<K, C, W, U, const IS_SET: bool> PartialEq for BTreeDelete<K, C, W, U, IS_SET>
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

/// A bidirectional cursor over a [`BTreeDelete`].
pub struct BTreeDeleteCursor<K> {
    node: NodeRef<K>,
    pos: usize,
}

// Cursors only read through their node pointer; partitions hand them to
// worker threads.
unsafe impl<K: Send + Sync> Send for BTreeDeleteCursor<K> {}
unsafe impl<K: Send + Sync> Sync for BTreeDeleteCursor<K> {}

impl<K> Clone for BTreeDeleteCursor<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for BTreeDeleteCursor<K> {}

impl<K> PartialEq for BTreeDeleteCursor<K> {
    fn eq(&self, other: &Self) -> bool {
        (self.node.is_null() && other.node.is_null())
            || (self.node == other.node && self.pos == other.pos)
    }
}

impl<K: Copy> BTreeDeleteCursor<K> {
    fn null() -> Self {
        Self {
            node: NodeRef::null(),
            pos: 0,
        }
    }

    fn at(node: NodeRef<K>, pos: usize) -> Self {
        Self { node, pos }
    }

    /// Walks up until a parent slot remains; at the tree end the cursor
    /// stays one past the final leaf position.
    fn resolve_position(&mut self) {
        let saved = self.node;
        loop {
            self.pos = self.node.position();
            self.node = self.node.parent();
            if self.node.is_null() || self.pos != self.node.num_elements() {
                break;
            }
        }
        if self.node.is_null() {
            self.node = saved;
            self.pos = self.node.num_elements();
        }
    }

    /// Moves to the previous element; at the first element the cursor is
    /// left unchanged.
    pub fn retreat(&mut self) {
        if self.node.is_null() {
            return;
        }
        if self.node.is_inner() {
            // rightmost key of the left subtree
            let mut cur = self.node.child(self.pos);
            while cur.is_inner() {
                cur = cur.child(cur.num_elements());
            }
            self.node = cur;
            self.pos = cur.num_elements() - 1;
        } else if self.pos > 0 {
            self.pos -= 1;
        } else {
            let saved = *self;
            loop {
                self.pos = self.node.position();
                self.node = self.node.parent();
                if self.node.is_null() || self.pos != 0 {
                    break;
                }
            }
            if self.node.is_null() {
                *self = saved;
            } else {
                self.pos -= 1;
            }
        }
    }
}

impl<K: Copy> Cursor for BTreeDeleteCursor<K> {
    type Item = K;

    fn item(&self) -> Option<K> {
        if self.node.is_null() || self.pos >= self.node.num_elements() {
            return None;
        }
        Some(self.node.key(self.pos))
    }

    fn advance(&mut self) {
        if self.node.is_null() {
            return;
        }
        if self.node.is_inner() {
            let mut cur = self.node.child(self.pos + 1);
            while cur.is_inner() {
                cur = cur.child(0);
            }
            self.node = cur;
            self.pos = 0;
        } else {
            self.pos += 1;
            if self.pos >= self.node.num_elements() {
                self.resolve_position();
            }
        }
    }
}

#[cfg(test)]
mod tests;
