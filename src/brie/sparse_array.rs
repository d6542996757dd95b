// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

#![allow(unsafe_code)]

//! A sparse array over the full 64-bit index domain.
//!
//! The array is a fixed-degree tree: leaf nodes hold one value word per cell,
//! inner nodes hold one child pointer per cell, and only the minimal subtree
//! covering the non-default values is materialized. The covered window is
//! `(offset, levels)`: at height `L` the tree spans the aligned
//! `CELLS^(L+1)`-wide index window starting at `offset`, and grows upward one
//! level at a time whenever an index falls outside it.
//!
//! Concurrency: value cells and child slots are plain atomics, children are
//! installed with a CAS (losers free their allocation and adopt the winner),
//! and the `(root, levels, offset)` triple — as well as the first-leaf
//! shortcut — is published through a version-stamped snapshot protocol. The
//! version lives in the pointer word itself: an aligned pointer is even, and
//! a writer parks the word at `version + 1` (odd) while it updates the
//! companion fields.

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

use crate::range::Cursor;

/// A value storable in a [`SparseArray`] cell.
///
/// # Safety
///
/// Implementations must round-trip through `into_word`/`from_word` without
/// loss, encode [`EMPTY`](Self::EMPTY) as the zero word (cells start zeroed),
/// and — because the array hands out cells across threads — guarantee that a
/// word published by one thread decodes to a value usable by another.
pub unsafe trait SparseValue: Copy + Eq {
    /// The absent value; must encode to the zero word.
    const EMPTY: Self;

    /// Encodes this value into a cell word.
    fn into_word(self) -> u64;

    /// Decodes a cell word.
    fn from_word(word: u64) -> Self;
}

unsafe impl SparseValue for u64 {
    const EMPTY: Self = 0;

    fn into_word(self) -> u64 {
        self
    }

    fn from_word(word: u64) -> Self {
        word
    }
}

/// One tree node: a parent back-pointer for iteration plus `CELLS` cell
/// words holding either values (leaf level) or child pointers (inner
/// levels).
#[repr(C)]
pub(crate) struct Node<const CELLS: usize> {
    parent: AtomicPtr<Node<CELLS>>,
    cells: [AtomicU64; CELLS],
}

fn new_node<const CELLS: usize>() -> *mut Node<CELLS> {
    Box::into_raw(Box::new(Node {
        parent: AtomicPtr::new(ptr::null_mut()),
        cells: std::array::from_fn(|_| AtomicU64::new(0)),
    }))
}

unsafe fn free_nodes<const CELLS: usize>(node: *mut Node<CELLS>, level: u32) {
    if node.is_null() {
        return;
    }
    if level != 0 {
        for i in 0..CELLS {
            let child = (*node).cells[i].load(Ordering::Relaxed) as *mut Node<CELLS>;
            free_nodes(child, level - 1);
        }
    }
    drop(Box::from_raw(node));
}

const fn index_mask<const CELLS: usize>() -> u64 {
    (CELLS as u64) - 1
}

const fn bits_per_level<const CELLS: usize>() -> u32 {
    CELLS.trailing_zeros()
}

/// The cell index selected by `a` on the given tree level.
fn index_at<const CELLS: usize>(a: u64, level: u32) -> u64 {
    let shift = level * bits_per_level::<CELLS>();
    if shift >= 64 {
        0
    } else {
        (a >> shift) & index_mask::<CELLS>()
    }
}

/// The mask keeping the index bits at and above the given level.
fn level_mask<const CELLS: usize>(level: u32) -> u64 {
    let shift = level * bits_per_level::<CELLS>();
    if shift >= 64 {
        0
    } else {
        !0u64 << shift
    }
}

/// A caller-owned operation context recording the leaf the last operation
/// touched, so that runs of nearby indices skip the root-to-leaf descent.
#[derive(Debug)]
pub struct OpContext<const CELLS: usize> {
    last_index: u64,
    last_node: *mut Node<CELLS>,
}

impl<const CELLS: usize> Default for OpContext<CELLS> {
    fn default() -> Self {
        Self {
            last_index: 0,
            last_node: ptr::null_mut(),
        }
    }
}

impl<const CELLS: usize> OpContext<CELLS> {
    /// Forgets the cached location.
    pub fn clear(&mut self) {
        self.last_node = ptr::null_mut();
    }
}

/// A typed view of a value cell, for callers that need to race on a single
/// slot (compare-and-swap of lazily created nested structures, bitwise-or of
/// mask words).
#[repr(transparent)]
pub struct AtomicCell<T> {
    word: AtomicU64,
    _values: PhantomData<T>,
}

impl<T: SparseValue> AtomicCell<T> {
    /// Reads the cell.
    pub fn load(&self) -> T {
        T::from_word(self.word.load(Ordering::Acquire))
    }

    /// Writes the cell.
    pub fn store(&self, value: T) {
        self.word.store(value.into_word(), Ordering::Release);
    }

    /// Installs `new` if the cell still holds `current`; on failure returns
    /// the winning value.
    pub fn compare_exchange(&self, current: T, new: T) -> Result<T, T> {
        self.word
            .compare_exchange(
                current.into_word(),
                new.into_word(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(T::from_word)
            .map_err(T::from_word)
    }
}

impl AtomicCell<u64> {
    /// Atomically ors `bits` into the cell, returning the previous word.
    pub fn fetch_or(&self, bits: u64) -> u64 {
        self.word.fetch_or(bits, Ordering::Relaxed)
    }
}

struct RootSnapshot<const CELLS: usize> {
    root: *mut Node<CELLS>,
    levels: u32,
    offset: u64,
    version: u64,
}

struct FirstSnapshot<const CELLS: usize> {
    node: *mut Node<CELLS>,
    offset: u64,
    version: u64,
}

/// A sparse array mapping 64-bit indices to values of `T`, where `T`'s
/// [`EMPTY`](SparseValue::EMPTY) marks absence. `CELLS` is the tree degree
/// and must be a power of two.
pub struct SparseArray<T: SparseValue, const CELLS: usize = 64> {
    /// Root pointer word; odd values are transient versions during updates.
    root: AtomicU64,
    levels: AtomicU32,
    offset: AtomicU64,
    /// Leftmost leaf pointer word; same version-in-word protocol as `root`.
    first: AtomicU64,
    first_offset: AtomicU64,
    _values: PhantomData<T>,
}

// The cell words are plain data; cross-thread usability of decoded values is
// promised by the SparseValue implementation.
unsafe impl<T: SparseValue, const CELLS: usize> Send for SparseArray<T, CELLS> {}
unsafe impl<T: SparseValue, const CELLS: usize> Sync for SparseArray<T, CELLS> {}

impl<T: SparseValue, const CELLS: usize> Default for SparseArray<T, CELLS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SparseValue, const CELLS: usize> SparseArray<T, CELLS> {
    const MAX_LEVELS: u32 = 64 / bits_per_level::<CELLS>() + 1;

    /// Creates an empty array.
    #[must_use]
    pub fn new() -> Self {
        const {
            assert!(CELLS.is_power_of_two() && CELLS > 1, "degree must be a power of two");
        };
        Self {
            root: AtomicU64::new(0),
            levels: AtomicU32::new(0),
            offset: AtomicU64::new(0),
            first: AtomicU64::new(0),
            first_offset: AtomicU64::new(u64::MAX),
            _values: PhantomData,
        }
    }

    /// Whether no index holds a non-default value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.load(Ordering::Acquire) == 0
    }

    /// The number of non-default entries, counted by walking.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut n = 0;
        let mut cur = self.begin_cursor();
        while cur.item().is_some() {
            n += 1;
            cur.advance();
        }
        n
    }

    /// Bytes used by the node structure (including this header).
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        fn walk<const CELLS: usize>(node: *const Node<CELLS>, level: u32) -> usize {
            if node.is_null() {
                return 0;
            }
            let mut res = std::mem::size_of::<Node<CELLS>>();
            if level > 0 {
                for i in 0..CELLS {
                    let child =
                        unsafe { (*node).cells[i].load(Ordering::Relaxed) } as *const Node<CELLS>;
                    res += walk(child, level - 1);
                }
            }
            res
        }

        let info = self.root_info();
        std::mem::size_of::<Self>() + walk(info.root, info.levels)
    }

    // ---- optimistic root / first snapshots ----

    fn root_info(&self) -> RootSnapshot<CELLS> {
        loop {
            let mut version;
            loop {
                version = self.root.load(Ordering::Acquire);
                if version & 1 == 0 {
                    break;
                }
                std::hint::spin_loop();
            }
            let levels = self.levels.load(Ordering::Acquire);
            let offset = self.offset.load(Ordering::Acquire);
            if self.root.load(Ordering::Acquire) == version {
                return RootSnapshot {
                    root: version as *mut Node<CELLS>,
                    levels,
                    offset,
                    version,
                };
            }
        }
    }

    fn try_update_root(&self, info: &RootSnapshot<CELLS>) -> bool {
        // park the root word at an odd version while the companions change
        if self
            .root
            .compare_exchange(
                info.version,
                info.version + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return false;
        }
        self.levels.store(info.levels, Ordering::Release);
        self.offset.store(info.offset, Ordering::Release);
        self.root.store(info.root as u64, Ordering::Release);
        true
    }

    fn first_info(&self) -> FirstSnapshot<CELLS> {
        loop {
            let mut version;
            loop {
                version = self.first.load(Ordering::Acquire);
                if version & 1 == 0 {
                    break;
                }
                std::hint::spin_loop();
            }
            let offset = self.first_offset.load(Ordering::Acquire);
            if self.first.load(Ordering::Acquire) == version {
                return FirstSnapshot {
                    node: version as *mut Node<CELLS>,
                    offset,
                    version,
                };
            }
        }
    }

    fn try_update_first(&self, info: &FirstSnapshot<CELLS>) -> bool {
        if self
            .first
            .compare_exchange(
                info.version,
                info.version + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return false;
        }
        self.first_offset.store(info.offset, Ordering::Release);
        self.first.store(info.node as u64, Ordering::Release);
        true
    }

    /// Publishes `(node, offset)` as the new first leaf unless a smaller
    /// offset wins the race first.
    fn publish_first(&self, node: *mut Node<CELLS>, offset: u64) {
        let mut info = self.first_info();
        while offset < info.offset {
            info.node = node;
            info.offset = offset;
            if self.try_update_first(&info) {
                break;
            }
            info = self.first_info();
        }
    }

    fn in_window(i: u64, levels: u32, offset: u64) -> bool {
        (i & level_mask::<CELLS>(levels + 1)) == offset
    }

    // ---- mutation ----

    /// Navigates to the leaf cell for index `i`, creating the path on demand.
    fn leaf_cell(&self, i: u64, ctxt: &mut OpContext<CELLS>) -> &AtomicU64 {
        let mask = index_mask::<CELLS>();

        if !ctxt.last_node.is_null() && ctxt.last_index == (i & !mask) {
            return unsafe { &(*ctxt.last_node).cells[(i & mask) as usize] };
        }

        let mut info = self.root_info();

        if info.root.is_null() {
            // install the initial leaf
            let fresh = new_node::<CELLS>();
            info.root = fresh;
            info.offset = i & !mask;
            if self.try_update_root(&info) {
                self.publish_first(info.root, info.offset);
                ctxt.last_index = i & !mask;
                ctxt.last_node = info.root;
                return unsafe { &(*info.root).cells[(i & mask) as usize] };
            }

            // somebody else installed a root first
            unsafe { drop(Box::from_raw(fresh)) };
            info = self.root_info();
            debug_assert!(!info.root.is_null());
        }

        while !Self::in_window(i, info.levels, info.offset) {
            self.raise_level_shared(info);
            info = self.root_info();
        }

        let mut node = info.root;
        let mut level = info.levels;
        while level != 0 {
            let x = index_at::<CELLS>(i, level) as usize;
            level -= 1;

            let slot = unsafe { &(*node).cells[x] };
            let mut next = slot.load(Ordering::Acquire) as *mut Node<CELLS>;
            if next.is_null() {
                let fresh = new_node::<CELLS>();
                unsafe { (*fresh).parent.store(node, Ordering::Relaxed) };

                match slot.compare_exchange(
                    0,
                    fresh as u64,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        next = fresh;
                        if level == 0 {
                            // fresh leftmost leaf?
                            let off = i & !mask;
                            if off < self.first_offset.load(Ordering::Relaxed) {
                                self.publish_first(next, off);
                            }
                        }
                    }
                    Err(winner) => {
                        // lost the install race; adopt the winner
                        unsafe { drop(Box::from_raw(fresh)) };
                        next = winner as *mut Node<CELLS>;
                    }
                }
            }

            node = next;
        }

        ctxt.last_index = i & !mask;
        ctxt.last_node = node;
        unsafe { &(*node).cells[(i & mask) as usize] }
    }

    /// Grows the tree by one level based on a root snapshot; concurrent
    /// growers race on the snapshot version and losers discard their node.
    fn raise_level_shared(&self, mut info: RootSnapshot<CELLS>) {
        assert!(info.levels < Self::MAX_LEVELS, "index domain exhausted");

        let new_root = new_node::<CELLS>();
        let x = index_at::<CELLS>(info.offset, info.levels + 1) as usize;
        unsafe { (*new_root).cells[x].store(info.root as u64, Ordering::Relaxed) };

        let old_root = info.root;
        info.root = new_root;
        info.levels += 1;
        info.offset &= level_mask::<CELLS>(info.levels + 1);

        if self.try_update_root(&info) {
            if !old_root.is_null() {
                unsafe { (*old_root).parent.store(new_root, Ordering::Release) };
            }
        } else {
            unsafe { drop(Box::from_raw(new_root)) };
        }
    }

    /// Sequential level raise for merge paths that own the array.
    fn raise_level(&mut self) {
        let levels = self.levels.load(Ordering::Relaxed);
        assert!(levels < Self::MAX_LEVELS, "index domain exhausted");

        let root = self.root.load(Ordering::Relaxed) as *mut Node<CELLS>;
        let offset = self.offset.load(Ordering::Relaxed);

        let new_root = new_node::<CELLS>();
        let x = index_at::<CELLS>(offset, levels + 1) as usize;
        unsafe {
            (*new_root).cells[x].store(root as u64, Ordering::Relaxed);
            (*root).parent.store(new_root, Ordering::Relaxed);
        }

        self.root.store(new_root as u64, Ordering::Relaxed);
        self.levels.store(levels + 1, Ordering::Relaxed);
        self.offset
            .store(offset & level_mask::<CELLS>(levels + 2), Ordering::Relaxed);
    }

    /// A typed handle to the (lazily created) cell for index `i`.
    pub fn get_atomic(&self, i: u64, ctxt: &mut OpContext<CELLS>) -> &AtomicCell<T> {
        let cell = self.leaf_cell(i, ctxt);
        unsafe { &*ptr::from_ref(cell).cast::<AtomicCell<T>>() }
    }

    /// Stores `value` at index `i`, creating the cell on demand.
    pub fn update(&self, i: u64, value: T, ctxt: &mut OpContext<CELLS>) {
        self.get_atomic(i, ctxt).store(value);
    }

    // ---- lookup ----

    /// The value at index `i`, or the default; never allocates.
    #[must_use]
    pub fn lookup(&self, i: u64, ctxt: &mut OpContext<CELLS>) -> T {
        let mask = index_mask::<CELLS>();

        let info = self.root_info();
        if info.root.is_null() || !Self::in_window(i, info.levels, info.offset) {
            return T::EMPTY;
        }

        if !ctxt.last_node.is_null() && ctxt.last_index == (i & !mask) {
            let word = unsafe { (*ctxt.last_node).cells[(i & mask) as usize].load(Ordering::Acquire) };
            return T::from_word(word);
        }

        let mut node = info.root;
        let mut level = info.levels;
        while level != 0 {
            let x = index_at::<CELLS>(i, level) as usize;
            level -= 1;
            let next = unsafe { (*node).cells[x].load(Ordering::Acquire) } as *mut Node<CELLS>;
            if next.is_null() {
                return T::EMPTY;
            }
            node = next;
        }

        ctxt.last_index = i & !mask;
        ctxt.last_node = node;
        let word = unsafe { (*node).cells[(i & mask) as usize].load(Ordering::Acquire) };
        T::from_word(word)
    }

    /// `lookup` with a throwaway context.
    #[must_use]
    pub fn get(&self, i: u64) -> T {
        self.lookup(i, &mut OpContext::default())
    }

    // ---- cursors ----

    /// A cursor at the smallest non-default index.
    #[must_use]
    pub fn begin_cursor(&self) -> SparseArrayCursor<T, CELLS> {
        let info = self.first_info();
        SparseArrayCursor::at_leaf(info.node, info.offset)
    }

    /// The end cursor.
    #[must_use]
    pub fn end_cursor() -> SparseArrayCursor<T, CELLS> {
        SparseArrayCursor::end()
    }

    /// A cursor at index `i` if it holds a non-default value, end otherwise.
    #[must_use]
    pub fn find(
        &self,
        i: u64,
        ctxt: &mut OpContext<CELLS>,
    ) -> SparseArrayCursor<T, CELLS> {
        let mask = index_mask::<CELLS>();

        let info = self.root_info();
        if info.root.is_null() || !Self::in_window(i, info.levels, info.offset) {
            return SparseArrayCursor::end();
        }

        if !ctxt.last_node.is_null() && ctxt.last_index == (i & !mask) {
            let node = ctxt.last_node;
            let word = unsafe { (*node).cells[(i & mask) as usize].load(Ordering::Acquire) };
            if word == 0 {
                return SparseArrayCursor::end();
            }
            return SparseArrayCursor::at(node, i, T::from_word(word));
        }

        let mut node = info.root;
        let mut level = info.levels;
        while level != 0 {
            let x = index_at::<CELLS>(i, level) as usize;
            level -= 1;
            let next = unsafe { (*node).cells[x].load(Ordering::Acquire) } as *mut Node<CELLS>;
            if next.is_null() {
                return SparseArrayCursor::end();
            }
            node = next;
        }

        ctxt.last_index = i & !mask;
        ctxt.last_node = node;

        let word = unsafe { (*node).cells[(i & mask) as usize].load(Ordering::Acquire) };
        if word == 0 {
            return SparseArrayCursor::end();
        }
        SparseArrayCursor::at(node, i, T::from_word(word))
    }

    /// A cursor at the smallest non-default index `>= i`.
    #[must_use]
    pub fn lower_bound(&self, i: u64) -> SparseArrayCursor<T, CELLS> {
        let info = self.root_info();
        if info.root.is_null() {
            return SparseArrayCursor::end();
        }

        if !Self::in_window(i, info.levels, info.offset) {
            // below the window the first element wins; above it nothing does
            if i < info.offset {
                return self.begin_cursor();
            }
            return SparseArrayCursor::end();
        }

        let mut i = i;
        let mut node: *const Node<CELLS> = info.root;
        let mut level = info.levels;
        loop {
            let mut x = index_at::<CELLS>(i, level) as usize;
            let word = unsafe { (*node).cells[x].load(Ordering::Acquire) };
            if word == 0 {
                // climb while this level's field is already the last cell,
                // so the increment below cannot carry across fields
                while x == CELLS - 1 {
                    level += 1;
                    node = unsafe { (*node).parent.load(Ordering::Acquire) };
                    if node.is_null() {
                        return SparseArrayCursor::end();
                    }
                    x = index_at::<CELLS>(i, level) as usize;
                }

                // round up to the start of the next sibling's span
                i &= level_mask::<CELLS>(level);
                let step = level * bits_per_level::<CELLS>();
                if step >= 64 {
                    return SparseArrayCursor::end();
                }
                i += 1u64 << step;
            } else if level == 0 {
                return SparseArrayCursor::at(node, i, T::from_word(word));
            } else {
                level -= 1;
                node = word as *const Node<CELLS>;
            }
        }
    }

    /// A cursor at the smallest non-default index `> i`.
    #[must_use]
    pub fn upper_bound(&self, i: u64) -> SparseArrayCursor<T, CELLS> {
        if i == u64::MAX {
            return SparseArrayCursor::end();
        }
        self.lower_bound(i + 1)
    }

    // ---- structural copy / merge ----

    unsafe fn clone_node<Cp: Fn(T) -> T + Copy>(
        node: *const Node<CELLS>,
        level: u32,
        copy: Cp,
    ) -> *mut Node<CELLS> {
        let res = new_node::<CELLS>();
        if level == 0 {
            for i in 0..CELLS {
                let value = T::from_word((*node).cells[i].load(Ordering::Relaxed));
                (*res).cells[i].store(copy(value).into_word(), Ordering::Relaxed);
            }
            return res;
        }
        for i in 0..CELLS {
            let child = (*node).cells[i].load(Ordering::Relaxed) as *const Node<CELLS>;
            if !child.is_null() {
                let cloned = Self::clone_node(child, level - 1, copy);
                (*cloned).parent.store(res, Ordering::Relaxed);
                (*res).cells[i].store(cloned as u64, Ordering::Relaxed);
            }
        }
        res
    }

    unsafe fn find_first(mut node: *mut Node<CELLS>, mut level: u32) -> *mut Node<CELLS> {
        while level > 0 {
            let mut stepped = false;
            for i in 0..CELLS {
                let child = (*node).cells[i].load(Ordering::Relaxed) as *mut Node<CELLS>;
                if !child.is_null() {
                    node = child;
                    level -= 1;
                    stepped = true;
                    break;
                }
            }
            assert!(stepped, "inner node without children");
        }
        node
    }

    /// A deep copy applying `copy` to every stored value.
    #[must_use]
    pub fn clone_with<Cp: Fn(T) -> T + Copy>(&self, copy: Cp) -> Self {
        let info = self.root_info();
        if info.root.is_null() {
            return Self::new();
        }

        let root = unsafe { Self::clone_node(info.root, info.levels, copy) };
        let first = unsafe { Self::find_first(root, info.levels) };

        Self {
            root: AtomicU64::new(root as u64),
            levels: AtomicU32::new(info.levels),
            offset: AtomicU64::new(info.offset),
            first: AtomicU64::new(first as u64),
            first_offset: AtomicU64::new(self.first_offset.load(Ordering::Relaxed)),
            _values: PhantomData,
        }
    }

    unsafe fn merge_nodes<M, Cp>(
        trg: *mut Node<CELLS>,
        src: *const Node<CELLS>,
        level: u32,
        merge: M,
        copy: Cp,
    ) where
        M: Fn(T, T) -> T + Copy,
        Cp: Fn(T) -> T + Copy,
    {
        if level == 0 {
            for i in 0..CELLS {
                let a = T::from_word((*trg).cells[i].load(Ordering::Relaxed));
                let b = T::from_word((*src).cells[i].load(Ordering::Relaxed));
                (*trg).cells[i].store(merge(a, b).into_word(), Ordering::Relaxed);
            }
            return;
        }

        for i in 0..CELLS {
            let s = (*src).cells[i].load(Ordering::Relaxed) as *const Node<CELLS>;
            if s.is_null() {
                continue;
            }
            let t = (*trg).cells[i].load(Ordering::Relaxed) as *mut Node<CELLS>;
            if t.is_null() {
                let cloned = Self::clone_node(s, level - 1, copy);
                (*cloned).parent.store(trg, Ordering::Relaxed);
                (*trg).cells[i].store(cloned as u64, Ordering::Relaxed);
            } else {
                Self::merge_nodes(t, s, level - 1, merge, copy);
            }
        }
    }

    /// Union-merges `other` into this array. `merge` combines two non-default
    /// values sharing an index; `copy` deep-copies values cloned in from
    /// branches this array did not cover.
    pub fn add_all_with<M, Cp>(&mut self, other: &Self, merge: M, copy: Cp)
    where
        M: Fn(T, T) -> T + Copy,
        Cp: Fn(T) -> T + Copy,
    {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other.clone_with(copy);
            return;
        }

        let other_info = other.root_info();

        while self.levels.load(Ordering::Relaxed) < other_info.levels
            || !Self::in_window(
                other_info.offset,
                self.levels.load(Ordering::Relaxed),
                self.offset.load(Ordering::Relaxed),
            )
        {
            self.raise_level();
        }

        // descend to this array's anchor of the other root's window
        let mut level = self.levels.load(Ordering::Relaxed);
        let mut node = self.root.load(Ordering::Relaxed) as *mut Node<CELLS>;
        while level > other_info.levels {
            let x = index_at::<CELLS>(other_info.offset, level) as usize;
            level -= 1;
            unsafe {
                let slot = &(*node).cells[x];
                let mut next = slot.load(Ordering::Relaxed) as *mut Node<CELLS>;
                if next.is_null() {
                    next = new_node::<CELLS>();
                    (*next).parent.store(node, Ordering::Relaxed);
                    slot.store(next as u64, Ordering::Relaxed);
                }
                node = next;
            }
        }

        unsafe { Self::merge_nodes(node, other_info.root, level, merge, copy) };

        let other_first = other.first_offset.load(Ordering::Relaxed);
        if self.first_offset.load(Ordering::Relaxed) > other_first {
            let first = unsafe { Self::find_first(node, level) };
            self.first.store(first as u64, Ordering::Relaxed);
            self.first_offset.store(other_first, Ordering::Relaxed);
        }
    }

    /// Drops every node, applying `release` to each stored value first (used
    /// by owners of pointer values).
    pub fn clear_with<F: FnMut(T)>(&mut self, mut release: F) {
        let mut cur = self.begin_cursor();
        while let Some((_, value)) = cur.item() {
            release(value);
            cur.advance();
        }
        self.clear();
    }

    /// Resets the array to empty.
    pub fn clear(&mut self) {
        let root = self.root.load(Ordering::Relaxed) as *mut Node<CELLS>;
        unsafe { free_nodes(root, self.levels.load(Ordering::Relaxed)) };
        self.root.store(0, Ordering::Relaxed);
        self.levels.store(0, Ordering::Relaxed);
        self.offset.store(0, Ordering::Relaxed);
        self.first.store(0, Ordering::Relaxed);
        self.first_offset.store(u64::MAX, Ordering::Relaxed);
    }
}

impl<T: SparseValue, const CELLS: usize> Drop for SparseArray<T, CELLS> {
    fn drop(&mut self) {
        let root = self.root.load(Ordering::Relaxed) as *mut Node<CELLS>;
        unsafe { free_nodes(root, self.levels.load(Ordering::Relaxed)) };
    }
}

/// A cursor over the non-default entries of a [`SparseArray`], in increasing
/// index order. Yields `(index, value)` pairs.
pub struct SparseArrayCursor<T, const CELLS: usize> {
    node: *const Node<CELLS>,
    index: u64,
    value: T,
}

// Cursors only read through their node pointer.
unsafe impl<T: SparseValue + Send, const CELLS: usize> Send for SparseArrayCursor<T, CELLS> {}
unsafe impl<T: SparseValue + Sync, const CELLS: usize> Sync for SparseArrayCursor<T, CELLS> {}

impl<T: SparseValue, const CELLS: usize> Clone for SparseArrayCursor<T, CELLS> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: SparseValue, const CELLS: usize> Copy for SparseArrayCursor<T, CELLS> {}

impl<T: SparseValue, const CELLS: usize> PartialEq for SparseArrayCursor<T, CELLS> {
    fn eq(&self, other: &Self) -> bool {
        // all end states are equivalent
        (self.node.is_null() && other.node.is_null())
            || (self.node == other.node && self.index == other.index)
    }
}

impl<T: SparseValue, const CELLS: usize> SparseArrayCursor<T, CELLS> {
    pub(crate) fn end() -> Self {
        Self {
            node: ptr::null(),
            index: 0,
            value: T::EMPTY,
        }
    }

    fn at(node: *const Node<CELLS>, index: u64, value: T) -> Self {
        Self { node, index, value }
    }

    /// Positions at the first non-default cell of the given leaf (or later).
    fn at_leaf(node: *const Node<CELLS>, offset: u64) -> Self {
        if node.is_null() {
            return Self::end();
        }
        let word = unsafe { (*node).cells[0].load(Ordering::Acquire) };
        let mut cur = Self {
            node,
            index: offset,
            value: T::from_word(word),
        };
        if word == 0 {
            cur.advance();
        }
        cur
    }

    /// The index this cursor points at, if not at the end.
    #[must_use]
    pub fn index(&self) -> Option<u64> {
        if self.node.is_null() {
            None
        } else {
            Some(self.index)
        }
    }
}

impl<T: SparseValue, const CELLS: usize> Cursor for SparseArrayCursor<T, CELLS> {
    type Item = (u64, T);

    fn item(&self) -> Option<Self::Item> {
        if self.node.is_null() {
            None
        } else {
            Some((self.index, self.value))
        }
    }

    fn advance(&mut self) {
        if self.node.is_null() {
            return;
        }
        let mask = index_mask::<CELLS>();
        let bits = bits_per_level::<CELLS>();

        // next non-default cell of the current leaf
        let mut x = (self.index & mask) + 1;
        unsafe {
            while x < CELLS as u64 && (*self.node).cells[x as usize].load(Ordering::Acquire) == 0 {
                x += 1;
            }
            if x < CELLS as u64 {
                self.index = (self.index & !mask) | x;
                self.value =
                    T::from_word((*self.node).cells[x as usize].load(Ordering::Acquire));
                return;
            }

            // leaf exhausted: climb until a later sibling branch exists
            let mut node = (*self.node).parent.load(Ordering::Acquire) as *const Node<CELLS>;
            let mut level: u32 = 1;
            let mut x = index_at::<CELLS>(self.index, level) + 1;

            while level > 0 && !node.is_null() {
                while x < CELLS as u64
                    && (*node).cells[x as usize].load(Ordering::Acquire) == 0
                {
                    x += 1;
                }

                if x < CELLS as u64 {
                    // descend into the found branch
                    let child =
                        (*node).cells[x as usize].load(Ordering::Acquire) as *const Node<CELLS>;
                    self.index &= level_mask::<CELLS>(level + 1);
                    self.index |= x << (bits * level);
                    node = child;
                    level -= 1;
                    x = 0;
                } else {
                    node = (*node).parent.load(Ordering::Acquire);
                    level += 1;
                    x = index_at::<CELLS>(self.index, level) + 1;
                }
            }

            if node.is_null() {
                self.node = ptr::null();
                return;
            }

            // leftmost value of the reached leaf
            let mut x = 0u64;
            while (*node).cells[x as usize].load(Ordering::Acquire) == 0 {
                x += 1;
            }
            self.index |= x;
            self.value = T::from_word((*node).cells[x as usize].load(Ordering::Acquire));
            self.node = node;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::Cursor as _;

    fn collect(arr: &SparseArray<u64>) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        let mut cur = arr.begin_cursor();
        while let Some(pair) = cur.item() {
            out.push(pair);
            cur.advance();
        }
        out
    }

    #[test]
    fn absent_indices_read_default() {
        let arr = SparseArray::<u64>::new();
        assert!(arr.is_empty());
        assert_eq!(arr.get(0), 0);
        assert_eq!(arr.get(123_456), 0);
    }

    #[test]
    fn stores_and_reads_back() {
        let arr = SparseArray::<u64>::new();
        let mut ctxt = OpContext::default();
        arr.update(10, 7, &mut ctxt);
        arr.update(12, 9, &mut ctxt);
        assert_eq!(arr.get(10), 7);
        assert_eq!(arr.get(12), 9);
        assert_eq!(arr.get(11), 0);
        assert_eq!(arr.len(), 2);
    }

    #[test]
    fn grows_across_windows() {
        let arr = SparseArray::<u64>::new();
        let mut ctxt = OpContext::default();
        arr.update(5, 1, &mut ctxt);
        arr.update(1 << 20, 2, &mut ctxt);
        arr.update(1 << 40, 3, &mut ctxt);
        assert_eq!(arr.get(5), 1);
        assert_eq!(arr.get(1 << 20), 2);
        assert_eq!(arr.get(1 << 40), 3);
        assert_eq!(collect(&arr), vec![(5, 1), (1 << 20, 2), (1 << 40, 3)]);
    }

    #[test]
    fn iterates_in_index_order() {
        let arr = SparseArray::<u64>::new();
        let mut ctxt = OpContext::default();
        let indices = [900u64, 3, 64, 65, 4096, 70_000];
        for &i in &indices {
            arr.update(i, i + 1, &mut ctxt);
        }
        let mut expected: Vec<_> = indices.iter().map(|&i| (i, i + 1)).collect();
        expected.sort_unstable();
        assert_eq!(collect(&arr), expected);
    }

    #[test]
    fn first_leaf_tracks_smaller_offsets() {
        let arr = SparseArray::<u64>::new();
        let mut ctxt = OpContext::default();
        arr.update(100_000, 1, &mut ctxt);
        arr.update(3, 2, &mut ctxt);
        assert_eq!(collect(&arr)[0], (3, 2));
    }

    #[test]
    fn lower_bound_finds_next_entry() {
        let arr = SparseArray::<u64>::new();
        let mut ctxt = OpContext::default();
        for &i in &[10u64, 200, 4096] {
            arr.update(i, i, &mut ctxt);
        }
        assert_eq!(arr.lower_bound(0).index(), Some(10));
        assert_eq!(arr.lower_bound(10).index(), Some(10));
        assert_eq!(arr.lower_bound(11).index(), Some(200));
        assert_eq!(arr.lower_bound(201).index(), Some(4096));
        assert_eq!(arr.lower_bound(4097).index(), None);
        assert_eq!(arr.upper_bound(10).index(), Some(200));
        assert_eq!(arr.upper_bound(4096).index(), None);
    }

    #[test]
    fn find_hits_only_present_entries() {
        let arr = SparseArray::<u64>::new();
        let mut ctxt = OpContext::default();
        arr.update(42, 5, &mut ctxt);
        let mut find_ctxt = OpContext::default();
        assert_eq!(arr.find(42, &mut find_ctxt).item(), Some((42, 5)));
        assert_eq!(arr.find(43, &mut find_ctxt).item(), None);
    }

    #[test]
    fn merge_is_union() {
        let mut a = SparseArray::<u64>::new();
        let b = SparseArray::<u64>::new();
        let mut ctxt = OpContext::default();
        a.update(1, 0b01, &mut ctxt);
        a.update(1000, 0b10, &mut ctxt);
        b.update(1, 0b10, &mut ctxt);
        b.update(1 << 30, 0b11, &mut ctxt);

        a.add_all_with(&b, |x, y| x | y, |v| v);
        assert_eq!(a.get(1), 0b11);
        assert_eq!(a.get(1000), 0b10);
        assert_eq!(a.get(1 << 30), 0b11);
    }

    #[test]
    fn clone_with_is_deep() {
        let arr = SparseArray::<u64>::new();
        let mut ctxt = OpContext::default();
        arr.update(7, 3, &mut ctxt);
        arr.update(1 << 16, 4, &mut ctxt);

        let copy = arr.clone_with(|v| v);
        assert_eq!(collect(&copy), collect(&arr));
    }

    #[test]
    fn concurrent_updates_union() {
        let arr = SparseArray::<u64>::new();
        std::thread::scope(|s| {
            for t in 0..4u64 {
                let arr = &arr;
                s.spawn(move || {
                    let mut ctxt = OpContext::default();
                    for i in 0..5_000u64 {
                        let idx = t * 5_000 + i;
                        arr.get_atomic(idx, &mut ctxt).store(idx + 1);
                    }
                });
            }
        });
        assert_eq!(arr.len(), 20_000);
        for idx in [0u64, 4_999, 5_000, 19_999] {
            assert_eq!(arr.get(idx), idx + 1);
        }
    }
}
