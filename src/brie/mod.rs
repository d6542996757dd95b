// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

#![allow(unsafe_code)]

//! The Brie: a trie over fixed-arity integer tuples.
//!
//! Each trie level indexes one tuple dimension. Inner levels are
//! [`SparseArray`]s whose values point at the next-level trie; the last
//! dimension is a [`SparseBitMap`], so a stored tuple is a chain of child
//! pointers ending in a set bit. Levels exist only while populated, which
//! keeps the structure dense for the clustered key spaces Datalog evaluation
//! produces.
//!
//! Concurrent inserts are supported (nested levels are installed with a
//! compare-and-swap, losers adopt the winner); reads may not overlap
//! writers. Iteration is lexicographic in the tuple dimensions.

mod bitmap;
mod sparse_array;

pub use bitmap::{BitMapContext, BitMapCursor, SparseBitMap};
pub use sparse_array::{AtomicCell, OpContext, SparseArray, SparseArrayCursor, SparseValue};

use std::ptr;

use crate::domain::{RamDomain, Tuple};
use crate::range::{Cursor, Range};
use crate::sync::AccessCounter;

/// Degree of the inner-level sparse arrays.
const TRIE_CELLS: usize = 64;

/// Tuple components address sparse structures through their sign-extended
/// bit pattern; negative components sort after the non-negative ones.
fn to_index(v: RamDomain) -> u64 {
    v as u64
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn from_index(i: u64) -> RamDomain {
    i as RamDomain
}

/// A pointer to a nested trie level, stored as a sparse-array value.
#[derive(Clone, Copy, PartialEq, Eq)]
struct LevelPtr(*mut Level);

unsafe impl SparseValue for LevelPtr {
    const EMPTY: Self = Self(ptr::null_mut());

    fn into_word(self) -> u64 {
        self.0 as u64
    }

    fn from_word(word: u64) -> Self {
        Self(word as *mut Level)
    }
}

unsafe fn clone_level(p: LevelPtr) -> LevelPtr {
    if p.0.is_null() {
        p
    } else {
        LevelPtr(Box::into_raw(Box::new((*p.0).clone())))
    }
}

/// One level of the trie; the structure implies the remaining depth.
enum Level {
    /// The last dimension.
    Leaf(SparseBitMap),
    /// One of the leading dimensions; values point at the next level down.
    Inner(SparseArray<LevelPtr, TRIE_CELLS>),
}

impl Level {
    fn new(dims: usize) -> Self {
        debug_assert!(dims >= 1);
        if dims == 1 {
            Self::Leaf(SparseBitMap::new())
        } else {
            Self::Inner(SparseArray::new())
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Leaf(map) => map.is_empty(),
            Self::Inner(store) => store.is_empty(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Leaf(map) => map.len(),
            Self::Inner(store) => {
                let mut res = 0;
                let mut cur = store.begin_cursor();
                while let Some((_, child)) = cur.item() {
                    res += unsafe { (*child.0).len() };
                    cur.advance();
                }
                res
            }
        }
    }

    fn memory_usage(&self) -> usize {
        match self {
            Self::Leaf(map) => map.memory_usage(),
            Self::Inner(store) => {
                let mut res = store.memory_usage();
                let mut cur = store.begin_cursor();
                while let Some((_, child)) = cur.item() {
                    res += unsafe { (*child.0).memory_usage() };
                    cur.advance();
                }
                res
            }
        }
    }

    /// Inserts the remaining tuple components. `inner` and `leaf` are the
    /// per-dimension operation contexts below this level.
    fn insert(
        &self,
        tuple: &[RamDomain],
        inner: &mut [LevelContext],
        leaf: &mut BitMapContext,
    ) -> (bool, bool) {
        match self {
            Self::Leaf(map) => {
                debug_assert_eq!(tuple.len(), 1);
                (map.set(to_index(tuple[0]), leaf), false)
            }
            Self::Inner(store) => {
                let (ctxt, rest) = inner
                    .split_first_mut()
                    .expect("context shallower than trie");

                // hint: the last insert's child handles a matching prefix
                if !ctxt.last_nested.is_null() && ctxt.last_query == tuple[0] {
                    let nested = unsafe { &*ctxt.last_nested };
                    let (added, _) = nested.insert(&tuple[1..], rest, leaf);
                    return (added, true);
                }

                let cell = store.get_atomic(to_index(tuple[0]), &mut ctxt.local);
                let mut next = cell.load();
                if next.0.is_null() {
                    // lock-free lazy creation of the nested level
                    let fresh = Box::into_raw(Box::new(Self::new(tuple.len() - 1)));
                    match cell.compare_exchange(LevelPtr::EMPTY, LevelPtr(fresh)) {
                        Ok(_) => next = LevelPtr(fresh),
                        Err(winner) => {
                            unsafe { drop(Box::from_raw(fresh)) };
                            next = winner;
                        }
                    }
                }
                debug_assert!(!next.0.is_null());

                if next.0 != ctxt.last_nested {
                    ctxt.last_query = tuple[0];
                    ctxt.last_nested = next.0;
                    for c in rest.iter_mut() {
                        c.reset();
                    }
                    *leaf = BitMapContext::default();
                }

                let (added, _) = unsafe { (*next.0).insert(&tuple[1..], rest, leaf) };
                (added, false)
            }
        }
    }

    fn contains(
        &self,
        tuple: &[RamDomain],
        inner: &mut [LevelContext],
        leaf: &mut BitMapContext,
    ) -> (bool, bool) {
        match self {
            Self::Leaf(map) => (map.test(to_index(tuple[0]), leaf), false),
            Self::Inner(store) => {
                let (ctxt, rest) = inner
                    .split_first_mut()
                    .expect("context shallower than trie");

                if !ctxt.last_nested.is_null() && ctxt.last_query == tuple[0] {
                    let nested = unsafe { &*ctxt.last_nested };
                    let (found, _) = nested.contains(&tuple[1..], rest, leaf);
                    return (found, true);
                }

                let next = store.lookup(to_index(tuple[0]), &mut ctxt.local);
                if next.0 != ctxt.last_nested {
                    ctxt.last_query = tuple[0];
                    ctxt.last_nested = next.0;
                    for c in rest.iter_mut() {
                        c.reset();
                    }
                    *leaf = BitMapContext::default();
                }

                if next.0.is_null() {
                    return (false, false);
                }
                let (found, _) = unsafe { (*next.0).contains(&tuple[1..], rest, leaf) };
                (found, false)
            }
        }
    }

    /// Union-merges `other` into this level.
    fn insert_all(&mut self, other: &Self) {
        match (self, other) {
            (Self::Leaf(a), Self::Leaf(b)) => a.add_all(b),
            (Self::Inner(a), Self::Inner(b)) => {
                a.add_all_with(
                    b,
                    |x, y| {
                        if y.0.is_null() {
                            x
                        } else if x.0.is_null() {
                            unsafe { clone_level(y) }
                        } else {
                            unsafe { (*x.0).insert_all(&*y.0) };
                            x
                        }
                    },
                    |p| unsafe { clone_level(p) },
                );
            }
            _ => unreachable!("merging tries of different arity"),
        }
    }

    fn clear(&mut self) {
        match self {
            Self::Leaf(map) => map.clear(),
            Self::Inner(store) => {
                store.clear_with(|p| {
                    if !p.0.is_null() {
                        unsafe { drop(Box::from_raw(p.0)) };
                    }
                });
            }
        }
    }
}

impl Clone for Level {
    fn clone(&self) -> Self {
        match self {
            Self::Leaf(map) => Self::Leaf(map.clone()),
            Self::Inner(store) => Self::Inner(store.clone_with(|p| unsafe { clone_level(p) })),
        }
    }
}

impl Drop for Level {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Per-inner-dimension slice of a [`TrieContext`].
#[derive(Debug)]
struct LevelContext {
    local: OpContext<TRIE_CELLS>,
    last_query: RamDomain,
    last_nested: *mut Level,
}

impl Default for LevelContext {
    fn default() -> Self {
        Self {
            local: OpContext::default(),
            last_query: 0,
            last_nested: ptr::null_mut(),
        }
    }
}

impl LevelContext {
    fn reset(&mut self) {
        self.local.clear();
        self.last_nested = ptr::null_mut();
    }
}

/// A caller-owned operation context for a [`Trie`], caching the nested level
/// the last operation descended into and the last boundary query's range.
pub struct TrieContext<const ARITY: usize> {
    inner: [LevelContext; ARITY],
    leaf: BitMapContext,
    boundary_levels: usize,
    boundary_request: Tuple<ARITY>,
    boundary: Option<(TrieCursor<ARITY>, TrieCursor<ARITY>)>,
}

impl<const ARITY: usize> Default for TrieContext<ARITY> {
    fn default() -> Self {
        Self {
            inner: std::array::from_fn(|_| LevelContext::default()),
            leaf: BitMapContext::default(),
            boundary_levels: usize::MAX,
            boundary_request: [0; ARITY],
            boundary: None,
        }
    }
}

impl<const ARITY: usize> TrieContext<ARITY> {
    /// Forgets all cached locations.
    pub fn clear(&mut self) {
        for c in &mut self.inner {
            c.reset();
        }
        self.leaf = BitMapContext::default();
        self.boundary_levels = usize::MAX;
        self.boundary = None;
    }
}

/// A set of arity-`ARITY` tuples stored as a trie of sparse arrays ending in
/// a sparse bit-map.
pub struct Trie<const ARITY: usize> {
    root: Level,
    insert_stats: AccessCounter,
    contains_stats: AccessCounter,
    boundary_stats: AccessCounter,
}

// Nested levels are reached only through this root; the sparse substrates
// are already Sync, and &mut methods have exclusive access.
unsafe impl<const ARITY: usize> Send for Trie<ARITY> {}
unsafe impl<const ARITY: usize> Sync for Trie<ARITY> {}

impl<const ARITY: usize> Default for Trie<ARITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const ARITY: usize> Clone for Trie<ARITY> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            insert_stats: AccessCounter::default(),
            contains_stats: AccessCounter::default(),
            boundary_stats: AccessCounter::default(),
        }
    }
}

impl<const ARITY: usize> Trie<ARITY> {
    /// Creates an empty trie.
    #[must_use]
    pub fn new() -> Self {
        const { assert!(ARITY >= 1, "tries store tuples of at least one component") };
        Self {
            root: Level::new(ARITY),
            insert_stats: AccessCounter::default(),
            contains_stats: AccessCounter::default(),
            boundary_stats: AccessCounter::default(),
        }
    }

    /// Whether no tuple is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// The number of stored tuples, counted on demand.
    #[must_use]
    pub fn len(&self) -> usize {
        self.root.len()
    }

    /// Bytes used by this trie.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() - std::mem::size_of::<Level>() + self.root.memory_usage()
    }

    /// Inserts a tuple; returns whether it was newly added.
    pub fn insert(&self, tuple: &Tuple<ARITY>) -> bool {
        self.insert_with(tuple, &mut TrieContext::default())
    }

    /// `insert` with a caller-owned operation context.
    pub fn insert_with(&self, tuple: &Tuple<ARITY>, ctxt: &mut TrieContext<ARITY>) -> bool {
        ctxt.boundary = None;
        ctxt.boundary_levels = usize::MAX;
        let (added, hit) = self.root.insert(tuple, &mut ctxt.inner, &mut ctxt.leaf);
        if hit {
            self.insert_stats.add_hit();
        } else {
            self.insert_stats.add_miss();
        }
        added
    }

    /// Whether the tuple is stored.
    #[must_use]
    pub fn contains(&self, tuple: &Tuple<ARITY>) -> bool {
        self.contains_with(tuple, &mut TrieContext::default())
    }

    /// `contains` with a caller-owned operation context.
    pub fn contains_with(&self, tuple: &Tuple<ARITY>, ctxt: &mut TrieContext<ARITY>) -> bool {
        let (found, hit) = self.root.contains(tuple, &mut ctxt.inner, &mut ctxt.leaf);
        if hit {
            self.contains_stats.add_hit();
        } else {
            self.contains_stats.add_miss();
        }
        found
    }

    /// Inserts every tuple of `other`; considerably cheaper than inserting
    /// them one by one.
    pub fn insert_all(&mut self, other: &Self) {
        self.root.insert_all(&other.root);
    }

    /// Removes all tuples.
    pub fn clear(&mut self) {
        self.root.clear();
    }

    /// The hint hit/miss counters (insert, contains, boundaries).
    #[must_use]
    pub fn hint_stats(&self) -> (&AccessCounter, &AccessCounter, &AccessCounter) {
        (
            &self.insert_stats,
            &self.contains_stats,
            &self.boundary_stats,
        )
    }

    // ---- cursors ----

    fn begin_cursor(&self) -> TrieCursor<ARITY> {
        if self.is_empty() {
            return TrieCursor::end();
        }
        let mut cur = TrieCursor::end();
        cur.descend_first(&self.root, 0);
        cur
    }

    fn end_cursor() -> TrieCursor<ARITY> {
        TrieCursor::end()
    }

    /// An iterator over all tuples in lexicographic order.
    #[must_use]
    pub fn iter(&self) -> crate::range::RangeIter<'_, TrieCursor<ARITY>> {
        self.full_range().into_iter()
    }

    fn full_range(&self) -> Range<'_, TrieCursor<ARITY>> {
        Range::new(self.begin_cursor(), Self::end_cursor())
    }

    /// The range of stored tuples whose first `K` components equal the first
    /// `K` components of `tuple`. `K = 0` spans the whole trie; `K = ARITY`
    /// pins a single tuple.
    #[must_use]
    pub fn boundaries<const K: usize>(&self, tuple: &Tuple<ARITY>) -> Range<'_, TrieCursor<ARITY>> {
        self.boundaries_with::<K>(tuple, &mut TrieContext::default())
    }

    /// `boundaries` with a caller-owned operation context; a repeated query
    /// with the same prefix reuses the cached range.
    #[must_use]
    pub fn boundaries_with<const K: usize>(
        &self,
        tuple: &Tuple<ARITY>,
        ctxt: &mut TrieContext<ARITY>,
    ) -> Range<'_, TrieCursor<ARITY>> {
        const { assert!(K <= ARITY, "prefix longer than the tuple") };

        if K == 0 {
            return self.full_range();
        }

        if ctxt.boundary_levels == K {
            if let Some((begin, end)) = &ctxt.boundary {
                if ctxt.boundary_request[..K] == tuple[..K] {
                    self.boundary_stats.add_hit();
                    return Range::new(begin.clone(), end.clone());
                }
            }
        }
        self.boundary_stats.add_miss();

        let range = self.boundaries_at(tuple, K);
        let (begin, end) = match range {
            Some(pair) => pair,
            None => (TrieCursor::end(), TrieCursor::end()),
        };

        ctxt.boundary_levels = K;
        ctxt.boundary_request = *tuple;
        ctxt.boundary = Some((begin.clone(), end.clone()));
        Range::new(begin, end)
    }

    fn boundaries_at(
        &self,
        tuple: &Tuple<ARITY>,
        k: usize,
    ) -> Option<(TrieCursor<ARITY>, TrieCursor<ARITY>)> {
        let mut begin = TrieCursor::<ARITY>::end();

        // pin the first k dimensions
        let mut level: &Level = &self.root;
        for d in 0..k {
            match level {
                Level::Inner(store) => {
                    let cur = store.find(to_index(tuple[d]), &mut OpContext::default());
                    let (_, child) = cur.item()?;
                    begin.path[d] = cur;
                    begin.tuple[d] = tuple[d];
                    level = unsafe { &*child.0 };
                }
                Level::Leaf(map) => {
                    debug_assert_eq!(d, ARITY - 1);
                    let cur = map.find(to_index(tuple[d]), &mut BitMapContext::default());
                    cur.item()?;
                    begin.leaf = cur;
                    begin.tuple[d] = tuple[d];
                }
            }
        }

        // the unbound tail starts at its smallest entries
        if k < ARITY {
            begin.descend_first(level, k);
        }

        // the end is the first position after the pinned subtree
        let mut end = begin.clone();
        if k == ARITY {
            end.advance();
        } else {
            end.advance_at_depth(k - 1);
        }

        Some((begin, end))
    }

    /// The single-tuple range at `tuple`: one element when it is stored,
    /// empty otherwise.
    #[must_use]
    pub fn find(&self, tuple: &Tuple<ARITY>) -> Range<'_, TrieCursor<ARITY>> {
        self.boundaries::<ARITY>(tuple)
    }

    /// An iterator from the smallest stored tuple `>=` the given tuple (in
    /// lexicographic order) to the end.
    #[must_use]
    pub fn lower_bound(&self, tuple: &Tuple<ARITY>) -> crate::range::RangeIter<'_, TrieCursor<ARITY>> {
        let begin = match self.seek(tuple, false) {
            Some(cur) => cur,
            None => TrieCursor::end(),
        };
        Range::new(begin, Self::end_cursor()).into_iter()
    }

    /// An iterator from the smallest stored tuple `>` the given tuple to the
    /// end.
    #[must_use]
    pub fn upper_bound(&self, tuple: &Tuple<ARITY>) -> crate::range::RangeIter<'_, TrieCursor<ARITY>> {
        let begin = match self.seek(tuple, true) {
            Some(cur) => cur,
            None => TrieCursor::end(),
        };
        Range::new(begin, Self::end_cursor()).into_iter()
    }

    fn seek(&self, tuple: &Tuple<ARITY>, strict: bool) -> Option<TrieCursor<ARITY>> {
        if self.is_empty() {
            return None;
        }
        let mut cur = TrieCursor::<ARITY>::end();
        if Self::seek_level(&self.root, tuple, &mut cur, 0, strict) {
            Some(cur)
        } else {
            None
        }
    }

    /// Positions `cursor` at the smallest tuple under `level` whose
    /// remaining components are `>=` (or `>` when `strict`) the remaining
    /// components of `tuple`. Lexicographic misses carry into the next
    /// sibling of the current dimension.
    fn seek_level(
        level: &Level,
        tuple: &[RamDomain],
        cursor: &mut TrieCursor<ARITY>,
        depth: usize,
        strict: bool,
    ) -> bool {
        match level {
            Level::Leaf(map) => {
                let cur = if strict {
                    map.upper_bound(to_index(tuple[0]))
                } else {
                    map.lower_bound(to_index(tuple[0]))
                };
                let Some(value) = cur.item() else {
                    return false;
                };
                cursor.leaf = cur;
                cursor.tuple[depth] = from_index(value);
                true
            }
            Level::Inner(store) => {
                let target = to_index(tuple[0]);
                let mut want = target;
                loop {
                    let cur = store.lower_bound(want);
                    let Some((idx, child)) = cur.item() else {
                        return false;
                    };
                    cursor.path[depth] = cur;
                    cursor.tuple[depth] = from_index(idx);

                    if idx > target {
                        // a later sibling: everything below it qualifies
                        cursor.descend_first(unsafe { &*child.0 }, depth + 1);
                        return true;
                    }

                    let nested = unsafe { &*child.0 };
                    if Self::seek_level(nested, &tuple[1..], cursor, depth + 1, strict) {
                        return true;
                    }

                    // no match below this component: carry into the next one
                    if idx == u64::MAX {
                        return false;
                    }
                    want = idx + 1;
                }
            }
        }
    }

    /// Splits the trie into up to `chunks` disjoint ranges along the first
    /// dimension; their concatenation is the full iteration.
    #[must_use]
    pub fn partition(&self, chunks: usize) -> Vec<Range<'_, TrieCursor<ARITY>>> {
        let mut res = Vec::new();
        if self.is_empty() {
            return res;
        }
        let chunks = chunks.max(1);

        let mut prev = self.begin_cursor();
        match &self.root {
            Level::Inner(store) => {
                let step = (store.len() / chunks).max(1);
                let mut c = 1usize;
                let mut it = store.begin_cursor();
                while let Some((idx, child)) = it.item() {
                    if c % step == 0 && c != 1 {
                        let mut cur = TrieCursor::<ARITY>::end();
                        cur.path[0] = it;
                        cur.tuple[0] = from_index(idx);
                        cur.descend_first(unsafe { &*child.0 }, 1);
                        res.push(Range::new(prev.clone(), cur.clone()));
                        prev = cur;
                    }
                    it.advance();
                    c += 1;
                }
            }
            Level::Leaf(map) => {
                let step = (map.len() / chunks).max(1);
                let mut c = 1usize;
                let mut it = map.begin_cursor();
                while let Some(value) = it.item() {
                    if c % step == 0 && c != 1 {
                        let mut cur = TrieCursor::<ARITY>::end();
                        cur.leaf = it;
                        cur.tuple[0] = from_index(value);
                        res.push(Range::new(prev.clone(), cur.clone()));
                        prev = cur;
                    }
                    it.advance();
                    c += 1;
                }
            }
        }
        res.push(Range::new(prev, Self::end_cursor()));
        res
    }
}

/// A cursor over the tuples of a [`Trie`] in lexicographic order: one
/// sparse-array cursor per inner dimension, a bit-map cursor for the last
/// dimension, and the materialized tuple.
pub struct TrieCursor<const ARITY: usize> {
    path: [SparseArrayCursor<LevelPtr, TRIE_CELLS>; ARITY],
    leaf: BitMapCursor,
    tuple: Tuple<ARITY>,
}

// Cursors only read through their node pointers; partitions hand them to
// worker threads.
unsafe impl<const ARITY: usize> Send for TrieCursor<ARITY> {}
unsafe impl<const ARITY: usize> Sync for TrieCursor<ARITY> {}

impl<const ARITY: usize> Clone for TrieCursor<ARITY> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<const ARITY: usize> Copy for TrieCursor<ARITY> {}

impl<const ARITY: usize> PartialEq for TrieCursor<ARITY> {
    fn eq(&self, other: &Self) -> bool {
        self.leaf == other.leaf && self.path[..ARITY - 1] == other.path[..ARITY - 1]
    }
}

impl<const ARITY: usize> TrieCursor<ARITY> {
    fn end() -> Self {
        Self {
            path: [SparseArray::<LevelPtr, TRIE_CELLS>::end_cursor(); ARITY],
            leaf: SparseBitMap::end_cursor(),
            tuple: [0; ARITY],
        }
    }

    /// Fills dimensions `depth..` with the smallest entries under `level`.
    fn descend_first(&mut self, level: &Level, depth: usize) {
        let mut level = level;
        let mut d = depth;
        loop {
            match level {
                Level::Inner(store) => {
                    let cur = store.begin_cursor();
                    let (idx, child) = cur.item().expect("populated level without entries");
                    self.path[d] = cur;
                    self.tuple[d] = from_index(idx);
                    level = unsafe { &*child.0 };
                    d += 1;
                }
                Level::Leaf(map) => {
                    debug_assert_eq!(d, ARITY - 1);
                    let cur = map.begin_cursor();
                    let value = cur.item().expect("populated level without entries");
                    self.leaf = cur;
                    self.tuple[d] = from_index(value);
                    return;
                }
            }
        }
    }

    /// Advances the cursor at the given inner dimension, carrying upward
    /// when it runs out and descending into the smallest entries below the
    /// new position.
    fn advance_at_depth(&mut self, depth: usize) {
        let mut d = depth;
        loop {
            self.path[d].advance();
            if let Some((idx, child)) = self.path[d].item() {
                self.tuple[d] = from_index(idx);
                self.descend_first(unsafe { &*child.0 }, d + 1);
                return;
            }
            if d == 0 {
                *self = Self::end();
                return;
            }
            d -= 1;
        }
    }
}

impl<const ARITY: usize> Cursor for TrieCursor<ARITY> {
    type Item = Tuple<ARITY>;

    fn item(&self) -> Option<Self::Item> {
        self.leaf.item().map(|_| self.tuple)
    }

    fn advance(&mut self) {
        self.leaf.advance();
        if let Some(value) = self.leaf.item() {
            self.tuple[ARITY - 1] = from_index(value);
            return;
        }
        if ARITY == 1 {
            *self = Self::end();
            return;
        }
        self.advance_at_depth(ARITY.saturating_sub(2));
    }
}
