// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

#![allow(unsafe_code)]

//! Node storage for the deletion-capable B-tree.
//!
//! Same block layout as the insert-only tree, but the variant is
//! single-threaded, so the header fields are plain values and there is no
//! per-node lock. Deletion additionally relies on the minimum-fill bound
//! [`min_keys`], restored by merge/rebalance after each erase.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::marker::PhantomData;
use std::ptr;

/// The target byte size of a node block.
pub(super) const BLOCK_SIZE: usize = 256;

#[repr(C)]
pub(super) struct NodeHdr<K> {
    parent: *mut NodeHdr<K>,
    num_elements: usize,
    position: u8,
    inner: bool,
    max_keys: u16,
    _keys: PhantomData<K>,
}

fn keys_offset<K>() -> usize {
    let hdr = std::mem::size_of::<NodeHdr<K>>();
    let align = std::mem::align_of::<K>().max(1);
    (hdr + align - 1) & !(align - 1)
}

fn children_offset<K>(max_keys: usize) -> usize {
    let end = keys_offset::<K>() + max_keys * std::mem::size_of::<K>();
    let align = std::mem::align_of::<*mut NodeHdr<K>>();
    (end + align - 1) & !(align - 1)
}

fn node_layout<K>(max_keys: usize, inner: bool) -> Layout {
    let size = if inner {
        children_offset::<K>(max_keys) + (max_keys + 1) * std::mem::size_of::<*mut NodeHdr<K>>()
    } else {
        keys_offset::<K>() + max_keys * std::mem::size_of::<K>()
    };
    let align = std::mem::align_of::<NodeHdr<K>>().max(std::mem::align_of::<K>());
    Layout::from_size_align(size.max(1), align).expect("node layout")
}

/// Keys per node: the block budget minus the header over the key size,
/// floored at 3.
#[allow(clippy::cast_possible_truncation)]
pub(super) fn max_keys_for<K>() -> u16 {
    let avail = BLOCK_SIZE.saturating_sub(keys_offset::<K>());
    let keys = avail / std::mem::size_of::<K>().max(1);
    keys.clamp(3, u8::MAX as usize) as u16
}

/// The biased split point shared with the insert-only tree.
pub(super) fn split_point(max_keys: usize) -> usize {
    (3 * max_keys / 4).min(max_keys - 2)
}

/// The minimum number of keys every non-root node keeps after deletion.
pub(super) fn min_keys(max_keys: usize) -> usize {
    let sp = split_point(max_keys);
    (max_keys - (sp + 1)).min(sp + 1)
}

/// A copyable typed pointer to a node block.
pub(super) struct NodeRef<K>(*mut NodeHdr<K>);

impl<K> std::fmt::Debug for NodeRef<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NodeRef").field(&self.0).finish()
    }
}

impl<K> Clone for NodeRef<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for NodeRef<K> {}

impl<K> PartialEq for NodeRef<K> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<K> Eq for NodeRef<K> {}

impl<K> NodeRef<K> {
    pub(super) fn null() -> Self {
        Self(ptr::null_mut())
    }

    pub(super) fn from_raw(raw: *mut NodeHdr<K>) -> Self {
        Self(raw)
    }

    pub(super) fn raw(self) -> *mut NodeHdr<K> {
        self.0
    }

    pub(super) fn is_null(self) -> bool {
        self.0.is_null()
    }

    pub(super) fn alloc(max_keys: u16, inner: bool) -> Self {
        let layout = node_layout::<K>(max_keys as usize, inner);
        let raw = unsafe { alloc_zeroed(layout) }.cast::<NodeHdr<K>>();
        if raw.is_null() {
            handle_alloc_error(layout);
        }
        unsafe {
            raw.write(NodeHdr {
                parent: ptr::null_mut(),
                num_elements: 0,
                position: 0,
                inner,
                max_keys,
                _keys: PhantomData,
            });
        }
        Self(raw)
    }

    pub(super) unsafe fn free_recursive(self) {
        debug_assert!(!self.is_null());
        if self.is_inner() {
            for i in 0..=self.num_elements() {
                let child = self.child(i);
                if !child.is_null() {
                    child.free_recursive();
                }
            }
        }
        self.free_alone();
    }

    pub(super) unsafe fn free_alone(self) {
        let layout = node_layout::<K>(self.max_keys() as usize, self.is_inner());
        dealloc(self.0.cast::<u8>(), layout);
    }

    // ---- header accessors ----

    pub(super) fn is_inner(self) -> bool {
        unsafe { (*self.0).inner }
    }

    pub(super) fn is_leaf(self) -> bool {
        !self.is_inner()
    }

    pub(super) fn max_keys(self) -> u16 {
        unsafe { (*self.0).max_keys }
    }

    pub(super) fn is_empty(self) -> bool {
        self.num_elements() == 0
    }

    pub(super) fn num_elements(self) -> usize {
        unsafe { (*self.0).num_elements }
    }

    pub(super) fn set_num_elements(self, n: usize) {
        unsafe { (*self.0).num_elements = n }
    }

    pub(super) fn parent(self) -> Self {
        Self(unsafe { (*self.0).parent })
    }

    pub(super) fn set_parent(self, parent: Self) {
        unsafe { (*self.0).parent = parent.0 }
    }

    pub(super) fn position(self) -> usize {
        unsafe { (*self.0).position as usize }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(super) fn set_position(self, position: usize) {
        debug_assert!(position <= u8::MAX as usize);
        unsafe {
            (*self.0).position = position as u8;
        }
    }

    // ---- children ----

    fn children_ptr(self) -> *mut *mut NodeHdr<K> {
        debug_assert!(self.is_inner());
        unsafe {
            self.0
                .cast::<u8>()
                .add(children_offset::<K>(self.max_keys() as usize))
                .cast::<*mut NodeHdr<K>>()
        }
    }

    pub(super) fn child(self, i: usize) -> Self {
        debug_assert!(i <= self.max_keys() as usize);
        Self(unsafe { self.children_ptr().add(i).read() })
    }

    pub(super) fn set_child(self, i: usize, child: Self) {
        debug_assert!(i <= self.max_keys() as usize);
        unsafe { self.children_ptr().add(i).write(child.0) }
    }

    pub(super) fn leftmost_leaf(self) -> Self {
        let mut cur = self;
        while cur.is_inner() {
            cur = cur.child(0);
        }
        cur
    }

    pub(super) fn rightmost_leaf(self) -> Self {
        let mut cur = self;
        while cur.is_inner() {
            cur = cur.child(cur.num_elements());
        }
        cur
    }
}

impl<K: Copy> NodeRef<K> {
    fn keys_ptr(self) -> *mut K {
        unsafe { self.0.cast::<u8>().add(keys_offset::<K>()).cast::<K>() }
    }

    pub(super) fn key(self, i: usize) -> K {
        debug_assert!(i < self.max_keys() as usize);
        unsafe { self.keys_ptr().add(i).read() }
    }

    pub(super) fn set_key(self, i: usize, key: K) {
        debug_assert!(i < self.max_keys() as usize);
        unsafe { self.keys_ptr().add(i).write(key) }
    }

    /// Shifts the keys in `from..n` one slot to the right.
    pub(super) fn shift_keys_right(self, from: usize, n: usize) {
        debug_assert!(n < self.max_keys() as usize);
        unsafe {
            let keys = self.keys_ptr();
            ptr::copy(keys.add(from), keys.add(from + 1), n - from);
        }
    }

    /// Shifts the keys in `from..n` one slot to the left (over `from - 1`).
    pub(super) fn shift_keys_left(self, from: usize, n: usize) {
        debug_assert!(from >= 1);
        unsafe {
            let keys = self.keys_ptr();
            ptr::copy(keys.add(from), keys.add(from - 1), n - from);
        }
    }
}
