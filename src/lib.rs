// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Concurrent ordered-set and trie indexes for Datalog relation storage.
//!
//! ##### About
//!
//! Datalog evaluation is dominated by three container operations: inserting
//! freshly derived tuples, membership probes, and ordered range scans that
//! feed join pipelines. This crate provides the in-memory index structures
//! those workloads want, together with the small numeric vocabulary and the
//! serialization facade a relation store needs at its boundary:
//!
//! - [`BTreeSet`]/[`BTreeMultiset`]: a cache-conscious B-tree over copyable
//!   keys with *biased splits* (high fill under ascending insertion),
//!   caller-owned *operation hints* exploiting temporal locality, optional
//!   in-place updates of weak-equal duplicates, bulk loading, partitioning
//!   for parallel scans, and lock-free-read/optimistically-locked-write
//!   concurrent insertion.
//! - [`BTreeDeleteSet`]/[`BTreeDeleteMultiset`]: the deletion-capable
//!   sibling, restoring the minimum-fill invariant through merge/rebalance
//!   (single-threaded by contract).
//! - [`Trie`] (with [`SparseArray`] and [`SparseBitMap`] as substrates): a
//!   level-compressed trie over fixed-arity integer tuples supporting
//!   concurrent insertion, recursive set-union merge, lexicographic
//!   iteration and prefix range queries (`boundaries`).
//! - [`SymbolTable`]/[`RecordTable`]: interning of strings and records into
//!   the tuple element domain.
//! - [`io`]: CSV and JSON readers/writers behind an `IO=` registry.
//!
//! # Example
//!
//! ```
//! use factstore::{BTreeSet, Trie};
//!
//! // ordered set with concurrent insertion
//! let index = BTreeSet::<[i32; 2]>::new();
//! std::thread::scope(|s| {
//!     for t in 0..4 {
//!         let index = &index;
//!         s.spawn(move || {
//!             for i in 0..1_000 {
//!                 index.insert([t, i]);
//!             }
//!         });
//!     }
//! });
//! assert_eq!(index.len(), 4_000);
//!
//! // tuple trie with prefix queries
//! let trie = Trie::<3>::new();
//! trie.insert(&[1, 2, 3]);
//! trie.insert(&[1, 2, 4]);
//! trie.insert(&[2, 0, 0]);
//! let under_1_2: Vec<_> = trie.boundaries::<2>(&[1, 2, 0]).into_iter().collect();
//! assert_eq!(under_1_2, vec![[1, 2, 3], [1, 2, 4]]);
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all, missing_docs, clippy::cargo)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::multiple_crate_versions)]

pub mod brie;
pub mod btree;
pub mod btree_delete;
mod domain;
mod error;
pub mod io;
mod ord;
mod range;
mod records;
mod relation;
mod symbols;
pub mod sync;

pub use {
    brie::{SparseArray, SparseBitMap, Trie, TrieContext, TrieCursor},
    btree::{BTree, BTreeCursor, BTreeMultiset, BTreeSet, OperationHints},
    btree_delete::{BTreeDelete, BTreeDeleteCursor, BTreeDeleteMultiset, BTreeDeleteSet},
    domain::{
        compare_typed, ram_bit_cast, RamDomain, RamFloat, RamSigned, RamType, RamUnsigned, Tuple,
        TypeAttribute, MAX_RAM_SIGNED, MAX_RAM_UNSIGNED, MIN_RAM_SIGNED,
    },
    error::{Error, Result},
    ord::{KeyOrder, KeyUpdater, NaturalOrder, NoUpdater, PrefixOrder, TypedTupleOrder},
    range::{Cursor, Range, RangeIter},
    records::{RecordTable, NIL_RECORD},
    relation::{BTreeRelation, Relation},
    symbols::SymbolTable,
};
