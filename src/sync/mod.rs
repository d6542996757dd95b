// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Concurrency coordination primitives shared by the tree containers: the
//! optimistic read-write lock and the operation-hint LRU cache.

mod cache;
mod lock;

pub use cache::{AccessCounter, LruCache};
pub use lock::{Lease, OptimisticLock};
