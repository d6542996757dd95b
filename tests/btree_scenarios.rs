// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use factstore::{BTreeDeleteSet, BTreeMultiset, BTreeSet, Cursor, OperationHints};

#[test]
fn ascending_insert_scenario() {
    let tree = BTreeSet::<i64>::new();
    let mut hints = OperationHints::default();
    for i in 1..=1024 {
        assert!(tree.insert_with(i, &mut hints));
    }

    assert_eq!(tree.len(), 1024);
    assert_eq!(tree.begin_cursor().item(), Some(1));
    assert_eq!(tree.iter().collect::<Vec<_>>(), (1..=1024).collect::<Vec<_>>());
    assert_eq!(tree.lower_bound(&500).item(), Some(500));
    assert!(tree.upper_bound(&1024).item().is_none());

    // biased splits keep ascending-workload leaves well filled
    let fill = tree.len() as f64 / (tree.node_count() * tree.max_keys_per_node()) as f64;
    assert!(fill >= 0.70, "fill was {fill}");
}

#[test]
fn duplicate_scenario() {
    let set = BTreeSet::<i64>::new();
    assert!(set.insert(5));
    assert!(!set.insert(5));
    assert!(!set.insert(5));
    assert_eq!(set.len(), 1);

    let multi = BTreeMultiset::<i64>::new();
    assert!(multi.insert(5));
    assert!(multi.insert(5));
    assert!(multi.insert(5));
    assert_eq!(multi.len(), 3);
}

#[test]
fn concurrent_insert_scenario() {
    let tree = BTreeSet::<i64>::new();

    std::thread::scope(|s| {
        for t in 0..4i64 {
            let tree = &tree;
            s.spawn(move || {
                let mut hints = OperationHints::default();
                for i in t * 10_000..(t + 1) * 10_000 {
                    assert!(tree.insert_with(i, &mut hints));
                }
            });
        }
    });

    assert_eq!(tree.len(), 40_000);
    assert!(tree.check());
    assert_eq!(tree.iter().collect::<Vec<_>>(), (0..40_000).collect::<Vec<_>>());
}

#[test]
fn erase_propagation_scenario() {
    let mut tree = BTreeDeleteSet::<i64>::new();
    for i in 1..=100 {
        tree.insert(i);
    }

    for i in 1..=100 {
        assert_eq!(tree.erase(&i), 1);
        assert!(tree.check(), "invariants broken after erasing {i}");
    }
    assert!(tree.is_empty());
}

#[test]
fn partitions_feed_parallel_consumers() {
    let tree = BTreeSet::<i64>::new();
    tree.insert_all(0..100_000);

    let chunks = tree.partition(16);
    let total = std::sync::atomic::AtomicUsize::new(0);
    std::thread::scope(|s| {
        for chunk in &chunks {
            let chunk = chunk.clone();
            let total = &total;
            s.spawn(move || {
                let mut n = 0;
                let mut last = None;
                for k in chunk {
                    if let Some(prev) = last {
                        assert!(prev < k);
                    }
                    last = Some(k);
                    n += 1;
                }
                total.fetch_add(n, std::sync::atomic::Ordering::Relaxed);
            });
        }
    });
    assert_eq!(total.load(std::sync::atomic::Ordering::Relaxed), 100_000);
}
