// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::*;
use crate::ord::PrefixOrder;

fn collect<K: Copy, C, W, U, const S: bool>(tree: &BTree<K, C, W, U, S>) -> Vec<K>
where
    C: KeyOrder<K>,
    W: KeyOrder<K>,
    U: KeyUpdater<K>,
{
    tree.iter().collect()
}

#[test]
fn empty_tree() {
    let tree = BTreeSet::<i64>::new();
    assert!(tree.is_empty());
    assert_eq!(tree.len(), 0);
    assert!(!tree.contains(&42));
    assert!(tree.lower_bound(&0).item().is_none());
    assert!(tree.upper_bound(&0).item().is_none());
    assert!(collect(&tree).is_empty());
    assert!(tree.partition(4).is_empty());
}

#[test]
fn ascending_insert() {
    let tree = BTreeSet::<i64>::new();
    let mut hints = OperationHints::default();
    for i in 1..=1024 {
        assert!(tree.insert_with(i, &mut hints));
    }
    assert_eq!(tree.len(), 1024);
    assert!(tree.check());

    assert_eq!(collect(&tree), (1..=1024).collect::<Vec<_>>());
    assert_eq!(tree.begin_cursor().item(), Some(1));
    assert_eq!(tree.lower_bound(&500).item(), Some(500));
    assert!(tree.upper_bound(&1024).item().is_none());
}

#[test]
fn biased_split_keeps_leaves_filled() {
    let tree = BTreeSet::<i64>::new();
    let mut hints = OperationHints::default();
    for i in 0..100_000 {
        tree.insert_with(i, &mut hints);
    }
    let fill = tree.len() as f64 / (tree.node_count() * tree.max_keys_per_node()) as f64;
    assert!(fill >= 0.70, "average fill {fill} below the biased-split target");
}

#[test]
fn duplicate_inserts_are_rejected() {
    let tree = BTreeSet::<i64>::new();
    assert!(tree.insert(5));
    assert!(!tree.insert(5));
    assert!(!tree.insert(5));
    assert_eq!(tree.len(), 1);
}

#[test]
fn multiset_keeps_duplicates() {
    let tree = BTreeMultiset::<i64>::new();
    assert!(tree.insert(5));
    assert!(tree.insert(5));
    assert!(tree.insert(5));
    assert_eq!(tree.len(), 3);
    assert_eq!(collect(&tree), vec![5, 5, 5]);
    assert!(tree.check());
}

#[test]
fn random_inserts_iterate_sorted() {
    use rand::seq::SliceRandom;

    let mut keys: Vec<i64> = (0..10_000).collect();
    keys.shuffle(&mut rand::rng());

    let tree = BTreeSet::<i64>::new();
    let mut hints = OperationHints::default();
    for &k in &keys {
        assert!(tree.insert_with(k, &mut hints));
    }

    assert!(tree.check());
    assert_eq!(collect(&tree), (0..10_000).collect::<Vec<_>>());
    for probe in [0, 17, 4_096, 9_999] {
        assert!(tree.contains(&probe));
    }
    assert!(!tree.contains(&10_000));
}

#[test]
fn bounds_on_gappy_keys() {
    let tree = BTreeSet::<i64>::new();
    tree.insert_all((0..1_000).map(|i| i * 10));

    let mut hints = OperationHints::default();
    assert_eq!(tree.lower_bound_with(&500, &mut hints).item(), Some(500));
    assert_eq!(tree.lower_bound_with(&501, &mut hints).item(), Some(510));
    assert_eq!(tree.upper_bound_with(&500, &mut hints).item(), Some(510));
    assert_eq!(tree.upper_bound_with(&505, &mut hints).item(), Some(510));
    assert!(tree.lower_bound_with(&9_991, &mut hints).item().is_none());

    // a second nearby query goes through the hinted node
    assert_eq!(tree.lower_bound_with(&502, &mut hints).item(), Some(510));
}

#[test]
fn find_returns_positions() {
    let tree = BTreeSet::<i64>::new();
    tree.insert_all([4, 8, 15, 16, 23, 42]);

    let mut cur = tree.find(&15);
    assert_eq!(cur.item(), Some(15));
    cur.advance();
    assert_eq!(cur.item(), Some(16));
    assert!(tree.find(&17).item().is_none());
}

#[test]
fn partition_covers_everything() {
    let tree = BTreeSet::<i64>::new();
    tree.insert_all(0..50_000);

    for num in [1, 2, 7, 100, 1_000] {
        let chunks = tree.partition(num);
        let mut seen = Vec::new();
        for chunk in &chunks {
            seen.extend(chunk.iter());
        }
        assert_eq!(seen, (0..50_000).collect::<Vec<_>>(), "num = {num}");
    }
}

#[test]
fn bulk_load_matches_iterative_insert() {
    let keys: Vec<i64> = (0..20_000).map(|i| i * 3).collect();

    let loaded = BTreeSet::<i64>::load(&keys);
    assert!(loaded.check());
    assert_eq!(loaded.len(), keys.len());
    assert_eq!(collect(&loaded), keys);

    let inserted = BTreeSet::<i64>::new();
    inserted.insert_all(keys.iter().copied());
    assert!(loaded == inserted);
}

#[test]
fn clone_is_deep_and_equal() {
    let tree = BTreeSet::<i64>::new();
    tree.insert_all(0..5_000);

    let copy = tree.clone();
    assert!(copy.check());
    assert!(copy == tree);
    assert_eq!(collect(&copy), collect(&tree));

    copy.insert(5_000);
    assert!(!tree.contains(&5_000));
    assert!(copy != tree);
}

#[test]
fn swap_and_clear() {
    let mut a = BTreeSet::<i64>::new();
    let mut b = BTreeSet::<i64>::new();
    a.insert_all(0..100);
    b.insert_all(200..210);

    a.swap(&mut b);
    assert_eq!(a.len(), 10);
    assert_eq!(b.len(), 100);

    b.clear();
    assert!(b.is_empty());
    assert_eq!(collect(&b), Vec::<i64>::new());
    b.insert(1);
    assert_eq!(b.len(), 1);
}

#[test]
fn tuples_as_keys() {
    let tree = BTreeSet::<[i32; 3]>::new();
    let mut hints = OperationHints::default();
    for a in 0..30 {
        for b in 0..30 {
            assert!(tree.insert_with([a, b, a + b], &mut hints));
        }
    }
    assert_eq!(tree.len(), 900);
    assert!(tree.check());
    assert!(tree.contains(&[7, 11, 18]));

    let all = collect(&tree);
    assert!(all.windows(2).all(|w| w[0] < w[1]));
}

/// An updater refreshing the auxiliary column of weakly-equal facts.
#[derive(Default, Clone, Copy)]
struct MinTail;

impl KeyUpdater<[crate::domain::RamDomain; 3]> for MinTail {
    const ACTIVE: bool = true;

    fn update(
        &self,
        stored: &mut [crate::domain::RamDomain; 3],
        incoming: &[crate::domain::RamDomain; 3],
    ) -> bool {
        if incoming[2] < stored[2] {
            stored[2] = incoming[2];
            return true;
        }
        false
    }
}

#[test]
fn weak_equal_duplicates_update_in_place() {
    // strong order covers all columns, the weak order only the data prefix
    let tree: BTree<[crate::domain::RamDomain; 3], NaturalOrder, PrefixOrder, MinTail, true> =
        BTree::with_order(NaturalOrder, PrefixOrder::new(2), MinTail);

    assert!(tree.insert([1, 2, 9]));
    // weak-equal duplicate with a smaller tail updates the stored key
    assert!(tree.insert([1, 2, 4]));
    // weak-equal duplicate with a larger tail changes nothing
    assert!(!tree.insert([1, 2, 7]));
    assert_eq!(tree.len(), 1);
    assert_eq!(collect(&tree), vec![[1, 2, 4]]);

    assert!(tree.insert([1, 3, 0]));
    assert_eq!(tree.len(), 2);
}

#[test]
fn concurrent_disjoint_inserts() {
    let tree = BTreeSet::<i64>::new();

    std::thread::scope(|s| {
        for t in 0..4i64 {
            let tree = &tree;
            s.spawn(move || {
                let mut hints = OperationHints::default();
                for i in 0..10_000 {
                    assert!(tree.insert_with(t * 10_000 + i, &mut hints));
                }
            });
        }
    });

    assert_eq!(tree.len(), 40_000);
    assert!(tree.check());
    assert_eq!(collect(&tree), (0..40_000).collect::<Vec<_>>());
}

#[test]
fn concurrent_interleaved_inserts() {
    let tree = BTreeSet::<i64>::new();

    std::thread::scope(|s| {
        for t in 0..4i64 {
            let tree = &tree;
            s.spawn(move || {
                let mut hints = OperationHints::default();
                // stride the key space so threads collide on leaves
                for i in 0..10_000 {
                    assert!(tree.insert_with(i * 4 + t, &mut hints));
                }
            });
        }
    });

    assert_eq!(tree.len(), 40_000);
    assert!(tree.check());
    assert_eq!(collect(&tree), (0..40_000).collect::<Vec<_>>());
}

#[test]
fn concurrent_duplicate_inserts_count_once() {
    let tree = BTreeSet::<i64>::new();
    let added = std::sync::atomic::AtomicUsize::new(0);

    std::thread::scope(|s| {
        for _ in 0..4 {
            let tree = &tree;
            let added = &added;
            s.spawn(move || {
                let mut hints = OperationHints::default();
                for i in 0..5_000 {
                    if tree.insert_with(i, &mut hints) {
                        added.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(added.load(std::sync::atomic::Ordering::Relaxed), 5_000);
    assert_eq!(tree.len(), 5_000);
    assert!(tree.check());
}
