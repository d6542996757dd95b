// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::*;

fn collect<K: Copy, C, W, U, const S: bool>(tree: &BTreeDelete<K, C, W, U, S>) -> Vec<K>
where
    C: KeyOrder<K>,
    W: KeyOrder<K>,
    U: KeyUpdater<K>,
{
    tree.iter().collect()
}

#[test]
fn insert_then_erase_everything_in_order() {
    let mut tree = BTreeDeleteSet::<i64>::new();
    for i in 1..=100 {
        assert!(tree.insert(i));
    }
    assert_eq!(tree.len(), 100);

    for i in 1..=100 {
        assert_eq!(tree.erase(&i), 1);
        assert!(tree.check(), "invariants broken after erasing {i}");
        assert!(!tree.contains(&i));
        assert_eq!(tree.len(), (100 - i) as usize);
    }
    assert!(tree.is_empty());
}

#[test]
fn erase_in_reverse_order() {
    let mut tree = BTreeDeleteSet::<i64>::new();
    tree.insert_all(0..500);

    for i in (0..500).rev() {
        assert_eq!(tree.erase(&i), 1);
        assert!(tree.check());
    }
    assert!(tree.is_empty());
}

#[test]
fn erase_missing_key_is_a_noop() {
    let mut tree = BTreeDeleteSet::<i64>::new();
    tree.insert_all([1, 2, 3]);
    assert_eq!(tree.erase(&9), 0);
    assert_eq!(tree.len(), 3);
}

#[test]
fn erase_inner_position_swaps_with_predecessor() {
    let mut tree = BTreeDeleteSet::<i64>::new();
    // enough keys for several levels, then remove keys that live in inner
    // nodes
    tree.insert_all(0..10_000);
    for i in (0..10_000).step_by(7) {
        assert_eq!(tree.erase(&i), 1);
    }
    assert!(tree.check());

    let expected: Vec<i64> = (0..10_000).filter(|i| i % 7 != 0).collect();
    assert_eq!(collect(&tree), expected);
}

#[test]
fn random_insert_erase_torture() {
    use rand::seq::SliceRandom;

    let mut keys: Vec<i64> = (0..5_000).collect();
    let mut rng = rand::rng();
    keys.shuffle(&mut rng);

    let mut tree = BTreeDeleteSet::<i64>::new();
    let mut hints = OperationHints::default();
    for &k in &keys {
        assert!(tree.insert_with(k, &mut hints));
    }

    keys.shuffle(&mut rng);
    let (gone, kept) = keys.split_at(2_500);
    for k in gone {
        assert_eq!(tree.erase(k), 1);
        assert!(!tree.contains(k));
    }
    assert!(tree.check());
    assert_eq!(tree.len(), kept.len());

    let mut expected: Vec<i64> = kept.to_vec();
    expected.sort_unstable();
    assert_eq!(collect(&tree), expected);
}

#[test]
fn multiset_erases_all_duplicates_and_counts() {
    let mut tree = BTreeDeleteMultiset::<i64>::new();
    for _ in 0..5 {
        tree.insert(7);
    }
    tree.insert(3);
    tree.insert(9);

    assert_eq!(tree.len(), 7);
    assert_eq!(tree.count(&7), 5);
    assert_eq!(tree.count(&3), 1);
    assert_eq!(tree.count(&4), 0);

    assert_eq!(tree.erase(&7), 5);
    assert!(tree.check());
    assert_eq!(tree.len(), 2);
    assert_eq!(collect(&tree), vec![3, 9]);
}

#[test]
fn erase_at_advances_to_next() {
    let mut tree = BTreeDeleteSet::<i64>::new();
    tree.insert_all([10, 20, 30, 40]);

    let mut cur = tree.find(&20);
    assert_eq!(cur.item(), Some(20));
    tree.erase_at(&mut cur);
    assert_eq!(cur.item(), Some(30));
    assert_eq!(collect(&tree), vec![10, 30, 40]);
}

#[test]
fn cursor_walks_both_directions() {
    let mut tree = BTreeDeleteSet::<i64>::new();
    tree.insert_all(0..1_000);

    let mut cur = tree.begin_cursor();
    for i in 0..1_000 {
        assert_eq!(cur.item(), Some(i));
        cur.advance();
    }
    assert!(cur.item().is_none());
    assert!(cur == tree.end_cursor());

    let mut cur = tree.find(&999);
    for i in (0..=999).rev() {
        assert_eq!(cur.item(), Some(i));
        cur.retreat();
    }
    // retreating at the first element stays put
    assert_eq!(cur.item(), Some(0));
}

#[test]
fn bounds_and_hints() {
    let mut tree = BTreeDeleteSet::<i64>::new();
    tree.insert_all((0..1_000).map(|i| i * 2));

    let mut hints = OperationHints::default();
    assert_eq!(tree.lower_bound_with(&500, &mut hints).item(), Some(500));
    assert_eq!(tree.lower_bound_with(&501, &mut hints).item(), Some(502));
    assert_eq!(tree.upper_bound_with(&500, &mut hints).item(), Some(502));
    assert!(tree.lower_bound_with(&2_000, &mut hints).item().is_none());
}

#[test]
fn partition_covers_everything() {
    let mut tree = BTreeDeleteSet::<i64>::new();
    tree.insert_all(0..10_000);

    for num in [1, 4, 64] {
        let mut seen = Vec::new();
        for chunk in tree.partition(num) {
            seen.extend(chunk.iter());
        }
        assert_eq!(seen, (0..10_000).collect::<Vec<_>>(), "num = {num}");
    }
}

#[test]
fn bulk_load_then_erase() {
    let keys: Vec<i64> = (0..5_000).collect();
    let mut tree = BTreeDeleteSet::<i64>::load(&keys);
    assert!(tree.check());
    assert_eq!(tree.len(), 5_000);

    for i in 0..2_500 {
        assert_eq!(tree.erase(&(i * 2)), 1);
    }
    assert!(tree.check());
    assert_eq!(collect(&tree), (0..2_500).map(|i| i * 2 + 1).collect::<Vec<_>>());
}

#[test]
fn clone_swap_equality() {
    let mut a = BTreeDeleteSet::<i64>::new();
    a.insert_all(0..100);
    let mut b = a.clone();
    assert!(a == b);

    b.erase(&50);
    assert!(a != b);

    a.swap(&mut b);
    assert_eq!(a.len(), 99);
    assert_eq!(b.len(), 100);
}

#[test]
fn erase_then_reinsert() {
    let mut tree = BTreeDeleteSet::<i64>::new();
    tree.insert_all(0..64);
    for i in 0..64 {
        tree.erase(&i);
    }
    assert!(tree.is_empty());

    tree.insert_all(0..64);
    assert_eq!(tree.len(), 64);
    assert!(tree.check());
    assert_eq!(collect(&tree), (0..64).collect::<Vec<_>>());
}
