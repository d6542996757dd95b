// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use factstore::{Cursor, SparseBitMap, Trie, TrieContext};

#[test]
fn bitmap_scenario() {
    let map = SparseBitMap::new();
    let mut ctxt = factstore::brie::BitMapContext::default();
    assert!(map.set(5, &mut ctxt));
    assert!(map.set(64, &mut ctxt));
    assert!(map.set(129, &mut ctxt));

    assert_eq!(map.len(), 3);

    let mut seen = Vec::new();
    let mut cur = map.begin_cursor();
    while let Some(v) = cur.item() {
        seen.push(v);
        cur.advance();
    }
    assert_eq!(seen, vec![5, 64, 129]);

    assert_eq!(map.lower_bound(10).item(), Some(64));
    assert!(map.upper_bound(129).item().is_none());
}

#[test]
fn boundaries_scenario() {
    let trie = Trie::<3>::new();
    for t in [[1, 2, 3], [1, 2, 4], [1, 3, 5], [2, 1, 1]] {
        assert!(trie.insert(&t));
    }

    let first_three: Vec<_> = trie.boundaries::<1>(&[1, 0, 0]).into_iter().collect();
    assert_eq!(first_three, vec![[1, 2, 3], [1, 2, 4], [1, 3, 5]]);

    let pair: Vec<_> = trie.boundaries::<2>(&[1, 2, 0]).into_iter().collect();
    assert_eq!(pair, vec![[1, 2, 3], [1, 2, 4]]);

    let single: Vec<_> = trie.boundaries::<3>(&[1, 3, 5]).into_iter().collect();
    assert_eq!(single, vec![[1, 3, 5]]);
}

#[test]
fn trie_merge_and_partition() {
    let mut left = Trie::<2>::new();
    let right = Trie::<2>::new();
    let mut ctxt = TrieContext::default();
    for i in 0..1_000 {
        left.insert_with(&[i, i], &mut ctxt);
    }
    let mut ctxt = TrieContext::default();
    for i in 500..1_500 {
        right.insert_with(&[i, i], &mut ctxt);
    }

    left.insert_all(&right);
    assert_eq!(left.len(), 1_500);

    let mut seen = Vec::new();
    for range in left.partition(8) {
        seen.extend(range.into_iter());
    }
    assert_eq!(seen.len(), 1_500);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn concurrent_trie_inserts() {
    let trie = Trie::<2>::new();
    std::thread::scope(|s| {
        for t in 0..4 {
            let trie = &trie;
            s.spawn(move || {
                let mut ctxt = TrieContext::default();
                for i in 0..5_000 {
                    trie.insert_with(&[i, t], &mut ctxt);
                }
            });
        }
    });
    assert_eq!(trie.len(), 20_000);
}
