use criterion::{black_box, criterion_group, criterion_main, Criterion};
use factstore::{Trie, TrieContext};

fn trie_insert(c: &mut Criterion) {
    c.bench_function("trie insert 100k pairs", |b| {
        b.iter(|| {
            let trie = Trie::<2>::new();
            let mut ctxt = TrieContext::default();
            for i in 0..100_000 {
                trie.insert_with(black_box(&[i / 10, i % 10]), &mut ctxt);
            }
            trie
        });
    });
}

fn trie_contains(c: &mut Criterion) {
    let trie = Trie::<2>::new();
    let mut ctxt = TrieContext::default();
    for i in 0..1_000_000 {
        trie.insert_with(&[i / 100, i % 100], &mut ctxt);
    }

    c.bench_function("trie contains hit", |b| {
        let mut ctxt = TrieContext::default();
        let mut i = 0;
        b.iter(|| {
            i = (i + 7) % 1_000_000;
            trie.contains_with(black_box(&[i / 100, i % 100]), &mut ctxt)
        });
    });
}

fn trie_boundaries(c: &mut Criterion) {
    let trie = Trie::<3>::new();
    let mut ctxt = TrieContext::default();
    for a in 0..100 {
        for b in 0..100 {
            trie.insert_with(&[a, b, a + b], &mut ctxt);
        }
    }

    c.bench_function("trie boundaries prefix 1", |b| {
        let mut ctxt = TrieContext::default();
        let mut a = 0;
        b.iter(|| {
            a = (a + 1) % 100;
            let range = trie.boundaries_with::<1>(black_box(&[a, 0, 0]), &mut ctxt);
            range.into_iter().count()
        });
    });
}

criterion_group!(benches, trie_insert, trie_contains, trie_boundaries);
criterion_main!(benches);
