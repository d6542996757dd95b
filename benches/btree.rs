use criterion::{black_box, criterion_group, criterion_main, Criterion};
use factstore::{BTreeSet, Cursor, OperationHints};

fn btree_insert_ascending(c: &mut Criterion) {
    c.bench_function("btree insert ascending 100k", |b| {
        b.iter(|| {
            let tree = BTreeSet::<i64>::new();
            let mut hints = OperationHints::default();
            for i in 0..100_000 {
                tree.insert_with(black_box(i), &mut hints);
            }
            tree
        });
    });
}

fn btree_lookup(c: &mut Criterion) {
    let tree = BTreeSet::<i64>::new();
    tree.insert_all(0..1_000_000);

    c.bench_function("btree contains hit", |b| {
        let mut hints = OperationHints::default();
        let mut i = 0;
        b.iter(|| {
            i = (i + 7) % 1_000_000;
            tree.contains_with(black_box(&i), &mut hints)
        });
    });

    c.bench_function("btree lower_bound", |b| {
        let mut hints = OperationHints::default();
        let mut i = 0;
        b.iter(|| {
            i = (i + 13) % 1_000_000;
            tree.lower_bound_with(black_box(&i), &mut hints).item()
        });
    });
}

fn btree_bulk_load(c: &mut Criterion) {
    let keys: Vec<i64> = (0..1_000_000).collect();
    c.bench_function("btree bulk load 1m", |b| {
        b.iter(|| BTreeSet::<i64>::load(black_box(&keys)));
    });
}

criterion_group!(benches, btree_insert_ascending, btree_lookup, btree_bulk_load);
criterion_main!(benches);
