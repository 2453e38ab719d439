use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use zkmt_core::{next_xid, RefCounter};

fn bench_next_xid(c: &mut Criterion) {
    c.bench_function("next_xid", |b| b.iter(|| black_box(next_xid())));
}

fn bench_refcount(c: &mut Criterion) {
    let rc = RefCounter::new(1);
    c.bench_function("refcount_inc_dec", |b| {
        b.iter(|| {
            black_box(rc.increment());
            black_box(rc.decrement());
        })
    });
}

criterion_group!(benches, bench_next_xid, bench_refcount);
criterion_main!(benches);
