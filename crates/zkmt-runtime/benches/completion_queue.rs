use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use zkmt_core::{ReturnCode, Stat, Xid};
use zkmt_runtime::{CompletionContext, CompletionQueue, CompletionRecord, Reply, Route, StatCallback};

fn record(cb: &Arc<dyn StatCallback>, n: i32, stat: &Stat) -> CompletionRecord {
    let ctx = CompletionContext::new(Xid::new(n), "/bench", Route::Stat(cb.clone()));
    CompletionRecord::decode(ctx, ReturnCode::Ok, &Reply::Stat(stat))
}

fn bench_push_drain(c: &mut Criterion) {
    let cb: Arc<dyn StatCallback> = Arc::new(|rc: ReturnCode, _: &str, stat: Option<&Stat>| {
        black_box((rc, stat));
    });
    let stat = Stat::default();
    let queue = CompletionQueue::new();

    c.bench_function("queue_push_drain_64", |b| {
        b.iter_batched(
            || (0..64).map(|n| record(&cb, n, &stat)).collect::<Vec<_>>(),
            |records| {
                for r in records {
                    queue.push(r);
                }
                for r in queue.take_all().records {
                    r.dispatch();
                }
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("decode_stat_reply", |b| {
        b.iter(|| black_box(record(&cb, 1, &stat)))
    });
}

criterion_group!(benches, bench_push_drain);
criterion_main!(benches);
