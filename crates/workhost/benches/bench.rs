use core::hint::black_box;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Builder;
use workhost::{Actions, Dispatcher, PoolConfig, spawn_worker, workhost_core::types::Payload};

const JOBS_PER_ITER: usize = 1024;

fn pool(workers: usize) -> Dispatcher {
    let mut actions = Actions::new();
    actions
        .register("echo", |payload: Payload| async move {
            Ok::<_, anyhow::Error>(payload)
        })
        .expect("register echo");
    let actions = Arc::new(actions);
    Dispatcher::new(
        PoolConfig::default().with_manifest(actions.manifest()),
        (0..workers).map(|_| spawn_worker(&actions).0),
    )
}

fn bench_submit_settle(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");

    let mut group = c.benchmark_group("dispatcher/submit_settle");
    group.throughput(Throughput::Elements(JOBS_PER_ITER as u64));

    for workers in [1, 2, 4, 8] {
        let pool = rt.block_on(async { pool(workers) });
        group.bench_with_input(BenchmarkId::from_parameter(workers), &pool, |b, pool| {
            b.to_async(&rt).iter(|| async {
                let handles = (0..JOBS_PER_ITER).map(|i| pool.submit("echo", json!(i)));
                for result in join_all(handles).await {
                    black_box(result.expect("echo failed"));
                }
            });
        });
        rt.block_on(pool.shutdown()).expect("shutdown failed");
    }

    group.finish();
}

criterion_group!(benches, bench_submit_settle);
criterion_main!(benches);
