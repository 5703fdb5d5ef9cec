//! Dispatch overhead benchmark using criterion.
//!
//! Measures the cost of `run_parallel` for empty and tiny tasks across
//! task counts and worker counts.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use forkpool::{PinningStrategy, PoolConfig, SchedulerHandle};
use std::sync::atomic::{AtomicUsize, Ordering};

fn bench_empty_dispatch(c: &mut Criterion) {
    let scheduler = SchedulerHandle::new();
    scheduler
        .start_workers(SchedulerHandle::default_worker_count())
        .unwrap();

    let mut group = c.benchmark_group("dispatch_empty");
    for count in [1usize, 10, 100, 1000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| scheduler.run_parallel(count, |_, _| {}).unwrap())
        });
    }
    group.finish();

    scheduler.stop_workers().unwrap();
}

/// Same workload at increasing worker counts for scaling analysis.
fn bench_worker_scaling(c: &mut Criterion) {
    const TASKS: usize = 10_000;

    let mut group = c.benchmark_group("dispatch_scaling");
    group.throughput(Throughput::Elements(TASKS as u64));

    for workers in [0usize, 1, 3, 7, 15, 31]
        .into_iter()
        .filter(|&w| w < num_cpus::get())
    {
        let scheduler = SchedulerHandle::with_config(PoolConfig {
            pinning: PinningStrategy::AvoidSMT,
            ..PoolConfig::default()
        });
        scheduler.start_workers(workers).unwrap();

        group.bench_function(BenchmarkId::new("sum_10k", workers), |b| {
            b.iter(|| {
                let sum = AtomicUsize::new(0);
                scheduler
                    .run_parallel(TASKS, |i, _| {
                        sum.fetch_add(std::hint::black_box(i), Ordering::Relaxed);
                    })
                    .unwrap();
                sum.into_inner()
            })
        });

        scheduler.stop_workers().unwrap();
    }
    group.finish();
}

criterion_group!(benches, bench_empty_dispatch, bench_worker_scaling);
criterion_main!(benches);
