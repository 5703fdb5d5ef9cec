use forkpool::{SchedulerHandle, TraceSession, region_timer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{error, info};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let num_workers = args
        .next()
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(3);
    let trace_path = args.next().unwrap_or_else(|| "demo.trace".to_string());

    let session = TraceSession::start(&trace_path);
    let scheduler = SchedulerHandle::new();
    if let Err(err) = scheduler.start_workers(num_workers) {
        error!(error = %err, "cannot start workers");
        return;
    }
    info!(workers = num_workers, "scheduler started");

    if let Err(err) = run_demo(&scheduler) {
        error!(error = %err, "demo failed");
    }

    if let Err(err) = scheduler.stop_workers() {
        error!(error = %err, "shutdown error");
    }
    match session.finish() {
        Ok(Some(path)) => info!(path = %path.display(), "trace written"),
        Ok(None) => {}
        Err(err) => error!(error = %err, "trace not written"),
    }
}

fn run_demo(scheduler: &SchedulerHandle) -> Result<(), forkpool::SchedulerError> {
    // Example 1: independent tasks
    scheduler.run_parallel(10, |i, size| {
        let _region = region_timer!("timer one");
        println!("I am task {i} out of {size}");
    })?;

    // Example 2: nested parallel regions
    scheduler.run_parallel(6, |i, _| {
        let nested = scheduler.run_parallel(6, |j, _| {
            let _region = region_timer!("timer nested", [1.0, 0.0, 0.0]);
            println!("nested, i,j = {i},{j}");
        });
        if let Err(err) = nested {
            error!(error = %err, "nested dispatch failed");
        }
    })?;

    scheduler.run_parallel(100, |_, _| {
        let _region = region_timer!("one of 100", [0.0, 0.0, 1.0]);
    })?;

    // Example 3: dispatch overhead
    {
        let _region = region_timer!("100x10 parallel runs", [0.0, 0.0, 1.0]);
        let start = Instant::now();
        for _ in 0..100 {
            scheduler.run_parallel(10, |_, _| {})?;
        }
        info!(elapsed = ?start.elapsed(), "100 dispatches of 10 empty tasks");
    }

    {
        let _region = region_timer!("10x10x10 parallel runs", [0.0, 0.0, 1.0]);
        let inner_runs = AtomicUsize::new(0);
        for _ in 0..10 {
            scheduler.run_parallel(10, |_, _| {
                let nested = scheduler.run_parallel(10, |_, _| {
                    inner_runs.fetch_add(1, Ordering::Relaxed);
                });
                if let Err(err) = nested {
                    error!(error = %err, "nested dispatch failed");
                }
            })?;
        }
        info!(tasks = inner_runs.load(Ordering::Relaxed), "nested empty tasks executed");
    }

    scheduler.run_parallel(1000, |_, _| {
        let _region = region_timer!("timer 1000 tasks", [1.0, 0.0, 0.0]);
    })?;

    scheduler.run_parallel(100, |_, _| {
        let _region = region_timer!("timer 4", [1.0, 1.0, 0.0]);
        if let Err(err) = scheduler.run_parallel(100, |_, _| {}) {
            error!(error = %err, "nested dispatch failed");
        }
    })?;

    Ok(())
}
