use forkpool::{SchedulerError, SchedulerHandle};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_panic_is_resumed_after_all_tasks_finish() {
    let scheduler = SchedulerHandle::new();
    scheduler.start_workers(3).unwrap();

    let executed = AtomicUsize::new(0);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _ = scheduler.run_parallel(50, |i, _| {
            executed.fetch_add(1, Ordering::SeqCst);
            if i == 7 {
                panic!("Intentional panic for testing");
            }
        });
    }));

    let payload = result.expect_err("panic should reach the caller");
    assert_eq!(
        payload.downcast_ref::<&str>().copied(),
        Some("Intentional panic for testing")
    );
    // Every item ran even though one of them failed.
    assert_eq!(executed.load(Ordering::SeqCst), 50);

    scheduler.stop_workers().expect("Shutdown failed");
}

#[test]
fn test_try_run_parallel_reports_failure() {
    let scheduler = SchedulerHandle::new();
    scheduler.start_workers(2).unwrap();

    let err = scheduler
        .try_run_parallel(10, |i, _| {
            if i == 3 {
                panic!("Boom at {i}");
            }
        })
        .unwrap_err();

    match err {
        SchedulerError::TaskPanicked { index, message } => {
            assert_eq!(index, 3);
            assert_eq!(message, "Boom at 3");
        }
        other => panic!("unexpected error: {other}"),
    }

    scheduler.stop_workers().expect("Shutdown failed");
}

#[test]
fn test_pool_recovers_after_panic() {
    let scheduler = SchedulerHandle::new();
    scheduler.start_workers(1).unwrap();

    // 1. Submit panicking work
    assert!(scheduler.try_run_parallel(4, |_, _| panic!("Boom")).is_err());

    // 2. Normal work must still complete on the same pool
    let executed = AtomicUsize::new(0);
    scheduler
        .run_parallel(100, |_, _| {
            executed.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(executed.load(Ordering::SeqCst), 100);

    scheduler.stop_workers().expect("Shutdown failed");
    assert_eq!(scheduler.live_workers(), 0);
}

#[test]
fn test_nested_panic_propagates_to_outer_caller() {
    let scheduler = SchedulerHandle::new();
    scheduler.start_workers(2).unwrap();

    let err = scheduler
        .try_run_parallel(4, |i, _| {
            scheduler
                .run_parallel(4, |j, _| {
                    if i == 2 && j == 1 {
                        panic!("inner failure");
                    }
                })
                .unwrap();
        })
        .unwrap_err();

    match err {
        SchedulerError::TaskPanicked { index, message } => {
            assert_eq!(index, 2);
            assert_eq!(message, "inner failure");
        }
        other => panic!("unexpected error: {other}"),
    }

    scheduler.stop_workers().expect("Shutdown failed");
}
