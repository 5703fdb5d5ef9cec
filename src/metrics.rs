use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Optional dispatch counters for a scheduler.
#[derive(Debug)]
pub struct Metrics {
    /// Calls to `run_parallel` with a non-zero count.
    pub dispatches: AtomicU64,
    /// Indices dispatched.
    pub tasks_enqueued: AtomicU64,
    /// Tasks executed by background pool workers.
    pub tasks_run_by_workers: AtomicU64,
    /// Tasks executed by dispatching threads while they waited.
    pub tasks_run_by_callers: AtomicU64,
    /// Dispatches in which at least one work item panicked.
    pub failed_dispatches: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            dispatches: AtomicU64::new(0),
            tasks_enqueued: AtomicU64::new(0),
            tasks_run_by_workers: AtomicU64::new(0),
            tasks_run_by_callers: AtomicU64::new(0),
            failed_dispatches: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            tasks_run_by_workers: self.tasks_run_by_workers.load(Ordering::Relaxed),
            tasks_run_by_callers: self.tasks_run_by_callers.load(Ordering::Relaxed),
            failed_dispatches: self.failed_dispatches.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub dispatches: u64,
    pub tasks_enqueued: u64,
    pub tasks_run_by_workers: u64,
    pub tasks_run_by_callers: u64,
    pub failed_dispatches: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Tasks completed per second since collection started.
    pub fn tasks_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            (self.tasks_run_by_workers + self.tasks_run_by_callers) as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Approximate number of enqueued indices not yet run.
    pub fn queue_depth(&self) -> i64 {
        self.tasks_enqueued as i64
            - (self.tasks_run_by_workers + self.tasks_run_by_callers) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_metrics_creation() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot.dispatches, 0);
        assert_eq!(snapshot.tasks_enqueued, 0);
        assert_eq!(snapshot.failed_dispatches, 0);
        assert!(snapshot.elapsed_seconds >= 0.0);
    }

    #[test]
    fn test_queue_depth_and_throughput() {
        let metrics = Metrics::new();
        metrics.tasks_enqueued.fetch_add(10, Ordering::Relaxed);
        metrics.tasks_run_by_workers.fetch_add(6, Ordering::Relaxed);
        metrics.tasks_run_by_callers.fetch_add(2, Ordering::Relaxed);

        thread::sleep(Duration::from_millis(5));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queue_depth(), 2);
        assert!(snapshot.tasks_per_second() > 0.0);
    }
}
