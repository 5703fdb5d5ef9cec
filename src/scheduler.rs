//! Fork-join dispatch.
//!
//! [`SchedulerHandle`] owns the shared queue and the worker pool. A call to
//! [`SchedulerHandle::run_parallel`] enqueues one task per index and then
//! turns the calling thread into an extra worker until its own tasks have all
//! completed. The caller runs indices of its own dispatch first and only then
//! helps with other dispatches from the shared queue. Because the wait
//! condition is local to the call, a work item can dispatch again from inside
//! the pool without blocking on a thread that is waiting for it.
//!
//! Helping may start an outer-level task on top of a waiting nested call, so
//! it stops at [`MAX_HELP_DEPTH`] nested waits per thread; deeper callers only
//! run their own indices.

use crate::config::PoolConfig;
use crate::counter::CapturedPanic;
use crate::error::{Result, SchedulerError};
#[cfg(feature = "metrics")]
use crate::metrics::MetricsSnapshot;
use crate::task::{TaskGroup, WorkFn};
use crate::timeline;
use crate::worker::{PoolShared, PoolState, WorkerPool};
use crossbeam::utils::Backoff;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;
use std::cell::Cell;
use std::panic;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Dispatch nesting level above which a waiting caller stops taking work
/// from other dispatches. Below it, every wait may start one more nested
/// dispatch on the same stack.
pub const MAX_HELP_DEPTH: usize = 16;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Number of `run_parallel` calls currently waiting on the calling thread.
pub fn dispatch_depth() -> usize {
    DEPTH.with(Cell::get)
}

struct DepthGuard {
    level: usize,
}

impl DepthGuard {
    fn enter() -> Self {
        let level = DEPTH.with(|d| {
            let level = d.get() + 1;
            d.set(level);
            level
        });
        DepthGuard { level }
    }

    fn may_help(&self) -> bool {
        self.level < MAX_HELP_DEPTH
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(self.level - 1));
    }
}

/// Handle to one worker pool and its work queue.
///
/// Lifecycle calls (`start_workers`, `stop_workers`) are meant to come from a
/// single controlling thread; `run_parallel` may be called from any number of
/// threads at once, including from inside work items.
pub struct SchedulerHandle {
    shared: Arc<PoolShared>,
    pool: Mutex<Option<WorkerPool>>,
    config: PoolConfig,
}

impl SchedulerHandle {
    /// Creates a stopped scheduler with the default configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use forkpool::SchedulerHandle;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    ///
    /// let scheduler = SchedulerHandle::new();
    /// scheduler.start_workers(3).unwrap();
    ///
    /// let hits = AtomicUsize::new(0);
    /// scheduler
    ///     .run_parallel(10, |_i, _n| {
    ///         hits.fetch_add(1, Ordering::Relaxed);
    ///     })
    ///     .unwrap();
    /// assert_eq!(hits.load(Ordering::Relaxed), 10);
    ///
    /// scheduler.stop_workers().unwrap();
    /// ```
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        SchedulerHandle {
            shared: Arc::new(PoolShared::new()),
            pool: Mutex::new(None),
            config,
        }
    }

    /// Background worker count that, together with the dispatching thread,
    /// uses every logical CPU.
    pub fn default_worker_count() -> usize {
        num_cpus::get().saturating_sub(1)
    }

    /// Creates a scheduler and starts [`default_worker_count`](Self::default_worker_count)
    /// workers.
    pub fn with_default_threads() -> Result<Self> {
        let scheduler = Self::new();
        scheduler.start_workers(Self::default_worker_count())?;
        Ok(scheduler)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Spawns `count` background workers.
    ///
    /// If the calling thread has an active TimeLine, every worker records
    /// into its own TimeLine and merges it into the caller's when it exits.
    /// With `count == 0` the pool is running but dispatching threads execute
    /// every task themselves.
    pub fn start_workers(&self, count: usize) -> Result<()> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.state() != PoolState::Stopped {
            return Err(SchedulerError::AlreadyRunning);
        }

        let workers =
            WorkerPool::start(&self.shared, count, &self.config, timeline::merge_target())?;
        *pool = Some(workers);
        self.shared.set_state(PoolState::Running);
        debug!(workers = count, "worker pool started");
        Ok(())
    }

    /// Signals the workers to stop and waits until all of them have exited.
    ///
    /// Must not be called while a dispatch is still in flight on another thread.
    pub fn stop_workers(&self) -> Result<()> {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.state() != PoolState::Running {
            return Err(SchedulerError::NotRunning);
        }

        self.shared.set_state(PoolState::Stopping);
        let result = match pool.take() {
            Some(workers) => workers.stop(&self.shared),
            None => Ok(()),
        };
        self.shared.set_state(PoolState::Stopped);
        debug!("worker pool stopped");

        result.map_err(SchedulerError::WorkerPanicked)
    }

    pub fn state(&self) -> PoolState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Number of background workers of the current pool.
    pub fn num_workers(&self) -> usize {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, WorkerPool::size)
    }

    /// Number of pool threads that are still alive.
    pub fn live_workers(&self) -> usize {
        self.shared.live_workers()
    }

    /// Runs `work(i, count)` once for every `i` in `0..count` and returns when
    /// all invocations have returned.
    ///
    /// The calling thread executes queued tasks while it waits. If a work item
    /// panics, the remaining items still run, and the first panic is resumed
    /// on the caller once every item has finished.
    pub fn run_parallel<F>(&self, count: usize, work: F) -> Result<()>
    where
        F: Fn(usize, usize) + Sync,
    {
        match self.dispatch(count, &work)? {
            Some(failure) => panic::resume_unwind(failure.payload),
            None => Ok(()),
        }
    }

    /// Like [`run_parallel`](Self::run_parallel), but reports a panicking
    /// work item as [`SchedulerError::TaskPanicked`].
    pub fn try_run_parallel<F>(&self, count: usize, work: F) -> Result<()>
    where
        F: Fn(usize, usize) + Sync,
    {
        match self.dispatch(count, &work)? {
            Some(failure) => Err(SchedulerError::TaskPanicked {
                index: failure.index,
                message: failure.message(),
            }),
            None => Ok(()),
        }
    }

    fn dispatch(&self, count: usize, work: &WorkFn<'_>) -> Result<Option<CapturedPanic>> {
        if count == 0 {
            return Ok(None);
        }
        if self.shared.state() != PoolState::Running {
            return Err(SchedulerError::NotRunning);
        }

        // SAFETY: this function does not return before the group is
        // complete, so `work` outlives every claimed index.
        let group = unsafe { TaskGroup::new(count, work) };
        // Without background workers the caller runs every index itself and
        // nobody would ever drain the descriptors.
        if self.shared.live_workers() > 0 {
            self.shared.queue.enqueue_bulk(group.tasks());
        }

        #[cfg(feature = "metrics")]
        {
            let metrics = &self.shared.metrics;
            metrics.dispatches.fetch_add(1, Ordering::Relaxed);
            metrics.tasks_enqueued.fetch_add(count as u64, Ordering::Relaxed);
        }

        let depth = DepthGuard::enter();
        let backoff = Backoff::new();
        while !group.is_complete() {
            // Own indices first, so a nested caller finishes its own group
            // instead of starting more outer-level work.
            let ran = group.run_next() || (depth.may_help() && self.help_one());
            if ran {
                #[cfg(feature = "metrics")]
                self.shared
                    .metrics
                    .tasks_run_by_callers
                    .fetch_add(1, Ordering::Relaxed);
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
        drop(depth);

        let failure = group.take_panic();
        #[cfg(feature = "metrics")]
        if failure.is_some() {
            self.shared
                .metrics
                .failed_dispatches
                .fetch_add(1, Ordering::Relaxed);
        }
        Ok(failure)
    }

    /// Runs one task of any dispatch from the shared queue.
    fn help_one(&self) -> bool {
        // Descriptors whose index was already claimed are discarded.
        while let Some(task) = self.shared.queue.try_dequeue() {
            if task.execute() {
                return true;
            }
        }
        false
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl Default for SchedulerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("scheduler dropped while running; stopping workers");
            if let Err(err) = self.stop_workers() {
                warn!(error = %err, "worker pool did not stop cleanly");
            }
        }
    }
}
