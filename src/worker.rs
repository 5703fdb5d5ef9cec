//! Worker thread implementation.
//!
//! Worker threads poll the shared queue and execute whatever task they get,
//! regardless of which dispatch it belongs to. When the pool starter had an
//! active TimeLine, each worker records into its own TimeLine and hands it
//! over to the starter's on exit.

use crate::config::PoolConfig;
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crate::error::SchedulerError;
use crate::queue::WorkQueue;
use crate::task::Task;
use crate::timeline::{self, MergeTarget, TimeLine};
use crossbeam::utils::Backoff;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Lifecycle of a worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PoolState::Running,
            2 => PoolState::Stopping,
            _ => PoolState::Stopped,
        }
    }
}

/// State shared by the pool threads and every dispatching thread.
pub(crate) struct PoolShared {
    pub(crate) queue: WorkQueue<Task>,
    stop: AtomicBool,
    running: AtomicUsize,
    state: AtomicU8,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Metrics,
}

impl PoolShared {
    pub(crate) fn new() -> Self {
        PoolShared {
            queue: WorkQueue::new(),
            stop: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            state: AtomicU8::new(PoolState::Stopped as u8),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        }
    }

    pub(crate) fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PoolState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Number of pool threads that have not finished their exit sequence.
    pub(crate) fn live_workers(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }
}

/// Decrements the live-worker count when a worker thread finishes, even by unwinding.
struct LiveGuard<'a>(&'a AtomicUsize);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

/// A background thread executing tasks from the shared queue.
pub struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns worker `id`. The caller has already counted it as live.
    fn spawn(
        id: usize,
        shared: Arc<PoolShared>,
        config: &PoolConfig,
        merge_target: Option<MergeTarget>,
    ) -> std::io::Result<Self> {
        let pinning = config.pinning;
        let capacity = config.events_capacity;

        let handle = thread::Builder::new()
            .name(format!("{}-{}", config.thread_name, id))
            .spawn(move || {
                let _live = LiveGuard(&shared.running);

                if let Some(core_ids) = core_affinity::get_core_ids() {
                    if let Some(core) = pinning.core_for(id, &core_ids) {
                        core_affinity::set_for_current(core);
                    }
                }

                if merge_target.is_some() {
                    timeline::install(TimeLine::with_capacity(capacity));
                }
                debug!(worker = id, "worker started");

                Worker::run_loop(&shared);

                if let (Some(target), Some(tl)) = (merge_target, timeline::take()) {
                    target.merge(tl);
                }
                debug!(worker = id, "worker exited");
            })?;

        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    /// Dequeue-execute loop, left once the stop flag is seen.
    fn run_loop(shared: &PoolShared) {
        let backoff = Backoff::new();
        loop {
            if shared.stop.load(Ordering::Acquire) {
                break;
            }

            match shared.queue.try_dequeue() {
                Some(task) => {
                    if task.execute() {
                        #[cfg(feature = "metrics")]
                        shared
                            .metrics
                            .tasks_run_by_workers
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    backoff.reset();
                }
                // Spins first, then yields the thread.
                None => backoff.snooze(),
            }
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Waits for the worker thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.join()
        } else {
            Ok(())
        }
    }
}

/// The set of background threads of one `start_workers` call.
pub(crate) struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Clears the stop flag and spawns `count` workers.
    ///
    /// If a spawn fails the already started workers are stopped again.
    pub(crate) fn start(
        shared: &Arc<PoolShared>,
        count: usize,
        config: &PoolConfig,
        merge_target: Option<MergeTarget>,
    ) -> Result<Self, SchedulerError> {
        shared.stop.store(false, Ordering::Release);
        let mut pool = WorkerPool {
            workers: Vec::with_capacity(count),
        };

        for id in 0..count {
            shared.running.fetch_add(1, Ordering::AcqRel);
            match Worker::spawn(id, Arc::clone(shared), config, merge_target.clone()) {
                Ok(worker) => pool.workers.push(worker),
                Err(source) => {
                    shared.running.fetch_sub(1, Ordering::AcqRel);
                    let _ = pool.stop(shared);
                    return Err(SchedulerError::Spawn { index: id, source });
                }
            }
        }

        Ok(pool)
    }

    pub(crate) fn size(&self) -> usize {
        self.workers.len()
    }

    /// Sets the stop flag and waits until every worker has exited.
    ///
    /// Returns the number of workers that terminated by panicking.
    pub(crate) fn stop(self, shared: &PoolShared) -> Result<(), usize> {
        shared.stop.store(true, Ordering::Release);

        let backoff = Backoff::new();
        while shared.running.load(Ordering::Acquire) > 0 {
            backoff.snooze();
        }

        let mut failed_count = 0;
        for worker in self.workers {
            let worker_id = worker.id();
            if worker.join().is_err() {
                failed_count += 1;
                tracing::error!(worker = worker_id, "worker panicked during execution");
            }
        }

        if failed_count > 0 {
            Err(failed_count)
        } else {
            Ok(())
        }
    }
}
