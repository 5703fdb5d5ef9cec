//! Error types for the scheduler and the trace writer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`SchedulerHandle`](crate::SchedulerHandle) operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `start_workers` was called on a pool that is not stopped.
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// The pool must be started before dispatching or stopping.
    #[error("worker pool is not running")]
    NotRunning,

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    /// One or more worker threads terminated abnormally.
    #[error("{0} worker thread(s) panicked")]
    WorkerPanicked(usize),

    /// A work item panicked. Only the first failure of a dispatch is kept.
    #[error("task {index} panicked: {message}")]
    TaskPanicked { index: usize, message: String },
}

/// Errors produced while serializing a [`TimeLine`](crate::TimeLine).
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("cannot write trace file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;
