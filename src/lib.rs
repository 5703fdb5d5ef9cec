//! # forkpool - Fork-Join Scheduler with Paje Tracing
//!
//! A small fork-join task scheduler for numeric kernels, paired with a
//! per-thread event tracer that exports Paje traces.
//!
//! ## Architecture
//!
//! - **Work Queue**: lock-free MPMC queue of task descriptors
//! - **Worker Pool**: fixed set of threads draining the queue until stopped
//! - **Dispatcher**: `run_parallel(n, f)` enqueues `n` tasks and makes the
//!   calling thread drain the queue until its own tasks are done, which keeps
//!   nested dispatch from inside a task deadlock-free
//! - **Timers**: named timers and scope guards recording start/stop events
//! - **TimeLines**: per-thread event buffers merged into the pool starter's
//!   TimeLine when workers exit, written out as a Paje trace
//!
//! ## Example
//!
//! ```no_run
//! use forkpool::{SchedulerHandle, TraceSession, region_timer};
//!
//! let session = TraceSession::start("demo.trace");
//! let scheduler = SchedulerHandle::new();
//! scheduler.start_workers(3).unwrap();
//!
//! scheduler
//!     .run_parallel(6, |i, _| {
//!         scheduler
//!             .run_parallel(6, |j, _| {
//!                 let _region = region_timer!("nested", [1.0, 0.0, 0.0]);
//!                 println!("nested {i},{j}");
//!             })
//!             .unwrap();
//!     })
//!     .unwrap();
//!
//! scheduler.stop_workers().unwrap();
//! session.finish().unwrap();
//! ```

pub mod c_api;
pub mod config;
pub mod counter;
pub mod error;
pub mod iter;
#[cfg(feature = "metrics")]
pub mod metrics;
mod paje;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod timeline;
pub mod timer;
pub mod worker;

pub use config::{PinningStrategy, PoolConfig};
pub use error::{SchedulerError, TraceError};
pub use iter::{ParallelSlice, ParallelSliceMut};
pub use queue::WorkQueue;
pub use scheduler::SchedulerHandle;
pub use timeline::{Event, EventKind, TimeLine, TraceSession};
pub use timer::{RegionTimer, Timer};
pub use worker::PoolState;
