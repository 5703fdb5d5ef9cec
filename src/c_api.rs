//! C ABI for embedding the scheduler in non-Rust programs.
//!
//! Every function returns a status code: [`FORKPOOL_OK`] on success,
//! a negative value for a null handle, a positive value for a scheduler error.

use crate::SchedulerHandle;
use crate::error::SchedulerError;
use std::ffi::c_void;

pub const FORKPOOL_OK: i32 = 0;
pub const FORKPOOL_NULL_HANDLE: i32 = -1;
pub const FORKPOOL_ALREADY_RUNNING: i32 = 1;
pub const FORKPOOL_NOT_RUNNING: i32 = 2;
pub const FORKPOOL_SPAWN_FAILED: i32 = 3;
pub const FORKPOOL_WORKER_PANICKED: i32 = 4;
pub const FORKPOOL_TASK_PANICKED: i32 = 5;

/// Work callback: `(index, count, user_data)`.
pub type ForkpoolWork = unsafe extern "C" fn(usize, usize, *mut c_void);

fn status(result: Result<(), SchedulerError>) -> i32 {
    match result {
        Ok(()) => FORKPOOL_OK,
        Err(SchedulerError::AlreadyRunning) => FORKPOOL_ALREADY_RUNNING,
        Err(SchedulerError::NotRunning) => FORKPOOL_NOT_RUNNING,
        Err(SchedulerError::Spawn { .. }) => FORKPOOL_SPAWN_FAILED,
        Err(SchedulerError::WorkerPanicked(_)) => FORKPOOL_WORKER_PANICKED,
        Err(SchedulerError::TaskPanicked { .. }) => FORKPOOL_TASK_PANICKED,
    }
}

struct UserData(*mut c_void);

// SAFETY: the C caller promises `user_data` may be used from the worker threads.
unsafe impl Sync for UserData {}

/// Creates a stopped scheduler.
#[unsafe(no_mangle)]
pub extern "C" fn forkpool_create() -> *mut SchedulerHandle {
    Box::into_raw(Box::new(SchedulerHandle::new()))
}

/// Destroys a scheduler, stopping its workers first if needed.
///
/// # Safety
/// `handle` must come from [`forkpool_create`] and must not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn forkpool_destroy(handle: *mut SchedulerHandle) {
    if handle.is_null() {
        return;
    }
    unsafe { drop(Box::from_raw(handle)) };
}

/// # Safety
/// `handle` must be null or a live pointer from [`forkpool_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn forkpool_start_workers(handle: *const SchedulerHandle, count: usize) -> i32 {
    match unsafe { handle.as_ref() } {
        Some(scheduler) => status(scheduler.start_workers(count)),
        None => FORKPOOL_NULL_HANDLE,
    }
}

/// # Safety
/// `handle` must be null or a live pointer from [`forkpool_create`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn forkpool_stop_workers(handle: *const SchedulerHandle) -> i32 {
    match unsafe { handle.as_ref() } {
        Some(scheduler) => status(scheduler.stop_workers()),
        None => FORKPOOL_NULL_HANDLE,
    }
}

/// Calls `work(i, count, user_data)` for every `i` in `0..count` and waits.
///
/// # Safety
/// `handle` must be null or a live pointer from [`forkpool_create`];
/// `work` must be safe to call concurrently with the given `user_data`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn forkpool_run_parallel(
    handle: *const SchedulerHandle,
    count: usize,
    work: ForkpoolWork,
    user_data: *mut c_void,
) -> i32 {
    let Some(scheduler) = (unsafe { handle.as_ref() }) else {
        return FORKPOOL_NULL_HANDLE;
    };
    let user_data = UserData(user_data);
    status(scheduler.try_run_parallel(count, |index, count| {
        let data = &user_data;
        unsafe { work(index, count, data.0) }
    }))
}
