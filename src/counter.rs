//! Completion tracking for a single fork-join dispatch.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// A panic payload captured from a work item, tagged with its index.
pub struct CapturedPanic {
    pub index: usize,
    pub payload: Box<dyn Any + Send + 'static>,
}

impl CapturedPanic {
    /// Best-effort text of the panic message.
    pub fn message(&self) -> String {
        if let Some(s) = self.payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = self.payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        }
    }
}

impl std::fmt::Debug for CapturedPanic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedPanic")
            .field("index", &self.index)
            .field("message", &self.message())
            .finish()
    }
}

/// Counts finished work items of one dispatch up towards its group size.
///
/// Workers increment with `Release` after the work item has returned (or
/// unwound), and the dispatching thread polls with `Acquire`, so observing
/// `is_complete()` means every side effect of every item is visible.
pub struct Completion {
    done: AtomicUsize,
    target: usize,
    failure: Mutex<Option<CapturedPanic>>,
}

impl Completion {
    pub fn new(target: usize) -> Self {
        Completion {
            done: AtomicUsize::new(0),
            target,
            failure: Mutex::new(None),
        }
    }

    /// Marks one work item as finished.
    ///
    /// This must be the last access to `self` made on behalf of that item:
    /// once the final increment lands the owner may free the counter.
    pub fn complete_one(&self) {
        self.done.fetch_add(1, Ordering::Release);
    }

    /// Stores the panic of work item `index` unless an earlier one was kept.
    pub fn record_panic(&self, index: usize, payload: Box<dyn Any + Send + 'static>) {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(CapturedPanic { index, payload });
        }
    }

    pub fn completed(&self) -> usize {
        self.done.load(Ordering::Acquire)
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn is_complete(&self) -> bool {
        self.completed() >= self.target
    }

    /// Takes the captured failure, if any.
    pub fn take_panic(&self) -> Option<CapturedPanic> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
