//! Task groups and their queued descriptors.
//!
//! A dispatch creates one [`TaskGroup`] holding the borrowed work function,
//! one claim flag per index and the completion counter. The group's
//! [`Task`] descriptors go to the shared queue so other threads can help,
//! while the dispatching thread walks its own indices directly. Whoever
//! claims an index first runs it; a descriptor whose index was already
//! claimed does nothing.
//!
//! The work function lives on the dispatching thread's stack. It is only
//! dereferenced for a freshly claimed index, and the dispatcher does not
//! return before every index has completed.

use crate::counter::{CapturedPanic, Completion};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Work function signature: `(index, group_size)`.
pub type WorkFn<'a> = dyn Fn(usize, usize) + Sync + 'a;

/// Shared state of one dispatch.
pub struct TaskGroup {
    work: *const WorkFn<'static>,
    claimed: Box<[AtomicBool]>,
    cursor: AtomicUsize,
    completion: Completion,
}

// SAFETY: the work function is `Sync`; it is only called for claimed
// indices, while the dispatching thread keeps it alive (see `TaskGroup::new`).
unsafe impl Send for TaskGroup {}
unsafe impl Sync for TaskGroup {}

impl TaskGroup {
    /// Creates the group for indices `0..size` of `work`.
    ///
    /// # Safety
    /// `work` must stay alive until [`is_complete`](Self::is_complete)
    /// returns true. Descriptors may outlive that point; they never touch
    /// `work` once their index has been claimed.
    pub unsafe fn new(size: usize, work: &WorkFn<'_>) -> Arc<Self> {
        let work: *const WorkFn<'_> = work;
        // SAFETY: only the trait-object lifetime is erased; the caller
        // guarantees the referent outlives every claimed index.
        let work: *const WorkFn<'static> = unsafe { std::mem::transmute(work) };
        Arc::new(TaskGroup {
            work,
            claimed: (0..size).map(|_| AtomicBool::new(false)).collect(),
            cursor: AtomicUsize::new(0),
            completion: Completion::new(size),
        })
    }

    pub fn size(&self) -> usize {
        self.claimed.len()
    }

    /// One descriptor per index.
    pub fn tasks(self: &Arc<Self>) -> impl Iterator<Item = Task> + '_ {
        (0..self.size()).map(move |index| Task {
            group: Arc::clone(self),
            index,
        })
    }

    /// Runs the next index, in order, that nobody has claimed yet.
    ///
    /// Returns `false` once the walk has passed every index.
    pub fn run_next(&self) -> bool {
        loop {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed);
            if index >= self.size() {
                self.cursor.store(self.size(), Ordering::Relaxed);
                return false;
            }
            if self.run_index(index) {
                return true;
            }
        }
    }

    /// Runs `index` unless it was claimed already.
    ///
    /// A panic escaping the work function is captured into the group; the
    /// index counts as completed either way.
    fn run_index(&self, index: usize) -> bool {
        if self.claimed[index].swap(true, Ordering::AcqRel) {
            return false;
        }

        // SAFETY: `index` is claimed and not yet completed, so the dispatcher
        // is still waiting and `work` is alive.
        let work = unsafe { &*self.work };
        let size = self.size();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| work(index, size))) {
            self.completion.record_panic(index, payload);
        }
        self.completion.complete_one();
        true
    }

    /// Whether the walk of [`run_next`](Self::run_next) has passed every index.
    pub fn is_exhausted(&self) -> bool {
        self.cursor.load(Ordering::Relaxed) >= self.size()
    }

    pub fn is_complete(&self) -> bool {
        self.completion.is_complete()
    }

    pub fn take_panic(&self) -> Option<CapturedPanic> {
        self.completion.take_panic()
    }
}

/// Queued descriptor for one index of a group.
pub struct Task {
    group: Arc<TaskGroup>,
    index: usize,
}

impl Task {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn group_size(&self) -> usize {
        self.group.size()
    }

    /// Runs this descriptor's index unless another thread already did.
    ///
    /// Returns whether the work function was invoked.
    pub fn execute(self) -> bool {
        self.group.run_index(self.index)
    }
}
