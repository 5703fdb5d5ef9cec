//! Lock-free multi-producer/multi-consumer work queue.
//!
//! The queue knows nothing about threads or tasks; it is a thin layer over
//! `crossbeam`'s injector that hides the steal protocol behind an
//! enqueue/try-dequeue contract.

use crossbeam::deque::{Injector, Steal};

/// Unbounded MPMC queue. Every enqueued item is handed to exactly one consumer.
pub struct WorkQueue<T> {
    injector: Injector<T>,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        WorkQueue {
            injector: Injector::new(),
        }
    }

    /// Pushes a single item. Never blocks.
    pub fn enqueue(&self, item: T) {
        self.injector.push(item);
    }

    /// Pushes a run of items; observably the same as enqueueing them one by one.
    pub fn enqueue_bulk<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        for item in items {
            self.injector.push(item);
        }
    }

    /// Removes one item, or returns `None` if the queue looked empty.
    ///
    /// Contention (`Steal::Retry`) is retried here and never reported as empty.
    pub fn try_dequeue(&self) -> Option<T> {
        loop {
            match self.injector.steal() {
                Steal::Success(item) => return Some(item),
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
    }

    /// Advisory: may be stale by the time the caller looks at it.
    pub fn is_empty(&self) -> bool {
        self.injector.is_empty()
    }

    /// Advisory item count.
    pub fn len(&self) -> usize {
        self.injector.len()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
