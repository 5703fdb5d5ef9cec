//! Slice helpers for data-parallel numeric kernels built on `run_parallel`.

use crate::error::Result;
use crate::scheduler::SchedulerHandle;
use std::ops::Range;

/// Number of blocks per participating thread; more blocks smooth out imbalance.
const BLOCKS_PER_THREAD: usize = 4;

/// Returns block `index` of `0..len` split into `blocks` nearly equal parts.
pub fn split_range(index: usize, blocks: usize, len: usize) -> Range<usize> {
    let begin = index * len / blocks;
    let end = (index + 1) * len / blocks;
    begin..end
}

fn block_count(handle: &SchedulerHandle, len: usize) -> usize {
    ((handle.num_workers() + 1) * BLOCKS_PER_THREAD).min(len)
}

struct UnsafeSlice<T> {
    ptr: *mut T,
    len: usize,
}

// SAFETY: tasks only touch disjoint index ranges, and `T: Send` lets the
// elements be mutated from other threads.
unsafe impl<T: Send> Sync for UnsafeSlice<T> {}

impl<T> UnsafeSlice<T> {
    fn new(slice: &mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    /// Borrows only the elements in `range`, never the whole slice.
    ///
    /// # Safety
    /// `range` must lie within the slice and no other live reference may
    /// overlap it.
    #[allow(clippy::mut_from_ref)]
    unsafe fn range_mut<'a>(&self, range: Range<usize>) -> &'a mut [T] {
        debug_assert!(range.start <= range.end && range.end <= self.len);
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(range.start), range.len()) }
    }
}

pub trait ParallelSlice<T> {
    /// Calls `op(i, &self[i])` for every element, in parallel.
    fn par_for_each<F>(&self, handle: &SchedulerHandle, op: F) -> Result<()>
    where
        F: Fn(usize, &T) + Sync;
}

pub trait ParallelSliceMut<T> {
    /// Calls `op(i, &mut self[i])` for every element, in parallel.
    fn par_for_each_mut<F>(&mut self, handle: &SchedulerHandle, op: F) -> Result<()>
    where
        F: Fn(usize, &mut T) + Sync;

    /// Calls `op(offset, chunk)` for consecutive chunks of `chunk_size`
    /// elements (the last may be shorter), one task per chunk.
    fn par_chunks_mut<F>(&mut self, handle: &SchedulerHandle, chunk_size: usize, op: F) -> Result<()>
    where
        F: Fn(usize, &mut [T]) + Sync;
}

impl<T: Sync> ParallelSlice<T> for [T] {
    fn par_for_each<F>(&self, handle: &SchedulerHandle, op: F) -> Result<()>
    where
        F: Fn(usize, &T) + Sync,
    {
        let len = self.len();
        let blocks = block_count(handle, len);
        handle.run_parallel(blocks, |block, blocks| {
            for i in split_range(block, blocks, len) {
                op(i, &self[i]);
            }
        })
    }
}

impl<T: Send> ParallelSliceMut<T> for [T] {
    fn par_for_each_mut<F>(&mut self, handle: &SchedulerHandle, op: F) -> Result<()>
    where
        F: Fn(usize, &mut T) + Sync,
    {
        let len = self.len();
        let blocks = block_count(handle, len);
        let slice = UnsafeSlice::new(self);
        handle.run_parallel(blocks, |block, blocks| {
            let range = split_range(block, blocks, len);
            let offset = range.start;
            // SAFETY: blocks of one split never overlap.
            let items = unsafe { slice.range_mut(range) };
            for (i, item) in items.iter_mut().enumerate() {
                op(offset + i, item);
            }
        })
    }

    fn par_chunks_mut<F>(&mut self, handle: &SchedulerHandle, chunk_size: usize, op: F) -> Result<()>
    where
        F: Fn(usize, &mut [T]) + Sync,
    {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        let len = self.len();
        let chunks = len.div_ceil(chunk_size);
        let slice = UnsafeSlice::new(self);
        handle.run_parallel(chunks, |chunk, _| {
            let begin = chunk * chunk_size;
            let end = (begin + chunk_size).min(len);
            // SAFETY: chunks never overlap.
            op(begin, unsafe { slice.range_mut(begin..end) });
        })
    }
}
