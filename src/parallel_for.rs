//! Recursive data-parallel loops on top of the job graph.
//!
//! A parallel-for is a single root job carrying the whole range. While the
//! splitter asks for it, a job halves its range into two child jobs and runs
//! them; otherwise it calls the user function on its range directly. Every
//! split is a child of the job that produced it, so waiting on the root waits
//! for the whole tree.

use std::mem;
use std::slice;

use tracing::warn;

use crate::context::Context;
use crate::error::JobError;
use crate::job::{JobHandle, PendingJob};

/// Decides whether a range is still too large to process in one job.
pub trait Splitter: Copy + Send + Sync + 'static {
    /// Returns true if `count` elements of `T` should be split further.
    fn split<T>(&self, count: usize) -> bool;
}

/// Splits while the range holds more than `count` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountSplitter {
    count: usize,
}

impl CountSplitter {
    pub fn new(count: usize) -> Self {
        CountSplitter { count }
    }
}

impl Splitter for CountSplitter {
    #[inline]
    fn split<T>(&self, count: usize) -> bool {
        count > self.count
    }
}

/// Splits while the range spans more than `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSizeSplitter {
    size: usize,
}

impl DataSizeSplitter {
    pub fn new(size: usize) -> Self {
        DataSizeSplitter { size }
    }
}

impl Splitter for DataSizeSplitter {
    #[inline]
    fn split<T>(&self, count: usize) -> bool {
        count.saturating_mul(mem::size_of::<T>()) > self.size
    }
}

/// Pointer wrapper for moving a sub-range into another worker's job.
struct SendPtr<T>(*mut T);

// SAFETY: sub-ranges handed to different jobs never overlap.
unsafe impl<T: Send> Send for SendPtr<T> {}

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SendPtr<T> {}

/// One split of the range, embedded in a job's payload.
struct RangeJob<T, F, S> {
    data: SendPtr<T>,
    count: usize,
    function: F,
    splitter: S,
}

impl<T, F: Copy, S: Copy> Clone for RangeJob<T, F, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, F: Copy, S: Copy> Copy for RangeJob<T, F, S> {}

impl<T, F, S> RangeJob<T, F, S>
where
    T: Send + 'static,
    F: Fn(&mut [T]) + Copy + Send + Sync + 'static,
    S: Splitter,
{
    fn sub_range(self, offset: usize, count: usize) -> Self {
        RangeJob {
            // SAFETY: offset + count stays within the parent range.
            data: SendPtr(unsafe { self.data.0.add(offset) }),
            count,
            ..self
        }
    }

    fn run_leaf(self) {
        // SAFETY: the range is valid and exclusively ours per `parallel_for`.
        let items = unsafe { slice::from_raw_parts_mut(self.data.0, self.count) };
        (self.function)(items);
    }

    fn execute<'c>(self, ctx: &Context<'c>, job: JobHandle<'c>) {
        // A single element cannot be halved any further.
        if self.count < 2 || !self.splitter.split::<T>(self.count) {
            self.run_leaf();
            return;
        }

        let left_count = self.count / 2;
        let halves = [
            self.sub_range(0, left_count),
            self.sub_range(left_count, self.count - left_count),
        ];

        for half in halves {
            let spawned = ctx
                .create_job_as_child(job, move |ctx, job| half.execute(ctx, job))
                .and_then(|child| ctx.run_or_execute(child));
            if let Err(err) = spawned {
                warn!(%err, count = half.count, "parallel_for: processing range inline");
                half.run_leaf();
            }
        }
    }
}

impl<'a> Context<'a> {
    /// Creates (but does not run) the root job of a parallel loop over
    /// `count` elements starting at `data`. Dropping the returned job
    /// cancels the loop.
    ///
    /// The closure of every split must fit in the inline job payload, which
    /// limits `F` and `S` to a few words.
    ///
    /// # Safety
    ///
    /// `data..data + count` must be valid for writes and not accessed by
    /// anything else until the returned job has completed.
    pub unsafe fn parallel_for<T, F, S>(
        &self,
        data: *mut T,
        count: usize,
        function: F,
        splitter: S,
    ) -> Result<PendingJob<'a>, JobError>
    where
        T: Send + 'static,
        F: Fn(&mut [T]) + Copy + Send + Sync + 'static,
        S: Splitter,
    {
        let root = RangeJob {
            data: SendPtr(data),
            count,
            function,
            splitter,
        };
        self.create_job(move |ctx, job| root.execute(ctx, job))
    }

    /// Runs `function` over disjoint sub-slices of `data` in parallel and
    /// returns once every element has been processed.
    ///
    /// Panics inside `function` are logged by the executing worker; the
    /// remaining ranges still run.
    pub fn parallel_for_slice<T, F, S>(
        &self,
        data: &mut [T],
        function: F,
        splitter: S,
    ) -> Result<(), JobError>
    where
        T: Send + 'static,
        F: Fn(&mut [T]) + Copy + Send + Sync + 'static,
        S: Splitter,
    {
        // SAFETY: `data` stays mutably borrowed until the whole tree completed.
        let root = unsafe { self.parallel_for(data.as_mut_ptr(), data.len(), function, splitter)? };
        let root = self.run_or_execute(root)?;
        self.wait(root);
        Ok(())
    }
}
