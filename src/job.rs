//! Job definitions and the completion graph.
//!
//! A job is one cache line: a trampoline pointer, an optional parent link, an
//! outstanding-work counter and an inline payload holding the job's closure.
//! A job is complete when its counter reaches zero, which happens only after
//! its own closure ran and every child it spawned finished as well.

use std::any::Any;
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop, MaybeUninit};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::error;

use crate::config::CACHE_LINE_SIZE;
use crate::context::Context;
use crate::error::JobError;
use crate::worker::WorkerPool;

const JOB_PAYLOAD_WORDS: usize =
    (CACHE_LINE_SIZE - 3 * mem::size_of::<usize>()) / mem::size_of::<u64>();

/// Bytes available for a job's closure: one cache line minus the fixed fields.
pub const JOB_PAYLOAD_SIZE: usize = JOB_PAYLOAD_WORDS * mem::size_of::<u64>();

/// Type-erased entry point for the closure in the payload. Moves the closure
/// out and calls it with the context, or only drops it when there is none.
type JobFn = unsafe fn(NonNull<Job>, Option<&Context<'_>>);

/// A unit of work living in a worker's job arena.
///
/// Fields other than `outstanding` are written only by the arena owner while
/// the slot is idle, and read by other threads only after the job has been
/// published through a deque.
#[repr(C, align(64))]
pub struct Job {
    function: UnsafeCell<Option<JobFn>>,
    parent: UnsafeCell<Option<NonNull<Job>>>,
    outstanding: AtomicUsize,
    payload: UnsafeCell<MaybeUninit<[u64; JOB_PAYLOAD_WORDS]>>,
}

const _: () = assert!(mem::size_of::<Job>() == CACHE_LINE_SIZE);

// SAFETY: see the struct docs. Cross-thread access to the non-atomic fields is
// ordered by the deque's release/acquire handoff and by `outstanding`.
unsafe impl Send for Job {}
unsafe impl Sync for Job {}

impl Job {
    /// An idle, zeroed slot. Idle slots count as complete.
    pub(crate) fn empty() -> Self {
        Job {
            function: UnsafeCell::new(None),
            parent: UnsafeCell::new(None),
            outstanding: AtomicUsize::new(0),
            payload: UnsafeCell::new(MaybeUninit::zeroed()),
        }
    }

    /// Returns true when no unfinished work references this slot.
    pub(crate) fn is_idle(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) == 0
    }

    /// Writes a fresh job into this slot with an outstanding count of one.
    /// A closure still left in the slot is dropped first.
    ///
    /// # Safety
    ///
    /// The caller must own the slot (its arena's owner thread) and no other
    /// thread may be executing the job currently in it.
    pub(crate) unsafe fn prepare<F>(&self, parent: Option<NonNull<Job>>, work: F)
    where
        F: for<'c> FnOnce(&Context<'c>, JobHandle<'c>) + Send + 'static,
    {
        const {
            assert!(
                mem::size_of::<F>() <= JOB_PAYLOAD_SIZE,
                "job closure does not fit in the inline job payload"
            );
            assert!(
                mem::align_of::<F>() <= mem::align_of::<[u64; JOB_PAYLOAD_WORDS]>(),
                "job closure is over-aligned for the inline job payload"
            );
        }

        // SAFETY: exclusive access per the function contract; the payload is
        // large enough and aligned for `F` (checked above).
        unsafe {
            self.discard();
            *self.payload.get() = MaybeUninit::zeroed();
            self.payload.get().cast::<F>().write(work);
            *self.function.get() = Some(call_closure::<F>);
            *self.parent.get() = parent;
        }
        self.outstanding.store(1, Ordering::Release);
    }

    /// Registers one more unfinished child. Fails if the job already
    /// completed, since its slot may be recycled at any moment.
    pub(crate) fn add_child(&self) -> Result<(), JobError> {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n != 0).then(|| n + 1)
            })
            .map(drop)
            .map_err(|_| JobError::ParentCompleted)
    }

    /// Drops the closure left in the slot, if any, without running it.
    ///
    /// # Safety
    ///
    /// No other thread may be executing this job.
    unsafe fn discard(&self) {
        // SAFETY: per the function contract.
        if let Some(function) = unsafe { (*self.function.get()).take() } {
            unsafe { function(NonNull::from(self), None) };
        }
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out any concurrent executor.
        unsafe { self.discard() };
    }
}

unsafe fn call_closure<F>(job: NonNull<Job>, ctx: Option<&Context<'_>>)
where
    F: for<'c> FnOnce(&Context<'c>, JobHandle<'c>) + Send + 'static,
{
    // SAFETY: `prepare` stored an `F` in the payload and the trampoline is
    // taken out of the slot before it runs, so the closure is read once.
    let work = unsafe { job.as_ref().payload.get().cast::<F>().read() };
    if let Some(ctx) = ctx {
        // SAFETY: the job lives in an arena owned by the context's pool.
        work(ctx, unsafe { JobHandle::from_raw(job, ctx.pool()) });
    }
}

/// A copyable reference to a job in some worker's arena, used to wait on it
/// or to attach children to it.
///
/// The lifetime ties the handle to the worker pool that owns the arena memory.
/// A handle to a completed job stays valid until its slot is recycled by the
/// arena owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle<'a> {
    job: NonNull<Job>,
    pool: *const WorkerPool,
    _pool: PhantomData<&'a WorkerPool>,
}

// SAFETY: handles only expose the atomic counter; the job and the pool are Sync.
unsafe impl Send for JobHandle<'_> {}
unsafe impl Sync for JobHandle<'_> {}

impl<'a> JobHandle<'a> {
    /// # Safety
    ///
    /// `job` must point into an arena of `pool`.
    pub(crate) unsafe fn from_raw(job: NonNull<Job>, pool: &'a WorkerPool) -> Self {
        JobHandle {
            job,
            pool,
            _pool: PhantomData,
        }
    }

    pub(crate) fn as_ptr(self) -> NonNull<Job> {
        self.job
    }

    /// Returns true if the job lives in `pool`'s arenas.
    pub(crate) fn belongs_to(self, pool: &WorkerPool) -> bool {
        std::ptr::eq(self.pool, pool)
    }

    fn job(&self) -> &'a Job {
        // SAFETY: guaranteed by `from_raw`.
        unsafe { self.job.as_ref() }
    }

    /// Returns true once the job and all of its descendants have finished.
    pub fn is_complete(self) -> bool {
        self.job().outstanding() == 0
    }

    /// Number of unfinished units: the job itself (until it ran) plus
    /// unfinished children.
    pub fn outstanding(self) -> usize {
        self.job().outstanding()
    }
}

impl fmt::Debug for JobHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("job", &self.job)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Exclusive ownership of a job that is not queued anywhere: freshly created,
/// or just taken off a deque.
///
/// A pending job is consumed by [`Context::run`] or [`Context::execute`], so
/// a job can be published or executed only once. Dropping it cancels the job:
/// the closure is dropped unrun and the job counts as finished.
pub struct PendingJob<'a> {
    handle: JobHandle<'a>,
}

impl<'a> PendingJob<'a> {
    /// # Safety
    ///
    /// The caller must hold the only claim on the job: it is unfinished,
    /// queued nowhere, and not executing.
    pub(crate) unsafe fn new(handle: JobHandle<'a>) -> Self {
        PendingJob { handle }
    }

    /// A handle for waiting on the job or attaching children to it.
    pub fn handle(&self) -> JobHandle<'a> {
        self.handle
    }

    /// Gives up the claim without cancelling the job.
    pub(crate) fn into_handle(self) -> JobHandle<'a> {
        ManuallyDrop::new(self).handle
    }
}

impl fmt::Debug for PendingJob<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PendingJob").field(&self.handle).finish()
    }
}

impl Drop for PendingJob<'_> {
    fn drop(&mut self) {
        // SAFETY: the claim guarantees nobody else executes the job.
        unsafe { self.handle.job().discard() };
        finish(self.handle.as_ptr());
    }
}

/// Drops one unit of outstanding work and propagates completion to ancestors.
pub(crate) fn finish(job: NonNull<Job>) {
    let mut current = Some(job);
    while let Some(ptr) = current {
        // SAFETY: a job with outstanding work is never recycled.
        let job = unsafe { ptr.as_ref() };
        // Read the parent before decrementing: at zero the owner may reuse the slot.
        // SAFETY: the parent link is immutable while the job is live.
        let parent = unsafe { *job.parent.get() };
        if job.outstanding.fetch_sub(1, Ordering::AcqRel) != 1 {
            break;
        }
        current = parent;
    }
}

/// Runs the job's closure, then finishes it.
///
/// A panicking closure is logged and the job is still finished, so waiters
/// and ancestors are never left hanging.
pub(crate) fn execute(job: PendingJob<'_>, ctx: &Context<'_>) {
    let ptr = job.into_handle().as_ptr();
    // SAFETY: the pending job was the only claim on the job, so this thread
    // is the only one touching the trampoline.
    let function = unsafe { (*ptr.as_ref().function.get()).take() };

    if let Some(function) = function {
        // SAFETY: the trampoline matches the closure stored by `prepare`.
        let result =
            panic::catch_unwind(AssertUnwindSafe(|| unsafe { function(ptr, Some(ctx)) }));
        if let Err(payload) = result {
            error!(
                worker = ctx.worker().name(),
                panic = panic_message(payload.as_ref()),
                "job panicked"
            );
            #[cfg(feature = "metrics")]
            ctx.worker()
                .metrics()
                .jobs_panicked
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    finish(ptr);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn noop(_: &Context<'_>, _: JobHandle<'_>) {}

    #[test]
    fn test_job_fills_one_cache_line() {
        assert_eq!(mem::size_of::<Job>(), CACHE_LINE_SIZE);
        assert_eq!(mem::align_of::<Job>(), CACHE_LINE_SIZE);
        assert!(JOB_PAYLOAD_SIZE >= 4 * mem::size_of::<usize>());
    }

    #[test]
    fn test_empty_slot_is_idle() {
        let job = Job::empty();
        assert!(job.is_idle());
        unsafe { job.prepare(None, noop) };
        assert!(!job.is_idle());
        assert_eq!(job.outstanding(), 1);
    }

    #[test]
    fn test_finish_propagates_to_parent() {
        let root = Job::empty();
        let child = Job::empty();
        let grandchild = Job::empty();

        unsafe {
            root.prepare(None, noop);
            root.add_child().unwrap();
            child.prepare(Some(NonNull::from(&root)), noop);
            child.add_child().unwrap();
            grandchild.prepare(Some(NonNull::from(&child)), noop);
        }

        // Root and child have run their own closures.
        finish(NonNull::from(&root));
        finish(NonNull::from(&child));
        assert_eq!(root.outstanding(), 1);
        assert_eq!(child.outstanding(), 1);

        finish(NonNull::from(&grandchild));
        assert!(grandchild.is_idle());
        assert!(child.is_idle());
        assert!(root.is_idle());
    }

    #[test]
    fn test_finish_stops_at_unfinished_ancestor() {
        let root = Job::empty();
        let left = Job::empty();
        let right = Job::empty();

        unsafe {
            root.prepare(None, noop);
            root.add_child().unwrap();
            left.prepare(Some(NonNull::from(&root)), noop);
            root.add_child().unwrap();
            right.prepare(Some(NonNull::from(&root)), noop);
        }

        finish(NonNull::from(&root));
        finish(NonNull::from(&left));
        assert_eq!(root.outstanding(), 1);

        finish(NonNull::from(&right));
        assert_eq!(root.outstanding(), 0);
    }

    #[test]
    fn test_add_child_rejects_completed_parent() {
        let root = Job::empty();
        assert_eq!(root.add_child(), Err(JobError::ParentCompleted));

        unsafe { root.prepare(None, noop) };
        root.add_child().unwrap();
        assert_eq!(root.outstanding(), 2);
    }

    #[test]
    fn test_unrun_closure_dropped_with_slot() {
        let state = Arc::new(());
        let job = Job::empty();
        let captured = state.clone();
        unsafe { job.prepare(None, move |_, _| drop(captured)) };
        assert_eq!(Arc::strong_count(&state), 2);

        drop(job);
        assert_eq!(Arc::strong_count(&state), 1);
    }

    #[test]
    fn test_prepare_drops_leftover_closure() {
        let state = Arc::new(());
        let job = Job::empty();
        let captured = state.clone();
        unsafe { job.prepare(None, move |_, _| drop(captured)) };
        finish(NonNull::from(&job));

        unsafe { job.prepare(None, noop) };
        assert_eq!(Arc::strong_count(&state), 1);
    }

    #[test]
    fn test_panic_message_formats() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let s: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(s.as_ref()), "bang");
        let s: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(s.as_ref()), "<non-string panic payload>");
    }
}
