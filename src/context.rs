//! Per-thread access to the job system.
//!
//! A [`Context`] is the proof that the current thread drives a particular
//! worker: it is the only way to allocate from that worker's arena and to
//! push to or pop from its deque. Contexts are neither `Send` nor `Sync`.
//! Jobs receive the context of whichever worker executes them.

use std::hint;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::thread;

use crossbeam::utils::Backoff;
use rand::Rng;
use tracing::{trace, warn};

use crate::config::IdleStrategy;
use crate::error::JobError;
use crate::job::{self, Job, JobHandle, PendingJob};
use crate::queue::JobQueue;
use crate::worker::{Worker, WorkerPool};

/// Scheduling access for the thread currently driving one worker.
pub struct Context<'a> {
    pool: &'a WorkerPool,
    index: usize,
    backoff: Backoff,
    _not_send: PhantomData<*const ()>,
}

impl<'a> Context<'a> {
    /// The worker at `index` must already be claimed by the calling thread.
    pub(crate) fn bind(pool: &'a WorkerPool, index: usize) -> Self {
        Context {
            pool,
            index,
            backoff: Backoff::new(),
            _not_send: PhantomData,
        }
    }

    /// The worker this context drives.
    pub fn worker(&self) -> &'a Worker {
        &self.pool.workers()[self.index]
    }

    /// Index of the driven worker in the pool.
    pub fn worker_index(&self) -> usize {
        self.index
    }

    /// The worker registry.
    pub fn pool(&self) -> &'a WorkerPool {
        self.pool
    }

    /// Creates a root job with an outstanding count of one.
    ///
    /// The closure is stored inline in the job and must fit in
    /// [`JOB_PAYLOAD_SIZE`](crate::job::JOB_PAYLOAD_SIZE) bytes; larger
    /// closures fail to compile.
    pub fn create_job<F>(&self, work: F) -> Result<PendingJob<'a>, JobError>
    where
        F: for<'c> FnOnce(&Context<'c>, JobHandle<'c>) + Send + 'static,
    {
        let job = self.worker().arena().allocate()?;
        // SAFETY: this thread owns the arena and `allocate` returned an idle
        // slot that stays valid for the pool's lifetime.
        unsafe {
            job.as_ref().prepare(None, work);
            Ok(PendingJob::new(JobHandle::from_raw(job, self.pool)))
        }
    }

    /// Creates a job whose completion is counted towards `parent`.
    ///
    /// The parent's count is raised before the child exists, so the parent
    /// can never be observed complete while a child is being attached.
    pub fn create_job_as_child<F>(
        &self,
        parent: JobHandle<'a>,
        work: F,
    ) -> Result<PendingJob<'a>, JobError>
    where
        F: for<'c> FnOnce(&Context<'c>, JobHandle<'c>) + Send + 'static,
    {
        if !parent.belongs_to(self.pool) {
            return Err(JobError::ForeignJob);
        }
        let parent = parent.as_ptr();
        // SAFETY: the slot belongs to this pool, so it is live memory.
        unsafe { parent.as_ref().add_child()? };

        let job = match self.worker().arena().allocate() {
            Ok(job) => job,
            Err(err) => {
                job::finish(parent);
                return Err(err);
            }
        };
        // SAFETY: as in `create_job`.
        unsafe {
            job.as_ref().prepare(Some(parent), work);
            Ok(PendingJob::new(JobHandle::from_raw(job, self.pool)))
        }
    }

    /// Publishes a job on this worker's deque and returns the handle to wait
    /// on.
    ///
    /// A job from another pool, or one that does not fit in the deque, is
    /// cancelled and the error returned.
    pub fn run(&self, job: PendingJob<'a>) -> Result<JobHandle<'a>, JobError> {
        self.publish(job).map_err(|(err, job)| {
            warn!(worker = self.worker().name(), %err, "cancelling job");
            drop(job);
            err
        })
    }

    /// Publishes a job, or executes it right here when the deque is full.
    pub fn run_or_execute(&self, job: PendingJob<'a>) -> Result<JobHandle<'a>, JobError> {
        match self.publish(job) {
            Ok(handle) => Ok(handle),
            Err((JobError::QueueFull { .. }, job)) => {
                trace!(worker = self.worker().name(), "executing job inline");
                let handle = job.handle();
                self.execute_claimed(job);
                Ok(handle)
            }
            Err((err, _)) => Err(err),
        }
    }

    fn publish(&self, job: PendingJob<'a>) -> Result<JobHandle<'a>, (JobError, PendingJob<'a>)> {
        if !job.handle().belongs_to(self.pool) {
            return Err((JobError::ForeignJob, job));
        }
        if let Err(err) = self.worker().queue().push(job.handle().as_ptr()) {
            return Err((err, job));
        }
        #[cfg(feature = "metrics")]
        self.worker()
            .metrics()
            .local_pushes
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(job.into_handle())
    }

    /// Blocks until `job` and all of its descendants completed, executing
    /// other jobs in the meantime.
    ///
    /// Never parks the thread; idle polls follow the configured
    /// [`IdleStrategy`]. The awaited job must be running or queued somewhere,
    /// otherwise this never returns.
    pub fn wait(&self, job: JobHandle<'_>) {
        while !job.is_complete() {
            if let Some(next) = self.get_job() {
                self.execute_claimed(next);
            }
        }
    }

    /// Pops from this worker's deque, or steals from one other worker picked
    /// at random. Idles once and returns `None` if both came up empty.
    ///
    /// The returned job is no longer queued; pass it to [`Context::execute`]
    /// or [`Context::run`], or drop it to cancel it.
    pub fn get_job(&self) -> Option<PendingJob<'a>> {
        let worker = self.worker();

        if let Some(job) = worker.queue().pop() {
            #[cfg(feature = "metrics")]
            worker
                .metrics()
                .local_pops
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.backoff.reset();
            return Some(self.claim(job));
        }

        if let Some(job) = self.steal() {
            self.backoff.reset();
            return Some(job);
        }

        self.idle();
        None
    }

    fn claim(&self, job: NonNull<Job>) -> PendingJob<'a> {
        // SAFETY: only jobs of this pool reach its deques, and every pop or
        // steal returns a pushed job exactly once.
        unsafe { PendingJob::new(JobHandle::from_raw(job, self.pool)) }
    }

    fn steal(&self) -> Option<PendingJob<'a>> {
        let count = self.pool.size();
        if count < 2 {
            return None;
        }

        let mut victim = rand::rng().random_range(0..count - 1);
        if victim >= self.index {
            victim += 1;
        }

        let stolen = self.pool.workers()[victim].queue().steal();

        #[cfg(feature = "metrics")]
        {
            let counter = if stolen.is_some() {
                &self.worker().metrics().steals_success
            } else {
                &self.worker().metrics().steals_failed
            };
            counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }

        let job = stolen?;
        trace!(
            worker = self.worker().name(),
            victim = self.pool.workers()[victim].name(),
            "stole job"
        );
        Some(self.claim(job))
    }

    fn idle(&self) {
        match self.pool.config().idle {
            IdleStrategy::Yield => thread::yield_now(),
            IdleStrategy::Spin => hint::spin_loop(),
            IdleStrategy::Backoff => self.backoff.snooze(),
        }
    }

    /// Runs a job on this thread and counts it towards this worker's
    /// completed jobs. A job from another pool is cancelled instead.
    pub fn execute(&self, job: PendingJob<'a>) -> Result<(), JobError> {
        if !job.handle().belongs_to(self.pool) {
            return Err(JobError::ForeignJob);
        }
        self.execute_claimed(job);
        Ok(())
    }

    pub(crate) fn execute_claimed(&self, job: PendingJob<'a>) {
        job::execute(job, self);
        self.worker().record_job_done();
    }
}

impl Drop for Context<'_> {
    fn drop(&mut self) {
        self.worker().release();
    }
}
