//! Workers and the worker registry.
//!
//! Each worker owns one job arena and one deque. Background workers run the
//! scheduling loop on their own OS thread; the main worker is the thread that
//! attached to it and makes progress only while it waits on a job.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::arena::JobArena;
use crate::config::{PinningStrategy, SchedulerConfig};
use crate::context::Context;
use crate::error::JobError;
use crate::job::Job;
use crate::queue::JobQueue;
#[cfg(feature = "metrics")]
use crate::metrics::WorkerMetrics;
#[cfg(feature = "locking-queue")]
use crate::queue::LockingQueue;
#[cfg(not(feature = "locking-queue"))]
use crate::queue::WorkStealingQueue;

/// The deque type workers use.
#[cfg(not(feature = "locking-queue"))]
pub type WorkerQueue = WorkStealingQueue<Job>;
/// The deque type workers use.
#[cfg(feature = "locking-queue")]
pub type WorkerQueue = LockingQueue<Job>;

/// Which thread drives a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAffinity {
    /// The thread that attaches to the worker; no thread is spawned.
    Main,
    /// A dedicated OS thread spawned on start.
    Background,
}

/// Worker lifecycle. Only `Running` workers execute jobs; `Stopped` is terminal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerStatus {
    Created = 0,
    Suspended = 1,
    Running = 2,
    Stopped = 3,
}

impl WorkerStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerStatus::Created,
            1 => WorkerStatus::Suspended,
            2 => WorkerStatus::Running,
            _ => WorkerStatus::Stopped,
        }
    }
}

/// A worker: a name, an affinity, a status, and exclusive ownership of one
/// job arena and one deque.
pub struct Worker {
    name: String,
    affinity: WorkerAffinity,
    status: AtomicU8,
    attached: AtomicBool,
    jobs_done: AtomicUsize,
    queue: WorkerQueue,
    arena: JobArena,
    handle: Mutex<Option<JoinHandle<()>>>,
    #[cfg(feature = "metrics")]
    metrics: WorkerMetrics,
}

impl Worker {
    /// Creates a worker whose arena and deque hold `capacity` jobs.
    pub fn new(
        name: impl Into<String>,
        affinity: WorkerAffinity,
        suspended: bool,
        capacity: usize,
    ) -> Result<Self, JobError> {
        let status = if suspended {
            WorkerStatus::Suspended
        } else {
            WorkerStatus::Created
        };
        Ok(Worker {
            name: name.into(),
            affinity,
            status: AtomicU8::new(status as u8),
            attached: AtomicBool::new(false),
            jobs_done: AtomicUsize::new(0),
            queue: WorkerQueue::new(capacity)?,
            arena: JobArena::new(capacity)?,
            handle: Mutex::new(None),
            #[cfg(feature = "metrics")]
            metrics: WorkerMetrics::new(),
        })
    }

    /// Returns the worker's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn affinity(&self) -> WorkerAffinity {
        self.affinity
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Number of jobs this worker executed since it was started.
    pub fn jobs_done(&self) -> usize {
        self.jobs_done.load(Ordering::Relaxed)
    }

    /// Number of jobs currently queued on this worker's deque.
    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }

    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    pub(crate) fn queue(&self) -> &WorkerQueue {
        &self.queue
    }

    pub(crate) fn arena(&self) -> &JobArena {
        &self.arena
    }

    pub(crate) fn record_job_done(&self) {
        self.jobs_done.fetch_add(1, Ordering::Relaxed);
    }

    /// Claims the worker for a driving thread.
    fn claim(&self) -> Result<(), JobError> {
        if self.status() == WorkerStatus::Stopped {
            return Err(JobError::Stopped(self.name.clone()));
        }
        if self
            .attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(JobError::AlreadyStarted(self.name.clone()));
        }
        Ok(())
    }

    /// Releases the claim taken by [`Worker::claim`].
    pub(crate) fn release(&self) {
        self.attached.store(false, Ordering::Release);
    }

    /// Resets the job counter, then publishes `Running`. Returns false if
    /// the worker was stopped in the meantime; `Stopped` is never overwritten.
    fn mark_running(&self) -> bool {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            match WorkerStatus::from_u8(current) {
                WorkerStatus::Stopped => return false,
                WorkerStatus::Running => return true,
                WorkerStatus::Created | WorkerStatus::Suspended => {}
            }
            self.jobs_done.store(0, Ordering::Relaxed);
            // Release: the reset is visible to whoever observes `Running`.
            match self.status.compare_exchange_weak(
                current,
                WorkerStatus::Running as u8,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Asks the scheduling loop to exit on its next iteration.
    pub fn stop(&self) {
        self.status
            .store(WorkerStatus::Stopped as u8, Ordering::Release);
    }

    /// Waits for the worker's thread, if any. Returns false if it panicked.
    fn join(&self) -> bool {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }
}

/// The worker registry: fixed at construction, read-only afterwards.
pub struct WorkerPool {
    workers: Box<[Worker]>,
    config: SchedulerConfig,
}

impl WorkerPool {
    pub(crate) fn new(workers: Vec<Worker>, config: SchedulerConfig) -> Self {
        WorkerPool {
            workers: workers.into_boxed_slice(),
            config,
        }
    }

    /// Returns the number of workers in the pool.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Returns the worker at `index`.
    pub fn worker(&self, index: usize) -> Option<&Worker> {
        self.workers.get(index)
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Sum of every worker's completed-job counter.
    pub fn total_jobs_done(&self) -> usize {
        self.workers.iter().map(Worker::jobs_done).sum()
    }

    fn checked_worker(&self, index: usize, affinity: WorkerAffinity) -> Result<&Worker, JobError> {
        let worker = self.worker(index).ok_or(JobError::NoSuchWorker(index))?;
        if worker.affinity != affinity {
            return Err(JobError::WrongAffinity(worker.name.clone()));
        }
        Ok(worker)
    }

    /// Spawns the thread for a background worker and marks it running.
    pub(crate) fn start_background(self: &Arc<Self>, index: usize) -> Result<(), JobError> {
        let worker = self.checked_worker(index, WorkerAffinity::Background)?;
        worker.claim()?;

        let pool = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(worker.name.clone())
            .spawn(move || worker_main(pool, index));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                worker.release();
                return Err(JobError::Spawn {
                    name: worker.name.clone(),
                    reason: err.to_string(),
                });
            }
        };

        *worker.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        // A concurrent stop wins; the thread sees `Stopped` and exits.
        if !worker.mark_running() {
            return Err(JobError::Stopped(worker.name.clone()));
        }
        debug!(worker = worker.name(), "started background worker");
        Ok(())
    }

    /// Adopts the calling thread as a main-affinity worker.
    pub(crate) fn attach(&self, index: usize) -> Result<Context<'_>, JobError> {
        let worker = self.checked_worker(index, WorkerAffinity::Main)?;
        worker.claim()?;
        if !worker.mark_running() {
            worker.release();
            return Err(JobError::Stopped(worker.name.clone()));
        }
        debug!(worker = worker.name(), "attached main worker");
        Ok(Context::bind(self, index))
    }

    /// Sets every worker to `Stopped`.
    pub(crate) fn stop_all(&self) {
        for worker in self.workers.iter() {
            worker.stop();
        }
    }

    /// Joins every spawned thread. Returns how many of them panicked.
    pub(crate) fn join_all(&self) -> usize {
        self.workers.iter().filter(|worker| !worker.join()).count()
    }
}

fn worker_main(pool: Arc<WorkerPool>, index: usize) {
    if pool.config.pinning == PinningStrategy::Linear {
        if let Some(core_ids) = core_affinity::get_core_ids() {
            if !core_ids.is_empty() {
                core_affinity::set_for_current(core_ids[index % core_ids.len()]);
            }
        }
    }

    let ctx = Context::bind(&pool, index);
    run_loop(&ctx);
    debug!(
        worker = ctx.worker().name(),
        jobs_done = ctx.worker().jobs_done(),
        "worker stopped"
    );
}

/// The scheduling loop: run jobs while `Running`, idle while not yet running,
/// exit once `Stopped`.
pub(crate) fn run_loop(ctx: &Context<'_>) {
    let worker = ctx.worker();
    loop {
        match worker.status() {
            WorkerStatus::Stopped => break,
            WorkerStatus::Running => {
                if let Some(job) = ctx.get_job() {
                    ctx.execute_claimed(job);
                }
            }
            WorkerStatus::Created | WorkerStatus::Suspended => thread::yield_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;

    fn pool(workers: Vec<Worker>) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(workers, SchedulerConfig::default()))
    }

    #[test]
    fn test_worker_creation() {
        let worker = Worker::new("Worker_0", WorkerAffinity::Background, true, 16).unwrap();
        assert_eq!(worker.name(), "Worker_0");
        assert_eq!(worker.affinity(), WorkerAffinity::Background);
        assert_eq!(worker.status(), WorkerStatus::Suspended);
        assert_eq!(worker.jobs_done(), 0);

        let worker = Worker::new("Worker_1", WorkerAffinity::Background, false, 16).unwrap();
        assert_eq!(worker.status(), WorkerStatus::Created);
    }

    #[test]
    fn test_worker_rejects_bad_capacity() {
        assert!(matches!(
            Worker::new("w", WorkerAffinity::Main, true, 10),
            Err(JobError::InvalidCapacity(10))
        ));
    }

    #[test]
    fn test_status_ordering() {
        assert!(WorkerStatus::Created < WorkerStatus::Stopped);
        assert!(WorkerStatus::Suspended < WorkerStatus::Running);
        assert!(WorkerStatus::Running < WorkerStatus::Stopped);
    }

    #[test]
    fn test_background_worker_start_and_stop() {
        let pool = pool(vec![
            Worker::new("Worker_0", WorkerAffinity::Background, true, 16).unwrap(),
        ]);
        pool.start_background(0).unwrap();
        assert_eq!(pool.worker(0).unwrap().status(), WorkerStatus::Running);
        assert!(matches!(
            pool.start_background(0),
            Err(JobError::AlreadyStarted(_))
        ));

        pool.stop_all();
        assert_eq!(pool.join_all(), 0);
        assert_eq!(pool.worker(0).unwrap().status(), WorkerStatus::Stopped);
    }

    #[test]
    fn test_affinity_is_checked() {
        let pool = pool(vec![
            Worker::new("Worker_0", WorkerAffinity::Background, true, 16).unwrap(),
            Worker::new("Worker_MAIN", WorkerAffinity::Main, true, 16).unwrap(),
        ]);
        assert!(matches!(pool.attach(0), Err(JobError::WrongAffinity(_))));
        assert!(matches!(
            pool.start_background(1),
            Err(JobError::WrongAffinity(_))
        ));
        assert!(matches!(pool.attach(2), Err(JobError::NoSuchWorker(2))));
    }

    #[test]
    fn test_main_worker_attach_is_exclusive() {
        let pool = pool(vec![
            Worker::new("Worker_MAIN", WorkerAffinity::Main, true, 16).unwrap(),
        ]);
        let ctx = pool.attach(0).unwrap();
        assert_eq!(ctx.worker().status(), WorkerStatus::Running);
        assert!(matches!(pool.attach(0), Err(JobError::AlreadyStarted(_))));
        drop(ctx);

        // Once released, another thread may adopt the worker.
        let ctx = pool.attach(0).unwrap();
        assert_eq!(ctx.worker().name(), "Worker_MAIN");
    }

    #[test]
    fn test_stopped_worker_cannot_restart() {
        let pool = pool(vec![
            Worker::new("Worker_MAIN", WorkerAffinity::Main, true, 16).unwrap(),
        ]);
        pool.stop_all();
        assert!(matches!(pool.attach(0), Err(JobError::Stopped(_))));
    }

    #[test]
    fn test_stop_is_never_overwritten_by_start() {
        let worker = Worker::new("Worker_0", WorkerAffinity::Background, true, 16).unwrap();
        worker.stop();
        // A start racing a stop must lose.
        assert!(!worker.mark_running());
        assert_eq!(worker.status(), WorkerStatus::Stopped);

        let worker = Worker::new("Worker_1", WorkerAffinity::Background, false, 16).unwrap();
        assert!(worker.mark_running());
        assert!(worker.mark_running());
        assert_eq!(worker.status(), WorkerStatus::Running);
    }
}
