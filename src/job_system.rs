//! High-level job system interface.
//!
//! The JobSystem owns the worker registry and drives worker lifecycles.
//! Scheduling itself (creating, running and waiting on jobs) goes through the
//! [`Context`] returned when the calling thread attaches to its main worker.

use std::sync::Arc;

use tracing::{debug, error};

use crate::config::SchedulerConfig;
use crate::context::Context;
use crate::error::JobError;
use crate::worker::{Worker, WorkerAffinity, WorkerPool};

/// Builds a job system one worker at a time.
///
/// The registry is frozen by [`JobSystemBuilder::build`]; no worker can be
/// added once any worker runs.
#[derive(Debug)]
pub struct JobSystemBuilder {
    config: SchedulerConfig,
    workers: Vec<(String, WorkerAffinity, bool)>,
}

impl JobSystemBuilder {
    /// Registers a worker.
    pub fn worker(mut self, name: impl Into<String>, affinity: WorkerAffinity, suspended: bool) -> Self {
        self.workers.push((name.into(), affinity, suspended));
        self
    }

    /// Allocates every worker's arena and deque and freezes the registry.
    pub fn build(self) -> Result<JobSystem, JobError> {
        crate::config::validate_capacity(self.config.job_capacity)?;
        if self.workers.is_empty() {
            return Err(JobError::InvalidWorkerCount);
        }

        let capacity = self.config.job_capacity;
        let workers = self
            .workers
            .into_iter()
            .map(|(name, affinity, suspended)| Worker::new(name, affinity, suspended, capacity))
            .collect::<Result<Vec<_>, _>>()?;

        let mut config = self.config;
        config.worker_count = workers.len();
        debug!(workers = workers.len(), capacity, "job system created");

        Ok(JobSystem {
            pool: Arc::new(WorkerPool::new(workers, config)),
        })
    }
}

/// The main job system managing worker threads.
///
/// Dropping the job system stops every worker and joins their threads.
pub struct JobSystem {
    pool: Arc<WorkerPool>,
}

impl JobSystem {
    /// Starts an empty builder.
    pub fn builder(config: SchedulerConfig) -> JobSystemBuilder {
        JobSystemBuilder {
            config,
            workers: Vec::new(),
        }
    }

    /// Creates `config.worker_count - 1` background workers named
    /// `Worker_<i>` plus one main worker named `Worker_MAIN`, all suspended.
    ///
    /// # Example
    ///
    /// ```
    /// use jobgraph::{JobSystem, SchedulerConfig};
    ///
    /// let job_system = JobSystem::new(SchedulerConfig::default().with_job_capacity(1024)).unwrap();
    /// assert_eq!(job_system.num_workers(), 4);
    /// assert_eq!(job_system.worker(3).unwrap().name(), "Worker_MAIN");
    /// ```
    pub fn new(config: SchedulerConfig) -> Result<Self, JobError> {
        config.validate()?;
        let background = config.worker_count - 1;
        let mut builder = JobSystem::builder(config);
        for i in 0..background {
            builder = builder.worker(format!("Worker_{i}"), WorkerAffinity::Background, true);
        }
        builder
            .worker("Worker_MAIN", WorkerAffinity::Main, true)
            .build()
    }

    /// Creates a job system with one worker per available CPU.
    pub fn with_default_threads() -> Result<Self, JobError> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(crate::config::DEFAULT_WORKER_COUNT);
        JobSystem::new(SchedulerConfig::default().with_workers(workers))
    }

    /// Starts every background worker and attaches the calling thread to the
    /// first main worker.
    ///
    /// # Example
    ///
    /// ```
    /// use jobgraph::{JobSystem, SchedulerConfig};
    ///
    /// let job_system = JobSystem::new(SchedulerConfig::default().with_job_capacity(1024)).unwrap();
    /// let ctx = job_system.start().unwrap();
    ///
    /// let job = ctx.create_job(|_, _| println!("Hello from a job!")).unwrap();
    /// let job = ctx.run(job).unwrap();
    /// ctx.wait(job);
    /// assert!(job.is_complete());
    /// ```
    pub fn start(&self) -> Result<Context<'_>, JobError> {
        let main = self
            .pool
            .workers()
            .iter()
            .position(|worker| worker.affinity() == WorkerAffinity::Main)
            .ok_or(JobError::NoMainWorker)?;

        for (index, worker) in self.pool.workers().iter().enumerate() {
            if worker.affinity() == WorkerAffinity::Background {
                self.start_worker(index)?;
            }
        }
        self.attach(main)
    }

    /// Spawns the thread of the background worker at `index`.
    pub fn start_worker(&self, index: usize) -> Result<(), JobError> {
        self.pool.start_background(index)
    }

    /// Adopts the calling thread as the main-affinity worker at `index`.
    pub fn attach(&self, index: usize) -> Result<Context<'_>, JobError> {
        self.pool.attach(index)
    }

    /// Returns the worker at `index`.
    pub fn worker(&self, index: usize) -> Option<&Worker> {
        self.pool.worker(index)
    }

    /// Returns the number of workers, including main workers.
    pub fn num_workers(&self) -> usize {
        self.pool.size()
    }

    /// The worker registry.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Sum of all workers' completed-job counters.
    pub fn total_jobs_done(&self) -> usize {
        self.pool.total_jobs_done()
    }

    /// Asks every worker to stop. Queued jobs are not run.
    pub fn stop(&self) {
        self.pool.stop_all();
    }

    /// Stops every worker and joins their threads.
    ///
    /// Returns an error with the number of worker threads that panicked.
    pub fn shutdown(self) -> Result<(), JobError> {
        self.stop();
        match self.pool.join_all() {
            0 => Ok(()),
            failed => Err(JobError::WorkerPanicked(failed)),
        }
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.pool.stop_all();
        let failed = self.pool.join_all();
        if failed > 0 {
            error!(failed, "worker thread(s) panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerStatus;

    fn small() -> SchedulerConfig {
        SchedulerConfig::default().with_job_capacity(256)
    }

    #[test]
    fn test_job_system_creation() {
        let job_system = JobSystem::new(small()).unwrap();
        assert_eq!(job_system.num_workers(), 4);
        for i in 0..3 {
            let worker = job_system.worker(i).unwrap();
            assert_eq!(worker.name(), format!("Worker_{i}"));
            assert_eq!(worker.affinity(), WorkerAffinity::Background);
            assert_eq!(worker.status(), WorkerStatus::Suspended);
        }
        assert_eq!(job_system.worker(3).unwrap().affinity(), WorkerAffinity::Main);
        assert!(job_system.worker(4).is_none());
        job_system.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_builder_requires_workers() {
        assert!(matches!(
            JobSystem::builder(small()).build(),
            Err(JobError::InvalidWorkerCount)
        ));
    }

    #[test]
    fn test_builder_rejects_bad_capacity() {
        let result = JobSystem::builder(small().with_job_capacity(100))
            .worker("Worker_MAIN", WorkerAffinity::Main, true)
            .build();
        assert!(matches!(result, Err(JobError::InvalidCapacity(100))));
    }

    #[test]
    fn test_start_requires_main_worker() {
        let job_system = JobSystem::builder(small())
            .worker("Worker_0", WorkerAffinity::Background, true)
            .build()
            .unwrap();
        assert!(matches!(job_system.start(), Err(JobError::NoMainWorker)));
    }

    #[test]
    fn test_start_runs_every_worker() {
        let job_system = JobSystem::new(small()).unwrap();
        {
            let ctx = job_system.start().unwrap();
            assert_eq!(ctx.worker().name(), "Worker_MAIN");
            for i in 0..job_system.num_workers() {
                assert_eq!(job_system.worker(i).unwrap().status(), WorkerStatus::Running);
            }
        }
        job_system.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_stop_marks_workers_stopped() {
        let job_system = JobSystem::new(small().with_workers(2)).unwrap();
        drop(job_system.start().unwrap());
        job_system.stop();
        for i in 0..2 {
            assert_eq!(job_system.worker(i).unwrap().status(), WorkerStatus::Stopped);
        }
        job_system.shutdown().expect("Shutdown failed");
    }
}
