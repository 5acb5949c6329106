//! Compile-time constants and runtime configuration for the job system.

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Number of job slots in each worker's arena and deque. Must be a power of two.
pub const MAX_JOB_COUNT: usize = 1 << 16;

/// Default worker pool size: three background workers plus the main thread.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// L1 cache line size used to size the job record and its inline payload.
pub const CACHE_LINE_SIZE: usize = 64;

/// Strategy for pinning background worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
}

/// What a worker does when neither its own deque nor a victim had a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdleStrategy {
    /// Give up the time slice with `std::thread::yield_now`.
    #[default]
    Yield,
    /// Issue a single spin-loop hint and retry immediately.
    Spin,
    /// Exponential spin, then yield, via `crossbeam::utils::Backoff`.
    Backoff,
}

/// Configuration for the job system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Total number of workers, including the main-thread worker. Default: 4.
    pub worker_count: usize,
    /// Job slots per worker arena and deque. Must be a power of two. Default: 65536.
    pub job_capacity: usize,
    /// Behaviour of an idle poll. Default: yield.
    pub idle: IdleStrategy,
    /// CPU pinning for background workers. Default: none.
    pub pinning: PinningStrategy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            job_capacity: MAX_JOB_COUNT,
            idle: IdleStrategy::default(),
            pinning: PinningStrategy::default(),
        }
    }
}

impl SchedulerConfig {
    /// Sets the total worker count.
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Sets the per-worker job capacity.
    pub fn with_job_capacity(mut self, job_capacity: usize) -> Self {
        self.job_capacity = job_capacity;
        self
    }

    /// Sets the idle strategy.
    pub fn with_idle(mut self, idle: IdleStrategy) -> Self {
        self.idle = idle;
        self
    }

    /// Sets the pinning strategy.
    pub fn with_pinning(mut self, pinning: PinningStrategy) -> Self {
        self.pinning = pinning;
        self
    }

    /// Checks the invariants the arena and deque rely on.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.worker_count == 0 {
            return Err(JobError::InvalidWorkerCount);
        }
        validate_capacity(self.job_capacity)
    }
}

/// Ring buffers index with a bitmask, so capacities must be non-zero powers of two.
pub(crate) fn validate_capacity(capacity: usize) -> Result<(), JobError> {
    if capacity.is_power_of_two() {
        Ok(())
    } else {
        Err(JobError::InvalidCapacity(capacity))
    }
}
