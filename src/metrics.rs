use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Optional per-worker scheduling counters.
#[derive(Debug)]
pub struct WorkerMetrics {
    /// Jobs taken from the worker's own deque.
    pub local_pops: AtomicU64,
    /// Jobs published to the worker's own deque.
    pub local_pushes: AtomicU64,
    /// Successful steals from another worker.
    pub steals_success: AtomicU64,
    /// Steal attempts that found nothing or lost the race.
    pub steals_failed: AtomicU64,
    /// Jobs whose closure panicked.
    pub jobs_panicked: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

impl WorkerMetrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            local_pops: AtomicU64::new(0),
            local_pushes: AtomicU64::new(0),
            steals_success: AtomicU64::new(0),
            steals_failed: AtomicU64::new(0),
            jobs_panicked: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        WorkerMetricsSnapshot {
            local_pops: self.local_pops.load(Ordering::Relaxed),
            local_pushes: self.local_pushes.load(Ordering::Relaxed),
            steals_success: self.steals_success.load(Ordering::Relaxed),
            steals_failed: self.steals_failed.load(Ordering::Relaxed),
            jobs_panicked: self.jobs_panicked.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a worker's metrics at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerMetricsSnapshot {
    pub local_pops: u64,
    pub local_pushes: u64,
    pub steals_success: u64,
    pub steals_failed: u64,
    pub jobs_panicked: u64,
    pub elapsed_seconds: f64,
}

impl WorkerMetricsSnapshot {
    /// Fraction of steal attempts that produced a job.
    pub fn steal_success_rate(&self) -> f64 {
        let attempts = self.steals_success + self.steals_failed;
        if attempts > 0 {
            self.steals_success as f64 / attempts as f64
        } else {
            0.0
        }
    }

    /// Pushes minus local pops. Jobs stolen by other workers are not subtracted.
    pub fn local_queue_depth(&self) -> i64 {
        self.local_pushes as i64 - self.local_pops as i64
    }
}
