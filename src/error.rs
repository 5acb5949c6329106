//! Error type shared by the job system.

use thiserror::Error;

/// Failures reported by the job system.
///
/// A lost steal race is not an error; it surfaces as "no job" and the
/// scheduling loop retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("job arena exhausted: all {capacity} slots hold unfinished jobs")]
    CapacityExceeded { capacity: usize },

    #[error("work-stealing queue is full ({capacity} jobs)")]
    QueueFull { capacity: usize },

    #[error("parent job already completed")]
    ParentCompleted,

    #[error("job belongs to a different worker pool")]
    ForeignJob,

    #[error("capacity {0} is not a non-zero power of two")]
    InvalidCapacity(usize),

    #[error("worker pool must contain at least one worker")]
    InvalidWorkerCount,

    #[error("no worker at index {0}")]
    NoSuchWorker(usize),

    #[error("worker {0} has already been started")]
    AlreadyStarted(String),

    #[error("worker {0} has been stopped")]
    Stopped(String),

    #[error("no worker with main affinity is registered")]
    NoMainWorker,

    #[error("worker {0} has the wrong affinity for this operation")]
    WrongAffinity(String),

    #[error("failed to spawn thread for worker {name}: {reason}")]
    Spawn { name: String, reason: String },

    #[error("{0} worker thread(s) panicked")]
    WorkerPanicked(usize),
}
