use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::warn;

use crate::config::validate_capacity;
use crate::error::JobError;
use crate::job::Job;

/// A fixed-capacity ring of job slots owned by one worker.
///
/// Slots are handed out linearly by advancing a cursor that wraps with a
/// bitmask. There is no per-job free: a slot becomes reusable as soon as the
/// job in it completes. Only the owning worker's thread allocates. Closures
/// that never ran are dropped together with the arena.
pub struct JobArena {
    jobs: Box<[Job]>,
    mask: usize,
    cursor: AtomicUsize,
}

impl JobArena {
    /// Creates an arena with `capacity` idle slots.
    ///
    /// `capacity` must be a non-zero power of two.
    pub fn new(capacity: usize) -> Result<Self, JobError> {
        validate_capacity(capacity)?;
        Ok(JobArena {
            jobs: (0..capacity).map(|_| Job::empty()).collect(),
            mask: capacity - 1,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Returns the next ring slot.
    ///
    /// Fails with [`JobError::CapacityExceeded`] when that slot still holds an
    /// unfinished job, instead of overwriting it. With the `unchecked-arena`
    /// feature the slot is handed out regardless.
    pub(crate) fn allocate(&self) -> Result<NonNull<Job>, JobError> {
        let index = self.cursor.load(Ordering::Relaxed);
        let job = &self.jobs[index & self.mask];

        #[cfg(not(feature = "unchecked-arena"))]
        if !job.is_idle() {
            warn!(capacity = self.capacity(), "job arena exhausted");
            return Err(JobError::CapacityExceeded {
                capacity: self.capacity(),
            });
        }

        self.cursor.store(index.wrapping_add(1), Ordering::Relaxed);
        Ok(NonNull::from(job))
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.jobs.len()
    }

    /// Number of allocations made so far (not wrapped).
    pub fn allocated(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Number of slots currently holding unfinished jobs.
    pub fn live_jobs(&self) -> usize {
        self.jobs.iter().filter(|job| !job.is_idle()).count()
    }
}
