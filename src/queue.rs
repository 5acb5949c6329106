//! Per-worker double-ended job queues.
//!
//! The owning worker pushes and pops at the bottom (LIFO), any other thread
//! steals from the top (FIFO). [`WorkStealingQueue`] is the lock-free
//! Chase-Lev deque over a fixed power-of-two ring; [`LockingQueue`] is a
//! mutex-protected variant with the same contract.
//!
//! Both queues only move pointers around; they never dereference them.

use std::ptr::{self, NonNull};
use std::sync::{Mutex, PoisonError};

use crossbeam::utils::CachePadded;

use crate::config::validate_capacity;
use crate::error::JobError;
use crate::sync::{AtomicIsize, AtomicPtr, Ordering, fence};

/// Common contract of the per-worker deques.
///
/// `push` and `pop` may only be called by the owning thread. `steal` may be
/// called from any thread. Every pushed item is returned by exactly one `pop`
/// or `steal`.
pub trait JobQueue<T>: Send + Sync {
    /// Publishes an item at the bottom. Fails when the ring is full.
    fn push(&self, item: NonNull<T>) -> Result<(), JobError>;

    /// Takes the most recently pushed item, or `None` if the queue is empty or
    /// a thief won the race for the last item.
    fn pop(&self) -> Option<NonNull<T>>;

    /// Takes the oldest item, or `None` if the queue is empty or the race for
    /// the item was lost.
    fn steal(&self) -> Option<NonNull<T>>;

    /// Approximate number of queued items.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items.
    fn capacity(&self) -> usize;
}

/// Lock-free Chase-Lev work-stealing deque with a fixed capacity.
pub struct WorkStealingQueue<T> {
    /// Next index to steal from. Contended by thieves and the owner's last pop.
    top: CachePadded<AtomicIsize>,
    /// Next index to push to. Written only by the owner.
    bottom: CachePadded<AtomicIsize>,
    buffer: Box<[AtomicPtr<T>]>,
    mask: usize,
}

impl<T> WorkStealingQueue<T> {
    /// Creates an empty queue. `capacity` must be a non-zero power of two.
    pub fn new(capacity: usize) -> Result<Self, JobError> {
        validate_capacity(capacity)?;
        Ok(WorkStealingQueue {
            top: CachePadded::new(AtomicIsize::new(0)),
            bottom: CachePadded::new(AtomicIsize::new(0)),
            buffer: (0..capacity)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect(),
            mask: capacity - 1,
        })
    }

    fn slot(&self, index: isize) -> &AtomicPtr<T> {
        &self.buffer[index as usize & self.mask]
    }
}

impl<T> JobQueue<T> for WorkStealingQueue<T> {
    fn push(&self, item: NonNull<T>) -> Result<(), JobError> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        if (b - t) as usize >= self.buffer.len() {
            return Err(JobError::QueueFull {
                capacity: self.buffer.len(),
            });
        }

        self.slot(b).store(item.as_ptr(), Ordering::Relaxed);
        // The item must be visible before the new bottom is.
        fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Relaxed);
        Ok(())
    }

    fn pop(&self) -> Option<NonNull<T>> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(b, Ordering::Relaxed);
        // The claim on `b` must be visible before `top` is read.
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if t > b {
            // Already empty.
            self.bottom.store(t, Ordering::Relaxed);
            return None;
        }

        let item = self.slot(b).load(Ordering::Relaxed);
        if t < b {
            return NonNull::new(item);
        }

        // Last item: race the thieves for it.
        let won = self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.bottom.store(t + 1, Ordering::Relaxed);
        if won { NonNull::new(item) } else { None }
    }

    fn steal(&self) -> Option<NonNull<T>> {
        let t = self.top.load(Ordering::Acquire);
        // `top` must be read before `bottom`.
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);

        if t >= b {
            return None;
        }

        let item = self.slot(t).load(Ordering::Relaxed);
        self.top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .ok()?;
        NonNull::new(item)
    }

    fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        (b - t).max(0) as usize
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

struct LockedRing<T> {
    slots: Box<[*mut T]>,
    top: usize,
    bottom: usize,
}

/// Mutex-protected deque with the same contract as [`WorkStealingQueue`].
pub struct LockingQueue<T> {
    ring: Mutex<LockedRing<T>>,
    mask: usize,
}

// SAFETY: the queue stores pointers without dereferencing them, and all
// access to the ring goes through the mutex.
unsafe impl<T> Send for LockingQueue<T> {}
unsafe impl<T> Sync for LockingQueue<T> {}

impl<T> LockingQueue<T> {
    /// Creates an empty queue. `capacity` must be a non-zero power of two.
    pub fn new(capacity: usize) -> Result<Self, JobError> {
        validate_capacity(capacity)?;
        Ok(LockingQueue {
            ring: Mutex::new(LockedRing {
                slots: vec![ptr::null_mut(); capacity].into_boxed_slice(),
                top: 0,
                bottom: 0,
            }),
            mask: capacity - 1,
        })
    }

    fn with_ring<R>(&self, f: impl FnOnce(&mut LockedRing<T>) -> R) -> R {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut ring)
    }
}

impl<T> JobQueue<T> for LockingQueue<T> {
    fn push(&self, item: NonNull<T>) -> Result<(), JobError> {
        let mask = self.mask;
        self.with_ring(|ring| {
            if ring.bottom - ring.top > mask {
                return Err(JobError::QueueFull {
                    capacity: mask + 1,
                });
            }
            ring.slots[ring.bottom & mask] = item.as_ptr();
            ring.bottom += 1;
            Ok(())
        })
    }

    fn pop(&self) -> Option<NonNull<T>> {
        let mask = self.mask;
        self.with_ring(|ring| {
            if ring.bottom == ring.top {
                return None;
            }
            ring.bottom -= 1;
            NonNull::new(ring.slots[ring.bottom & mask])
        })
    }

    fn steal(&self) -> Option<NonNull<T>> {
        let mask = self.mask;
        self.with_ring(|ring| {
            if ring.bottom == ring.top {
                return None;
            }
            let item = ring.slots[ring.top & mask];
            ring.top += 1;
            NonNull::new(item)
        })
    }

    fn len(&self) -> usize {
        self.with_ring(|ring| ring.bottom - ring.top)
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }
}
