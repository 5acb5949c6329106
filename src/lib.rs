//! # jobgraph - Fork-Join Job System with Work Stealing
//!
//! A job system for fine-grained, dependency-tracked work in the style used by
//! real-time simulation engines. Work is split into many small jobs, including
//! recursively split data-parallel loops, and spread over a fixed pool of
//! worker threads with lock-free work stealing.
//!
//! ## Architecture
//!
//! - **Jobs**: one cache line each, holding an inline closure, an optional
//!   parent and an outstanding-work counter. A job completes once it ran and
//!   all of its children completed.
//! - **Job Arena**: a per-worker ring of job slots; no heap allocation and no
//!   cross-thread contention when creating jobs.
//! - **Work-Stealing Deque**: one per worker. The owner pushes and pops at the
//!   bottom, thieves steal from the top.
//! - **Workers**: background threads running the scheduling loop, plus the
//!   calling thread as the main worker, which helps out while it waits.
//! - **Parallel For**: a splitter policy plus a job that halves its range
//!   until the policy says stop.
//!
//! ## Example
//!
//! ```no_run
//! use jobgraph::{CountSplitter, JobSystem, SchedulerConfig};
//!
//! let job_system = JobSystem::new(SchedulerConfig::default()).unwrap();
//! let ctx = job_system.start().unwrap();
//!
//! let root = ctx.create_job(|_, _| {}).unwrap();
//! for _ in 0..100 {
//!     let child = ctx.create_job_as_child(root.handle(), |_, _| {
//!         println!("Hello from a child job!");
//!     }).unwrap();
//!     ctx.run(child).unwrap();
//! }
//! let root = ctx.run(root).unwrap();
//! ctx.wait(root);
//!
//! let mut values = vec![0u32; 100_000];
//! ctx.parallel_for_slice(&mut values, |chunk: &mut [u32]| {
//!     for v in chunk {
//!         *v += 1;
//!     }
//! }, CountSplitter::new(1000)).unwrap();
//! ```

pub mod arena;
pub mod config;
pub mod context;
pub mod error;
pub mod job;
pub mod job_system;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod parallel_for;
pub mod queue;
mod sync;
pub mod worker;

pub use config::{IdleStrategy, PinningStrategy, SchedulerConfig};
pub use context::Context;
pub use error::JobError;
pub use job::{JobHandle, PendingJob};
pub use job_system::{JobSystem, JobSystemBuilder};
pub use parallel_for::{CountSplitter, DataSizeSplitter, Splitter};
pub use queue::{JobQueue, LockingQueue, WorkStealingQueue};
pub use worker::{Worker, WorkerAffinity, WorkerStatus};
