//! Takeoff Scheduler Library
//!
//! Background job runtime for the takeoff engine.
//!
//! Jobs run on dedicated threads, report a [`JobStatus`] through a
//! [`JobHandle`], and cooperate with cancellation through a shared
//! [`CancellationToken`]. A [`CancellationRegistry`] groups in-flight jobs by
//! owner so that all work against a page can be cancelled at once.
//!
//! # Example
//!
//! ```
//! use takeoff_scheduler::{spawn_job, CancellationRegistry, JobOutcome, JobStatus};
//!
//! let registry: CancellationRegistry<u32> = CancellationRegistry::new();
//! let token = registry.register(1, 0);
//!
//! let handle = spawn_job::<usize, String, _>(1, token, |token| {
//!     let mut processed = 0;
//!     for _ in 0..10 {
//!         if token.is_cancelled() {
//!             return JobOutcome::Cancelled;
//!         }
//!         processed += 1;
//!     }
//!     JobOutcome::Completed(processed)
//! });
//!
//! assert_eq!(handle.wait(), JobStatus::Completed(10));
//! registry.unregister(1);
//! ```

mod cancel;
mod job;

/// Unique job identifier
pub type JobId = u64;

// Re-export public API
pub use cancel::{CancellationRegistry, CancellationToken};
pub use job::{spawn_job, JobHandle, JobOutcome, JobStatus};
