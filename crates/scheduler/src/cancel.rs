//! Cancellation tokens for background jobs
//!
//! Long-running takeoff work (scale-bar detection over a full-resolution
//! sheet, page-wide recalculation) checks its token between units of work and
//! stops early once the token is cancelled.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use crate::JobId;

/// Cancellation token for cooperative job cancellation
///
/// Clones share the same underlying flag, so a token handed to a worker
/// observes a `cancel()` issued through any other clone.
///
/// # Example
///
/// ```
/// use takeoff_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this token and every clone of it
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if this token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

struct RegisteredJob<K> {
    owner: K,
    token: CancellationToken,
}

/// Registry of in-flight jobs, grouped by an owner key
///
/// The takeoff service keys jobs by the page they work on, so removing a page
/// cancels every job still running against it.
///
/// # Example
///
/// ```
/// use takeoff_scheduler::CancellationRegistry;
///
/// let registry: CancellationRegistry<&str> = CancellationRegistry::new();
/// let a = registry.register(1, "page-a");
/// let b = registry.register(2, "page-b");
///
/// assert_eq!(registry.cancel_owner(&"page-a"), 1);
/// assert!(a.is_cancelled());
/// assert!(!b.is_cancelled());
/// ```
pub struct CancellationRegistry<K> {
    jobs: Mutex<HashMap<JobId, RegisteredJob<K>>>,
}

impl<K: Eq + Hash + Clone> CancellationRegistry<K> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, RegisteredJob<K>>> {
        // Entries are plain values, a panic while holding the lock cannot
        // leave them half-written.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a job for `owner` and return the token to hand to the worker
    pub fn register(&self, job_id: JobId, owner: K) -> CancellationToken {
        let token = CancellationToken::new();
        self.jobs().insert(
            job_id,
            RegisteredJob {
                owner,
                token: token.clone(),
            },
        );
        token
    }

    /// Cancel a job by ID
    ///
    /// Returns `true` if the job was registered.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.jobs().get(&job_id) {
            Some(job) => {
                job.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every job registered for `owner`
    ///
    /// Returns the number of jobs cancelled.
    pub fn cancel_owner(&self, owner: &K) -> usize {
        let jobs = self.jobs();
        let mut cancelled = 0;
        for job in jobs.values().filter(|job| &job.owner == owner) {
            job.token.cancel();
            cancelled += 1;
        }
        cancelled
    }

    /// Cancel all registered jobs
    pub fn cancel_all(&self) -> usize {
        let jobs = self.jobs();
        for job in jobs.values() {
            job.token.cancel();
        }
        jobs.len()
    }

    /// Remove a finished job from the registry
    pub fn unregister(&self, job_id: JobId) -> bool {
        self.jobs().remove(&job_id).is_some()
    }

    /// Number of registered jobs for `owner`
    pub fn count_for(&self, owner: &K) -> usize {
        self.jobs().values().filter(|job| &job.owner == owner).count()
    }

    /// Number of registered jobs
    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    /// Check if no jobs are registered
    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for CancellationRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
