//! Background job handles
//!
//! A job runs on its own thread and publishes its progress through a shared
//! [`JobStatus`]. Callers keep the [`JobHandle`] to poll the status, cancel
//! the job cooperatively, or block until it finishes.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::{CancellationToken, JobId};

/// Lifecycle of a background job
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus<T, E> {
    /// Spawned but not yet started
    Pending,
    /// Currently executing
    Running,
    /// Finished with a result
    Completed(T),
    /// Stopped early because its token was cancelled
    Cancelled,
    /// Finished with an error
    Failed(E),
}

impl<T, E> JobStatus<T, E> {
    /// Whether the job has reached a terminal state
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed(_) | JobStatus::Cancelled | JobStatus::Failed(_)
        )
    }

    /// Whether the job is still queued or running
    pub fn is_in_flight(&self) -> bool {
        !self.is_finished()
    }
}

/// What a job body returns
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<T, E> {
    Completed(T),
    Cancelled,
    Failed(E),
}

impl<T, E> From<JobOutcome<T, E>> for JobStatus<T, E> {
    fn from(outcome: JobOutcome<T, E>) -> Self {
        match outcome {
            JobOutcome::Completed(value) => JobStatus::Completed(value),
            JobOutcome::Cancelled => JobStatus::Cancelled,
            JobOutcome::Failed(error) => JobStatus::Failed(error),
        }
    }
}

impl<T, E> From<Result<T, E>> for JobOutcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => JobOutcome::Completed(value),
            Err(error) => JobOutcome::Failed(error),
        }
    }
}

type SharedStatus<T, E> = Arc<Mutex<JobStatus<T, E>>>;

fn lock_status<T, E>(status: &SharedStatus<T, E>) -> MutexGuard<'_, JobStatus<T, E>> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a job running on a background thread
///
/// # Example
///
/// ```
/// use takeoff_scheduler::{spawn_job, CancellationToken, JobOutcome, JobStatus};
///
/// let handle = spawn_job::<u32, String, _>(7, CancellationToken::new(), |token| {
///     if token.is_cancelled() {
///         return JobOutcome::Cancelled;
///     }
///     JobOutcome::Completed(42)
/// });
///
/// assert_eq!(handle.wait(), JobStatus::Completed(42));
/// ```
pub struct JobHandle<T, E> {
    id: JobId,
    token: CancellationToken,
    status: SharedStatus<T, E>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<T, E> JobHandle<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Job identifier
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Snapshot of the current status
    pub fn status(&self) -> JobStatus<T, E> {
        lock_status(&self.status).clone()
    }

    /// Request cooperative cancellation
    ///
    /// The job observes the request at its next checkpoint; a job that has
    /// already finished keeps its terminal status.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the job has reached a terminal state
    pub fn is_finished(&self) -> bool {
        lock_status(&self.status).is_finished()
    }

    /// Block until the job finishes and return its terminal status
    pub fn wait(&self) -> JobStatus<T, E> {
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                // The body panicked before publishing a terminal status.
                let mut status = lock_status(&self.status);
                if status.is_in_flight() {
                    *status = JobStatus::Cancelled;
                }
            }
        }
        self.status()
    }
}

/// Spawn `body` on a new thread and return a handle to it
///
/// The body receives the job's cancellation token and should return
/// [`JobOutcome::Cancelled`] promptly once the token is cancelled.
pub fn spawn_job<T, E, F>(id: JobId, token: CancellationToken, body: F) -> JobHandle<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnOnce(&CancellationToken) -> JobOutcome<T, E> + Send + 'static,
{
    let status: SharedStatus<T, E> = Arc::new(Mutex::new(JobStatus::Pending));
    let worker_status = Arc::clone(&status);
    let worker_token = token.clone();

    let thread = thread::Builder::new()
        .name(format!("takeoff-job-{id}"))
        .spawn(move || {
            if worker_token.is_cancelled() {
                *lock_status(&worker_status) = JobStatus::Cancelled;
                return;
            }
            *lock_status(&worker_status) = JobStatus::Running;
            let outcome = body(&worker_token);
            *lock_status(&worker_status) = outcome.into();
        });

    let thread = match thread {
        Ok(handle) => Some(handle),
        Err(_) => {
            // Thread creation failed; the job never ran.
            *lock_status(&status) = JobStatus::Cancelled;
            None
        }
    };

    JobHandle {
        id,
        token,
        status,
        thread: Mutex::new(thread),
    }
}
