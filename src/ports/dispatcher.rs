use std::{fmt, time::Duration};

use thiserror::Error;

use crate::ports::task::ServiceTask;

/// A task refused by a dispatcher, handed back to the caller.
#[derive(Error)]
#[error("task dispatcher is shut down and no longer accepts tasks")]
pub struct Rejected(pub Box<dyn ServiceTask>);

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected").finish_non_exhaustive()
    }
}

/// TaskDispatcher defines the port for running tasks off the reactor thread.
///
/// Implementations must service each submitted task exactly once, on exactly
/// one thread, and must accept `submit` concurrently with workers draining
/// their queue. No ordering between tasks is promised.
pub trait TaskDispatcher: Send + Sync + 'static {
    /// Resize the worker pool.
    fn set_thread_count(&self, count: usize);

    /// Queue a task for asynchronous execution; returns immediately.
    fn submit(&self, task: Box<dyn ServiceTask>) -> Result<(), Rejected>;

    /// Stop all workers, optionally cancelling queued tasks, waiting at most
    /// `timeout`. Returns `true` when every worker exited in time.
    fn shutdown(&self, cancel_pending: bool, timeout: Duration) -> bool;
}
