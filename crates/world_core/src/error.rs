//! Error types for the worker substrate.
//!
//! Queue closure is modelled as a value that hands the rejected item back to
//! the caller; it is the normal shutdown signal rather than a fault.

/// Returned by an enqueue on a closed queue. Carries the rejected item.
#[derive(Debug, thiserror::Error)]
#[error("message queue is closed")]
pub struct QueueClosed<T>(pub T);

impl<T> QueueClosed<T> {
    /// Recovers the item that could not be enqueued.
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Lifecycle errors for a [`Worker`](crate::Worker).
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// `start` was called on a worker that is not in the `Created` state
    #[error("worker '{0}' has already been started")]
    AlreadyStarted(String),

    /// `shutdown` was called on a worker that was never started or has already stopped
    #[error("worker '{0}' is not running")]
    NotRunning(String),

    /// The operating system refused to spawn the worker thread
    #[error("failed to spawn thread for worker '{worker}': {source}")]
    Spawn {
        worker: String,
        #[source]
        source: std::io::Error,
    },

    /// The worker thread panicked before it could be joined
    #[error("worker '{0}' thread panicked")]
    Panicked(String),
}

/// Failure reported by a manager that accepted a message but could not process it.
///
/// This is distinct from a manager declining a message, which is not an error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The payload could not be interpreted
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A follow-up message could not be delivered because its queue was closed
    #[error("follow-up queue is closed")]
    QueueClosed,

    /// Any other processing failure
    #[error("processing failed: {0}")]
    Failed(String),
}
