//! Error types for the channel server.
//!
//! Each concern has its own enum so callers can tell a rejected clock
//! registration from a storage fault without string matching.

use crate::persistence::EntityId;
use world_core::WorkerError;

/// Top-level server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding or accepting on the listener failed
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A worker could not be started or stopped
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Anything else that went wrong inside the server
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A world clock event registration that cannot be scheduled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("clock trigger sets no time field")]
    EmptyTrigger,

    #[error("game hour and minute must be set together")]
    IncompleteGameTime,

    #[error("system hour and minute must be set together")]
    IncompleteSystemTime,

    #[error("clock trigger sets both game time and system time")]
    AmbiguousTrigger,

    #[error("{field} value {value} is out of range")]
    OutOfRange { field: &'static str, value: u8 },
}

/// Backing store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store no longer accepts change-sets
    #[error("store '{0}' is closed")]
    Closed(String),

    /// A change-set could not be applied
    #[error("change to entity {entity} rejected: {reason}")]
    Rejected { entity: EntityId, reason: String },
}
