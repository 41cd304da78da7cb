//! The session lookup the tick needs from the connection layer.

use crate::persistence::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;
use world_core::{ConnectionId, ServerTime};

/// Why a connection was closed by the server or observed closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Data owned by the session failed to persist
    PersistenceFailure,
    /// No traffic within the client timeout
    Timeout,
    /// The client went away
    ClientClosed,
    /// Requested by another server component
    Requested,
    /// The server is stopping
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::PersistenceFailure => "persistence failure",
            CloseReason::Timeout => "timeout",
            CloseReason::ClientClosed => "client closed",
            CloseReason::Requested => "requested",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

/// Resolves persisted entities to sessions and closes sessions.
pub trait SessionRegistry: Send + Sync {
    /// The connection whose session owns `entity`.
    fn session_for_entity(&self, entity: &EntityId) -> Option<ConnectionId>;

    /// Force-closes `connection`. Returns `false` if it was not open.
    fn close_session(&self, connection: ConnectionId, reason: CloseReason) -> bool;

    /// Closes sessions idle since before `now - timeout` and returns them.
    fn expire_idle_sessions(&self, _now: ServerTime, _timeout: ServerTime) -> Vec<ConnectionId> {
        Vec::new()
    }
}
