//! Connection management.
//!
//! * [`ConnectionManager`] - open connections, their worker leases and the
//!   entities their sessions own
//! * [`SessionRegistry`] - the narrow lookup-and-close interface the tick uses
//! * [`ConnectionStateManager`] - the worker-side reaction to lifecycle events

pub mod client;
pub mod manager;
pub mod registry;
pub mod state;

pub use client::{ClientConnection, Outbound};
pub use manager::ConnectionManager;
pub use registry::{CloseReason, SessionRegistry};
pub use state::ConnectionStateManager;
