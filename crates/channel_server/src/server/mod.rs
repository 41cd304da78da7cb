//! Server orchestration and client networking.

pub mod core;
pub mod network;

pub use core::{ChannelServer, NamedWorkerStats, ServerStats};
