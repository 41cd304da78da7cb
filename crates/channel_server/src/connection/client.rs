//! Per-connection record.

use crate::persistence::EntityId;
use std::net::SocketAddr;
use tokio::sync::mpsc::UnboundedSender;
use world_core::{ServerTime, WorkerLease};

/// Instructions for the network task that owns the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded frame to write
    Packet(Vec<u8>),
    /// Flush and close the socket
    Close,
}

/// One client connection.
///
/// Holding the record holds the connection's lease on its worker, so the
/// worker's load drops as soon as the record is removed.
#[derive(Debug)]
pub struct ClientConnection {
    pub remote_addr: SocketAddr,
    /// Server time the connection was accepted
    pub connected_at: ServerTime,
    /// Server time of the last complete packet
    pub last_activity: ServerTime,
    /// Persisted entities owned by this session
    pub entities: Vec<EntityId>,
    pub(crate) lease: WorkerLease,
    pub(crate) outbound: UnboundedSender<Outbound>,
}

impl ClientConnection {
    pub fn new(
        remote_addr: SocketAddr,
        lease: WorkerLease,
        outbound: UnboundedSender<Outbound>,
        now: ServerTime,
    ) -> Self {
        Self {
            remote_addr,
            connected_at: now,
            last_activity: now,
            entities: Vec::new(),
            lease,
            outbound,
        }
    }

    pub fn worker_name(&self) -> &str {
        self.lease.worker_name()
    }

    /// Whether the connection has been silent for longer than `timeout`.
    pub fn is_idle(&self, now: ServerTime, timeout: ServerTime) -> bool {
        now.saturating_sub(self.last_activity) > timeout
    }
}
