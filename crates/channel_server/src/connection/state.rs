//! Manager reacting to connection lifecycle messages.

use super::manager::ConnectionManager;
use super::registry::CloseReason;
use crate::zone::ActiveZones;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use world_core::{
    ConnectionEvent, Disposition, Manager, ManagerError, Message, MessageBody, MessageCategory,
    WorkerContext,
};

/// Keeps zone bookkeeping in step with connections on the worker that owns
/// them.
pub struct ConnectionStateManager {
    connections: Arc<ConnectionManager>,
    zones: Arc<ActiveZones>,
    connected: AtomicU64,
    disconnected: AtomicU64,
}

impl ConnectionStateManager {
    pub fn new(connections: Arc<ConnectionManager>, zones: Arc<ActiveZones>) -> Self {
        Self {
            connections,
            zones,
            connected: AtomicU64::new(0),
            disconnected: AtomicU64::new(0),
        }
    }

    pub fn connected_count(&self) -> u64 {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn disconnected_count(&self) -> u64 {
        self.disconnected.load(Ordering::Relaxed)
    }
}

impl Manager for ConnectionStateManager {
    fn name(&self) -> &str {
        "connection_state"
    }

    fn supported_categories(&self) -> &[MessageCategory] {
        &[MessageCategory::Connection]
    }

    fn process_message(
        &self,
        ctx: &WorkerContext,
        message: Message,
    ) -> Result<Disposition, ManagerError> {
        let event = match message.into_parts() {
            (_, MessageBody::Connection(event)) => event,
            (correlation, body) => {
                let mut message = Message::new(body);
                if let Some(correlation) = correlation {
                    message = message.with_correlation(correlation);
                }
                return Ok(Disposition::Declined(message));
            }
        };

        match event {
            ConnectionEvent::Connected { connection, remote_addr } => {
                self.connected.fetch_add(1, Ordering::Relaxed);
                debug!("👋 {} now serving connection {} ({})", ctx.worker_name(), connection, remote_addr);
            }
            ConnectionEvent::Closed { connection } | ConnectionEvent::TimedOut { connection } => {
                self.disconnected.fetch_add(1, Ordering::Relaxed);
                if let Some(zone) = self.zones.leave(connection) {
                    debug!("🗺️ Connection {} removed from zone {}", connection, zone);
                }
                // Already gone when the server closed it.
                self.connections.close_connection(connection, CloseReason::ClientClosed);
            }
        }
        Ok(Disposition::Handled)
    }
}
