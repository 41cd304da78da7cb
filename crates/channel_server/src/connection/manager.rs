//! Connection manager for tracking client connections and their sessions.
//!
//! Connections are stored in a `DashMap` so worker threads, the tick and
//! the async network tasks can all reach them without a global lock. Every
//! connection is bound to the worker queue it was assigned at accept time;
//! lifecycle notifications for it are enqueued on that queue.

use super::client::{ClientConnection, Outbound};
use super::registry::{CloseReason, SessionRegistry};
use crate::messaging::codec::encode_frame;
use crate::persistence::EntityId;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use world_core::{ConnectionEvent, ConnectionId, Message, ServerTime, WorkerLease};

/// Central registry of open connections.
#[derive(Debug)]
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, ClientConnection>,
    /// Entity -> owning connection
    owners: DashMap<EntityId, ConnectionId>,
    next_id: AtomicU64,
    closed_total: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            owners: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed_total: AtomicU64::new(0),
        }
    }

    /// Registers a new connection on the leased worker and announces it there.
    pub fn add_connection(
        &self,
        remote_addr: SocketAddr,
        lease: WorkerLease,
        outbound: UnboundedSender<Outbound>,
        now: ServerTime,
    ) -> ConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = lease.queue().clone();
        let worker = lease.worker_name().to_string();
        self.connections.insert(
            connection_id,
            ClientConnection::new(remote_addr, lease, outbound, now),
        );
        info!("🔗 Connection {} from {} assigned to {}", connection_id, remote_addr, worker);

        let event = ConnectionEvent::Connected {
            connection: connection_id,
            remote_addr,
        };
        if queue.enqueue(Message::connection(event)).is_err() {
            debug!("Worker '{}' closed before connection {} was announced", worker, connection_id);
        }
        connection_id
    }

    /// Records that `connection`'s session owns `entity`.
    pub fn bind_entity(&self, connection: ConnectionId, entity: EntityId) -> bool {
        let Some(mut record) = self.connections.get_mut(&connection) else {
            return false;
        };
        if !record.entities.contains(&entity) {
            record.entities.push(entity);
        }
        drop(record);
        self.owners.insert(entity, connection);
        true
    }

    pub fn unbind_entity(&self, entity: &EntityId) {
        if let Some((_, connection)) = self.owners.remove(entity) {
            if let Some(mut record) = self.connections.get_mut(&connection) {
                record.entities.retain(|owned| owned != entity);
            }
        }
    }

    /// Refreshes the idle timer of `connection`.
    pub fn touch(&self, connection: ConnectionId, now: ServerTime) {
        if let Some(mut record) = self.connections.get_mut(&connection) {
            record.last_activity = record.last_activity.max(now);
        }
    }

    /// Hands a decoded client packet to the connection's worker and refreshes
    /// its idle timer. Returns `false` if the connection is gone or its
    /// worker no longer accepts messages.
    pub fn submit_packet(
        &self,
        connection: ConnectionId,
        command_code: u16,
        payload: Vec<u8>,
        now: ServerTime,
    ) -> bool {
        let Some(mut record) = self.connections.get_mut(&connection) else {
            return false;
        };
        record.last_activity = record.last_activity.max(now);
        record
            .lease
            .queue()
            .enqueue(Message::packet(connection, command_code, payload))
            .is_ok()
    }

    /// Frames and queues a packet for the client.
    pub fn send_packet(&self, connection: ConnectionId, command_code: u16, payload: &[u8]) -> bool {
        let frame = match encode_frame(command_code, payload) {
            Ok(frame) => frame,
            Err(error) => {
                warn!("📦 Not sending packet {:#06x} to {}: {}", command_code, connection, error);
                return false;
            }
        };
        match self.connections.get(&connection) {
            Some(record) => record.outbound.send(Outbound::Packet(frame)).is_ok(),
            None => false,
        }
    }

    /// Removes `connection`, tells its network task to close the socket and
    /// notifies its worker. Returns `false` if it was already gone.
    pub fn close_connection(&self, connection: ConnectionId, reason: CloseReason) -> bool {
        let Some((_, record)) = self.connections.remove(&connection) else {
            return false;
        };
        for entity in &record.entities {
            self.owners.remove_if(entity, |_, owner| *owner == connection);
        }
        self.closed_total.fetch_add(1, Ordering::Relaxed);

        let _ = record.outbound.send(Outbound::Close);
        let event = match reason {
            CloseReason::Timeout => ConnectionEvent::TimedOut { connection },
            _ => ConnectionEvent::Closed { connection },
        };
        if record.lease.queue().enqueue(Message::connection(event)).is_err() {
            debug!("Worker '{}' closed before connection {} close was announced", record.worker_name(), connection);
        }

        match reason {
            CloseReason::ClientClosed | CloseReason::Shutdown => {
                info!("❌ Connection {} from {} disconnected ({})", connection, record.remote_addr, reason)
            }
            _ => warn!("⛔ Connection {} from {} closed by server: {}", connection, record.remote_addr, reason),
        }
        true
    }

    /// Closes every open connection.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.close_connection(*id, reason))
            .count()
    }

    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn remote_addr(&self, connection: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&connection).map(|record| record.remote_addr)
    }

    /// Entities owned by the session on `connection`.
    pub fn entities_of(&self, connection: ConnectionId) -> Vec<EntityId> {
        self.connections
            .get(&connection)
            .map(|record| record.entities.clone())
            .unwrap_or_default()
    }

    /// Connections closed since start.
    pub fn closed_total(&self) -> u64 {
        self.closed_total.load(Ordering::Relaxed)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry for ConnectionManager {
    fn session_for_entity(&self, entity: &EntityId) -> Option<ConnectionId> {
        self.owners.get(entity).map(|owner| *owner)
    }

    fn close_session(&self, connection: ConnectionId, reason: CloseReason) -> bool {
        self.close_connection(connection, reason)
    }

    fn expire_idle_sessions(&self, now: ServerTime, timeout: ServerTime) -> Vec<ConnectionId> {
        let idle: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_idle(now, timeout))
            .map(|entry| *entry.key())
            .collect();
        idle.into_iter()
            .filter(|id| self.close_connection(*id, CloseReason::Timeout))
            .collect()
    }
}
