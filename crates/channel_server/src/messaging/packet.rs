//! Client packet dispatch.
//!
//! [`PacketManager`] looks the command code of each `Packet` message up in a
//! parser table. Codes with no parser are declined so another manager on the
//! worker may take them.

use crate::clock::WorldClockService;
use crate::connection::ConnectionManager;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;
use world_core::{
    Disposition, Manager, ManagerError, Message, MessageBody, MessageCategory, PacketMessage,
    WorkerContext,
};

/// Command codes understood by the built-in parsers.
pub mod commands {
    pub const KEEP_ALIVE: u16 = 0x0001;
    pub const WORLD_TIME: u16 = 0x0002;
}

/// Shared handles available to every parser.
pub struct PacketContext<'a> {
    pub worker: &'a WorkerContext,
    pub connections: &'a ConnectionManager,
    pub clock: &'a WorldClockService,
}

/// Handles one command code.
pub trait PacketParser: Send + Sync {
    fn parse(&self, ctx: &PacketContext<'_>, packet: &PacketMessage) -> Result<(), ManagerError>;
}

/// Echoes the client's 4-byte keep-alive stamp.
#[derive(Debug, Default)]
pub struct KeepAlive;

impl PacketParser for KeepAlive {
    fn parse(&self, ctx: &PacketContext<'_>, packet: &PacketMessage) -> Result<(), ManagerError> {
        if packet.payload.len() != 4 {
            return Err(ManagerError::Malformed(format!(
                "keep-alive payload is {} bytes, expected 4",
                packet.payload.len()
            )));
        }
        ctx.connections
            .send_packet(packet.connection, commands::KEEP_ALIVE, &packet.payload);
        Ok(())
    }
}

/// Replies with the current world clock as JSON.
#[derive(Debug, Default)]
pub struct WorldTime;

impl PacketParser for WorldTime {
    fn parse(&self, ctx: &PacketContext<'_>, packet: &PacketMessage) -> Result<(), ManagerError> {
        let clock = ctx.clock.get();
        let body = serde_json::to_vec(&clock).map_err(|e| ManagerError::Failed(e.to_string()))?;
        ctx.connections
            .send_packet(packet.connection, commands::WORLD_TIME, &body);
        Ok(())
    }
}

/// Accepts a known command the server deliberately ignores.
#[derive(Debug, Default)]
pub struct Unsupported;

impl PacketParser for Unsupported {
    fn parse(&self, _ctx: &PacketContext<'_>, packet: &PacketMessage) -> Result<(), ManagerError> {
        trace!("🙈 Ignoring unsupported command {:#06x}", packet.command_code);
        Ok(())
    }
}

/// Manager for `Packet` messages on the generic workers.
pub struct PacketManager {
    parsers: DashMap<u16, Arc<dyn PacketParser>>,
    connections: Arc<ConnectionManager>,
    clock: Arc<WorldClockService>,
    parsed: AtomicU64,
    declined: AtomicU64,
}

impl PacketManager {
    /// Creates a manager with the built-in parsers registered.
    pub fn new(connections: Arc<ConnectionManager>, clock: Arc<WorldClockService>) -> Self {
        let manager = Self {
            parsers: DashMap::new(),
            connections,
            clock,
            parsed: AtomicU64::new(0),
            declined: AtomicU64::new(0),
        };
        manager.add_parser(commands::KEEP_ALIVE, Arc::new(KeepAlive));
        manager.add_parser(commands::WORLD_TIME, Arc::new(WorldTime));
        manager
    }

    /// Registers or replaces the parser for `command_code`.
    pub fn add_parser(&self, command_code: u16, parser: Arc<dyn PacketParser>) {
        self.parsers.insert(command_code, parser);
    }

    pub fn add_unsupported(&self, command_code: u16) {
        self.add_parser(command_code, Arc::new(Unsupported));
    }

    pub fn parsed_count(&self) -> u64 {
        self.parsed.load(Ordering::Relaxed)
    }

    pub fn declined_count(&self) -> u64 {
        self.declined.load(Ordering::Relaxed)
    }
}

impl Manager for PacketManager {
    fn name(&self) -> &str {
        "packet"
    }

    fn supported_categories(&self) -> &[MessageCategory] {
        &[MessageCategory::Packet]
    }

    fn process_message(
        &self,
        ctx: &WorkerContext,
        message: Message,
    ) -> Result<Disposition, ManagerError> {
        let parser = match message.body() {
            MessageBody::Packet(packet) => self
                .parsers
                .get(&packet.command_code)
                .map(|parser| parser.value().clone()),
            _ => None,
        };
        let Some(parser) = parser else {
            self.declined.fetch_add(1, Ordering::Relaxed);
            return Ok(Disposition::Declined(message));
        };

        if let MessageBody::Packet(packet) = message.body() {
            let packet_ctx = PacketContext {
                worker: ctx,
                connections: &self.connections,
                clock: &self.clock,
            };
            parser.parse(&packet_ctx, packet)?;
            self.parsed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Disposition::Handled)
    }
}
