//! Manager for notifications from other server components.
//!
//! Routes `Internal` messages by their `kind`. Two kinds are built in:
//! `disconnect` (body: connection id, u64 LE) and `set_game_offset`
//! (body: seconds, i64 LE).

use crate::clock::WorldClockService;
use crate::connection::{CloseReason, ConnectionManager};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};
use world_core::{
    Disposition, InternalNotification, Manager, ManagerError, Message, MessageBody,
    MessageCategory, WorkerContext,
};

pub const DISCONNECT: &str = "disconnect";
pub const SET_GAME_OFFSET: &str = "set_game_offset";

type InternalHandler =
    Arc<dyn Fn(&WorkerContext, &InternalNotification) -> Result<(), ManagerError> + Send + Sync>;

pub struct InternalManager {
    handlers: DashMap<String, InternalHandler>,
}

impl InternalManager {
    /// Creates a manager with the built-in handlers registered.
    pub fn new(connections: Arc<ConnectionManager>, clock: Arc<WorldClockService>) -> Self {
        let manager = Self {
            handlers: DashMap::new(),
        };

        manager.add_handler(DISCONNECT, move |_, note| {
            let connection = u64::from_le_bytes(read_8(note)?);
            if connections.close_connection(connection, CloseReason::Requested) {
                info!("📨 Connection {} disconnected on request", connection);
            } else {
                debug!("📨 Disconnect request for unknown connection {}", connection);
            }
            Ok(())
        });

        manager.add_handler(SET_GAME_OFFSET, move |_, note| {
            let offset = i64::from_le_bytes(read_8(note)?);
            clock.set_game_offset(offset);
            info!("🕰️ Game time offset set to {}s", offset);
            Ok(())
        });

        manager
    }

    /// Registers or replaces the handler for `kind`.
    pub fn add_handler<F>(&self, kind: &str, handler: F)
    where
        F: Fn(&WorkerContext, &InternalNotification) -> Result<(), ManagerError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(kind.to_string(), Arc::new(handler));
    }
}

fn read_8(note: &InternalNotification) -> Result<[u8; 8], ManagerError> {
    note.body.as_slice().try_into().map_err(|_| {
        ManagerError::Malformed(format!(
            "'{}' body is {} bytes, expected 8",
            note.kind,
            note.body.len()
        ))
    })
}

impl Manager for InternalManager {
    fn name(&self) -> &str {
        "internal"
    }

    fn supported_categories(&self) -> &[MessageCategory] {
        &[MessageCategory::Internal]
    }

    fn process_message(
        &self,
        ctx: &WorkerContext,
        message: Message,
    ) -> Result<Disposition, ManagerError> {
        let handler = match message.body() {
            MessageBody::Internal(note) => self
                .handlers
                .get(&note.kind)
                .map(|handler| handler.value().clone()),
            _ => None,
        };
        let Some(handler) = handler else {
            return Ok(Disposition::Declined(message));
        };
        if let MessageBody::Internal(note) = message.body() {
            handler(ctx, note)?;
        }
        Ok(Disposition::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use world_core::{ManualTimeSource, MessageQueue, SystemTimeSource, Worker};

    fn context() -> WorkerContext {
        WorkerContext::new(Arc::from("main"), Arc::new(MessageQueue::new()), SystemTimeSource::shared())
    }

    #[test]
    fn test_disconnect_closes_connection() {
        let worker = Worker::new("generic-0", SystemTimeSource::shared());
        let connections = Arc::new(ConnectionManager::new());
        let clock = Arc::new(WorldClockService::new(SystemTimeSource::shared(), 0, 0));
        let manager = InternalManager::new(connections.clone(), clock);

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let id = connections.add_connection("127.0.0.1:1".parse().unwrap(), worker.handle().lease(), tx, 0);

        let message = Message::internal(DISCONNECT, id.to_le_bytes().to_vec());
        assert!(matches!(
            manager.process_message(&context(), message).unwrap(),
            Disposition::Handled
        ));
        assert!(!connections.is_connected(id));
    }

    #[test]
    fn test_set_game_offset_and_malformed_body() {
        let time = Arc::new(ManualTimeSource::new(0, 1_704_067_200));
        let clock = Arc::new(WorldClockService::new(time, 0, 0));
        let manager = InternalManager::new(Arc::new(ConnectionManager::new()), clock.clone());

        let message = Message::internal(SET_GAME_OFFSET, 120i64.to_le_bytes().to_vec());
        manager.process_message(&context(), message).unwrap();
        assert_eq!(clock.get().game_offset, 120);

        let bad = Message::internal(SET_GAME_OFFSET, vec![1, 2]);
        assert!(matches!(
            manager.process_message(&context(), bad),
            Err(ManagerError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_kind_is_declined() {
        let clock = Arc::new(WorldClockService::new(SystemTimeSource::shared(), 0, 0));
        let manager = InternalManager::new(Arc::new(ConnectionManager::new()), clock);
        assert!(matches!(
            manager.process_message(&context(), Message::internal("nope", vec![])).unwrap(),
            Disposition::Declined(_)
        ));
    }
}
