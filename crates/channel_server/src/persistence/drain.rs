//! Per-tick flush of every backing store.

use super::{BackingStore, EntityId};
use crate::connection::{CloseReason, SessionRegistry};
use std::sync::Arc;
use tracing::{error, warn};
use world_core::ConnectionId;

/// An entity whose change-set failed and what became of its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntity {
    pub store: String,
    pub entity: EntityId,
    /// The session closed because of it, if one owned the entity
    pub closed: Option<ConnectionId>,
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub failed: Vec<FailedEntity>,
    /// Sessions force-closed during this drain, each listed once
    pub closed_sessions: Vec<ConnectionId>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Failed entities no session owned.
    pub fn orphaned(&self) -> impl Iterator<Item = &FailedEntity> {
        self.failed.iter().filter(|failed| failed.closed.is_none())
    }
}

/// The stores flushed by the tick, in flush order.
#[derive(Clone, Default)]
pub struct TransactionDrain {
    stores: Vec<Arc<dyn BackingStore>>,
}

impl TransactionDrain {
    pub fn new(stores: Vec<Arc<dyn BackingStore>>) -> Self {
        Self { stores }
    }

    pub fn add_store(&mut self, store: Arc<dyn BackingStore>) {
        self.stores.push(store);
    }

    pub fn stores(&self) -> &[Arc<dyn BackingStore>] {
        &self.stores
    }

    /// Flushes every store and closes the session owning each failed entity
    /// before returning.
    pub fn drain(&self, sessions: &dyn SessionRegistry) -> DrainReport {
        let mut report = DrainReport::default();
        for store in &self.stores {
            for entity in store.process_transaction_queue() {
                let owner = sessions.session_for_entity(&entity);
                let closed = match owner {
                    Some(connection) if report.closed_sessions.contains(&connection) => Some(connection),
                    Some(connection) => {
                        error!(
                            "💾 Entity {} failed to persist to '{}'; closing connection {}",
                            entity,
                            store.name(),
                            connection
                        );
                        if sessions.close_session(connection, CloseReason::PersistenceFailure) {
                            report.closed_sessions.push(connection);
                        }
                        Some(connection)
                    }
                    None => {
                        warn!(
                            "💾 Entity {} failed to persist to '{}' and has no session",
                            entity,
                            store.name()
                        );
                        None
                    }
                };
                report.failed.push(FailedEntity {
                    store: store.name().to_string(),
                    entity,
                    closed,
                });
            }
        }
        report
    }
}

impl std::fmt::Debug for TransactionDrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stores.iter().map(|store| store.name()).collect();
        f.debug_struct("TransactionDrain").field("stores", &names).finish()
    }
}
