//! # Persistence contract
//!
//! Collaborators queue [`ChangeSet`]s on a [`BackingStore`]; once per tick
//! the server asks every store to flush its queue and report the entities
//! whose change-set did not commit. The contents of a change-set are opaque
//! to the tick; only the failed entity ids matter.

pub mod drain;
pub mod memory;

pub use drain::{DrainReport, FailedEntity, TransactionDrain};
pub use memory::MemoryStore;

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Identifier of a persisted entity (account, character, item, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One mutation inside a change-set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    Insert { entity: EntityId, data: Value },
    Update { entity: EntityId, data: Value },
    Delete { entity: EntityId },
}

impl Change {
    pub fn entity(&self) -> EntityId {
        match self {
            Change::Insert { entity, .. }
            | Change::Update { entity, .. }
            | Change::Delete { entity } => *entity,
        }
    }
}

/// A batch of mutations that commits or fails as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: Uuid,
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            changes: Vec::new(),
        }
    }

    pub fn insert(mut self, entity: EntityId, data: Value) -> Self {
        self.changes.push(Change::Insert { entity, data });
        self
    }

    pub fn update(mut self, entity: EntityId, data: Value) -> Self {
        self.changes.push(Change::Update { entity, data });
        self
    }

    pub fn delete(mut self, entity: EntityId) -> Self {
        self.changes.push(Change::Delete { entity });
        self
    }

    /// Distinct entities touched by this change-set, in first-touch order.
    pub fn entities(&self) -> Vec<EntityId> {
        let mut seen = Vec::new();
        for change in &self.changes {
            let entity = change.entity();
            if !seen.contains(&entity) {
                seen.push(entity);
            }
        }
        seen
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl Default for ChangeSet {
    fn default() -> Self {
        Self::new()
    }
}

/// A store with a queue of pending change-sets.
pub trait BackingStore: Send + Sync {
    fn name(&self) -> &str;

    /// Adds a change-set to the pending queue.
    fn queue_change_set(&self, change_set: ChangeSet) -> Result<(), StoreError>;

    /// Flushes pending change-sets and returns the entities of every
    /// change-set that failed to commit.
    fn process_transaction_queue(&self) -> Vec<EntityId>;

    /// Number of change-sets still waiting.
    fn pending_count(&self) -> usize;
}
