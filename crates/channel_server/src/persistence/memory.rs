//! In-memory backing store.

use super::{BackingStore, Change, ChangeSet, EntityId};
use crate::error::StoreError;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A `DashMap` of JSON records with a transaction queue.
///
/// A change-set fails if it inserts an entity that already exists or
/// updates/deletes one that does not; a failed change-set leaves the records
/// untouched. One flush stops once the timeout has elapsed, leaving the rest
/// of the queue for the next tick.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    records: DashMap<EntityId, Value>,
    queue: Mutex<VecDeque<ChangeSet>>,
    timeout: Duration,
    closed: AtomicBool,
    committed: AtomicU64,
    failed: AtomicU64,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            records: DashMap::new(),
            queue: Mutex::new(VecDeque::new()),
            timeout,
            closed: AtomicBool::new(false),
            committed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ChangeSet>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, entity: &EntityId) -> Option<Value> {
        self.records.get(entity).map(|record| record.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Stops accepting change-sets. Already queued ones are still flushed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn committed_count(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Applies every change of `change_set` or none of them.
    fn apply(&self, change_set: &ChangeSet) -> Result<(), StoreError> {
        // Staged view: Some(value) = present after this set, None = deleted.
        let mut staged: HashMap<EntityId, Option<Value>> = HashMap::new();
        for change in &change_set.changes {
            let entity = change.entity();
            let exists = match staged.get(&entity) {
                Some(state) => state.is_some(),
                None => self.records.contains_key(&entity),
            };
            match change {
                Change::Insert { data, .. } if !exists => {
                    staged.insert(entity, Some(data.clone()));
                }
                Change::Update { data, .. } if exists => {
                    staged.insert(entity, Some(data.clone()));
                }
                Change::Delete { .. } if exists => {
                    staged.insert(entity, None);
                }
                Change::Insert { .. } => {
                    return Err(StoreError::Rejected {
                        entity,
                        reason: "already exists".into(),
                    })
                }
                Change::Update { .. } | Change::Delete { .. } => {
                    return Err(StoreError::Rejected {
                        entity,
                        reason: "does not exist".into(),
                    })
                }
            }
        }

        for (entity, state) in staged {
            match state {
                Some(value) => {
                    self.records.insert(entity, value);
                }
                None => {
                    self.records.remove(&entity);
                }
            }
        }
        Ok(())
    }
}

impl BackingStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue_change_set(&self, change_set: ChangeSet) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed(self.name.clone()));
        }
        self.lock().push_back(change_set);
        Ok(())
    }

    fn process_transaction_queue(&self) -> Vec<EntityId> {
        let started = Instant::now();
        let mut failed = Vec::new();
        let mut processed = 0usize;

        loop {
            if processed > 0 && started.elapsed() >= self.timeout {
                debug!(
                    "⏳ Store '{}' flush hit its timeout after {} change-set(s); {} left queued",
                    self.name,
                    processed,
                    self.pending_count()
                );
                break;
            }
            let Some(change_set) = self.lock().pop_front() else {
                break;
            };
            processed += 1;

            match self.apply(&change_set) {
                Ok(()) => {
                    self.committed.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("💾 Store '{}' rejected change-set {}: {}", self.name, change_set.id, error);
                    for entity in change_set.entities() {
                        if !failed.contains(&entity) {
                            failed.push(entity);
                        }
                    }
                }
            }
        }
        failed
    }

    fn pending_count(&self) -> usize {
        self.lock().len()
    }
}
