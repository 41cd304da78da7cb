//! Time-keyed deferred work.
//!
//! Work is keyed by the monotonic server time it becomes due. Each tick
//! takes every entry due at or before the tick time in one locked step, so
//! an entry is handed out exactly once and never before its time.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use world_core::{Message, QueueClosed, ServerTime, Work, WorkerQueue};

/// One deferred callback and the queue it should run on.
#[derive(Debug)]
pub struct ScheduledEntry {
    pub due: ServerTime,
    /// `None` runs the work on the queue that drains the table
    pub target: Option<Arc<WorkerQueue>>,
    pub work: Work,
}

/// Ordered map from due time to the callbacks registered for it.
#[derive(Debug, Default)]
pub struct ScheduledWorkTable {
    entries: Mutex<BTreeMap<ServerTime, Vec<ScheduledEntry>>>,
}

impl ScheduledWorkTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ServerTime, Vec<ScheduledEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules `work` to run on the draining queue at `due`.
    pub fn schedule(&self, due: ServerTime, work: Work) {
        self.insert(ScheduledEntry {
            due,
            target: None,
            work,
        });
    }

    /// Schedules `work` to run on `queue` at `due`.
    pub fn schedule_on(&self, due: ServerTime, queue: Arc<WorkerQueue>, work: Work) {
        self.insert(ScheduledEntry {
            due,
            target: Some(queue),
            work,
        });
    }

    fn insert(&self, entry: ScheduledEntry) {
        self.lock().entry(entry.due).or_default().push(entry);
    }

    /// Removes and returns every entry due at or before `now`, in ascending
    /// due time and then insertion order.
    pub fn take_due(&self, now: ServerTime) -> Vec<ScheduledEntry> {
        let due = {
            let mut entries = self.lock();
            match now.checked_add(1) {
                Some(split) => {
                    let later = entries.split_off(&split);
                    std::mem::replace(&mut *entries, later)
                }
                None => std::mem::take(&mut *entries),
            }
        };
        due.into_values().flatten().collect()
    }

    /// Earliest due time still in the table.
    pub fn next_due(&self) -> Option<ServerTime> {
        self.lock().keys().next().copied()
    }

    /// Number of callbacks waiting.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Enqueues taken entries as `Execute` messages, in the order given.
///
/// Entries without a target go to `fallback` in one batch. Work whose queue
/// has been closed is dropped. Returns how many callbacks were enqueued.
pub fn deliver_due(entries: Vec<ScheduledEntry>, fallback: &WorkerQueue) -> usize {
    let mut delivered = 0;
    let mut local = Vec::new();
    for ScheduledEntry { due, target, work } in entries {
        let Some(queue) = target else {
            local.push(Message::execute(work));
            continue;
        };
        match queue.enqueue(Message::execute(work)) {
            Ok(()) => delivered += 1,
            Err(QueueClosed(message)) => {
                debug!("🗑️ Dropping scheduled work due at {}: queue closed ({:?})", due, message);
            }
        }
    }

    if !local.is_empty() {
        let count = local.len();
        match fallback.enqueue_all(local) {
            Ok(()) => delivered += count,
            Err(QueueClosed(dropped)) => {
                debug!("🗑️ Dropping {} scheduled work item(s): queue closed", dropped.len());
            }
        }
    }
    delivered
}
