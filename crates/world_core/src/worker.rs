//! # Workers
//!
//! A [`Worker`] owns one [`WorkerQueue`] and one dedicated thread. The thread
//! blocks in [`MessageQueue::dequeue_all`](crate::MessageQueue::dequeue_all)
//! and offers each message of the returned batch, in arrival order, to the
//! managers registered for its category.
//!
//! ## Lifecycle
//!
//! `Created` → [`start`](Worker::start) → `Running` →
//! [`shutdown`](Worker::shutdown) → `Draining` → `Stopped`
//!
//! Each transition happens exactly once. Managers must be attached before
//! `start`, because the dispatch table is built when the thread is spawned
//! and is owned by that thread from then on.
//!
//! Shutdown closes the queue; messages still buffered at that point are
//! dropped without being delivered.

use crate::error::WorkerError;
use crate::manager::{DispatchOutcome, DispatchTable, Manager, WorkerContext, WorkerQueue};
use crate::message::Message;
use crate::queue::{DequeueStatus, MessageQueue};
use crate::time::SharedTimeSource;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, info_span, trace};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Created,
    Running,
    Draining,
    Stopped,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Created => 0,
            WorkerState::Running => 1,
            WorkerState::Draining => 2,
            WorkerState::Stopped => 3,
        }
    }
}

#[derive(Debug, Default)]
struct WorkerCounters {
    handled: AtomicU64,
    unhandled: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time counters for one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub handled: u64,
    pub unhandled: u64,
    pub failed: u64,
    /// Messages discarded at shutdown without delivery
    pub dropped: u64,
    pub queued: usize,
    pub assigned: usize,
}

/// A single-threaded consumer owning one message queue and a set of managers.
pub struct Worker {
    name: Arc<str>,
    queue: Arc<WorkerQueue>,
    time: SharedTimeSource,
    managers: Vec<Arc<dyn Manager>>,
    state: Arc<AtomicU8>,
    counters: Arc<WorkerCounters>,
    assigned: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Creates a worker in the `Created` state with an empty queue.
    pub fn new(name: impl Into<String>, time: SharedTimeSource) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name.as_str()),
            queue: Arc::new(MessageQueue::new()),
            time,
            managers: Vec::new(),
            state: Arc::new(AtomicU8::new(WorkerState::Created.as_u8())),
            counters: Arc::new(WorkerCounters::default()),
            assigned: Arc::new(AtomicUsize::new(0)),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle to the worker's queue for producers.
    pub fn queue(&self) -> Arc<WorkerQueue> {
        self.queue.clone()
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Registers a manager. Offer order follows registration order.
    pub fn add_manager(&mut self, manager: Arc<dyn Manager>) -> Result<(), WorkerError> {
        if self.state() != WorkerState::Created {
            return Err(WorkerError::AlreadyStarted(self.name.to_string()));
        }
        trace!("🧩 Worker '{}' registered manager '{}'", self.name, manager.name());
        self.managers.push(manager);
        Ok(())
    }

    pub fn manager_count(&self) -> usize {
        self.managers.len()
    }

    /// Builds the dispatch table and spawns the worker thread.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self
            .state
            .compare_exchange(
                WorkerState::Created.as_u8(),
                WorkerState::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(WorkerError::AlreadyStarted(self.name.to_string()));
        }

        let table = DispatchTable::build(&self.managers);
        let ctx = WorkerContext::new(self.name.clone(), self.queue.clone(), self.time.clone());
        let counters = self.counters.clone();

        let spawned = thread::Builder::new()
            .name(self.name.to_string())
            .spawn(move || run_loop(ctx, table, counters));

        match spawned {
            Ok(handle) => {
                debug!("🧵 Worker '{}' started with {} manager(s)", self.name, self.managers.len());
                self.handle = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.state.store(WorkerState::Stopped.as_u8(), Ordering::Release);
                Err(WorkerError::Spawn {
                    worker: self.name.to_string(),
                    source,
                })
            }
        }
    }

    /// Closes the queue and joins the worker thread.
    pub fn shutdown(&mut self) -> Result<(), WorkerError> {
        if self
            .state
            .compare_exchange(
                WorkerState::Running.as_u8(),
                WorkerState::Draining.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(WorkerError::NotRunning(self.name.to_string()));
        }

        self.queue.close();
        let joined = match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        };
        self.state.store(WorkerState::Stopped.as_u8(), Ordering::Release);

        match joined {
            Ok(()) => {
                debug!("🛑 Worker '{}' stopped", self.name);
                Ok(())
            }
            Err(_) => Err(WorkerError::Panicked(self.name.to_string())),
        }
    }

    /// Cloneable handle used to route work to this worker and count its load.
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            name: self.name.clone(),
            queue: self.queue.clone(),
            assigned: self.assigned.clone(),
        }
    }

    /// Number of connections currently leased to this worker.
    pub fn assigned_load(&self) -> usize {
        self.assigned.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            handled: self.counters.handled.load(Ordering::Relaxed),
            unhandled: self.counters.unhandled.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            queued: self.queue.len(),
            assigned: self.assigned_load(),
        }
    }
}

/// Shared view of a worker: its name, its queue and its connection load.
#[derive(Clone)]
pub struct WorkerHandle {
    name: Arc<str>,
    queue: Arc<WorkerQueue>,
    assigned: Arc<AtomicUsize>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &Arc<WorkerQueue> {
        &self.queue
    }

    pub fn load(&self) -> usize {
        self.assigned.load(Ordering::Acquire)
    }

    /// Counts one connection against this worker until the lease is dropped.
    pub fn lease(&self) -> WorkerLease {
        self.assigned.fetch_add(1, Ordering::AcqRel);
        WorkerLease {
            handle: self.clone(),
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("load", &self.load())
            .finish()
    }
}

/// Picks the handle with the fewest leased connections; ties go to the first.
pub fn least_loaded(handles: &[WorkerHandle]) -> Option<&WorkerHandle> {
    handles.iter().min_by_key(|handle| handle.load())
}

/// One connection's claim on a worker. Releases the load when dropped.
#[derive(Debug)]
pub struct WorkerLease {
    handle: WorkerHandle,
}

impl WorkerLease {
    pub fn worker_name(&self) -> &str {
        self.handle.name()
    }

    pub fn queue(&self) -> &Arc<WorkerQueue> {
        self.handle.queue()
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        let _ = self
            .handle
            .assigned
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.shutdown();
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("managers", &self.managers.len())
            .finish()
    }
}

fn run_loop(ctx: WorkerContext, table: DispatchTable, counters: Arc<WorkerCounters>) {
    let span = info_span!("worker", name = %ctx.worker_name());
    let _entered = span.enter();

    let mut batch: Vec<Message> = Vec::new();
    loop {
        match ctx.queue().dequeue_all(&mut batch) {
            DequeueStatus::Received(_) if ctx.queue().is_closed() => {
                counters.dropped.fetch_add(batch.len() as u64, Ordering::Relaxed);
                batch.clear();
                break;
            }
            DequeueStatus::Received(_) => {
                for message in batch.drain(..) {
                    deliver(&ctx, &table, &counters, message);
                }
            }
            DequeueStatus::Closed | DequeueStatus::TimedOut => break,
        }
    }

    let leftover = ctx.queue().drain_remaining();
    if !leftover.is_empty() {
        counters.dropped.fetch_add(leftover.len() as u64, Ordering::Relaxed);
    }
    let dropped = counters.dropped.load(Ordering::Relaxed);
    if dropped > 0 {
        debug!("🗑️ Dropped {} undelivered message(s) at shutdown", dropped);
    }
    info!("✅ Worker loop finished");
}

fn deliver(ctx: &WorkerContext, table: &DispatchTable, counters: &WorkerCounters, message: Message) {
    let category = message.category();
    match table.dispatch(ctx, message) {
        DispatchOutcome::Handled { manager } => {
            trace!("📨 {} message handled by '{}'", category, manager);
            counters.handled.fetch_add(1, Ordering::Relaxed);
        }
        DispatchOutcome::Unhandled => {
            trace!("📭 No manager accepted {} message", category);
            counters.unhandled.fetch_add(1, Ordering::Relaxed);
        }
        DispatchOutcome::Failed { manager, error } => {
            error!("❌ Manager '{}' failed on {} message: {}", manager, category, error);
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ManagerError;
    use crate::manager::Disposition;
    use crate::message::{MessageBody, MessageCategory, Work};
    use crate::time::ManualTimeSource;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    fn time() -> SharedTimeSource {
        Arc::new(ManualTimeSource::default())
    }

    /// Runs `Execute` work, declines everything else.
    struct ExecuteManager;

    impl Manager for ExecuteManager {
        fn name(&self) -> &str {
            "execute"
        }

        fn supported_categories(&self) -> &[MessageCategory] {
            &[MessageCategory::Execute]
        }

        fn process_message(
            &self,
            _ctx: &WorkerContext,
            message: Message,
        ) -> Result<Disposition, ManagerError> {
            match message.into_parts().1 {
                MessageBody::Execute(work) => {
                    work.run();
                    Ok(Disposition::Handled)
                }
                other => Ok(Disposition::Declined(Message::new(other))),
            }
        }
    }

    /// Turns every internal notification into an execute follow-up.
    struct Relay {
        out: mpsc::Sender<String>,
    }

    impl Manager for Relay {
        fn name(&self) -> &str {
            "relay"
        }

        fn supported_categories(&self) -> &[MessageCategory] {
            &[MessageCategory::Internal]
        }

        fn process_message(
            &self,
            ctx: &WorkerContext,
            message: Message,
        ) -> Result<Disposition, ManagerError> {
            if let MessageBody::Internal(note) = message.body() {
                let out = self.out.clone();
                let kind = note.kind.clone();
                ctx.enqueue_follow_up(Message::execute(Work::new("relay", move || {
                    let _ = out.send(kind);
                })))?;
            }
            Ok(Disposition::Handled)
        }
    }

    #[test]
    fn test_lifecycle_transitions_once() {
        let mut worker = Worker::new("lifecycle", time());
        assert_eq!(worker.state(), WorkerState::Created);
        assert!(matches!(worker.shutdown(), Err(WorkerError::NotRunning(_))));

        worker.start().unwrap();
        assert_eq!(worker.state(), WorkerState::Running);
        assert!(matches!(worker.start(), Err(WorkerError::AlreadyStarted(_))));
        assert!(matches!(
            worker.add_manager(Arc::new(ExecuteManager)),
            Err(WorkerError::AlreadyStarted(_))
        ));

        worker.shutdown().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(matches!(worker.shutdown(), Err(WorkerError::NotRunning(_))));
        assert!(worker.queue().is_closed());
    }

    #[test]
    fn test_executes_in_arrival_order() {
        let mut worker = Worker::new("ordered", time());
        worker.add_manager(Arc::new(ExecuteManager)).unwrap();
        worker.start().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel();
        let queue = worker.queue();
        for i in 0..50 {
            let seen = seen.clone();
            queue
                .enqueue(Message::execute(Work::new("push", move || seen.lock().unwrap().push(i))))
                .unwrap();
        }
        queue
            .enqueue(Message::execute(Work::new("done", move || {
                let _ = done_tx.send(());
            })))
            .unwrap();

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());

        worker.shutdown().unwrap();
        assert_eq!(worker.stats().handled, 51);
    }

    #[test]
    fn test_manager_follow_up_is_delivered_to_other_manager() {
        let (tx, rx) = mpsc::channel();
        let mut worker = Worker::new("relay", time());
        worker.add_manager(Arc::new(Relay { out: tx })).unwrap();
        worker.add_manager(Arc::new(ExecuteManager)).unwrap();
        worker.start().unwrap();

        worker
            .queue()
            .enqueue(Message::internal("connected", Vec::new()))
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "connected");

        worker.shutdown().unwrap();
    }

    #[test]
    fn test_unhandled_messages_are_counted_not_failed() {
        let (done_tx, done_rx) = mpsc::channel();
        let mut worker = Worker::new("unhandled", time());
        worker.add_manager(Arc::new(ExecuteManager)).unwrap();
        worker.start().unwrap();

        let queue = worker.queue();
        queue.enqueue(Message::tick()).unwrap();
        queue.enqueue(Message::packet(1, 1, vec![])).unwrap();
        queue
            .enqueue(Message::execute(Work::new("done", move || {
                let _ = done_tx.send(());
            })))
            .unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        worker.shutdown().unwrap();

        let stats = worker.stats();
        assert_eq!(stats.unhandled, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.handled, 1);
    }

    #[test]
    fn test_enqueue_after_shutdown_is_refused() {
        let mut worker = Worker::new("closed", time());
        worker.start().unwrap();
        let queue = worker.queue();
        worker.shutdown().unwrap();
        assert!(queue.enqueue(Message::tick()).is_err());
    }

    #[test]
    fn test_leases_track_load_and_pick_least_loaded() {
        let a = Worker::new("a", time());
        let b = Worker::new("b", time());
        let handles = vec![a.handle(), b.handle()];

        let first = least_loaded(&handles).unwrap().lease();
        assert_eq!(first.worker_name(), "a");
        let second = least_loaded(&handles).unwrap().lease();
        assert_eq!(second.worker_name(), "b");
        let third = least_loaded(&handles).unwrap().lease();
        assert_eq!(third.worker_name(), "a");
        assert_eq!(a.assigned_load(), 2);

        drop(first);
        drop(third);
        assert_eq!(a.assigned_load(), 0);
        assert_eq!(least_loaded(&handles).unwrap().name(), "a");
        assert!(least_loaded(&[]).is_none());
        drop(second);
        assert_eq!(b.assigned_load(), 0);
    }
}
