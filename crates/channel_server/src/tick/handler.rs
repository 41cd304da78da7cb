//! One execution of the server tick.
//!
//! Steps, in order, each timed:
//!
//! 1. release the backlog slot taken by the driver
//! 2. advance active zone state
//! 3. flush every backing store; close the session owning each failed entity
//! 4. expire idle client sessions
//! 5. hand crossed world clock events to the clock listeners
//! 6. take every scheduled entry due at the tick time and enqueue it
//!
//! Step 3 finishes before any gameplay-facing work of the tick runs, so no
//! session survives a tick believing unpersisted data is safe.

use super::backlog::TickBacklog;
use crate::clock::WorldClockService;
use crate::connection::SessionRegistry;
use crate::health::metrics::MetricsCollector;
use crate::health::perf::PerformanceTimer;
use crate::persistence::{DrainReport, TransactionDrain};
use crate::schedule::{deliver_due, ScheduledWorkTable};
use crate::zone::{ClockListener, ZoneStateUpdater};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use world_core::{duration_to_server_time, ConnectionId, ServerTime, SharedTimeSource, WorkerQueue};

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick_time: ServerTime,
    pub drain: DrainReport,
    pub expired_sessions: Vec<ConnectionId>,
    pub clock_events_fired: usize,
    pub clock_window_reported: bool,
    pub scheduled_delivered: usize,
    pub steps: Vec<(&'static str, Duration)>,
}

/// Everything the tick touches, gathered once at server construction.
pub struct TickHandler {
    time: SharedTimeSource,
    backlog: Arc<TickBacklog>,
    zones: Arc<dyn ZoneStateUpdater>,
    drain: TransactionDrain,
    sessions: Arc<dyn SessionRegistry>,
    clock: Arc<WorldClockService>,
    clock_listeners: Vec<Arc<dyn ClockListener>>,
    schedule: Arc<ScheduledWorkTable>,
    client_timeout: Option<Duration>,
    slow_step: Duration,
    metrics: Arc<MetricsCollector>,
    ticks: AtomicU64,
}

impl TickHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        time: SharedTimeSource,
        backlog: Arc<TickBacklog>,
        zones: Arc<dyn ZoneStateUpdater>,
        drain: TransactionDrain,
        sessions: Arc<dyn SessionRegistry>,
        clock: Arc<WorldClockService>,
        schedule: Arc<ScheduledWorkTable>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            time,
            backlog,
            zones,
            drain,
            sessions,
            clock,
            clock_listeners: Vec::new(),
            schedule,
            client_timeout: None,
            slow_step: Duration::from_millis(20),
            metrics,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn with_clock_listener(mut self, listener: Arc<dyn ClockListener>) -> Self {
        self.clock_listeners.push(listener);
        self
    }

    /// Idle sessions are closed after `timeout`; `None` disables the check.
    pub fn with_client_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.client_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn with_slow_step(mut self, slow_step: Duration) -> Self {
        self.slow_step = slow_step;
        self
    }

    /// Ticks processed so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Runs one tick. Untargeted scheduled work is enqueued on `own_queue`.
    pub fn run_tick(&self, own_queue: &WorkerQueue) -> TickReport {
        let tick_time = self.time.server_time();
        let mut timer = PerformanceTimer::start("tick", self.slow_step);
        let mut report = TickReport {
            tick_time,
            ..Default::default()
        };

        self.backlog.complete();
        timer.step("backlog");

        self.zones.update_active_zone_states();
        timer.step("zones");

        report.drain = self.drain.drain(self.sessions.as_ref());
        timer.step("transactions");

        if let Some(timeout) = self.client_timeout {
            report.expired_sessions = self
                .sessions
                .expire_idle_sessions(tick_time, duration_to_server_time(timeout));
        }
        timer.step("timeouts");

        if let Some(events) = self.clock.take_clock_events() {
            report.clock_window_reported = true;
            report.clock_events_fired = events.fired.len();
            for listener in &self.clock_listeners {
                listener.handle_timed_actions(&events);
            }
        }
        timer.step("clock");

        let due = self.schedule.take_due(tick_time);
        report.scheduled_delivered = deliver_due(due, own_queue);
        timer.step("scheduled");

        report.steps = timer.finish(Some(&self.metrics));
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.metrics.increment_counter("ticks_total", 1);
        self.metrics
            .increment_counter("persistence_failures_total", report.drain.failed.len() as u64);
        self.metrics
            .set_gauge("scheduled_work_pending", self.schedule.len() as f64);
        report
    }
}

impl std::fmt::Debug for TickHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickHandler")
            .field("ticks", &self.tick_count())
            .field("drain", &self.drain)
            .field("clock_listeners", &self.clock_listeners.len())
            .field("client_timeout", &self.client_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::CloseReason;
    use crate::persistence::{BackingStore, ChangeSet, EntityId, MemoryStore};
    use crate::zone::ActiveZones;
    use dashmap::DashMap;
    use serde_json::json;
    use std::sync::Mutex;
    use world_core::{ManualTimeSource, MessageBody, MessageQueue, TimeSource, Work};

    #[derive(Default)]
    struct Sessions {
        owners: DashMap<EntityId, ConnectionId>,
        closed: Mutex<Vec<ConnectionId>>,
    }

    impl SessionRegistry for Sessions {
        fn session_for_entity(&self, entity: &EntityId) -> Option<ConnectionId> {
            self.owners.get(entity).map(|owner| *owner)
        }

        fn close_session(&self, connection: ConnectionId, _reason: CloseReason) -> bool {
            self.closed.lock().unwrap().push(connection);
            true
        }
    }

    struct Fixture {
        time: Arc<ManualTimeSource>,
        backlog: Arc<TickBacklog>,
        store: Arc<MemoryStore>,
        sessions: Arc<Sessions>,
        schedule: Arc<ScheduledWorkTable>,
        handler: TickHandler,
    }

    fn fixture() -> Fixture {
        let time = Arc::new(ManualTimeSource::new(1_000_000, 1_704_067_200));
        let backlog = Arc::new(TickBacklog::new(2));
        let store = Arc::new(MemoryStore::new("world", Duration::from_secs(1)));
        let sessions = Arc::new(Sessions::default());
        let schedule = Arc::new(ScheduledWorkTable::new());
        let clock = Arc::new(WorldClockService::new(time.clone(), 0, 0));
        let handler = TickHandler::new(
            time.clone(),
            backlog.clone(),
            Arc::new(ActiveZones::new()),
            TransactionDrain::new(vec![store.clone() as Arc<dyn BackingStore>]),
            sessions.clone(),
            clock,
            schedule.clone(),
            Arc::new(MetricsCollector::new()),
        );
        Fixture {
            time,
            backlog,
            store,
            sessions,
            schedule,
            handler,
        }
    }

    #[test]
    fn test_tick_releases_backlog_slot() {
        let f = fixture();
        f.backlog.try_schedule();
        f.backlog.try_schedule();
        f.handler.run_tick(&MessageQueue::new());
        assert_eq!(f.backlog.pending(), 1);
        assert_eq!(f.handler.tick_count(), 1);
    }

    #[test]
    fn test_failed_entity_session_closed_before_tick_returns() {
        let f = fixture();
        let entity = EntityId::new();
        f.sessions.owners.insert(entity, 42);
        f.store
            .queue_change_set(ChangeSet::new().update(entity, json!({"hp": 0})))
            .unwrap();

        let report = f.handler.run_tick(&MessageQueue::new());
        assert_eq!(report.drain.closed_sessions, vec![42]);
        assert_eq!(*f.sessions.closed.lock().unwrap(), vec![42]);
    }

    #[test]
    fn test_due_work_delivered_in_one_tick_in_order() {
        let f = fixture();
        let t = f.time.server_time();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (due, label) in [(t + 50, "second"), (t, "first")] {
            let log = log.clone();
            f.schedule
                .schedule(due, Work::new(label, move || log.lock().unwrap().push(label)));
        }
        f.time.set_server_time(t + 100);

        let queue = MessageQueue::new();
        let report = f.handler.run_tick(&queue);
        assert_eq!(report.tick_time, t + 100);
        assert_eq!(report.scheduled_delivered, 2);

        let mut batch = Vec::new();
        queue.try_dequeue_all(&mut batch);
        for message in batch {
            if let (_, MessageBody::Execute(work)) = message.into_parts() {
                work.run();
            }
        }
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert!(f.schedule.is_empty());
    }

    #[test]
    fn test_work_not_yet_due_stays_scheduled() {
        let f = fixture();
        let t = f.time.server_time();
        f.schedule.schedule(t + 1, Work::new("later", || {}));
        let report = f.handler.run_tick(&MessageQueue::new());
        assert_eq!(report.scheduled_delivered, 0);
        assert_eq!(f.schedule.len(), 1);
    }

    #[test]
    fn test_every_step_is_timed() {
        let f = fixture();
        let report = f.handler.run_tick(&MessageQueue::new());
        let names: Vec<_> = report.steps.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec!["backlog", "zones", "transactions", "timeouts", "clock", "scheduled"]
        );
    }
}
