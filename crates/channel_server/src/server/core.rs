//! Core channel server implementation.
//!
//! `ChannelServer` owns every worker and shared service of one channel:
//!
//! * **main worker**: internal notifications (disconnect requests, clock
//!   offset changes) and deferred work aimed at it
//! * **queue worker**: the tick and untargeted deferred work
//! * **generic workers**: client packets and connection lifecycle events,
//!   one worker per connection chosen by least load
//!
//! Workers are plain OS threads. The optional network listener runs on the
//! caller's tokio runtime and only ever talks to workers through their queues.

use crate::clock::{WorldClockService, SYSTEM_DAY_SECS};
use crate::config::ServerConfig;
use crate::connection::{CloseReason, ConnectionManager, ConnectionStateManager, SessionRegistry};
use crate::error::ServerError;
use crate::health::{check_health, HealthCheckResult, HealthThresholds, MetricsCollector};
use crate::messaging::{InternalManager, PacketManager};
use crate::persistence::{BackingStore, TransactionDrain};
use crate::schedule::ScheduledWorkTable;
use crate::server::network::accept_loop;
use crate::tick::{BacklogSnapshot, SystemManager, TickBacklog, TickDriver, TickHandler, WorkExecutor};
use crate::zone::{ActiveZones, ClockListener, ZoneStateUpdater};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use world_core::{
    duration_to_server_time, least_loaded, Manager, Message, ServerTime, SharedTimeSource,
    ShutdownState, Work, Worker, WorkerError, WorkerHandle, WorkerLease, WorkerQueue, WorkerState,
    WorkerStats,
};

/// Counters for one worker, tagged with its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedWorkerStats {
    pub name: String,
    pub state: WorkerState,
    pub stats: WorkerStats,
}

/// Point-in-time view of the whole server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStats {
    pub running: bool,
    pub uptime: Duration,
    pub connections: usize,
    pub workers: Vec<NamedWorkerStats>,
    pub backlog: BacklogSnapshot,
    pub ticks: u64,
    pub scheduled_pending: usize,
    /// Server time the earliest scheduled work falls due
    pub next_scheduled: Option<ServerTime>,
}

/// The channel server.
pub struct ChannelServer {
    config: ServerConfig,
    time: SharedTimeSource,
    shutdown_state: ShutdownState,
    started_at: Instant,

    main: Worker,
    queue_worker: Worker,
    generic: Vec<Worker>,
    generic_handles: Vec<WorkerHandle>,

    stores: Vec<Arc<dyn BackingStore>>,
    clock: Arc<WorldClockService>,
    schedule: Arc<ScheduledWorkTable>,
    connections: Arc<ConnectionManager>,
    zones: Arc<ActiveZones>,
    metrics: Arc<MetricsCollector>,
    backlog: Arc<TickBacklog>,
    packets: Arc<PacketManager>,
    clock_listeners: Vec<Arc<dyn ClockListener>>,

    tick_handler: Option<Arc<TickHandler>>,
    driver: Option<TickDriver>,
    network: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl ChannelServer {
    /// Builds every worker and service. Nothing runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// `ServerError::Config` when `config` fails validation.
    pub fn new(
        config: ServerConfig,
        stores: Vec<Arc<dyn BackingStore>>,
        time: SharedTimeSource,
    ) -> Result<Self, ServerError> {
        config.validate().map_err(ServerError::Config)?;

        let clock = Arc::new(WorldClockService::new(
            time.clone(),
            config.game_offset_secs,
            config.time_offset_minutes,
        ));
        let connections = Arc::new(ConnectionManager::new());
        let zones = Arc::new(ActiveZones::new());
        let packets = Arc::new(PacketManager::new(connections.clone(), clock.clone()));
        let executor: Arc<dyn Manager> = Arc::new(WorkExecutor);

        let mut main = Worker::new("main", time.clone());
        main.add_manager(Arc::new(InternalManager::new(connections.clone(), clock.clone())))?;
        main.add_manager(executor.clone())?;

        let queue_worker = Worker::new("queue", time.clone());

        let connection_state: Arc<dyn Manager> =
            Arc::new(ConnectionStateManager::new(connections.clone(), zones.clone()));
        let mut generic = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let mut worker = Worker::new(format!("generic-{index}"), time.clone());
            worker.add_manager(packets.clone())?;
            worker.add_manager(connection_state.clone())?;
            worker.add_manager(executor.clone())?;
            generic.push(worker);
        }
        let generic_handles = generic.iter().map(Worker::handle).collect();

        info!(
            "🏗️ Channel server built: {} generic worker(s), {} backing store(s)",
            config.worker_count,
            stores.len()
        );

        Ok(Self {
            backlog: Arc::new(TickBacklog::new(config.tick_backlog_cap)),
            config,
            time,
            shutdown_state: ShutdownState::new(),
            started_at: Instant::now(),
            main,
            queue_worker,
            generic,
            generic_handles,
            stores,
            clock,
            schedule: Arc::new(ScheduledWorkTable::new()),
            connections,
            zones,
            metrics: Arc::new(MetricsCollector::new()),
            packets,
            clock_listeners: Vec::new(),
            tick_handler: None,
            driver: None,
            network: None,
            local_addr: None,
        })
    }

    /// Adds a listener for crossed world clock events. Only valid before `start`.
    pub fn add_clock_listener(&mut self, listener: Arc<dyn ClockListener>) -> Result<(), ServerError> {
        if self.tick_handler.is_some() {
            return Err(WorkerError::AlreadyStarted(self.queue_worker.name().to_string()).into());
        }
        self.clock_listeners.push(listener);
        Ok(())
    }

    /// Attaches `manager` to every generic worker. Only valid before `start`.
    pub fn add_generic_manager(&mut self, manager: Arc<dyn Manager>) -> Result<(), ServerError> {
        for worker in &mut self.generic {
            worker.add_manager(manager.clone())?;
        }
        Ok(())
    }

    /// Starts every worker and then the tick driver.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.tick_handler.is_some() {
            return Err(ServerError::Internal("channel server already started".to_string()));
        }

        let zones: Arc<dyn ZoneStateUpdater> = self.zones.clone();
        let sessions: Arc<dyn SessionRegistry> = self.connections.clone();
        let mut handler = TickHandler::new(
            self.time.clone(),
            self.backlog.clone(),
            zones,
            TransactionDrain::new(self.stores.clone()),
            sessions,
            self.clock.clone(),
            self.schedule.clone(),
            self.metrics.clone(),
        )
        .with_clock_listener(self.zones.clone())
        .with_client_timeout(Some(Duration::from_secs(self.config.client_timeout_secs)))
        .with_slow_step(Duration::from_micros(self.config.slow_tick_step_us));
        for listener in &self.clock_listeners {
            handler = handler.with_clock_listener(listener.clone());
        }
        let handler = Arc::new(handler);

        self.queue_worker
            .add_manager(Arc::new(SystemManager::new(handler.clone())))?;
        self.queue_worker.add_manager(Arc::new(WorkExecutor))?;
        self.tick_handler = Some(handler);

        self.main.start()?;
        self.queue_worker.start()?;
        for worker in &mut self.generic {
            worker.start()?;
        }

        self.driver = Some(TickDriver::start(
            self.queue_worker.queue(),
            self.backlog.clone(),
            self.config.tick_interval(),
            self.config.missed_tick_report_every(),
        )?);

        let reset = DailyReset {
            schedule: self.schedule.clone(),
            clock: self.clock.clone(),
            time: self.time.clone(),
            zones: self.zones.clone(),
        };
        let until = self.clock.time_until_midnight();
        let midnight = self.clock.get().system_time + until;
        reset.schedule_at(midnight);
        debug!("🌙 Daily reset armed for system midnight in {}s", until);

        info!(
            "🚀 Channel server started with {} worker thread(s)",
            self.generic.len() + 2
        );
        Ok(())
    }

    /// Binds the client listener and spawns the accept loop on the current
    /// tokio runtime. Returns the bound address, or `None` when networking is
    /// disabled in the configuration.
    pub async fn start_network(&mut self) -> Result<Option<SocketAddr>, ServerError> {
        if !self.config.enable_network {
            info!("📴 Network listener disabled");
            return Ok(None);
        }
        if self.tick_handler.is_none() {
            return Err(ServerError::Internal(
                "workers must be started before the network listener".to_string(),
            ));
        }
        if self.network.is_some() {
            return Ok(self.local_addr);
        }

        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| ServerError::Network(format!("bind {} failed: {e}", self.config.bind_address)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Network(format!("local address unavailable: {e}")))?;

        self.network = Some(tokio::spawn(accept_loop(
            listener,
            self.connections.clone(),
            self.generic_handles.clone(),
            self.time.clone(),
            self.shutdown_state.clone(),
        )));
        self.local_addr = Some(local_addr);
        info!("🌐 Listening for clients on {}", local_addr);
        Ok(Some(local_addr))
    }

    /// Leases the least-loaded generic worker for a new connection.
    pub fn assign_worker(&self) -> Result<WorkerLease, ServerError> {
        least_loaded(&self.generic_handles)
            .map(WorkerHandle::lease)
            .ok_or_else(|| ServerError::Internal("no generic workers".to_string()))
    }

    /// Defers `work` to the first tick at or after `due`; it runs on the queue worker.
    pub fn schedule_work(&self, due: ServerTime, work: Work) {
        self.schedule.schedule(due, work);
    }

    /// Defers `work` to the first tick at or after `due`; it runs on `queue`.
    pub fn schedule_work_on(&self, due: ServerTime, queue: Arc<WorkerQueue>, work: Work) {
        self.schedule.schedule_on(due, queue, work);
    }

    /// Defers `work` by `delay` from the current server time.
    pub fn schedule_work_in(&self, delay: Duration, work: Work) -> ServerTime {
        let due = self
            .time
            .server_time()
            .saturating_add(duration_to_server_time(delay));
        self.schedule.schedule(due, work);
        due
    }

    /// Posts an internal notification to the main worker.
    pub fn notify(&self, kind: &str, body: Vec<u8>) -> Result<(), ServerError> {
        self.main
            .queue()
            .enqueue(Message::internal(kind, body))
            .map_err(|_| WorkerError::NotRunning(self.main.name().to_string()).into())
    }

    /// Stops the tick driver and the listener, closes every connection, then
    /// shuts the workers down. Stores get one last flush once no worker can
    /// queue more changes. Calling this twice is a no-op.
    pub fn shutdown(&mut self) -> Result<(), ServerError> {
        if !self.shutdown_state.initiate_shutdown() {
            return Ok(());
        }

        if let Some(mut driver) = self.driver.take() {
            driver.stop();
        }
        if let Some(network) = self.network.take() {
            network.abort();
        }

        let closed = self.connections.close_all(CloseReason::Shutdown);
        if closed > 0 {
            info!("🔌 Closed {} client connection(s)", closed);
        }

        let mut first_error = None;
        let workers = self
            .generic
            .iter_mut()
            .chain([&mut self.queue_worker, &mut self.main]);
        for worker in workers {
            if worker.state() != WorkerState::Running {
                continue;
            }
            if let Err(e) = worker.shutdown() {
                error!("❌ Worker '{}' failed to shut down: {}", worker.name(), e);
                first_error.get_or_insert(ServerError::from(e));
            }
        }

        let report = TransactionDrain::new(self.stores.clone()).drain(self.connections.as_ref());
        if !report.is_clean() {
            warn!(
                "⚠️ {} entity change(s) failed during the final flush",
                report.failed.len()
            );
        }

        self.shutdown_state.complete_shutdown();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.tick_handler.is_some() && self.shutdown_state.is_running()
    }

    pub fn shutdown_state(&self) -> &ShutdownState {
        &self.shutdown_state
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn clock(&self) -> &Arc<WorldClockService> {
        &self.clock
    }

    pub fn schedule(&self) -> &Arc<ScheduledWorkTable> {
        &self.schedule
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn zones(&self) -> &Arc<ActiveZones> {
        &self.zones
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn backlog(&self) -> &Arc<TickBacklog> {
        &self.backlog
    }

    pub fn packet_manager(&self) -> &Arc<PacketManager> {
        &self.packets
    }

    /// Queue of the main worker.
    pub fn main_queue(&self) -> Arc<WorkerQueue> {
        self.main.queue()
    }

    /// Queue of the worker that runs the tick.
    pub fn tick_queue(&self) -> Arc<WorkerQueue> {
        self.queue_worker.queue()
    }

    pub fn generic_workers(&self) -> &[WorkerHandle] {
        &self.generic_handles
    }

    pub fn stats(&self) -> ServerStats {
        let workers = std::iter::once(&self.main)
            .chain(std::iter::once(&self.queue_worker))
            .chain(self.generic.iter())
            .map(|worker| NamedWorkerStats {
                name: worker.name().to_string(),
                state: worker.state(),
                stats: worker.stats(),
            })
            .collect();

        ServerStats {
            running: self.is_running(),
            uptime: self.started_at.elapsed(),
            connections: self.connections.connection_count(),
            workers,
            backlog: self.backlog.snapshot(),
            ticks: self
                .tick_handler
                .as_ref()
                .map(|handler| handler.tick_count())
                .unwrap_or(0),
            scheduled_pending: self.schedule.len(),
            next_scheduled: self.schedule.next_due(),
        }
    }

    pub fn health(&self, thresholds: &HealthThresholds) -> HealthCheckResult {
        check_health(&self.stats(), thresholds)
    }
}

/// The job run at every system midnight. Each run arms the next one.
#[derive(Clone)]
struct DailyReset {
    schedule: Arc<ScheduledWorkTable>,
    clock: Arc<WorldClockService>,
    time: SharedTimeSource,
    zones: Arc<ActiveZones>,
}

impl DailyReset {
    /// Schedules the reset for the system timestamp `midnight`.
    fn schedule_at(self, midnight: i64) -> ServerTime {
        let delay = self.clock.expiration_in_seconds(midnight, 0);
        let due = self
            .time
            .server_time()
            .saturating_add(duration_to_server_time(Duration::from_secs(u64::from(delay))));
        let schedule = self.schedule.clone();
        schedule.schedule(due, Work::new("daily_reset", move || self.run(midnight)));
        due
    }

    fn run(self, midnight: i64) {
        let peak = self.zones.daily_reset();
        info!("🌙 Daily reset: {} session(s) at the busiest point of the day", peak);
        self.schedule_at(midnight + SYSTEM_DAY_SECS);
    }
}

impl Drop for ChannelServer {
    fn drop(&mut self) {
        if self.tick_handler.is_some() && !self.shutdown_state.is_shutdown_complete() {
            if let Err(e) = self.shutdown() {
                error!("Channel server shutdown on drop failed: {}", e);
            }
        }
    }
}
