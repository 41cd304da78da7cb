//! Application lifecycle: build, run, report and shut down the server.

use crate::cli::CliArgs;
use crate::config::AppConfig;
use crate::logging::display_banner;
use crate::signals::{next_stop_signal, wait_for_drain_request};
use channel_server::{
    create_server_with_stores, BackingStore, ChannelServer, HealthStatus, HealthThresholds,
    MemoryStore, ServerStats,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// The channel server process.
///
/// Owns the loaded configuration and the server. [`run`](Self::run) blocks
/// until a termination signal arrives.
pub struct Application {
    config: AppConfig,
    server: ChannelServer,
}

impl Application {
    /// Loads the configuration, applies CLI overrides, validates the result
    /// and builds the server.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_overrides(&args);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let server = Self::build_server(&config)?;
        info!(
            "📂 Config: {} | Stores: {}",
            args.config_path.display(),
            config.persistence.stores.join(", ")
        );

        Ok(Self { config, server })
    }

    /// Builds the server described by `config` with one in-memory store per
    /// configured store name.
    pub fn build_server(config: &AppConfig) -> Result<ChannelServer, Box<dyn std::error::Error>> {
        let timeout = config.persistence.timeout();
        let stores: Vec<Arc<dyn BackingStore>> = config
            .persistence
            .stores
            .iter()
            .map(|name| Arc::new(MemoryStore::new(name.as_str(), timeout)) as Arc<dyn BackingStore>)
            .collect();
        Ok(create_server_with_stores(config.to_server_config()?, stores)?)
    }

    pub fn server(&self) -> &ChannelServer {
        &self.server
    }

    /// Starts the server, logs a health line every report interval and shuts
    /// down on the first termination signal. A second signal exits at once.
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting channel server application");
        self.log_configuration_summary();

        self.server.start()?;
        if let Some(addr) = self.server.start_network().await? {
            info!("🎮 Ready to accept connections on {}", addr);
        }
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let thresholds = HealthThresholds::default();
        let mut reported_missed = 0;
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.server.health_report_secs));
        interval.tick().await;

        let signal = wait_for_drain_request();
        tokio::pin!(signal);
        loop {
            tokio::select! {
                result = &mut signal => {
                    result?;
                    break;
                }
                _ = interval.tick() => {
                    reported_missed = self.log_health(&thresholds, reported_missed);
                }
            }
        }

        tokio::spawn(async move {
            if let Ok(stop) = next_stop_signal().await {
                warn!("⚡ Second {} while draining - exiting without waiting for workers", stop);
                std::process::exit(1);
            }
        });

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        let server = &mut self.server;
        if let Err(e) = tokio::task::block_in_place(|| server.shutdown()) {
            error!("❌ Shutdown finished with errors: {}", e);
        }

        log_final_stats(&self.server.stats());
        debug!("📈 Final metrics:\n{}", self.server.metrics().export_prometheus());
        info!("👋 Channel server stopped");
        Ok(())
    }

    /// Logs one health line and returns the missed-tick total it reported.
    fn log_health(&self, thresholds: &HealthThresholds, reported_missed: u64) -> u64 {
        let stats = self.server.stats();
        let health = self.server.health(&HealthThresholds {
            max_missed_ticks: reported_missed,
            ..*thresholds
        });
        let deepest = stats
            .workers
            .iter()
            .map(|worker| worker.stats.queued)
            .max()
            .unwrap_or(0);

        let metrics = self.server.metrics();
        let tick_ms = metrics
            .get_histogram("tick_seconds")
            .map(|histogram| histogram.average() * 1000.0)
            .unwrap_or(0.0);
        let scheduled = metrics.get_gauge("scheduled_work_pending").unwrap_or(0.0);

        info!(
            "📊 System Health - {:?} | {} connection(s) | {} tick(s), avg {:.2}ms | deepest queue {} | {} missed tick(s) | {} scheduled",
            health.status,
            stats.connections,
            stats.ticks,
            tick_ms,
            deepest,
            stats.backlog.total_missed,
            scheduled
        );
        if health.status != HealthStatus::Healthy {
            for warning in &health.warnings {
                warn!("⚠️ {}", warning);
            }
            for problem in &health.errors {
                error!("❌ {}", problem);
            }
        }
        stats.backlog.total_missed
    }

    fn log_configuration_summary(&self) {
        let server = &self.config.server;
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", server.bind_address);
        info!(
            "  🧵 Generic workers: {}",
            if server.worker_count == 0 {
                "one per core".to_string()
            } else {
                server.worker_count.to_string()
            }
        );
        info!(
            "  ⏰ Tick: {}ms, backlog cap {}",
            server.tick_interval_ms, server.tick_backlog_cap
        );
        info!(
            "  🕰️ Clock offsets: game {}s, system {}min",
            server.game_offset_secs, server.time_offset_minutes
        );
        info!("  💾 Persistence timeout: {}ms", self.config.persistence.timeout_ms);
        info!("  📝 Log level: {}", self.config.logging.level);
    }
}

fn log_final_stats(stats: &ServerStats) {
    info!("📈 Final Statistics:");
    info!("  - Uptime: {}s", stats.uptime.as_secs());
    info!("  - Ticks processed: {}", stats.ticks);
    info!("  - Ticks missed: {}", stats.backlog.total_missed);
    info!("  - Scheduled work left undelivered: {}", stats.scheduled_pending);
    for worker in &stats.workers {
        info!(
            "  - {}: {} handled, {} unhandled, {} failed, {} dropped",
            worker.name,
            worker.stats.handled,
            worker.stats.unhandled,
            worker.stats.failed,
            worker.stats.dropped
        );
    }
}

impl AppConfig {
    /// Command-line options win over the file.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(workers) = args.workers {
            self.server.worker_count = workers;
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }
}
