//! Health checks over a point-in-time view of the server.

use crate::server::ServerStats;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use world_core::WorkerState;

pub mod metrics;
pub mod perf;

pub use metrics::{Histogram, HistogramBucket, MetricsCollector, MetricsSnapshot};
pub use perf::PerformanceTimer;

/// Overall health status of the server
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Limits past which a running server is reported as degraded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Queued messages on any one worker
    pub max_queue_depth: usize,
    /// Ticks missed since the previous check
    pub max_missed_ticks: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_queue_depth: 10_000,
            max_missed_ticks: 0,
        }
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub active_connections: usize,
    pub worker_count: usize,
    pub tick_count: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Grades `stats` against `thresholds`.
///
/// A worker that is not running makes the server unhealthy. Missed ticks and
/// deep queues only degrade it.
pub fn check_health(stats: &ServerStats, thresholds: &HealthThresholds) -> HealthCheckResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !stats.running {
        errors.push("server is not running".to_string());
    }
    for worker in &stats.workers {
        if worker.state != WorkerState::Running {
            errors.push(format!("worker '{}' is {:?}", worker.name, worker.state));
        }
        if worker.stats.queued > thresholds.max_queue_depth {
            warnings.push(format!(
                "worker '{}' has {} queued message(s)",
                worker.name, worker.stats.queued
            ));
        }
    }
    if stats.backlog.total_missed > thresholds.max_missed_ticks {
        warnings.push(format!("{} tick(s) missed", stats.backlog.total_missed));
    }

    let status = if !errors.is_empty() {
        HealthStatus::Unhealthy
    } else if !warnings.is_empty() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    HealthCheckResult {
        status,
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
        uptime_seconds: stats.uptime.as_secs(),
        active_connections: stats.connections,
        worker_count: stats.workers.len(),
        tick_count: stats.ticks,
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::NamedWorkerStats;
    use crate::tick::BacklogSnapshot;
    use std::time::Duration;
    use world_core::WorkerStats;

    fn stats(state: WorkerState, queued: usize, missed: u64) -> ServerStats {
        ServerStats {
            running: true,
            uptime: Duration::from_secs(42),
            connections: 3,
            workers: vec![NamedWorkerStats {
                name: "generic-0".to_string(),
                state,
                stats: WorkerStats {
                    queued,
                    ..WorkerStats::default()
                },
            }],
            backlog: BacklogSnapshot {
                pending: 0,
                cap: 2,
                missed: 0,
                total_missed: missed,
            },
            ticks: 10,
            scheduled_pending: 0,
            next_scheduled: None,
        }
    }

    #[test]
    fn test_health_grading() {
        let thresholds = HealthThresholds::default();

        let healthy = check_health(&stats(WorkerState::Running, 0, 0), &thresholds);
        assert_eq!(healthy.status, HealthStatus::Healthy);
        assert_eq!(healthy.uptime_seconds, 42);
        assert_eq!(healthy.active_connections, 3);

        let degraded = check_health(&stats(WorkerState::Running, 20_000, 1), &thresholds);
        assert_eq!(degraded.status, HealthStatus::Degraded);
        assert_eq!(degraded.warnings.len(), 2);

        let unhealthy = check_health(&stats(WorkerState::Stopped, 0, 0), &thresholds);
        assert_eq!(unhealthy.status, HealthStatus::Unhealthy);
        assert_eq!(unhealthy.errors.len(), 1);
    }
}
