//! Server configuration types and defaults.
//!
//! The core consumes these knobs; it does not load them. The `channel`
//! binary builds a [`ServerConfig`] from its TOML file and command line.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration structure for the channel server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The socket address client connections are accepted on
    pub bind_address: SocketAddr,

    /// Number of generic workers that process client packets
    pub worker_count: usize,

    /// Interval between tick messages in milliseconds
    pub tick_interval_ms: u64,

    /// Maximum number of unprocessed ticks allowed to queue up
    pub tick_backlog_cap: u32,

    /// How often missed ticks are reported, in seconds of ticks
    pub missed_tick_report_secs: u64,

    /// Offset applied to the system calendar fields of the world clock, in minutes
    pub time_offset_minutes: i32,

    /// Offset applied to in-game time, in seconds
    pub game_offset_secs: i64,

    /// Upper bound on one transaction queue flush, in milliseconds
    pub persistence_timeout_ms: u64,

    /// Tick steps slower than this (microseconds) are logged as warnings
    pub slow_tick_step_us: u64,

    /// Idle client connections are dropped after this many seconds (0 disables)
    pub client_timeout_secs: u64,

    /// Whether to open the network listener at all
    pub enable_network: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 14666)),
            worker_count: num_cpus::get().max(1),
            tick_interval_ms: 100,
            tick_backlog_cap: 2,
            missed_tick_report_secs: 300,
            time_offset_minutes: 0,
            game_offset_secs: 0,
            persistence_timeout_ms: 5000,
            slow_tick_step_us: 20_000,
            client_timeout_secs: 15,
            enable_network: true,
        }
    }
}

impl ServerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }

    /// Number of ticks between two missed-tick reports.
    pub fn missed_tick_report_every(&self) -> u64 {
        if self.tick_interval_ms == 0 {
            return 0;
        }
        (self.missed_tick_report_secs * 1000 / self.tick_interval_ms).max(1)
    }

    /// Checks the values the core depends on.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be at least 1".to_string());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".to_string());
        }
        if self.tick_backlog_cap == 0 {
            return Err("tick_backlog_cap must be greater than 0".to_string());
        }
        if self.time_offset_minutes.abs() >= 24 * 60 {
            return Err(format!(
                "time_offset_minutes {} must be less than one day",
                self.time_offset_minutes
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tick_policy() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.tick_backlog_cap, 2);
        assert_eq!(config.missed_tick_report_every(), 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = ServerConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            tick_backlog_cap: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            time_offset_minutes: -1440,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"tick_interval_ms": 50}"#).unwrap();
        assert_eq!(config.tick_interval_ms, 50);
        assert_eq!(config.tick_backlog_cap, 2);
        assert_eq!(config.missed_tick_report_every(), 6000);
    }
}
