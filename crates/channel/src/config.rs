//! Configuration management for the channel server process.
//!
//! Loads the TOML file, applies defaults for missing keys and converts the
//! result into the [`ServerConfig`] consumed by the core.

use channel_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn default_bind_address() -> String {
    "127.0.0.1:14666".to_string()
}

fn default_tick_interval() -> u64 {
    100
}

fn default_tick_backlog_cap() -> u32 {
    2
}

fn default_missed_tick_report_secs() -> u64 {
    300
}

fn default_slow_tick_step_us() -> u64 {
    20_000
}

fn default_client_timeout_secs() -> u64 {
    15
}

fn default_health_report_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_persistence_timeout_ms() -> u64 {
    5000
}

fn default_stores() -> Vec<String> {
    vec!["world".to_string(), "lobby".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub persistence: PersistenceSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Network, worker and tick settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:14666")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Generic worker threads; 0 uses one per CPU core
    #[serde(default)]
    pub worker_count: usize,
    /// Server tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Unprocessed ticks allowed before new ones are dropped
    #[serde(default = "default_tick_backlog_cap")]
    pub tick_backlog_cap: u32,
    #[serde(default = "default_missed_tick_report_secs")]
    pub missed_tick_report_secs: u64,
    /// Offset of the system calendar fields of the world clock, in minutes
    #[serde(default)]
    pub time_offset_minutes: i32,
    /// Offset of in-game time, in seconds
    #[serde(default)]
    pub game_offset_secs: i64,
    #[serde(default = "default_slow_tick_step_us")]
    pub slow_tick_step_us: u64,
    /// Idle client timeout in seconds (0 disables)
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enable_network: bool,
    /// Interval of the periodic health log line
    #[serde(default = "default_health_report_secs")]
    pub health_report_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            worker_count: 0,
            tick_interval_ms: default_tick_interval(),
            tick_backlog_cap: default_tick_backlog_cap(),
            missed_tick_report_secs: default_missed_tick_report_secs(),
            time_offset_minutes: 0,
            game_offset_secs: 0,
            slow_tick_step_us: default_slow_tick_step_us(),
            client_timeout_secs: default_client_timeout_secs(),
            enable_network: true,
            health_report_secs: default_health_report_secs(),
        }
    }
}

/// Backing store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// Upper bound on one transaction queue flush, in milliseconds
    #[serde(default = "default_persistence_timeout_ms")]
    pub timeout_ms: u64,
    /// Names of the in-memory stores to create
    #[serde(default = "default_stores")]
    pub stores: Vec<String>,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_persistence_timeout_ms(),
            stores: default_stores(),
        }
    }
}

impl PersistenceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there and
    /// returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Translates the file settings into the core's configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let defaults = ServerConfig::default();
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            worker_count: if self.server.worker_count == 0 {
                defaults.worker_count
            } else {
                self.server.worker_count
            },
            tick_interval_ms: self.server.tick_interval_ms,
            tick_backlog_cap: self.server.tick_backlog_cap,
            missed_tick_report_secs: self.server.missed_tick_report_secs,
            time_offset_minutes: self.server.time_offset_minutes,
            game_offset_secs: self.server.game_offset_secs,
            persistence_timeout_ms: self.persistence.timeout_ms,
            slow_tick_step_us: self.server.slow_tick_step_us,
            client_timeout_secs: self.server.client_timeout_secs,
            enable_network: self.server.enable_network,
        })
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }
        if self.server.tick_interval_ms == 0 {
            return Err("Tick interval must be greater than 0".to_string());
        }
        if self.server.tick_backlog_cap == 0 {
            return Err("Tick backlog cap must be greater than 0".to_string());
        }
        if self.server.health_report_secs == 0 {
            return Err("Health report interval must be greater than 0".to_string());
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!("Invalid log level: {}", self.logging.level));
        }
        if let Some(name) = self.persistence.stores.iter().find(|name| name.trim().is_empty()) {
            return Err(format!("Invalid store name: {name:?}"));
        }
        self.to_server_config()
            .map_err(|e| e.to_string())?
            .validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let server = config.to_server_config().unwrap();
        assert_eq!(server.tick_interval_ms, 100);
        assert_eq!(server.tick_backlog_cap, 2);
        assert!(server.worker_count >= 1);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());

        config.server.bind_address = default_bind_address();
        config.server.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        config.server.tick_interval_ms = 100;
        config.server.tick_backlog_cap = 0;
        assert!(config.validate().is_err());

        config.server.tick_backlog_cap = 2;
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "warn".to_string();
        config.server.time_offset_minutes = 24 * 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            worker_count = 3
            tick_interval_ms = 50

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.worker_count, 3);
        assert_eq!(config.server.tick_interval_ms, 50);
        assert_eq!(config.server.tick_backlog_cap, 2);
        assert_eq!(config.persistence, PersistenceSettings::default());
        assert_eq!(config.logging.level, "debug");
    }

    #[tokio::test]
    async fn test_missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let created = AppConfig::load_from_file(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(created, AppConfig::default());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, created);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nbind_address = ").unwrap();
        assert!(AppConfig::load_from_file(&path).await.is_err());
    }
}
