//! # Channel Server - Process Entry Point
//!
//! Parses the command line, loads the TOML configuration, sets up logging and
//! runs the [`channel_server::ChannelServer`] until a termination signal.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (config.toml, created if missing)
//! channel
//!
//! # Override specific settings
//! channel --config production.toml --bind 0.0.0.0:14666 --workers 8
//!
//! # JSON logging for production
//! channel --json-logs
//! ```
//!
//! ## Signal Handling
//!
//! SIGINT and SIGTERM (Ctrl+C on Windows) start a graceful shutdown; a
//! second signal exits immediately.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

pub use app::Application;
pub use cli::CliArgs;
pub use config::{AppConfig, LoggingSettings, PersistenceSettings, ServerSettings};

/// Runs the whole process: CLI, configuration, logging, application.
///
/// Exits the process with status 1 when startup or the run fails.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging settings come from the file, so read it before anything logs.
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    config.apply_overrides(&args);

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}
