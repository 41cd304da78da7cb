//! Logging system setup.
//!
//! Human-readable or JSON output, filtered by `RUST_LOG` when set and by the
//! configured level otherwise. Thread names are always included so worker
//! and tick output can be told apart.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. `json_format` forces JSON output.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Logs the startup banner.
pub fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║            🌐 CHANNEL SERVER 🌐          ║");
    info!("║                 v{:<8}                ║", version);
    info!("║                                          ║");
    info!("║  ⏰ Fixed-cadence tick                   ║");
    info!("║  🧵 Queue-per-worker dispatch            ║");
    info!("║  🕰️  World clock and timed events         ║");
    info!("╚══════════════════════════════════════════╝");
}
