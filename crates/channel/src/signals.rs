//! Stop requests for the channel process.
//!
//! The first SIGINT or SIGTERM (Ctrl+C on Windows) drains the channel: ticks
//! stop, clients are disconnected and the stores get their last flush. The
//! run loop waits for a second request in the background and exits hard on
//! it, so an operator can always get out of a stuck drain.

use std::fmt;
use std::io;
use tokio::signal;
use tracing::info;

/// The termination request that arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGINT, or Ctrl+C on Windows
    Interrupt,
    /// SIGTERM from a service manager
    Terminate,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StopSignal::Interrupt => "SIGINT",
            StopSignal::Terminate => "SIGTERM",
        })
    }
}

/// Resolves on the next stop request without logging it.
#[cfg(unix)]
pub async fn next_stop_signal() -> io::Result<StopSignal> {
    use signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(tokio::select! {
        _ = interrupt.recv() => StopSignal::Interrupt,
        _ = terminate.recv() => StopSignal::Terminate,
    })
}

#[cfg(windows)]
pub async fn next_stop_signal() -> io::Result<StopSignal> {
    signal::ctrl_c().await?;
    Ok(StopSignal::Interrupt)
}

/// Waits for the request that starts draining the channel.
pub async fn wait_for_drain_request() -> io::Result<StopSignal> {
    let stop = next_stop_signal().await?;
    info!("📡 {} received - draining channel before exit", stop);
    Ok(stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_names() {
        assert_eq!(StopSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(StopSignal::Terminate.to_string(), "SIGTERM");
    }
}
