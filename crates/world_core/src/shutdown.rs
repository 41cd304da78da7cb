//! Shutdown coordination shared between the tick driver, workers and the
//! process entry point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Two-phase shutdown flag.
///
/// `initiated` is the cooperative "running" flag checked by long-lived loops
/// at each wake; `complete` is set once every worker has been joined.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    initiated: Arc<AtomicBool>,
    complete: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            initiated: Arc::new(AtomicBool::new(false)),
            complete: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Convenience inverse of [`is_shutdown_initiated`](Self::is_shutdown_initiated).
    pub fn is_running(&self) -> bool {
        !self.is_shutdown_initiated()
    }

    /// Flips the running flag. Returns `false` if shutdown was already underway.
    pub fn initiate_shutdown(&self) -> bool {
        let first = !self.initiated.swap(true, Ordering::AcqRel);
        if first {
            info!("🛑 Shutdown initiated - queues will be closed");
        }
        first
    }

    pub fn complete_shutdown(&self) {
        self.complete.store(true, Ordering::Release);
        info!("✅ All workers joined - shutdown complete");
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}
