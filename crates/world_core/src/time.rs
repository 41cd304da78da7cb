//! Server time sources.
//!
//! All internal timestamps are a monotonic microsecond counter
//! ([`ServerTime`]). Wall-clock seconds are only read through
//! [`TimeSource::system_time`], which the world clock converts into
//! calendar fields.
//!
//! A time source is handed to every worker at construction instead of being
//! looked up globally, so the scheduling core can be driven deterministically
//! with [`ManualTimeSource`].

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic server time in microseconds.
pub type ServerTime = u64;

/// Converts a duration into server-time microseconds, saturating.
pub fn duration_to_server_time(duration: Duration) -> ServerTime {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Shared handle to a time source.
pub type SharedTimeSource = Arc<dyn TimeSource>;

/// Provides monotonic server time and wall-clock seconds.
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Monotonic microseconds; never decreases.
    fn server_time(&self) -> ServerTime;

    /// Seconds since the Unix epoch.
    fn system_time(&self) -> i64;
}

/// Real clocks: `Instant` for server time, `SystemTime` for wall time.
#[derive(Debug)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn shared() -> SharedTimeSource {
        Arc::new(Self::new())
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn server_time(&self) -> ServerTime {
        duration_to_server_time(self.origin.elapsed())
    }

    fn system_time(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Time source whose readings are set explicitly.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    server: AtomicU64,
    system: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(server_time: ServerTime, system_time: i64) -> Self {
        Self {
            server: AtomicU64::new(server_time),
            system: AtomicI64::new(system_time),
        }
    }

    pub fn set_server_time(&self, time: ServerTime) {
        self.server.store(time, Ordering::SeqCst);
    }

    pub fn advance_server_time(&self, micros: u64) {
        self.server.fetch_add(micros, Ordering::SeqCst);
    }

    pub fn set_system_time(&self, seconds: i64) {
        self.system.store(seconds, Ordering::SeqCst);
    }

    pub fn advance_system_time(&self, seconds: i64) {
        self.system.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn server_time(&self) -> ServerTime {
        self.server.load(Ordering::SeqCst)
    }

    fn system_time(&self) -> i64 {
        self.system.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_source_is_monotonic() {
        let source = SystemTimeSource::new();
        let first = source.server_time();
        std::thread::sleep(Duration::from_millis(2));
        assert!(source.server_time() > first);
        assert!(source.system_time() > 1_600_000_000);
    }

    #[test]
    fn test_manual_source() {
        let source = ManualTimeSource::new(100, 5);
        source.advance_server_time(50);
        source.advance_system_time(2);
        assert_eq!(source.server_time(), 150);
        assert_eq!(source.system_time(), 7);
    }

    #[test]
    fn test_duration_conversion() {
        assert_eq!(duration_to_server_time(Duration::from_millis(100)), 100_000);
    }
}
