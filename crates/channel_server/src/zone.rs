//! Zone bookkeeping consumed by the tick.
//!
//! The simulation layer proper lives outside the scheduling core; the tick
//! only needs two narrow entry points into it, expressed as
//! [`ZoneStateUpdater`] and [`ClockListener`]. [`ActiveZones`] is the
//! built-in implementation: it tracks which zone each connection is in and
//! retires zones nobody is in any more.

use crate::clock::ClockEvents;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, trace};
use world_core::ConnectionId;

/// Identifier of a zone instance.
pub type ZoneId = u32;

/// Advances active-session state once per tick.
pub trait ZoneStateUpdater: Send + Sync {
    fn update_active_zone_states(&self);
}

/// Receives world clock event windows from the tick.
pub trait ClockListener: Send + Sync {
    fn handle_timed_actions(&self, events: &ClockEvents);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneState {
    pub sessions: usize,
    /// Set on the first tick that sees the zone occupied
    pub active: bool,
}

/// Per-zone session counts.
#[derive(Debug, Default)]
pub struct ActiveZones {
    zones: DashMap<ZoneId, ZoneState>,
    members: DashMap<ConnectionId, ZoneId>,
    retired: AtomicU64,
    timed_actions: AtomicU64,
    /// Most connections in zones at once since the last daily reset
    peak_sessions: AtomicUsize,
    daily_resets: AtomicU64,
}

impl ActiveZones {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `connection` into `zone`, leaving its previous zone first.
    pub fn enter_zone(&self, connection: ConnectionId, zone: ZoneId) {
        self.leave(connection);
        self.members.insert(connection, zone);
        self.zones.entry(zone).or_default().sessions += 1;
        self.peak_sessions.fetch_max(self.members.len(), Ordering::Relaxed);
        trace!("🗺️ Connection {} entered zone {}", connection, zone);
    }

    /// Removes `connection` from its zone. Returns the zone it left.
    pub fn leave(&self, connection: ConnectionId) -> Option<ZoneId> {
        let (_, zone) = self.members.remove(&connection)?;
        if let Some(mut state) = self.zones.get_mut(&zone) {
            state.sessions = state.sessions.saturating_sub(1);
        }
        Some(zone)
    }

    pub fn zone_of(&self, connection: ConnectionId) -> Option<ZoneId> {
        self.members.get(&connection).map(|zone| *zone)
    }

    pub fn state(&self, zone: ZoneId) -> Option<ZoneState> {
        self.zones.get(&zone).map(|state| *state)
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn active_zone_count(&self) -> usize {
        self.zones.iter().filter(|zone| zone.active).count()
    }

    /// Total zones retired since creation.
    pub fn retired_count(&self) -> u64 {
        self.retired.load(Ordering::Relaxed)
    }

    pub fn peak_sessions(&self) -> usize {
        self.peak_sessions.load(Ordering::Relaxed)
    }

    /// Starts a new day: returns the peak so far and restarts it from the
    /// current session count.
    pub fn daily_reset(&self) -> usize {
        self.daily_resets.fetch_add(1, Ordering::Relaxed);
        self.peak_sessions.swap(self.members.len(), Ordering::Relaxed)
    }

    pub fn daily_reset_count(&self) -> u64 {
        self.daily_resets.load(Ordering::Relaxed)
    }

    /// Number of clock windows delivered to this bookkeeping.
    pub fn timed_action_count(&self) -> u64 {
        self.timed_actions.load(Ordering::Relaxed)
    }
}

impl ZoneStateUpdater for ActiveZones {
    fn update_active_zone_states(&self) {
        let before = self.zones.len();
        self.zones.retain(|_, state| {
            state.active = state.sessions > 0;
            state.active
        });
        let retired = before.saturating_sub(self.zones.len());
        if retired > 0 {
            self.retired.fetch_add(retired as u64, Ordering::Relaxed);
            debug!("🗺️ Retired {} empty zone(s)", retired);
        }
    }
}

impl ClockListener for ActiveZones {
    fn handle_timed_actions(&self, events: &ClockEvents) {
        self.timed_actions.fetch_add(1, Ordering::Relaxed);
        debug!(
            "🕰️ {} clock event(s) fired for {} active zone(s)",
            events.fired.len(),
            self.active_zone_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_and_leave_track_counts() {
        let zones = ActiveZones::new();
        zones.enter_zone(1, 10);
        zones.enter_zone(2, 10);
        zones.enter_zone(1, 20);

        assert_eq!(zones.zone_of(1), Some(20));
        assert_eq!(zones.state(10).unwrap().sessions, 1);
        assert_eq!(zones.state(20).unwrap().sessions, 1);

        assert_eq!(zones.leave(2), Some(10));
        assert_eq!(zones.leave(2), None);
        assert_eq!(zones.state(10).unwrap().sessions, 0);
    }

    #[test]
    fn test_update_retires_empty_zones() {
        let zones = ActiveZones::new();
        zones.enter_zone(1, 10);
        zones.enter_zone(2, 11);
        zones.update_active_zone_states();
        assert_eq!(zones.active_zone_count(), 2);

        zones.leave(2);
        zones.update_active_zone_states();
        assert_eq!(zones.zone_count(), 1);
        assert!(zones.state(11).is_none());
        assert_eq!(zones.retired_count(), 1);
    }

    #[test]
    fn test_daily_reset_restarts_peak_from_current_sessions() {
        let zones = ActiveZones::new();
        zones.enter_zone(1, 10);
        zones.enter_zone(2, 10);
        zones.enter_zone(3, 11);
        zones.leave(3);
        zones.leave(2);
        assert_eq!(zones.peak_sessions(), 3);

        assert_eq!(zones.daily_reset(), 3);
        assert_eq!(zones.peak_sessions(), 1);
        assert_eq!(zones.daily_reset_count(), 1);
    }
}
