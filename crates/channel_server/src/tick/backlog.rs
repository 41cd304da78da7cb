//! Bounded count of ticks enqueued but not yet processed.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result of asking the backlog for room for one more tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAdmission {
    /// A tick may be enqueued; `pending` includes it.
    Scheduled { pending: u32 },
    /// The backlog is full; the tick is dropped and counted.
    Missed { missed: u64 },
}

#[derive(Debug, Default)]
struct BacklogState {
    pending: u32,
    /// Since the last report
    missed: u64,
    total_missed: u64,
}

/// Point-in-time view of the backlog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogSnapshot {
    pub pending: u32,
    pub cap: u32,
    pub missed: u64,
    pub total_missed: u64,
}

/// Pending-tick counter shared by the tick driver and the tick handler.
///
/// `pending` never exceeds `cap`. This lock is separate from every other
/// lock in the server.
#[derive(Debug)]
pub struct TickBacklog {
    state: Mutex<BacklogState>,
    cap: u32,
}

impl TickBacklog {
    pub fn new(cap: u32) -> Self {
        Self {
            state: Mutex::new(BacklogState::default()),
            cap: cap.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BacklogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves room for one tick, or counts it as missed.
    pub fn try_schedule(&self) -> TickAdmission {
        let mut state = self.lock();
        if state.pending < self.cap {
            state.pending += 1;
            TickAdmission::Scheduled {
                pending: state.pending,
            }
        } else {
            state.missed += 1;
            state.total_missed += 1;
            TickAdmission::Missed {
                missed: state.missed,
            }
        }
    }

    /// Gives back a reservation whose tick could not be enqueued.
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(1);
    }

    /// Marks one tick as picked up by the handler.
    pub fn complete(&self) {
        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(1);
    }

    /// Returns and resets the missed count since the last call.
    pub fn take_missed(&self) -> u64 {
        std::mem::take(&mut self.lock().missed)
    }

    pub fn pending(&self) -> u32 {
        self.lock().pending
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    pub fn snapshot(&self) -> BacklogSnapshot {
        let state = self.lock();
        BacklogSnapshot {
            pending: state.pending,
            cap: self.cap,
            missed: state.missed,
            total_missed: state.total_missed,
        }
    }
}

impl Default for TickBacklog {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_never_exceeds_cap() {
        let backlog = TickBacklog::new(2);
        assert_eq!(backlog.try_schedule(), TickAdmission::Scheduled { pending: 1 });
        assert_eq!(backlog.try_schedule(), TickAdmission::Scheduled { pending: 2 });
        for expected in 1..=5 {
            assert_eq!(backlog.try_schedule(), TickAdmission::Missed { missed: expected });
            assert_eq!(backlog.pending(), 2);
        }

        backlog.complete();
        assert_eq!(backlog.try_schedule(), TickAdmission::Scheduled { pending: 2 });
    }

    #[test]
    fn test_take_missed_resets_window_only() {
        let backlog = TickBacklog::new(1);
        backlog.try_schedule();
        backlog.try_schedule();
        backlog.try_schedule();
        assert_eq!(backlog.take_missed(), 2);
        assert_eq!(backlog.take_missed(), 0);
        assert_eq!(backlog.snapshot().total_missed, 2);
    }

    #[test]
    fn test_complete_and_cancel_saturate() {
        let backlog = TickBacklog::new(2);
        backlog.complete();
        backlog.cancel();
        assert_eq!(backlog.pending(), 0);
        assert_eq!(TickBacklog::new(0).cap(), 1);
    }
}
