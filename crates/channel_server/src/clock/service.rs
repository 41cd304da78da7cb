//! Shared world clock with registered time-of-day events.
//!
//! Readers call [`WorldClockService::get`]. While the system second has not
//! changed the cached snapshot is returned from an [`ArcSwap`] without
//! locking; otherwise the mutex is taken, the second is checked again and
//! the snapshot is recomputed once.
//!
//! The same lock guards the registered events and the next event time. When
//! a recompute finds that the next event time has been crossed, the next
//! call to [`take_clock_events`](WorldClockService::take_clock_events)
//! reports it so dependents can be recalculated.

use super::trigger::ClockTrigger;
use super::world_clock::WorldClock;
use crate::error::ClockError;
use arc_swap::ArcSwap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};
use world_core::SharedTimeSource;

/// Event type tags registered for one trigger.
pub type EventTypes = BTreeSet<u8>;

/// A registered trigger that fired inside a reported window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredEvent {
    pub trigger: ClockTrigger,
    pub event_types: Vec<u8>,
}

/// Reported when the next event time has been crossed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockEvents {
    /// The clock now
    pub clock: WorldClock,
    /// The clock when events were last reported
    pub last_trigger: WorldClock,
    /// Triggers due in `(last_trigger, clock]`
    pub fired: Vec<FiredEvent>,
}

#[derive(Debug)]
struct ClockState {
    clock: WorldClock,
    game_offset: i64,
    time_offset_minutes: i32,
    events: BTreeMap<ClockTrigger, EventTypes>,
    next_event_time: i64,
    last_trigger: WorldClock,
    recalc_pending: bool,
}

impl ClockState {
    /// Earliest system time at which a registered trigger or midnight falls.
    fn recalculate_next_event_time(&mut self) {
        let midnight = self.clock.seconds_until_midnight();
        let delta = self
            .events
            .keys()
            .filter_map(|trigger| trigger.seconds_until(&self.clock))
            .fold(midnight, i64::min);
        self.next_event_time = self.clock.system_time + delta;
        trace!(
            "🕰️ Next world event in {}s ({} trigger(s) registered)",
            delta,
            self.events.len()
        );
    }
}

/// The world clock and its event schedule.
#[derive(Debug)]
pub struct WorldClockService {
    time: SharedTimeSource,
    snapshot: ArcSwap<WorldClock>,
    state: Mutex<ClockState>,
    recomputes: AtomicU64,
}

impl WorldClockService {
    pub fn new(time: SharedTimeSource, game_offset: i64, time_offset_minutes: i32) -> Self {
        let clock = WorldClock::compute(time.system_time(), game_offset, time_offset_minutes);
        let mut state = ClockState {
            clock,
            game_offset,
            time_offset_minutes,
            events: BTreeMap::new(),
            next_event_time: 0,
            last_trigger: clock,
            recalc_pending: false,
        };
        state.recalculate_next_event_time();

        Self {
            time,
            snapshot: ArcSwap::from_pointee(clock),
            state: Mutex::new(state),
            recomputes: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The world clock for the current system second.
    pub fn get(&self) -> WorldClock {
        let now = self.time.system_time();
        let cached = **self.snapshot.load();
        if cached.system_time == now {
            return cached;
        }

        let mut state = self.lock();
        if state.clock.system_time == now {
            return state.clock;
        }
        self.refresh_locked(&mut state, now);
        state.clock
    }

    fn refresh_locked(&self, state: &mut ClockState, now: i64) {
        state.clock = WorldClock::compute(now, state.game_offset, state.time_offset_minutes);
        self.recomputes.fetch_add(1, Ordering::Relaxed);

        if state.next_event_time != 0 && state.next_event_time <= now {
            debug!("🕰️ World event time {} passed", state.next_event_time);
            state.recalc_pending = true;
            state.recalculate_next_event_time();
        } else if state.next_event_time == 0 {
            state.recalculate_next_event_time();
        }
        self.snapshot.store(Arc::new(state.clock));
    }

    /// How many times the snapshot has been computed.
    pub fn recompute_count(&self) -> u64 {
        self.recomputes.load(Ordering::Relaxed)
    }

    /// System time at which the next registered event or midnight falls.
    pub fn next_event_time(&self) -> i64 {
        self.get();
        self.lock().next_event_time
    }

    /// Adds or removes one event type for `trigger`.
    ///
    /// Adding the first type for a trigger, or removing its last one,
    /// recalculates the next event time.
    pub fn register_event(
        &self,
        trigger: ClockTrigger,
        event_type: u8,
        remove: bool,
    ) -> Result<(), ClockError> {
        trigger.validate()?;

        let now = self.time.system_time();
        let mut state = self.lock();
        let changed = if remove {
            let emptied = match state.events.get_mut(&trigger) {
                Some(types) => {
                    types.remove(&event_type);
                    types.is_empty()
                }
                None => false,
            };
            if emptied {
                state.events.remove(&trigger);
            }
            emptied
        } else {
            let types = state.events.entry(trigger).or_default();
            let first = types.is_empty();
            types.insert(event_type);
            first
        };

        if changed {
            if state.clock.system_time != now {
                self.refresh_locked(&mut state, now);
            }
            state.recalculate_next_event_time();
        }
        Ok(())
    }

    /// Event types registered for `trigger`.
    pub fn registered_events(&self, trigger: &ClockTrigger) -> Vec<u8> {
        self.lock()
            .events
            .get(trigger)
            .map(|types| types.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn trigger_count(&self) -> usize {
        self.lock().events.len()
    }

    /// Changes the in-game offset and forces a recompute.
    pub fn set_game_offset(&self, game_offset: i64) {
        let now = self.time.system_time();
        let mut state = self.lock();
        state.game_offset = game_offset;
        self.refresh_locked(&mut state, now);
        state.recalc_pending = true;
        state.recalculate_next_event_time();
    }

    /// Changes the system calendar offset and forces a recompute.
    pub fn set_time_offset_minutes(&self, minutes: i32) {
        let now = self.time.system_time();
        let mut state = self.lock();
        state.time_offset_minutes = minutes;
        self.refresh_locked(&mut state, now);
        state.recalc_pending = true;
        state.recalculate_next_event_time();
    }

    /// Reports crossed event boundaries once.
    ///
    /// Returns `None` until the next event time has been passed (or an offset
    /// changed). The reported window starts where the previous one ended.
    pub fn take_clock_events(&self) -> Option<ClockEvents> {
        let clock = self.get();
        let mut state = self.lock();
        if !state.recalc_pending {
            return None;
        }
        state.recalc_pending = false;

        let last_trigger = state.last_trigger;
        let window = clock.system_time - last_trigger.system_time;
        let fired = state
            .events
            .iter()
            .filter(|(trigger, _)| {
                trigger
                    .seconds_until(&last_trigger)
                    .is_some_and(|delta| delta <= window)
            })
            .map(|(trigger, types)| FiredEvent {
                trigger: *trigger,
                event_types: types.iter().copied().collect(),
            })
            .collect();
        state.last_trigger = clock;

        Some(ClockEvents {
            clock,
            last_trigger,
            fired,
        })
    }

    /// Seconds until the next system midnight.
    pub fn time_until_midnight(&self) -> i64 {
        self.get().seconds_until_midnight()
    }

    /// Seconds from `relative_to` (or now, when zero) until `fixed_time`,
    /// never negative.
    pub fn expiration_in_seconds(&self, fixed_time: i64, relative_to: i64) -> u32 {
        let base = if relative_to == 0 {
            self.time.system_time()
        } else {
            relative_to
        };
        u32::try_from((fixed_time - base).max(0)).unwrap_or(u32::MAX)
    }
}
