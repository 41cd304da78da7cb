//! Clock event triggers and the time until each fires again.

use super::world_clock::{
    moon_phase_at, WorldClock, GAME_DAY_SECS, GAME_HOUR_SECS, GAME_MINUTE_SECS, MOON_CYCLE_SECS,
    MOON_PHASE_COUNT, MOON_PHASE_SECS, SYSTEM_DAY_SECS,
};
use crate::error::ClockError;
use serde::{Deserialize, Serialize};

/// When a registered clock event fires.
///
/// A trigger names either an in-game time of day, a system time of day, or
/// neither; a moon phase may be combined with any of them, in which case the
/// time of day only counts while the moon is in that phase. Hour and minute
/// are always given together.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ClockTrigger {
    pub moon_phase: Option<u8>,
    pub hour: Option<u8>,
    pub min: Option<u8>,
    pub system_hour: Option<u8>,
    pub system_min: Option<u8>,
}

impl ClockTrigger {
    /// Fires at an in-game time of day.
    pub fn game_time(hour: u8, min: u8) -> Self {
        Self {
            hour: Some(hour),
            min: Some(min),
            ..Default::default()
        }
    }

    /// Fires at a system time of day.
    pub fn system_time(hour: u8, min: u8) -> Self {
        Self {
            system_hour: Some(hour),
            system_min: Some(min),
            ..Default::default()
        }
    }

    /// Fires when the moon enters `phase`.
    pub fn moon_phase(phase: u8) -> Self {
        Self {
            moon_phase: Some(phase),
            ..Default::default()
        }
    }

    pub fn with_moon_phase(mut self, phase: u8) -> Self {
        self.moon_phase = Some(phase);
        self
    }

    /// Rejects empty, partial, ambiguous or out-of-range triggers.
    pub fn validate(&self) -> Result<(), ClockError> {
        let game = match (self.hour, self.min) {
            (Some(_), Some(_)) => true,
            (None, None) => false,
            _ => return Err(ClockError::IncompleteGameTime),
        };
        let system = match (self.system_hour, self.system_min) {
            (Some(_), Some(_)) => true,
            (None, None) => false,
            _ => return Err(ClockError::IncompleteSystemTime),
        };
        if game && system {
            return Err(ClockError::AmbiguousTrigger);
        }
        if !game && !system && self.moon_phase.is_none() {
            return Err(ClockError::EmptyTrigger);
        }

        check_range("moon_phase", self.moon_phase, MOON_PHASE_COUNT)?;
        check_range("hour", self.hour, 24)?;
        check_range("min", self.min, 60)?;
        check_range("system_hour", self.system_hour, 24)?;
        check_range("system_min", self.system_min, 60)?;
        Ok(())
    }

    /// Seconds from `clock` until this trigger next fires, always positive.
    ///
    /// A trigger that names a time of day fires at that time, and only while
    /// the moon is in `moon_phase` when one is set. A moon phase alone fires
    /// at the start of that phase. A trigger that is due at exactly `clock`
    /// is a full period away. `None` means the combination of time of day
    /// and phase never occurs under the clock's current offsets.
    pub fn seconds_until(&self, clock: &WorldClock) -> Option<i64> {
        let (first, period) = if let (Some(hour), Some(min)) = (self.hour, self.min) {
            let target = i64::from(hour) * GAME_HOUR_SECS + i64::from(min) * GAME_MINUTE_SECS;
            (
                positive_delta(target - clock.game_seconds_into_day(), GAME_DAY_SECS),
                GAME_DAY_SECS,
            )
        } else if let (Some(hour), Some(min)) = (self.system_hour, self.system_min) {
            let target = i64::from(hour) * 3600 + i64::from(min) * 60;
            (
                positive_delta(target - clock.system_seconds_into_day(), SYSTEM_DAY_SECS),
                SYSTEM_DAY_SECS,
            )
        } else {
            return Some(match self.moon_phase {
                Some(phase) => seconds_until_phase(phase, clock),
                None => SYSTEM_DAY_SECS,
            });
        };

        let Some(phase) = self.moon_phase else {
            return Some(first);
        };

        // Time-of-day occurrences line up with the moon cycle again after
        // lcm(period, cycle), so that many days cover every reachable phase.
        let days = MOON_CYCLE_SECS / gcd(period, MOON_CYCLE_SECS);
        let elapsed = clock.game_elapsed();
        (0..days)
            .map(|day| first + day * period)
            .find(|delta| moon_phase_at(elapsed + delta) == phase)
    }
}

fn seconds_until_phase(phase: u8, clock: &WorldClock) -> i64 {
    let count = i64::from(MOON_PHASE_COUNT);
    let mut distance = (i64::from(phase) - i64::from(clock.moon_phase)).rem_euclid(count);
    if distance == 0 {
        distance = count;
    }
    distance * MOON_PHASE_SECS - clock.seconds_into_moon_phase()
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn check_range(field: &'static str, value: Option<u8>, limit: u8) -> Result<(), ClockError> {
    match value {
        Some(value) if value >= limit => Err(ClockError::OutOfRange { field, value }),
        _ => Ok(()),
    }
}

fn positive_delta(delta: i64, period: i64) -> i64 {
    match delta.rem_euclid(period) {
        0 => period,
        delta => delta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_accepts_single_kinds() {
        assert!(ClockTrigger::game_time(6, 0).validate().is_ok());
        assert!(ClockTrigger::system_time(23, 59).validate().is_ok());
        assert!(ClockTrigger::moon_phase(8).validate().is_ok());
        assert!(ClockTrigger::game_time(6, 0).with_moon_phase(3).validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_game_and_system_time() {
        let trigger = ClockTrigger {
            hour: Some(1),
            min: Some(0),
            system_hour: Some(1),
            system_min: Some(0),
            ..Default::default()
        };
        assert_eq!(trigger.validate(), Err(ClockError::AmbiguousTrigger));
    }

    #[test]
    fn test_validation_rejects_partial_and_empty() {
        let hour_only = ClockTrigger {
            hour: Some(4),
            ..Default::default()
        };
        assert_eq!(hour_only.validate(), Err(ClockError::IncompleteGameTime));

        let min_only = ClockTrigger {
            system_min: Some(4),
            ..Default::default()
        };
        assert_eq!(min_only.validate(), Err(ClockError::IncompleteSystemTime));

        assert_eq!(ClockTrigger::default().validate(), Err(ClockError::EmptyTrigger));
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        assert!(matches!(
            ClockTrigger::game_time(24, 0).validate(),
            Err(ClockError::OutOfRange { field: "hour", .. })
        ));
        assert!(matches!(
            ClockTrigger::moon_phase(16).validate(),
            Err(ClockError::OutOfRange { field: "moon_phase", .. })
        ));
    }

    #[test]
    fn test_game_time_delta_wraps_at_game_day() {
        // 10:00 in game
        let clock = WorldClock::compute(0, 10 * GAME_HOUR_SECS, 0);
        assert_eq!(ClockTrigger::game_time(11, 0).seconds_until(&clock), Some(GAME_HOUR_SECS));
        assert_eq!(
            ClockTrigger::game_time(9, 0).seconds_until(&clock),
            Some(GAME_DAY_SECS - GAME_HOUR_SECS)
        );
        assert_eq!(ClockTrigger::game_time(10, 0).seconds_until(&clock), Some(GAME_DAY_SECS));
    }

    #[test]
    fn test_system_time_delta() {
        let clock = WorldClock::compute(12 * 3600, 0, 0);
        assert_eq!(ClockTrigger::system_time(12, 30).seconds_until(&clock), Some(1800));
        assert_eq!(
            ClockTrigger::system_time(11, 0).seconds_until(&clock),
            Some(SYSTEM_DAY_SECS - 3600)
        );
    }

    #[test]
    fn test_moon_phase_delta() {
        // 100 seconds into phase 2
        let clock = WorldClock::compute(0, 2 * MOON_PHASE_SECS + 100, 0);
        assert_eq!(clock.moon_phase, 2);
        assert_eq!(
            ClockTrigger::moon_phase(3).seconds_until(&clock),
            Some(MOON_PHASE_SECS - 100)
        );
        assert_eq!(
            ClockTrigger::moon_phase(1).seconds_until(&clock),
            Some(15 * MOON_PHASE_SECS - 100)
        );
        // Already in the phase: next entry is a full cycle away
        assert_eq!(
            ClockTrigger::moon_phase(2).seconds_until(&clock),
            Some(16 * MOON_PHASE_SECS - 100)
        );
    }

    #[test]
    fn test_game_time_waits_for_its_moon_phase() {
        // 10:00 in game on day 0, moon phase 0
        let clock = WorldClock::compute(0, 10 * GAME_HOUR_SECS, 0);
        assert_eq!(clock.moon_phase, 0);

        let in_phase = ClockTrigger::game_time(11, 0).with_moon_phase(0);
        assert_eq!(in_phase.seconds_until(&clock), Some(GAME_HOUR_SECS));

        // 11:00 on game day 3 falls in phase 6
        let later = ClockTrigger::game_time(11, 0).with_moon_phase(6);
        let delta = later.seconds_until(&clock).unwrap();
        assert_eq!(delta, GAME_HOUR_SECS + 3 * GAME_DAY_SECS);
        assert_eq!(moon_phase_at(clock.game_elapsed() + delta), 6);

        // Morning hours only ever fall in even phases
        assert_eq!(ClockTrigger::game_time(11, 0).with_moon_phase(7).seconds_until(&clock), None);
        let afternoon = ClockTrigger::game_time(13, 0).with_moon_phase(7);
        assert_eq!(
            afternoon.seconds_until(&clock),
            Some(3 * GAME_HOUR_SECS + 3 * GAME_DAY_SECS)
        );
    }

    #[test]
    fn test_system_time_waits_for_its_moon_phase() {
        // 12:00 system time, game elapsed 43200 s: moon phase 14
        let clock = WorldClock::compute(12 * 3600, 0, 0);
        assert_eq!(clock.moon_phase, 14);

        // 12:30 today falls in phase 15, tomorrow in phase 11
        assert_eq!(
            ClockTrigger::system_time(12, 30).with_moon_phase(15).seconds_until(&clock),
            Some(1800)
        );
        assert_eq!(
            ClockTrigger::system_time(12, 30).with_moon_phase(11).seconds_until(&clock),
            Some(1800 + SYSTEM_DAY_SECS)
        );
        assert_eq!(
            ClockTrigger::system_time(12, 30).with_moon_phase(14).seconds_until(&clock),
            None
        );

        let reachable = (0..MOON_PHASE_COUNT)
            .filter(|phase| {
                ClockTrigger::system_time(12, 30)
                    .with_moon_phase(*phase)
                    .seconds_until(&clock)
                    .is_some()
            })
            .count();
        assert_eq!(reachable, 4);
    }
}
