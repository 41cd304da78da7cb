//! The world clock snapshot and the in-game calendar.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Real seconds per in-game minute.
pub const GAME_MINUTE_SECS: i64 = 2;
/// Real seconds per in-game hour.
pub const GAME_HOUR_SECS: i64 = GAME_MINUTE_SECS * 60;
/// Real seconds per in-game day.
pub const GAME_DAY_SECS: i64 = GAME_HOUR_SECS * 24;
/// Real seconds per moon phase.
pub const MOON_PHASE_SECS: i64 = 1440;
/// Number of moon phases in one cycle.
pub const MOON_PHASE_COUNT: u8 = 16;
/// Real seconds per full moon cycle.
pub const MOON_CYCLE_SECS: i64 = MOON_PHASE_SECS * MOON_PHASE_COUNT as i64;
/// Seconds per system (real) day.
pub const SYSTEM_DAY_SECS: i64 = 86_400;

/// A consistent copy of the in-game and system calendar for one system second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldClock {
    /// System time in seconds the snapshot was computed for
    pub system_time: i64,
    /// Offset added to system time to get in-game elapsed time
    pub game_offset: i64,
    /// Offset applied to the system calendar fields, in minutes
    pub time_offset_minutes: i32,

    pub moon_phase: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,

    /// 1 = Monday .. 7 = Sunday
    pub week_day: u8,
    pub system_hour: u8,
    pub system_min: u8,
    pub system_sec: u8,
}

impl WorldClock {
    /// Derives every calendar field for `system_time`.
    pub fn compute(system_time: i64, game_offset: i64, time_offset_minutes: i32) -> Self {
        let elapsed = game_elapsed(system_time, game_offset);
        let in_day = elapsed % GAME_DAY_SECS;

        let local = system_time + i64::from(time_offset_minutes) * 60;
        let calendar: DateTime<Utc> = DateTime::from_timestamp(local, 0).unwrap_or_default();

        Self {
            system_time,
            game_offset,
            time_offset_minutes,
            moon_phase: moon_phase_at(elapsed),
            hour: (in_day / GAME_HOUR_SECS) as u8,
            min: ((in_day % GAME_HOUR_SECS) / GAME_MINUTE_SECS) as u8,
            sec: ((in_day % GAME_MINUTE_SECS) * (60 / GAME_MINUTE_SECS)) as u8,
            week_day: calendar.weekday().number_from_monday() as u8,
            system_hour: calendar.hour() as u8,
            system_min: calendar.minute() as u8,
            system_sec: calendar.second() as u8,
        }
    }

    /// Seconds of in-game time elapsed since the in-game epoch.
    pub fn game_elapsed(&self) -> i64 {
        game_elapsed(self.system_time, self.game_offset)
    }

    /// Seconds since the start of the in-game day.
    pub fn game_seconds_into_day(&self) -> i64 {
        i64::from(self.hour) * GAME_HOUR_SECS + i64::from(self.min) * GAME_MINUTE_SECS
            + self.game_elapsed() % GAME_MINUTE_SECS
    }

    /// Seconds since the start of the (offset) system day.
    pub fn system_seconds_into_day(&self) -> i64 {
        i64::from(self.system_hour) * 3600
            + i64::from(self.system_min) * 60
            + i64::from(self.system_sec)
    }

    /// Seconds until the next system midnight; always in `1..=86400`.
    pub fn seconds_until_midnight(&self) -> i64 {
        SYSTEM_DAY_SECS - self.system_seconds_into_day()
    }

    /// Seconds already spent in the current moon phase.
    pub fn seconds_into_moon_phase(&self) -> i64 {
        self.game_elapsed() % MOON_PHASE_SECS
    }
}

/// Moon phase after `game_elapsed` seconds of in-game time.
pub fn moon_phase_at(game_elapsed: i64) -> u8 {
    ((game_elapsed / MOON_PHASE_SECS) % i64::from(MOON_PHASE_COUNT)) as u8
}

fn game_elapsed(system_time: i64, game_offset: i64) -> i64 {
    system_time.saturating_add(game_offset).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01 00:00:00 UTC, a Monday
    const MONDAY: i64 = 1_704_067_200;

    #[test]
    fn test_system_fields_follow_utc_calendar() {
        let clock = WorldClock::compute(MONDAY + 13 * 3600 + 5 * 60 + 9, 0, 0);
        assert_eq!(clock.week_day, 1);
        assert_eq!((clock.system_hour, clock.system_min, clock.system_sec), (13, 5, 9));
        assert_eq!(clock.seconds_until_midnight(), SYSTEM_DAY_SECS - (13 * 3600 + 5 * 60 + 9));
    }

    #[test]
    fn test_time_offset_shifts_calendar_only() {
        let base = WorldClock::compute(MONDAY, 0, 0);
        let shifted = WorldClock::compute(MONDAY, 0, -60);
        assert_eq!(shifted.week_day, 7);
        assert_eq!(shifted.system_hour, 23);
        assert_eq!((shifted.hour, shifted.min), (base.hour, base.min));
        assert_eq!(shifted.moon_phase, base.moon_phase);
    }

    #[test]
    fn test_game_fields() {
        // 3 game hours, 7 game minutes, one extra real second
        let elapsed = 3 * GAME_HOUR_SECS + 7 * GAME_MINUTE_SECS + 1;
        let clock = WorldClock::compute(0, elapsed, 0);
        assert_eq!((clock.hour, clock.min, clock.sec), (3, 7, 30));
        assert_eq!(clock.game_seconds_into_day(), elapsed);
        assert_eq!(clock.moon_phase, 0);

        let clock = WorldClock::compute(0, MOON_PHASE_SECS * 17 + 5, 0);
        assert_eq!(clock.moon_phase, 1);
        assert_eq!(clock.seconds_into_moon_phase(), 5);
    }

    #[test]
    fn test_midnight_is_a_full_day_away_at_midnight() {
        let clock = WorldClock::compute(MONDAY, 0, 0);
        assert_eq!(clock.seconds_until_midnight(), SYSTEM_DAY_SECS);
    }
}
