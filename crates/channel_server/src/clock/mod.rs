//! World clock, clock event triggers and next-event recalculation.

pub mod service;
pub mod trigger;
pub mod world_clock;

pub use service::{ClockEvents, EventTypes, FiredEvent, WorldClockService};
pub use trigger::ClockTrigger;
pub use world_clock::{
    WorldClock, GAME_DAY_SECS, GAME_HOUR_SECS, GAME_MINUTE_SECS, MOON_PHASE_COUNT,
    MOON_PHASE_SECS, SYSTEM_DAY_SECS,
};
