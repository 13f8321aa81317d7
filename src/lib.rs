//! Espresso boiler temperature control.
//!
//! The control core is hardware independent: it talks to the thermocouple through
//! [`thermometer::Thermocouple`], to the heating element through [`heater::Heater`] and to
//! persistent settings through [`storage::settings::SettingsStore`]. [`boiler::Boiler`] owns all
//! of it and is driven by calling [`boiler::Boiler::tick`] from a periodic task.

#![cfg_attr(not(test), no_std)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

#[macro_use]
mod fmt;

pub mod autotune;
pub mod boiler;
pub mod config;
pub mod controller;
pub mod heater;
pub mod state;
pub mod storage;
pub mod terminal;
pub mod thermometer;

/// Monotonic time with millisecond ticks.
pub type Instant = fugit::TimerInstantU64<1_000>;

/// Duration with millisecond ticks.
pub type Duration = fugit::MillisDurationU64;

/// Time elapsed from `earlier` to `now`, zero if the clock appears to have gone backwards.
#[inline]
pub(crate) fn elapsed(now: Instant, earlier: Instant) -> Duration {
    now.checked_duration_since(earlier)
        .unwrap_or_else(|| Duration::from_ticks(0))
}
