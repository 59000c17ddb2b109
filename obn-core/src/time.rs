//! Simulation time.
//!
//! Simulated time (`simtime_t` in the original design) is a non-negative
//! count of elementary ticks of a workspace-global [`TimeUnit`]. All
//! user-facing time values — periods, deadlines, the initial wall-clock
//! offset — are real numbers of microseconds and are converted to ticks by
//! rounding to the nearest tick.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A count of elementary simulation ticks. `0` is the initial simulation
/// time; time only ever advances.
pub type Ticks = u64;

/// The workspace-global time unit: a positive integer number of
/// microseconds per elementary tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeUnit(u64);

impl TimeUnit {
    /// One microsecond per tick.
    pub const MICROSECOND: TimeUnit = TimeUnit(1);

    /// Creates a time unit from a strictly positive number of microseconds.
    pub fn from_micros(micros: u64) -> Result<Self, ConfigError> {
        if micros == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "time_unit",
                reason: "must be a strictly positive number of microseconds".to_string(),
            });
        }
        Ok(Self(micros))
    }

    /// Returns the number of microseconds per tick.
    pub fn as_micros(&self) -> u64 {
        self.0
    }
}

/// Converts a duration expressed in microseconds to a (non-negative) tick
/// count, rounding to the nearest tick. Rounding a strictly positive
/// duration down to zero ticks is a warning-level event (surfaced via
/// `tracing` when the `tracing` feature is enabled), since it silently
/// erases a value the caller evidently expected to be observable.
pub fn micros_to_ticks(micros_value: f64, unit: TimeUnit) -> Ticks {
    debug_assert!(micros_value >= 0.0, "negative simulated durations are invalid");
    let ticks = (micros_value / unit.as_micros() as f64).round();
    let ticks = if ticks < 0.0 { 0 } else { ticks as Ticks };

    if ticks == 0 && micros_value > 0.0 {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            micros_value,
            time_unit_us = unit.as_micros(),
            "rounded a strictly positive duration down to zero ticks"
        );
    }

    ticks
}

/// Converts a tick count back to microseconds. This is the exact inverse
/// of [`micros_to_ticks`] for values that were themselves produced by
/// multiplying a tick count by the time unit, i.e.
/// `micros_to_ticks(ticks_to_micros(x, u), u) == x`.
pub fn ticks_to_micros(ticks: Ticks, unit: TimeUnit) -> f64 {
    ticks as f64 * unit.as_micros() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_exact_for_integer_multiples() {
        let unit = TimeUnit::from_micros(1000).unwrap();
        for x in 0..10_000u64 {
            let micros = ticks_to_micros(x, unit);
            assert_eq!(micros_to_ticks(micros, unit), x);
        }
    }

    #[test]
    fn rounds_to_nearest_tick() {
        let unit = TimeUnit::from_micros(1000).unwrap();
        assert_eq!(micros_to_ticks(1499.0, unit), 1);
        assert_eq!(micros_to_ticks(1500.0, unit), 2);
        assert_eq!(micros_to_ticks(0.4, unit), 0);
    }

    #[test]
    fn zero_time_unit_rejected() {
        assert!(TimeUnit::from_micros(0).is_err());
    }
}
