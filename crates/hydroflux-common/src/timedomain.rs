//! Temporal domain of one component: a monotone sequence of timestep bounds
//! with a calendar and a constant step.

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::calendar::{Calendar, DateTime};
use crate::error::ConfigError;

/// `steps` contiguous intervals of width `step` starting at `start`.
///
/// Immutable after construction. Two domains may couple iff they share a
/// calendar, span the same period, and one step is an integer multiple of
/// the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeDomain {
    start: DateTime,
    step_seconds: i64,
    steps: usize,
}

impl TimeDomain {
    pub fn new(start: DateTime, step: Duration, steps: usize) -> Result<Self, ConfigError> {
        let step_seconds = step.num_seconds();
        if step_seconds <= 0 {
            return Err(ConfigError::invalid(
                "timedomain",
                format!("step must be positive, got {step_seconds}s"),
            ));
        }
        if Duration::seconds(step_seconds) != step {
            return Err(ConfigError::invalid(
                "timedomain",
                "step must be a whole number of seconds",
            ));
        }
        if steps == 0 {
            return Err(ConfigError::invalid("timedomain", "at least one timestep"));
        }
        Ok(Self {
            start,
            step_seconds,
            steps,
        })
    }

    /// Builds the domain covering `[start, end)` in steps of `step`;
    /// `end - start` must be an exact multiple of `step`.
    pub fn from_start_end(
        start: DateTime,
        end: DateTime,
        step: Duration,
    ) -> Result<Self, ConfigError> {
        let span = (end - start).num_seconds();
        let step_s = step.num_seconds();
        if span <= 0 {
            return Err(ConfigError::invalid(
                "timedomain",
                format!("end {end} does not follow start {start}"),
            ));
        }
        if step_s <= 0 || span % step_s != 0 {
            return Err(ConfigError::invalid(
                "timedomain",
                format!("period of {span}s is not a multiple of the {step_s}s step"),
            ));
        }
        Self::new(start, step, (span / step_s) as usize)
    }

    pub fn calendar(&self) -> Calendar {
        self.start.calendar()
    }

    pub fn start(&self) -> DateTime {
        self.start
    }

    pub fn end(&self) -> DateTime {
        self.start + Duration::seconds(self.step_seconds * self.steps as i64)
    }

    pub fn step(&self) -> Duration {
        Duration::seconds(self.step_seconds)
    }

    pub fn step_seconds(&self) -> i64 {
        self.step_seconds
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Lower bound of timestep `i` (so `bound(steps)` is the domain end).
    pub fn bound(&self, i: usize) -> DateTime {
        debug_assert!(i <= self.steps);
        self.start + Duration::seconds(self.step_seconds * i as i64)
    }

    /// True when both domains cover the identical period on the same calendar.
    pub fn same_period(&self, other: &TimeDomain) -> bool {
        self.calendar() == other.calendar()
            && self.start == other.start
            && self.end() == other.end()
    }

    /// Checks the coupling rule against `other`; `a`/`b` name the owners for
    /// the error message.
    pub fn check_coupling(&self, other: &TimeDomain, a: &str, b: &str) -> Result<(), ConfigError> {
        let fail = |reason: String| ConfigError::Alignment {
            a: a.to_string(),
            b: b.to_string(),
            reason,
        };
        if self.calendar() != other.calendar() {
            return Err(fail(format!(
                "calendars differ ({} vs {})",
                self.calendar(),
                other.calendar()
            )));
        }
        if !self.same_period(other) {
            return Err(fail(format!(
                "periods differ ([{} .. {}] vs [{} .. {}])",
                self.start,
                self.end(),
                other.start,
                other.end()
            )));
        }
        let (hi, lo) = if self.step_seconds >= other.step_seconds {
            (self.step_seconds, other.step_seconds)
        } else {
            (other.step_seconds, self.step_seconds)
        };
        if hi % lo != 0 {
            return Err(fail(format!(
                "steps are not integer multiples ({}s vs {}s)",
                self.step_seconds, other.step_seconds
            )));
        }
        Ok(())
    }

    /// Restricts the domain to `[start, end)`; both must sit on step bounds.
    pub fn subset(&self, start: DateTime, end: DateTime) -> Result<TimeDomain, ConfigError> {
        let off = (start - self.start).num_seconds();
        if off < 0 || off % self.step_seconds != 0 || start >= end || end > self.end() {
            return Err(ConfigError::invalid(
                "timedomain subset",
                format!("[{start} .. {end}] does not sit on {self}"),
            ));
        }
        TimeDomain::from_start_end(start, end, self.step())
    }
}

impl fmt::Display for TimeDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} .. {}] step {}s ({})",
            self.start,
            self.end(),
            self.step_seconds,
            self.calendar()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily(start: &str, days: usize) -> TimeDomain {
        let start = DateTime::parse(start, Calendar::Gregorian).unwrap();
        TimeDomain::new(start, Duration::days(1), days).unwrap()
    }

    #[test]
    fn end_is_start_plus_n_steps() {
        let td = daily("2019-01-01 09:00:00", 16);
        assert_eq!(td.end().to_string(), "2019-01-17 09:00:00");
        assert_eq!(td.bound(0), td.start());
        assert_eq!(td.bound(16), td.end());
    }

    #[test]
    fn coupling_requires_integer_step_ratio() {
        let a = daily("2019-01-01", 16);
        let start = DateTime::parse("2019-01-01", Calendar::Gregorian).unwrap();
        let b = TimeDomain::new(start, Duration::hours(8), 48).unwrap();
        assert!(a.check_coupling(&b, "a", "b").is_ok());

        let c = TimeDomain::new(start, Duration::hours(7), 16 * 24 / 7 + 1);
        // 7h does not divide 24h even before the period check fires.
        assert!(c.is_err() || a.check_coupling(&c.unwrap(), "a", "c").is_err());
    }

    #[test]
    fn coupling_rejects_mixed_calendars() {
        let a = daily("2019-01-01", 16);
        let start = DateTime::parse("2019-01-01", Calendar::Noleap).unwrap();
        let b = TimeDomain::new(start, Duration::days(1), 16).unwrap();
        assert!(a.check_coupling(&b, "a", "b").is_err());
    }

    #[test]
    fn subset_must_sit_on_bounds() {
        let td = daily("2019-01-01 09:00:00", 16);
        let s = DateTime::parse("2019-01-03 09:00:00", Calendar::Gregorian).unwrap();
        let e = DateTime::parse("2019-01-07 09:00:00", Calendar::Gregorian).unwrap();
        let sub = td.subset(s, e).unwrap();
        assert_eq!(sub.steps(), 4);

        let off = DateTime::parse("2019-01-03 10:00:00", Calendar::Gregorian).unwrap();
        assert!(td.subset(off, e).is_err());
    }

    #[test]
    fn zero_length_period_is_rejected() {
        let start = DateTime::parse("2019-01-01", Calendar::Gregorian).unwrap();
        assert!(TimeDomain::from_start_end(start, start, Duration::days(1)).is_err());
    }
}
