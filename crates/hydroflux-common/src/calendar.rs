//! CF-style model calendars and calendar-aware datetimes.
//!
//! Simulation time is an exact count of seconds from year 1 of the chosen
//! calendar, so stepping arithmetic never touches month lengths; month
//! lengths only matter when a datetime is built from or decomposed into
//! calendar fields (config parsing, climatology bucketing, display).
//!
//! Calendars are never mixed: every arithmetic or comparison pairing two
//! `DateTime`s assumes the caller checked calendars at coupling time.

use std::fmt;
use std::ops::{Add, Sub};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const SECS_PER_DAY: i64 = 86_400;

/// The calendars recognised in configuration documents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calendar {
    /// Proleptic Gregorian (CF `gregorian`/`standard`).
    #[serde(alias = "standard")]
    Gregorian,
    /// Fixed 365-day years (CF `noleap`/`365_day`).
    #[serde(alias = "365_day")]
    Noleap,
    /// Twelve 30-day months (CF `360_day`).
    #[serde(rename = "360_day")]
    Day360,
    /// Fixed 366-day years (CF `all_leap`/`366_day`).
    #[serde(alias = "366_day")]
    AllLeap,
}

const CUM_NOLEAP: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
const CUM_ALL_LEAP: [i64; 12] = [0, 31, 60, 91, 121, 152, 182, 213, 244, 274, 305, 335];

impl Calendar {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gregorian" | "standard" => Ok(Self::Gregorian),
            "noleap" | "365_day" => Ok(Self::Noleap),
            "360_day" => Ok(Self::Day360),
            "all_leap" | "366_day" => Ok(Self::AllLeap),
            other => Err(ConfigError::invalid(
                "calendar",
                format!("unknown calendar '{other}'"),
            )),
        }
    }

    /// Number of days in `year`.
    pub fn days_in_year(self, year: i32) -> i64 {
        match self {
            Self::Gregorian => {
                if is_gregorian_leap(year) {
                    366
                } else {
                    365
                }
            }
            Self::Noleap => 365,
            Self::Day360 => 360,
            Self::AllLeap => 366,
        }
    }

    pub fn days_in_month(self, year: i32, month: u32) -> i64 {
        debug_assert!((1..=12).contains(&month));
        let m = month as usize - 1;
        match self {
            Self::Gregorian => {
                let cum = if is_gregorian_leap(year) {
                    &CUM_ALL_LEAP
                } else {
                    &CUM_NOLEAP
                };
                let next = if m == 11 {
                    self.days_in_year(year)
                } else {
                    cum[m + 1]
                };
                next - cum[m]
            }
            Self::Noleap => {
                let next = if m == 11 { 365 } else { CUM_NOLEAP[m + 1] };
                next - CUM_NOLEAP[m]
            }
            Self::Day360 => 30,
            Self::AllLeap => {
                let next = if m == 11 { 366 } else { CUM_ALL_LEAP[m + 1] };
                next - CUM_ALL_LEAP[m]
            }
        }
    }

    /// Buckets a `daily` climatology carries in this calendar. Gregorian uses
    /// the leap-year template so 29 February has a bucket of its own.
    pub fn daily_climatology_len(self) -> usize {
        match self {
            Self::Gregorian | Self::AllLeap => 366,
            Self::Noleap => 365,
            Self::Day360 => 360,
        }
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gregorian => "gregorian",
            Self::Noleap => "noleap",
            Self::Day360 => "360_day",
            Self::AllLeap => "all_leap",
        })
    }
}

fn is_gregorian_leap(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// A calendar-tagged instant, exact to the second.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateTime {
    /// Seconds since 0001-01-01 00:00:00 of `calendar`.
    seconds: i64,
    calendar: Calendar,
}

impl DateTime {
    pub fn from_ymd_hms(
        calendar: Calendar,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
    ) -> Result<Self, ConfigError> {
        if !(1..=12).contains(&month) {
            return Err(ConfigError::invalid(
                "datetime",
                format!("month {month} out of range"),
            ));
        }
        if day < 1 || (day as i64) > calendar.days_in_month(year, month) {
            return Err(ConfigError::invalid(
                "datetime",
                format!("day {day} out of range for {year}-{month:02} ({calendar})"),
            ));
        }
        if hour > 23 || minute > 59 || second > 59 {
            return Err(ConfigError::invalid(
                "datetime",
                format!("invalid time of day {hour:02}:{minute:02}:{second:02}"),
            ));
        }
        let days = match calendar {
            Calendar::Gregorian => {
                let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
                    ConfigError::invalid("datetime", format!("invalid date {year}-{month}-{day}"))
                })?;
                i64::from(date.num_days_from_ce()) - 1
            }
            Calendar::Noleap => {
                i64::from(year - 1) * 365 + CUM_NOLEAP[month as usize - 1] + i64::from(day) - 1
            }
            Calendar::Day360 => {
                i64::from(year - 1) * 360 + i64::from(month - 1) * 30 + i64::from(day) - 1
            }
            Calendar::AllLeap => {
                i64::from(year - 1) * 366 + CUM_ALL_LEAP[month as usize - 1] + i64::from(day) - 1
            }
        };
        Ok(Self {
            seconds: days * SECS_PER_DAY
                + i64::from(hour) * 3600
                + i64::from(minute) * 60
                + i64::from(second),
            calendar,
        })
    }

    /// Parses `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` (also `T`-separated).
    pub fn parse(s: &str, calendar: Calendar) -> Result<Self, ConfigError> {
        let s = s.trim();
        let bad = |reason: &str| ConfigError::invalid("datetime", format!("'{s}': {reason}"));
        let (date, time) = match s.split_once([' ', 'T']) {
            Some((d, t)) => (d, Some(t)),
            None => (s, None),
        };
        let mut ymd = date.splitn(3, '-');
        let year: i32 = ymd
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| bad("bad year"))?;
        let month: u32 = ymd
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| bad("bad month"))?;
        let day: u32 = ymd
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| bad("bad day"))?;
        let (hour, minute, second) = match time {
            None => (0, 0, 0),
            Some(t) => {
                let mut hms = t.splitn(3, ':');
                let h: u32 = hms
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| bad("bad hour"))?;
                let m: u32 = hms
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| bad("bad minute"))?;
                let s: u32 = match hms.next() {
                    None => 0,
                    Some(v) => v.parse().map_err(|_| bad("bad second"))?,
                };
                (h, m, s)
            }
        };
        Self::from_ymd_hms(calendar, year, month, day, hour, minute, second)
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// `(year, month, day, hour, minute, second)` in the datetime's calendar.
    pub fn decompose(&self) -> (i32, u32, u32, u32, u32, u32) {
        let days = self.seconds.div_euclid(SECS_PER_DAY);
        let secs = self.seconds.rem_euclid(SECS_PER_DAY);
        let (hour, minute, second) = (
            (secs / 3600) as u32,
            ((secs % 3600) / 60) as u32,
            (secs % 60) as u32,
        );
        let (year, month, day) = match self.calendar {
            Calendar::Gregorian => {
                let date = NaiveDate::from_num_days_from_ce_opt((days + 1) as i32)
                    .unwrap_or(NaiveDate::MIN);
                (date.year(), date.month(), date.day())
            }
            Calendar::Noleap => split_fixed_year(days, 365, &CUM_NOLEAP),
            Calendar::Day360 => {
                let year = days.div_euclid(360) as i32 + 1;
                let rem = days.rem_euclid(360);
                (year, (rem / 30) as u32 + 1, (rem % 30) as u32 + 1)
            }
            Calendar::AllLeap => split_fixed_year(days, 366, &CUM_ALL_LEAP),
        };
        (year, month, day, hour, minute, second)
    }

    pub fn year(&self) -> i32 {
        self.decompose().0
    }

    pub fn month(&self) -> u32 {
        self.decompose().1
    }

    /// One-based day of year.
    pub fn day_of_year(&self) -> u32 {
        let (year, month, day, ..) = self.decompose();
        let cum: i64 = (1..month)
            .map(|m| self.calendar.days_in_month(year, m))
            .sum();
        (cum + i64::from(day)) as u32
    }

    /// Meteorological season index: DJF 0, MAM 1, JJA 2, SON 3.
    pub fn season(&self) -> usize {
        ((self.month() % 12) / 3) as usize
    }

    /// Bucket of a `daily` climatology. Uses the leap-year day template for
    /// the Gregorian calendar so the index of a given month-day never shifts
    /// between leap and non-leap years.
    pub fn daily_climatology_index(&self) -> usize {
        let (_, month, day, ..) = self.decompose();
        match self.calendar {
            Calendar::Gregorian | Calendar::AllLeap => {
                (CUM_ALL_LEAP[month as usize - 1] + i64::from(day) - 1) as usize
            }
            Calendar::Noleap => (CUM_NOLEAP[month as usize - 1] + i64::from(day) - 1) as usize,
            Calendar::Day360 => ((month - 1) * 30 + day - 1) as usize,
        }
    }

    /// Chrono view of a Gregorian datetime (driving-data indexing helper).
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        if self.calendar != Calendar::Gregorian {
            return None;
        }
        let (y, mo, d, h, mi, s) = self.decompose();
        NaiveDate::from_ymd_opt(y, mo, d).and_then(|date| date.and_hms_opt(h, mi, s))
    }

    pub fn from_naive(dt: NaiveDateTime) -> Self {
        let days = i64::from(dt.date().num_days_from_ce()) - 1;
        Self {
            seconds: days * SECS_PER_DAY + i64::from(dt.time().num_seconds_from_midnight()),
            calendar: Calendar::Gregorian,
        }
    }
}

fn split_fixed_year(days: i64, year_len: i64, cum: &[i64; 12]) -> (i32, u32, u32) {
    let year = days.div_euclid(year_len) as i32 + 1;
    let rem = days.rem_euclid(year_len);
    let month = cum.iter().rposition(|&c| c <= rem).unwrap_or(0);
    (year, month as u32 + 1, (rem - cum[month]) as u32 + 1)
}

impl Add<Duration> for DateTime {
    type Output = DateTime;

    fn add(self, rhs: Duration) -> DateTime {
        DateTime {
            seconds: self.seconds + rhs.num_seconds(),
            calendar: self.calendar,
        }
    }
}

impl Sub<Duration> for DateTime {
    type Output = DateTime;

    fn sub(self, rhs: Duration) -> DateTime {
        DateTime {
            seconds: self.seconds - rhs.num_seconds(),
            calendar: self.calendar,
        }
    }
}

impl Sub<DateTime> for DateTime {
    type Output = Duration;

    fn sub(self, rhs: DateTime) -> Duration {
        debug_assert_eq!(self.calendar, rhs.calendar);
        Duration::seconds(self.seconds - rhs.seconds)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (y, mo, d, h, mi, s) = self.decompose();
        write!(f, "{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}")
    }
}
