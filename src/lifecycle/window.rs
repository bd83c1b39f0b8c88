//! Daily sleep-window arithmetic.
//!
//! Boundaries are `HH:MM` times compared as minutes-of-day in the
//! configured timezone. The window is half-open: the start minute is inside,
//! the end minute is not.

use crate::error::{PresenceError, Result};
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

/// A wall-clock time of day with minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockTime {
    minutes: u16,
}

impl ClockTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(PresenceError::Config(format!(
                "time of day out of range: {hour:02}:{minute:02}"
            )));
        }
        Ok(Self {
            minutes: u16::from(hour) * 60 + u16::from(minute),
        })
    }

    /// Minutes since midnight.
    #[must_use]
    pub fn minutes_of_day(self) -> u16 {
        self.minutes
    }
}

impl FromStr for ClockTime {
    type Err = PresenceError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = || PresenceError::Config(format!("expected HH:MM, got '{raw}'"));
        let (hour, minute) = raw.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u8 = hour.parse().map_err(|_| invalid())?;
        let minute: u8 = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes / 60, self.minutes % 60)
    }
}

/// A daily `[start, end)` range, possibly crossing midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepWindow {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl SleepWindow {
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Ok(Self {
            start: start.parse()?,
            end: end.parse()?,
        })
    }

    /// Whether `minutes` (since midnight) falls inside the window.
    #[must_use]
    pub fn contains_minute(&self, minutes: u16) -> bool {
        let start = self.start.minutes_of_day();
        let end = self.end.minutes_of_day();
        if start > end {
            minutes >= start || minutes < end
        } else {
            minutes >= start && minutes < end
        }
    }

    /// Whether `now`, viewed in `tz`, falls inside the window.
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        let local = now.with_timezone(&tz);
        // hour() <= 23 and minute() <= 59, so this always fits.
        let minutes = (local.hour() * 60 + local.minute()) as u16;
        self.contains_minute(minutes)
    }
}
