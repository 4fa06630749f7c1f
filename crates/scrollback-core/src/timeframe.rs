//! Relative time frames such as `12h`, `3d` or `2m`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::error::{ArchiveError, Result};

const SECS_PER_HOUR: i64 = 60 * 60;
const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;
/// A "month" is a flat thirty days.
const DAYS_PER_MONTH: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Hours,
    Days,
    Months,
}

impl TimeUnit {
    fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'h' => Some(TimeUnit::Hours),
            'd' => Some(TimeUnit::Days),
            'm' => Some(TimeUnit::Months),
            _ => None,
        }
    }

    fn seconds(&self) -> i64 {
        match self {
            TimeUnit::Hours => SECS_PER_HOUR,
            TimeUnit::Days => SECS_PER_DAY,
            TimeUnit::Months => DAYS_PER_MONTH * SECS_PER_DAY,
        }
    }

    fn suffix(&self) -> char {
        match self {
            TimeUnit::Hours => 'h',
            TimeUnit::Days => 'd',
            TimeUnit::Months => 'm',
        }
    }
}

/// How far back a fetch reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFrame {
    pub amount: i64,
    pub unit: TimeUnit,
}

impl TimeFrame {
    pub const ONE_DAY: TimeFrame = TimeFrame {
        amount: 1,
        unit: TimeUnit::Days,
    };

    /// Parse `<int><unit>`.
    ///
    /// The number must parse; an unrecognized unit falls back to one day
    /// with a warning.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let mut chars = input.chars();
        let unit_char = chars
            .next_back()
            .ok_or_else(|| ArchiveError::InvalidTimeFrame("empty time frame".to_string()))?;
        let number = chars.as_str();

        let amount: i64 = number.parse().map_err(|_| {
            ArchiveError::InvalidTimeFrame(format!("{:?}: expected <number><h|d|m>", input))
        })?;
        if amount < 0 {
            return Err(ArchiveError::InvalidTimeFrame(format!(
                "{:?}: time frame cannot be negative",
                input
            )));
        }

        match TimeUnit::from_char(unit_char) {
            Some(unit) => Ok(Self { amount, unit }),
            None => {
                warn!(input, "unknown time unit, using 1 day");
                Ok(Self::ONE_DAY)
            }
        }
    }

    pub fn duration(&self) -> Result<Duration> {
        self.amount
            .checked_mul(self.unit.seconds())
            .and_then(Duration::try_seconds)
            .ok_or_else(|| ArchiveError::InvalidTimeFrame(format!("{} is out of range", self)))
    }

    /// `now` minus this frame.
    pub fn cutoff_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        now.checked_sub_signed(self.duration()?)
            .ok_or_else(|| ArchiveError::InvalidTimeFrame(format!("{} is out of range", self)))
    }

    pub fn cutoff(&self) -> Result<DateTime<Utc>> {
        self.cutoff_from(Utc::now())
    }
}

impl FromStr for TimeFrame {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

/// Cutoff instant for `input` relative to now.
pub fn parse_time_frame(input: &str) -> Result<DateTime<Utc>> {
    TimeFrame::parse(input)?.cutoff()
}
