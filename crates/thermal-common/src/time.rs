//! Calendar helpers for compositing windows.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ThermalError, ThermalResult};

/// A closed calendar date range: both `start` and `end` are included.
///
/// Backends that filter on a half-open `[start, end)` interval should be
/// sent [`DateRange::end_exclusive`] so the final day is not dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> ThermalResult<Self> {
        if start > end {
            return Err(ThermalError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Build a range from `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, TimeParseError> {
        let start_date = parse_date(start)?;
        let end_date = parse_date(end)?;
        Self::new(start_date, end_date)
            .map_err(|_| TimeParseError::InvalidRange(format!("{}..{}", start, end)))
    }

    /// Whole calendar year.
    pub fn year(year: i32) -> ThermalResult<Self> {
        let start = ymd(year, 1, 1)?;
        let end = ymd(year, 12, 31)?;
        Self::new(start, end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// First day after the range, for half-open filters.
    pub fn end_exclusive(&self) -> NaiveDate {
        self.end + Duration::days(1)
    }

    /// Number of calendar days covered.
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Number of days in a calendar month, from the calendar rather than a 30/31 table.
pub fn days_in_month(year: i32, month: u32) -> ThermalResult<u32> {
    let first = ymd(year, month, 1)?;
    let next = if month == 12 {
        ymd(year + 1, 1, 1)?
    } else {
        ymd(year, month + 1, 1)?
    };
    Ok((next - first).num_days() as u32)
}

/// The closed range covering one calendar month.
pub fn month_range(year: i32, month: u32) -> ThermalResult<DateRange> {
    let days = days_in_month(year, month)?;
    DateRange::new(ymd(year, month, 1)?, ymd(year, month, days)?)
}

/// Months to composite for `year` as seen on `today`.
///
/// The in-progress year is restricted to January through the current month.
pub fn months_for_year(year: i32, today: NaiveDate) -> Vec<u32> {
    if year == today.year() {
        (1..=today.month()).collect()
    } else {
        (1..=12).collect()
    }
}

fn ymd(year: i32, month: u32, day: u32) -> ThermalResult<NaiveDate> {
    if !(1..=12).contains(&month) {
        return Err(ThermalError::InvalidMonth(month));
    }
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or(ThermalError::InvalidDate { year, month, day })
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate, TimeParseError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| TimeParseError::InvalidFormat(s.to_string()))
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid date format: {0}")]
    InvalidFormat(String),

    #[error("Invalid date range: {0}")]
    InvalidRange(String),
}
