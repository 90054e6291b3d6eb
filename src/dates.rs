//! Calendar-day arithmetic on `NaiveDate`.
//!
//! Everything in the app that touches dates goes through these helpers.
//! `NaiveDate` carries no timezone, so a day string entered as `2026-02-27`
//! stays `2026-02-27` on every host — streak and check-in math downstream
//! depends on that.

use chrono::{Datelike, NaiveDate};

use crate::window::RamadanWindow;

/// Canonical calendar-day format used everywhere outside the AlAdhan wire.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a canonical `YYYY-MM-DD` string.
///
/// Strict: the input must round-trip through [`format_local_date`] unchanged,
/// which rejects unpadded fields (`2026-2-7`) along with impossible dates
/// (`2026-02-30` is already rejected by chrono).
pub fn parse_local_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    let date = NaiveDate::parse_from_str(trimmed, DATE_FORMAT).ok()?;
    if format_local_date(date) == trimmed {
        Some(date)
    } else {
        None
    }
}

/// Format a date back to the canonical `YYYY-MM-DD` string.
pub fn format_local_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Every day from `start` through `end` inclusive, in ascending order.
///
/// Empty when `end` precedes `start`.
pub fn days_in_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    if end < start {
        return Vec::new();
    }
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Clamp a date into the inclusive `[start, end]` range.
pub fn clamp_to_range(date: NaiveDate, start: NaiveDate, end: NaiveDate) -> NaiveDate {
    if date < start {
        start
    } else if date > end {
        end
    } else {
        date
    }
}

/// 1-based day number of `date` within the window, `None` outside it.
pub fn day_of_window(date: NaiveDate, window: &RamadanWindow) -> Option<u32> {
    if date < window.start || date > window.end {
        return None;
    }
    let diff = (date - window.start).num_days() + 1;
    u32::try_from(diff).ok()
}

/// Season year of a window start: the Gregorian year the start date falls in.
pub fn season_year_of(start: NaiveDate) -> i32 {
    start.year()
}

/// First of the month `offset` calendar months away from `anchor`'s month.
///
/// Used to sweep the months surrounding a candidate Ramadan start.
pub fn shift_month_start(anchor: NaiveDate, offset: i32) -> Option<NaiveDate> {
    let first = anchor.with_day(1)?;
    let months = first.year() * 12 + first.month0() as i32 + offset;
    let (year, month0) = (months.div_euclid(12), months.rem_euclid(12));
    NaiveDate::from_ymd_opt(year, month0 as u32 + 1, 1)
}
