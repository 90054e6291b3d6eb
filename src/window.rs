//! Ramadan window domain types and validation.
//!
//! The validator is pure and is used both for manual-entry input and for
//! sanity-checking AlAdhan responses before they are trusted.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dates::{days_in_range, parse_local_date, season_year_of};

/// Hardcoded window shown before the first resolution ever completes.
/// Replaced by a resolved or persisted window as soon as one exists.
pub const FALLBACK_START: &str = "2026-02-27";
pub const FALLBACK_END: &str = "2026-03-28";
pub const FALLBACK_SEASON_YEAR: i32 = 2026;

/// The resolved answer: a concrete Gregorian span for one Ramadan season.
///
/// Invariant: `end >= start` and the inclusive day count is 29 or 30.
/// Never mutated in place — always replaced wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamadanWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Gregorian year the start date falls in.
    pub season_year: i32,
}

impl RamadanWindow {
    /// The first-run fallback window.
    pub fn fallback() -> Self {
        // The constants are valid by construction; parse cannot fail.
        let start = parse_local_date(FALLBACK_START).unwrap_or_default();
        let end = parse_local_date(FALLBACK_END).unwrap_or_default();
        Self {
            start,
            end,
            season_year: FALLBACK_SEASON_YEAR,
        }
    }
}

/// User-chosen strategy for determining Ramadan's dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Global,
    Location,
    Manual,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Global => "global",
            SourceMode::Location => "location",
            SourceMode::Manual => "manual",
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(SourceMode::Global),
            "location" => Ok(SourceMode::Location),
            "manual" => Ok(SourceMode::Manual),
            other => Err(format!("unknown source mode: {other:?}")),
        }
    }
}

/// Where a resolved window came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolvedSource {
    ApiGlobal,
    ApiLocation,
    Manual,
    #[default]
    Fallback,
}

impl ResolvedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedSource::ApiGlobal => "api-global",
            ResolvedSource::ApiLocation => "api-location",
            ResolvedSource::Manual => "manual",
            ResolvedSource::Fallback => "fallback",
        }
    }
}

/// Malformed or out-of-range date input. Always user-correctable; the
/// message is surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Enter dates in YYYY-MM-DD format.")]
    BadFormat,
    #[error("End date must be on or after start date.")]
    EndBeforeStart,
    #[error("Ramadan date range must be 29 or 30 days.")]
    WrongLength,
}

/// A `(start, end)` pair that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub season_year: i32,
    pub day_count: usize,
}

impl From<ValidWindow> for RamadanWindow {
    fn from(valid: ValidWindow) -> Self {
        RamadanWindow {
            start: valid.start,
            end: valid.end,
            season_year: valid.season_year,
        }
    }
}

/// Check that a candidate `(start, end)` pair is a plausible Ramadan span.
///
/// Rules, in order: both strings must be canonical calendar dates; `end`
/// must not precede `start`; the inclusive day count must be 29 or 30.
pub fn validate_window(start: &str, end: &str) -> Result<ValidWindow, ValidationError> {
    let (Some(start), Some(end)) = (parse_local_date(start), parse_local_date(end)) else {
        return Err(ValidationError::BadFormat);
    };

    if end < start {
        return Err(ValidationError::EndBeforeStart);
    }

    let day_count = days_in_range(start, end).len();
    if !(29..=30).contains(&day_count) {
        return Err(ValidationError::WrongLength);
    }

    Ok(ValidWindow {
        start,
        end,
        season_year: season_year_of(start),
        day_count,
    })
}
