//! Client for the AlAdhan Hijri-calendar API.
//!
//! Three endpoints are used: Gregorian→Hijri conversion (`gToH`),
//! Hijri→Gregorian conversion (`hToG`) and the per-location monthly
//! calendar (`calendarByCity`). All requests are unauthenticated GETs.
//!
//! Dates on the wire are `DD-MM-YYYY`; everything stored or exposed by this
//! crate uses the canonical `YYYY-MM-DD` form. The conversion is pure and
//! lossless; an unparseable wire date is a hard error, never coerced.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use reqwest::header::ACCEPT;
use serde_json::Value;
use thiserror::Error;

use crate::config::NetworkConfig;
use crate::dates::{format_local_date, shift_month_start};
use crate::window::{ResolvedSource, SourceMode, ValidationError, validate_window};

/// Ramadan is the 9th Hijri month, Shawwal the 10th.
pub const RAMADAN_MONTH: u32 = 9;
pub const SHAWWAL_MONTH: u32 = 10;

const WIRE_DATE_FORMAT: &str = "%d-%m-%Y";

/// External API unreachable, non-success response, or data that fails
/// post-fetch validation. Recoverable by retry or by switching to manual
/// mode; the message is surfaced to the user as-is.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolverError {
    #[error("AlAdhan request failed ({status}).")]
    RequestFailed { status: u16 },
    #[error("AlAdhan was unreachable: {0}")]
    Unreachable(String),
    #[error("AlAdhan response was not valid JSON.")]
    MalformedJson,
    #[error("{message}")]
    NonSuccess { message: String },
    #[error("AlAdhan did not return a valid Hijri month/year.")]
    MissingHijri,
    #[error("AlAdhan did not return valid Gregorian Ramadan boundaries.")]
    MissingBoundaries,
    #[error("No Ramadan dates were returned for the selected location.")]
    EmptyLocationCalendar,
    #[error("AlAdhan returned a discontinuous Ramadan range for the selected location.")]
    DiscontinuousRange,
    #[error("City and country are required for location-based date resolution.")]
    MissingLocation,
    #[error(transparent)]
    InvalidWindow(#[from] ValidationError),
}

/// A window resolved from the API, ready to be committed and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub season_year: i32,
    pub hijri_year: i32,
    pub source: ResolvedSource,
    pub cache_key: String,
}

/// Format a date for the AlAdhan wire (`DD-MM-YYYY`).
pub fn to_wire_date(date: NaiveDate) -> String {
    date.format(WIRE_DATE_FORMAT).to_string()
}

/// Parse a date from the AlAdhan wire.
pub fn from_wire_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), WIRE_DATE_FORMAT).ok()
}

/// The identity of a resolution: `"{mode}|{targetHijriYear}|{locationPart}"`.
///
/// Two configurations producing the same key resolve to the same window,
/// which is what lets the state machine skip redundant network calls.
pub fn build_cache_key(
    mode: SourceMode,
    target_hijri_year: Option<i32>,
    city: &str,
    country: &str,
) -> String {
    let year_part = match (mode, target_hijri_year) {
        (SourceMode::Manual, _) => "manual".to_string(),
        (_, Some(year)) => year.to_string(),
        (_, None) => String::new(),
    };
    let location_part = if mode == SourceMode::Location {
        format!(
            "{}|{}",
            city.trim().to_lowercase(),
            country.trim().to_lowercase()
        )
    } else {
        "global".to_string()
    };
    format!("{}|{}|{}", mode.as_str(), year_part, location_part)
}

/// API client for the AlAdhan calendar service.
#[derive(Clone, Debug)]
pub struct AlAdhanClient {
    client: reqwest::Client,
    base_url: String,
}

impl AlAdhanClient {
    /// Create a new API client with configurable timeouts.
    pub fn new(base_url: impl Into<String>, network_config: &NetworkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(network_config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(network_config.connect_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// The Hijri year whose Ramadan is the current season's target.
    ///
    /// If today's Hijri month is Ramadan or earlier, that's this Hijri year;
    /// otherwise Ramadan has passed and the next occurrence is in year + 1.
    pub async fn resolve_target_hijri_year(&self, today: NaiveDate) -> Result<i32, ResolverError> {
        let payload = self
            .fetch(&format!("/gToH/{}", to_wire_date(today)), &[])
            .await?;

        let month = int_field(&payload, &["data", "hijri", "month", "number"]).unwrap_or(0);
        let year = int_field(&payload, &["data", "hijri", "year"]).unwrap_or(0);
        if month < 1 || year < 1 {
            return Err(ResolverError::MissingHijri);
        }

        let year = year as i32;
        Ok(if month <= RAMADAN_MONTH as i64 {
            year
        } else {
            year + 1
        })
    }

    /// Resolve the season window from the global Hijri calendar.
    ///
    /// Ramadan runs from Hijri 01-09 through the day before Hijri 01-10.
    pub async fn resolve_global_window(
        &self,
        today: NaiveDate,
        target_hijri_year: Option<i32>,
    ) -> Result<ResolvedWindow, ResolverError> {
        let year = match target_hijri_year {
            Some(year) => year,
            None => self.resolve_target_hijri_year(today).await?,
        };

        let (ramadan_start, shawwal_start) = tokio::try_join!(
            self.hijri_to_gregorian(1, RAMADAN_MONTH, year),
            self.hijri_to_gregorian(1, SHAWWAL_MONTH, year),
        )?;

        let end = shawwal_start
            .pred_opt()
            .ok_or(ResolverError::MissingBoundaries)?;
        let valid = validate_window(&format_local_date(ramadan_start), &format_local_date(end))?;

        Ok(ResolvedWindow {
            start: valid.start,
            end: valid.end,
            season_year: valid.season_year,
            hijri_year: year,
            source: ResolvedSource::ApiGlobal,
            cache_key: build_cache_key(SourceMode::Global, Some(year), "", ""),
        })
    }

    /// Resolve the season window for a specific city/country.
    ///
    /// Moon-sighting and calculation methods vary by location, so the Hijri
    /// month boundary can shift by a day relative to the global calendar.
    /// The global window anchors the search; the per-location calendars for
    /// the three months around that anchor supply the actual tagged days.
    pub async fn resolve_location_window(
        &self,
        today: NaiveDate,
        city: &str,
        country: &str,
        target_hijri_year: Option<i32>,
    ) -> Result<ResolvedWindow, ResolverError> {
        let city = city.trim();
        let country = country.trim();
        if city.is_empty() || country.is_empty() {
            return Err(ResolverError::MissingLocation);
        }

        let year = match target_hijri_year {
            Some(year) => year,
            None => self.resolve_target_hijri_year(today).await?,
        };

        let anchor = self.resolve_global_window(today, Some(year)).await?;

        let previous = shift_month_start(anchor.start, -1).ok_or(ResolverError::MissingBoundaries)?;
        let current = shift_month_start(anchor.start, 0).ok_or(ResolverError::MissingBoundaries)?;
        let next = shift_month_start(anchor.start, 1).ok_or(ResolverError::MissingBoundaries)?;

        let (a, b, c) = tokio::try_join!(
            self.ramadan_days_in_month(previous, city, country, year),
            self.ramadan_days_in_month(current, city, country, year),
            self.ramadan_days_in_month(next, city, country, year),
        )?;

        let mut days: BTreeSet<NaiveDate> = BTreeSet::new();
        days.extend(a);
        days.extend(b);
        days.extend(c);

        let (Some(&first), Some(&last)) = (days.first(), days.last()) else {
            return Err(ResolverError::EmptyLocationCalendar);
        };

        // A self-consistent feed tags a contiguous run of days; a gap means
        // the calculation disagreed with itself across the month boundary.
        let span = (last - first).num_days() + 1;
        if span != days.len() as i64 {
            return Err(ResolverError::DiscontinuousRange);
        }

        let valid = validate_window(&format_local_date(first), &format_local_date(last))?;

        Ok(ResolvedWindow {
            start: valid.start,
            end: valid.end,
            season_year: valid.season_year,
            hijri_year: year,
            source: ResolvedSource::ApiLocation,
            cache_key: build_cache_key(SourceMode::Location, Some(year), city, country),
        })
    }

    /// Gregorian date of a single Hijri calendar day.
    async fn hijri_to_gregorian(
        &self,
        day: u32,
        month: u32,
        year: i32,
    ) -> Result<NaiveDate, ResolverError> {
        let payload = self
            .fetch(&format!("/hToG/{day:02}-{month:02}-{year}"), &[])
            .await?;

        str_field(&payload, &["data", "gregorian", "date"])
            .and_then(from_wire_date)
            .ok_or(ResolverError::MissingBoundaries)
    }

    /// Days of one Gregorian month that the location calendar tags as
    /// Ramadan of the target Hijri year.
    async fn ramadan_days_in_month(
        &self,
        month_start: NaiveDate,
        city: &str,
        country: &str,
        target_hijri_year: i32,
    ) -> Result<Vec<NaiveDate>, ResolverError> {
        let path = format!(
            "/calendarByCity/{}/{}",
            month_start.year(),
            month_start.month()
        );
        let payload = self
            .fetch(&path, &[("city", city), ("country", country)])
            .await?;

        let mut days = Vec::new();
        if let Some(rows) = json_at(&payload, &["data"]).and_then(Value::as_array) {
            for row in rows {
                let hijri_month = int_field(row, &["hijri", "month", "number"]).unwrap_or(0);
                let hijri_year = int_field(row, &["hijri", "year"]).unwrap_or(0);
                if hijri_month != RAMADAN_MONTH as i64 || hijri_year != target_hijri_year as i64 {
                    continue;
                }
                if let Some(date) = str_field(row, &["gregorian", "date"]).and_then(from_wire_date)
                {
                    days.push(date);
                }
            }
        }
        Ok(days)
    }

    /// GET a path with query parameters and return the envelope-checked
    /// JSON payload. Blank query values are skipped.
    async fn fetch(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ResolverError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url).header(ACCEPT, "application/json");

        let query: Vec<(&str, &str)> = query
            .iter()
            .map(|&(key, value)| (key, value.trim()))
            .filter(|(_, value)| !value.is_empty())
            .collect();
        if !query.is_empty() {
            request = request.query(&query);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ResolverError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolverError::RequestFailed {
                status: status.as_u16(),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|_| ResolverError::MalformedJson)?;

        // The body carries its own status code alongside the HTTP one.
        if let Some(code) = int_field(&payload, &["code"]) {
            if code != 200 {
                let message = str_field(&payload, &["status"])
                    .map(str::to_string)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "AlAdhan returned a non-success response.".to_string());
                return Err(ResolverError::NonSuccess { message });
            }
        }

        Ok(payload)
    }
}

fn json_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, key| node.get(key))
}

/// Integer field that AlAdhan may serve as a JSON number or a string.
fn int_field(value: &Value, path: &[&str]) -> Option<i64> {
    let node = json_at(value, path)?;
    node.as_i64()
        .or_else(|| node.as_str()?.trim().parse().ok())
}

fn str_field<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}
