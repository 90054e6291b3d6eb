//! Ramadan Goals Library
//!
//! Core of the Ramadan habit tracker: resolving the correct start/end
//! Gregorian dates for the current Ramadan season from the AlAdhan
//! Hijri-calendar API, with global, location-based and manual sourcing,
//! cache-keyed invalidation, and a ready/loading/needs-manual lifecycle.

pub mod api;
pub mod config;
pub mod dates;
pub mod resolver;
pub mod store;
pub mod traits;
pub mod window;

// Re-export commonly used types
pub use api::{AlAdhanClient, ResolvedWindow, ResolverError, build_cache_key};
pub use config::AppConfig;
pub use dates::{
    clamp_to_range, day_of_window, days_in_range, format_local_date, parse_local_date,
};
pub use resolver::{LOCATION_PROMPT, RamadanWindowService, ResolveStatus, ResolverSnapshot};
pub use store::{AppData, FileStore, KeyValueStore, MemoryStore, RamadanSettings, StoreError};
pub use traits::{Clock, MockClock, SystemClock};
pub use window::{
    RamadanWindow, ResolvedSource, SourceMode, ValidWindow, ValidationError, validate_window,
};
