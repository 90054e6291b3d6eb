//! Window resolution state machine.
//!
//! Owns the ready/loading/needs-manual lifecycle around the AlAdhan client.
//! Every trigger — startup, mode switch, location edit, manual save, retry —
//! funnels through one resolution entry point. Each entry bumps a generation
//! counter and an attempt only commits if its generation is still current,
//! so a superseded in-flight resolution completes as a no-op and the latest
//! trigger always wins.

use std::sync::{Arc, Mutex};

use crate::api::{AlAdhanClient, ResolverError, build_cache_key};
use crate::config::AppConfig;
use crate::dates::format_local_date;
use crate::store::{AppData, KeyValueStore, RamadanSettings};
use crate::traits::Clock;
use crate::window::{RamadanWindow, ResolvedSource, SourceMode, ValidationError, validate_window};

/// Held message shown while location mode is missing its fields. This is a
/// configuration gap, not a resolution failure, so the state stays `Ready`.
pub const LOCATION_PROMPT: &str = "Enter city and country, or switch source mode.";

/// Lifecycle state exposed to the surrounding UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveStatus {
    #[default]
    Loading,
    Ready,
    NeedsManual,
}

impl ResolveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveStatus::Loading => "loading",
            ResolveStatus::Ready => "ready",
            ResolveStatus::NeedsManual => "needs_manual",
        }
    }
}

impl std::fmt::Display for ResolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the resolver for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSnapshot {
    pub window: RamadanWindow,
    pub status: ResolveStatus,
    pub source_mode: SourceMode,
    pub error: String,
}

struct Inner {
    data: AppData,
    window: RamadanWindow,
    status: ResolveStatus,
    error: String,
    generation: u64,
}

/// The window resolution service.
///
/// The store, API client and clock are injected so tests can run against a
/// fake store, a mock server and a pinned date.
pub struct RamadanWindowService<S> {
    api: AlAdhanClient,
    store: S,
    clock: Arc<dyn Clock>,
    storage_key: String,
    default_city: String,
    default_country: String,
    inner: Mutex<Inner>,
}

impl<S: KeyValueStore> RamadanWindowService<S> {
    pub fn new(api: AlAdhanClient, store: S, clock: Arc<dyn Clock>, config: &AppConfig) -> Self {
        Self {
            api,
            store,
            clock,
            storage_key: config.storage.key.clone(),
            default_city: config.location.default_city.clone(),
            default_country: config.location.default_country.clone(),
            inner: Mutex::new(Inner {
                data: AppData::default(),
                window: RamadanWindow::fallback(),
                status: ResolveStatus::Loading,
                error: String::new(),
                generation: 0,
            }),
        }
    }

    /// Read the persisted document and run the initial resolution.
    ///
    /// Storage failures are logged and the session continues on a fresh
    /// in-memory document.
    pub async fn load(&self) {
        let data = match self.store.get(&self.storage_key).await {
            Ok(Some(raw)) => match AppData::from_json(&raw) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(error = %e, "persisted document was unreadable, starting fresh");
                    self.fresh_document()
                }
            },
            Ok(None) => self.fresh_document(),
            Err(e) => {
                tracing::warn!(error = %e, "storage read failed, starting fresh");
                self.fresh_document()
            }
        };

        self.inner.lock().unwrap().data = data;
        self.run_resolution(false).await;
    }

    /// Re-run resolution for the current configuration, honoring the cache.
    pub async fn resolve(&self) {
        self.run_resolution(false).await;
    }

    /// Explicit user retry: forces the network path past the cache.
    pub async fn retry_resolve(&self) {
        self.run_resolution(true).await;
    }

    /// Switch the sourcing strategy and re-resolve. The mode itself changed,
    /// so the cached record is deliberately bypassed.
    pub async fn set_source_mode(&self, mode: SourceMode) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let settings = &mut inner.data.ramadan;
            let before = settings.clone();
            settings.source_mode = mode;
            settings.setup_complete = true;
            settings.resolve_error.clear();
            before != *settings
        };
        self.persist_if(changed).await;
        self.run_resolution(mode != SourceMode::Manual).await;
    }

    /// Persist new location fields; re-resolve only when location mode is
    /// currently active.
    pub async fn update_location(&self, city: &str, country: &str) {
        let (changed, active_mode) = {
            let mut inner = self.inner.lock().unwrap();
            let settings = &mut inner.data.ramadan;
            let before = settings.clone();
            settings.location_city = city.to_string();
            settings.location_country = country.to_string();
            settings.setup_complete = true;
            settings.resolve_error.clear();
            (before != *settings, settings.source_mode)
        };
        self.persist_if(changed).await;
        if active_mode == SourceMode::Location {
            self.run_resolution(false).await;
        }
    }

    /// Validate and persist a manually entered window, returning the outcome
    /// inline so a prompt can show immediate feedback.
    pub async fn save_manual_window(
        &self,
        start: &str,
        end: &str,
    ) -> Result<RamadanWindow, ValidationError> {
        let start = start.trim().to_string();
        let end = end.trim().to_string();

        match validate_window(&start, &end) {
            Err(e) => {
                let mut inner = self.inner.lock().unwrap();
                inner.status = ResolveStatus::NeedsManual;
                inner.error = e.to_string();
                Err(e)
            }
            Ok(valid) => {
                let window = RamadanWindow::from(valid);
                let changed = {
                    let mut inner = self.inner.lock().unwrap();
                    // A committed manual window supersedes any in-flight
                    // network attempt.
                    inner.generation += 1;
                    let settings = &mut inner.data.ramadan;
                    let before = settings.clone();
                    settings.source_mode = SourceMode::Manual;
                    settings.manual_start = start.clone();
                    settings.manual_end = end.clone();
                    settings.setup_complete = true;
                    apply_record(
                        settings,
                        &window,
                        ResolvedSource::Manual,
                        None,
                        &build_cache_key(SourceMode::Manual, None, "", ""),
                    );
                    let changed = before != *settings;
                    inner.window = window;
                    inner.status = ResolveStatus::Ready;
                    inner.error.clear();
                    changed
                };
                self.persist_if(changed).await;
                Ok(window)
            }
        }
    }

    /// Current window, lifecycle state, active mode and error string.
    pub fn snapshot(&self) -> ResolverSnapshot {
        let inner = self.inner.lock().unwrap();
        ResolverSnapshot {
            window: inner.window,
            status: inner.status,
            source_mode: inner.data.ramadan.source_mode,
            error: inner.error.clone(),
        }
    }

    /// Copy of the persisted `ramadan` section.
    pub fn settings(&self) -> RamadanSettings {
        self.inner.lock().unwrap().data.ramadan.clone()
    }

    // ==================== Resolution core ====================

    /// The single resolution entry point all triggers funnel through.
    async fn run_resolution(&self, force: bool) {
        let (generation, settings) = {
            let mut inner = self.inner.lock().unwrap();
            inner.generation += 1;

            // Surface the last known window while resolving; the hardcoded
            // fallback only appears before any resolution ever completed.
            let persisted = validate_window(
                &inner.data.ramadan.resolved_start,
                &inner.data.ramadan.resolved_end,
            );
            inner.window = match &persisted {
                Ok(valid) => RamadanWindow {
                    start: valid.start,
                    end: valid.end,
                    season_year: if inner.data.ramadan.resolved_season_year != 0 {
                        inner.data.ramadan.resolved_season_year
                    } else {
                        valid.season_year
                    },
                },
                Err(_) => RamadanWindow::fallback(),
            };

            (inner.generation, inner.data.ramadan.clone())
        };

        match settings.source_mode {
            SourceMode::Manual => self.resolve_manual(generation, &settings).await,
            SourceMode::Location
                if settings.location_city.trim().is_empty()
                    || settings.location_country.trim().is_empty() =>
            {
                self.hold_for_location(generation).await;
            }
            mode => self.resolve_from_api(generation, mode, &settings, force).await,
        }
    }

    /// Manual mode derives the window purely from the stored manual fields.
    async fn resolve_manual(&self, generation: u64, settings: &RamadanSettings) {
        match validate_window(&settings.manual_start, &settings.manual_end) {
            Ok(valid) => {
                let window = RamadanWindow::from(valid);
                let committed = self.commit(generation, |inner| {
                    inner.window = window;
                    inner.status = ResolveStatus::Ready;
                    inner.error.clear();
                    apply_record(
                        &mut inner.data.ramadan,
                        &window,
                        ResolvedSource::Manual,
                        None,
                        &build_cache_key(SourceMode::Manual, None, "", ""),
                    );
                });
                if let Some(changed) = committed {
                    self.persist_if(changed).await;
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.commit(generation, |inner| {
                    inner.status = ResolveStatus::NeedsManual;
                    inner.error = message.clone();
                });
            }
        }
    }

    /// Location mode with blank fields: ready, with a held prompt.
    async fn hold_for_location(&self, generation: u64) {
        let committed = self.commit(generation, |inner| {
            inner.status = ResolveStatus::Ready;
            inner.error = LOCATION_PROMPT.to_string();
            inner.data.ramadan.resolve_error = LOCATION_PROMPT.to_string();
        });
        if let Some(changed) = committed {
            self.persist_if(changed).await;
        }
    }

    /// The network path for global and location modes.
    async fn resolve_from_api(
        &self,
        generation: u64,
        mode: SourceMode,
        settings: &RamadanSettings,
        force: bool,
    ) {
        if self
            .commit(generation, |inner| {
                inner.status = ResolveStatus::Loading;
                inner.error.clear();
            })
            .is_none()
        {
            return;
        }

        let today = self.clock.today();
        let target_year = match self.api.resolve_target_hijri_year(today).await {
            Ok(year) => year,
            Err(e) => return self.fail(generation, e).await,
        };

        let expected_key = build_cache_key(
            mode,
            Some(target_year),
            &settings.location_city,
            &settings.location_country,
        );

        // Hijri-year boundaries are stable for months at a time; when the
        // stored record already answers this exact question, skip the
        // window fetch entirely.
        let stored_valid =
            validate_window(&settings.resolved_start, &settings.resolved_end).is_ok();
        if !force && stored_valid && settings.resolved_cache_key == expected_key {
            tracing::debug!(cache_key = %expected_key, "reusing cached Ramadan window");
            let committed = self.commit(generation, |inner| {
                inner.status = ResolveStatus::Ready;
                inner.error.clear();
                inner.data.ramadan.resolve_error.clear();
            });
            if let Some(changed) = committed {
                self.persist_if(changed).await;
            }
            return;
        }

        let resolved = match mode {
            SourceMode::Location => {
                self.api
                    .resolve_location_window(
                        today,
                        &settings.location_city,
                        &settings.location_country,
                        Some(target_year),
                    )
                    .await
            }
            _ => self.api.resolve_global_window(today, Some(target_year)).await,
        };

        match resolved {
            Ok(resolved) => {
                let window = RamadanWindow {
                    start: resolved.start,
                    end: resolved.end,
                    season_year: resolved.season_year,
                };
                tracing::info!(
                    start = %format_local_date(window.start),
                    end = %format_local_date(window.end),
                    source = resolved.source.as_str(),
                    "resolved Ramadan window"
                );
                let committed = self.commit(generation, |inner| {
                    inner.window = window;
                    inner.status = ResolveStatus::Ready;
                    inner.error.clear();
                    apply_record(
                        &mut inner.data.ramadan,
                        &window,
                        resolved.source,
                        Some(resolved.hijri_year),
                        &resolved.cache_key,
                    );
                });
                if let Some(changed) = committed {
                    self.persist_if(changed).await;
                }
            }
            Err(e) => self.fail(generation, e).await,
        }
    }

    /// Resolution failed: surface the message and persist it so the error
    /// survives a reload until the user retries.
    async fn fail(&self, generation: u64, error: ResolverError) {
        let message = error.to_string();
        tracing::warn!(error = %message, "Ramadan window resolution failed");
        let committed = self.commit(generation, |inner| {
            inner.status = ResolveStatus::NeedsManual;
            inner.error = message.clone();
            inner.data.ramadan.resolve_error = message.clone();
        });
        if let Some(changed) = committed {
            self.persist_if(changed).await;
        }
    }

    /// Apply a state change only if `generation` is still the latest
    /// trigger. Returns `None` when the attempt was superseded, otherwise
    /// whether the persisted section changed.
    fn commit(&self, generation: u64, apply: impl FnOnce(&mut Inner)) -> Option<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.generation != generation {
            tracing::debug!(generation, "discarding superseded resolution attempt");
            return None;
        }
        let before = inner.data.ramadan.clone();
        apply(&mut inner);
        Some(before != inner.data.ramadan)
    }

    /// Write the full document in a single call. Failures are logged and
    /// swallowed; the session continues on in-memory state.
    async fn persist_if(&self, changed: bool) {
        if !changed {
            return;
        }
        let payload = self.inner.lock().unwrap().data.to_json();
        match payload {
            Ok(json) => {
                if let Err(e) = self.store.set(&self.storage_key, &json).await {
                    tracing::warn!(error = %e, "storage write failed; continuing with in-memory state");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not serialize application data"),
        }
    }

    fn fresh_document(&self) -> AppData {
        let mut data = AppData::default();
        data.ramadan.location_city = self.default_city.clone();
        data.ramadan.location_country = self.default_country.clone();
        data
    }
}

fn apply_record(
    settings: &mut RamadanSettings,
    window: &RamadanWindow,
    source: ResolvedSource,
    hijri_year: Option<i32>,
    cache_key: &str,
) {
    settings.resolved_start = format_local_date(window.start);
    settings.resolved_end = format_local_date(window.end);
    settings.resolved_season_year = window.season_year;
    settings.resolved_source = source;
    settings.resolved_hijri_year = hijri_year;
    settings.resolved_cache_key = cache_key.to_string();
    settings.resolve_error.clear();
}
