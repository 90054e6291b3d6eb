//! Integration tests for the window resolution state machine.
//!
//! These tests drive the service against a fake store, a mock AlAdhan
//! server and a pinned clock, covering the loading/ready/needs-manual
//! lifecycle, cache behavior and stale-attempt discarding.

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use ramadan_goals::{
    api::AlAdhanClient,
    config::{AlAdhanConfig, AppConfig, LocationConfig, NetworkConfig, StorageConfig},
    resolver::{LOCATION_PROMPT, RamadanWindowService, ResolveStatus},
    store::{AppData, MemoryStore, RamadanSettings},
    traits::{Clock, MockClock},
    window::{ResolvedSource, SourceMode, ValidationError},
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

const STORAGE_KEY: &str = "ramadan-goals-v1";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn test_config(base_url: &str) -> AppConfig {
    AppConfig {
        aladhan: AlAdhanConfig {
            base_url: base_url.to_string(),
        },
        network: NetworkConfig {
            request_timeout_secs: 10,
            connect_timeout_secs: 5,
        },
        storage: StorageConfig {
            path: None,
            key: STORAGE_KEY.to_string(),
        },
        location: LocationConfig::default(),
    }
}

/// Service pinned to 2026-02-10, talking to the mock server.
fn service(server: &MockServer, store: MemoryStore) -> RamadanWindowService<MemoryStore> {
    let config = test_config(&server.uri());
    let api = AlAdhanClient::new(server.uri(), &config.network).unwrap();
    let clock: Arc<dyn Clock> = Arc::new(MockClock::new(
        Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap(),
    ));
    RamadanWindowService::new(api, store, clock, &config)
}

fn seeded_store(mutate: impl FnOnce(&mut RamadanSettings)) -> MemoryStore {
    let store = MemoryStore::new();
    let mut data = AppData::default();
    mutate(&mut data.ramadan);
    store.seed(STORAGE_KEY, &data.to_json().unwrap());
    store
}

fn hijri_conversion_body(month: u32, year: i32) -> serde_json::Value {
    json!({
        "code": 200,
        "status": "OK",
        "data": {
            "hijri": { "month": { "number": month }, "year": year.to_string() },
            "gregorian": { "date": "10-02-2026" }
        }
    })
}

fn gregorian_conversion_body(wire_date: &str) -> serde_json::Value {
    json!({
        "code": 200,
        "status": "OK",
        "data": { "gregorian": { "date": wire_date } }
    })
}

/// Mount today's `gToH` conversion: Sha'ban 1447.
async fn mount_today(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/gToH/10-02-2026"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hijri_conversion_body(8, 1447)))
        .mount(server)
        .await;
}

/// Mount the 1447 global window: 2026-02-27 .. 2026-03-28.
async fn mount_global_window(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/hToG/01-09-1447"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gregorian_conversion_body("27-02-2026")),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hToG/01-10-1447"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gregorian_conversion_body("29-03-2026")),
        )
        .mount(server)
        .await;
}

// ==================== First Run / Fallback ====================

/// Before any resolution has ever completed the hardcoded fallback window
/// is shown, in the loading state.
#[tokio::test]
async fn test_fallback_window_before_first_resolution() {
    let mock_server = MockServer::start().await;
    let service = service(&mock_server, MemoryStore::new());

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::Loading);
    assert_eq!(snapshot.window.start, date(2026, 2, 27));
    assert_eq!(snapshot.window.end, date(2026, 3, 28));
    assert_eq!(snapshot.window.season_year, 2026);
}

// ==================== Global Mode ====================

/// Happy path: resolve globally, transition to ready, persist the record.
#[tokio::test]
async fn test_global_resolution_persists_record() {
    let mock_server = MockServer::start().await;
    mount_today(&mock_server).await;
    mount_global_window(&mock_server).await;

    let store = MemoryStore::new();
    let service = service(&mock_server, store.clone());
    service.load().await;

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::Ready);
    assert_eq!(snapshot.source_mode, SourceMode::Global);
    assert_eq!(snapshot.window.start, date(2026, 2, 27));
    assert_eq!(snapshot.window.end, date(2026, 3, 28));
    assert!(snapshot.error.is_empty());

    let settings = service.settings();
    assert_eq!(settings.resolved_source, ResolvedSource::ApiGlobal);
    assert_eq!(settings.resolved_hijri_year, Some(1447));
    assert_eq!(settings.resolved_cache_key, "global|1447|global");
    assert_eq!(settings.resolved_season_year, 2026);

    // The full document landed in the store in one write.
    let persisted = store.value(STORAGE_KEY).expect("record should be persisted");
    assert!(persisted.contains("\"resolvedCacheKey\":\"global|1447|global\""));
}

/// A matching cache key with an independently valid stored window skips
/// the window fetch entirely.
#[tokio::test]
async fn test_cache_hit_skips_window_fetch() {
    let mock_server = MockServer::start().await;
    mount_today(&mock_server).await;

    // The boundary conversions must not be called on a cache hit.
    Mock::given(method("GET"))
        .and(path("/hToG/01-09-1447"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let store = seeded_store(|ramadan| {
        ramadan.resolved_start = "2026-02-27".to_string();
        ramadan.resolved_end = "2026-03-28".to_string();
        ramadan.resolved_season_year = 2026;
        ramadan.resolved_source = ResolvedSource::ApiGlobal;
        ramadan.resolved_hijri_year = Some(1447);
        ramadan.resolved_cache_key = "global|1447|global".to_string();
    });

    let service = service(&mock_server, store);
    service.load().await;

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::Ready);
    assert_eq!(snapshot.window.start, date(2026, 2, 27));
}

/// A record from an older Hijri year no longer matches the expected cache
/// key and forces a fresh fetch.
#[tokio::test]
async fn test_cache_miss_on_hijri_year_change() {
    let mock_server = MockServer::start().await;
    mount_today(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/hToG/01-09-1447"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gregorian_conversion_body("27-02-2026")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hToG/01-10-1447"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gregorian_conversion_body("29-03-2026")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    // Last season's record: valid window, stale key.
    let store = seeded_store(|ramadan| {
        ramadan.resolved_start = "2025-03-01".to_string();
        ramadan.resolved_end = "2025-03-30".to_string();
        ramadan.resolved_season_year = 2025;
        ramadan.resolved_cache_key = "global|1446|global".to_string();
    });

    let service = service(&mock_server, store);
    service.load().await;

    let settings = service.settings();
    assert_eq!(settings.resolved_cache_key, "global|1447|global");
    assert_eq!(service.snapshot().window.start, date(2026, 2, 27));
}

/// Switching modes bypasses the cache even when the key still matches.
#[tokio::test]
async fn test_mode_switch_forces_refetch() {
    let mock_server = MockServer::start().await;
    mount_today(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/hToG/01-09-1447"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gregorian_conversion_body("27-02-2026")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hToG/01-10-1447"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gregorian_conversion_body("29-03-2026")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = seeded_store(|ramadan| {
        ramadan.resolved_start = "2026-02-27".to_string();
        ramadan.resolved_end = "2026-03-28".to_string();
        ramadan.resolved_season_year = 2026;
        ramadan.resolved_cache_key = "global|1447|global".to_string();
    });

    let service = service(&mock_server, store);
    service.load().await;
    assert_eq!(service.snapshot().status, ResolveStatus::Ready);

    // Same mode, same key — but an explicit mode switch re-resolves anyway.
    service.set_source_mode(SourceMode::Global).await;
    assert_eq!(service.snapshot().status, ResolveStatus::Ready);
}

// ==================== Failure Handling ====================

/// Resolution failure surfaces the message verbatim, persists it, and
/// keeps showing the last known window instead of clearing it.
#[tokio::test]
async fn test_failure_keeps_last_known_window() {
    let mock_server = MockServer::start().await;
    mount_today(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/hToG/01-09-1447"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hToG/01-10-1447"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let store = seeded_store(|ramadan| {
        ramadan.resolved_start = "2025-03-01".to_string();
        ramadan.resolved_end = "2025-03-30".to_string();
        ramadan.resolved_season_year = 2025;
        ramadan.resolved_cache_key = "global|1446|global".to_string();
    });

    let service = service(&mock_server, store.clone());
    service.load().await;

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::NeedsManual);
    assert_eq!(snapshot.error, "AlAdhan request failed (500).");

    // Last season's window is still displayed as the last known value.
    assert_eq!(snapshot.window.start, date(2025, 3, 1));
    assert_eq!(snapshot.window.end, date(2025, 3, 30));

    // The failure is persisted so it survives a reload.
    let persisted = store.value(STORAGE_KEY).unwrap();
    assert!(persisted.contains("AlAdhan request failed (500)."));
}

/// An explicit retry re-runs the network path after a failure.
#[tokio::test]
async fn test_retry_after_failure_recovers() {
    let mock_server = MockServer::start().await;

    // First conversion attempt fails, subsequent ones succeed.
    Mock::given(method("GET"))
        .and(path("/gToH/10-02-2026"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_today(&mock_server).await;
    mount_global_window(&mock_server).await;

    let service = service(&mock_server, MemoryStore::new());
    service.load().await;
    assert_eq!(service.snapshot().status, ResolveStatus::NeedsManual);

    service.retry_resolve().await;

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::Ready);
    assert!(snapshot.error.is_empty());
    assert_eq!(snapshot.window.start, date(2026, 2, 27));
}

// ==================== Location Mode ====================

/// Blank location fields hold a prompt in the ready state — this is a
/// configuration gap, not a resolution failure — and never hit the network.
#[tokio::test]
async fn test_blank_location_holds_prompt_without_network() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let store = seeded_store(|ramadan| {
        ramadan.source_mode = SourceMode::Location;
        ramadan.location_city = "Cairo".to_string();
        ramadan.location_country = String::new();
    });

    let service = service(&mock_server, store.clone());
    service.load().await;

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::Ready);
    assert_eq!(snapshot.error, LOCATION_PROMPT);

    let persisted = store.value(STORAGE_KEY).unwrap();
    assert!(persisted.contains(LOCATION_PROMPT));
}

/// Full location resolution: the tagged calendar days win over the anchor.
#[tokio::test]
async fn test_location_resolution_uses_tagged_days() {
    let mock_server = MockServer::start().await;
    mount_today(&mock_server).await;
    mount_global_window(&mock_server).await;

    // Cairo starts a day earlier: 2026-02-26 .. 2026-03-26 (29 days).
    for (month, days) in [(1, vec![]), (2, (26..=28).collect::<Vec<u32>>()), (3, (1..=26).collect())] {
        let rows: Vec<serde_json::Value> = days
            .into_iter()
            .map(|d| {
                json!({
                    "gregorian": { "date": format!("{d:02}-{month:02}-2026") },
                    "hijri": { "month": { "number": 9 }, "year": "1447" }
                })
            })
            .collect();
        Mock::given(method("GET"))
            .and(path(format!("/calendarByCity/2026/{month}")))
            .and(query_param("city", "Cairo"))
            .and(query_param("country", "Egypt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "code": 200, "status": "OK", "data": rows })),
            )
            .mount(&mock_server)
            .await;
    }

    let store = seeded_store(|ramadan| {
        ramadan.source_mode = SourceMode::Location;
        ramadan.location_city = "Cairo".to_string();
        ramadan.location_country = "Egypt".to_string();
    });

    let service = service(&mock_server, store);
    service.load().await;

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::Ready);
    assert_eq!(snapshot.window.start, date(2026, 2, 26));
    assert_eq!(snapshot.window.end, date(2026, 3, 26));

    let settings = service.settings();
    assert_eq!(settings.resolved_source, ResolvedSource::ApiLocation);
    assert_eq!(settings.resolved_cache_key, "location|1447|cairo|egypt");
}

/// Editing the location re-resolves only while location mode is active.
#[tokio::test]
async fn test_location_edit_ignored_in_global_mode() {
    let mock_server = MockServer::start().await;

    // Exactly one resolution (from load); the location edit adds none.
    Mock::given(method("GET"))
        .and(path("/gToH/10-02-2026"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hijri_conversion_body(8, 1447)))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_global_window(&mock_server).await;

    let service = service(&mock_server, MemoryStore::new());
    service.load().await;
    assert_eq!(service.snapshot().status, ResolveStatus::Ready);

    service.update_location("Cairo", "Egypt").await;

    let settings = service.settings();
    assert_eq!(settings.location_city, "Cairo");
    assert_eq!(settings.location_country, "Egypt");
    assert_eq!(settings.resolved_source, ResolvedSource::ApiGlobal);
}

// ==================== Manual Mode ====================

/// Saving a valid 30-day manual window returns inline success, transitions
/// to ready and persists a manual record.
#[tokio::test]
async fn test_manual_save_success() {
    let mock_server = MockServer::start().await;
    let store = MemoryStore::new();
    let service = service(&mock_server, store.clone());
    service.load().await;

    let window = service
        .save_manual_window("2026-02-27", "2026-03-28")
        .await
        .expect("30-day window should validate");

    assert_eq!(window.season_year, 2026);

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::Ready);
    assert_eq!(snapshot.source_mode, SourceMode::Manual);
    assert_eq!(snapshot.window.start, date(2026, 2, 27));

    let settings = service.settings();
    assert_eq!(settings.resolved_source, ResolvedSource::Manual);
    assert_eq!(settings.resolved_cache_key, "manual|manual|global");
    assert_eq!(settings.manual_start, "2026-02-27");
    assert_eq!(settings.resolved_hijri_year, None);

    let persisted = store.value(STORAGE_KEY).unwrap();
    assert!(persisted.contains("\"resolvedSource\":\"manual\""));
}

/// A 15-day manual window fails inline with the day-count message and
/// leaves the state in needs-manual.
#[tokio::test]
async fn test_manual_save_rejects_short_range() {
    let mock_server = MockServer::start().await;
    let service = service(&mock_server, MemoryStore::new());

    let result = service.save_manual_window("2026-03-01", "2026-03-15").await;

    assert_eq!(result, Err(ValidationError::WrongLength));

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::NeedsManual);
    assert_eq!(snapshot.error, "Ramadan date range must be 29 or 30 days.");
}

/// Manual mode resolves purely from the stored fields — no network at all.
#[tokio::test]
async fn test_manual_mode_on_load_skips_network() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let store = seeded_store(|ramadan| {
        ramadan.source_mode = SourceMode::Manual;
        ramadan.manual_start = "2026-02-27".to_string();
        ramadan.manual_end = "2026-03-27".to_string();
    });

    let service = service(&mock_server, store);
    service.load().await;

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::Ready);
    assert_eq!(snapshot.window.start, date(2026, 2, 27));
    assert_eq!(snapshot.window.end, date(2026, 3, 27));
    assert_eq!(service.settings().resolved_source, ResolvedSource::Manual);
}

/// Manual mode with unusable stored fields needs manual input again.
#[tokio::test]
async fn test_manual_mode_with_bad_fields_needs_manual() {
    let mock_server = MockServer::start().await;

    let store = seeded_store(|ramadan| {
        ramadan.source_mode = SourceMode::Manual;
        ramadan.manual_start = "2026-03-01".to_string();
        ramadan.manual_end = "2026-03-15".to_string();
    });

    let service = service(&mock_server, store);
    service.load().await;

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::NeedsManual);
    assert_eq!(snapshot.error, "Ramadan date range must be 29 or 30 days.");
}

// ==================== Concurrency ====================

/// Two resolutions racing: only the newest trigger's outcome is committed;
/// the superseded attempt completes as a no-op.
#[tokio::test]
async fn test_stale_resolution_is_discarded() {
    let mock_server = MockServer::start().await;

    // The first attempt's conversion is slow; the retry's is instant.
    Mock::given(method("GET"))
        .and(path("/gToH/10-02-2026"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(hijri_conversion_body(8, 1447))
                .set_delay(std::time::Duration::from_millis(800)),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_today(&mock_server).await;

    // The retry consumes these first (27-02 .. 28-03)...
    Mock::given(method("GET"))
        .and(path("/hToG/01-09-1447"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gregorian_conversion_body("27-02-2026")),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hToG/01-10-1447"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gregorian_conversion_body("29-03-2026")),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    // ...while the slow first attempt later sees a different window
    // (26-02 .. 27-03) that must be thrown away.
    Mock::given(method("GET"))
        .and(path("/hToG/01-09-1447"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gregorian_conversion_body("26-02-2026")),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hToG/01-10-1447"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gregorian_conversion_body("28-03-2026")),
        )
        .mount(&mock_server)
        .await;

    let store = MemoryStore::new();
    let service = Arc::new(service(&mock_server, store.clone()));

    let first = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.resolve().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    service.retry_resolve().await;
    first.await.unwrap();

    // Only the second attempt's window survives, in memory and on disk.
    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::Ready);
    assert_eq!(snapshot.window.start, date(2026, 2, 27));
    assert_eq!(snapshot.window.end, date(2026, 3, 28));

    let persisted = store.value(STORAGE_KEY).unwrap();
    assert!(persisted.contains("\"resolvedStart\":\"2026-02-27\""));
    assert!(!persisted.contains("2026-02-26"));
}

// ==================== Store Failures ====================

/// A failing store is logged and swallowed; the session continues on
/// in-memory state.
#[tokio::test]
async fn test_store_write_failure_is_not_fatal() {
    let mock_server = MockServer::start().await;
    mount_today(&mock_server).await;
    mount_global_window(&mock_server).await;

    let store = MemoryStore::new();
    store.fail_writes(true);

    let service = service(&mock_server, store.clone());
    service.load().await;

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::Ready);
    assert_eq!(snapshot.window.start, date(2026, 2, 27));

    // Nothing was persisted, but the in-memory record is complete.
    assert_eq!(store.value(STORAGE_KEY), None);
    assert_eq!(service.settings().resolved_cache_key, "global|1447|global");
}

/// A corrupted persisted document falls back to defaults and resolution
/// proceeds normally.
#[tokio::test]
async fn test_corrupt_document_starts_fresh() {
    let mock_server = MockServer::start().await;
    mount_today(&mock_server).await;
    mount_global_window(&mock_server).await;

    let store = MemoryStore::new();
    store.seed(STORAGE_KEY, "{{ not json");

    let service = service(&mock_server, store);
    service.load().await;

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, ResolveStatus::Ready);
    assert_eq!(snapshot.source_mode, SourceMode::Global);
    assert_eq!(snapshot.window.start, date(2026, 2, 27));
}
