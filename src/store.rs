//! Persisted key-value storage and the typed application document.
//!
//! The whole application state lives in one JSON document under a single
//! storage key. The resolver owns the `ramadan` section; any other sections
//! (goals, check-ins, social state) are preserved verbatim across rewrites.
//!
//! Raw text becomes typed data in exactly one place, [`AppData::from_json`].
//! After that boundary everything operates on the strongly-typed form.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::config::StorageConfig;
use crate::window::{FALLBACK_END, FALLBACK_SEASON_YEAR, FALLBACK_START, ResolvedSource, SourceMode};

/// Storage failures. Logged and swallowed by the resolver — the session
/// continues on in-memory state rather than crashing.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("storage payload was not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Async key-value document store.
#[allow(async_fn_in_trait)]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ==================== Typed document ====================

/// The persisted application document.
///
/// Unknown top-level sections are captured in `rest` so a rewrite carries
/// them through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppData {
    pub ramadan: RamadanSettings,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl AppData {
    /// The single parse boundary from raw persisted text to typed data.
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The `ramadan` section: user source configuration plus the cached
/// resolution record, flat and camelCase as the original document stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RamadanSettings {
    #[serde(deserialize_with = "lenient")]
    pub source_mode: SourceMode,
    pub location_city: String,
    pub location_country: String,
    pub manual_start: String,
    pub manual_end: String,
    pub resolved_start: String,
    pub resolved_end: String,
    pub resolved_season_year: i32,
    #[serde(deserialize_with = "lenient")]
    pub resolved_source: ResolvedSource,
    pub resolved_hijri_year: Option<i32>,
    pub resolved_cache_key: String,
    pub resolve_error: String,
    pub setup_complete: bool,
}

impl Default for RamadanSettings {
    fn default() -> Self {
        Self {
            source_mode: SourceMode::Global,
            location_city: String::new(),
            location_country: String::new(),
            manual_start: String::new(),
            manual_end: String::new(),
            resolved_start: FALLBACK_START.to_string(),
            resolved_end: FALLBACK_END.to_string(),
            resolved_season_year: FALLBACK_SEASON_YEAR,
            resolved_source: ResolvedSource::Fallback,
            resolved_hijri_year: None,
            resolved_cache_key: String::new(),
            resolve_error: String::new(),
            setup_complete: false,
        }
    }
}

/// Accept a field written by an older or foreign version of the app:
/// an unknown or wrong-typed enum value degrades to the enum's default
/// instead of failing the whole document.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

// ==================== File-backed store ====================

/// JSON document per key under a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolve the storage directory from config, defaulting to the
    /// platform data directory.
    pub fn from_config(config: &StorageConfig) -> Self {
        let dir = match &config.path {
            Some(path) => PathBuf::from(path),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ramadan-goals"),
        };
        Self::new(dir)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are app-controlled identifiers; normalize anything else away.
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(key), value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ==================== In-memory store ====================

/// In-memory store that records writes and can simulate write failures.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an entry, bypassing write accounting.
    pub fn seed(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    /// Make subsequent `set` calls fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Synchronous read of the stored value.
    pub fn value(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes are disabled".to_string()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}
