use std::path::PathBuf;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub aladhan: AlAdhanConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub location: LocationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlAdhanConfig {
    pub base_url: String,
}

impl Default for AlAdhanConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.aladhan.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory for the persisted JSON document. When unset, the platform
    /// data directory is used (`<data_dir>/ramadan-goals`).
    pub path: Option<String>,
    /// Storage key the whole application document lives under.
    pub key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            key: "ramadan-goals-v1".to_string(),
        }
    }
}

/// Seed values for the location fields of a fresh document.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LocationConfig {
    pub default_city: String,
    pub default_country: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // Load .env file (silently ignore if not present)
        let _ = dotenvy::dotenv();

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ramadan-goals");

        let builder = Config::builder()
            // 1. Load default values
            // AlAdhan
            .set_default("aladhan.base_url", "https://api.aladhan.com/v1")?
            // Network
            .set_default("network.request_timeout_secs", 30)?
            .set_default("network.connect_timeout_secs", 10)?
            // Storage
            .set_default("storage.path", None::<String>)?
            .set_default("storage.key", "ramadan-goals-v1")?
            // Location seeds
            .set_default("location.default_city", "")?
            .set_default("location.default_country", "")?

            // 2. Load from local config file (optional, lowest priority)
            .add_source(File::from(PathBuf::from("config.toml")).required(false))

            // 3. Load from user config directory (optional, overrides local)
            .add_source(File::from(config_dir.join("config.toml")).required(false))

            // 4. Load from Environment variables (RAMADAN__ALADHAN__BASE_URL=...)
            .add_source(Environment::with_prefix("RAMADAN").separator("__"));

        let s = builder.build()?;
        Ok(s.try_deserialize()?)
    }
}
