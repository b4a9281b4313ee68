//! Configuration management for the store.

use std::env;
use std::path::{Path, PathBuf};

/// Default record count above which the store moves to the embedded database.
pub const DEFAULT_UPGRADE_THRESHOLD: usize = 5000;

/// Store configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding the key-value file and the sync queue
    pub data_dir: PathBuf,
    /// SQLite URL of the upgrade target
    pub database_url: String,
    /// Total record count that triggers the adapter upgrade
    pub upgrade_threshold: usize,
    /// Back the key-value adapter with a file in `data_dir`
    pub persist_kv: bool,
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = PathBuf::from(lookup("FOLIO_DATA_DIR").unwrap_or_else(|| "./data".into()));

        let database_url = lookup("FOLIO_DATABASE_URL")
            .unwrap_or_else(|| default_database_url(&data_dir));

        let upgrade_threshold = match lookup("FOLIO_UPGRADE_THRESHOLD") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidThreshold(raw))?,
            None => DEFAULT_UPGRADE_THRESHOLD,
        };

        let persist_kv = match lookup("FOLIO_PERSIST_KV") {
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidBool {
                key: "FOLIO_PERSIST_KV",
                value: raw,
            })?,
            None => true,
        };

        Ok(Self {
            data_dir,
            database_url,
            upgrade_threshold,
            persist_kv,
        })
    }

    /// Configuration for a store rooted at `data_dir` with default settings.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            database_url: default_database_url(&data_dir),
            data_dir,
            upgrade_threshold: DEFAULT_UPGRADE_THRESHOLD,
            persist_kv: true,
        }
    }

    /// File backing the key-value adapter.
    pub fn kv_path(&self) -> PathBuf {
        self.data_dir.join("folio.kv.json")
    }
}

fn default_database_url(data_dir: &Path) -> String {
    format!("sqlite://{}", data_dir.join("folio.db").display())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid FOLIO_UPGRADE_THRESHOLD value: {0}")]
    InvalidThreshold(String),

    #[error("invalid boolean for {key}: {value}")]
    InvalidBool { key: &'static str, value: String },
}
