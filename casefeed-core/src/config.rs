//! Configuration loading for casefeed.
//!
//! Values come from an optional TOML file (`--config <path>` or
//! `CASEFEED_CONFIG`), then individual `CASEFEED_*` environment overrides.
//! Every field has a default so an empty file is a valid config.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ConfigError;

/// Upstream CSV export of the CDC state-level case counts.
pub const DEFAULT_DOWNLOAD_URL: &str =
    "https://data.cdc.gov/api/views/9mfq-cb36/rows.csv?accessType=DOWNLOAD";

/// Twice a day, the publish cadence of the upstream dataset.
pub const DEFAULT_PERIOD_SECS: u64 = 43_200;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_STORAGE_PATH: &str = "data/casefeed";

pub const DEFAULT_MAP_SIZE_MB: usize = 1024;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 10;

pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 128;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CasefeedConfig {
    pub ingest: IngestSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestSettings {
    pub download_url: String,
    pub period_secs: u64,
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            period_secs: DEFAULT_PERIOD_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Lmdb,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub path: PathBuf,
    pub map_size_mb: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Lmdb,
            path: PathBuf::from(DEFAULT_STORAGE_PATH),
            map_size_mb: DEFAULT_MAP_SIZE_MB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl IngestSettings {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl CasefeedConfig {
    /// Load from the configured file (if any), apply environment overrides,
    /// and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let mut config = match path {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Apply `CASEFEED_*` overrides using `lookup` to read variables.
    ///
    /// - `CASEFEED_DOWNLOAD_URL`
    /// - `CASEFEED_PERIOD_SECS`
    /// - `CASEFEED_MAX_ATTEMPTS`
    /// - `CASEFEED_REQUEST_TIMEOUT_SECS`
    /// - `CASEFEED_STORAGE_PATH`
    /// - `CASEFEED_CACHE_TTL_SECS`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CASEFEED_DOWNLOAD_URL") {
            self.ingest.download_url = url;
        }
        if let Some(value) = lookup("CASEFEED_PERIOD_SECS") {
            self.ingest.period_secs = parse_override("ingest.period_secs", &value)?;
        }
        if let Some(value) = lookup("CASEFEED_MAX_ATTEMPTS") {
            self.ingest.max_attempts = parse_override("ingest.max_attempts", &value)?;
        }
        if let Some(value) = lookup("CASEFEED_REQUEST_TIMEOUT_SECS") {
            self.ingest.request_timeout_secs =
                parse_override("ingest.request_timeout_secs", &value)?;
        }
        if let Some(path) = lookup("CASEFEED_STORAGE_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(value) = lookup("CASEFEED_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_override("cache.ttl_secs", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.ingest.download_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "ingest.download_url",
                value: self.ingest.download_url.clone(),
                reason: "must be an http(s) URL".to_string(),
            });
        }
        if self.ingest.period_secs == 0 {
            return Err(invalid("ingest.period_secs", 0, "must be > 0"));
        }
        if self.ingest.max_attempts == 0 {
            return Err(invalid("ingest.max_attempts", 0, "must be >= 1"));
        }
        if self.ingest.request_timeout_secs == 0 {
            return Err(invalid("ingest.request_timeout_secs", 0, "must be > 0"));
        }
        if self.storage.backend == StorageBackend::Lmdb {
            if self.storage.path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "storage.path",
                    value: String::new(),
                    reason: "must not be empty".to_string(),
                });
            }
            if self.storage.map_size_mb == 0 {
                return Err(invalid("storage.map_size_mb", 0, "must be > 0"));
            }
        }
        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries", 0, "must be > 0"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_override<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(field, value, "must be a non-negative integer"))
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("CASEFEED_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
