//! casefeed Core - Record Types
//!
//! Data model shared by the ingestion and storage crates, plus the error
//! taxonomy, configuration, and the traits at the fetch/normalize seams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod error;
pub mod source;

pub use config::{CacheSettings, CasefeedConfig, IngestSettings, StorageBackend, StorageSettings};
pub use error::{
    CasefeedError, CasefeedResult, ConfigError, FetchError, InvalidPartitionKey, ParseError,
    StorageError,
};
pub use source::{HttpSource, Normalizer};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// PARTITION KEY
// ============================================================================

/// Case-normalized partition identifier (a state or region code such as `ri`).
///
/// The only constructor trims and lower-cases its input, so two spellings of
/// the same region always land in the same partition. Deserialization goes
/// through the same constructor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Longest accepted key in bytes, after normalization. Keeps every
    /// encoded record key well inside LMDB's key size limit.
    pub const MAX_LEN: usize = 64;

    /// Normalize `raw` into a partition key.
    ///
    /// Returns `None` for blank input or when the normalized key is longer
    /// than [`PartitionKey::MAX_LEN`] bytes.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let normalized = trimmed.to_lowercase();
        if normalized.len() > Self::MAX_LEN {
            return None;
        }
        Some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PartitionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PartitionKey {
    type Error = InvalidPartitionKey;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(&raw).ok_or(InvalidPartitionKey { raw })
    }
}

impl From<PartitionKey> for String {
    fn from(key: PartitionKey) -> Self {
        key.0
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// One observation for one partition at one timestamp.
///
/// `(partition_key, timestamp)` is the natural key: the store holds at most
/// one record per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub partition_key: PartitionKey,
    pub timestamp: Timestamp,
    pub total_cases: f64,
    pub new_cases: f64,
    pub probable_new_cases: f64,
}

impl Record {
    pub fn new(
        partition_key: PartitionKey,
        timestamp: Timestamp,
        total_cases: f64,
        new_cases: f64,
        probable_new_cases: f64,
    ) -> Self {
        Self {
            partition_key,
            timestamp,
            total_cases,
            new_cases,
            probable_new_cases,
        }
    }

    /// The dedup key used by upserts.
    pub fn natural_key(&self) -> (&PartitionKey, Timestamp) {
        (&self.partition_key, self.timestamp)
    }

    /// Share of the running total that is new in this observation.
    ///
    /// Returns `None` when `total_cases` is zero.
    pub fn new_case_ratio(&self) -> Option<f64> {
        if self.total_cases == 0.0 {
            None
        } else {
            Some(self.new_cases / self.total_cases)
        }
    }
}

/// Outcome counts of one upsert call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertStats {
    /// Records that replaced an existing natural key.
    pub matched: u64,
    /// Records written under a natural key that was not present.
    pub inserted: u64,
}

impl UpsertStats {
    /// Total rows applied.
    pub fn rows(&self) -> u64 {
        self.matched + self.inserted
    }
}

// ============================================================================
// TESTS
// ============================================================================
