//! Error types for casefeed operations

use std::path::PathBuf;
use thiserror::Error;

/// Transient failure of a single fetch attempt.
///
/// These are retried by the fetcher up to its attempt budget. They never
/// escape an ingestion cycle as errors: exhausting the budget degrades to a
/// "no data" outcome that carries the last one of these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to read response body from {url}: {reason}")]
    Body { url: String, reason: String },
}

/// Malformed or incomplete payload. Not retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Required column missing: {column}")]
    MissingColumn { column: String },

    #[error("Invalid number in column {column} at row {row}: {value:?}")]
    InvalidNumber {
        row: u64,
        column: String,
        value: String,
    },

    #[error("Invalid timestamp at row {row}: {value:?}")]
    InvalidTimestamp { row: u64, value: String },

    #[error("Empty partition key at row {row}")]
    EmptyPartitionKey { row: u64 },

    #[error("Partition key at row {row} is {len} bytes, limit is {max}")]
    PartitionKeyTooLong { row: u64, len: usize, max: usize },

    #[error("Malformed delimited data: {reason}")]
    Csv { reason: String },
}

/// A value that cannot be a partition key: blank, or too long once
/// normalized.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid partition key {raw:?}")]
pub struct InvalidPartitionKey {
    pub raw: String,
}

/// Persistence layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Failed to open storage environment at {path}: {reason}")]
    EnvOpen { path: PathBuf, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to initialize logging: {reason}")]
    Logging { reason: String },
}

/// Master error type for all casefeed errors.
#[derive(Debug, Clone, Error)]
pub enum CasefeedError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to listen for shutdown signal: {reason}")]
    Signal { reason: String },
}

/// Result type alias for casefeed operations.
pub type CasefeedResult<T> = Result<T, CasefeedError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display_status() {
        let err = FetchError::Status {
            url: "https://example.org/rows.csv".to_string(),
            status: 503,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("example.org"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_parse_error_display_invalid_number() {
        let err = ParseError::InvalidNumber {
            row: 7,
            column: "tot_cases".to_string(),
            value: "many".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("tot_cases"));
        assert!(msg.contains("row 7"));
        assert!(msg.contains("many"));
    }

    #[test]
    fn test_parse_error_display_key_too_long() {
        let err = ParseError::PartitionKeyTooLong {
            row: 3,
            len: 600,
            max: 64,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("row 3"));
        assert!(msg.contains("600"));
        assert!(msg.contains("64"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "ingest.max_attempts",
            value: "0".to_string(),
            reason: "must be >= 1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("ingest.max_attempts"));
        assert!(msg.contains("must be >= 1"));
    }

    #[test]
    fn test_casefeed_error_from_variants() {
        let storage = CasefeedError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, CasefeedError::Storage(_)));

        let parse = CasefeedError::from(ParseError::MissingColumn {
            column: "state".to_string(),
        });
        assert!(matches!(parse, CasefeedError::Parse(_)));

        let fetch = CasefeedError::from(FetchError::Transport {
            url: "http://localhost".to_string(),
            reason: "connection refused".to_string(),
        });
        assert!(matches!(fetch, CasefeedError::Fetch(_)));

        let config = CasefeedError::from(ConfigError::Parse {
            reason: "expected table".to_string(),
        });
        assert!(matches!(config, CasefeedError::Config(_)));
    }
}
