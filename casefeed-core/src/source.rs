//! Seams between the ingestion stages.
//!
//! The fetcher talks to the network through [`HttpSource`] and the loop turns
//! payloads into records through [`Normalizer`]. Production implementations
//! live in `casefeed-ingest`; scripted ones live in `casefeed-test-utils`.

use async_trait::async_trait;
use std::time::Duration;

use crate::{FetchError, ParseError, Record};

/// A single-shot HTTP GET returning the body as text.
///
/// Implementations perform exactly one request per call. Retrying is the
/// fetcher's job.
#[async_trait]
pub trait HttpSource: Send + Sync {
    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, FetchError>;
}

/// Turns a raw payload into typed records.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, raw_text: &str) -> Result<Vec<Record>, ParseError>;
}
