//! casefeed Test Utilities
//!
//! Shared test infrastructure for the casefeed workspace:
//! - Scripted and fault-injecting implementations of the pipeline seams
//! - Proptest generators for records and partitions
//! - Fixtures for the sample payload

pub use casefeed_core::{
    CasefeedResult, FetchError, HttpSource, Normalizer, ParseError, PartitionKey, Record,
    Timestamp, UpsertStats,
};
pub use casefeed_storage::{InMemoryRecordStore, RecordStore};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// SCRIPTED SEAMS
// ============================================================================

/// [`HttpSource`] that replays a fixed script of responses.
///
/// Each request pops the next scripted result. Once the script is empty the
/// fallback is returned; without a fallback the request fails with a
/// transport error.
#[derive(Debug, Default)]
pub struct ScriptedHttpSource {
    script: Mutex<VecDeque<Result<String, FetchError>>>,
    fallback: Option<Result<String, FetchError>>,
    requests: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedHttpSource {
    pub fn new(script: Vec<Result<String, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// A source that answers every request with `body`.
    pub fn always(body: impl Into<String>) -> Self {
        Self::default().with_fallback(Ok(body.into()))
    }

    /// A source whose every request fails.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, fallback: Result<String, FetchError>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Number of requests served so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// URLs requested, in order.
    pub fn requested_urls(&self) -> Vec<String> {
        self.urls.lock().map(|urls| urls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HttpSource for ScriptedHttpSource {
    async fn get_text(&self, url: &str, _timeout: Duration) -> Result<String, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut urls) = self.urls.lock() {
            urls.push(url.to_string());
        }

        let scripted = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        match scripted.or_else(|| self.fallback.clone()) {
            Some(result) => result,
            None => Err(transport_error(url)),
        }
    }
}

/// A transport failure for `url`, as a refused connection would produce.
pub fn transport_error(url: &str) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        reason: "connection refused".to_string(),
    }
}

/// [`Normalizer`] that fails its first `failures` calls, then delegates.
pub struct FlakyNormalizer<N> {
    inner: N,
    failures: usize,
    calls: AtomicUsize,
}

impl<N: Normalizer> FlakyNormalizer<N> {
    pub fn new(inner: N, failures: usize) -> Self {
        Self {
            inner,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<N: Normalizer> Normalizer for FlakyNormalizer<N> {
    fn normalize(&self, raw_text: &str) -> Result<Vec<Record>, ParseError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ParseError::Csv {
                reason: format!("injected failure {}", call + 1),
            });
        }
        self.inner.normalize(raw_text)
    }
}

/// [`RecordStore`] wrapper that counts calls to the wrapped store.
pub struct CountingStore {
    inner: Arc<dyn RecordStore>,
    reads: AtomicUsize,
    upserts: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            upserts: AtomicUsize::new(0),
        }
    }

    /// Wrap a fresh [`InMemoryRecordStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRecordStore::new()))
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for CountingStore {
    async fn upsert(&self, records: &[Record]) -> CasefeedResult<UpsertStats> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(records).await
    }

    async fn read_all(&self, partition_key: &PartitionKey) -> CasefeedResult<Vec<Record>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_all(partition_key).await
    }

    async fn partitions(&self) -> CasefeedResult<Vec<PartitionKey>> {
        self.inner.partitions().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating casefeed values.

    use super::*;
    use chrono::DateTime;
    use proptest::prelude::*;

    /// A two-letter region code in any case.
    pub fn arb_partition_key() -> impl Strategy<Value = PartitionKey> {
        "[A-Za-z]{2}".prop_filter_map("non-empty key", |raw| PartitionKey::new(&raw))
    }

    /// Midnight UTC, 2021-01-01.
    const BURST_START_SECS: i64 = 1_609_459_200;

    /// A timestamp between 2020 and 2030.
    ///
    /// Half the values are day-aligned. The other half fall in a 5ms burst
    /// with nanosecond precision, so batches regularly hold instants less
    /// than a millisecond apart.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        prop_oneof![
            (18_262i64..21_915i64).prop_filter_map("in range", |days| {
                DateTime::from_timestamp(days * 86_400, 0)
            }),
            (0u32..5_000_000).prop_filter_map("in range", |nanos| {
                DateTime::from_timestamp(BURST_START_SECS, nanos)
            }),
        ]
    }

    /// A non-negative whole count.
    pub fn arb_count() -> impl Strategy<Value = f64> {
        (0u32..50_000_000).prop_map(f64::from)
    }

    pub fn arb_record() -> impl Strategy<Value = Record> {
        (
            arb_partition_key(),
            arb_timestamp(),
            arb_count(),
            arb_count(),
            arb_count(),
        )
            .prop_map(|(key, timestamp, total, new, probable)| {
                Record::new(key, timestamp, total, new, probable)
            })
    }

    /// Records of one partition with pairwise distinct timestamps.
    pub fn arb_partition_batch(max_len: usize) -> impl Strategy<Value = Vec<Record>> {
        (
            arb_partition_key(),
            proptest::collection::btree_set(arb_timestamp(), 0..=max_len),
        )
            .prop_flat_map(|(key, timestamps)| {
                let len = timestamps.len();
                (
                    Just(key),
                    Just(timestamps),
                    proptest::collection::vec((arb_count(), arb_count(), arb_count()), len),
                )
            })
            .prop_map(|(key, timestamps, counts)| {
                timestamps
                    .into_iter()
                    .zip(counts)
                    .map(|(timestamp, (total, new, probable))| {
                        Record::new(key.clone(), timestamp, total, new, probable)
                    })
                    .collect()
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built payloads and records.

    use super::*;
    use chrono::{TimeZone, Utc};

    pub const SAMPLE_URL: &str = "https://example.org/rows.csv";

    /// One Rhode Island row.
    pub const SAMPLE_CSV: &str =
        "created_at,pnew_case,new_case,tot_cases,state\n2021-01-01,5,50,1000,RI\n";

    /// Several states and days in the CDC export layout, with extra columns.
    pub const MULTI_STATE_CSV: &str = "\
submission_date,state,tot_cases,conf_cases,prob_cases,new_case,pnew_case,tot_death,created_at
01/01/2021,RI,1000,950,50,50,5,20,01/01/2021 12:00:00 AM
01/02/2021,RI,1060,1005,55,60,5,21,01/02/2021 12:00:00 AM
01/01/2021,NY,5000,4800,200,300,,100,01/01/2021 12:00:00 AM
01/01/2021,NYC,7000,6500,500,400,40,150,01/01/2021 12:00:00 AM
";

    pub fn key(raw: &str) -> PartitionKey {
        PartitionKey::new(raw).unwrap_or_else(|| panic!("fixture key {raw:?} must not be blank"))
    }

    /// Midnight UTC on the given day of 2021.
    pub fn day(month: u32, day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2021, month, day, 0, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("invalid fixture date 2021-{month}-{day}"))
    }

    /// A record with fixed new and probable counts.
    pub fn record(partition: &str, timestamp: Timestamp, total_cases: f64) -> Record {
        Record::new(key(partition), timestamp, total_cases, 50.0, 5.0)
    }

    /// The record [`SAMPLE_CSV`] normalizes to.
    pub fn sample_record() -> Record {
        record("ri", day(1, 1), 1000.0)
    }
}
