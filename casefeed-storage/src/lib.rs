//! casefeed Storage - Record Store Trait and Backends
//!
//! Defines the partitioned persistence boundary used by the ingestion loop
//! (writer) and the read path (reader), an in-memory backend, an LMDB
//! backend, and the TTL cache that sits in front of reads.

pub mod cache;
pub mod lmdb_backend;
pub mod record_key;

pub use cache::{CacheRead, CacheStats, PartitionCache, RecordReader};
pub use lmdb_backend::LmdbRecordStore;
pub use record_key::RecordKey;

use async_trait::async_trait;
use casefeed_core::{CasefeedResult, PartitionKey, Record, StorageError, Timestamp, UpsertStats};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Partitioned record persistence.
///
/// Each partition holds records keyed by timestamp. Partitions are created
/// on first upsert and never removed.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Replace-or-insert each record by its natural key.
    ///
    /// Re-applying the same batch is a no-op on content and reports every
    /// row as matched. Within one batch a repeated natural key is applied in
    /// order, so the last row wins.
    async fn upsert(&self, records: &[Record]) -> CasefeedResult<UpsertStats>;

    /// All records of one partition. An unknown partition yields an empty
    /// vector. Callers sort by timestamp if they need order.
    async fn read_all(&self, partition_key: &PartitionKey) -> CasefeedResult<Vec<Record>>;

    /// Partitions that currently hold at least one record.
    async fn partitions(&self) -> CasefeedResult<Vec<PartitionKey>>;
}

fn log_upsert(stats: &UpsertStats) {
    tracing::info!(
        rows = stats.rows(),
        matched = stats.matched,
        inserted = stats.inserted,
        "Upserted records"
    );
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

type Partition = BTreeMap<Timestamp, Record>;

/// In-memory record store.
///
/// Used by tests and by the `memory` storage backend.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    partitions: RwLock<HashMap<PartitionKey, Partition>>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all partitions.
    pub fn record_count(&self) -> CasefeedResult<usize> {
        let partitions = self
            .partitions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(partitions.values().map(BTreeMap::len).sum())
    }

    fn apply(&self, records: &[Record]) -> CasefeedResult<UpsertStats> {
        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;

        let mut stats = UpsertStats::default();
        for record in records {
            let partition = partitions
                .entry(record.partition_key.clone())
                .or_default();
            match partition.insert(record.timestamp, record.clone()) {
                Some(_) => stats.matched += 1,
                None => stats.inserted += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn upsert(&self, records: &[Record]) -> CasefeedResult<UpsertStats> {
        let stats = self.apply(records)?;
        log_upsert(&stats);
        Ok(stats)
    }

    async fn read_all(&self, partition_key: &PartitionKey) -> CasefeedResult<Vec<Record>> {
        let partitions = self
            .partitions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let records: Vec<Record> = partitions
            .get(partition_key)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default();
        tracing::debug!(partition = %partition_key, count = records.len(), "Records read from store");
        Ok(records)
    }

    async fn partitions(&self) -> CasefeedResult<Vec<PartitionKey>> {
        let partitions = self
            .partitions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut keys: Vec<PartitionKey> = partitions
            .iter()
            .filter(|(_, p)| !p.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// TESTS
// ============================================================================
