//! LMDB-backed record store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep every partition in
//! one named database. Keys are [`RecordKey`]s, so a partition is a
//! contiguous, time-ordered key range and `read_all` is a prefix scan.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `read_all` and `partitions`
//! - One write transaction per `upsert` call

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use casefeed_core::{CasefeedResult, PartitionKey, Record, StorageError, UpsertStats};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::record_key::RecordKey;
use crate::{log_upsert, RecordStore};

const RECORDS_DB: &str = "records";

fn txn_error(e: heed::Error) -> StorageError {
    StorageError::TransactionFailed {
        reason: e.to_string(),
    }
}

/// Record store persisted in an LMDB environment.
///
/// # Example
///
/// ```ignore
/// let store = LmdbRecordStore::open("data/casefeed", 1024)?;
/// let stats = store.upsert(&records).await?;
/// store.close()?;
/// ```
pub struct LmdbRecordStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    path: PathBuf,
}

impl LmdbRecordStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - The records database cannot be created
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path).map_err(|e| StorageError::EnvOpen {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        // SAFETY: the environment is opened once per path by this process and
        // the memory map is never modified outside of LMDB transactions.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(&path)
        }
        .map_err(|e| StorageError::EnvOpen {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(RECORDS_DB))
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        tracing::info!(path = %path.display(), map_size_mb, "Opened LMDB record store");

        Ok(Self { env, db, path })
    }

    /// Flush to disk and release the environment.
    pub fn close(self) -> Result<(), StorageError> {
        self.env.force_sync().map_err(txn_error)?;
        tracing::info!(path = %self.path.display(), "Closed LMDB record store");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordStore for LmdbRecordStore {
    async fn upsert(&self, records: &[Record]) -> CasefeedResult<UpsertStats> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut stats = UpsertStats::default();

        for record in records {
            let key = RecordKey::new(record.partition_key.clone(), record.timestamp).encode();
            let value = serde_json::to_vec(record).map_err(|e| StorageError::Serialization {
                reason: e.to_string(),
            })?;

            let exists = self.db.get(&wtxn, &key).map_err(txn_error)?.is_some();
            self.db.put(&mut wtxn, &key, &value).map_err(txn_error)?;

            if exists {
                stats.matched += 1;
            } else {
                stats.inserted += 1;
            }
        }

        wtxn.commit().map_err(txn_error)?;
        log_upsert(&stats);
        Ok(stats)
    }

    async fn read_all(&self, partition_key: &PartitionKey) -> CasefeedResult<Vec<Record>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let prefix = RecordKey::partition_prefix(partition_key);

        let mut records = Vec::new();
        for entry in self
            .db
            .prefix_iter(&rtxn, prefix.as_slice())
            .map_err(txn_error)?
        {
            let (_, value) = entry.map_err(txn_error)?;
            let record: Record =
                serde_json::from_slice(value).map_err(|e| StorageError::Serialization {
                    reason: e.to_string(),
                })?;
            records.push(record);
        }

        tracing::debug!(partition = %partition_key, count = records.len(), "Records read from store");
        Ok(records)
    }

    async fn partitions(&self) -> CasefeedResult<Vec<PartitionKey>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;

        let mut keys: Vec<PartitionKey> = Vec::new();
        for entry in self.db.iter(&rtxn).map_err(txn_error)? {
            let (raw_key, _) = entry.map_err(txn_error)?;
            let Some(decoded) = RecordKey::decode(raw_key) else {
                tracing::warn!(len = raw_key.len(), "Skipping undecodable record key");
                continue;
            };
            // Keys are sorted, so a partition's entries are adjacent.
            if keys.last() != Some(decoded.partition_key()) {
                keys.push(decoded.partition_key().clone());
            }
        }
        // The separator sorts above every UTF-8 byte, so `nyc` scans before
        // `ny`. Report partitions in key order.
        keys.sort();
        Ok(keys)
    }
}

impl std::fmt::Debug for LmdbRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbRecordStore")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casefeed_core::Timestamp;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbRecordStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbRecordStore::open(temp_dir.path(), 10).expect("store should open");
        (store, temp_dir)
    }

    fn key(raw: &str) -> PartitionKey {
        PartitionKey::new(raw).unwrap()
    }

    fn day(offset: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap() + Duration::days(offset)
    }

    fn record(partition: &str, offset: i64, total: f64) -> Record {
        Record::new(key(partition), day(offset), total, 50.0, 5.0)
    }

    #[tokio::test]
    async fn test_upsert_twice_is_idempotent() {
        let (store, _temp_dir) = create_test_store();
        let batch = vec![record("ri", 0, 1000.0), record("ri", 1, 1050.0)];

        let first = store.upsert(&batch).await.expect("upsert should succeed");
        assert_eq!(first, UpsertStats { matched: 0, inserted: 2 });

        let second = store.upsert(&batch).await.expect("upsert should succeed");
        assert_eq!(second, UpsertStats { matched: 2, inserted: 0 });

        let stored = store.read_all(&key("ri")).await.expect("read should succeed");
        assert_eq!(stored, batch);
    }

    #[tokio::test]
    async fn test_read_all_is_time_ordered() {
        let (store, _temp_dir) = create_test_store();
        store
            .upsert(&[record("ri", 5, 3.0), record("ri", 0, 1.0), record("ri", 2, 2.0)])
            .await
            .expect("upsert should succeed");

        let stored = store.read_all(&key("ri")).await.expect("read should succeed");
        let totals: Vec<f64> = stored.iter().map(|r| r.total_cases).collect();
        assert_eq!(totals, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_partition_isolation() {
        let (store, _temp_dir) = create_test_store();
        store
            .upsert(&[record("ny", 0, 1.0), record("nyc", 0, 2.0), record("ny", 1, 3.0)])
            .await
            .expect("upsert should succeed");

        assert_eq!(store.read_all(&key("ny")).await.unwrap().len(), 2);
        assert_eq!(store.read_all(&key("nyc")).await.unwrap().len(), 1);
        assert!(store.read_all(&key("n")).await.unwrap().is_empty());
        assert_eq!(
            store.partitions().await.unwrap(),
            vec![key("ny"), key("nyc")]
        );
    }

    #[tokio::test]
    async fn test_sub_millisecond_timestamps_are_distinct_records() {
        let (store, _temp_dir) = create_test_store();
        let first = Record::new(key("ri"), day(0) + Duration::microseconds(100), 1.0, 0.0, 0.0);
        let second = Record::new(key("ri"), day(0) + Duration::microseconds(200), 2.0, 0.0, 0.0);

        let stats = store.upsert(&[first.clone(), second.clone()]).await.unwrap();
        assert_eq!(stats, UpsertStats { matched: 0, inserted: 2 });
        assert_eq!(store.read_all(&key("ri")).await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_longest_partition_key_fits() {
        let (store, _temp_dir) = create_test_store();
        let longest = "a".repeat(PartitionKey::MAX_LEN);
        let stats = store.upsert(&[record(&longest, 0, 1.0)]).await.unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(store.partitions().await.unwrap(), vec![key(&longest)]);
    }

    #[tokio::test]
    async fn test_unknown_partition_reads_empty() {
        let (store, _temp_dir) = create_test_store();
        assert!(store.read_all(&key("ri")).await.unwrap().is_empty());
        assert!(store.partitions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let store = LmdbRecordStore::open(temp_dir.path(), 10).expect("store should open");
            store
                .upsert(&[record("ri", 0, 1000.0)])
                .await
                .expect("upsert should succeed");
            store.close().expect("close should succeed");
        }

        let reopened = LmdbRecordStore::open(temp_dir.path(), 10).expect("store should reopen");
        let stored = reopened.read_all(&key("ri")).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].total_cases, 1000.0);

        let stats = reopened.upsert(&[record("ri", 0, 1001.0)]).await.unwrap();
        assert_eq!(stats.matched, 1);
    }
}
