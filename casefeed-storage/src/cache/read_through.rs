//! Read-through access to partition records.

use std::sync::Arc;
use std::time::Duration;

use casefeed_core::{CasefeedResult, PartitionKey, Record};

use super::partition_cache::{CacheStats, PartitionCache};
use crate::RecordStore;

/// A value returned from the read path, with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    /// Age of the value when it was handed out. Zero for store reads.
    age: Duration,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    pub fn from_cache(value: T, age: Duration) -> Self {
        Self {
            value,
            age,
            was_cache_hit: true,
        }
    }

    pub fn from_storage(value: T) -> Self {
        Self {
            value,
            age: Duration::ZERO,
            was_cache_hit: false,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn age(&self) -> Duration {
        self.age
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            age: self.age,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Record reader with a per-partition TTL cache in front of the store.
///
/// The store is shared with the ingestion loop; the reader only ever
/// calls `read_all` on it.
#[derive(Clone)]
pub struct RecordReader {
    store: Arc<dyn RecordStore>,
    cache: Arc<PartitionCache>,
}

impl RecordReader {
    pub fn new(store: Arc<dyn RecordStore>, cache: PartitionCache) -> Self {
        Self {
            store,
            cache: Arc::new(cache),
        }
    }

    /// Read one partition.
    ///
    /// With `allow_cached` a live cache entry is returned as-is. Otherwise,
    /// or when the entry is missing or expired, the store is read and the
    /// result (possibly empty) replaces the entry.
    pub async fn read_through(
        &self,
        partition_key: &PartitionKey,
        allow_cached: bool,
    ) -> CasefeedResult<CacheRead<Vec<Record>>> {
        if allow_cached {
            if let Some((records, age)) = self.cache.get(partition_key)? {
                tracing::debug!(
                    partition = %partition_key,
                    count = records.len(),
                    age_ms = age.as_millis() as u64,
                    "Serving records from cache"
                );
                return Ok(CacheRead::from_cache(records, age));
            }
        }

        let records = self.store.read_all(partition_key).await?;
        tracing::info!(partition = %partition_key, count = records.len(), "Read records from store");

        self.cache.insert(partition_key.clone(), records.clone())?;
        Ok(CacheRead::from_storage(records))
    }

    /// Records of the partition named by `raw_key`, or `None` when the key
    /// is blank or too long, or the partition holds no records.
    pub async fn get_records(
        &self,
        raw_key: &str,
        allow_cached: bool,
    ) -> CasefeedResult<Option<Vec<Record>>> {
        let Some(partition_key) = PartitionKey::new(raw_key) else {
            return Ok(None);
        };
        let records = self
            .read_through(&partition_key, allow_cached)
            .await?
            .into_value();
        Ok(if records.is_empty() { None } else { Some(records) })
    }

    pub fn invalidate(&self, partition_key: &PartitionKey) -> CasefeedResult<bool> {
        self.cache.invalidate(partition_key)
    }

    pub fn clear(&self) -> CasefeedResult<()> {
        self.cache.clear()
    }

    pub fn cache_stats(&self) -> CasefeedResult<CacheStats> {
        self.cache.stats()
    }
}

impl std::fmt::Debug for RecordReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordReader")
            .field("ttl", &self.cache.ttl())
            .finish()
    }
}
