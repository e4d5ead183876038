//! Per-partition TTL cache storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use casefeed_core::{CasefeedResult, PartitionKey, Record, StorageError};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    records: Vec<Record>,
    inserted_at: Instant,
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Map from partition key to its most recent read result.
///
/// Entries older than `ttl` are treated as absent and dropped on access.
/// When `max_entries` is reached the oldest entry is evicted.
#[derive(Debug)]
pub struct PartitionCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<PartitionKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl PartitionCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached records for `key` and their age, if the entry is still live.
    pub fn get(&self, key: &PartitionKey) -> CasefeedResult<Option<(Vec<Record>, Duration)>> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;

        let live = match entries.get(key) {
            Some(entry) => {
                let age = entry.inserted_at.elapsed();
                if age <= self.ttl {
                    Some((entry.records.clone(), age))
                } else {
                    entries.remove(key);
                    None
                }
            }
            None => None,
        };

        match live {
            Some(hit) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(hit))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Store `records` as the entry for `key`, replacing any previous one.
    pub fn insert(&self, key: PartitionKey, records: Vec<Record>) -> CasefeedResult<()> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;

        let ttl = self.ttl;
        entries.retain(|_, entry| entry.inserted_at.elapsed() <= ttl);

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            if let Some(victim) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                records,
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn invalidate(&self, key: &PartitionKey) -> CasefeedResult<bool> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }

    pub fn clear(&self) -> CasefeedResult<()> {
        self.entries
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }

    pub fn stats(&self) -> CasefeedResult<CacheStats> {
        let entry_count = self
            .entries
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .len() as u64;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn key(raw: &str) -> PartitionKey {
        PartitionKey::new(raw).unwrap()
    }

    fn records(partition: &str) -> Vec<Record> {
        vec![Record::new(
            key(partition),
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            1000.0,
            50.0,
            5.0,
        )]
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = PartitionCache::new(Duration::from_secs(10), 8);
        cache.insert(key("ri"), records("ri")).unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        let (cached, age) = cache.get(&key("ri")).unwrap().expect("entry should be live");
        assert_eq!(cached, records("ri"));
        assert_eq!(age, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get(&key("ri")).unwrap().is_none());
        assert_eq!(cache.stats().unwrap().entry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_are_per_partition() {
        let cache = PartitionCache::new(Duration::from_secs(10), 8);
        cache.insert(key("ri"), records("ri")).unwrap();

        assert!(cache.get(&key("ny")).unwrap().is_none());
        let (cached, _) = cache.get(&key("ri")).unwrap().unwrap();
        assert_eq!(cached[0].partition_key, key("ri"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_result_is_cached() {
        let cache = PartitionCache::new(Duration::from_secs(10), 8);
        cache.insert(key("gu"), Vec::new()).unwrap();
        let (cached, _) = cache.get(&key("gu")).unwrap().expect("empty entry is still an entry");
        assert!(cached.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oldest_entry_evicted_when_full() {
        let cache = PartitionCache::new(Duration::from_secs(60), 2);
        cache.insert(key("ri"), records("ri")).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(key("ny"), records("ny")).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(key("ca"), records("ca")).unwrap();

        assert!(cache.get(&key("ri")).unwrap().is_none());
        assert!(cache.get(&key("ny")).unwrap().is_some());
        assert!(cache.get(&key("ca")).unwrap().is_some());
        assert_eq!(cache.stats().unwrap().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_and_clear() {
        let cache = PartitionCache::new(Duration::from_secs(60), 8);
        cache.insert(key("ri"), records("ri")).unwrap();
        cache.insert(key("ny"), records("ny")).unwrap();

        assert!(cache.invalidate(&key("ri")).unwrap());
        assert!(!cache.invalidate(&key("ri")).unwrap());
        assert!(cache.get(&key("ri")).unwrap().is_none());

        cache.clear().unwrap();
        assert!(cache.get(&key("ny")).unwrap().is_none());
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }
}
