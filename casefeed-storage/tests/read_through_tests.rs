//! Read path behavior: TTL caching in front of a shared record store.

use std::sync::Arc;
use std::time::Duration;

use casefeed_storage::{PartitionCache, RecordReader, RecordStore};
use casefeed_test_utils::fixtures::{self, day, key};
use casefeed_test_utils::CountingStore;

fn setup(ttl_secs: u64) -> (Arc<CountingStore>, RecordReader) {
    let store = Arc::new(CountingStore::in_memory());
    let reader = RecordReader::new(
        store.clone(),
        PartitionCache::new(Duration::from_secs(ttl_secs), 16),
    );
    (store, reader)
}

#[tokio::test(start_paused = true)]
async fn test_cached_read_within_ttl_skips_store() {
    let (store, reader) = setup(10);
    store.upsert(&[fixtures::sample_record()]).await.unwrap();

    let first = reader.read_through(&key("ri"), true).await.unwrap();
    assert!(!first.was_cache_hit());
    assert_eq!(store.reads(), 1);

    tokio::time::advance(Duration::from_secs(5)).await;
    let second = reader.read_through(&key("ri"), true).await.unwrap();
    assert!(second.was_cache_hit());
    assert_eq!(second.age(), Duration::from_secs(5));
    assert_eq!(second.value(), first.value());
    assert_eq!(store.reads(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_data_served_until_ttl_expires() {
    let (store, reader) = setup(10);
    store.upsert(&[fixtures::sample_record()]).await.unwrap();
    reader.read_through(&key("ri"), true).await.unwrap();

    store
        .upsert(&[fixtures::record("ri", day(1, 2), 1100.0)])
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(9)).await;
    let cached = reader.read_through(&key("ri"), true).await.unwrap();
    assert_eq!(cached.value().len(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let fresh = reader.read_through(&key("ri"), true).await.unwrap();
    assert!(!fresh.was_cache_hit());
    assert_eq!(fresh.value().len(), 2);
    assert_eq!(store.reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_uncached_read_always_hits_store_and_refreshes() {
    let (store, reader) = setup(10);
    store.upsert(&[fixtures::sample_record()]).await.unwrap();
    reader.read_through(&key("ri"), true).await.unwrap();

    store
        .upsert(&[fixtures::record("ri", day(1, 2), 1100.0)])
        .await
        .unwrap();
    let fresh = reader.read_through(&key("ri"), false).await.unwrap();
    assert!(!fresh.was_cache_hit());
    assert_eq!(fresh.value().len(), 2);

    let cached = reader.read_through(&key("ri"), true).await.unwrap();
    assert!(cached.was_cache_hit());
    assert_eq!(cached.value().len(), 2);
    assert_eq!(store.reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_partitions_cached_independently() {
    let (store, reader) = setup(10);
    store
        .upsert(&[
            fixtures::record("ri", day(1, 1), 1000.0),
            fixtures::record("ny", day(1, 1), 5000.0),
        ])
        .await
        .unwrap();

    let ri = reader.get_records("RI", true).await.unwrap().unwrap();
    let ny = reader.get_records("ny", true).await.unwrap().unwrap();
    assert_eq!(ri[0].total_cases, 1000.0);
    assert_eq!(ny[0].total_cases, 5000.0);
    assert_eq!(store.reads(), 2);

    let stats = reader.cache_stats().unwrap();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.entry_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_empty_partition_is_none_and_cached() {
    let (store, reader) = setup(10);

    assert!(reader.get_records("gu", true).await.unwrap().is_none());
    store
        .upsert(&[fixtures::record("gu", day(1, 1), 10.0)])
        .await
        .unwrap();

    // Empty result stays cached until expiry.
    assert!(reader.get_records("gu", true).await.unwrap().is_none());
    assert_eq!(store.reads(), 1);

    assert!(reader.get_records("gu", false).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_unusable_key_is_none_without_store_read() {
    let (store, reader) = setup(10);
    assert!(reader.get_records("   ", true).await.unwrap().is_none());
    let oversized = "x".repeat(600);
    assert!(reader.get_records(&oversized, true).await.unwrap().is_none());
    assert_eq!(store.reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_store_read() {
    let (store, reader) = setup(10);
    store.upsert(&[fixtures::sample_record()]).await.unwrap();
    reader.read_through(&key("ri"), true).await.unwrap();

    assert!(reader.invalidate(&key("ri")).unwrap());
    let read = reader.read_through(&key("ri"), true).await.unwrap();
    assert!(!read.was_cache_hit());
    assert_eq!(store.reads(), 2);

    reader.clear().unwrap();
    reader.read_through(&key("ri"), true).await.unwrap();
    assert_eq!(store.reads(), 3);
}
