//! Natural-key encoding for the LMDB record database.
//!
//! A record key is the partition key followed by the record timestamp. The
//! encoding keeps all records of one partition contiguous and ordered by
//! time, so a partition read is a single prefix scan.

use casefeed_core::{PartitionKey, Timestamp};
use chrono::DateTime;

/// Separator between the partition bytes and the timestamp.
///
/// 0xFF never occurs in UTF-8, so it cannot collide with a partition key.
const SEPARATOR: u8 = 0xFF;

const SECONDS_LEN: usize = 8;
const NANOS_LEN: usize = 4;
const TIMESTAMP_LEN: usize = SECONDS_LEN + NANOS_LEN;

/// Encoded `(partition_key, timestamp)` pair.
///
/// # Binary Format
///
/// - Bytes `0..n`: partition key (UTF-8)
/// - Byte `n`: separator (0xFF)
/// - Bytes `n+1..n+9`: whole seconds since the epoch, big-endian, sign bit
///   flipped so negative instants sort before positive ones
/// - Bytes `n+9..n+13`: sub-second nanoseconds, big-endian
///
/// Every distinct instant gets a distinct key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    partition_key: PartitionKey,
    timestamp: Timestamp,
}

impl RecordKey {
    pub fn new(partition_key: PartitionKey, timestamp: Timestamp) -> Self {
        Self {
            partition_key,
            timestamp,
        }
    }

    pub fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::partition_prefix(&self.partition_key);
        bytes.extend_from_slice(&order_preserving(self.timestamp.timestamp()).to_be_bytes());
        bytes.extend_from_slice(&self.timestamp.timestamp_subsec_nanos().to_be_bytes());
        bytes
    }

    /// Decode a key produced by [`RecordKey::encode`].
    ///
    /// Returns `None` if the bytes are too short, the separator is missing,
    /// the partition is not valid UTF-8 or the timestamp is out of range.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < TIMESTAMP_LEN + 2 {
            return None;
        }
        let split = bytes.len() - TIMESTAMP_LEN - 1;
        if bytes[split] != SEPARATOR {
            return None;
        }

        let partition = std::str::from_utf8(&bytes[..split]).ok()?;
        let partition_key = PartitionKey::new(partition)?;

        let (raw_secs, raw_nanos) = bytes[split + 1..].split_at(SECONDS_LEN);
        let secs = order_preserving(u64::from_be_bytes(raw_secs.try_into().ok()?) as i64) as i64;
        let nanos = u32::from_be_bytes(raw_nanos.try_into().ok()?);
        let timestamp = DateTime::from_timestamp(secs, nanos)?;

        Some(Self {
            partition_key,
            timestamp,
        })
    }

    /// Prefix shared by every key of one partition.
    pub fn partition_prefix(partition_key: &PartitionKey) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(partition_key.as_str().len() + 1 + TIMESTAMP_LEN);
        bytes.extend_from_slice(partition_key.as_str().as_bytes());
        bytes.push(SEPARATOR);
        bytes
    }
}

/// Flip the sign bit so the unsigned big-endian order matches signed order.
/// The mapping is its own inverse.
fn order_preserving(value: i64) -> u64 {
    (value as u64) ^ (1u64 << 63)
}
