//! Time-bounded read cache in front of the record store.
//!
//! Each partition gets its own TTL-bounded entry. A read that allows cached
//! data is served from the entry while it is younger than the TTL; any other
//! read goes to the store and refreshes the entry.
//!
//! Empty results are cached too, so a partition that was empty at read time
//! stays empty to cached readers until the entry expires, even if the
//! ingestion loop has written to it since.
//!
//! # Example
//!
//! ```ignore
//! let reader = RecordReader::new(store, PartitionCache::new(Duration::from_secs(10), 128));
//!
//! // Presentation callback: tolerate stale data for up to the TTL
//! match reader.get_records("RI", true).await? {
//!     Some(records) => render(records),
//!     None => render_empty(),
//! }
//! ```

pub mod partition_cache;
pub mod read_through;

pub use partition_cache::{CacheStats, PartitionCache};
pub use read_through::{CacheRead, RecordReader};
