//! casefeed Ingest - Periodic CSV Ingestion
//!
//! Downloads a public case-count export on a fixed period, normalizes it
//! into typed records, and upserts them into a partitioned record store.

pub mod fetch;
pub mod ingest_loop;
pub mod normalize;
pub mod shutdown;
pub mod telemetry;

pub use fetch::{FetchOutcome, Fetcher, ReqwestSource};
pub use ingest_loop::{CycleReport, IngestMetrics, IngestMetricsSnapshot, IngestionLoop};
pub use normalize::CsvNormalizer;
pub use shutdown::ShutdownSignal;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
