//! Periodic Ingestion Loop
//!
//! Runs Fetch → Normalize → Upsert on a fixed period until shut down.
//!
//! A cycle never takes the loop down. Exhausted fetches are skipped, parse
//! and storage errors are logged and counted, and a panicking cycle is
//! contained by running each cycle in its own task.
//!
//! # Example
//!
//! ```ignore
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let ingestion = IngestionLoop::new(fetcher, Arc::new(CsvNormalizer::new()), store, period);
//! let handle = tokio::spawn(ingestion.run(shutdown_rx));
//!
//! // Later
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use casefeed_core::{CasefeedResult, FetchError, Normalizer, UpsertStats};
use casefeed_storage::RecordStore;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::fetch::{FetchOutcome, Fetcher};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the ingestion loop.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Cycles begun since startup
    pub cycles_started: AtomicU64,

    /// Cycles that upserted a payload
    pub cycles_succeeded: AtomicU64,

    /// Cycles with no data because every fetch attempt failed
    pub cycles_skipped: AtomicU64,

    /// Cycles that returned an error or panicked
    pub cycles_failed: AtomicU64,

    /// Rows applied across all upserts
    pub records_upserted: AtomicU64,

    /// Wall-clock time of the last successful cycle, 0 if none
    pub last_success_unix_ms: AtomicU64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> IngestMetricsSnapshot {
        IngestMetricsSnapshot {
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_succeeded: self.cycles_succeeded.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            records_upserted: self.records_upserted.load(Ordering::Relaxed),
            last_success_unix_ms: self.last_success_unix_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`IngestMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestMetricsSnapshot {
    pub cycles_started: u64,
    pub cycles_succeeded: u64,
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    pub records_upserted: u64,
    pub last_success_unix_ms: u64,
}

// ============================================================================
// CYCLE
// ============================================================================

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReport {
    /// The fetch budget ran out; nothing was written.
    Skipped {
        attempts: u32,
        last_error: Option<FetchError>,
    },
    /// A payload was normalized and upserted.
    Upserted { attempts: u32, stats: UpsertStats },
}

/// The Fetch → Normalize → Upsert pipeline and its schedule.
pub struct IngestionLoop {
    fetcher: Fetcher,
    normalizer: Arc<dyn Normalizer>,
    store: Arc<dyn RecordStore>,
    period: Duration,
}

impl IngestionLoop {
    pub fn new(
        fetcher: Fetcher,
        normalizer: Arc<dyn Normalizer>,
        store: Arc<dyn RecordStore>,
        period: Duration,
    ) -> Self {
        Self {
            fetcher,
            normalizer,
            store,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one cycle.
    ///
    /// An exhausted fetch is a normal outcome, not an error. Normalization
    /// and storage errors are returned to the caller.
    pub async fn run_cycle(&self) -> CasefeedResult<CycleReport> {
        let (text, attempts) = match self.fetcher.fetch().await {
            FetchOutcome::Body { text, attempts } => (text, attempts),
            FetchOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                return Ok(CycleReport::Skipped {
                    attempts,
                    last_error,
                })
            }
        };

        let records = self.normalizer.normalize(&text)?;
        let stats = self.store.upsert(&records).await?;
        Ok(CycleReport::Upserted { attempts, stats })
    }

    /// Run cycles every `period` until `shutdown` is set to `true` or its
    /// sender is dropped.
    ///
    /// The first cycle starts immediately. Cycles never overlap: a cycle
    /// that outlasts the period makes the loop skip the missed ticks. A
    /// cycle in flight when shutdown arrives runs to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Arc<IngestMetrics> {
        let metrics = Arc::new(IngestMetrics::new());
        let this = Arc::new(self);

        let mut ticker = interval(this.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            url = this.fetcher.url(),
            period_secs = this.period.as_secs(),
            "Ingestion loop started"
        );

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Ingestion loop shutting down");
                            break;
                        }
                    }

                    _ = ticker.tick() => {
                        Arc::clone(&this).execute_cycle(&metrics).await;
                    }
                }
            }
        }

        let snapshot = metrics.snapshot();
        tracing::info!(
            cycles_started = snapshot.cycles_started,
            cycles_succeeded = snapshot.cycles_succeeded,
            cycles_skipped = snapshot.cycles_skipped,
            cycles_failed = snapshot.cycles_failed,
            records_upserted = snapshot.records_upserted,
            "Ingestion loop completed"
        );

        metrics
    }

    /// Run one cycle in its own task and fold the result into `metrics`.
    async fn execute_cycle(self: Arc<Self>, metrics: &IngestMetrics) {
        let cycle = metrics.cycles_started.fetch_add(1, Ordering::Relaxed) + 1;

        match tokio::spawn(async move { self.run_cycle().await }).await {
            Ok(Ok(CycleReport::Upserted { attempts, stats })) => {
                metrics.cycles_succeeded.fetch_add(1, Ordering::Relaxed);
                metrics
                    .records_upserted
                    .fetch_add(stats.rows(), Ordering::Relaxed);
                metrics
                    .last_success_unix_ms
                    .store(Utc::now().timestamp_millis().max(0) as u64, Ordering::Relaxed);
                tracing::info!(
                    cycle,
                    attempts,
                    rows = stats.rows(),
                    matched = stats.matched,
                    inserted = stats.inserted,
                    "Ingestion cycle completed"
                );
            }
            Ok(Ok(CycleReport::Skipped {
                attempts,
                last_error,
            })) => {
                metrics.cycles_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    cycle,
                    attempts,
                    last_error = ?last_error,
                    "Ingestion cycle skipped, no data"
                );
            }
            Ok(Err(e)) => {
                metrics.cycles_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(cycle, error = %e, "Ingestion cycle failed");
            }
            Err(e) => {
                metrics.cycles_failed.fetch_add(1, Ordering::Relaxed);
                if e.is_panic() {
                    tracing::warn!(cycle, "Ingestion cycle panicked");
                } else {
                    tracing::warn!(cycle, error = %e, "Ingestion cycle task aborted");
                }
            }
        }
    }
}

impl std::fmt::Debug for IngestionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionLoop")
            .field("fetcher", &self.fetcher)
            .field("period", &self.period)
            .finish()
    }
}
