//! casefeed ingestion service entry point
//!
//! Loads configuration, opens the record store and runs the ingestion loop
//! until Ctrl-C. Exits with an error if the Ctrl-C handler cannot be
//! registered.

use std::sync::Arc;

use casefeed_core::{CasefeedConfig, CasefeedResult, StorageBackend};
use casefeed_ingest::{
    init_tracing, CsvNormalizer, Fetcher, IngestionLoop, ReqwestSource, ShutdownSignal,
    TelemetryConfig,
};
use casefeed_storage::{InMemoryRecordStore, LmdbRecordStore, RecordStore};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> CasefeedResult<()> {
    let config = CasefeedConfig::load()?;
    init_tracing(&TelemetryConfig::default())?;
    let shutdown_signal = ShutdownSignal::install(tokio::signal::ctrl_c()).await?;

    let lmdb = match config.storage.backend {
        StorageBackend::Lmdb => Some(Arc::new(LmdbRecordStore::open(
            &config.storage.path,
            config.storage.map_size_mb,
        )?)),
        StorageBackend::Memory => None,
    };
    let store: Arc<dyn RecordStore> = match &lmdb {
        Some(lmdb) => lmdb.clone() as Arc<dyn RecordStore>,
        None => Arc::new(InMemoryRecordStore::new()),
    };

    let partitions = store.partitions().await?;
    tracing::info!(
        backend = ?config.storage.backend,
        partitions = partitions.len(),
        "Record store ready"
    );

    let fetcher = Fetcher::from_settings(Arc::new(ReqwestSource::new()), &config.ingest);
    let ingestion = IngestionLoop::new(
        fetcher,
        Arc::new(CsvNormalizer::new()),
        Arc::clone(&store),
        config.ingest.period(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(ingestion.run(shutdown_rx));

    let received = shutdown_signal.recv().await;
    match &received {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Shutdown signal lost, stopping"),
    }
    let _ = shutdown_tx.send(true);

    match handle.await {
        Ok(metrics) => {
            let snapshot = metrics.snapshot();
            tracing::info!(
                cycles_started = snapshot.cycles_started,
                cycles_succeeded = snapshot.cycles_succeeded,
                cycles_skipped = snapshot.cycles_skipped,
                cycles_failed = snapshot.cycles_failed,
                records_upserted = snapshot.records_upserted,
                last_success_unix_ms = snapshot.last_success_unix_ms,
                "Final ingestion metrics"
            );
        }
        Err(e) => tracing::error!(error = %e, "Ingestion loop task failed"),
    }

    drop(store);
    if let Some(lmdb) = lmdb {
        match Arc::try_unwrap(lmdb) {
            Ok(lmdb) => lmdb.close()?,
            Err(_) => tracing::warn!("Record store still shared at shutdown, skipping sync"),
        }
    }

    received
}
