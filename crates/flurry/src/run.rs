//! Wiring of one reader process: storage, metrics, tailer, and output.

use std::sync::Arc;

use snafu::prelude::*;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flurry_core::polling::run_polling_loop;
use flurry_core::storage::StorageProvider;

use crate::config::Config;
use crate::error::{MetricsSnafu, RunError, StorageSnafu};
use crate::sink::{ChannelSink, Record};
use crate::tailer::BlobTailer;

/// Records buffered between the tailer and the output writer.
const OUTPUT_BUFFER: usize = 1024;

/// Tail the configured container until `shutdown` fires, writing records to stdout.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<(), RunError> {
    if let Some(addr) = config.metrics.socket_addr()? {
        flurry_core::init_metrics(addr).context(MetricsSnafu)?;
    }

    let storage = StorageProvider::for_config(&config.storage)
        .await
        .context(StorageSnafu)?;
    info!(
        reader = %config.reader.id,
        backend = storage.config().backend_name(),
        container = %storage.canonical_url(),
        registry = %config.registry.path,
        split_policy = ?config.json.split_policy,
        "Starting reader"
    );

    let (sink, rx) = ChannelSink::channel(OUTPUT_BUFFER);
    let writer = tokio::spawn(write_records(rx, tokio::io::stdout()));

    let mut tailer = BlobTailer::new(Arc::new(storage), &config, sink)?;
    run_polling_loop(
        &mut tailer,
        config.reader.interval(),
        config.reader.poll_jitter_secs,
        shutdown,
        &config.reader.id,
    )
    .await;

    // Closes the channel so the writer drains and exits.
    drop(tailer);
    match writer.await {
        Ok(written) => info!(records = written, "Reader stopped"),
        Err(e) => warn!(error = %e, "Output writer panicked"),
    }
    Ok(())
}

/// Write each record followed by a newline until the channel closes.
///
/// Returns the number of records written. A write failure stops the writer,
/// which closes the channel and makes further deliveries fail.
pub async fn write_records<W>(mut rx: mpsc::Receiver<Record>, mut out: W) -> u64
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(record) = rx.recv().await {
        let result = async {
            out.write_all(&record.data).await?;
            out.write_all(b"\n").await?;
            out.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!(blob = %record.blob, offset = record.offset, error = %e, "Failed to write record");
            break;
        }
        written += 1;
    }
    written
}
