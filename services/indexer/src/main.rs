use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinSet;
use venue_indexer::config::{resolve_path, IndexerConfig};
use venue_indexer::consumer::Consumer;
use venue_indexer::logging;
use venue_indexer::source::{JournalStreamSource, StreamSource};
use venue_store::DurableStore;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    logging::init();

    let path = resolve_path(std::env::args().nth(1));
    let config = IndexerConfig::load(path.as_deref()).context("loading configuration")?;
    tracing::info!(
        config = ?path,
        data_dir = %config.data_dir.display(),
        source_dir = %config.source_dir.display(),
        streams = config.streams.len(),
        "Starting venue indexer"
    );

    let store = DurableStore::open_with(config.durable_config()).context("opening store")?;
    let source: Arc<dyn StreamSource> = Arc::new(JournalStreamSource::new(&config.source_dir));
    let (shutdown_tx, shutdown) = watch::channel(false);

    let mut consumers = JoinSet::new();
    for stream in &config.streams {
        let consumer = Consumer::new(store.clone(), config.consumer_config(stream));
        let source = Arc::clone(&source);
        let shutdown = shutdown.clone();
        consumers.spawn(async move { consumer.run(source.as_ref(), shutdown).await });
    }

    let mut failure = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                shutdown_tx.send_replace(true);
                break;
            }
            joined = consumers.join_next() => match joined {
                None => break,
                Some(Ok(Ok(report))) => {
                    tracing::info!(stream = %report.stream, exit = ?report.exit, "Stream finished");
                }
                Some(Ok(Err(e))) => {
                    failure = Some(anyhow::Error::new(e));
                    shutdown_tx.send_replace(true);
                    break;
                }
                Some(Err(e)) => {
                    failure = Some(anyhow::Error::new(e).context("consumer task panicked"));
                    shutdown_tx.send_replace(true);
                    break;
                }
            },
        }
    }

    // In-flight batches finish before their consumers stop.
    while let Some(joined) = consumers.join_next().await {
        match joined {
            Ok(Ok(report)) => {
                tracing::info!(stream = %report.stream, cursor = %report.last_cursor, "Stream stopped")
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Stream failed during shutdown");
                failure.get_or_insert(anyhow::Error::new(e));
            }
            Err(e) => {
                failure.get_or_insert(anyhow::Error::new(e).context("consumer task panicked"));
            }
        }
    }

    store.sync().context("syncing store journal")?;
    tracing::info!(sequence = store.last_sequence(), "Venue indexer stopped");

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
