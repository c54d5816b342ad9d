//! Token indexer binary
//!
//! Reads chain events as JSON lines from stdin and indexes them until the
//! feed ends or Ctrl-C is pressed.

use anyhow::Context;
use token_indexer::{digest::to_hex, ChainEvent, Config, Indexer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting token indexer");

    // Load configuration
    let config = match std::env::var("TOKEN_INDEXER_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        Err(_) => Config::from_env().context("loading config from environment")?,
    };

    let indexer = Indexer::open(config).await.context("opening indexer")?;
    tracing::info!(cursor = ?indexer.cursor()?, "Indexer opened successfully");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let (event_tx, event_rx) = mpsc::channel(indexer.config().pipeline.prefetch_depth);
    let reader = tokio::spawn(read_feed(event_tx));

    let report = indexer
        .process_feed(ReceiverStream::new(event_rx), shutdown_rx)
        .await
        .context("indexing halted")?;

    if report.interrupted {
        reader.abort();
    } else {
        // Feed closed, so the reader has returned
        reader.await.context("feed reader panicked")??;
    }

    tracing::info!(
        applied = report.applied,
        rejected = report.rejected,
        already_indexed = report.already_indexed,
        reorgs = report.reorgs,
        cursor = ?report.cursor,
        state_root = %to_hex(&indexer.state_root()?),
        "Feed processed"
    );

    indexer.shutdown().await?;
    Ok(())
}

/// Forward stdin JSON lines as chain events
async fn read_feed(events: mpsc::Sender<ChainEvent>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event: ChainEvent = serde_json::from_str(&line)
            .with_context(|| format!("invalid feed event on line {}", line_no))?;
        if events.send(event).await.is_err() {
            break;
        }
    }

    Ok(())
}
