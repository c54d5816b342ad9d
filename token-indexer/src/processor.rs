//! Stream processor
//!
//! Consumes the ordered chain feed and drives the indexer actor:
//!
//! ```text
//! feed ──> prefetch task (decode) ──mpsc──> processor loop ──> IndexerHandle
//! ```
//!
//! Decoding is pure, so it runs ahead of the writer on its own task. The
//! channel is FIFO, so the writer still sees transactions in chain order.
//! A reorg, announced by the feed or detected from a block hash mismatch,
//! rolls the ledger back below the fork before anything else is applied.
//!
//! A detected reorg only rolls back below the height where it was noticed.
//! The real fork can be lower, at heights where the new chain carries no
//! memo transactions, so forks deeper than that rely on the feed's
//! `ChainEvent::Reorg`.

use crate::{
    actor::IndexerHandle,
    store::{DecodedTransaction, Processed},
    types::{ChainEvent, Cursor},
    Error, Result,
};
use tokio::sync::{mpsc, watch};
use tokio_stream::{Stream, StreamExt};

/// Feed item after the decode stage
#[derive(Debug)]
enum Staged {
    Transaction(DecodedTransaction),
    Reorg { fork_height: u64 },
}

impl From<ChainEvent> for Staged {
    fn from(event: ChainEvent) -> Self {
        match event {
            ChainEvent::Transaction(tx) => Staged::Transaction(DecodedTransaction::decode(tx)),
            ChainEvent::Reorg { fork_height } => Staged::Reorg { fork_height },
        }
    }
}

/// Counters for one processor run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorReport {
    /// Transactions received from the feed
    pub received: u64,
    /// Applied
    pub applied: u64,
    /// Rejected
    pub rejected: u64,
    /// Skipped as already indexed
    pub already_indexed: u64,
    /// Reorgs handled
    pub reorgs: u64,
    /// Transactions undone by reorgs
    pub rolled_back: u64,
    /// Cursor when the run ended
    pub cursor: Option<Cursor>,
    /// Stopped by the shutdown signal rather than end of feed
    pub interrupted: bool,
}

/// Drives the indexer from a chain feed
#[derive(Debug, Clone)]
pub struct StreamProcessor {
    handle: IndexerHandle,
    prefetch_depth: usize,
}

impl StreamProcessor {
    /// Create new processor
    pub fn new(handle: IndexerHandle, prefetch_depth: usize) -> Self {
        Self {
            handle,
            prefetch_depth: prefetch_depth.max(1),
        }
    }

    /// Process the feed until it ends, shutdown is signalled, or a fatal
    /// error occurs
    ///
    /// Shutdown is only observed between transactions; an in-flight
    /// transaction always finishes its commit.
    pub async fn run<S>(self, feed: S, mut shutdown: watch::Receiver<bool>) -> Result<ProcessorReport>
    where
        S: Stream<Item = ChainEvent> + Send + Unpin + 'static,
    {
        let (staged_tx, mut staged_rx) = mpsc::channel(self.prefetch_depth);
        let prefetch = tokio::spawn(async move {
            let mut feed = feed;
            while let Some(event) = feed.next().await {
                if staged_tx.send(Staged::from(event)).await.is_err() {
                    break;
                }
            }
        });

        tracing::info!(prefetch_depth = self.prefetch_depth, "Stream processor started");

        let mut report = ProcessorReport::default();
        let mut shutdown_open = true;

        let outcome = loop {
            if *shutdown.borrow() {
                report.interrupted = true;
                break Ok(());
            }

            let staged = tokio::select! {
                biased;

                changed = shutdown.changed(), if shutdown_open => {
                    if changed.is_err() {
                        // Sender gone; no shutdown can arrive any more
                        shutdown_open = false;
                    }
                    continue;
                }

                staged = staged_rx.recv() => match staged {
                    Some(staged) => staged,
                    None => break Ok(()),
                },
            };

            if let Err(e) = self.handle_staged(staged, &mut report).await {
                break Err(e);
            }
        };

        prefetch.abort();

        if let Err(e) = outcome {
            tracing::error!(cursor = ?report.cursor, "Stream processor halted: {}", e);
            return Err(e);
        }

        report.cursor = self.handle.cursor().await?;
        tracing::info!(
            applied = report.applied,
            rejected = report.rejected,
            reorgs = report.reorgs,
            cursor = ?report.cursor,
            interrupted = report.interrupted,
            "Stream processor stopped"
        );
        Ok(report)
    }

    async fn handle_staged(&self, staged: Staged, report: &mut ProcessorReport) -> Result<()> {
        match staged {
            Staged::Reorg { fork_height } => self.rollback(fork_height, report).await,
            Staged::Transaction(decoded) => {
                report.received += 1;
                let processed = match self.handle.process(decoded.clone()).await {
                    Err(Error::ReorgDetected { height }) => {
                        self.rollback(height, report).await?;
                        self.handle.process(decoded).await?
                    }
                    other => other?,
                };
                self.record(&processed, report);
                Ok(())
            }
        }
    }

    async fn rollback(&self, fork_height: u64, report: &mut ProcessorReport) -> Result<()> {
        let summary = self.handle.rollback_before(fork_height).await?;
        tracing::warn!(
            fork_height,
            undone = summary.undone,
            cursor = ?summary.cursor,
            "Chain reorganization handled"
        );
        report.reorgs += 1;
        report.rolled_back += summary.undone as u64;
        report.cursor = summary.cursor;
        Ok(())
    }

    fn record(&self, processed: &Processed, report: &mut ProcessorReport) {
        match processed {
            Processed::Indexed(receipt) => {
                report.applied += 1;
                report.cursor = Some(receipt.position);
            }
            Processed::Rejected(receipt) => {
                report.rejected += 1;
                report.cursor = Some(receipt.position);
            }
            Processed::AlreadyIndexed(_) => report.already_indexed += 1,
        }
    }
}
