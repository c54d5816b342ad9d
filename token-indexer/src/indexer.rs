//! Main indexer orchestration layer
//!
//! Ties together storage, the single-writer actor and the stream processor
//! into a high-level API. Writes go through the actor; queries read a RocksDB
//! snapshot directly and never wait on the writer.
//!
//! # Example
//!
//! ```no_run
//! use token_indexer::{ChainEvent, Config, Indexer};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> token_indexer::Result<()> {
//!     let indexer = Indexer::open(Config::default()).await?;
//!
//!     let events: Vec<ChainEvent> = Vec::new();
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     indexer
//!         .process_feed(tokio_stream::iter(events), shutdown_rx)
//!         .await?;
//!
//!     indexer.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_indexer_actor, IndexerHandle, IndexerStatus},
    metrics::Metrics,
    processor::{ProcessorReport, StreamProcessor},
    storage::{Storage, StorageStats},
    store::{DecodedTransaction, LedgerStore, Processed},
    types::{Address, ChainEvent, ChainTransaction, Cursor, Receipt, Ticker, TickerEntry},
    validator::{LedgerView, Validator},
    Config, Error, Result,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::Stream;

/// Main indexer interface
pub struct Indexer {
    /// Actor handle for writes
    handle: IndexerHandle,

    /// Actor task
    task: JoinHandle<()>,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Metrics shared with the actor
    metrics: Metrics,

    /// Status shared with the actor
    status: Arc<RwLock<IndexerStatus>>,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("storage", &self.storage)
            .field("status", &*self.status.read())
            .finish_non_exhaustive()
    }
}

impl Indexer {
    /// Open indexer with configuration
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let validator = Validator::new(config.protocol.min_payment_ustx()?);

        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()?;
        let status = Arc::new(RwLock::new(IndexerStatus::default()));

        let store = LedgerStore::new(storage.clone(), validator);
        let (handle, task) = spawn_indexer_actor(
            store,
            metrics.clone(),
            status.clone(),
            config.pipeline.mailbox_capacity,
        );

        tracing::info!(
            data_dir = %config.data_dir.display(),
            service = %config.service_name,
            version = %config.service_version,
            "Indexer opened"
        );

        Ok(Self {
            handle,
            task,
            storage,
            metrics,
            status,
            config,
        })
    }

    /// Handle to the writer
    pub fn handle(&self) -> IndexerHandle {
        self.handle.clone()
    }

    /// Stream processor bound to this indexer
    pub fn processor(&self) -> StreamProcessor {
        StreamProcessor::new(self.handle(), self.config.pipeline.prefetch_depth)
    }

    /// Index a chain feed until it ends or `shutdown` flips to `true`
    pub async fn process_feed<S>(
        &self,
        feed: S,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ProcessorReport>
    where
        S: Stream<Item = ChainEvent> + Send + Unpin + 'static,
    {
        self.processor().run(feed, shutdown).await
    }

    /// Index one transaction, outside of any feed
    ///
    /// A block hash mismatch is returned as `Error::ReorgDetected` rather than
    /// handled.
    pub async fn process_transaction(&self, tx: ChainTransaction) -> Result<Processed> {
        self.handle.process(DecodedTransaction::decode(tx)).await
    }

    /// Undo every block at or above `fork_height`
    pub async fn rollback_before(&self, fork_height: u64) -> Result<Option<Cursor>> {
        Ok(self.handle.rollback_before(fork_height).await?.cursor)
    }

    // Queries

    /// Registry entry for a ticker
    pub fn ticker(&self, ticker: &Ticker) -> Result<Option<TickerEntry>> {
        self.storage.snapshot().ticker(ticker)
    }

    /// All registry entries
    pub fn tickers(&self) -> Result<Vec<TickerEntry>> {
        self.storage.snapshot().tickers()
    }

    /// Balance of an address
    pub fn balance(&self, ticker: &Ticker, address: &Address) -> Result<u128> {
        self.storage.snapshot().balance(ticker, address)
    }

    /// Non-zero balances of a ticker
    pub fn holders(&self, ticker: &Ticker) -> Result<Vec<(Address, u128)>> {
        self.storage.snapshot().holders(ticker)
    }

    /// Receipt of the transaction at a chain position
    pub fn receipt_at(&self, position: Cursor) -> Result<Option<Receipt>> {
        self.storage.snapshot().receipt_at(position)
    }

    /// Receipts recorded under a transaction ID, in chain order
    pub fn receipts(&self, tx_id: &str) -> Result<Vec<Receipt>> {
        self.storage.snapshot().receipts(tx_id)
    }

    /// Effect summary of an indexed transaction
    ///
    /// Rejected transactions read `"no balance change; reason: <kind>"`.
    /// When several memo transfers share the tx_id, each summary is
    /// prefixed with its position and joined with `"; "`.
    pub fn tx_effect(&self, tx_id: &str) -> Result<Option<String>> {
        let receipts = self.receipts(tx_id)?;
        Ok(match receipts.as_slice() {
            [] => None,
            [receipt] => Some(receipt.describe()),
            many => Some(
                many.iter()
                    .map(|receipt| format!("{}: {}", receipt.position, receipt.describe()))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
        })
    }

    /// Last processed position
    pub fn cursor(&self) -> Result<Option<Cursor>> {
        self.storage.snapshot().cursor()
    }

    /// Digest of the full ledger state
    pub fn state_root(&self) -> Result<[u8; 32]> {
        self.storage.snapshot().state_root()
    }

    /// Verify supply accounting for every ticker
    ///
    /// Checks `minted_supply <= max_supply` and that holders never own more
    /// than was minted, on one consistent snapshot.
    pub fn check_supply_invariant(&self) -> Result<()> {
        let snapshot = self.storage.snapshot();
        for entry in snapshot.tickers()? {
            if entry.minted_supply > entry.max_supply {
                return Err(Error::InvariantViolation(format!(
                    "{} minted {} above max supply {}",
                    entry.ticker, entry.minted_supply, entry.max_supply
                )));
            }

            let held = snapshot
                .holders(&entry.ticker)?
                .into_iter()
                .try_fold(0u128, |sum, (_, amount)| sum.checked_add(amount))
                .ok_or_else(|| {
                    Error::InvariantViolation(format!("{} balances overflow", entry.ticker))
                })?;
            if held > entry.minted_supply {
                return Err(Error::InvariantViolation(format!(
                    "{} holders own {} but only {} minted",
                    entry.ticker, held, entry.minted_supply
                )));
            }
        }
        Ok(())
    }

    /// Live status
    pub fn status(&self) -> IndexerStatus {
        self.status.read().clone()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the writer and wait for it to drain its mailbox
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.task
            .await
            .map_err(|e| Error::Concurrency(format!("Indexer actor failed: {}", e)))?;
        tracing::info!("Indexer shut down");
        Ok(())
    }
}
