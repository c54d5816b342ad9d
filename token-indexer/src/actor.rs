//! Actor-based concurrency for the indexer
//!
//! The ledger has exactly one writer. It lives on its own task and owns the
//! `LedgerStore`; everything else talks to it through a cloneable handle:
//!
//! ```text
//!   StreamProcessor ──┐
//!                     │ IndexerHandle (Clone)
//!   Indexer facade ───┤
//!                     ▼ mpsc::channel (bounded)
//!   ┌──────────────────────────────────────────┐
//!   │ IndexerActor (single task)               │
//!   │   LedgerStore::process / rollback_*      │
//!   │   Metrics + IndexerStatus updates        │
//!   └──────────────────────────────────────────┘
//! ```
//!
//! Queries do not go through the mailbox; they read RocksDB snapshots.

use crate::{
    metrics::Metrics,
    storage::RollbackSummary,
    store::{DecodedTransaction, LedgerStore, Processed},
    types::Cursor,
    Error, Result,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Message sent to the indexer actor
#[derive(Debug)]
pub enum IndexerMessage {
    /// Process one decoded transaction
    Process {
        /// Transaction and its decoded memo
        tx: Box<DecodedTransaction>,
        /// Reply channel
        response: oneshot::Sender<Result<Processed>>,
    },

    /// Undo every block at or above `fork_height`
    RollbackBefore {
        /// First divergent height
        fork_height: u64,
        /// Reply channel
        response: oneshot::Sender<Result<RollbackSummary>>,
    },

    /// Undo everything after `target`
    RollbackTo {
        /// Cursor to restore, `None` for genesis
        target: Option<Cursor>,
        /// Reply channel
        response: oneshot::Sender<Result<RollbackSummary>>,
    },

    /// Read the cursor
    GetCursor {
        /// Reply channel
        response: oneshot::Sender<Result<Option<Cursor>>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Live indexer status, shared with readers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexerStatus {
    /// Last processed position
    pub cursor: Option<Cursor>,
    /// Transactions applied since start
    pub applied: u64,
    /// Transactions rejected since start
    pub rejected: u64,
    /// Rollbacks since start
    pub rollbacks: u64,
    /// Set once a fatal error stopped indexing
    pub halted: Option<String>,
}

/// Actor that owns the single ledger writer
pub struct IndexerActor {
    store: LedgerStore,
    mailbox: mpsc::Receiver<IndexerMessage>,
    metrics: Metrics,
    status: Arc<RwLock<IndexerStatus>>,
}

impl std::fmt::Debug for IndexerActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerActor")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl IndexerActor {
    /// Create new actor
    pub fn new(
        store: LedgerStore,
        mailbox: mpsc::Receiver<IndexerMessage>,
        metrics: Metrics,
        status: Arc<RwLock<IndexerStatus>>,
    ) -> Self {
        Self {
            store,
            mailbox,
            metrics,
            status,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        match self.store.cursor() {
            Ok(cursor) => self.set_cursor(cursor),
            Err(e) => tracing::error!("Failed to read cursor: {}", e),
        }

        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                IndexerMessage::Process { tx, response } => {
                    let result = self.process(&tx);
                    let _ = response.send(result);
                }

                IndexerMessage::RollbackBefore {
                    fork_height,
                    response,
                } => {
                    let result = self.store.rollback_before(fork_height);
                    let _ = response.send(self.after_rollback(result));
                }

                IndexerMessage::RollbackTo { target, response } => {
                    let result = self.store.rollback_to(target);
                    let _ = response.send(self.after_rollback(result));
                }

                IndexerMessage::GetCursor { response } => {
                    let _ = response.send(self.store.cursor());
                }

                IndexerMessage::Shutdown => break,
            }
        }

        tracing::debug!("Indexer actor stopped");
    }

    fn process(&mut self, tx: &DecodedTransaction) -> Result<Processed> {
        let started = Instant::now();
        let result = self.store.process(tx);

        match &result {
            Ok(Processed::Indexed(receipt)) => {
                if let Some(kind) = tx.operation.as_ref().ok().map(|op| op.kind()) {
                    self.metrics.record_applied(kind);
                }
                self.status.write().applied += 1;
                self.set_cursor(Some(receipt.position));
            }
            Ok(Processed::Rejected(receipt)) => {
                if let Some(reason) = receipt.reject_reason() {
                    self.metrics.record_rejected(reason.kind());
                }
                self.status.write().rejected += 1;
                self.set_cursor(Some(receipt.position));
            }
            Ok(Processed::AlreadyIndexed(_)) => {}
            Err(e) if e.is_fatal() => {
                tracing::error!(tx_id = %tx.tx.tx_id, "Indexing halted: {}", e);
                self.status.write().halted = Some(e.to_string());
            }
            Err(_) => {}
        }

        self.metrics
            .record_apply_duration(started.elapsed().as_secs_f64());
        result
    }

    fn after_rollback(&mut self, result: Result<RollbackSummary>) -> Result<RollbackSummary> {
        match &result {
            Ok(summary) => {
                self.metrics.record_rollback(summary.undone);
                self.status.write().rollbacks += 1;
                self.set_cursor(summary.cursor);
            }
            Err(e) => {
                tracing::error!("Rollback failed: {}", e);
                self.status.write().halted = Some(e.to_string());
            }
        }
        result
    }

    fn set_cursor(&self, cursor: Option<Cursor>) {
        self.metrics
            .update_cursor_height(cursor.map_or(0, |c| c.block_height));
        self.status.write().cursor = cursor;
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct IndexerHandle {
    sender: mpsc::Sender<IndexerMessage>,
}

impl IndexerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<IndexerMessage>) -> Self {
        Self { sender }
    }

    /// Process one transaction
    pub async fn process(&self, tx: DecodedTransaction) -> Result<Processed> {
        self.call(|response| IndexerMessage::Process {
            tx: Box::new(tx),
            response,
        })
        .await
    }

    /// Undo every block at or above `fork_height`
    pub async fn rollback_before(&self, fork_height: u64) -> Result<RollbackSummary> {
        self.call(|response| IndexerMessage::RollbackBefore {
            fork_height,
            response,
        })
        .await
    }

    /// Undo everything after `target`
    pub async fn rollback_to(&self, target: Option<Cursor>) -> Result<RollbackSummary> {
        self.call(|response| IndexerMessage::RollbackTo { target, response })
            .await
    }

    /// Current cursor
    pub async fn cursor(&self) -> Result<Option<Cursor>> {
        self.call(|response| IndexerMessage::GetCursor { response })
            .await
    }

    /// Shutdown actor
    ///
    /// Messages already in the mailbox are handled first.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(IndexerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }

    async fn call<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<Result<T>>) -> IndexerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }
}

/// Spawn the indexer actor
pub fn spawn_indexer_actor(
    store: LedgerStore,
    metrics: Metrics,
    status: Arc<RwLock<IndexerStatus>>,
    mailbox_capacity: usize,
) -> (IndexerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = IndexerActor::new(store, rx, metrics, status);

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    (IndexerHandle::new(tx), task)
}
