//! Error types for the indexer
//!
//! Protocol rejections are not errors: they are `RejectReason` values stored
//! in receipts. Everything in here either halts indexing or, for
//! `ReorgDetected`, triggers a rollback.

use thiserror::Error;

/// Result type for indexer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Indexer errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A transaction arrived for a height whose recorded block hash differs
    #[error("Chain reorganization detected at height {height}")]
    ReorgDetected {
        /// First divergent block height
        height: u64,
    },

    /// Invariant violation (supply cap, balance underflow, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Whether indexing must stop rather than move past this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::ReorgDetected { .. })
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
