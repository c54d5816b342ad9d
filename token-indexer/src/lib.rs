//! Memo-encoded token indexer
//!
//! Indexes fungible tokens whose operations ride in the memo field of plain
//! STX transfers, including bulk mints that credit a whole batch at once.
//!
//! # Architecture
//!
//! - **Codec**: Pure memo decoding into typed operations
//! - **Validator**: Protocol rules checked against a read-only ledger view
//! - **Single Writer**: One actor owns the ledger store
//! - **Journal**: Per-transaction undo records for reorg rollback
//!
//! # Invariants
//!
//! - Supply cap: `minted_supply <= max_supply` for every ticker
//! - Conservation: holders never own more than was minted
//! - Deterministic replay: Same chain → same state root
//! - Atomicity: A transaction's effects, receipt and cursor commit together

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod codec;
pub mod config;
pub mod digest;
pub mod error;
pub mod indexer;
pub mod metrics;
pub mod processor;
pub mod storage;
pub mod store;
pub mod types;
pub mod validator;

// Re-exports
pub use codec::{decode, encode, DecodeError, Operation};
pub use config::Config;
pub use error::{Error, Result};
pub use indexer::Indexer;
pub use processor::{ProcessorReport, StreamProcessor};
pub use storage::Storage;
pub use store::{DecodedTransaction, LedgerStore, Processed};
pub use types::{
    Address, ChainEvent, ChainTransaction, Cursor, Receipt, ReceiptStatus, RejectReason, Ticker,
    TickerEntry,
};
pub use validator::{LedgerView, Validator, Verdict};
