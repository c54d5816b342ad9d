//! Core types for the indexer
//!
//! All types are designed for:
//! - Deterministic serialization (bincode), so equal state means equal bytes
//! - Exact integer arithmetic (u128 token units, u64 micro-STX)

use crate::codec::{DecodeError, Operation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum ticker length (bytes)
pub const TICKER_MIN_LEN: usize = 3;

/// Maximum ticker length (bytes)
pub const TICKER_MAX_LEN: usize = 8;

/// Token ticker: 3 to 8 ASCII uppercase letters
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    /// Parse a ticker, returning `None` unless it is 3-8 bytes of `A-Z`
    pub fn parse(s: &str) -> Option<Self> {
        let len_ok = (TICKER_MIN_LEN..=TICKER_MAX_LEN).contains(&s.len());
        if len_ok && s.bytes().all(|b| b.is_ascii_uppercase()) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chain principal (opaque to the indexer)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create new address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position in the chain: block height, then index within the block
///
/// Field order matters: the derived `Ord` is the processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
    /// Block height
    pub block_height: u64,
    /// Transaction index within the block
    pub tx_index: u32,
}

impl Cursor {
    /// Create new cursor
    pub fn new(block_height: u64, tx_index: u32) -> Self {
        Self {
            block_height,
            tx_index,
        }
    }

    /// Big-endian key bytes; byte order equals cursor order
    pub fn to_key(&self) -> [u8; 12] {
        let mut key = [0u8; 12];
        key[..8].copy_from_slice(&self.block_height.to_be_bytes());
        key[8..].copy_from_slice(&self.tx_index.to_be_bytes());
        key
    }

    /// Decode key bytes produced by [`Cursor::to_key`]
    pub fn from_key(key: &[u8]) -> Option<Self> {
        if key.len() != 12 {
            return None;
        }
        let height: [u8; 8] = key[..8].try_into().ok()?;
        let index: [u8; 4] = key[8..].try_into().ok()?;
        Some(Self::new(u64::from_be_bytes(height), u32::from_be_bytes(index)))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_height, self.tx_index)
    }
}

/// Ticker registry entry, created by an accepted deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerEntry {
    /// Ticker
    pub ticker: Ticker,

    /// Hard supply cap
    pub max_supply: u128,

    /// Supply minted so far (never exceeds `max_supply`)
    pub minted_supply: u128,

    /// Largest amount a single `m` mint may request
    pub mint_cap_per_op: u128,

    /// Display decimals; amounts are always raw smallest units
    pub decimals: u8,

    /// Sender of the deploy transaction
    pub deployer: Address,

    /// Deploy transaction ID
    pub deploy_tx_id: String,

    /// Deploy position
    pub deploy_position: Cursor,

    /// Block time of the deploy, when the feed provides one
    pub deployed_at: Option<DateTime<Utc>>,
}

impl TickerEntry {
    /// Supply that can still be minted
    pub fn remaining_supply(&self) -> u128 {
        self.max_supply.saturating_sub(self.minted_supply)
    }
}

/// STX transfer carrying a memo, as delivered by the chain feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransaction {
    /// Block height
    pub block_height: u64,

    /// Block hash (used to detect reorganizations)
    pub block_hash: String,

    /// Index within the block
    pub tx_index: u32,

    /// Transaction ID
    pub tx_id: String,

    /// STX sender
    pub sender: Address,

    /// STX recipient
    pub recipient: Address,

    /// Transferred amount in micro-STX
    pub stx_amount: u64,

    /// Raw memo bytes
    #[serde(with = "serde_bytes")]
    pub memo: Vec<u8>,

    /// Block time
    #[serde(default)]
    pub block_time: Option<DateTime<Utc>>,
}

impl ChainTransaction {
    /// Position of this transaction in the chain
    pub fn position(&self) -> Cursor {
        Cursor::new(self.block_height, self.tx_index)
    }
}

/// Event from the base-chain feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    /// Next transaction in canonical order
    Transaction(ChainTransaction),

    /// Blocks from `fork_height` upward were replaced
    Reorg {
        /// First divergent block height
        fork_height: u64,
    },
}

/// Why a transaction had no ledger effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Memo did not decode
    MalformedMemo(DecodeError),
    /// Ticker not deployed
    UnknownTicker,
    /// Deploy of an already registered ticker
    TickerExists,
    /// Carrying transfer moved less than the minimum payment
    InsufficientStxPayment {
        /// Micro-STX paid
        paid: u64,
        /// Micro-STX required
        required: u64,
    },
    /// Zero amount (or zero supply/cap on deploy)
    AmountZero,
    /// Mint would push `minted_supply` past `max_supply`
    SupplyExceeded {
        /// Amount requested
        requested: u128,
        /// Supply still mintable
        remaining: u128,
    },
    /// Single mint above the per-operation cap
    MintCapExceeded {
        /// Amount requested
        requested: u128,
        /// Per-operation cap
        cap: u128,
    },
    /// Transfer above the sender's balance
    InsufficientBalance {
        /// Amount requested
        requested: u128,
        /// Sender balance
        available: u128,
    },
    /// Deploy parameters are inconsistent
    InvalidDeploy(String),
}

impl RejectReason {
    /// Short kind name
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::MalformedMemo(_) => "MalformedMemo",
            RejectReason::UnknownTicker => "UnknownTicker",
            RejectReason::TickerExists => "TickerExists",
            RejectReason::InsufficientStxPayment { .. } => "InsufficientStxPayment",
            RejectReason::AmountZero => "AmountZero",
            RejectReason::SupplyExceeded { .. } => "SupplyExceeded",
            RejectReason::MintCapExceeded { .. } => "MintCapExceeded",
            RejectReason::InsufficientBalance { .. } => "InsufficientBalance",
            RejectReason::InvalidDeploy(_) => "InvalidDeploy",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MalformedMemo(err) => write!(f, "MalformedMemo ({})", err),
            RejectReason::InsufficientStxPayment { paid, required } => {
                write!(f, "InsufficientStxPayment (paid {} < {} uSTX)", paid, required)
            }
            RejectReason::SupplyExceeded {
                requested,
                remaining,
            } => write!(f, "SupplyExceeded ({} > {} remaining)", requested, remaining),
            RejectReason::MintCapExceeded { requested, cap } => {
                write!(f, "MintCapExceeded ({} > cap {})", requested, cap)
            }
            RejectReason::InsufficientBalance {
                requested,
                available,
            } => write!(f, "InsufficientBalance ({} > {})", requested, available),
            RejectReason::InvalidDeploy(detail) => write!(f, "InvalidDeploy ({})", detail),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// One balance record touched by an applied operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Holder
    pub address: Address,
    /// Balance before apply
    pub before: u128,
    /// Balance after apply
    pub after: u128,
}

/// Effect of an applied operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOperation {
    /// Decoded operation
    pub operation: Operation,
    /// `minted_supply` before apply
    pub supply_before: u128,
    /// `minted_supply` after apply
    pub supply_after: u128,
    /// Balance records touched, in write order
    pub balance_changes: Vec<BalanceChange>,
}

/// Terminal state of an indexed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    /// Applied to the ledger
    Applied(AppliedOperation),
    /// Recorded with reason, no ledger mutation
    Rejected(RejectReason),
}

/// Permanent record of how a transaction was indexed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Transaction ID
    pub tx_id: String,
    /// Chain position
    pub position: Cursor,
    /// Outcome
    pub status: ReceiptStatus,
}

impl Receipt {
    /// Check if the transaction changed the ledger
    pub fn is_applied(&self) -> bool {
        matches!(self.status, ReceiptStatus::Applied(_))
    }

    /// Rejection reason, if rejected
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match &self.status {
            ReceiptStatus::Rejected(reason) => Some(reason),
            ReceiptStatus::Applied(_) => None,
        }
    }

    /// Human-readable effect summary
    pub fn describe(&self) -> String {
        match &self.status {
            ReceiptStatus::Applied(applied) => format!(
                "applied {}; supply {} -> {}",
                applied.operation.kind(),
                applied.supply_before,
                applied.supply_after
            ),
            ReceiptStatus::Rejected(reason) => {
                format!("no balance change; reason: {}", reason.kind())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_parse() {
        assert!(Ticker::parse("STXS").is_some());
        assert!(Ticker::parse("ABC").is_some());
        assert!(Ticker::parse("ABCDEFGH").is_some());
        assert!(Ticker::parse("AB").is_none());
        assert!(Ticker::parse("ABCDEFGHI").is_none());
        assert!(Ticker::parse("stxs").is_none());
        assert!(Ticker::parse("ST1S").is_none());
    }

    #[test]
    fn test_cursor_key_order_matches_cursor_order() {
        let a = Cursor::new(1, 500);
        let b = Cursor::new(2, 0);
        assert!(a < b);
        assert!(a.to_key() < b.to_key());
        assert_eq!(Cursor::from_key(&b.to_key()), Some(b));
        assert_eq!(Cursor::from_key(&[0u8; 3]), None);
    }

    #[test]
    fn test_rejected_receipt_description() {
        let receipt = Receipt {
            tx_id: "0xabc".to_string(),
            position: Cursor::new(10, 0),
            status: ReceiptStatus::Rejected(RejectReason::SupplyExceeded {
                requested: 1000,
                remaining: 500,
            }),
        };
        assert!(!receipt.is_applied());
        assert_eq!(receipt.describe(), "no balance change; reason: SupplyExceeded");
    }

    #[test]
    fn test_chain_event_json() {
        let line = r#"{"type":"transaction","block_height":7,"block_hash":"0x07","tx_index":2,
            "tx_id":"0xaa","sender":"SP1","recipient":"SP2","stx_amount":1,"memo":"bSTXS1000"}"#;
        let event: ChainEvent = serde_json::from_str(line).unwrap();
        match event {
            ChainEvent::Transaction(tx) => {
                assert_eq!(tx.memo, b"bSTXS1000".to_vec());
                assert_eq!(tx.position(), Cursor::new(7, 2));
                assert!(tx.block_time.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }

        let reorg: ChainEvent = serde_json::from_str(r#"{"type":"reorg","fork_height":5}"#).unwrap();
        assert_eq!(reorg, ChainEvent::Reorg { fork_height: 5 });
    }
}
