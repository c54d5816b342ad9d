//! Memo codec
//!
//! Strict tagged grammar for the memo attached to STX transfers:
//!
//! ```text
//! b{TICKER}{AMOUNT}                          bulk mint
//! m{TICKER}{AMOUNT}                          mint
//! t{TICKER}{AMOUNT}                          transfer
//! d{TICKER}{MAX_SUPPLY}:{MINT_CAP}[:{DEC}]   deploy
//!
//! TICKER  = [A-Z]{3,8}          (greedy)
//! number  = "0" | [1-9][0-9]*   (must fit u128; DEC must fit u8)
//! ```
//!
//! Trailing NUL bytes are stripped before parsing, since the chain pads memos
//! to a fixed width. Decoding is pure: indexers that disagree on a single byte
//! here fork their ledgers.

use crate::types::{Ticker, TICKER_MAX_LEN, TICKER_MIN_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const OP_DEPLOY: u8 = b'd';
const OP_MINT: u8 = b'm';
const OP_TRANSFER: u8 = b't';
const OP_BULK_MINT: u8 = b'b';

const DEPLOY_SEPARATOR: u8 = b':';

/// Structured token operation decoded from a memo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Register a new ticker
    Deploy {
        /// Ticker
        ticker: Ticker,
        /// Hard supply cap
        max_supply: u128,
        /// Per-mint cap for `m` operations
        mint_cap_per_op: u128,
        /// Display decimals
        decimals: u8,
    },
    /// Single mint, bounded by the per-op cap
    Mint {
        /// Ticker
        ticker: Ticker,
        /// Amount (raw units)
        amount: u128,
    },
    /// Bulk mint, bounded only by remaining supply
    BulkMint {
        /// Ticker
        ticker: Ticker,
        /// Total amount (raw units)
        total_amount: u128,
    },
    /// Transfer from the STX sender to the STX recipient
    Transfer {
        /// Ticker
        ticker: Ticker,
        /// Amount (raw units)
        amount: u128,
    },
}

impl Operation {
    /// Ticker the operation refers to
    pub fn ticker(&self) -> &Ticker {
        match self {
            Operation::Deploy { ticker, .. }
            | Operation::Mint { ticker, .. }
            | Operation::BulkMint { ticker, .. }
            | Operation::Transfer { ticker, .. } => ticker,
        }
    }

    /// Operation kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Deploy { .. } => "deploy",
            Operation::Mint { .. } => "mint",
            Operation::BulkMint { .. } => "bulk_mint",
            Operation::Transfer { .. } => "transfer",
        }
    }
}

/// Why a memo failed to decode
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeError {
    /// Memo empty after stripping padding
    #[error("empty memo")]
    Empty,

    /// First byte is not a known opcode
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    /// Ticker run shorter than 3 or longer than 8
    #[error("ticker length {0} outside 3..=8")]
    TickerLength(usize),

    /// Byte that is neither an uppercase letter nor a digit where the ticker is
    #[error("invalid ticker byte 0x{0:02x}")]
    InvalidTickerByte(u8),

    /// Number field empty
    #[error("missing number")]
    MissingNumber,

    /// Number field contains a non-digit
    #[error("non-numeric byte 0x{0:02x}")]
    NonNumeric(u8),

    /// Number field has a leading zero
    #[error("leading zero")]
    LeadingZero,

    /// Number does not fit the field width
    #[error("number overflow")]
    NumberOverflow,

    /// Deploy body must have 2 or 3 `:`-separated fields
    #[error("deploy has {0} fields, expected 2 or 3")]
    DeployFieldCount(usize),
}

/// Decode a memo into an operation
pub fn decode(memo: &[u8]) -> Result<Operation, DecodeError> {
    let memo = strip_padding(memo);
    let (&opcode, body) = memo.split_first().ok_or(DecodeError::Empty)?;

    if !matches!(opcode, OP_DEPLOY | OP_MINT | OP_TRANSFER | OP_BULK_MINT) {
        return Err(DecodeError::UnknownOpcode(opcode));
    }

    let (ticker, rest) = split_ticker(body)?;

    match opcode {
        OP_DEPLOY => decode_deploy(ticker, rest),
        OP_MINT => Ok(Operation::Mint {
            ticker,
            amount: parse_number(rest)?,
        }),
        OP_TRANSFER => Ok(Operation::Transfer {
            ticker,
            amount: parse_number(rest)?,
        }),
        _ => Ok(Operation::BulkMint {
            ticker,
            total_amount: parse_number(rest)?,
        }),
    }
}

/// Encode an operation into its canonical memo bytes
///
/// `decode(&encode(op)) == Ok(op)` for every operation with a valid ticker.
pub fn encode(op: &Operation) -> Vec<u8> {
    let text = match op {
        Operation::Deploy {
            ticker,
            max_supply,
            mint_cap_per_op,
            decimals,
        } => {
            if *decimals == 0 {
                format!("d{}{}:{}", ticker, max_supply, mint_cap_per_op)
            } else {
                format!("d{}{}:{}:{}", ticker, max_supply, mint_cap_per_op, decimals)
            }
        }
        Operation::Mint { ticker, amount } => format!("m{}{}", ticker, amount),
        Operation::BulkMint {
            ticker,
            total_amount,
        } => format!("b{}{}", ticker, total_amount),
        Operation::Transfer { ticker, amount } => format!("t{}{}", ticker, amount),
    };
    text.into_bytes()
}

fn strip_padding(memo: &[u8]) -> &[u8] {
    let end = memo.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &memo[..end]
}

/// Greedy uppercase run, then validate what stopped it
fn split_ticker(body: &[u8]) -> Result<(Ticker, &[u8]), DecodeError> {
    let run = body.iter().take_while(|b| b.is_ascii_uppercase()).count();

    if let Some(&next) = body.get(run) {
        if !next.is_ascii_digit() {
            return Err(DecodeError::InvalidTickerByte(next));
        }
    }

    if !(TICKER_MIN_LEN..=TICKER_MAX_LEN).contains(&run) {
        return Err(DecodeError::TickerLength(run));
    }

    // Run is pure ASCII uppercase, so both conversions hold
    let ticker = std::str::from_utf8(&body[..run])
        .ok()
        .and_then(Ticker::parse)
        .ok_or(DecodeError::TickerLength(run))?;

    Ok((ticker, &body[run..]))
}

fn decode_deploy(ticker: Ticker, rest: &[u8]) -> Result<Operation, DecodeError> {
    let fields: Vec<&[u8]> = rest.split(|&b| b == DEPLOY_SEPARATOR).collect();

    let (max_supply, mint_cap_per_op, decimals) = match fields.as_slice() {
        [max, cap] => (parse_number(max)?, parse_number(cap)?, 0),
        [max, cap, dec] => (parse_number(max)?, parse_number(cap)?, parse_decimals(dec)?),
        other => return Err(DecodeError::DeployFieldCount(other.len())),
    };

    Ok(Operation::Deploy {
        ticker,
        max_supply,
        mint_cap_per_op,
        decimals,
    })
}

fn parse_decimals(field: &[u8]) -> Result<u8, DecodeError> {
    u8::try_from(parse_number(field)?).map_err(|_| DecodeError::NumberOverflow)
}

fn parse_number(field: &[u8]) -> Result<u128, DecodeError> {
    if field.is_empty() {
        return Err(DecodeError::MissingNumber);
    }
    if let Some(&bad) = field.iter().find(|b| !b.is_ascii_digit()) {
        return Err(DecodeError::NonNumeric(bad));
    }
    if field.len() > 1 && field[0] == b'0' {
        return Err(DecodeError::LeadingZero);
    }

    field.iter().try_fold(0u128, |acc, &digit| {
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(u128::from(digit - b'0')))
            .ok_or(DecodeError::NumberOverflow)
    })
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&encode(self)))
    }
}
