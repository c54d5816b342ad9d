//! Operation validation
//!
//! Decides whether a decoded operation is accepted, given the transaction that
//! carried it and a read-only view of the ledger. Validation never mutates
//! state, so it can run against the live store, a snapshot, or a test map.
//!
//! Each transaction is judged on its own. A "bulk" batch spread across several
//! transactions is only atomic if the contract that emitted them made it so;
//! the indexer reflects whatever the chain finalized.

use crate::{
    codec::Operation,
    types::{Address, ChainTransaction, RejectReason, Ticker, TickerEntry},
    Result,
};

/// Largest accepted `decimals` on deploy
pub const MAX_DECIMALS: u8 = 18;

/// Default minimum STX payment: 0.000001 STX
pub const DEFAULT_MIN_PAYMENT_USTX: u64 = 1;

/// Read-only ledger state
///
/// `Err` means the underlying store failed, which is fatal to indexing.
pub trait LedgerView {
    /// Registry entry for a ticker
    fn ticker(&self, ticker: &Ticker) -> Result<Option<TickerEntry>>;

    /// Balance of an address (zero when absent)
    fn balance(&self, ticker: &Ticker, address: &Address) -> Result<u128>;
}

/// Validation outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Operation may be applied
    Accept,
    /// Operation is recorded but has no effect
    Reject(RejectReason),
}

impl Verdict {
    /// Check if accepted
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Protocol rule checker
#[derive(Debug, Clone)]
pub struct Validator {
    min_payment_ustx: u64,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PAYMENT_USTX)
    }
}

impl Validator {
    /// Create new validator
    pub fn new(min_payment_ustx: u64) -> Self {
        Self { min_payment_ustx }
    }

    /// Minimum payment in micro-STX
    pub fn min_payment_ustx(&self) -> u64 {
        self.min_payment_ustx
    }

    /// Validate an operation against a ledger view
    pub fn validate<V>(&self, op: &Operation, tx: &ChainTransaction, view: &V) -> Result<Verdict>
    where
        V: LedgerView + ?Sized,
    {
        let verdict = match op {
            Operation::Deploy {
                ticker,
                max_supply,
                mint_cap_per_op,
                decimals,
            } => {
                if view.ticker(ticker)?.is_some() {
                    return Ok(Verdict::Reject(RejectReason::TickerExists));
                }
                self.check_payment(tx)
                    .or_else(|| check_deploy(*max_supply, *mint_cap_per_op, *decimals))
            }

            Operation::Mint { ticker, amount } => {
                let Some(entry) = view.ticker(ticker)? else {
                    return Ok(Verdict::Reject(RejectReason::UnknownTicker));
                };
                self.check_payment(tx)
                    .or_else(|| check_nonzero(*amount))
                    .or_else(|| check_mint_cap(&entry, *amount))
                    .or_else(|| check_supply(&entry, *amount))
            }

            Operation::BulkMint {
                ticker,
                total_amount,
            } => {
                let Some(entry) = view.ticker(ticker)? else {
                    return Ok(Verdict::Reject(RejectReason::UnknownTicker));
                };
                self.check_payment(tx)
                    .or_else(|| check_nonzero(*total_amount))
                    .or_else(|| check_supply(&entry, *total_amount))
            }

            Operation::Transfer { ticker, amount } => {
                if view.ticker(ticker)?.is_none() {
                    return Ok(Verdict::Reject(RejectReason::UnknownTicker));
                }
                match self.check_payment(tx).or_else(|| check_nonzero(*amount)) {
                    Some(reason) => Some(reason),
                    None => {
                        let available = view.balance(ticker, &tx.sender)?;
                        (available < *amount).then(|| RejectReason::InsufficientBalance {
                            requested: *amount,
                            available,
                        })
                    }
                }
            }
        };

        Ok(verdict.map_or(Verdict::Accept, Verdict::Reject))
    }

    fn check_payment(&self, tx: &ChainTransaction) -> Option<RejectReason> {
        (tx.stx_amount < self.min_payment_ustx).then(|| RejectReason::InsufficientStxPayment {
            paid: tx.stx_amount,
            required: self.min_payment_ustx,
        })
    }
}

fn check_nonzero(amount: u128) -> Option<RejectReason> {
    (amount == 0).then_some(RejectReason::AmountZero)
}

fn check_mint_cap(entry: &TickerEntry, amount: u128) -> Option<RejectReason> {
    (amount > entry.mint_cap_per_op).then(|| RejectReason::MintCapExceeded {
        requested: amount,
        cap: entry.mint_cap_per_op,
    })
}

fn check_supply(entry: &TickerEntry, amount: u128) -> Option<RejectReason> {
    let within_cap = entry
        .minted_supply
        .checked_add(amount)
        .map_or(false, |total| total <= entry.max_supply);

    (!within_cap).then(|| RejectReason::SupplyExceeded {
        requested: amount,
        remaining: entry.remaining_supply(),
    })
}

fn check_deploy(max_supply: u128, mint_cap_per_op: u128, decimals: u8) -> Option<RejectReason> {
    if max_supply == 0 || mint_cap_per_op == 0 {
        return Some(RejectReason::AmountZero);
    }
    if mint_cap_per_op > max_supply {
        return Some(RejectReason::InvalidDeploy(format!(
            "mint cap {} exceeds max supply {}",
            mint_cap_per_op, max_supply
        )));
    }
    if decimals > MAX_DECIMALS {
        return Some(RejectReason::InvalidDeploy(format!(
            "decimals {} exceeds {}",
            decimals, MAX_DECIMALS
        )));
    }
    None
}
