//! Ledger state store
//!
//! Drives one transaction through the indexing state machine:
//!
//! ```text
//! Received -> Decoded -> Validated --Accept--> Applied -> Indexed
//!                                  \--Reject--> Rejected
//! ```
//!
//! Both terminal states commit a receipt and advance the cursor in the same
//! batch as the ledger mutation. Acceptance and application are split so that
//! `apply` only fails on storage faults or a broken invariant, never on
//! protocol rules.

use crate::{
    codec::{decode, DecodeError, Operation},
    storage::{Commit, JournalEntry, LedgerSnapshot, RollbackSummary, Storage},
    types::{
        Address, AppliedOperation, BalanceChange, ChainTransaction, Cursor, Receipt,
        ReceiptStatus, RejectReason, Ticker, TickerEntry,
    },
    validator::{Validator, Verdict},
    Error, Result,
};
use std::sync::Arc;

/// Transaction after the decode stage
///
/// Decoding is pure, so this can be produced ahead of the writer.
#[derive(Debug, Clone)]
pub struct DecodedTransaction {
    /// Transaction as received
    pub tx: ChainTransaction,

    /// Decoded memo
    pub operation: std::result::Result<Operation, DecodeError>,
}

impl DecodedTransaction {
    /// Decode a transaction's memo
    pub fn decode(tx: ChainTransaction) -> Self {
        let operation = decode(&tx.memo);
        Self { tx, operation }
    }
}

/// Outcome of processing one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// Applied and committed
    Indexed(Receipt),

    /// Rejected; receipt committed, ledger untouched
    Rejected(Receipt),

    /// At or below the cursor on the same chain; nothing written
    AlreadyIndexed(Cursor),
}

/// Writes planned for one accepted operation
struct Effect {
    applied: AppliedOperation,
    tickers: Vec<TickerEntry>,
    balances: Vec<(Ticker, Address, u128)>,
    prior_ticker: Option<(Ticker, Option<TickerEntry>)>,
    prior_balances: Vec<(Ticker, Address, u128)>,
}

/// Single-writer ledger state store
#[derive(Debug)]
pub struct LedgerStore {
    storage: Arc<Storage>,
    validator: Validator,
}

impl LedgerStore {
    /// Create store over opened storage
    pub fn new(storage: Arc<Storage>, validator: Validator) -> Self {
        Self { storage, validator }
    }

    /// Underlying storage
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Current cursor
    pub fn cursor(&self) -> Result<Option<Cursor>> {
        self.storage.get_cursor()
    }

    /// Consistent read view
    pub fn snapshot(&self) -> LedgerSnapshot<'_> {
        self.storage.snapshot()
    }

    /// Process one transaction
    ///
    /// Returns `Error::ReorgDetected` if the transaction belongs to a block
    /// that replaced one already indexed at the same height, or to a height
    /// at or below the cursor that was never indexed. Every indexed height
    /// records its block hash, so the latter cannot be a replay.
    pub fn process(&self, decoded: &DecodedTransaction) -> Result<Processed> {
        let tx = &decoded.tx;
        let position = tx.position();

        if let Some(recorded) = self.storage.get_block_hash(tx.block_height)? {
            if recorded != tx.block_hash {
                tracing::warn!(
                    height = tx.block_height,
                    recorded = %recorded,
                    received = %tx.block_hash,
                    "Block hash mismatch"
                );
                return Err(Error::ReorgDetected {
                    height: tx.block_height,
                });
            }
        }

        if let Some(cursor) = self.storage.get_cursor()? {
            if position <= cursor {
                if self.storage.get_block_hash(tx.block_height)?.is_none() {
                    tracing::warn!(
                        height = tx.block_height,
                        received = %tx.block_hash,
                        %cursor,
                        "Unindexed block below cursor"
                    );
                    return Err(Error::ReorgDetected {
                        height: tx.block_height,
                    });
                }
                tracing::debug!(tx_id = %tx.tx_id, %position, %cursor, "Already indexed");
                return Ok(Processed::AlreadyIndexed(position));
            }
        }

        let op = match &decoded.operation {
            Ok(op) => op,
            Err(err) => return self.reject(tx, RejectReason::MalformedMemo(err.clone())),
        };

        match self.validator.validate(op, tx, self.storage.as_ref())? {
            Verdict::Accept => {
                let applied = self.apply(op, tx)?;
                Ok(Processed::Indexed(Receipt {
                    tx_id: tx.tx_id.clone(),
                    position,
                    status: ReceiptStatus::Applied(applied),
                }))
            }
            Verdict::Reject(reason) => self.reject(tx, reason),
        }
    }

    /// Apply a validated operation
    ///
    /// Ledger mutation, receipt, journal entry and cursor are one atomic
    /// write. Calling this with an operation the validator rejected is an
    /// `InvariantViolation`.
    pub fn apply(&self, op: &Operation, tx: &ChainTransaction) -> Result<AppliedOperation> {
        let position = tx.position();
        let effect = self.plan(op, tx)?;

        let commit = Commit {
            position,
            block_hash: tx.block_hash.clone(),
            tickers: effect.tickers,
            balances: effect.balances,
            journal: JournalEntry {
                position,
                tx_id: tx.tx_id.clone(),
                prior_ticker: effect.prior_ticker,
                prior_balances: effect.prior_balances,
            },
            receipt: Receipt {
                tx_id: tx.tx_id.clone(),
                position,
                status: ReceiptStatus::Applied(effect.applied.clone()),
            },
        };
        self.storage.commit(&commit)?;

        tracing::info!(
            tx_id = %tx.tx_id,
            %position,
            op = %op,
            supply = effect.applied.supply_after,
            "Operation applied"
        );

        Ok(effect.applied)
    }

    /// Undo everything after `target`
    pub fn rollback_to(&self, target: Option<Cursor>) -> Result<RollbackSummary> {
        self.storage.rollback_to(target)
    }

    /// Undo every block at or above `fork_height`
    pub fn rollback_before(&self, fork_height: u64) -> Result<RollbackSummary> {
        let target = self.storage.cursor_before(fork_height)?;
        self.rollback_to(target)
    }

    fn reject(&self, tx: &ChainTransaction, reason: RejectReason) -> Result<Processed> {
        let position = tx.position();
        let receipt = Receipt {
            tx_id: tx.tx_id.clone(),
            position,
            status: ReceiptStatus::Rejected(reason.clone()),
        };

        let commit = Commit {
            position,
            block_hash: tx.block_hash.clone(),
            tickers: Vec::new(),
            balances: Vec::new(),
            journal: JournalEntry {
                position,
                tx_id: tx.tx_id.clone(),
                prior_ticker: None,
                prior_balances: Vec::new(),
            },
            receipt: receipt.clone(),
        };
        self.storage.commit(&commit)?;

        tracing::info!(tx_id = %tx.tx_id, %position, reason = %reason, "Transaction rejected");

        Ok(Processed::Rejected(receipt))
    }

    fn plan(&self, op: &Operation, tx: &ChainTransaction) -> Result<Effect> {
        match op {
            Operation::Deploy {
                ticker,
                max_supply,
                mint_cap_per_op,
                decimals,
            } => {
                if self.storage.get_ticker(ticker)?.is_some() {
                    return Err(Error::InvariantViolation(format!(
                        "deploy of registered ticker {}",
                        ticker
                    )));
                }
                let entry = TickerEntry {
                    ticker: ticker.clone(),
                    max_supply: *max_supply,
                    minted_supply: 0,
                    mint_cap_per_op: *mint_cap_per_op,
                    decimals: *decimals,
                    deployer: tx.sender.clone(),
                    deploy_tx_id: tx.tx_id.clone(),
                    deploy_position: tx.position(),
                    deployed_at: tx.block_time,
                };
                Ok(Effect {
                    applied: AppliedOperation {
                        operation: op.clone(),
                        supply_before: 0,
                        supply_after: 0,
                        balance_changes: Vec::new(),
                    },
                    tickers: vec![entry],
                    balances: Vec::new(),
                    prior_ticker: Some((ticker.clone(), None)),
                    prior_balances: Vec::new(),
                })
            }

            Operation::Mint { ticker, amount }
            | Operation::BulkMint {
                ticker,
                total_amount: amount,
            } => self.plan_mint(op, ticker, *amount, &tx.recipient),

            Operation::Transfer { ticker, amount } => {
                self.plan_transfer(op, ticker, *amount, &tx.sender, &tx.recipient)
            }
        }
    }

    fn plan_mint(
        &self,
        op: &Operation,
        ticker: &Ticker,
        amount: u128,
        recipient: &Address,
    ) -> Result<Effect> {
        let prior = self.storage.get_ticker(ticker)?.ok_or_else(|| {
            Error::InvariantViolation(format!("mint of unregistered ticker {}", ticker))
        })?;

        let supply_after = prior
            .minted_supply
            .checked_add(amount)
            .filter(|supply| *supply <= prior.max_supply)
            .ok_or_else(|| {
                Error::InvariantViolation(format!("mint of {} exceeds {} max supply", amount, ticker))
            })?;

        let before = self.storage.get_balance(ticker, recipient)?;
        let after = before.checked_add(amount).ok_or_else(|| {
            Error::InvariantViolation(format!("balance overflow for {}", recipient))
        })?;

        let mut entry = prior.clone();
        entry.minted_supply = supply_after;

        Ok(Effect {
            applied: AppliedOperation {
                operation: op.clone(),
                supply_before: prior.minted_supply,
                supply_after,
                balance_changes: vec![BalanceChange {
                    address: recipient.clone(),
                    before,
                    after,
                }],
            },
            tickers: vec![entry],
            balances: vec![(ticker.clone(), recipient.clone(), after)],
            prior_ticker: Some((ticker.clone(), Some(prior))),
            prior_balances: vec![(ticker.clone(), recipient.clone(), before)],
        })
    }

    fn plan_transfer(
        &self,
        op: &Operation,
        ticker: &Ticker,
        amount: u128,
        sender: &Address,
        recipient: &Address,
    ) -> Result<Effect> {
        let entry = self.storage.get_ticker(ticker)?.ok_or_else(|| {
            Error::InvariantViolation(format!("transfer of unregistered ticker {}", ticker))
        })?;

        let sender_before = self.storage.get_balance(ticker, sender)?;
        let sender_after = sender_before.checked_sub(amount).ok_or_else(|| {
            Error::InvariantViolation(format!("transfer overdraws {}", sender))
        })?;

        let mut changes = vec![BalanceChange {
            address: sender.clone(),
            before: sender_before,
            after: sender_after,
        }];

        if recipient == sender {
            changes[0].after = sender_before;
        } else {
            let recipient_before = self.storage.get_balance(ticker, recipient)?;
            // Bounded by minted supply, which fits u128
            let recipient_after = recipient_before.checked_add(amount).ok_or_else(|| {
                Error::InvariantViolation(format!("balance overflow for {}", recipient))
            })?;
            changes.push(BalanceChange {
                address: recipient.clone(),
                before: recipient_before,
                after: recipient_after,
            });
        }

        let balances = changes
            .iter()
            .map(|c| (ticker.clone(), c.address.clone(), c.after))
            .collect();
        let prior_balances = changes
            .iter()
            .map(|c| (ticker.clone(), c.address.clone(), c.before))
            .collect();

        Ok(Effect {
            applied: AppliedOperation {
                operation: op.clone(),
                supply_before: entry.minted_supply,
                supply_after: entry.minted_supply,
                balance_changes: changes,
            },
            tickers: Vec::new(),
            balances,
            prior_ticker: None,
            prior_balances,
        })
    }
}
