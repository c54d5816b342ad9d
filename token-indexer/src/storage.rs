//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `tickers` - Ticker registry (key: ticker)
//! - `balances` - Balance records (key: ticker || '|' || address, value: u128 BE)
//! - `receipts` - Per-transaction outcome (key: block_height BE || tx_index BE)
//! - `tx_ids` - Positions indexed under a transaction ID (key: tx_id || 0x00 || position)
//! - `journal` - Undo records (key: block_height BE || tx_index BE)
//! - `blocks` - Block hash of every indexed height (key: block_height BE)
//! - `meta` - Processing cursor
//!
//! Every indexed transaction lands as one `WriteBatch`, so ledger state,
//! receipt, journal and cursor never disagree after a crash.

use crate::{
    digest::{hash_bytes, merkle_root},
    error::{Error, Result},
    types::{Address, Cursor, Receipt, Ticker, TickerEntry},
    validator::LedgerView,
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, WriteOptions, DB,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Column family names
const CF_TICKERS: &str = "tickers";
const CF_BALANCES: &str = "balances";
const CF_RECEIPTS: &str = "receipts";
const CF_TX_IDS: &str = "tx_ids";
const CF_JOURNAL: &str = "journal";
const CF_BLOCKS: &str = "blocks";
const CF_META: &str = "meta";

const ALL_CFS: [&str; 7] = [
    CF_TICKERS,
    CF_BALANCES,
    CF_RECEIPTS,
    CF_TX_IDS,
    CF_JOURNAL,
    CF_BLOCKS,
    CF_META,
];

const META_CURSOR: &[u8] = b"cursor";

const BALANCE_SEPARATOR: u8 = b'|';

const TX_ID_SEPARATOR: u8 = 0;

/// Prior values of everything one transaction touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position of the transaction
    pub position: Cursor,

    /// Transaction ID
    pub tx_id: String,

    /// Registry entry before the write, if the transaction wrote one
    pub prior_ticker: Option<(Ticker, Option<TickerEntry>)>,

    /// Balances before the write
    pub prior_balances: Vec<(Ticker, Address, u128)>,
}

/// Everything one indexed transaction writes, committed atomically
#[derive(Debug, Clone)]
pub struct Commit {
    /// New cursor
    pub position: Cursor,

    /// Hash of the block containing the transaction
    pub block_hash: String,

    /// Registry entries to write
    pub tickers: Vec<TickerEntry>,

    /// Balances to write (zero deletes the record)
    pub balances: Vec<(Ticker, Address, u128)>,

    /// Undo record
    pub journal: JournalEntry,

    /// Outcome record
    pub receipt: Receipt,
}

/// Result of a rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackSummary {
    /// Cursor after rollback
    pub cursor: Option<Cursor>,

    /// Number of transactions undone
    pub undone: usize,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_level_zero_file_num_compaction_trigger(
            config.rocksdb.level0_file_num_compaction_trigger,
        );
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_TICKERS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_balances()),
            ColumnFamilyDescriptor::new(CF_RECEIPTS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_TX_IDS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_JOURNAL, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_BLOCKS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = ?path,
            column_families = ALL_CFS.iter().filter(|cf| db.cf_handle(cf).is_some()).count(),
            "Opened RocksDB"
        );

        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // State is read on every validation, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_balances() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    // Key helpers

    fn balance_key(ticker: &Ticker, address: &Address) -> Vec<u8> {
        let mut key = Self::balance_prefix(ticker);
        key.extend_from_slice(address.as_str().as_bytes());
        key
    }

    fn balance_prefix(ticker: &Ticker) -> Vec<u8> {
        let mut key = ticker.as_str().as_bytes().to_vec();
        key.push(BALANCE_SEPARATOR);
        key
    }

    fn tx_id_key(tx_id: &str, position: Cursor) -> Vec<u8> {
        let mut key = Self::tx_id_prefix(tx_id);
        key.extend_from_slice(&position.to_key());
        key
    }

    fn tx_id_prefix(tx_id: &str) -> Vec<u8> {
        let mut key = tx_id.as_bytes().to_vec();
        key.push(TX_ID_SEPARATOR);
        key
    }

    fn decode_balance(value: &[u8]) -> Result<u128> {
        let bytes: [u8; 16] = value
            .try_into()
            .map_err(|_| Error::Storage(format!("Corrupt balance of {} bytes", value.len())))?;
        Ok(u128::from_be_bytes(bytes))
    }

    // Reads

    /// Get ticker registry entry
    pub fn get_ticker(&self, ticker: &Ticker) -> Result<Option<TickerEntry>> {
        let cf = self.cf_handle(CF_TICKERS)?;
        match self.db.get_cf(cf, ticker.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get balance (zero when absent)
    pub fn get_balance(&self, ticker: &Ticker, address: &Address) -> Result<u128> {
        let cf = self.cf_handle(CF_BALANCES)?;
        match self.db.get_cf(cf, Self::balance_key(ticker, address))? {
            Some(value) => Self::decode_balance(&value),
            None => Ok(0),
        }
    }

    /// Get receipt of the transaction at `position`
    pub fn get_receipt_at(&self, position: Cursor) -> Result<Option<Receipt>> {
        let cf = self.cf_handle(CF_RECEIPTS)?;
        match self.db.get_cf(cf, position.to_key())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get every receipt recorded under a transaction ID, in chain order
    ///
    /// One contract call can emit several memo transfers sharing a tx_id.
    pub fn get_receipts(&self, tx_id: &str) -> Result<Vec<Receipt>> {
        self.snapshot().receipts(tx_id)
    }

    /// Get recorded block hash for a height
    pub fn get_block_hash(&self, height: u64) -> Result<Option<String>> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self.db.get_cf(cf, height.to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get processing cursor (`None` before the first transaction)
    pub fn get_cursor(&self) -> Result<Option<Cursor>> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(cf, META_CURSOR)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Last journaled position strictly below `height`
    pub fn cursor_before(&self, height: u64) -> Result<Option<Cursor>> {
        let cf = self.cf_handle(CF_JOURNAL)?;
        let bound = Cursor::new(height, 0);
        let bound_key = bound.to_key();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&bound_key[..], Direction::Reverse));

        for item in iter {
            let (key, _) = item?;
            let position = Cursor::from_key(&key)
                .ok_or_else(|| Error::Storage("Corrupt journal key".to_string()))?;
            if position < bound {
                return Ok(Some(position));
            }
        }

        Ok(None)
    }

    // Writes

    /// Commit one indexed transaction (atomic)
    pub fn commit(&self, commit: &Commit) -> Result<()> {
        let mut batch = WriteBatch::default();

        // 1. Registry
        let cf_tickers = self.cf_handle(CF_TICKERS)?;
        for entry in &commit.tickers {
            batch.put_cf(cf_tickers, entry.ticker.as_str().as_bytes(), bincode::serialize(entry)?);
        }

        // 2. Balances
        let cf_balances = self.cf_handle(CF_BALANCES)?;
        for (ticker, address, amount) in &commit.balances {
            let key = Self::balance_key(ticker, address);
            if *amount == 0 {
                batch.delete_cf(cf_balances, key);
            } else {
                batch.put_cf(cf_balances, key, amount.to_be_bytes());
            }
        }

        // 3. Receipt and its tx_id index entry
        let cf_receipts = self.cf_handle(CF_RECEIPTS)?;
        batch.put_cf(
            cf_receipts,
            commit.position.to_key(),
            bincode::serialize(&commit.receipt)?,
        );
        let cf_tx_ids = self.cf_handle(CF_TX_IDS)?;
        batch.put_cf(
            cf_tx_ids,
            Self::tx_id_key(&commit.receipt.tx_id, commit.position),
            b"",
        );

        // 4. Journal
        let cf_journal = self.cf_handle(CF_JOURNAL)?;
        batch.put_cf(
            cf_journal,
            commit.position.to_key(),
            bincode::serialize(&commit.journal)?,
        );

        // 5. Block hash
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        batch.put_cf(
            cf_blocks,
            commit.position.block_height.to_be_bytes(),
            bincode::serialize(&commit.block_hash)?,
        );

        // 6. Cursor
        let cf_meta = self.cf_handle(CF_META)?;
        batch.put_cf(cf_meta, META_CURSOR, bincode::serialize(&commit.position)?);

        self.write(batch)?;

        tracing::debug!(
            tx_id = %commit.receipt.tx_id,
            position = %commit.position,
            applied = commit.receipt.is_applied(),
            "Transaction committed"
        );

        Ok(())
    }

    /// Undo every transaction after `target` (atomic)
    ///
    /// Journal entries are replayed newest first into a single batch; later
    /// batch operations win, so each key ends at its oldest prior value.
    ///
    /// `target` must be `None` or a journaled position at or below the
    /// cursor. Anything else would move the cursor over transactions that
    /// were never indexed.
    pub fn rollback_to(&self, target: Option<Cursor>) -> Result<RollbackSummary> {
        let cf_journal = self.cf_handle(CF_JOURNAL)?;
        let cf_tickers = self.cf_handle(CF_TICKERS)?;
        let cf_balances = self.cf_handle(CF_BALANCES)?;
        let cf_receipts = self.cf_handle(CF_RECEIPTS)?;
        let cf_tx_ids = self.cf_handle(CF_TX_IDS)?;
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_meta = self.cf_handle(CF_META)?;

        if let Some(target) = target {
            let cursor = self.get_cursor()?;
            if cursor.map_or(true, |cursor| target > cursor) {
                return Err(Error::InvariantViolation(format!(
                    "rollback target {} is ahead of cursor {:?}",
                    target, cursor
                )));
            }
            if self.db.get_cf(cf_journal, target.to_key())?.is_none() {
                return Err(Error::InvariantViolation(format!(
                    "rollback target {} was never indexed",
                    target
                )));
            }
        }

        let mut batch = WriteBatch::default();
        let mut undone = 0usize;

        for item in self.db.iterator_cf(cf_journal, IteratorMode::End) {
            let (key, value) = item?;
            let entry: JournalEntry = bincode::deserialize(&value)?;
            if target.map_or(false, |t| entry.position <= t) {
                break;
            }

            if let Some((ticker, prior)) = &entry.prior_ticker {
                match prior {
                    Some(prior) => batch.put_cf(cf_tickers, ticker.as_str().as_bytes(), bincode::serialize(prior)?),
                    None => batch.delete_cf(cf_tickers, ticker.as_str().as_bytes()),
                }
            }

            for (ticker, address, amount) in &entry.prior_balances {
                let balance_key = Self::balance_key(ticker, address);
                if *amount == 0 {
                    batch.delete_cf(cf_balances, balance_key);
                } else {
                    batch.put_cf(cf_balances, balance_key, amount.to_be_bytes());
                }
            }

            batch.delete_cf(cf_receipts, entry.position.to_key());
            batch.delete_cf(cf_tx_ids, Self::tx_id_key(&entry.tx_id, entry.position));
            batch.delete_cf(cf_journal, key);
            undone += 1;
        }

        // Forget block hashes above the target height
        let first_dropped = target.map_or(0, |t| t.block_height + 1);
        let start = first_dropped.to_be_bytes();
        for item in self
            .db
            .iterator_cf(cf_blocks, IteratorMode::From(&start[..], Direction::Forward))
        {
            let (key, _) = item?;
            batch.delete_cf(cf_blocks, key);
        }

        match target {
            Some(cursor) => batch.put_cf(cf_meta, META_CURSOR, bincode::serialize(&cursor)?),
            None => batch.delete_cf(cf_meta, META_CURSOR),
        }

        self.write(batch)?;

        tracing::info!(
            to = ?target,
            undone,
            "Ledger rolled back"
        );

        Ok(RollbackSummary {
            cursor: target,
            undone,
        })
    }

    // Snapshots

    /// Consistent point-in-time view for readers
    pub fn snapshot(&self) -> LedgerSnapshot<'_> {
        LedgerSnapshot {
            storage: self,
            snapshot: self.db.snapshot(),
        }
    }

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_tickers: self.approximate_count(self.cf_handle(CF_TICKERS)?)?,
            total_balances: self.approximate_count(self.cf_handle(CF_BALANCES)?)?,
            total_receipts: self.approximate_count(self.cf_handle(CF_RECEIPTS)?)?,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(prop)
    }
}

impl LedgerView for Storage {
    fn ticker(&self, ticker: &Ticker) -> Result<Option<TickerEntry>> {
        self.get_ticker(ticker)
    }

    fn balance(&self, ticker: &Ticker, address: &Address) -> Result<u128> {
        self.get_balance(ticker, address)
    }
}

/// Point-in-time ledger view backed by a RocksDB snapshot
pub struct LedgerSnapshot<'a> {
    storage: &'a Storage,
    snapshot: rocksdb::Snapshot<'a>,
}

impl std::fmt::Debug for LedgerSnapshot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerSnapshot").finish_non_exhaustive()
    }
}

impl<'a> LedgerSnapshot<'a> {
    /// Cursor as of the snapshot
    pub fn cursor(&self) -> Result<Option<Cursor>> {
        let cf = self.storage.cf_handle(CF_META)?;
        match self.snapshot.get_cf(cf, META_CURSOR)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Receipt at a position as of the snapshot
    pub fn receipt_at(&self, position: Cursor) -> Result<Option<Receipt>> {
        let cf = self.storage.cf_handle(CF_RECEIPTS)?;
        match self.snapshot.get_cf(cf, position.to_key())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Receipts recorded under a transaction ID, in chain order
    pub fn receipts(&self, tx_id: &str) -> Result<Vec<Receipt>> {
        let cf = self.storage.cf_handle(CF_TX_IDS)?;
        let prefix = Storage::tx_id_prefix(tx_id);

        let mut receipts = Vec::new();
        let iter = self
            .snapshot
            .iterator_cf(cf, IteratorMode::From(&prefix[..], Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            // Longer tx_ids can share the prefix
            let Some(position) = Cursor::from_key(&key[prefix.len()..]) else {
                continue;
            };
            let receipt = self.receipt_at(position)?.ok_or_else(|| {
                Error::Storage(format!("Missing receipt at {} for {}", position, tx_id))
            })?;
            receipts.push(receipt);
        }
        Ok(receipts)
    }

    /// All registry entries, in ticker order
    pub fn tickers(&self) -> Result<Vec<TickerEntry>> {
        let cf = self.storage.cf_handle(CF_TICKERS)?;
        let mut entries = Vec::new();
        for item in self.snapshot.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    /// All non-zero balances of a ticker, in address order
    pub fn holders(&self, ticker: &Ticker) -> Result<Vec<(Address, u128)>> {
        let cf = self.storage.cf_handle(CF_BALANCES)?;
        let prefix = Storage::balance_prefix(ticker);

        let mut holders = Vec::new();
        let iter = self
            .snapshot
            .iterator_cf(cf, IteratorMode::From(&prefix[..], Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let address = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            holders.push((Address::new(address), Storage::decode_balance(&value)?));
        }
        Ok(holders)
    }

    /// Merkle root over cursor, registry and balances
    ///
    /// Equal roots mean byte-identical ledger state.
    pub fn state_root(&self) -> Result<[u8; 32]> {
        let mut leaves = Vec::new();

        let cursor = bincode::serialize(&self.cursor()?)?;
        leaves.push(hash_bytes(&cursor));

        for name in [CF_TICKERS, CF_BALANCES] {
            let cf = self.storage.cf_handle(name)?;
            for item in self.snapshot.iterator_cf(cf, IteratorMode::Start) {
                let (key, value) = item?;
                let mut leaf = Vec::with_capacity(key.len() + value.len() + 1);
                leaf.extend_from_slice(&key);
                leaf.push(0);
                leaf.extend_from_slice(&value);
                leaves.push(hash_bytes(&leaf));
            }
        }

        Ok(merkle_root(&leaves))
    }
}

impl LedgerView for LedgerSnapshot<'_> {
    fn ticker(&self, ticker: &Ticker) -> Result<Option<TickerEntry>> {
        let cf = self.storage.cf_handle(CF_TICKERS)?;
        match self.snapshot.get_cf(cf, ticker.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn balance(&self, ticker: &Ticker, address: &Address) -> Result<u128> {
        let cf = self.storage.cf_handle(CF_BALANCES)?;
        match self.snapshot.get_cf(cf, Storage::balance_key(ticker, address))? {
            Some(value) => Storage::decode_balance(&value),
            None => Ok(0),
        }
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Registered tickers (estimate)
    pub total_tickers: u64,
    /// Non-zero balance records (estimate)
    pub total_balances: u64,
    /// Indexed transactions (estimate)
    pub total_receipts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Operation;
    use crate::types::{AppliedOperation, BalanceChange, ReceiptStatus, RejectReason};
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (config, temp_dir)
    }

    fn stxs() -> Ticker {
        Ticker::parse("STXS").unwrap()
    }

    fn entry(minted_supply: u128) -> TickerEntry {
        TickerEntry {
            ticker: stxs(),
            max_supply: 1_000_000,
            minted_supply,
            mint_cap_per_op: 1000,
            decimals: 0,
            deployer: Address::new("SP1"),
            deploy_tx_id: "0xdeploy".to_string(),
            deploy_position: Cursor::new(1, 0),
            deployed_at: None,
        }
    }

    fn mint_commit(position: Cursor, tx_id: &str, supply_before: u128, amount: u128) -> Commit {
        let holder = Address::new("SP2");
        let op = Operation::BulkMint {
            ticker: stxs(),
            total_amount: amount,
        };
        Commit {
            position,
            block_hash: format!("0x{:02x}", position.block_height),
            tickers: vec![entry(supply_before + amount)],
            balances: vec![(stxs(), holder.clone(), supply_before + amount)],
            journal: JournalEntry {
                position,
                tx_id: tx_id.to_string(),
                prior_ticker: Some((stxs(), Some(entry(supply_before)))),
                prior_balances: vec![(stxs(), holder.clone(), supply_before)],
            },
            receipt: Receipt {
                tx_id: tx_id.to_string(),
                position,
                status: ReceiptStatus::Applied(AppliedOperation {
                    operation: op,
                    supply_before,
                    supply_after: supply_before + amount,
                    balance_changes: vec![BalanceChange {
                        address: holder,
                        before: supply_before,
                        after: supply_before + amount,
                    }],
                }),
            },
        }
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        for cf in ALL_CFS {
            assert!(storage.db.cf_handle(cf).is_some());
        }
        assert_eq!(storage.get_cursor().unwrap(), None);
    }

    #[test]
    fn test_commit_and_read() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let position = Cursor::new(5, 1);
        storage.commit(&mint_commit(position, "0xa", 0, 1000)).unwrap();

        assert_eq!(storage.get_cursor().unwrap(), Some(position));
        assert_eq!(storage.get_ticker(&stxs()).unwrap().unwrap().minted_supply, 1000);
        assert_eq!(storage.get_balance(&stxs(), &Address::new("SP2")).unwrap(), 1000);
        assert_eq!(storage.get_block_hash(5).unwrap().as_deref(), Some("0x05"));
        assert!(storage.get_receipt_at(position).unwrap().unwrap().is_applied());
        assert_eq!(storage.get_receipts("0xa").unwrap().len(), 1);
    }

    #[test]
    fn test_rejection_commit_advances_cursor_only() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let position = Cursor::new(3, 0);
        let commit = Commit {
            position,
            block_hash: "0x03".to_string(),
            tickers: vec![],
            balances: vec![],
            journal: JournalEntry {
                position,
                tx_id: "0xbad".to_string(),
                prior_ticker: None,
                prior_balances: vec![],
            },
            receipt: Receipt {
                tx_id: "0xbad".to_string(),
                position,
                status: ReceiptStatus::Rejected(RejectReason::UnknownTicker),
            },
        };
        storage.commit(&commit).unwrap();

        assert_eq!(storage.get_cursor().unwrap(), Some(position));
        assert!(storage.get_ticker(&stxs()).unwrap().is_none());
        let receipt = storage.get_receipt_at(position).unwrap().unwrap();
        assert_eq!(receipt.reject_reason(), Some(&RejectReason::UnknownTicker));
    }

    #[test]
    fn test_rollback_restores_prior_state() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        storage.commit(&mint_commit(Cursor::new(1, 0), "0xa", 0, 100)).unwrap();
        let root_after_first = storage.snapshot().state_root().unwrap();

        storage.commit(&mint_commit(Cursor::new(2, 0), "0xb", 100, 200)).unwrap();
        storage.commit(&mint_commit(Cursor::new(2, 1), "0xc", 300, 300)).unwrap();
        assert_eq!(storage.get_ticker(&stxs()).unwrap().unwrap().minted_supply, 600);

        let target = storage.cursor_before(2).unwrap();
        assert_eq!(target, Some(Cursor::new(1, 0)));

        let summary = storage.rollback_to(target).unwrap();
        assert_eq!(summary.undone, 2);
        assert_eq!(storage.get_cursor().unwrap(), Some(Cursor::new(1, 0)));
        assert_eq!(storage.get_ticker(&stxs()).unwrap().unwrap().minted_supply, 100);
        assert_eq!(storage.get_balance(&stxs(), &Address::new("SP2")).unwrap(), 100);
        assert!(storage.get_receipts("0xb").unwrap().is_empty());
        assert!(storage.get_receipt_at(Cursor::new(2, 1)).unwrap().is_none());
        assert!(storage.get_block_hash(2).unwrap().is_none());
        assert_eq!(storage.snapshot().state_root().unwrap(), root_after_first);
    }

    #[test]
    fn test_rollback_to_genesis() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        storage.commit(&mint_commit(Cursor::new(1, 0), "0xa", 0, 100)).unwrap();
        assert_eq!(storage.cursor_before(1).unwrap(), None);

        storage.rollback_to(None).unwrap();
        assert_eq!(storage.get_cursor().unwrap(), None);
        assert!(storage.get_block_hash(1).unwrap().is_none());
        assert_eq!(storage.get_balance(&stxs(), &Address::new("SP2")).unwrap(), 0);
        assert_eq!(storage.get_ticker(&stxs()).unwrap().unwrap().minted_supply, 0);
        assert!(storage.get_receipts("0xa").unwrap().is_empty());
    }

    #[test]
    fn test_rollback_target_ahead_of_cursor_rejected() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        assert!(matches!(
            storage.rollback_to(Some(Cursor::new(1, 0))),
            Err(Error::InvariantViolation(_))
        ));
        assert_eq!(storage.get_cursor().unwrap(), None);

        storage.commit(&mint_commit(Cursor::new(1, 0), "0xa", 0, 100)).unwrap();
        let result = storage.rollback_to(Some(Cursor::new(9, 0)));
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
        assert_eq!(storage.get_cursor().unwrap(), Some(Cursor::new(1, 0)));
        assert_eq!(storage.get_ticker(&stxs()).unwrap().unwrap().minted_supply, 100);
    }

    #[test]
    fn test_rollback_target_must_be_journaled() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        storage.commit(&mint_commit(Cursor::new(5, 0), "0xa", 0, 100)).unwrap();
        storage.commit(&mint_commit(Cursor::new(5, 1), "0xb", 100, 100)).unwrap();
        storage.commit(&mint_commit(Cursor::new(9, 0), "0xc", 200, 100)).unwrap();

        let result = storage.rollback_to(Some(Cursor::new(5, 3)));
        assert!(matches!(result, Err(Error::InvariantViolation(_))));
        assert_eq!(storage.get_cursor().unwrap(), Some(Cursor::new(9, 0)));
        assert_eq!(storage.get_ticker(&stxs()).unwrap().unwrap().minted_supply, 300);

        // The cursor itself is a valid no-op target
        let summary = storage.rollback_to(Some(Cursor::new(9, 0))).unwrap();
        assert_eq!(summary.undone, 0);

        let summary = storage.rollback_to(Some(Cursor::new(5, 1))).unwrap();
        assert_eq!(summary.undone, 1);
        assert_eq!(storage.get_cursor().unwrap(), Some(Cursor::new(5, 1)));
    }

    #[test]
    fn test_shared_tx_id_keeps_every_receipt() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        // One contract call emitting two memo transfers
        storage.commit(&mint_commit(Cursor::new(1, 0), "0xa", 0, 100)).unwrap();
        storage.commit(&mint_commit(Cursor::new(2, 0), "fan", 100, 10)).unwrap();
        storage.commit(&mint_commit(Cursor::new(2, 1), "fan", 110, 20)).unwrap();

        let receipts = storage.get_receipts("fan").unwrap();
        let positions: Vec<_> = receipts.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![Cursor::new(2, 0), Cursor::new(2, 1)]);
        assert!(storage.get_receipts("fa").unwrap().is_empty());

        storage.rollback_to(Some(Cursor::new(2, 0))).unwrap();
        let receipts = storage.get_receipts("fan").unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].position, Cursor::new(2, 0));
        assert!(storage.get_receipt_at(Cursor::new(2, 0)).unwrap().is_some());
        assert!(storage.get_receipt_at(Cursor::new(2, 1)).unwrap().is_none());
        assert_eq!(storage.get_ticker(&stxs()).unwrap().unwrap().minted_supply, 110);
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        storage.commit(&mint_commit(Cursor::new(1, 0), "0xa", 0, 100)).unwrap();
        let snapshot = storage.snapshot();

        storage.commit(&mint_commit(Cursor::new(2, 0), "0xb", 100, 50)).unwrap();

        assert_eq!(snapshot.balance(&stxs(), &Address::new("SP2")).unwrap(), 100);
        assert_eq!(snapshot.cursor().unwrap(), Some(Cursor::new(1, 0)));
        assert!(snapshot.receipts("0xb").unwrap().is_empty());
        assert_eq!(storage.get_balance(&stxs(), &Address::new("SP2")).unwrap(), 150);
    }

    #[test]
    fn test_holders_scan_stays_within_ticker() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let other = Ticker::parse("STXSA").unwrap();
        let position = Cursor::new(1, 0);
        let mut commit = mint_commit(position, "0xa", 0, 100);
        commit.balances.push((other.clone(), Address::new("SP9"), 7));
        storage.commit(&commit).unwrap();

        let snapshot = storage.snapshot();
        assert_eq!(
            snapshot.holders(&stxs()).unwrap(),
            vec![(Address::new("SP2"), 100)]
        );
        assert_eq!(
            snapshot.holders(&other).unwrap(),
            vec![(Address::new("SP9"), 7)]
        );
    }
}
