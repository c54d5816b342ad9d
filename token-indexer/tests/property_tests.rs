//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Decode determinism: Same memo bytes → same operation or error
//! - Supply cap: minted_supply ≤ max_supply after every transaction
//! - Conservation: Σ(balances) ≤ minted_supply, minted = Σ(accepted mints)
//! - Idempotent replay: Same transactions → byte-identical state
//! - Order sensitivity: Later validity depends on earlier applies

use proptest::prelude::*;
use std::sync::Arc;
use token_indexer::{
    decode, Address, ChainTransaction, Config, DecodedTransaction, LedgerStore, LedgerView,
    Processed, ReceiptStatus, RejectReason, Storage, Ticker, Validator,
};

const MAX_SUPPLY: u128 = 100_000;

/// Ledger store over a temp directory
struct TestStore {
    store: LedgerStore,
    _temp_dir: tempfile::TempDir,
}

fn create_test_store() -> TestStore {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.rocksdb.sync_writes = false; // No fsync in tests

    let storage = Arc::new(Storage::open(&config).unwrap());
    TestStore {
        store: LedgerStore::new(storage, Validator::default()),
        _temp_dir: temp_dir,
    }
}

fn stxs() -> Ticker {
    Ticker::parse("STXS").unwrap()
}

fn address(idx: u8) -> Address {
    Address::new(format!("SP_HOLDER_{}", idx))
}

/// Protocol operation drawn by the strategies
#[derive(Debug, Clone)]
enum Op {
    BulkMint { amount: u128, to: u8 },
    Mint { amount: u128, to: u8 },
    Transfer { amount: u128, from: u8, to: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u128..40_000, 0u8..4).prop_map(|(amount, to)| Op::BulkMint { amount, to }),
        (0u128..2_000, 0u8..4).prop_map(|(amount, to)| Op::Mint { amount, to }),
        (0u128..20_000, 0u8..4, 0u8..4)
            .prop_map(|(amount, from, to)| Op::Transfer { amount, from, to }),
    ]
}

fn chain_tx(height: u64, memo: String, sender: Address, recipient: Address) -> ChainTransaction {
    ChainTransaction {
        block_height: height,
        block_hash: format!("0x{:08x}", height),
        tx_index: 0,
        tx_id: format!("0xtx{}", height),
        sender,
        recipient,
        stx_amount: 1,
        memo: memo.into_bytes(),
        block_time: None,
    }
}

/// Deploy at height 1, then one transaction per op
fn transactions(ops: &[Op]) -> Vec<ChainTransaction> {
    let deployer = Address::new("SP_DEPLOYER");
    let mut txs = vec![chain_tx(
        1,
        format!("dSTXS{}:1000", MAX_SUPPLY),
        deployer.clone(),
        deployer.clone(),
    )];

    for (i, op) in ops.iter().enumerate() {
        let height = i as u64 + 2;
        let tx = match op {
            Op::BulkMint { amount, to } => {
                chain_tx(height, format!("bSTXS{}", amount), deployer.clone(), address(*to))
            }
            Op::Mint { amount, to } => {
                chain_tx(height, format!("mSTXS{}", amount), deployer.clone(), address(*to))
            }
            Op::Transfer { amount, from, to } => {
                chain_tx(height, format!("tSTXS{}", amount), address(*from), address(*to))
            }
        };
        txs.push(tx);
    }
    txs
}

fn process_all(store: &LedgerStore, txs: &[ChainTransaction]) -> Vec<Processed> {
    txs.iter()
        .map(|tx| store.process(&DecodedTransaction::decode(tx.clone())).unwrap())
        .collect()
}

fn holders_total(store: &LedgerStore) -> u128 {
    store
        .snapshot()
        .holders(&stxs())
        .unwrap()
        .into_iter()
        .map(|(_, amount)| amount)
        .sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: decode is a pure function of the memo bytes
    #[test]
    fn prop_decode_deterministic(memo in prop::collection::vec(any::<u8>(), 0..34)) {
        prop_assert_eq!(decode(&memo), decode(&memo));
    }

    /// Property: well-formed bulk memos decode to their amount
    #[test]
    fn prop_bulk_memo_decodes(ticker in "[A-Z]{3,8}", amount in 1u128..u128::MAX) {
        let memo = format!("b{}{}", ticker, amount);
        match decode(memo.as_bytes()) {
            Ok(token_indexer::Operation::BulkMint { ticker: t, total_amount }) => {
                prop_assert_eq!(t.as_str(), ticker.as_str());
                prop_assert_eq!(total_amount, amount);
            }
            other => prop_assert!(false, "unexpected decode {:?}", other),
        }
    }

    /// Property: lowercase tickers never decode
    #[test]
    fn prop_lowercase_ticker_malformed(ticker in "[a-z]{3,8}", amount in 1u64..1_000_000) {
        let memo = format!("b{}{}", ticker, amount);
        prop_assert!(decode(memo.as_bytes()).is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: supply cap and conservation hold after every transaction
    #[test]
    fn prop_supply_invariant(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let test = create_test_store();
        let mut accepted_mints = 0u128;

        for tx in transactions(&ops) {
            let outcome = test.store.process(&DecodedTransaction::decode(tx)).unwrap();

            if let Processed::Indexed(receipt) = &outcome {
                if let ReceiptStatus::Applied(applied) = &receipt.status {
                    accepted_mints += applied.supply_after - applied.supply_before;
                }
            }

            let entry = test.store.storage().ticker(&stxs()).unwrap().unwrap();
            prop_assert!(entry.minted_supply <= entry.max_supply);
            prop_assert_eq!(entry.minted_supply, accepted_mints);
            prop_assert!(holders_total(&test.store) <= entry.minted_supply);
        }
    }

    /// Property: re-running the same transactions changes nothing
    #[test]
    fn prop_idempotent_replay(ops in prop::collection::vec(op_strategy(), 1..20)) {
        let test = create_test_store();
        let txs = transactions(&ops);

        process_all(&test.store, &txs);
        let root = test.store.snapshot().state_root().unwrap();

        let replayed = process_all(&test.store, &txs);
        prop_assert!(replayed.iter().all(|p| matches!(p, Processed::AlreadyIndexed(_))));
        prop_assert_eq!(test.store.snapshot().state_root().unwrap(), root);

        // An independent indexer converges on the same state
        let other = create_test_store();
        process_all(&other.store, &txs);
        prop_assert_eq!(other.store.snapshot().state_root().unwrap(), root);
    }

    /// Property: rolling back and replaying the same blocks restores the state
    #[test]
    fn prop_rollback_then_replay(
        ops in prop::collection::vec(op_strategy(), 2..20),
        fork in 0usize..20,
    ) {
        let test = create_test_store();
        let txs = transactions(&ops);

        process_all(&test.store, &txs);
        let root = test.store.snapshot().state_root().unwrap();

        let fork_height = (fork % txs.len()) as u64 + 1;
        test.store.rollback_before(fork_height).unwrap();
        let cursor = test.store.cursor().unwrap();
        prop_assert!(cursor.map_or(true, |c| c.block_height < fork_height));

        process_all(&test.store, &txs);
        prop_assert_eq!(test.store.snapshot().state_root().unwrap(), root);
    }

    /// Property: with headroom for only one of A and B, whichever comes first wins
    #[test]
    fn prop_order_sensitivity(a in 1u128..MAX_SUPPLY, b in 1u128..MAX_SUPPLY) {
        prop_assume!(a + b > MAX_SUPPLY);

        let forward = create_test_store();
        let outcomes = process_all(
            &forward.store,
            &transactions(&[Op::BulkMint { amount: a, to: 0 }, Op::BulkMint { amount: b, to: 1 }]),
        );
        prop_assert!(matches!(outcomes[1], Processed::Indexed(_)));
        let rejected_b = matches!(
            &outcomes[2],
            Processed::Rejected(r) if matches!(r.reject_reason(), Some(RejectReason::SupplyExceeded { .. }))
        );
        prop_assert!(rejected_b);

        let reverse = create_test_store();
        let outcomes = process_all(
            &reverse.store,
            &transactions(&[Op::BulkMint { amount: b, to: 1 }, Op::BulkMint { amount: a, to: 0 }]),
        );
        prop_assert!(matches!(outcomes[1], Processed::Indexed(_)));
        prop_assert!(matches!(outcomes[2], Processed::Rejected(_)));

        let view = reverse.store.storage();
        prop_assert_eq!(view.balance(&stxs(), &address(1)).unwrap(), b);
        prop_assert_eq!(view.balance(&stxs(), &address(0)).unwrap(), 0);
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use token_indexer::{ChainEvent, Indexer};
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_fan_out_credits_each_recipient() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        let indexer = Indexer::open(config).await.unwrap();

        // A contract fanning out one bulk mint per recipient in the same block
        let mut events = vec![ChainEvent::Transaction(chain_tx(
            1,
            "dSTXS1000000:1000".to_string(),
            Address::new("SP_DEPLOYER"),
            Address::new("SP_DEPLOYER"),
        ))];
        for i in 0..4u8 {
            let mut tx = chain_tx(
                2,
                "bSTXS250".to_string(),
                Address::new("SP_CONTRACT"),
                address(i),
            );
            tx.tx_index = u32::from(i);
            tx.tx_id = format!("0xfan{}", i);
            events.push(ChainEvent::Transaction(tx));
        }

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let report = indexer
            .process_feed(tokio_stream::iter(events), shutdown_rx)
            .await
            .unwrap();

        assert_eq!(report.applied, 5);
        assert_eq!(indexer.ticker(&stxs()).unwrap().unwrap().minted_supply, 1000);
        let holders = indexer.holders(&stxs()).unwrap();
        assert_eq!(holders.len(), 4);
        assert!(holders.iter().all(|(_, amount)| *amount == 250));
        indexer.check_supply_invariant().unwrap();

        indexer.shutdown().await.unwrap();
    }
}
