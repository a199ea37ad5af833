//! Property tests for the ledger state machine.
//!
//! - Apply followed by rollback restores every account, index and pointer.
//! - Fork choice between two same-height blocks does not depend on arrival
//!   order.
//! - Genesis validates no matter what its header says.

use proptest::prelude::*;

use keel_protocol::crypto::{Address, Hash, Keypair, ZERO_HASH};
use keel_protocol::ledger::validator::{validate, Verdict};
use keel_protocol::ledger::Ledger;
use keel_protocol::storage::{Account, Block, Header, LedgerStore};
use keel_protocol::transaction::{sign_transaction, Transaction};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Four fixed keys so shrinking stays deterministic.
fn keys() -> Vec<Keypair> {
    (1u8..=4).map(|i| Keypair::from_seed(&[i; 32])).collect()
}

fn open_ledger(genesis_key: &Keypair) -> Ledger {
    let store = LedgerStore::open_temporary().unwrap();
    Ledger::open(store, &Block::genesis(genesis_key)).unwrap()
}

/// A ledger where the first key has earned a few rewards and spread some of
/// them to the others.
fn funded_ledger(keys: &[Keypair]) -> Ledger {
    let gk = &keys[0];
    let ledger = open_ledger(gk);
    for i in 0..5 {
        let block = Block::seal(&ledger.last_header().unwrap(), vec![], gk, 1_000 + i);
        ledger.link_block(&block).unwrap();
    }
    let funding: Vec<Transaction> = keys[1..]
        .iter()
        .enumerate()
        .map(|(i, kp)| transfer(gk, i as u64, kp.address(), 15))
        .collect();
    let block = Block::seal(&ledger.last_header().unwrap(), funding, gk, 9_000);
    ledger.link_block(&block).unwrap();
    ledger
}

fn transfer(from: &Keypair, nonce: u64, to: Address, value: u64) -> Transaction {
    let mut tx = Transaction::new(nonce, from.address(), Some(to), value, vec![]);
    sign_transaction(&mut tx, from);
    tx
}

#[derive(Debug, PartialEq)]
struct Snapshot {
    accounts: Vec<Option<Account>>,
    height: u32,
    tip: Hash,
    last_tx_number: Option<u32>,
    tx_count: u64,
}

fn snapshot(ledger: &Ledger, addresses: &[Address]) -> Snapshot {
    Snapshot {
        accounts: addresses
            .iter()
            .map(|a| ledger.account(a).unwrap())
            .collect(),
        height: ledger.height().unwrap(),
        tip: ledger.last_block().unwrap().hash(),
        last_tx_number: ledger.last_tx_number().unwrap(),
        tx_count: ledger.tx_count().unwrap(),
    }
}

/// (sender index, recipient index, value, nonce skew)
fn transfer_plan() -> impl Strategy<Value = (usize, usize, u64, u64)> {
    (0usize..4, 0usize..5, 0u64..25, prop_oneof![4 => Just(0u64), 1 => 1u64..3])
}

/// Turn plans into signed transactions with mostly-sequential nonces.
/// Recipient index 4 is a fresh address that has no account yet.
fn build_transfers(
    keys: &[Keypair],
    ledger: &Ledger,
    plans: &[(usize, usize, u64, u64)],
) -> Vec<Transaction> {
    let stranger = Keypair::from_seed(&[99; 32]).address();
    let mut next_nonce: Vec<u64> = keys
        .iter()
        .map(|k| ledger.nonce(&k.address()).unwrap().unwrap_or(0))
        .collect();

    plans
        .iter()
        .map(|&(from, to, value, skew)| {
            let to = if to == 4 { stranger } else { keys[to].address() };
            let nonce = next_nonce[from] + skew;
            if skew == 0 {
                next_nonce[from] += 1;
            }
            transfer(&keys[from], nonce, to, value)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn apply_then_rollback_restores_state(plans in prop::collection::vec(transfer_plan(), 0..12)) {
        let keys = keys();
        let ledger = funded_ledger(&keys);
        let mut addresses: Vec<Address> = keys.iter().map(|k| k.address()).collect();
        addresses.push(Keypair::from_seed(&[99; 32]).address());

        let before = snapshot(&ledger, &addresses);
        let txs = build_transfers(&keys, &ledger, &plans);
        let block = Block::seal(&ledger.last_header().unwrap(), txs.clone(), &keys[1], 20_000);

        let outcome = ledger.link_block(&block).unwrap();
        prop_assert_eq!(ledger.height().unwrap(), before.height + 1);
        for tx in &outcome.committed {
            prop_assert!(ledger.tx_by_hash(&tx.hash()).unwrap().is_some());
        }

        let rolled = ledger.rollback_tip().unwrap();
        prop_assert_eq!(rolled.block.hash(), block.hash());
        prop_assert_eq!(rolled.transactions.len(), outcome.committed.len());
        prop_assert_eq!(snapshot(&ledger, &addresses), before);
        for tx in &txs {
            prop_assert!(ledger.tx_by_hash(&tx.hash()).unwrap().is_none());
        }
    }

    #[test]
    fn fork_choice_ignores_arrival_order(
        ts_a in 1u64..1_000_000,
        ts_b in 1u64..1_000_000,
    ) {
        prop_assume!(ts_a != ts_b);
        let keys = keys();
        let a_ledger = open_ledger(&keys[0]);
        let b_ledger = open_ledger(&keys[0]);
        let genesis = a_ledger.last_header().unwrap();

        let first = Block::seal(&genesis, vec![], &keys[0], ts_a);
        let second = Block::seal(&genesis, vec![], &keys[1], ts_b);

        let _ = a_ledger.link_block(&first);
        let _ = a_ledger.link_block(&second);
        let _ = b_ledger.link_block(&second);
        let _ = b_ledger.link_block(&first);

        let winner = first.hash().min(second.hash());
        prop_assert_eq!(a_ledger.last_block().unwrap().hash(), winner);
        prop_assert_eq!(b_ledger.last_block().unwrap().hash(), winner);
        prop_assert_eq!(a_ledger.height().unwrap(), 1);
        prop_assert_eq!(b_ledger.height().unwrap(), 1);
    }

    #[test]
    fn genesis_always_validates(
        prev in any::<[u8; 32]>(),
        data in any::<[u8; 32]>(),
        timestamp in any::<u64>(),
        tip_height in 0u32..50,
    ) {
        let keys = keys();
        let header = Header {
            version: 1,
            data_hash: data,
            prev_block_hash: prev,
            height: 0,
            timestamp,
        };
        let genesis = Block::sign(header, vec![], &keys[2]);

        let tip_header = Header {
            version: 1,
            data_hash: ZERO_HASH,
            prev_block_hash: ZERO_HASH,
            height: tip_height,
            timestamp: 0,
        };
        let tip = Block::sign(tip_header, vec![], &keys[3]);
        prop_assert_eq!(validate(&genesis, &tip), Ok(Verdict::Genesis));
    }
}
