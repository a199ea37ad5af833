//! Insertion-ordered transaction pool.
//!
//! Holds signed transactions that have not been sealed into a block yet.
//! Transactions are indexed by hash for O(1) lookups and kept in arrival
//! order for sealing and for FIFO eviction.
//!
//! ## Admission
//!
//! Each sender may have at most one pending transaction. A second one is
//! refused until the ledger reports the first as committed, at which point
//! the stale entry is evicted and the newcomer takes its place. The ledger's
//! tx-by-hash index is the source of truth for "already processed"; the pool
//! never learns about commits any other way.
//!
//! A transaction is only admitted if its nonce equals the sender's current
//! ledger nonce (zero for an address with no account). The same rule is
//! enforced again when a block is applied.
//!
//! ## Design
//!
//! - `DashMap` for the hash and sender indices, read concurrently by the
//!   API and the event loop.
//! - `parking_lot::RwLock<BTreeMap>` keyed by an insertion sequence number
//!   for ordering. Every mutation takes this write lock first, which also
//!   serializes mutations against each other.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::config::TX_POOL_CAPACITY;
use crate::crypto::{Address, Hash};
use crate::ledger::{Ledger, LedgerError};
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of pending transactions. When full, the oldest entry
    /// is evicted to make room.
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: TX_POOL_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// PoolEntry / PoolError
// ---------------------------------------------------------------------------

/// A pending transaction and its arrival sequence number.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub transaction: Transaction,
    pub seq: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("transaction already pending")]
    AlreadyPending,

    #[error("account {0} already has a pending transaction")]
    AccountHasPending(Address),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

// ---------------------------------------------------------------------------
// TxPool
// ---------------------------------------------------------------------------

pub struct TxPool {
    entries: DashMap<Hash, PoolEntry>,
    /// Arrival order: seq -> hash.
    order: RwLock<BTreeMap<u64, Hash>>,
    /// Pending transaction per sender.
    senders: DashMap<Address, Hash>,
    next_seq: AtomicU64,
    config: PoolConfig,
}

impl fmt::Debug for TxPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxPool")
            .field("pending", &self.entries.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for TxPool {
    fn default() -> Self {
        Self::with_config(PoolConfig::default())
    }
}

impl TxPool {
    pub fn new(capacity: usize) -> Self {
        Self::with_config(PoolConfig { capacity })
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            entries: DashMap::new(),
            order: RwLock::new(BTreeMap::new()),
            senders: DashMap::new(),
            next_seq: AtomicU64::new(0),
            config,
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Admit a transaction. Signature checks are the caller's job.
    ///
    /// Checks, in order:
    ///
    /// 1. **Duplicate**: reject if the same hash is already pending.
    /// 2. **One per sender**: if the sender has a pending transaction, ask
    ///    the ledger whether it has been committed. If not, reject; if so,
    ///    evict it and continue.
    /// 3. **Nonce**: reject unless the nonce equals the sender's ledger
    ///    nonce.
    /// 4. **Capacity**: if full, evict the oldest entry.
    pub fn add(&self, tx: Transaction, ledger: &Ledger) -> Result<(), PoolError> {
        let mut order = self.order.write();
        let hash = tx.hash();

        // 1. Duplicate check.
        if self.entries.contains_key(&hash) {
            return Err(PoolError::AlreadyPending);
        }

        // 2. Per-sender check.
        let from = tx.from();
        let existing = self.senders.get(&from).map(|h| *h.value());
        if let Some(existing) = existing {
            if !ledger.contains_tx(&existing)? {
                return Err(PoolError::AccountHasPending(from));
            }
            self.remove_locked(&mut order, &existing);
        }

        // 3. Nonce check.
        let expected = ledger.nonce(&from)?.unwrap_or(0);
        if tx.nonce() != expected {
            return Err(LedgerError::BadNonce {
                expected,
                got: tx.nonce(),
            }
            .into());
        }

        // 4. Capacity check with FIFO eviction.
        while self.entries.len() >= self.config.capacity.max(1) {
            let Some((_, oldest)) = order.pop_first() else {
                break;
            };
            if let Some((_, entry)) = self.entries.remove(&oldest) {
                self.senders
                    .remove_if(&entry.transaction.from(), |_, h| *h == oldest);
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        order.insert(seq, hash);
        self.senders.insert(from, hash);
        self.entries.insert(
            hash,
            PoolEntry {
                transaction: tx,
                seq,
            },
        );
        Ok(())
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<Transaction> {
        self.entries.get(hash).map(|e| e.transaction.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of pending transactions in arrival order.
    pub fn pending(&self) -> Vec<Transaction> {
        let order = self.order.read();
        order
            .values()
            .filter_map(|hash| self.entries.get(hash).map(|e| e.transaction.clone()))
            .collect()
    }

    pub fn remove(&self, hash: &Hash) -> Option<Transaction> {
        let mut order = self.order.write();
        self.remove_locked(&mut order, hash)
    }

    pub fn clear_pending(&self) {
        let mut order = self.order.write();
        order.clear();
        self.entries.clear();
        self.senders.clear();
    }

    fn remove_locked(&self, order: &mut BTreeMap<u64, Hash>, hash: &Hash) -> Option<Transaction> {
        let (_, entry) = self.entries.remove(hash)?;
        order.remove(&entry.seq);
        self.senders
            .remove_if(&entry.transaction.from(), |_, h| h == hash);
        Some(entry.transaction)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::storage::{Block, LedgerStore};
    use crate::transaction::sign_transaction;

    fn open_ledger(gk: &Keypair) -> Ledger {
        Ledger::open(LedgerStore::open_temporary().unwrap(), &Block::genesis(gk)).unwrap()
    }

    fn tx_from(kp: &Keypair, nonce: u64) -> Transaction {
        let mut tx = Transaction::new(nonce, kp.address(), Some(kp.address()), 0, vec![]);
        sign_transaction(&mut tx, kp);
        tx
    }

    #[test]
    fn add_and_contains() {
        let ledger = open_ledger(&Keypair::generate());
        let pool = TxPool::default();
        let tx = tx_from(&Keypair::generate(), 0);

        assert!(!pool.contains(&tx.hash()));
        pool.add(tx.clone(), &ledger).unwrap();
        assert!(pool.contains(&tx.hash()));
        assert_eq!(pool.pending_count(), 1);
        assert_eq!(pool.get(&tx.hash()), Some(tx));
    }

    #[test]
    fn rejects_duplicate() {
        let ledger = open_ledger(&Keypair::generate());
        let pool = TxPool::default();
        let tx = tx_from(&Keypair::generate(), 0);

        pool.add(tx.clone(), &ledger).unwrap();
        assert!(matches!(pool.add(tx, &ledger), Err(PoolError::AlreadyPending)));
        assert_eq!(pool.pending_count(), 1);
    }

    #[test]
    fn one_pending_per_sender_until_committed() {
        let gk = Keypair::generate();
        let ledger = open_ledger(&gk);
        let pool = TxPool::default();

        let first = tx_from(&gk, 0);
        let second = tx_from(&gk, 1);
        pool.add(first.clone(), &ledger).unwrap();
        assert!(matches!(
            pool.add(second.clone(), &ledger),
            Err(PoolError::AccountHasPending(a)) if a == gk.address()
        ));

        let b1 = Block::seal(&ledger.last_header().unwrap(), vec![first.clone()], &gk, 1_000);
        ledger.link_block(&b1).unwrap();

        pool.add(second.clone(), &ledger).unwrap();
        assert!(!pool.contains(&first.hash()), "stale entry evicted");
        assert!(pool.contains(&second.hash()));
        assert_eq!(pool.pending_count(), 1);
    }

    #[test]
    fn full_pool_evicts_oldest() {
        let ledger = open_ledger(&Keypair::generate());
        let pool = TxPool::new(3);
        let txs: Vec<Transaction> = (0..4).map(|_| tx_from(&Keypair::generate(), 0)).collect();

        for tx in &txs {
            pool.add(tx.clone(), &ledger).unwrap();
        }

        assert_eq!(pool.pending_count(), 3);
        assert!(!pool.contains(&txs[0].hash()), "earliest insert evicted");
        for tx in &txs[1..] {
            assert!(pool.contains(&tx.hash()));
        }
    }

    #[test]
    fn evicted_sender_may_submit_again() {
        let ledger = open_ledger(&Keypair::generate());
        let pool = TxPool::new(1);
        let alice = Keypair::generate();

        let first = tx_from(&alice, 0);
        pool.add(first.clone(), &ledger).unwrap();
        pool.add(tx_from(&Keypair::generate(), 0), &ledger).unwrap();
        assert!(!pool.contains(&first.hash()));
        pool.add(first, &ledger).unwrap();
        assert_eq!(pool.pending_count(), 1);
    }

    #[test]
    fn pending_preserves_arrival_order() {
        let ledger = open_ledger(&Keypair::generate());
        let pool = TxPool::default();
        let txs: Vec<Transaction> = (0..5).map(|_| tx_from(&Keypair::generate(), 0)).collect();
        for tx in &txs {
            pool.add(tx.clone(), &ledger).unwrap();
        }
        pool.remove(&txs[2].hash()).unwrap();

        let hashes: Vec<Hash> = pool.pending().iter().map(|t| t.hash()).collect();
        let expected: Vec<Hash> = [0, 1, 3, 4].iter().map(|&i| txs[i].hash()).collect();
        assert_eq!(hashes, expected);
    }

    #[test]
    fn remove_frees_sender_slot() {
        let ledger = open_ledger(&Keypair::generate());
        let pool = TxPool::default();
        let alice = Keypair::generate();
        let first = tx_from(&alice, 0);

        pool.add(first.clone(), &ledger).unwrap();
        assert_eq!(pool.remove(&first.hash()), Some(first.clone()));
        assert!(pool.remove(&first.hash()).is_none());
        pool.add(tx_from(&alice, 0), &ledger).unwrap();
    }

    #[test]
    fn clear_pending_empties_everything() {
        let ledger = open_ledger(&Keypair::generate());
        let pool = TxPool::default();
        let alice = Keypair::generate();
        pool.add(tx_from(&alice, 0), &ledger).unwrap();
        pool.clear_pending();

        assert!(pool.is_empty());
        assert!(pool.pending().is_empty());
        pool.add(tx_from(&alice, 0), &ledger).unwrap();
    }

    #[test]
    fn rejects_nonce_other_than_ledger_nonce() {
        let gk = Keypair::generate();
        let ledger = open_ledger(&gk);
        let pool = TxPool::default();
        let alice = Keypair::generate();

        // No account yet: only nonce 0 is admissible.
        assert!(matches!(
            pool.add(tx_from(&alice, 5), &ledger),
            Err(PoolError::Ledger(LedgerError::BadNonce { expected: 0, got: 5 }))
        ));
        assert!(pool.is_empty(), "rejected tx must not hold the sender slot");
        pool.add(tx_from(&alice, 0), &ledger).unwrap();

        // After a commit the expected nonce moves on.
        let first = tx_from(&gk, 0);
        let b1 = Block::seal(&ledger.last_header().unwrap(), vec![first], &gk, 1_000);
        ledger.link_block(&b1).unwrap();
        assert!(matches!(
            pool.add(tx_from(&gk, 0), &ledger),
            Err(PoolError::Ledger(LedgerError::BadNonce { expected: 1, got: 0 }))
        ));
        assert!(matches!(
            pool.add(tx_from(&gk, 2), &ledger),
            Err(PoolError::Ledger(LedgerError::BadNonce { expected: 1, got: 2 }))
        ));
        pool.add(tx_from(&gk, 1), &ledger).unwrap();
        assert_eq!(pool.pending_count(), 2);
    }
}
