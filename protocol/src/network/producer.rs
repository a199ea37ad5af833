//! # Block Production
//!
//! Turns the pending pool into a signed block on top of the local tip.
//!
//! ```text
//! 1. SELECT  — snapshot the pool in arrival order
//! 2. FILTER  — drop anything already committed or carrying a stale nonce
//! 3. SEAL    — build the header over the tip and sign it
//! 4. LINK    — run it through the ledger like any other block
//! 5. CLEAR   — empty the pool
//! ```
//!
//! The ledger would drop stale transactions on its own; filtering first
//! keeps them out of the signed block entirely.

use std::sync::Arc;

use tracing::{debug, info};

use super::txpool::TxPool;
use crate::crypto::hash::short_hex;
use crate::crypto::{Address, Keypair};
use crate::ledger::{Ledger, LedgerResult};
use crate::storage::Block;
use crate::transaction::Transaction;

/// A block this node sealed and linked.
#[derive(Debug, Clone)]
pub struct ProducedBlock {
    pub block: Block,
    /// Transactions the ledger committed.
    pub committed: Vec<Transaction>,
    /// Pending transactions left out at selection time.
    pub skipped: usize,
}

#[derive(Debug)]
pub struct BlockProducer {
    ledger: Arc<Ledger>,
    pool: Arc<TxPool>,
    keypair: Keypair,
}

impl BlockProducer {
    pub fn new(ledger: Arc<Ledger>, pool: Arc<TxPool>, keypair: Keypair) -> Self {
        Self {
            ledger,
            pool,
            keypair,
        }
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    /// Pending transactions that can still apply on the current tip.
    /// Returns the selection and the number left out.
    pub fn select_transactions(&self) -> LedgerResult<(Vec<Transaction>, usize)> {
        let pending = self.pool.pending();
        let total = pending.len();
        let mut selected = Vec::with_capacity(total);

        for tx in pending {
            if self.ledger.contains_tx(&tx.hash())? {
                debug!(tx = %short_hex(&tx.hash()), "skipping committed transaction");
                continue;
            }
            let expected = self.ledger.nonce(&tx.from())?.unwrap_or(0);
            if tx.nonce() != expected {
                debug!(
                    tx = %short_hex(&tx.hash()),
                    expected,
                    got = tx.nonce(),
                    "skipping stale nonce"
                );
                continue;
            }
            selected.push(tx);
        }

        let skipped = total - selected.len();
        Ok((selected, skipped))
    }

    /// Seal, link and return a new block with `timestamp` (unix millis).
    pub fn produce_block(&self, timestamp: u64) -> LedgerResult<ProducedBlock> {
        let (transactions, skipped) = self.select_transactions()?;
        let tip = self.ledger.last_header()?;
        let block = Block::seal(&tip, transactions, &self.keypair, timestamp);

        let outcome = self.ledger.link_block(&block)?;
        self.pool.clear_pending();

        info!(
            height = block.height(),
            hash = %short_hex(&block.hash()),
            txs = outcome.committed.len(),
            skipped,
            "block sealed"
        );
        Ok(ProducedBlock {
            block,
            committed: outcome.committed,
            skipped,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
