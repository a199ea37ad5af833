//! Reversible state operations.
//!
//! Applying a block records a journal of [`StateOp`]s. Each op can stage
//! itself into a [`WriteBatch`] and knows its own inverse, so rolling back a
//! block is "invert every op, replay in reverse order, commit one batch".
//!
//! Ops carry full before/after values rather than deltas. Restoring an
//! account that did not exist before the block means deleting it, which a
//! delta cannot express.

use serde::{Deserialize, Serialize};

use crate::crypto::Address;
use crate::storage::db::{DbError, DbResult, WriteBatch};
use crate::storage::{Account, Block, LedgerStore};
use crate::transaction::Transaction;

/// One reversible change to ledger state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateOp {
    /// Account `address` went from `before` to `after`. `None` means the
    /// account does not exist.
    Account {
        address: Address,
        before: Option<Account>,
        after: Option<Account>,
    },

    /// Transaction `tx` is indexed as number `number` (or removed, when
    /// `present` is false).
    TxIndex {
        tx: Transaction,
        number: u32,
        present: bool,
    },

    /// `block` is linked into the chain as the tip (or unlinked).
    BlockIndex { block: Block, present: bool },
}

impl StateOp {
    pub fn inverse(&self) -> StateOp {
        match self {
            StateOp::Account {
                address,
                before,
                after,
            } => StateOp::Account {
                address: *address,
                before: after.clone(),
                after: before.clone(),
            },
            StateOp::TxIndex {
                tx,
                number,
                present,
            } => StateOp::TxIndex {
                tx: tx.clone(),
                number: *number,
                present: !present,
            },
            StateOp::BlockIndex { block, present } => StateOp::BlockIndex {
                block: block.clone(),
                present: !present,
            },
        }
    }

    /// Stage this op into `batch`.
    ///
    /// Removals re-point the last-tx and last-block pointers at the entry
    /// one below, read from `store`. Within a rollback batch the ops run from
    /// the highest number down, so the final pointer is the one just below
    /// everything removed.
    pub fn stage(&self, store: &LedgerStore, batch: &mut WriteBatch) -> DbResult<()> {
        match self {
            StateOp::Account { address, after, .. } => match after {
                Some(account) => LedgerStore::stage_account(batch, account),
                None => {
                    LedgerStore::unstage_account(batch, address);
                    Ok(())
                }
            },

            StateOp::TxIndex {
                tx,
                number,
                present: true,
            } => {
                LedgerStore::stage_tx(batch, *number, tx)?;
                LedgerStore::stage_last_tx(batch, *number, tx)
            }

            StateOp::TxIndex {
                tx,
                number,
                present: false,
            } => {
                LedgerStore::unstage_tx(batch, *number, &tx.hash());
                match number.checked_sub(1) {
                    Some(prev) => {
                        let prev_tx = store.tx_by_number(prev)?.ok_or_else(|| {
                            DbError::Corrupt(format!("tx number {prev} missing below {number}"))
                        })?;
                        LedgerStore::stage_last_tx(batch, prev, &prev_tx)
                    }
                    None => {
                        LedgerStore::clear_last_tx(batch);
                        Ok(())
                    }
                }
            }

            StateOp::BlockIndex {
                block,
                present: true,
            } => {
                LedgerStore::stage_block(batch, block)?;
                LedgerStore::stage_tip(batch, block)
            }

            StateOp::BlockIndex {
                block,
                present: false,
            } => {
                LedgerStore::unstage_block(batch, block);
                match block.height().checked_sub(1) {
                    Some(prev) => {
                        let prev_block = store.block_by_height(prev)?.ok_or_else(|| {
                            DbError::Corrupt(format!("block {prev} missing below tip"))
                        })?;
                        LedgerStore::stage_tip(batch, &prev_block)
                    }
                    None => {
                        LedgerStore::clear_tip(batch);
                        Ok(())
                    }
                }
            }
        }
    }
}
