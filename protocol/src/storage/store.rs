//! Typed repositories over [`LedgerDb`].
//!
//! Reads go straight to sled. Writes are staged into a [`WriteBatch`] so the
//! ledger can commit a whole block, or a whole rollback, in one step.

use std::path::Path;

use super::account::Account;
use super::block::{Block, Header};
use super::db::{DbError, DbResult, LedgerDb, Table, WriteBatch};
use crate::crypto::{Address, Hash};
use crate::ledger::ops::StateOp;
use crate::transaction::Transaction;

/// Empty key for the single-entry pointer tables.
const POINTER: &[u8] = b"";

/// Typed access to blocks, headers, transactions, accounts and journals.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    db: LedgerDb,
}

impl LedgerStore {
    pub fn new(db: LedgerDb) -> Self {
        Self { db }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Ok(Self::new(LedgerDb::open(path)?))
    }

    pub fn open_temporary() -> DbResult<Self> {
        Ok(Self::new(LedgerDb::open_temporary()?))
    }

    pub fn db(&self) -> &LedgerDb {
        &self.db
    }

    pub fn apply(&self, batch: WriteBatch) -> DbResult<()> {
        self.db.apply(batch)
    }

    // -- Block operations ---------------------------------------------------

    pub fn block_by_hash(&self, hash: &Hash) -> DbResult<Option<Block>> {
        self.db.get_value(Table::BlockByHash, hash)
    }

    pub fn block_by_height(&self, height: u32) -> DbResult<Option<Block>> {
        self.db.get_value(Table::BlockByHeight, &height.to_be_bytes())
    }

    pub fn last_block(&self) -> DbResult<Option<Block>> {
        self.db.get_value(Table::LastBlock, POINTER)
    }

    pub fn header_by_hash(&self, hash: &Hash) -> DbResult<Option<Header>> {
        self.db.get_value(Table::HeaderByHash, hash)
    }

    pub fn header_by_height(&self, height: u32) -> DbResult<Option<Header>> {
        self.db.get_value(Table::HeaderByHeight, &height.to_be_bytes())
    }

    pub fn last_header(&self) -> DbResult<Option<Header>> {
        self.db.get_value(Table::LastHeader, POINTER)
    }

    /// Stage the hash and height indices for `block` and its header.
    pub fn stage_block(batch: &mut WriteBatch, block: &Block) -> DbResult<()> {
        let height = block.height().to_be_bytes();
        let hash = block.hash();
        batch.put_value(Table::BlockByHash, &hash, block)?;
        batch.put_value(Table::BlockByHeight, &height, block)?;
        batch.put_value(Table::HeaderByHash, &hash, block.header())?;
        batch.put_value(Table::HeaderByHeight, &height, block.header())?;
        Ok(())
    }

    pub fn unstage_block(batch: &mut WriteBatch, block: &Block) {
        let height = block.height().to_be_bytes();
        let hash = block.hash();
        batch.delete(Table::BlockByHash, &hash);
        batch.delete(Table::BlockByHeight, &height);
        batch.delete(Table::HeaderByHash, &hash);
        batch.delete(Table::HeaderByHeight, &height);
    }

    /// Point the last-block and last-header entries at `block`.
    pub fn stage_tip(batch: &mut WriteBatch, block: &Block) -> DbResult<()> {
        batch.put_value(Table::LastBlock, POINTER, block)?;
        batch.put_value(Table::LastHeader, POINTER, block.header())?;
        Ok(())
    }

    pub fn clear_tip(batch: &mut WriteBatch) {
        batch.delete(Table::LastBlock, POINTER);
        batch.delete(Table::LastHeader, POINTER);
    }

    // -- Transaction operations ---------------------------------------------

    pub fn tx_by_hash(&self, hash: &Hash) -> DbResult<Option<Transaction>> {
        self.db.get_value(Table::TxByHash, hash)
    }

    pub fn tx_by_number(&self, number: u32) -> DbResult<Option<Transaction>> {
        self.db.get_value(Table::TxByNumber, &number.to_be_bytes())
    }

    pub fn has_tx(&self, hash: &Hash) -> DbResult<bool> {
        self.db.has(Table::TxByHash, hash)
    }

    pub fn last_tx(&self) -> DbResult<Option<Transaction>> {
        self.db.get_value(Table::LastTx, POINTER)
    }

    /// Sequence number of the most recent committed transaction. `None`
    /// until the first transaction commits.
    pub fn last_tx_number(&self) -> DbResult<Option<u32>> {
        match self.db.get(Table::LastTxNumber, POINTER)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_ref().try_into().map_err(|_| {
                    DbError::Corrupt(format!("last tx number is {} bytes", bytes.len()))
                })?;
                Ok(Some(u32::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    pub fn stage_tx(batch: &mut WriteBatch, number: u32, tx: &Transaction) -> DbResult<()> {
        batch.put_value(Table::TxByHash, &tx.hash(), tx)?;
        batch.put_value(Table::TxByNumber, &number.to_be_bytes(), tx)?;
        Ok(())
    }

    pub fn unstage_tx(batch: &mut WriteBatch, number: u32, hash: &Hash) {
        batch.delete(Table::TxByHash, hash);
        batch.delete(Table::TxByNumber, &number.to_be_bytes());
    }

    pub fn stage_last_tx(batch: &mut WriteBatch, number: u32, tx: &Transaction) -> DbResult<()> {
        batch.put_value(Table::LastTx, POINTER, tx)?;
        batch.put(Table::LastTxNumber, POINTER, number.to_be_bytes().to_vec());
        Ok(())
    }

    pub fn clear_last_tx(batch: &mut WriteBatch) {
        batch.delete(Table::LastTx, POINTER);
        batch.delete(Table::LastTxNumber, POINTER);
    }

    // -- Account operations -------------------------------------------------

    pub fn account(&self, address: &Address) -> DbResult<Option<Account>> {
        self.db.get_value(Table::Accounts, address.as_bytes())
    }

    pub fn stage_account(batch: &mut WriteBatch, account: &Account) -> DbResult<()> {
        batch.put_value(Table::Accounts, account.address.as_bytes(), account)
    }

    pub fn unstage_account(batch: &mut WriteBatch, address: &Address) {
        batch.delete(Table::Accounts, address.as_bytes());
    }

    // -- Journal operations -------------------------------------------------

    /// Undo journal recorded when the block at `height` was applied.
    pub fn journal(&self, height: u32) -> DbResult<Option<Vec<StateOp>>> {
        self.db.get_value(Table::Journal, &height.to_be_bytes())
    }

    pub fn stage_journal(batch: &mut WriteBatch, height: u32, ops: &[StateOp]) -> DbResult<()> {
        batch.put_value(Table::Journal, &height.to_be_bytes(), ops)
    }

    pub fn unstage_journal(batch: &mut WriteBatch, height: u32) {
        batch.delete(Table::Journal, &height.to_be_bytes());
    }

    // -- Counts ---------------------------------------------------------------

    pub fn account_count(&self) -> usize {
        self.db.count(Table::Accounts)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::transaction::sign_transaction;

    fn signed_tx(kp: &Keypair, nonce: u64) -> Transaction {
        let mut tx = Transaction::new(nonce, kp.address(), Some(kp.address()), 0, vec![]);
        sign_transaction(&mut tx, kp);
        tx
    }

    #[test]
    fn block_indices_and_tip_round_trip() {
        let store = LedgerStore::open_temporary().unwrap();
        let kp = Keypair::generate();
        let genesis = Block::genesis(&kp);

        let mut batch = WriteBatch::new();
        LedgerStore::stage_block(&mut batch, &genesis).unwrap();
        LedgerStore::stage_tip(&mut batch, &genesis).unwrap();
        store.apply(batch).unwrap();

        assert_eq!(store.block_by_hash(&genesis.hash()).unwrap(), Some(genesis.clone()));
        assert_eq!(store.block_by_height(0).unwrap(), Some(genesis.clone()));
        assert_eq!(store.header_by_hash(&genesis.hash()).unwrap(), Some(*genesis.header()));
        assert_eq!(store.header_by_height(0).unwrap(), Some(*genesis.header()));
        assert_eq!(store.last_block().unwrap(), Some(genesis.clone()));
        assert_eq!(store.last_header().unwrap(), Some(*genesis.header()));

        let mut batch = WriteBatch::new();
        LedgerStore::unstage_block(&mut batch, &genesis);
        LedgerStore::clear_tip(&mut batch);
        store.apply(batch).unwrap();

        assert!(store.block_by_hash(&genesis.hash()).unwrap().is_none());
        assert!(store.block_by_height(0).unwrap().is_none());
        assert!(store.last_header().unwrap().is_none());
    }

    #[test]
    fn tx_indices_and_counter() {
        let store = LedgerStore::open_temporary().unwrap();
        let kp = Keypair::generate();
        assert_eq!(store.last_tx_number().unwrap(), None);

        let tx0 = signed_tx(&kp, 0);
        let tx1 = signed_tx(&kp, 1);
        let mut batch = WriteBatch::new();
        LedgerStore::stage_tx(&mut batch, 0, &tx0).unwrap();
        LedgerStore::stage_tx(&mut batch, 1, &tx1).unwrap();
        LedgerStore::stage_last_tx(&mut batch, 1, &tx1).unwrap();
        store.apply(batch).unwrap();

        assert_eq!(store.tx_by_hash(&tx0.hash()).unwrap(), Some(tx0.clone()));
        assert_eq!(store.tx_by_number(1).unwrap(), Some(tx1.clone()));
        assert_eq!(store.last_tx().unwrap(), Some(tx1.clone()));
        assert_eq!(store.last_tx_number().unwrap(), Some(1));

        let mut batch = WriteBatch::new();
        LedgerStore::unstage_tx(&mut batch, 1, &tx1.hash());
        LedgerStore::stage_last_tx(&mut batch, 0, &tx0).unwrap();
        store.apply(batch).unwrap();

        assert!(!store.has_tx(&tx1.hash()).unwrap());
        assert_eq!(store.last_tx_number().unwrap(), Some(0));
    }

    #[test]
    fn corrupt_counter_is_reported() {
        let store = LedgerStore::open_temporary().unwrap();
        store.db().put(Table::LastTxNumber, POINTER, vec![1u8, 2]).unwrap();
        assert!(matches!(store.last_tx_number(), Err(DbError::Corrupt(_))));
    }

    #[test]
    fn account_crud() {
        let store = LedgerStore::open_temporary().unwrap();
        let addr = Address::from_bytes([3; 20]);
        assert!(store.account(&addr).unwrap().is_none());

        let mut batch = WriteBatch::new();
        LedgerStore::stage_account(&mut batch, &Account::with_balance(addr, 50)).unwrap();
        store.apply(batch).unwrap();
        assert_eq!(store.account(&addr).unwrap().map(|a| a.balance), Some(50));
        assert_eq!(store.account_count(), 1);

        let mut batch = WriteBatch::new();
        LedgerStore::unstage_account(&mut batch, &addr);
        store.apply(batch).unwrap();
        assert!(store.account(&addr).unwrap().is_none());
    }
}
