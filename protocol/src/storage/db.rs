//! # LedgerDb — Persistent Key-Value Store
//!
//! All on-disk data lives in a single sled tree. Logical tables share the
//! keyspace and are isolated by a one-byte key prefix:
//!
//! | Prefix | Table            | Key              | Value                      |
//! |--------|------------------|------------------|----------------------------|
//! | `0x01` | `BlockByHash`    | hash (32B)       | `bincode(Block)`           |
//! | `0x02` | `BlockByHeight`  | height (4B BE)   | `bincode(Block)`           |
//! | `0x03` | `LastBlock`      | empty            | `bincode(Block)`           |
//! | `0x04` | `HeaderByHash`   | hash (32B)       | `bincode(Header)`          |
//! | `0x05` | `HeaderByHeight` | height (4B BE)   | `bincode(Header)`          |
//! | `0x06` | `LastHeader`     | empty            | `bincode(Header)`          |
//! | `0x07` | `TxByHash`       | hash (32B)       | `bincode(Transaction)`     |
//! | `0x08` | `TxByNumber`     | number (4B BE)   | `bincode(Transaction)`     |
//! | `0x09` | `LastTx`         | empty            | `bincode(Transaction)`     |
//! | `0x0A` | `LastTxNumber`   | empty            | number (4B BE)             |
//! | `0x0B` | `Accounts`       | address (20B)    | `bincode(Account)`         |
//! | `0x0C` | `Journal`        | height (4B BE)   | `bincode(Vec<StateOp>)`    |
//!
//! Heights and numbers are big-endian so sled's lexicographic order matches
//! numeric order.
//!
//! ## Atomicity
//!
//! Because every table lives in the same tree, a [`WriteBatch`] can span
//! tables and still land with one `apply_batch`. Either the whole block
//! (accounts, indices, pointers, journal) is on disk or none of it is.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Batch, Db, IVec, Tree};
use std::path::Path;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Logical table. The discriminant is the on-disk key prefix.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Table {
    BlockByHash = 0x01,
    BlockByHeight = 0x02,
    LastBlock = 0x03,
    HeaderByHash = 0x04,
    HeaderByHeight = 0x05,
    LastHeader = 0x06,
    TxByHash = 0x07,
    TxByNumber = 0x08,
    LastTx = 0x09,
    LastTxNumber = 0x0A,
    Accounts = 0x0B,
    Journal = 0x0C,
}

impl Table {
    pub fn prefix(self) -> u8 {
        self as u8
    }

    fn key(self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(1 + key.len());
        full.push(self.prefix());
        full.extend_from_slice(key);
        full
    }
}

pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// WriteBatch
// ---------------------------------------------------------------------------

/// A set of puts and deletes across tables, applied atomically by
/// [`LedgerDb::apply`].
#[derive(Default)]
pub struct WriteBatch {
    inner: Batch,
    ops: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, table: Table, key: &[u8], value: impl Into<IVec>) {
        self.inner.insert(table.key(key), value);
        self.ops += 1;
    }

    pub fn put_value<T: Serialize + ?Sized>(
        &mut self,
        table: Table,
        key: &[u8],
        value: &T,
    ) -> DbResult<()> {
        self.put(table, key, encode(value)?);
        Ok(())
    }

    pub fn delete(&mut self, table: Table, key: &[u8]) {
        self.inner.remove(table.key(key));
        self.ops += 1;
    }

    /// Number of operations queued.
    pub fn len(&self) -> usize {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops == 0
    }
}

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Handle to the node's sled database.
///
/// sled is thread-safe, so `LedgerDb` is cheap to clone and share.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    db: Db,
    tree: Tree,
}

impl LedgerDb {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop. For tests.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let tree = db.open_tree("ledger")?;
        Ok(Self { db, tree })
    }

    pub fn get(&self, table: Table, key: &[u8]) -> DbResult<Option<IVec>> {
        Ok(self.tree.get(table.key(key))?)
    }

    pub fn get_value<T: DeserializeOwned>(&self, table: Table, key: &[u8]) -> DbResult<Option<T>> {
        match self.get(table, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has(&self, table: Table, key: &[u8]) -> DbResult<bool> {
        Ok(self.tree.contains_key(table.key(key))?)
    }

    pub fn put(&self, table: Table, key: &[u8], value: impl Into<IVec>) -> DbResult<()> {
        self.tree.insert(table.key(key), value)?;
        Ok(())
    }

    pub fn delete(&self, table: Table, key: &[u8]) -> DbResult<()> {
        self.tree.remove(table.key(key))?;
        Ok(())
    }

    /// Apply `batch` atomically and flush.
    pub fn apply(&self, batch: WriteBatch) -> DbResult<()> {
        self.tree.apply_batch(batch.inner)?;
        self.db.flush()?;
        Ok(())
    }

    /// Number of entries in `table`.
    pub fn count(&self, table: Table) -> usize {
        self.tree.scan_prefix([table.prefix()]).count()
    }

    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_temporary_database() {
        let db = LedgerDb::open_temporary().expect("should create temp db");
        assert_eq!(db.count(Table::BlockByHash), 0);
        assert_eq!(db.count(Table::Accounts), 0);
    }

    #[test]
    fn open_persistent_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = LedgerDb::open(dir.path()).expect("should open db");
        db.put(Table::LastTxNumber, b"", 7u32.to_be_bytes().to_vec()).unwrap();
        drop(db);

        let db2 = LedgerDb::open(dir.path()).expect("should reopen db");
        let value = db2.get(Table::LastTxNumber, b"").unwrap().unwrap();
        assert_eq!(value.as_ref(), &7u32.to_be_bytes());
    }

    #[test]
    fn tables_are_isolated_by_prefix() {
        let db = LedgerDb::open_temporary().unwrap();
        db.put(Table::BlockByHash, b"k", b"block".to_vec()).unwrap();
        db.put(Table::TxByHash, b"k", b"tx".to_vec()).unwrap();

        assert_eq!(db.get(Table::BlockByHash, b"k").unwrap().unwrap().as_ref(), b"block");
        assert_eq!(db.get(Table::TxByHash, b"k").unwrap().unwrap().as_ref(), b"tx");
        assert!(db.get(Table::HeaderByHash, b"k").unwrap().is_none());

        db.delete(Table::BlockByHash, b"k").unwrap();
        assert!(!db.has(Table::BlockByHash, b"k").unwrap());
        assert!(db.has(Table::TxByHash, b"k").unwrap());
    }

    #[test]
    fn batch_spans_tables_atomically() {
        let db = LedgerDb::open_temporary().unwrap();
        db.put(Table::Accounts, b"gone", b"x".to_vec()).unwrap();

        let mut batch = WriteBatch::new();
        batch.put_value(Table::Journal, &1u32.to_be_bytes(), &vec![1u8, 2, 3]).unwrap();
        batch.put(Table::LastBlock, b"", b"tip".to_vec());
        batch.delete(Table::Accounts, b"gone");
        assert_eq!(batch.len(), 3);

        // Nothing visible before apply.
        assert!(db.get(Table::LastBlock, b"").unwrap().is_none());
        db.apply(batch).unwrap();

        let journal: Vec<u8> = db.get_value(Table::Journal, &1u32.to_be_bytes()).unwrap().unwrap();
        assert_eq!(journal, vec![1, 2, 3]);
        assert!(db.has(Table::LastBlock, b"").unwrap());
        assert!(!db.has(Table::Accounts, b"gone").unwrap());
    }

    #[test]
    fn garbage_value_is_serialization_error() {
        let db = LedgerDb::open_temporary().unwrap();
        db.put(Table::Accounts, b"a", vec![0xFFu8]).unwrap();
        let result: DbResult<Option<(u64, u64, u64)>> = db.get_value(Table::Accounts, b"a");
        assert!(matches!(result, Err(DbError::Serialization(_))));
    }

    #[test]
    fn count_only_sees_one_table() {
        let db = LedgerDb::open_temporary().unwrap();
        for i in 0u32..5 {
            db.put(Table::BlockByHeight, &i.to_be_bytes(), vec![0u8]).unwrap();
        }
        db.put(Table::HeaderByHeight, &0u32.to_be_bytes(), vec![0u8]).unwrap();
        assert_eq!(db.count(Table::BlockByHeight), 5);
        assert_eq!(db.count(Table::HeaderByHeight), 1);
    }
}
