//! # Storage Module
//!
//! ```text
//! block.rs   — Header and Block, genesis, sealing, verification
//! account.rs — per-address nonce and balance
//! db.rs      — sled key-value store with prefixed tables and atomic batches
//! store.rs   — typed repositories for blocks, headers, txs, accounts, journals
//! ```
//!
//! Bincode for everything on disk. JSON is for the HTTP API only.

pub mod account;
pub mod block;
pub mod db;
pub mod store;

pub use account::Account;
pub use block::{compute_data_hash, Block, BlockVerifyError, Header};
pub use db::{DbError, DbResult, LedgerDb, Table, WriteBatch};
pub use store::LedgerStore;
