//! # Transaction Module
//!
//! ```text
//! types.rs   — Transaction and its canonical hash
//! signing.rs — signing and verification against the sender address
//! ```
//!
//! ## Transaction Lifecycle
//!
//! 1. **Build** with [`Transaction::new`].
//! 2. **Sign** with [`sign_transaction`] using the sender's keypair.
//! 3. **Submit** to a node, which verifies it and admits it to the pool.
//! 4. **Commit** when a sealed block includes it and the ledger applies it.

pub mod signing;
pub mod types;

pub use signing::{sign_transaction, verify_transaction, TxVerifyError};
pub use types::Transaction;
