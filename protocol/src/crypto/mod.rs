//! # Cryptographic Primitives
//!
//! The signing and hashing capability the ledger is built on:
//!
//! - **Ed25519** for block and transaction signatures.
//! - **BLAKE3** for header, transaction and data hashes.
//! - **SHA-256** for address derivation.
//!
//! Everything here is a thin, typed wrapper around audited crates.

pub mod address;
pub mod hash;
pub mod keys;

pub use address::Address;
pub use hash::{blake3_hash, sha256_array, Hash, ZERO_HASH};
pub use keys::{KeyError, Keypair, PublicKey, Signature};
