//! # Hashing Utilities
//!
//! Two hash functions, each with one job:
//!
//! - **BLAKE3** hashes everything consensus-critical: block headers,
//!   transaction bodies, and the per-block data hash.
//! - **SHA-256** derives account addresses from public keys, so addresses
//!   stay compatible with tooling that expects the classic
//!   "truncated SHA-256 of the key" construction.
//!
//! A [`Hash`] is always 32 bytes. Ordering between hashes is plain
//! lexicographic byte order, which is the same as unsigned big-endian
//! integer comparison. Fork choice relies on that.

use sha2::{Digest, Sha256};

/// A 32-byte digest. Block hashes, transaction hashes and data hashes all
/// share this type.
pub type Hash = [u8; 32];

/// The all-zero hash. Used as `prev_block_hash` of the genesis header.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Compute the SHA-256 hash and return a fixed-size array.
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Compute the BLAKE3 hash of the input data.
///
/// # Example
///
/// ```
/// use keel_protocol::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"keel");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// Hash multiple byte slices together without concatenating them first.
///
/// Produces the same digest as hashing the concatenation, so
/// `blake3_hash_multi(&[a, b]) == blake3_hash(&[a, b].concat())`.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Short hex prefix of a hash, for log lines.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}
