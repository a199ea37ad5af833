//! # Block Structure
//!
//! A block is a signed header plus the ordered transactions it commits.
//!
//! ## Block Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Header                                     │
//! │  ├── version: u32                           │
//! │  ├── data_hash: [u8; 32]  (BLAKE3 of txs)   │
//! │  ├── prev_block_hash: [u8; 32]              │
//! │  ├── height: u32                            │
//! │  └── timestamp: u64       (unix millis)     │
//! ├─────────────────────────────────────────────┤
//! │  transactions: Vec<Transaction>             │
//! │  signer: PublicKey                          │
//! │  signature: Signature     (over the hash)   │
//! │  hash: [u8; 32]           (BLAKE3 of header)│
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! The header hash is BLAKE3 over the fixed-width little-endian encoding of
//! the five header fields in declaration order (52 bytes). The data hash is
//! BLAKE3 over the concatenated transaction hashes; an empty block hashes
//! the empty string.

use serde::{Deserialize, Serialize};

use crate::config::{BLOCK_VERSION, GENESIS_TIMESTAMP};
use crate::crypto::hash::{blake3_hash, short_hex};
use crate::crypto::{Hash, Keypair, PublicKey, Signature, ZERO_HASH};
use crate::transaction::{verify_transaction, Transaction, TxVerifyError};

/// Size of [`Header::canonical_bytes`].
pub const HEADER_BYTES: usize = 4 + 32 + 32 + 4 + 8;

/// Why [`Block::verify`] refused a block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockVerifyError {
    #[error("block {height} ({}) has an invalid signature", short_hex(.hash))]
    BadSignature { height: u32, hash: Hash },

    #[error("block {height}: {error}")]
    Transaction { height: u32, error: TxVerifyError },

    #[error(
        "block {height} data_hash mismatch: stored={}, computed={}",
        hex::encode(.stored),
        hex::encode(.computed)
    )]
    DataHashMismatch {
        height: u32,
        stored: Hash,
        computed: Hash,
    },
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Block metadata and chain linkage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    /// BLAKE3 of the concatenated transaction hashes.
    pub data_hash: Hash,
    /// Hash of the previous header. All zeros for genesis.
    pub prev_block_hash: Hash,
    /// Genesis is height 0.
    pub height: u32,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

impl Header {
    pub fn canonical_bytes(&self) -> [u8; HEADER_BYTES] {
        let mut out = [0u8; HEADER_BYTES];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.data_hash);
        out[36..68].copy_from_slice(&self.prev_block_hash);
        out[68..72].copy_from_slice(&self.height.to_le_bytes());
        out[72..80].copy_from_slice(&self.timestamp.to_le_bytes());
        out
    }

    /// BLAKE3 of the canonical bytes.
    pub fn hash(&self) -> Hash {
        blake3_hash(&self.canonical_bytes())
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A signed block.
///
/// Fields are private: a block's hash is computed from its header when the
/// block is built or decoded and can never drift from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawBlock", into = "RawBlock")]
pub struct Block {
    header: Header,
    transactions: Vec<Transaction>,
    signer: PublicKey,
    signature: Signature,
    hash: Hash,
}

#[derive(Serialize, Deserialize)]
struct RawBlock {
    header: Header,
    transactions: Vec<Transaction>,
    signer: PublicKey,
    signature: Signature,
}

impl From<RawBlock> for Block {
    fn from(raw: RawBlock) -> Self {
        Block::from_parts(raw.header, raw.transactions, raw.signer, raw.signature)
    }
}

impl From<Block> for RawBlock {
    fn from(block: Block) -> Self {
        RawBlock {
            header: block.header,
            transactions: block.transactions,
            signer: block.signer,
            signature: block.signature,
        }
    }
}

impl Block {
    /// Assemble a block from already-signed parts. The signature is not
    /// checked here; see [`Block::verify`].
    pub fn from_parts(
        header: Header,
        transactions: Vec<Transaction>,
        signer: PublicKey,
        signature: Signature,
    ) -> Self {
        let hash = header.hash();
        Self {
            header,
            transactions,
            signer,
            signature,
            hash,
        }
    }

    /// Sign `header` with `keypair` and wrap it with its transactions.
    pub fn sign(header: Header, transactions: Vec<Transaction>, keypair: &Keypair) -> Self {
        let hash = header.hash();
        let signature = keypair.sign_hash(&hash);
        Self {
            header,
            transactions,
            signer: keypair.public_key(),
            signature,
            hash,
        }
    }

    /// Build and sign the block that extends `prev`.
    pub fn seal(
        prev: &Header,
        transactions: Vec<Transaction>,
        keypair: &Keypair,
        timestamp: u64,
    ) -> Self {
        let header = Header {
            version: BLOCK_VERSION,
            data_hash: compute_data_hash(&transactions),
            prev_block_hash: prev.hash(),
            height: prev.height + 1,
            timestamp,
        };
        Self::sign(header, transactions, keypair)
    }

    /// The network's genesis block: height 0, zero parent, timestamp 0, no
    /// transactions, signed by `keypair`. Deterministic for a given key.
    pub fn genesis(keypair: &Keypair) -> Self {
        let header = Header {
            version: BLOCK_VERSION,
            data_hash: compute_data_hash(&[]),
            prev_block_hash: ZERO_HASH,
            height: 0,
            timestamp: GENESIS_TIMESTAMP,
        };
        Self::sign(header, Vec::new(), keypair)
    }

    /// Full block verification:
    ///
    /// 1. The signature covers the header hash under `signer`.
    /// 2. Every transaction verifies.
    /// 3. The recomputed data hash matches the header.
    pub fn verify(&self) -> Result<(), BlockVerifyError> {
        let height = self.header.height;
        if !self.signer.verify(&self.hash, &self.signature) {
            return Err(BlockVerifyError::BadSignature {
                height,
                hash: self.hash,
            });
        }

        for tx in &self.transactions {
            verify_transaction(tx).map_err(|error| BlockVerifyError::Transaction { height, error })?;
        }

        let computed = compute_data_hash(&self.transactions);
        if computed != self.header.data_hash {
            return Err(BlockVerifyError::DataHashMismatch {
                height,
                stored: self.header.data_hash,
                computed,
            });
        }

        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn signer(&self) -> &PublicKey {
        &self.signer
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// BLAKE3 over the ordered concatenation of transaction hashes.
pub fn compute_data_hash(transactions: &[Transaction]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for tx in transactions {
        hasher.update(&tx.hash());
    }
    *hasher.finalize().as_bytes()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
