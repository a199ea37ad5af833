//! The transaction type and its canonical hash.
//!
//! A transaction's identity is the BLAKE3 hash of its five content fields
//! (`nonce`, `from`, `to`, `value`, `data`). The signer, signature and
//! inclusion metadata are carried alongside but never hashed, so signing a
//! transaction or committing it to a block does not change its hash.

use serde::{Deserialize, Serialize};

use crate::crypto::{blake3_hash, Address, Hash, PublicKey, Signature};

/// A value transfer (or data-only record) between two accounts.
///
/// The hash is computed once at construction and whenever the value is
/// decoded, so [`Transaction::hash`] is a plain field read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTransaction", into = "RawTransaction")]
pub struct Transaction {
    nonce: u64,
    from: Address,
    to: Option<Address>,
    value: u64,
    data: Vec<u8>,
    signer: Option<PublicKey>,
    signature: Option<Signature>,
    block_height: Option<u32>,
    timestamp: Option<u64>,
    hash: Hash,
}

/// Serialized form. Identical to [`Transaction`] minus the cached hash,
/// which is never trusted from the wire or the disk.
#[derive(Clone, Serialize, Deserialize)]
struct RawTransaction {
    nonce: u64,
    from: Address,
    to: Option<Address>,
    value: u64,
    data: Vec<u8>,
    signer: Option<PublicKey>,
    signature: Option<Signature>,
    block_height: Option<u32>,
    timestamp: Option<u64>,
}

impl From<RawTransaction> for Transaction {
    fn from(raw: RawTransaction) -> Self {
        let hash = compute_tx_hash(raw.nonce, &raw.from, raw.to.as_ref(), raw.value, &raw.data);
        Self {
            nonce: raw.nonce,
            from: raw.from,
            to: raw.to,
            value: raw.value,
            data: raw.data,
            signer: raw.signer,
            signature: raw.signature,
            block_height: raw.block_height,
            timestamp: raw.timestamp,
            hash,
        }
    }
}

impl From<Transaction> for RawTransaction {
    fn from(tx: Transaction) -> Self {
        Self {
            nonce: tx.nonce,
            from: tx.from,
            to: tx.to,
            value: tx.value,
            data: tx.data,
            signer: tx.signer,
            signature: tx.signature,
            block_height: tx.block_height,
            timestamp: tx.timestamp,
        }
    }
}

impl Transaction {
    /// Build an unsigned transaction.
    pub fn new(nonce: u64, from: Address, to: Option<Address>, value: u64, data: Vec<u8>) -> Self {
        let hash = compute_tx_hash(nonce, &from, to.as_ref(), value, &data);
        Self {
            nonce,
            from,
            to,
            value,
            data,
            signer: None,
            signature: None,
            block_height: None,
            timestamp: None,
            hash,
        }
    }

    /// Build a transaction from already-signed parts, e.g. one submitted
    /// over the HTTP API.
    pub fn from_signed_parts(
        nonce: u64,
        from: Address,
        to: Option<Address>,
        value: u64,
        data: Vec<u8>,
        signer: PublicKey,
        signature: Signature,
    ) -> Self {
        let mut tx = Self::new(nonce, from, to, value, data);
        tx.signer = Some(signer);
        tx.signature = Some(signature);
        tx
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn from(&self) -> Address {
        self.from
    }

    pub fn to(&self) -> Option<Address> {
        self.to
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn signer(&self) -> Option<&PublicKey> {
        self.signer.as_ref()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Height of the block that committed this transaction, if any.
    pub fn block_height(&self) -> Option<u32> {
        self.block_height
    }

    /// Timestamp of the block that committed this transaction, if any.
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    pub fn is_signed(&self) -> bool {
        self.signer.is_some() && self.signature.is_some()
    }

    /// Copy of this transaction stamped with the committing block's height
    /// and timestamp. The hash is unchanged.
    pub fn included_at(&self, block_height: u32, timestamp: u64) -> Self {
        let mut tx = self.clone();
        tx.block_height = Some(block_height);
        tx.timestamp = Some(timestamp);
        tx
    }

    pub(crate) fn attach_signature(&mut self, signer: PublicKey, signature: Signature) {
        self.signer = Some(signer);
        self.signature = Some(signature);
    }
}

/// Canonical hash preimage:
///
/// ```text
/// nonce u64 LE | from [20] | to-tag u8 (0|1) [| to [20]] | value u64 LE | len(data) u32 LE | data
/// ```
///
/// Every field is fixed-width or length-prefixed, so no two distinct field
/// tuples share a preimage.
pub fn compute_tx_hash(
    nonce: u64,
    from: &Address,
    to: Option<&Address>,
    value: u64,
    data: &[u8],
) -> Hash {
    let mut preimage = Vec::with_capacity(8 + 20 + 21 + 8 + 4 + data.len());
    preimage.extend_from_slice(&nonce.to_le_bytes());
    preimage.extend_from_slice(from.as_bytes());
    match to {
        Some(addr) => {
            preimage.push(1);
            preimage.extend_from_slice(addr.as_bytes());
        }
        None => preimage.push(0),
    }
    preimage.extend_from_slice(&value.to_le_bytes());
    preimage.extend_from_slice(&(data.len() as u32).to_le_bytes());
    preimage.extend_from_slice(data);
    blake3_hash(&preimage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    #[test]
    fn hash_covers_every_content_field() {
        let base = Transaction::new(1, addr(1), Some(addr(2)), 10, vec![0xAA]);
        let variants = [
            Transaction::new(2, addr(1), Some(addr(2)), 10, vec![0xAA]),
            Transaction::new(1, addr(9), Some(addr(2)), 10, vec![0xAA]),
            Transaction::new(1, addr(1), Some(addr(9)), 10, vec![0xAA]),
            Transaction::new(1, addr(1), None, 10, vec![0xAA]),
            Transaction::new(1, addr(1), Some(addr(2)), 11, vec![0xAA]),
            Transaction::new(1, addr(1), Some(addr(2)), 10, vec![]),
        ];
        for v in &variants {
            assert_ne!(v.hash(), base.hash(), "{v:?} collided with base");
        }
    }

    #[test]
    fn absent_recipient_and_empty_data_hash_deterministically() {
        let a = Transaction::new(0, addr(1), None, 0, vec![]);
        let b = Transaction::new(0, addr(1), None, 0, vec![]);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn inclusion_metadata_does_not_change_hash() {
        let tx = Transaction::new(3, addr(1), Some(addr(2)), 5, vec![]);
        let included = tx.included_at(42, 1_700_000_000_000);
        assert_eq!(included.hash(), tx.hash());
        assert_eq!(included.block_height(), Some(42));
        assert_eq!(tx.block_height(), None);
    }

    #[test]
    fn decoding_recomputes_hash() {
        let tx = Transaction::new(3, addr(1), Some(addr(2)), 5, vec![1, 2, 3]);
        let bytes = bincode::serialize(&tx).unwrap();
        let decoded: Transaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash(), tx.hash());
    }
}
