//! Transaction signing and signature verification.
//!
//! The signature covers the transaction hash. A transaction is valid when
//! the signature verifies under the attached signer key *and* that key
//! controls the `from` address, so nobody can spend from an account they do
//! not hold the key for.

use super::types::Transaction;
use crate::crypto::{Address, Keypair};

/// Reasons a transaction fails verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxVerifyError {
    #[error("transaction {0} has no signature")]
    Unsigned(String),

    #[error("transaction {0} has an invalid signature")]
    BadSignature(String),

    #[error("transaction {hash} signer controls {signer}, not sender {from}")]
    SignerMismatch {
        hash: String,
        signer: Address,
        from: Address,
    },
}

/// Sign `tx` in place. Sets both the signer and the signature.
///
/// # Example
///
/// ```
/// use keel_protocol::crypto::Keypair;
/// use keel_protocol::transaction::{sign_transaction, verify_transaction, Transaction};
///
/// let alice = Keypair::generate();
/// let bob = Keypair::generate();
/// let mut tx = Transaction::new(0, alice.address(), Some(bob.address()), 5, vec![]);
/// sign_transaction(&mut tx, &alice);
/// assert!(verify_transaction(&tx).is_ok());
/// ```
pub fn sign_transaction<'a>(tx: &'a mut Transaction, keypair: &Keypair) -> &'a Transaction {
    let signature = keypair.sign_hash(&tx.hash());
    tx.attach_signature(keypair.public_key(), signature);
    tx
}

/// Check the signature and the signer/sender binding.
pub fn verify_transaction(tx: &Transaction) -> Result<(), TxVerifyError> {
    let (Some(signer), Some(signature)) = (tx.signer(), tx.signature()) else {
        return Err(TxVerifyError::Unsigned(tx.hash_hex()));
    };

    if !signer.verify(&tx.hash(), signature) {
        return Err(TxVerifyError::BadSignature(tx.hash_hex()));
    }

    let signer_address = Address::from_public_key(signer);
    if signer_address != tx.from() {
        return Err(TxVerifyError::SignerMismatch {
            hash: tx.hash_hex(),
            signer: signer_address,
            from: tx.from(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
