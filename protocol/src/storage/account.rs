//! Account state.
//!
//! Accounts are created lazily the first time a block touches an address.
//! A missing account and a zero-balance account are different things: the
//! ledger reports the former as `None`.

use serde::{Deserialize, Serialize};

use crate::crypto::Address;

/// The on-chain state of a single address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    /// Nonce the next transaction from this account must carry.
    pub nonce: u64,
    pub balance: u64,
}

impl Account {
    /// Fresh account: nonce 0, balance 0.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            nonce: 0,
            balance: 0,
        }
    }

    pub fn with_balance(address: Address, balance: u64) -> Self {
        Self {
            balance,
            ..Self::new(address)
        }
    }

    /// Add `amount`, or `None` on overflow.
    pub fn checked_credit(&self, amount: u64) -> Option<Self> {
        let balance = self.balance.checked_add(amount)?;
        Some(Self {
            balance,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_is_empty() {
        let acct = Account::new(Address::from_bytes([1; 20]));
        assert_eq!(acct.nonce, 0);
        assert_eq!(acct.balance, 0);
    }

    #[test]
    fn credit_overflow_is_none() {
        let acct = Account::with_balance(Address::from_bytes([1; 20]), u64::MAX);
        assert!(acct.checked_credit(1).is_none());
        assert_eq!(acct.checked_credit(0).map(|a| a.balance), Some(u64::MAX));
    }
}
