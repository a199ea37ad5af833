//! Account addresses.
//!
//! An address is the first 20 bytes of `SHA-256(public_key)`. Accounts,
//! transaction senders and recipients, and block reward payouts are all
//! keyed by it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::hash::sha256_array;
use super::keys::PublicKey;

/// Length of an address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// A 20-byte account identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; ADDRESS_LEN]);

/// Error returned when parsing a hex address.
#[derive(Debug, thiserror::Error)]
#[error("invalid address: expected {ADDRESS_LEN} hex-encoded bytes")]
pub struct AddressParseError;

impl Address {
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the address controlled by `key`.
    pub fn from_public_key(key: &PublicKey) -> Self {
        let digest = sha256_array(key.as_bytes());
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest[..ADDRESS_LEN]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Accepts plain hex, with or without a `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| AddressParseError)?;
        let arr: [u8; ADDRESS_LEN] = bytes.as_slice().try_into().map_err(|_| AddressParseError)?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn derivation_is_truncated_sha256_of_key() {
        let kp = Keypair::from_seed(&[1u8; 32]);
        let digest = sha256_array(kp.public_key().as_bytes());
        assert_eq!(kp.address().as_bytes()[..], digest[..20]);
    }

    #[test]
    fn distinct_keys_distinct_addresses() {
        let a = Keypair::from_seed(&[1u8; 32]).address();
        let b = Keypair::from_seed(&[2u8; 32]).address();
        assert_ne!(a, b);
    }

    #[test]
    fn parse_accepts_prefixed_and_plain_hex() {
        let addr = Keypair::from_seed(&[3u8; 32]).address();
        let plain: Address = addr.to_hex().parse().unwrap();
        let prefixed: Address = format!("0x{}", addr.to_hex()).parse().unwrap();
        assert_eq!(plain, addr);
        assert_eq!(prefixed, addr);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!("abcd".parse::<Address>().is_err());
        assert!("zz".repeat(20).parse::<Address>().is_err());
    }
}
