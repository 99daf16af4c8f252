use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use std::fmt;
use std::str::FromStr;

/// Length in bytes of every digest the ledger produces
pub const HASH_LEN: usize = 32;

/// Hashes a byte slice with SHA-256
pub fn sha256(data: &[u8]) -> [u8; HASH_LEN] {
    Sha256::digest(data).into()
}

/// Writes a length-prefixed byte string into a hasher so that adjacent
/// variable-length fields cannot run into each other.
pub(crate) fn update_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Represents a payer or payee on the ledger.
///
/// The ledger treats an address as an opaque lock token: an output is
/// spendable by an address when the strings are equal. Format checks
/// belong to the wallet, never to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Address {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Address(s.to_string()))
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}
