use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use ripemd::Ripemd160;
use sha2::Digest;
use thiserror::Error;

use crate::blockchain::crypto::sha256;
use crate::blockchain::Address;

/// Version byte prefixed to every public key hash
const VERSION: u8 = 0x00;

/// Bytes of double SHA-256 appended as a checksum
const CHECKSUM_LEN: usize = 4;

/// Length of a RIPEMD-160 public key hash
const PUB_KEY_HASH_LEN: usize = 20;

/// Errors that can occur during wallet operations
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Wallet file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Wallet file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Represents a wallet with a keypair
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Wallet::from_signing_key(SigningKey::from_bytes(&secret))
    }

    /// Creates a wallet from an existing secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, WalletError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            WalletError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Wallet::from_signing_key(SigningKey::from_bytes(&bytes_array)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = address_from_public_key(verifying_key.as_bytes());

        Wallet { signing_key, address }
    }

    /// Gets the wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Exports the wallet's secret key as bytes
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Wallet::new()
    }
}

/// RIPEMD-160 of the SHA-256 of a public key
pub fn public_key_hash(public_key: &[u8]) -> Vec<u8> {
    Ripemd160::digest(sha256(public_key)).to_vec()
}

/// First four bytes of the double SHA-256 of `payload`
pub fn checksum(payload: &[u8]) -> Vec<u8> {
    sha256(&sha256(payload))[..CHECKSUM_LEN].to_vec()
}

/// base58(version || pubkey hash || checksum)
pub fn address_from_public_key(public_key: &[u8]) -> Address {
    let mut payload = vec![VERSION];
    payload.extend(public_key_hash(public_key));
    let check = checksum(&payload);
    payload.extend(check);

    Address(bs58::encode(payload).into_string())
}

/// Whether `address` decodes to a versioned public key hash with a valid
/// checksum. The ledger never calls this; the CLI uses it to flag user
/// input that is not a wallet address.
pub fn validate_address(address: &str) -> bool {
    let decoded = match bs58::decode(address).into_vec() {
        Ok(decoded) => decoded,
        Err(_) => return false,
    };

    if decoded.len() != 1 + PUB_KEY_HASH_LEN + CHECKSUM_LEN || decoded[0] != VERSION {
        return false;
    }

    let (payload, check) = decoded.split_at(decoded.len() - CHECKSUM_LEN);
    checksum(payload) == check
}
