use bincode::Options;
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::crypto::HASH_LEN;
use super::proof::{self, SealContent, SealError, Sealer};
use super::transaction::Transaction;

/// Represents a sealed block in the chain.
///
/// Blocks are only built through [`Block::genesis`] and [`Block::create`],
/// both of which seal before returning, so a block value always carries the
/// hash its proof of work produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Unix timestamp (seconds) taken when sealing started
    pub timestamp: i64,

    /// Transactions in the order they are committed to
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block; empty for the genesis block
    pub prev_hash: Vec<u8>,

    /// Leading zero bits the hash was sealed with
    pub difficulty: u32,

    /// Proof of work
    pub nonce: u64,

    /// Hash of the block content and nonce
    pub hash: Vec<u8>,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new().reject_trailing_bytes()
}

impl Block {
    /// Creates and seals the first block of a chain around its coinbase
    pub fn genesis(coinbase: Transaction, sealer: &Sealer) -> Result<Self, SealError> {
        Block::create(vec![coinbase], Vec::new(), sealer)
    }

    /// Creates and seals a block on top of `prev_hash`
    ///
    /// # Arguments
    ///
    /// * `transactions` - The transactions to commit to, in order
    /// * `prev_hash` - The hash of the previous block (empty for genesis)
    /// * `sealer` - The sealer that searches for the nonce
    ///
    /// # Returns
    ///
    /// The sealed block. Blocks the caller until the sealer finds a nonce or
    /// gives up.
    pub fn create(
        transactions: Vec<Transaction>,
        prev_hash: Vec<u8>,
        sealer: &Sealer,
    ) -> Result<Self, SealError> {
        let timestamp = Utc::now().timestamp();
        let tx_root = transactions_root(&transactions);

        let seal = sealer.seal(&SealContent {
            prev_hash: &prev_hash,
            tx_root,
            timestamp,
            difficulty: sealer.difficulty(),
        })?;
        debug!("Sealed after {} attempts", seal.attempts);

        Ok(Block {
            timestamp,
            transactions,
            prev_hash,
            difficulty: sealer.difficulty(),
            nonce: seal.nonce,
            hash: seal.hash,
        })
    }

    /// The content covered by this block's proof of work
    pub fn seal_content(&self) -> SealContent<'_> {
        SealContent {
            prev_hash: &self.prev_hash,
            tx_root: transactions_root(&self.transactions),
            timestamp: self.timestamp,
            difficulty: self.difficulty,
        }
    }

    /// Checks the stored nonce and hash against the block's target.
    ///
    /// The seal commits to transaction ids, so every id is re-derived from
    /// its transaction's content first.
    pub fn verify_seal(&self) -> bool {
        self.transactions
            .iter()
            .all(|transaction| transaction.id == transaction.calculate_id())
            && proof::verify(&self.seal_content(), self.nonce, &self.hash)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }

    pub fn prev_hash_hex(&self) -> String {
        hex::encode(&self.prev_hash)
    }

    pub fn to_bytes(&self) -> bincode::Result<Vec<u8>> {
        codec().serialize(self)
    }

    /// Decodes a stored block. Truncated input and trailing bytes are both
    /// rejected.
    pub fn from_bytes(bytes: &[u8]) -> bincode::Result<Block> {
        codec().deserialize(bytes)
    }
}

/// SHA-256 over the ordered transaction ids
pub fn transactions_root(transactions: &[Transaction]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    for transaction in transactions {
        hasher.update(&transaction.id);
    }
    hasher.finalize().into()
}
