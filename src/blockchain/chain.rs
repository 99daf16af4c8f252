use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use super::block::Block;
use super::crypto::Address;
use super::proof::{SealError, Sealer, StopSignal};
use super::storage::{BlockchainStorage, StorageError};
use super::transaction::{Transaction, TransactionError};

/// Memo carried by the coinbase of every genesis block
pub const GENESIS_MEMO: &str = "First Transaction from Genesis";

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("No existing blockchain found at {0}, create one first")]
    NotInitialized(String),

    #[error("Blockchain already exists at {0}")]
    AlreadyInitialized(String),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Seal error: {0}")]
    SealError(#[from] SealError),

    #[error("Value overflow: {0}")]
    ValueOverflow(String),

    #[error("System error: {0}")]
    SystemError(String),
}

/// Parameters shared by every block the ledger seals
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Mining difficulty (number of leading zero bits required in the hash)
    pub difficulty: u32,

    /// Value issued by the genesis coinbase
    pub reward: u64,

    /// Budget for one nonce search; `None` searches until cancelled
    pub seal_timeout: Option<Duration>,
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            difficulty: 12,
            reward: 100,
            seal_timeout: None,
        }
    }
}

/// Represents the persisted chain and its tip
#[derive(Debug)]
pub struct Blockchain {
    /// Hash of the most recently appended block
    tip: Vec<u8>,

    /// Storage for blockchain data
    storage: BlockchainStorage,

    /// Proof-of-work sealer used for new blocks
    sealer: Sealer,
}

fn sealer_for(params: &ChainParams) -> Result<Sealer, BlockchainError> {
    Ok(Sealer::new(params.difficulty)?.with_timeout(params.seal_timeout))
}

impl Blockchain {
    /// Opens an existing chain
    ///
    /// # Arguments
    ///
    /// * `path` - The directory holding the block store
    /// * `params` - Sealing parameters for blocks appended from now on
    ///
    /// # Returns
    ///
    /// The ledger positioned at the persisted tip, or
    /// [`BlockchainError::NotInitialized`] when no chain was created at
    /// `path`. Nothing is written to a path that holds no store.
    pub fn open<P: AsRef<Path>>(path: P, params: &ChainParams) -> Result<Self, BlockchainError> {
        let path = path.as_ref();
        if !BlockchainStorage::exists(path) {
            return Err(BlockchainError::NotInitialized(path.display().to_string()));
        }

        let storage = BlockchainStorage::open(path)?;
        let tip = storage
            .tip()?
            .ok_or_else(|| BlockchainError::NotInitialized(path.display().to_string()))?;

        info!("Loaded blockchain with tip {}", hex::encode(&tip));

        Ok(Blockchain {
            tip,
            storage,
            sealer: sealer_for(params)?,
        })
    }

    /// Creates a new chain whose genesis coinbase pays the reward to
    /// `address`.
    ///
    /// Fails with [`BlockchainError::AlreadyInitialized`] without touching
    /// any data when a chain already exists at `path`.
    pub fn initialize<P: AsRef<Path>>(
        path: P,
        address: &Address,
        params: &ChainParams,
    ) -> Result<Self, BlockchainError> {
        let path = path.as_ref();
        let sealer = sealer_for(params)?;
        std::fs::create_dir_all(path).map_err(|e| {
            BlockchainError::SystemError(format!("Failed to create {}: {}", path.display(), e))
        })?;

        let storage = BlockchainStorage::open(path)?;
        if storage.tip()?.is_some() {
            return Err(BlockchainError::AlreadyInitialized(path.display().to_string()));
        }

        let coinbase = Transaction::new_coinbase(address, GENESIS_MEMO, params.reward);
        let genesis = Block::genesis(coinbase, &sealer)?;

        storage.append_block(&genesis, None).map_err(|e| match e {
            StorageError::TipMismatch { .. } => {
                BlockchainError::AlreadyInitialized(path.display().to_string())
            }
            other => other.into(),
        })?;
        storage.flush()?;

        info!("Genesis created: {}", genesis.hash_hex());

        Ok(Blockchain {
            tip: genesis.hash,
            storage,
            sealer,
        })
    }

    /// Seals a block over `transactions` on top of the persisted tip and
    /// appends it
    ///
    /// # Arguments
    ///
    /// * `transactions` - The transactions to commit, in order
    ///
    /// # Returns
    ///
    /// The appended block. The block write and the tip update commit
    /// together; on any error neither is visible and the in-memory tip is
    /// unchanged.
    pub fn add_block(&mut self, transactions: Vec<Transaction>) -> Result<Block, BlockchainError> {
        let last_hash = self
            .storage
            .tip()?
            .ok_or_else(|| StorageError::NotFound("Latest block hash not found".to_string()))?;

        let block = Block::create(transactions, last_hash, &self.sealer)?;

        self.storage.append_block(&block, Some(block.prev_hash.as_slice()))?;
        self.storage.flush()?;
        self.tip = block.hash.clone();

        info!(
            "Added block {} with {} transactions (nonce {})",
            block.hash_hex(),
            block.transactions.len(),
            block.nonce
        );

        Ok(block)
    }

    /// Walks the chain from the tip back to genesis
    pub fn iter(&self) -> ChainIterator<'_> {
        ChainIterator {
            current: Some(self.tip.clone()),
            storage: &self.storage,
        }
    }

    /// Gets the current tip hash
    pub fn tip_hash(&self) -> &[u8] {
        &self.tip
    }

    /// Number of blocks from the tip to genesis
    pub fn height(&self) -> Result<usize, BlockchainError> {
        let mut height = 0;
        for block in self.iter() {
            block?;
            height += 1;
        }
        Ok(height)
    }

    /// Routes `stop` into the sealer so raising it interrupts a running seal
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.sealer = self.sealer.with_stop_signal(stop);
        self
    }

    /// Re-verifies every block's seal and back link without re-mining
    pub fn audit(&self) -> Result<ChainAudit, BlockchainError> {
        let mut audit = ChainAudit::default();
        let mut expected_hash = self.tip.clone();

        for block in self.iter() {
            let block = block?;
            let linked = block.hash == expected_hash;
            let sealed = block.verify_seal();

            if !(linked && sealed) {
                warn!(
                    "Block {} failed audit (linked: {}, sealed: {})",
                    block.hash_hex(),
                    linked,
                    sealed
                );
                audit.invalid.push(block.hash_hex());
            }

            audit.blocks += 1;
            expected_hash = block.prev_hash;
        }

        debug!("Audited {} blocks, {} invalid", audit.blocks, audit.invalid.len());
        Ok(audit)
    }

    /// Flushes and releases the store
    pub fn close(self) -> Result<(), BlockchainError> {
        self.storage.flush()?;
        info!("Closed blockchain at tip {}", hex::encode(&self.tip));
        Ok(())
    }
}

/// Outcome of [`Blockchain::audit`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChainAudit {
    pub blocks: usize,

    /// Hashes (hex) of blocks whose seal or link did not check out
    pub invalid: Vec<String>,
}

impl ChainAudit {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// Lazy cursor from the tip to genesis.
///
/// Yields genesis last and then ends. A storage or decode failure is
/// yielded once and also ends the walk.
pub struct ChainIterator<'a> {
    current: Option<Vec<u8>>,
    storage: &'a BlockchainStorage,
}

impl Iterator for ChainIterator<'_> {
    type Item = Result<Block, BlockchainError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;

        match self.storage.get_block(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.current = Some(block.prev_hash.clone());
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

impl std::iter::FusedIterator for ChainIterator<'_> {}
