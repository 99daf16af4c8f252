use std::path::Path;

use log::{debug, info};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use thiserror::Error;

use super::block::Block;

/// Reserved metadata key holding the hash of the chain tip
const TIP_KEY: &[u8] = b"lh";

/// Main data file sled keeps inside its directory
const SLED_DB_FILE: &str = "db";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Tip moved: expected {expected}, found {found}")]
    TipMismatch { expected: String, found: String },
}

/// Persisted chain: sealed blocks keyed by their hash plus the tip pointer
pub struct BlockchainStorage {
    /// The database instance
    db: Db,

    /// Tree for blocks
    blocks: Tree,

    /// Tree for metadata
    metadata: Tree,
}

impl std::fmt::Debug for BlockchainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainStorage")
            .finish()
    }
}

fn describe(hash: Option<&[u8]>) -> String {
    match hash {
        Some(hash) => hex::encode(hash),
        None => "<none>".to_string(),
    }
}

impl BlockchainStorage {
    /// Opens (or creates) the store at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the database directory
    ///
    /// # Returns
    ///
    /// A new BlockchainStorage instance. sled holds an exclusive file lock
    /// on the directory, so a second open of the same location fails here
    /// with a database error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .path(path.as_ref())
            .flush_every_ms(None)
            .open()?;

        let blocks = db.open_tree("blocks")?;
        let metadata = db.open_tree("metadata")?;

        info!("Opened block store at {}", path.as_ref().display());

        Ok(Self {
            db,
            blocks,
            metadata,
        })
    }

    /// Whether a store was ever created at `path`. Never writes.
    pub fn exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().join(SLED_DB_FILE).is_file()
    }

    /// Reads the persisted tip pointer
    pub fn tip(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.metadata.get(TIP_KEY)?.map(|hash| hash.to_vec()))
    }

    /// Gets a block by its hash
    ///
    /// # Arguments
    ///
    /// * `hash` - The hash of the block
    ///
    /// # Returns
    ///
    /// The decoded block, `NotFound` if no block is stored under `hash`, or
    /// `DeserializationError` if the stored bytes do not decode
    pub fn get_block(&self, hash: &[u8]) -> Result<Block, StorageError> {
        match self.blocks.get(hash)? {
            Some(value) => Block::from_bytes(&value).map_err(|e| {
                StorageError::DeserializationError(format!(
                    "block {}: {}",
                    hex::encode(hash),
                    e
                ))
            }),
            None => Err(StorageError::NotFound(format!(
                "Block with hash {} not found",
                hex::encode(hash)
            ))),
        }
    }

    /// Writes `block` and points the tip at it in one transaction.
    ///
    /// The write is rejected unless the stored tip still equals
    /// `expected_tip` (`None` meaning no tip has ever been written). Either
    /// both keys are written or neither is.
    pub fn append_block(
        &self,
        block: &Block,
        expected_tip: Option<&[u8]>,
    ) -> Result<(), StorageError> {
        let value = block
            .to_bytes()
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        let key = block.hash.as_slice();

        (&self.blocks, &self.metadata)
            .transaction(|(blocks, metadata)| {
                let current = metadata.get(TIP_KEY)?;
                if current.as_deref() != expected_tip {
                    return Err(ConflictableTransactionError::Abort(
                        StorageError::TipMismatch {
                            expected: describe(expected_tip),
                            found: describe(current.as_deref()),
                        },
                    ));
                }

                blocks.insert(key, value.clone())?;
                metadata.insert(TIP_KEY, key)?;
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => StorageError::DatabaseError(e),
            })?;

        debug!("Persisted block {} ({} bytes)", block.hash_hex(), value.len());
        Ok(())
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Address;
    use crate::blockchain::proof::Sealer;
    use crate::blockchain::transaction::Transaction;

    fn genesis() -> Block {
        Block::genesis(
            Transaction::new_coinbase(&Address::from("Alice"), "", 100),
            &Sealer::new(4).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_store_has_no_tip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = BlockchainStorage::open(dir.path()).unwrap();

        assert_eq!(storage.tip().unwrap(), None);
    }

    #[test]
    fn test_exists_only_after_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks");
        std::fs::create_dir_all(&path).unwrap();
        assert!(!BlockchainStorage::exists(&path));

        let storage = BlockchainStorage::open(&path).unwrap();
        storage.flush().unwrap();
        assert!(BlockchainStorage::exists(&path));
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let storage = BlockchainStorage::open(dir.path()).unwrap();
        let block = genesis();

        storage.append_block(&block, None).unwrap();

        assert_eq!(storage.tip().unwrap(), Some(block.hash.clone()));
        assert_eq!(storage.get_block(&block.hash).unwrap(), block);
    }

    #[test]
    fn test_append_rejects_stale_tip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = BlockchainStorage::open(dir.path()).unwrap();
        let first = genesis();
        storage.append_block(&first, None).unwrap();

        let second = genesis();
        let result = storage.append_block(&second, None);

        assert!(matches!(result, Err(StorageError::TipMismatch { .. })));
        assert_eq!(storage.tip().unwrap(), Some(first.hash.clone()));
        assert!(matches!(
            storage.get_block(&second.hash),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_block() {
        let dir = tempfile::tempdir().unwrap();
        let storage = BlockchainStorage::open(dir.path()).unwrap();

        assert!(matches!(
            storage.get_block(&[0u8; 32]),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_block_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let storage = BlockchainStorage::open(dir.path()).unwrap();
        storage.blocks.insert(b"broken", &b"not a block"[..]).unwrap();

        assert!(matches!(
            storage.get_block(b"broken"),
            Err(StorageError::DeserializationError(_))
        ));
    }

    #[test]
    fn test_reopen_keeps_tip() {
        let dir = tempfile::tempdir().unwrap();
        let block = genesis();
        {
            let storage = BlockchainStorage::open(dir.path()).unwrap();
            storage.append_block(&block, None).unwrap();
            storage.flush().unwrap();
        }

        let storage = BlockchainStorage::open(dir.path()).unwrap();
        assert_eq!(storage.tip().unwrap(), Some(block.hash));
    }
}
