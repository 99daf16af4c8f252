// Blockchain module
//
// This module contains the ledger engine:
// - Block structure and codec
// - Proof-of-work sealer
// - Transactions with explicit coinbase/spend inputs
// - Persisted chain and its tip-to-genesis iterator
// - UTXO scanning and output selection
// - sled storage adapter

pub mod block;
pub mod chain;
pub mod crypto;
pub mod proof;
pub mod storage;
pub mod transaction;
pub mod utxo;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError, ChainParams};
pub use crypto::Address;
pub use proof::StopSignal;
pub use transaction::Transaction;
