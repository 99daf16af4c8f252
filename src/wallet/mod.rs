// Wallet module
//
// Key pairs, address derivation and the wallet file. The ledger treats
// addresses as opaque strings; nothing here is consulted when spending.

pub mod keys;
pub mod wallets;

pub use keys::{validate_address, WalletError};
pub use wallets::Wallets;
