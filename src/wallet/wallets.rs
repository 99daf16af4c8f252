use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use super::keys::{Wallet, WalletError};
use crate::blockchain::Address;

/// On-disk form of the wallet file: address -> hex secret key
#[derive(Debug, Default, Serialize, Deserialize)]
struct WalletFile {
    wallets: BTreeMap<String, String>,
}

/// Collection of wallets persisted as one JSON file
#[derive(Debug)]
pub struct Wallets {
    path: PathBuf,
    wallets: BTreeMap<String, Wallet>,
}

impl Wallets {
    /// Loads the wallet file at `path`; a missing file yields an empty set
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();
        let mut wallets = BTreeMap::new();

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let file: WalletFile = serde_json::from_str(&content)?;

            for (address, secret) in file.wallets {
                let secret = hex::decode(&secret)
                    .map_err(|e| WalletError::InvalidPrivateKey(format!("{}: {}", address, e)))?;
                let wallet = Wallet::from_secret_key(&secret)?;

                if wallet.address().0 != address {
                    return Err(WalletError::InvalidPrivateKey(format!(
                        "key stored for {} derives {}",
                        address,
                        wallet.address()
                    )));
                }
                wallets.insert(address, wallet);
            }
        }

        Ok(Wallets { path, wallets })
    }

    /// Generates a new wallet and returns its address
    pub fn add_wallet(&mut self) -> Address {
        let wallet = Wallet::new();
        let address = wallet.address().clone();
        self.wallets.insert(address.0.clone(), wallet);
        address
    }

    /// Addresses of every stored wallet, sorted
    pub fn addresses(&self) -> Vec<Address> {
        self.wallets.keys().map(|address| Address(address.clone())).collect()
    }

    /// Writes every wallet back to the file, creating parent directories
    pub fn save(&self) -> Result<(), WalletError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = WalletFile {
            wallets: self
                .wallets
                .iter()
                .map(|(address, wallet)| (address.clone(), hex::encode(wallet.export_secret_key())))
                .collect(),
        };

        fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        info!("Saved {} wallets to {}", self.wallets.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let wallets = Wallets::load(dir.path().join("wallets.json")).unwrap();
        assert!(wallets.addresses().is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("wallets.json");

        let mut wallets = Wallets::load(&path).unwrap();
        let first = wallets.add_wallet();
        let second = wallets.add_wallet();
        wallets.save().unwrap();

        let reloaded = Wallets::load(&path).unwrap();
        let mut expected = vec![first.clone(), second];
        expected.sort();
        assert_eq!(reloaded.addresses(), expected);
        assert_eq!(
            reloaded.wallets[&first.0].export_secret_key(),
            wallets.wallets[&first.0].export_secret_key()
        );
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        let secret = hex::encode(Wallet::new().export_secret_key());
        fs::write(&path, format!("{{\"wallets\":{{\"someone-else\":\"{}\"}}}}", secret)).unwrap();

        assert!(matches!(Wallets::load(&path), Err(WalletError::InvalidPrivateKey(_))));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(Wallets::load(&path), Err(WalletError::Corrupt(_))));
    }
}
