//! Configuration management for the ledger

use serde::Deserialize;
use thiserror::Error;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::blockchain::ChainParams;

/// Config file read when no `--config` flag is given
pub const DEFAULT_CONFIG_FILE: &str = "ledger.toml";

/// Highest difficulty accepted from a config file
const MAX_CONFIGURED_DIFFICULTY: u32 = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_wallet_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_reward")]
    pub reward: u64,
    #[serde(default)]
    pub seal_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            path: default_wallet_path(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            reward: default_reward(),
            seal_timeout_secs: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ConsensusConfig {
    pub fn chain_params(&self) -> ChainParams {
        ChainParams {
            difficulty: self.difficulty,
            reward: self.reward,
            seal_timeout: self.seal_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./tmp/blocks")
}

fn default_wallet_path() -> PathBuf {
    PathBuf::from("./tmp/wallets/wallets.json")
}

fn default_difficulty() -> u32 {
    12
}

fn default_reward() -> u64 {
    100
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Loads the config file.
///
/// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
/// read if present and defaults are used otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let (path, required) = match path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG_FILE), false),
    };

    let config: Config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content)?,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    };

    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate critical values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("storage.path must be set".to_string()));
        }

        if self.wallet.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("wallet.path must be set".to_string()));
        }

        if self.consensus.difficulty == 0 || self.consensus.difficulty > MAX_CONFIGURED_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "consensus.difficulty must be between 1 and {}",
                MAX_CONFIGURED_DIFFICULTY
            )));
        }

        if self.consensus.reward == 0 {
            return Err(ConfigError::Invalid("consensus.reward must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.consensus.difficulty, 12);
        assert_eq!(config.consensus.reward, 100);
        assert_eq!(config.api.port, 8080);
        assert!(config.consensus.chain_params().seal_timeout.is_none());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        fs::write(
            &path,
            "[consensus]\ndifficulty = 16\nseal_timeout_secs = 30\n\n[storage]\npath = \"/var/lib/ledger\"\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.consensus.difficulty, 16);
        assert_eq!(config.consensus.reward, 100);
        assert_eq!(config.storage.path, PathBuf::from("/var/lib/ledger"));
        assert_eq!(
            config.consensus.chain_params().seal_timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");

        fs::write(&path, "[consensus]\ndifficulty = 0\n").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Invalid(_))));

        fs::write(&path, "[consensus]\nreward = 0\n").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Invalid(_))));

        fs::write(&path, "[consensus\n").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Parse(_))));
    }
}
