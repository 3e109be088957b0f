//! Genesis configuration for the consensus network.
//!
//! The genesis file defines the validator set, the initial account balances
//! and network-wide consensus parameters. Every node must load an identical
//! genesis; the genesis block is derived from it deterministically.

use crate::block::Block;
use crate::crypto::{Keypair, PublicKey};
use crate::error::{ConsensusError, Result};
use crate::transaction::Address;
use crate::validator::ValidatorSet;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Genesis configuration for a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// Human-readable name.
    pub name: String,

    /// Public key (hex-encoded).
    pub pubkey: String,
}

/// An account funded at genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// Account address.
    pub address: Address,

    /// Initial balance.
    pub balance: u64,
}

/// Consensus parameters from genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Maximum transactions per block.
    pub max_txs_per_block: usize,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            max_txs_per_block: 3000,
        }
    }
}

/// Complete genesis configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    /// Network identifier (chain ID).
    pub chain_id: String,

    /// Genesis timestamp (unix milliseconds).
    pub timestamp: u64,

    /// Validators in index order.
    pub validators: Vec<GenesisValidator>,

    /// Initial balances.
    #[serde(default)]
    pub accounts: Vec<GenesisAccount>,

    /// Consensus parameters.
    #[serde(default)]
    pub consensus: ConsensusParams,
}

impl Genesis {
    /// Creates a new genesis configuration.
    pub fn new(chain_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            chain_id: chain_id.into(),
            timestamp,
            validators: Vec::new(),
            accounts: Vec::new(),
            consensus: ConsensusParams::default(),
        }
    }

    /// Adds a validator to the genesis.
    pub fn with_validator(mut self, name: impl Into<String>, key: &PublicKey) -> Self {
        self.validators.push(GenesisValidator {
            name: name.into(),
            pubkey: key.as_hex().to_string(),
        });
        self
    }

    /// Funds an account.
    pub fn with_account(mut self, address: Address, balance: u64) -> Self {
        self.accounts.push(GenesisAccount { address, balance });
        self
    }

    /// Loads genesis from a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConsensusError::InvalidGenesis(format!("failed to read file: {}", e)))?;

        let genesis: Genesis = serde_json::from_str(&content)?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Loads genesis from a YAML file.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConsensusError::InvalidGenesis(format!("failed to read file: {}", e)))?;

        let genesis: Genesis = serde_yaml::from_str(&content)
            .map_err(|e| ConsensusError::InvalidGenesis(e.to_string()))?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Loads genesis, picking the format from the file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::load_yaml(path),
            _ => Self::load_json(path),
        }
    }

    /// Validates the genesis configuration.
    pub fn validate(&self) -> Result<()> {
        if self.chain_id.is_empty() {
            return Err(ConsensusError::InvalidGenesis("chain_id is empty".into()));
        }

        if self.consensus.max_txs_per_block == 0 {
            return Err(ConsensusError::InvalidGenesis(
                "max_txs_per_block must be positive".into(),
            ));
        }

        let mut seen_names = std::collections::HashSet::new();
        for v in &self.validators {
            if !seen_names.insert(&v.name) {
                return Err(ConsensusError::InvalidGenesis(format!(
                    "duplicate validator name: {}",
                    v.name
                )));
            }
        }

        // Checks emptiness, key validity and duplicate keys.
        self.validator_set()?;

        let mut seen_accounts = std::collections::HashSet::new();
        for account in &self.accounts {
            if !seen_accounts.insert(&account.address) {
                return Err(ConsensusError::InvalidGenesis(format!(
                    "duplicate account: {}",
                    account.address
                )));
            }
        }

        Ok(())
    }

    /// Builds the validator set.
    pub fn validator_set(&self) -> Result<ValidatorSet> {
        ValidatorSet::new(
            self.validators
                .iter()
                .map(|v| (v.name.clone(), PublicKey::from_hex(v.pubkey.clone()))),
        )
        .map_err(|e| match e {
            ConsensusError::InvalidKey(msg) => {
                ConsensusError::InvalidGenesis(format!("invalid validator key: {msg}"))
            }
            other => other,
        })
    }

    /// Returns the initial balances.
    pub fn balances(&self) -> impl Iterator<Item = (Address, u64)> + '_ {
        self.accounts
            .iter()
            .map(|account| (account.address.clone(), account.balance))
    }

    /// Derives the genesis block.
    pub fn block(&self) -> Block {
        Block::genesis(self.timestamp)
    }

    /// Saves genesis to a JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Saves genesis to a YAML file.
    pub fn save_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConsensusError::InvalidGenesis(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

/// Balance given to every devnet validator account.
pub const DEVNET_BALANCE: u64 = 1_000_000;

/// Generates a devnet genesis with deterministic validator keys.
///
/// Validator `i` uses `Keypair::from_seed(i)`; its account is funded with
/// [`DEVNET_BALANCE`]. The keypairs are returned in validator order.
pub fn generate_devnet_genesis(validator_count: usize) -> Result<(Genesis, Vec<Keypair>)> {
    let keys: Vec<Keypair> = (0..validator_count as u64).map(Keypair::from_seed).collect();

    let mut genesis = Genesis::new("pbft-devnet", 0);
    for (i, key) in keys.iter().enumerate() {
        let public_key = key.public_key();
        genesis = genesis
            .with_validator(format!("validator-{}", i + 1), &public_key)
            .with_account(Address::from_public_key(&public_key)?, DEVNET_BALANCE);
    }

    Ok((genesis, keys))
}
