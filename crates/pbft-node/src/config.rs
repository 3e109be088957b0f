//! Node configuration types.

use crate::error::{NodeError, Result};
use crate::logging::LogFormat;
use pbft_consensus::{EngineConfig, Genesis, Keypair, MempoolConfig};
use pbft_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides, e.g. `PBFT__ENGINE__VIEW_TIMEOUT=2000`.
pub const ENV_PREFIX: &str = "PBFT";

/// Configuration for a PBFT node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Log level.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,

    /// Genesis file (JSON or YAML).
    pub genesis: Option<PathBuf>,
    /// Ed25519 secret key (hex encoded). Without one the node only follows.
    pub private_key: Option<String>,
    /// Where the chain head is checkpointed after every commit.
    pub checkpoint: Option<PathBuf>,

    /// Consensus engine settings.
    pub engine: EngineConfig,
    /// Block sync settings.
    pub sync: SyncConfig,
    /// Transaction pool settings.
    pub mempool: MempoolSettings,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            genesis: None,
            private_key: None,
            checkpoint: None,
            engine: EngineConfig::default(),
            sync: SyncConfig::default(),
            mempool: MempoolSettings::default(),
        }
    }
}

impl NodeConfig {
    /// Loads the configuration from an optional file plus `PBFT__*`
    /// environment overrides. Missing fields take their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Loads and validates the configured genesis file.
    pub fn load_genesis(&self) -> Result<Genesis> {
        let path = self.genesis.as_ref().ok_or(NodeError::MissingGenesis)?;
        Ok(Genesis::load(path)?)
    }

    /// Parses the configured signing key, if any.
    pub fn signer(&self) -> Result<Option<Keypair>> {
        self.private_key
            .as_deref()
            .map(|secret| Keypair::from_secret_hex(secret.trim()).map_err(NodeError::from))
            .transpose()
    }
}

/// Transaction pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolSettings {
    /// Maximum pending transactions.
    pub capacity: usize,
    /// Maximum age of a pending transaction, in milliseconds.
    pub max_age_ms: u64,
}

impl Default for MempoolSettings {
    fn default() -> Self {
        let defaults = MempoolConfig::default();
        Self {
            capacity: defaults.max_transactions,
            max_age_ms: u64::try_from(defaults.max_transaction_age.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl From<&MempoolSettings> for MempoolConfig {
    fn from(settings: &MempoolSettings) -> Self {
        MempoolConfig {
            max_transactions: settings.capacity,
            max_transaction_age: Duration::from_millis(settings.max_age_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.engine.view_timeout, Duration::from_secs(10));
        assert_eq!(config.sync.window, 100);
        assert_eq!(config.mempool.capacity, 10_000);
        assert!(config.signer().unwrap().is_none());
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "log_level: debug\nlog_format: json\nengine:\n  view_timeout: 2000\n  max_txs_per_block: 50\nsync:\n  window: 8\n"
        )
        .unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.engine.view_timeout, Duration::from_secs(2));
        assert_eq!(config.engine.max_txs_per_block, 50);
        assert_eq!(config.engine.poll_interval, Duration::from_millis(500));
        assert_eq!(config.sync.window, 8);
        assert_eq!(config.sync.fetch_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = NodeConfig::load(Some(Path::new("/nonexistent/pbft-node.yaml")));
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn test_load_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.yaml");
        let (genesis, _) = pbft_consensus::generate_devnet_genesis(4).unwrap();
        genesis.save_yaml(&path).unwrap();

        let config = NodeConfig {
            genesis: Some(path),
            ..NodeConfig::default()
        };
        assert_eq!(config.load_genesis().unwrap(), genesis);

        assert!(matches!(
            NodeConfig::default().load_genesis(),
            Err(NodeError::MissingGenesis)
        ));
    }

    #[test]
    fn test_signer_from_secret() {
        let keypair = Keypair::from_seed(9);
        let config = NodeConfig {
            private_key: Some(keypair.secret_hex()),
            ..NodeConfig::default()
        };

        let signer = config.signer().unwrap().unwrap();
        assert_eq!(signer.public_key(), keypair.public_key());

        let bad = NodeConfig {
            private_key: Some("zz".to_string()),
            ..NodeConfig::default()
        };
        assert!(bad.signer().is_err());
    }

    #[test]
    fn test_mempool_settings_conversion() {
        let settings = MempoolSettings {
            capacity: 5,
            max_age_ms: 1500,
        };
        let config = MempoolConfig::from(&settings);
        assert_eq!(config.max_transactions, 5);
        assert_eq!(config.max_transaction_age, Duration::from_millis(1500));
    }
}
