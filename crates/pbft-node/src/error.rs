//! Error types for the node.

use thiserror::Error;

/// Errors raised while assembling or operating a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A consensus-layer failure (genesis, keys, transactions).
    #[error(transparent)]
    Consensus(#[from] pbft_consensus::ConsensusError),

    /// A transport failure.
    #[error(transparent)]
    Network(#[from] pbft_network::NetworkError),

    /// The genesis file is not configured.
    #[error("no genesis file configured")]
    MissingGenesis,
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
