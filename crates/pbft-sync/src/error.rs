//! Sync error types.

use thiserror::Error;

/// Errors that can occur while synchronising blocks.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No connected peer reports the height.
    #[error("no peer has block {0}")]
    NoPeer(u64),

    /// A requested height is not in the local store.
    #[error("unknown block height: {0}")]
    UnknownHeight(i64),

    /// A block failed verification or could not be encoded.
    #[error("consensus error: {0}")]
    Consensus(#[from] pbft_consensus::ConsensusError),

    /// Transport error.
    #[error("network error: {0}")]
    Network(#[from] pbft_network::NetworkError),
}

/// A specialized Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
