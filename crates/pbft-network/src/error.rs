//! Network error types.

use thiserror::Error;

/// Errors that can occur during network operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Peer not found or no longer reachable.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// Envelope or payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The envelope was addressed to a channel nobody listens on.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// The local endpoint has been disconnected from the network.
    #[error("transport disconnected")]
    Disconnected,
}

/// A specialized Result type for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
