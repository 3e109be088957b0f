//! Consensus error types.

use thiserror::Error;

/// Errors that can occur during consensus operations.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// A signature did not verify.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// A key could not be decoded.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The signer is not part of the validator set.
    #[error("unknown signer: {0}")]
    UnknownSigner(String),

    /// A message is structurally invalid.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A block failed verification.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// A block carries too few valid signatures.
    #[error("insufficient quorum: have {have}, need {need}")]
    InsufficientQuorum {
        /// Valid signatures found, primary included.
        have: usize,
        /// Required quorum size.
        need: usize,
    },

    /// A transaction failed validation or execution.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Transaction already pending or already applied.
    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    /// Sender balance is too low.
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance {
        /// Current balance.
        have: u64,
        /// Amount required.
        need: u64,
    },

    /// A block does not extend the current chain height.
    #[error("height mismatch: expected {expected}, got {actual}")]
    HeightMismatch {
        /// Height the chain expects next.
        expected: u64,
        /// Height of the offered block.
        actual: u64,
    },

    /// A block does not extend the current chain head.
    #[error("parent mismatch: expected {expected}, got {actual}")]
    ParentMismatch {
        /// Current head id.
        expected: String,
        /// Parent id of the offered block.
        actual: String,
    },

    /// Invalid genesis configuration.
    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    /// Not a validator.
    #[error("not a validator")]
    NotValidator,

    /// Checkpoint or file I/O failed.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport error.
    #[error("network error: {0}")]
    Network(#[from] pbft_network::NetworkError),

    /// The engine task has exited.
    #[error("consensus engine stopped")]
    EngineStopped,
}

/// A specialized Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;
