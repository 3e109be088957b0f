//! # PBFT Network
//!
//! Transport layer contract for PBFT validators.
//!
//! Consensus and block sync never talk to sockets directly. They speak to a
//! [`Transport`], which multicasts [`Envelope`]s on a small set of logical
//! channels and hands inbound envelopes to per-channel receivers. Peers are
//! identified by an opaque [`PeerId`] everywhere above this crate.
//!
//! [`MemoryNetwork`] provides an in-process transport that runs every
//! envelope through the real wire codec; it backs the devnet and the
//! multi-validator tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
mod memory;
mod peer;
mod transport;

pub use envelope::{Envelope, EnvelopeType};
pub use error::{NetworkError, Result};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use peer::PeerId;
pub use transport::{Receiver, Transport};

/// Channel carrying consensus protocol messages.
pub const CONSENSUS_CHANNEL: &str = "consensus";

/// Channel carrying block requests and responses.
pub const BLOCKCHAIN_CHANNEL: &str = "blockchain";

/// Channel carrying transaction gossip.
pub const TRANSACTION_CHANNEL: &str = "transaction";
