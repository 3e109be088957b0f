//! # PBFT Sync
//!
//! Catch-up for nodes that fell behind the cluster.
//!
//! [`BlockSyncPool`] polls peers for their head, pauses consensus while the
//! local chain is behind, downloads missing blocks with bounded concurrency
//! and peer rotation, and delivers them to a [`BlockSink`] in height order.
//! [`BlockService`] answers the same requests for other nodes. Both share
//! the `blockchain` channel; [`register`] routes it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod pool;
mod service;
mod sink;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use pool::{BlockSyncPool, SyncStatus};
pub use service::BlockService;
pub use sink::{BlockSink, EngineSink};

use pbft_consensus::{BlockRequest, BlockResponse};
use pbft_network::{EnvelopeType, Transport, BLOCKCHAIN_CHANNEL};
use std::sync::Arc;

/// Routes the transport's blockchain channel: requests to the service,
/// responses to the pool.
pub fn register(transport: &dyn Transport, pool: Arc<BlockSyncPool>, service: Arc<BlockService>) {
    transport.register_receiver(
        BLOCKCHAIN_CHANNEL,
        Arc::new(move |peer, envelope| match envelope.msg_type {
            EnvelopeType::BlockRequest => match envelope.open::<BlockRequest>() {
                Ok(request) => service.respond(peer, &request),
                Err(e) => tracing::debug!(peer = %peer, error = %e, "undecodable block request"),
            },
            EnvelopeType::BlockResponse => match envelope.open::<BlockResponse>() {
                Ok(response) => pool.on_response(peer, response),
                Err(e) => tracing::debug!(peer = %peer, error = %e, "undecodable block response"),
            },
            other => tracing::debug!(peer = %peer, kind = ?other, "unexpected envelope on blockchain channel"),
        }),
    );
}
