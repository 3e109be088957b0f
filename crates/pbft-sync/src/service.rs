//! Block request service.
//!
//! Answers peers' [`BlockRequest`]s from the local store.

use crate::error::{Result, SyncError};
use pbft_consensus::{BlockRequest, BlockResponse, ChainStore, RequestType};
use pbft_network::{PeerId, Transport};
use std::sync::Arc;

/// Serves committed blocks to peers.
pub struct BlockService {
    store: Arc<dyn ChainStore>,
    transport: Arc<dyn Transport>,
}

impl BlockService {
    /// Creates a service over the local store.
    pub fn new(store: Arc<dyn ChainStore>, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    /// Builds the response to a request, if the block exists.
    pub fn handle_request(&self, request: &BlockRequest) -> Result<BlockResponse> {
        let height = match request.height {
            BlockRequest::HEAD => self.store.state().height,
            height => u64::try_from(height).map_err(|_| SyncError::UnknownHeight(height))?,
        };
        let block = self
            .store
            .block_by_height(height)
            .ok_or(SyncError::UnknownHeight(request.height))?;

        let block = match request.request_type {
            RequestType::HeaderOnly => block.header_only(),
            RequestType::WholeContent => block,
        };
        Ok(BlockResponse {
            request_type: request.request_type,
            block,
        })
    }

    /// Answers a request. A peer that cannot be reached is dropped.
    pub fn respond(&self, peer: &PeerId, request: &BlockRequest) {
        let response = match self.handle_request(request) {
            Ok(response) => response,
            Err(e) => {
                tracing::trace!(peer = %peer, height = request.height, error = %e, "cannot serve block");
                return;
            }
        };
        let envelope = match response.to_envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode block response");
                return;
            }
        };
        if let Err(e) = self.transport.send_to_peer(peer, envelope) {
            tracing::debug!(peer = %peer, error = %e, "failed to send block response, removing peer");
            self.transport.remove_peer(peer);
        }
    }
}

impl std::fmt::Debug for BlockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockService")
            .field("height", &self.store.state().height)
            .finish()
    }
}
