//! Transport contract used by consensus and sync.

use std::sync::Arc;

use crate::{Envelope, PeerId, Result};

/// Callback invoked for every envelope arriving on a registered channel.
///
/// Receivers run on the transport's delivery task and must not block; they
/// are expected to decode and hand the message off to a channel.
pub type Receiver = Arc<dyn Fn(&PeerId, Envelope) + Send + Sync>;

/// Fire-and-forget multicast keyed by logical channel name.
pub trait Transport: Send + Sync + 'static {
    /// Returns the id of the local endpoint.
    fn local_peer(&self) -> PeerId;

    /// Sends an envelope to every connected peer.
    fn broadcast(&self, envelope: Envelope);

    /// Sends an envelope to a single peer.
    fn send_to_peer(&self, peer: &PeerId, envelope: Envelope) -> Result<()>;

    /// Sends an envelope to every connected peer except `except`.
    fn broadcast_except(&self, except: &PeerId, envelope: Envelope);

    /// Drops a peer from the local view of the network.
    fn remove_peer(&self, peer: &PeerId);

    /// Registers the receiver for a channel, replacing any previous one.
    fn register_receiver(&self, channel: &str, receiver: Receiver);

    /// Lists the currently connected peers.
    fn peers(&self) -> Vec<PeerId>;
}
