//! In-process transport.
//!
//! [`MemoryNetwork`] is a hub that connects any number of [`MemoryTransport`]
//! endpoints inside one process. Every endpoint owns an inbox drained by a
//! delivery task, so envelopes go through the same encode/decode path they
//! would on a real wire. Used by the devnet and by cluster tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::transport::Receiver;
use crate::{Envelope, NetworkError, PeerId, Result, Transport};

type Inbox = mpsc::UnboundedSender<(PeerId, Bytes)>;

/// A set of endpoints connected in-process.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<RwLock<HashMap<PeerId, Inbox>>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new endpoint and spawns its delivery task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn join(&self, id: impl Into<PeerId>) -> Arc<MemoryTransport> {
        let id = id.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<(PeerId, Bytes)>();
        self.hub.write().insert(id.clone(), tx);

        let receivers: Arc<RwLock<HashMap<String, Receiver>>> = Arc::default();
        let dispatch = receivers.clone();
        let local = id.clone();
        tokio::spawn(async move {
            while let Some((from, bytes)) = rx.recv().await {
                let envelope = match Envelope::decode(&bytes) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::debug!(peer = %from, error = %e, "dropping undecodable envelope");
                        continue;
                    }
                };
                let receiver = dispatch.read().get(&envelope.channel).cloned();
                match receiver {
                    Some(receiver) => receiver(&from, envelope),
                    None => {
                        tracing::trace!(channel = %envelope.channel, "no receiver for channel")
                    }
                }
            }
            tracing::debug!(peer = %local, "memory endpoint closed");
        });

        tracing::debug!(peer = %id, "joined memory network");

        Arc::new(MemoryTransport {
            id,
            hub: self.hub.clone(),
            receivers,
            removed: Arc::default(),
        })
    }

    /// Cuts an endpoint off: nothing is delivered to it or sent from it anymore.
    pub fn disconnect(&self, id: &PeerId) {
        if self.hub.write().remove(id).is_some() {
            tracing::info!(peer = %id, "disconnected from memory network");
        }
    }

    /// Returns the number of attached endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hub.read().len()
    }

    /// Returns true if no endpoint is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hub.read().is_empty()
    }
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("endpoints", &self.len())
            .finish()
    }
}

/// One endpoint of a [`MemoryNetwork`].
pub struct MemoryTransport {
    id: PeerId,
    hub: Arc<RwLock<HashMap<PeerId, Inbox>>>,
    receivers: Arc<RwLock<HashMap<String, Receiver>>>,
    removed: Arc<RwLock<HashSet<PeerId>>>,
}

impl MemoryTransport {
    fn deliver(&self, to: &PeerId, bytes: Bytes) -> Result<()> {
        let hub = self.hub.read();
        if !hub.contains_key(&self.id) {
            return Err(NetworkError::Disconnected);
        }
        let inbox = hub
            .get(to)
            .ok_or_else(|| NetworkError::PeerNotFound(to.to_string()))?;
        inbox
            .send((self.id.clone(), bytes))
            .map_err(|_| NetworkError::PeerNotFound(to.to_string()))
    }

    fn fan_out(&self, except: Option<&PeerId>, envelope: Envelope) {
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode envelope");
                return;
            }
        };
        for peer in self.peers() {
            if except == Some(&peer) {
                continue;
            }
            if let Err(e) = self.deliver(&peer, bytes.clone()) {
                tracing::trace!(peer = %peer, error = %e, "broadcast delivery failed");
            }
        }
    }
}

impl Transport for MemoryTransport {
    fn local_peer(&self) -> PeerId {
        self.id.clone()
    }

    fn broadcast(&self, envelope: Envelope) {
        self.fan_out(None, envelope);
    }

    fn send_to_peer(&self, peer: &PeerId, envelope: Envelope) -> Result<()> {
        if self.removed.read().contains(peer) {
            return Err(NetworkError::PeerNotFound(peer.to_string()));
        }
        self.deliver(peer, envelope.encode()?)
    }

    fn broadcast_except(&self, except: &PeerId, envelope: Envelope) {
        self.fan_out(Some(except), envelope);
    }

    fn remove_peer(&self, peer: &PeerId) {
        if self.removed.write().insert(peer.clone()) {
            tracing::debug!(local = %self.id, peer = %peer, "removed peer");
        }
    }

    fn register_receiver(&self, channel: &str, receiver: Receiver) {
        self.receivers.write().insert(channel.to_string(), receiver);
    }

    fn peers(&self) -> Vec<PeerId> {
        let removed = self.removed.read();
        let mut peers: Vec<PeerId> = self
            .hub
            .read()
            .keys()
            .filter(|peer| **peer != self.id && !removed.contains(*peer))
            .cloned()
            .collect();
        peers.sort();
        peers
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("id", &self.id)
            .field("peers", &self.peers().len())
            .finish()
    }
}
