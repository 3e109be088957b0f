//! Block download pool.
//!
//! The pool learns how far ahead its peers are by asking for their head
//! header, pauses consensus while the node is behind, fetches the missing
//! blocks in windows and hands them to the [`BlockSink`] strictly in height
//! order.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::sink::BlockSink;
use futures::future::join_all;
use parking_lot::RwLock;
use pbft_consensus::{Block, BlockRequest, BlockResponse, ChainStore, RequestType, Verifier};
use pbft_network::{PeerId, Transport};
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Default)]
struct PoolState {
    /// Latest verified head reported by each peer.
    peer_heights: HashMap<PeerId, u64>,
    /// Highest verified head seen from any peer.
    max_height: u64,
    /// Blocks waiting for their predecessor.
    pending: BTreeMap<u64, Block>,
    /// Highest height handed to the sink.
    delivered: u64,
    /// Last pause/resume signal sent; `None` before the first check.
    paused: Option<bool>,
    /// Completion signals of in-flight fetches.
    fetches: HashMap<u64, Arc<Notify>>,
}

/// Snapshot of the pool for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    /// Committed local height.
    pub local_height: u64,
    /// Highest head reported by a peer.
    pub max_height: u64,
    /// Number of peers with a known head.
    pub peers: usize,
    /// Blocks buffered out of order.
    pub pending: usize,
    /// Whether consensus is currently paused for sync.
    pub paused: bool,
}

/// Tracks peer heights and downloads missing blocks.
pub struct BlockSyncPool {
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    verifier: Arc<Verifier>,
    store: Arc<dyn ChainStore>,
    sink: Arc<dyn BlockSink>,
    state: RwLock<PoolState>,
}

impl BlockSyncPool {
    /// Creates a pool.
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        verifier: Arc<Verifier>,
        store: Arc<dyn ChainStore>,
        sink: Arc<dyn BlockSink>,
    ) -> Self {
        Self {
            config,
            transport,
            verifier,
            store,
            sink,
            state: RwLock::new(PoolState::default()),
        }
    }

    /// Spawns the head-request and progress-check loop.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self: Arc<Self>) {
        let (trigger, mut triggered) = mpsc::channel::<()>(1);

        let downloader = self.clone();
        tokio::spawn(async move {
            while triggered.recv().await.is_some() {
                downloader.download_pass().await;
            }
        });

        let mut heads = tokio::time::interval(self.config.head_interval);
        let mut checks = tokio::time::interval(self.config.check_interval);
        heads.set_missed_tick_behavior(MissedTickBehavior::Delay);
        checks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = heads.tick() => {
                    if let Err(e) = self.request_heads() {
                        tracing::debug!(error = %e, "failed to request peer heads");
                    }
                }
                _ = checks.tick() => {
                    if self.check() {
                        let _ = trigger.try_send(());
                    }
                }
            }
        }
    }

    /// Returns the pool status.
    pub fn status(&self) -> SyncStatus {
        let state = self.state.read();
        SyncStatus {
            local_height: self.store.state().height,
            max_height: state.max_height,
            peers: state.peer_heights.len(),
            pending: state.pending.len(),
            paused: state.paused.unwrap_or(false),
        }
    }

    /// Asks every peer for its head header.
    pub fn request_heads(&self) -> Result<()> {
        self.transport.broadcast(BlockRequest::head().to_envelope()?);
        Ok(())
    }

    /// Compares the local height against peers and signals the sink on
    /// transitions. Returns true if a download pass is needed.
    pub fn check(&self) -> bool {
        let local = self.store.state().height;
        let (behind, changed, max) = {
            let mut state = self.state.write();
            let behind = local < state.max_height;
            let changed = state.paused != Some(behind);
            state.paused = Some(behind);
            (behind, changed, state.max_height)
        };

        if changed {
            if behind {
                tracing::info!(local, max, "behind peers, pausing consensus");
                self.sink.pause();
            } else {
                tracing::info!(local, "caught up with peers, resuming consensus");
                self.sink.resume();
            }
        }
        behind
    }

    /// Handles a block response from a peer.
    pub fn on_response(&self, peer: &PeerId, response: BlockResponse) {
        let block = response.block;
        match response.request_type {
            RequestType::HeaderOnly => {
                if let Err(e) = self.verifier.verify_block_header(&block) {
                    tracing::debug!(peer = %peer, height = block.height(), error = %e, "rejected head header");
                    return;
                }
                self.set_peer_height(peer.clone(), block.height());
            }
            RequestType::WholeContent => {
                if let Err(e) = self.verifier.verify_quorum_block(&block) {
                    tracing::debug!(peer = %peer, height = block.height(), error = %e, "rejected synced block");
                    return;
                }
                self.add_block(block);
            }
        }
    }

    /// Records a peer's verified head if it is ahead of the local chain.
    pub fn set_peer_height(&self, peer: PeerId, height: u64) {
        if height <= self.store.state().height {
            return;
        }
        let mut state = self.state.write();
        if height > state.max_height {
            tracing::debug!(peer = %peer, height, "new highest peer head");
            state.max_height = height;
        }
        let known = state.peer_heights.entry(peer).or_default();
        *known = (*known).max(height);
    }

    /// Forgets a peer.
    pub fn remove_peer(&self, peer: &PeerId) {
        self.state.write().peer_heights.remove(peer);
    }

    /// Picks a peer reporting at least `height`, avoiding `exclude` unless it
    /// is the only one.
    pub fn pick_peer(&self, height: u64, exclude: Option<&PeerId>) -> Option<PeerId> {
        let state = self.state.read();
        let eligible: Vec<&PeerId> = state
            .peer_heights
            .iter()
            .filter(|(_, &reported)| reported >= height)
            .map(|(peer, _)| peer)
            .collect();
        let alternatives: Vec<&PeerId> = eligible
            .iter()
            .copied()
            .filter(|peer| Some(*peer) != exclude)
            .collect();

        alternatives
            .choose(&mut rand::thread_rng())
            .or_else(|| eligible.first())
            .map(|peer| (*peer).clone())
    }

    /// Accepts a verified block, delivering it and any buffered successors
    /// if it extends what was delivered so far.
    fn add_block(&self, block: Block) {
        let height = block.height();
        let local = self.store.state().height;
        let mut guard = self.state.write();
        let state = &mut *guard;

        if let Some(done) = state.fetches.get(&height) {
            done.notify_one();
        }
        state.delivered = state.delivered.max(local);
        if height <= state.delivered || state.pending.contains_key(&height) {
            return;
        }
        if height > state.delivered + 1 {
            state.pending.insert(height, block);
            return;
        }

        let from = height;
        self.sink.deliver(block);
        state.delivered = height;
        while let Some(next) = state.pending.remove(&(state.delivered + 1)) {
            self.sink.deliver(next);
            state.delivered += 1;
        }
        tracing::debug!(from, to = state.delivered, "delivered synced blocks");
    }

    /// Fetches every missing height in the next window and waits for all of them.
    async fn download_pass(self: &Arc<Self>) {
        let local = self.store.state().height;
        let max = {
            let mut state = self.state.write();
            state.delivered = local;
            state.pending.retain(|&height, _| height > local);
            state.max_height
        };
        if local >= max {
            return;
        }

        let end = max.min(local + self.config.window);
        tracing::debug!(from = local + 1, to = end, "downloading blocks");
        join_all((local + 1..=end).map(|height| self.clone().fetch(height))).await;
    }

    /// Requests one height until it arrives, rotating peers on timeout.
    async fn fetch(self: Arc<Self>, height: u64) {
        let done = Arc::new(Notify::new());
        self.state.write().fetches.insert(height, done.clone());

        let mut previous: Option<PeerId> = None;
        while !self.has_block(height) {
            let Some(peer) = self.pick_peer(height, previous.as_ref()) else {
                tracing::debug!(height, "no peer has the block");
                break;
            };
            if let Err(e) = self.request_block(&peer, height) {
                tracing::debug!(peer = %peer, height, error = %e, "block request failed");
            }
            previous = Some(peer);

            if tokio::time::timeout(self.config.fetch_timeout, done.notified())
                .await
                .is_ok()
            {
                break;
            }
            tracing::debug!(height, "block fetch timed out, rotating peer");
        }

        self.state.write().fetches.remove(&height);
    }

    fn has_block(&self, height: u64) -> bool {
        let state = self.state.read();
        height <= state.delivered
            || state.pending.contains_key(&height)
            || height <= self.store.state().height
    }

    fn request_block(&self, peer: &PeerId, height: u64) -> Result<()> {
        let envelope = BlockRequest::whole(height).to_envelope()?;
        if let Err(e) = self.transport.send_to_peer(peer, envelope) {
            self.remove_peer(peer);
            self.transport.remove_peer(peer);
            return Err(SyncError::Network(e));
        }
        Ok(())
    }
}

impl std::fmt::Debug for BlockSyncPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockSyncPool")
            .field("status", &self.status())
            .finish()
    }
}
