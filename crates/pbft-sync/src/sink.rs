//! Where synced blocks go.

use pbft_consensus::{Block, EngineHandle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Consumer of synced blocks and of pause/resume signals.
///
/// Calls must not block; blocks arrive in height order.
pub trait BlockSink: Send + Sync + 'static {
    /// The node is behind its peers; stop voting.
    fn pause(&self);

    /// The node has caught up; resume voting.
    fn resume(&self);

    /// A verified block extending everything delivered so far.
    fn deliver(&self, block: Block);
}

/// [`BlockSink`] backed by a consensus engine.
///
/// Delivered blocks are committed one at a time through
/// [`EngineHandle::apply_block`] by a background task.
#[derive(Debug, Clone)]
pub struct EngineSink {
    handle: EngineHandle,
    ready: mpsc::UnboundedSender<Block>,
}

impl EngineSink {
    /// Spawns the commit task. It exits once every `EngineSink` is dropped.
    pub fn spawn(handle: EngineHandle) -> (Self, JoinHandle<()>) {
        let (ready, mut rx) = mpsc::unbounded_channel::<Block>();
        let engine = handle.clone();
        let task = tokio::spawn(async move {
            while let Some(block) = rx.recv().await {
                if block.height() <= engine.status().height {
                    continue;
                }
                let height = block.height();
                match engine.apply_block(block).await {
                    Ok(()) => tracing::debug!(height, "applied synced block"),
                    Err(e) => tracing::warn!(height, error = %e, "failed to apply synced block"),
                }
            }
        });
        (Self { handle, ready }, task)
    }
}

impl BlockSink for EngineSink {
    fn pause(&self) {
        self.handle.stop();
    }

    fn resume(&self) {
        self.handle.start();
    }

    fn deliver(&self, block: Block) {
        let _ = self.ready.send(block);
    }
}
