//! Chain-state storage.

use crate::block::{Block, BlockId};
use crate::error::{ConsensusError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// The mutable head of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    /// Height of the last committed block.
    pub height: u64,
    /// Current view.
    pub view: u64,
    /// Id of the last committed block.
    pub block_id: BlockId,
}

/// Storage collaborator for committed blocks and the chain head.
pub trait ChainStore: Send + Sync {
    /// Returns the chain head.
    fn state(&self) -> ChainState;

    /// Moves the chain to a new view without changing the head block.
    fn set_view(&self, view: u64);

    /// Returns the committed block at `height`.
    fn block_by_height(&self, height: u64) -> Option<Block>;

    /// Returns a committed block by id.
    fn block_by_id(&self, id: &BlockId) -> Option<Block>;

    /// Appends a block and advances the head to it.
    ///
    /// The block must extend the current head.
    fn insert_block(&self, block: Block) -> Result<()>;

    /// Durably records the current head.
    fn checkpoint(&self) -> Result<()>;
}

/// Snapshot written on every checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Chain head at checkpoint time.
    pub state: ChainState,
    /// Genesis block id, identifying the chain.
    pub genesis_id: BlockId,
}

impl Checkpoint {
    /// Reads a checkpoint file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&content)?)
    }
}

struct StoreInner {
    blocks: Vec<Block>,
    by_id: HashMap<BlockId, u64>,
    view: u64,
}

/// In-memory block store with optional JSON checkpoints.
pub struct MemoryChainStore {
    inner: RwLock<StoreInner>,
    checkpoint_path: Option<PathBuf>,
}

impl MemoryChainStore {
    /// Creates a store holding only the genesis block.
    pub fn new(genesis: Block) -> Self {
        let mut by_id = HashMap::new();
        by_id.insert(genesis.id(), 0);
        Self {
            inner: RwLock::new(StoreInner {
                blocks: vec![genesis],
                by_id,
                view: 0,
            }),
            checkpoint_path: None,
        }
    }

    /// Writes a checkpoint file to `path` on every checkpoint.
    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    fn snapshot(inner: &StoreInner) -> ChainState {
        // Never empty: constructed with genesis and only ever appended to.
        let head = &inner.blocks[inner.blocks.len() - 1];
        ChainState {
            height: head.height(),
            view: inner.view,
            block_id: head.id(),
        }
    }
}

impl ChainStore for MemoryChainStore {
    fn state(&self) -> ChainState {
        Self::snapshot(&self.inner.read())
    }

    fn set_view(&self, view: u64) {
        self.inner.write().view = view;
    }

    fn block_by_height(&self, height: u64) -> Option<Block> {
        let index = usize::try_from(height).ok()?;
        self.inner.read().blocks.get(index).cloned()
    }

    fn block_by_id(&self, id: &BlockId) -> Option<Block> {
        let inner = self.inner.read();
        let height = *inner.by_id.get(id)?;
        inner.blocks.get(height as usize).cloned()
    }

    fn insert_block(&self, block: Block) -> Result<()> {
        let mut inner = self.inner.write();
        let head = Self::snapshot(&inner);

        if block.height() != head.height + 1 {
            return Err(ConsensusError::HeightMismatch {
                expected: head.height + 1,
                actual: block.height(),
            });
        }
        if block.previous() != head.block_id {
            return Err(ConsensusError::ParentMismatch {
                expected: head.block_id.to_hex(),
                actual: block.previous().to_hex(),
            });
        }

        inner.view = block.view();
        inner.by_id.insert(block.id(), block.height());
        inner.blocks.push(block);
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        let Some(path) = &self.checkpoint_path else {
            return Ok(());
        };

        let checkpoint = {
            let inner = self.inner.read();
            Checkpoint {
                state: Self::snapshot(&inner),
                genesis_id: inner.blocks[0].id(),
            }
        };

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&checkpoint)?)?;
        std::fs::rename(&tmp, path)?;

        tracing::trace!(height = checkpoint.state.height, path = %path.display(), "wrote checkpoint");
        Ok(())
    }
}

impl std::fmt::Debug for MemoryChainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChainStore")
            .field("state", &self.state())
            .field("checkpoint_path", &self.checkpoint_path)
            .finish()
    }
}
