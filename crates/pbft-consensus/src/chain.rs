//! Commit path.
//!
//! [`Chain`] is the only writer of chain state. A block is committed only if it
//! extends the current head exactly and its transactions reproduce the
//! receipts it carries; then the ledger, the store and the pool move together.

use crate::block::Block;
use crate::error::{ConsensusError, Result};
use crate::execution::Executor;
use crate::mempool::Mempool;
use crate::store::{ChainState, ChainStore};
use crate::transaction::{Receipt, TransactionId};
use std::sync::Arc;

/// Chain head plus the collaborators a commit touches.
#[derive(Clone)]
pub struct Chain {
    store: Arc<dyn ChainStore>,
    executor: Arc<dyn Executor>,
    mempool: Arc<Mempool>,
}

impl Chain {
    /// Creates a chain over the given collaborators.
    pub fn new(
        store: Arc<dyn ChainStore>,
        executor: Arc<dyn Executor>,
        mempool: Arc<Mempool>,
    ) -> Self {
        Self {
            store,
            executor,
            mempool,
        }
    }

    /// Returns the chain head.
    pub fn state(&self) -> ChainState {
        self.store.state()
    }

    /// Returns the block store.
    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    /// Returns the executor.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Returns the transaction pool.
    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    /// Commits a block on top of the current head.
    ///
    /// Never skips a height: a block that does not extend the head is
    /// rejected without side effects. A checkpoint failure is returned after
    /// the head has already moved to `block`.
    pub fn commit(&self, block: &Block) -> Result<()> {
        let head = self.store.state();

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

        let expected = self
            .executor
            .dry_run(&block.transactions)
            .into_iter()
            .collect::<Result<Vec<Receipt>>>()?;
        if expected != block.receipts {
            return Err(ConsensusError::InvalidBlock(format!(
                "{}: receipts do not match execution",
                block.id()
            )));
        }

        self.executor.apply(&block.transactions)?;
        self.store.insert_block(block.clone())?;

        let ids: Vec<TransactionId> = block.transactions.iter().map(|tx| tx.id()).collect();
        self.mempool.remove_batch(&ids);

        tracing::info!(
            height = block.height(),
            view = block.view(),
            block_id = %block.id(),
            tx_count = block.tx_count(),
            "committed block"
        );

        self.store.checkpoint().inspect_err(|e| {
            tracing::error!(height = block.height(), error = %e, "checkpoint failed");
        })
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("state", &self.state())
            .field("mempool", &self.mempool.len())
            .finish()
    }
}
