//! Node assembly.
//!
//! A [`Node`] owns one validator's (or observer's) chain and the tasks that
//! drive it: the consensus engine with its broadcaster, the block sync pool
//! and the commit task that feeds synced blocks back into the engine. All of
//! them share one [`Transport`].

use crate::config::NodeConfig;
use crate::error::Result;
use pbft_consensus::{
    Chain, ChainStore, ConsensusEngine, EngineHandle, Genesis, Keypair, Ledger, MemoryChainStore,
    Mempool, MempoolConfig, StatusSnapshot, Transaction, TransactionId, Verifier,
};
use pbft_network::{Envelope, EnvelopeType, PeerId, Transport, TRANSACTION_CHANNEL};
use pbft_sync::{BlockService, BlockSyncPool, EngineSink, SyncStatus};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A running node.
pub struct Node {
    peer: PeerId,
    engine: EngineHandle,
    chain: Chain,
    sync: Arc<BlockSyncPool>,
    transport: Arc<dyn Transport>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Assembles a node over `transport` and spawns its tasks.
    ///
    /// The engine starts stopped; the sync pool resumes it once the node is
    /// level with its peers.
    pub fn spawn(
        config: &NodeConfig,
        genesis: &Genesis,
        signer: Option<Keypair>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        genesis.validate()?;
        let validators = Arc::new(genesis.validator_set()?);
        let genesis_block = genesis.block();

        let mut store = MemoryChainStore::new(genesis_block.clone());
        if let Some(path) = &config.checkpoint {
            store = store.with_checkpoint_path(path.clone());
        }
        let store: Arc<dyn ChainStore> = Arc::new(store);
        let mempool = Arc::new(Mempool::new(MempoolConfig::from(&config.mempool)));
        let chain = Chain::new(
            store.clone(),
            Arc::new(Ledger::with_balances(genesis.balances())),
            mempool.clone(),
        );
        let verifier = Arc::new(Verifier::new(validators, genesis_block, chain.clone()));

        let mut engine_config = config.engine.clone();
        engine_config.max_txs_per_block = engine_config
            .max_txs_per_block
            .min(genesis.consensus.max_txs_per_block);
        let is_validator = signer.is_some();
        let (engine, engine_task) = ConsensusEngine::spawn(
            engine_config,
            signer,
            verifier.clone(),
            chain.clone(),
            transport.clone(),
        );
        engine.register(transport.as_ref());

        let (sink, sink_task) = EngineSink::spawn(engine.clone());
        let sync = Arc::new(BlockSyncPool::new(
            config.sync.clone(),
            transport.clone(),
            verifier,
            store.clone(),
            Arc::new(sink),
        ));
        let service = Arc::new(BlockService::new(store, transport.clone()));
        pbft_sync::register(transport.as_ref(), sync.clone(), service);
        let sync_task = sync.clone().spawn();

        register_transactions(transport.as_ref(), mempool);

        let peer = transport.local_peer();
        tracing::info!(
            peer = %peer,
            chain_id = %genesis.chain_id,
            validators = genesis.validators.len(),
            validator = is_validator,
            "node started"
        );

        Ok(Self {
            peer,
            engine,
            chain,
            sync,
            transport,
            tasks: vec![engine_task, sink_task, sync_task],
        })
    }

    /// Returns this node's peer id.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Returns the engine handle.
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Returns the chain.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Returns the engine status.
    pub fn status(&self) -> StatusSnapshot {
        self.engine.status()
    }

    /// Returns the sync pool status.
    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    /// Adds a transaction to the local pool and gossips it to peers.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<TransactionId> {
        tx.verify()?;
        let envelope = Envelope::wrap(TRANSACTION_CHANNEL, EnvelopeType::Transaction, &tx)?;
        let id = self.chain.mempool().add(tx)?;
        self.transport.broadcast(envelope);
        tracing::debug!(tx = %id, "submitted transaction");
        Ok(id)
    }

    /// Stops every task of this node.
    pub fn shutdown(self) {
        self.engine.shutdown();
        for task in &self.tasks {
            task.abort();
        }
        tracing::info!(peer = %self.peer, height = self.chain.state().height, "node stopped");
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("peer", &self.peer)
            .field("status", &self.engine.status())
            .finish()
    }
}

/// Routes gossiped transactions into the pool after a signature check.
fn register_transactions(transport: &dyn Transport, mempool: Arc<Mempool>) {
    transport.register_receiver(
        TRANSACTION_CHANNEL,
        Arc::new(move |peer, envelope| {
            if envelope.msg_type != EnvelopeType::Transaction {
                tracing::debug!(peer = %peer, kind = ?envelope.msg_type, "unexpected envelope on transaction channel");
                return;
            }
            let tx = match envelope.open::<Transaction>() {
                Ok(tx) => tx,
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "undecodable transaction");
                    return;
                }
            };
            if let Err(e) = tx.verify() {
                tracing::debug!(peer = %peer, error = %e, "rejected gossiped transaction");
                return;
            }
            match mempool.add(tx) {
                Ok(id) => tracing::trace!(peer = %peer, tx = %id, "accepted gossiped transaction"),
                Err(e) => tracing::trace!(peer = %peer, error = %e, "ignored gossiped transaction"),
            }
        }),
    );
}
