//! In-process development network.

use crate::config::NodeConfig;
use crate::error::Result;
use crate::node::Node;
use pbft_consensus::{
    generate_devnet_genesis, Address, Genesis, Keypair, Transaction, TransactionId,
};
use pbft_network::{MemoryNetwork, PeerId};
use std::time::{SystemTime, UNIX_EPOCH};

/// `validators` nodes sharing one [`MemoryNetwork`] and a devnet genesis.
pub struct Devnet {
    network: MemoryNetwork,
    genesis: Genesis,
    keys: Vec<Keypair>,
    nodes: Vec<Node>,
}

impl Devnet {
    /// Generates a genesis and spawns one node per validator.
    pub fn launch(validators: usize, config: &NodeConfig) -> Result<Self> {
        let (genesis, keys) = generate_devnet_genesis(validators)?;
        let network = MemoryNetwork::new();

        let nodes = genesis
            .validators
            .iter()
            .zip(&keys)
            .map(|(validator, key)| {
                let transport = network.join(PeerId::new(validator.name.clone()));
                Node::spawn(config, &genesis, Some(key.clone()), transport)
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(validators, chain_id = %genesis.chain_id, "devnet launched");
        Ok(Self {
            network,
            genesis,
            keys,
            nodes,
        })
    }

    /// Returns the running nodes in validator order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns the devnet genesis.
    pub fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    /// Returns the shared network.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    /// Submits a unit transfer from validator `round % n` to the next one,
    /// through the sender's own node.
    pub fn submit_transfer(&self, round: u64) -> Result<TransactionId> {
        let n = self.keys.len() as u64;
        let from = (round % n) as usize;
        let to = ((round + 1) % n) as usize;

        let recipient = Address::from_public_key(&self.keys[to].public_key())?;
        let tx = Transaction::transfer(&self.keys[from], recipient, 1, round, unix_millis())?;
        self.nodes[from].submit_transaction(tx)
    }

    /// Stops every node.
    pub fn shutdown(self) {
        for node in self.nodes {
            node.shutdown();
        }
    }
}

impl std::fmt::Debug for Devnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Devnet")
            .field("chain_id", &self.genesis.chain_id)
            .field("nodes", &self.nodes)
            .finish()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_devnet_includes_transfers() {
        let mut config = NodeConfig::default();
        config.engine.proposal_retry_interval = Duration::from_millis(200);
        config.sync.check_interval = Duration::from_millis(50);
        config.sync.head_interval = Duration::from_millis(100);

        let devnet = Devnet::launch(4, &config).unwrap();
        assert_eq!(devnet.nodes().len(), 4);
        assert_eq!(devnet.network().len(), 4);

        for round in 0..4 {
            devnet.submit_transfer(round).unwrap();
        }

        let mut included = 0;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let chain = devnet.nodes()[0].chain();
            included = (1..=chain.state().height)
                .filter_map(|height| chain.store().block_by_height(height))
                .map(|block| block.tx_count())
                .sum::<usize>();
            if included == 4 {
                break;
            }
        }
        assert_eq!(included, 4);
        devnet.shutdown();
    }
}
