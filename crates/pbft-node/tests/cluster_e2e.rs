//! Multi-validator cluster tests over the in-process network.
//!
//! These tests verify:
//! - A single validator keeps producing blocks
//! - Four validators commit the same block with any three alive
//! - A dead primary is replaced through a view change
//! - A node that joins late catches up through block sync

use pbft_consensus::{generate_devnet_genesis, Checkpoint, ConsensusEvent, Genesis, Keypair};
use pbft_network::{MemoryNetwork, PeerId};
use pbft_node::{Node, NodeConfig};
use std::time::Duration;
use tokio::time::Instant;

fn fast_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.engine.view_timeout = Duration::from_secs(2);
    config.engine.poll_interval = Duration::from_millis(50);
    config.engine.proposal_retry_interval = Duration::from_millis(200);
    config.engine.rebroadcast_interval = Duration::from_millis(400);
    config.engine.gc_interval = Duration::from_secs(1);
    config.sync.head_interval = Duration::from_millis(100);
    config.sync.check_interval = Duration::from_millis(50);
    config.sync.fetch_timeout = Duration::from_millis(500);
    config
}

struct Cluster {
    network: MemoryNetwork,
    genesis: Genesis,
    keys: Vec<Keypair>,
    config: NodeConfig,
    nodes: Vec<Option<Node>>,
}

impl Cluster {
    fn new(validators: usize) -> Self {
        let (genesis, keys) = generate_devnet_genesis(validators).unwrap();
        Self {
            network: MemoryNetwork::new(),
            genesis,
            keys,
            config: fast_config(),
            nodes: (0..validators).map(|_| None).collect(),
        }
    }

    fn peer(index: usize) -> PeerId {
        PeerId::new(format!("validator-{}", index + 1))
    }

    fn start(&mut self, index: usize) {
        let transport = self.network.join(Self::peer(index));
        let node = Node::spawn(
            &self.config,
            &self.genesis,
            Some(self.keys[index].clone()),
            transport,
        )
        .unwrap();
        self.nodes[index] = Some(node);
    }

    fn start_all(&mut self) {
        for index in 0..self.nodes.len() {
            self.start(index);
        }
    }

    fn kill(&mut self, index: usize) {
        self.network.disconnect(&Self::peer(index));
        if let Some(node) = self.nodes[index].take() {
            node.shutdown();
        }
    }

    fn node(&self, index: usize) -> &Node {
        self.nodes[index].as_ref().unwrap()
    }

    fn alive(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().flatten()
    }

    fn min_height(&self) -> u64 {
        self.alive()
            .map(|node| node.chain().state().height)
            .min()
            .unwrap_or(0)
    }
}

/// Polls `condition` on the paused clock until it holds or `limit` elapses.
async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_validator_height_increments() {
    let mut cluster = Cluster::new(1);
    cluster.start_all();

    assert!(wait_until(Duration::from_secs(10), || cluster.min_height() >= 3).await);

    let node = cluster.node(0);
    let status = node.status();
    assert!(status.running);
    for height in 1..=3 {
        let block = node.chain().store().block_by_height(height).unwrap();
        assert_eq!(block.signer, cluster.keys[0].public_key());
        assert_eq!(block.signature_count(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_four_validators_commit_height_one() {
    let mut cluster = Cluster::new(4);
    cluster.start_all();

    assert!(wait_until(Duration::from_secs(10), || cluster.min_height() >= 1).await);

    let reference = cluster.node(0).chain().store().block_by_height(1).unwrap();
    // Primary for (height 1, view 0) is validator (1 + 0) % 4.
    assert_eq!(reference.signer, cluster.keys[1].public_key());
    assert_eq!(reference.view(), 0);
    assert!(reference.signature_count() >= 2);
    for node in cluster.alive() {
        let block = node.chain().store().block_by_height(1).unwrap();
        assert_eq!(block.id(), reference.id());
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_of_four_make_progress() {
    let mut cluster = Cluster::new(4);
    cluster.start_all();
    cluster.kill(0);

    assert!(wait_until(Duration::from_secs(20), || cluster.min_height() >= 3).await);
    assert!(cluster.node(1).chain().state().height >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_dead_primary_triggers_view_change() {
    let mut cluster = Cluster::new(4);
    cluster.start_all();
    let mut events = cluster.node(3).engine().subscribe();
    // Validator 2 is the primary for (height 2, view 0).
    cluster.kill(2);

    assert!(wait_until(Duration::from_secs(30), || cluster.min_height() >= 2).await);

    let first = cluster.node(0).chain().store().block_by_height(1).unwrap();
    assert_eq!(first.signer, cluster.keys[1].public_key());
    assert_eq!(first.view(), 0);

    // The replacement primary for (height 2, view 1) is validator 3.
    for node in cluster.alive() {
        let second = node.chain().store().block_by_height(2).unwrap();
        assert_eq!(second.view(), 1);
        assert_eq!(second.signer, cluster.keys[3].public_key());
        assert!(!second.has_signed(&cluster.keys[2].public_key()));
    }

    let mut saw_view_change = false;
    while let Ok(event) = events.try_recv() {
        if let ConsensusEvent::ViewChanged { view, .. } = event {
            assert_eq!(view, 1);
            saw_view_change = true;
        }
    }
    assert!(saw_view_change);
}

#[tokio::test(start_paused = true)]
async fn test_lagging_node_catches_up() {
    let mut cluster = Cluster::new(4);
    // Validators 1..=3 are the primaries for heights 1..=3 at view 0.
    for index in 1..4 {
        cluster.start(index);
    }
    assert!(wait_until(Duration::from_secs(20), || cluster.min_height() >= 3).await);

    cluster.start(0);
    assert!(
        wait_until(Duration::from_secs(30), || {
            cluster.node(0).chain().state().height >= 3
        })
        .await
    );

    for height in 1..=3 {
        let synced = cluster.node(0).chain().store().block_by_height(height).unwrap();
        let original = cluster.node(1).chain().store().block_by_height(height).unwrap();
        assert_eq!(synced.id(), original.id());
    }
}

#[tokio::test(start_paused = true)]
async fn test_commit_writes_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoint.json");

    let mut cluster = Cluster::new(1);
    cluster.config.checkpoint = Some(path.clone());
    cluster.start_all();

    assert!(wait_until(Duration::from_secs(10), || cluster.min_height() >= 2).await);

    let checkpoint = Checkpoint::load(&path).unwrap();
    assert!(checkpoint.state.height >= 2);
    assert_eq!(checkpoint.genesis_id, cluster.genesis.block().id());
}
