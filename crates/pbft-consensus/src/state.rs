//! PBFT phase transitions.
//!
//! [`StateMachine`] owns the message log and the per-height phase. It is
//! driven by [`Input`]s and answers with [`Action`]s for the engine to carry
//! out (broadcasts, timer changes, notifications). Messages it signs itself
//! are fed back through the same ingestion path as peer messages, so its own
//! votes are counted exactly once.
//!
//! ```text
//! NotStarted -> PrePreparing -> Preparing -> Checking -> Committing -> Finished
//!     ^   \______(primary)_______^                                       |
//!     |______________________________________________________________________|
//!
//! any active phase --timeout--> ViewChanging --quorum--> NotStarted (view + 1)
//! ```

use crate::block::Block;
use crate::chain::Chain;
use crate::crypto::Keypair;
use crate::error::Result;
use crate::log::MessageLog;
use crate::message::{ConsensusMessage, GenericMessage, MessageInfo, MessageType, ViewChangeMessage};
use crate::store::ChainState;
use crate::verifier::Verifier;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Heights and views past the chain head for which messages are logged.
pub const DEFAULT_LOOKAHEAD: u64 = 10;

/// Consensus phase for the height being decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for a new-block proposal request.
    NotStarted,
    /// Waiting for the primary's proposal.
    PrePreparing,
    /// Collecting prepare votes.
    Preparing,
    /// Waiting for a block carrying a quorum of signatures.
    Checking,
    /// Collecting commit votes.
    Committing,
    /// Ready to commit.
    Finished,
    /// Collecting view-change votes after a timeout.
    ViewChanging,
}

impl Phase {
    /// Returns the phase as a string for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::NotStarted => "not_started",
            Phase::PrePreparing => "pre_preparing",
            Phase::Preparing => "preparing",
            Phase::Checking => "checking",
            Phase::Committing => "committing",
            Phase::Finished => "finished",
            Phase::ViewChanging => "view_changing",
        }
    }

    /// Phases guarded by the view timeout.
    pub fn is_timed(self) -> bool {
        !matches!(self, Phase::NotStarted | Phase::ViewChanging)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can move the state machine.
#[derive(Debug, Clone)]
pub enum Input {
    /// A message from a peer.
    Message(ConsensusMessage),
    /// Periodic re-evaluation against what is already logged.
    Poll,
    /// The view timeout fired.
    Timeout,
    /// Ask the network to start agreement on the next height.
    RequestProposal,
}

/// Work for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send to all peers.
    Broadcast(ConsensusMessage),
    /// (Re)start the view timeout.
    ArmTimeout,
    /// Cancel the view timeout.
    DisarmTimeout,
    /// The phase changed.
    PhaseChanged {
        /// Previous phase.
        from: Phase,
        /// New phase.
        to: Phase,
    },
    /// A block was committed.
    Committed(Block),
    /// A view change completed.
    ViewChanged {
        /// Height still being decided.
        height: u64,
        /// The new view.
        view: u64,
    },
}

/// The per-node PBFT state machine.
pub struct StateMachine {
    phase: Phase,
    log: MessageLog,
    received_block: Option<Block>,
    signer: Option<Keypair>,
    verifier: Arc<Verifier>,
    chain: Chain,
    max_txs_per_block: usize,
    lookahead: u64,
    self_feed: VecDeque<ConsensusMessage>,
    actions: Vec<Action>,
}

impl StateMachine {
    /// Creates a state machine.
    ///
    /// Without a signer the node follows the log but never votes.
    pub fn new(
        signer: Option<Keypair>,
        verifier: Arc<Verifier>,
        chain: Chain,
        max_txs_per_block: usize,
    ) -> Self {
        Self {
            phase: Phase::NotStarted,
            log: MessageLog::new(),
            received_block: None,
            signer,
            verifier,
            chain,
            max_txs_per_block,
            lookahead: DEFAULT_LOOKAHEAD,
            self_feed: VecDeque::new(),
            actions: Vec::new(),
        }
    }

    /// Sets how far past the chain head, in heights and views, messages are
    /// still logged.
    pub fn with_lookahead(mut self, lookahead: u64) -> Self {
        self.lookahead = lookahead.max(1);
        self
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the message log.
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Returns the chain this machine commits to.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Processes one input to quiescence.
    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        match input {
            Input::Message(msg) => self.receive(msg),
            Input::Poll => self.migrate(),
            Input::Timeout => self.on_timeout(),
            Input::RequestProposal => self.request_proposal(),
        }
        while let Some(msg) = self.self_feed.pop_front() {
            self.receive(msg);
        }
        std::mem::take(&mut self.actions)
    }

    /// Abandons the in-flight height and returns to `NotStarted`.
    pub fn reset(&mut self) -> Vec<Action> {
        self.self_feed.clear();
        self.set_phase(Phase::NotStarted);
        std::mem::take(&mut self.actions)
    }

    /// Drops log entries more than `retain` heights behind the chain.
    pub fn garbage_collect(&mut self, retain: u64) -> usize {
        let removed = self.log.garbage_collect(self.chain.state().height, retain);
        if removed > 0 {
            tracing::debug!(removed, "garbage collected message log");
        }
        removed
    }

    fn receive(&mut self, msg: ConsensusMessage) {
        if self.ingest(msg) {
            self.migrate();
        }
    }

    /// Verifies and logs a message. Returns true if anything new was logged.
    fn ingest(&mut self, msg: ConsensusMessage) -> bool {
        let state = self.chain.state();
        let head = state.height;
        let info = msg.info();
        if info.height <= head {
            tracing::trace!(height = info.height, head, kind = msg.kind(), "stale message");
            return false;
        }
        if info.height > head + self.lookahead || info.view > state.view + self.lookahead {
            tracing::debug!(
                height = info.height,
                view = info.view,
                head,
                kind = msg.kind(),
                "message too far ahead"
            );
            return false;
        }
        if let Err(e) = self.verifier.verify_message(&msg) {
            tracing::debug!(
                height = info.height,
                view = info.view,
                kind = msg.kind(),
                signer = %info.signer,
                error = %e,
                "rejected message"
            );
            return false;
        }

        match msg {
            ConsensusMessage::ViewChange(view_change) => self.log.add_message(view_change.info),
            ConsensusMessage::Generic(generic) => {
                let (height, view) = (generic.info.height, generic.info.view);
                let mut is_new = self.log.add_message(generic.info);
                for other in generic.other_infos {
                    if other.height == height && other.view == view {
                        is_new |= self.log.add_message(other);
                    }
                }
                if let Some(block) = generic.block {
                    is_new |= self.ingest_block(height, view, block);
                }
                is_new
            }
        }
    }

    fn ingest_block(&mut self, height: u64, view: u64, mut block: Block) -> bool {
        let primary = &self.verifier.validators().primary(height, view).public_key;
        if block.signer != *primary || block.height() != height || block.view() != view {
            tracing::debug!(
                height,
                view,
                signer = %block.signer,
                "ignoring block not proposed by the primary for its slot"
            );
            return false;
        }
        block.sign_pairs = self.verifier.valid_sign_pairs(&block);
        self.log.add_block(height, view, block)
    }

    fn migrate(&mut self) {
        loop {
            let before = self.phase;
            if !self.step() || self.phase == before {
                break;
            }
        }
    }

    /// Evaluates the current phase once. Returns false to stop re-evaluation.
    fn step(&mut self) -> bool {
        let head = self.chain.state();
        let (height, view) = (head.height + 1, head.view);
        let quorum = self.verifier.validators().quorum();

        match self.phase {
            Phase::NotStarted => {
                let Some(keypair) = self.signer.clone() else {
                    return false;
                };
                if self.log.count(height, view, MessageType::NewBlockProposal) == 0 {
                    return false;
                }
                let primary = self.verifier.validators().primary(height, view);
                if primary.public_key != keypair.public_key() {
                    self.set_phase(Phase::PrePreparing);
                    return true;
                }
                match self.propose(&keypair, &head) {
                    Ok(msg) => {
                        self.emit(msg);
                        self.set_phase(Phase::Preparing);
                        true
                    }
                    Err(e) => {
                        tracing::warn!(height, view, error = %e, "failed to build proposal");
                        false
                    }
                }
            }

            Phase::PrePreparing => {
                let primary = self.verifier.validators().primary(height, view).public_key.clone();
                if self
                    .log
                    .find_by_signer(height, view, MessageType::PrePrepare, &primary)
                    .is_none()
                {
                    return false;
                }
                let (Some(keypair), Some(mut block)) =
                    (self.signer.clone(), self.log.find_block(height, view).cloned())
                else {
                    return false;
                };

                block.countersign(&keypair);
                self.log.add_block(height, view, block.clone());
                self.emit(ConsensusMessage::Generic(GenericMessage {
                    info: MessageInfo::signed(&keypair, MessageType::Prepare, height, view),
                    other_infos: Vec::new(),
                    block: Some(block),
                }));
                self.set_phase(Phase::Preparing);
                true
            }

            Phase::Preparing => {
                if self.log.count(height, view, MessageType::Prepare) >= quorum {
                    self.set_phase(Phase::Checking);
                }
                true
            }

            Phase::Checking => {
                let Some(block) = self.log.find_block(height, view) else {
                    return false;
                };
                if let Err(e) = self.verifier.verify_quorum_block(block) {
                    tracing::trace!(height, view, error = %e, "no quorum block yet");
                    return false;
                }
                let block = block.clone();
                let Some(keypair) = self.signer.clone() else {
                    return false;
                };

                let other_infos = self
                    .log
                    .find_by_signer(height, view, MessageType::Prepare, &keypair.public_key())
                    .cloned()
                    .into_iter()
                    .collect();
                self.received_block = Some(block.clone());
                self.emit(ConsensusMessage::Generic(GenericMessage {
                    info: MessageInfo::signed(&keypair, MessageType::Commit, height, view),
                    other_infos,
                    block: Some(block),
                }));
                self.set_phase(Phase::Committing);
                true
            }

            Phase::Committing => {
                if self.log.count(height, view, MessageType::Commit) >= quorum {
                    self.set_phase(Phase::Finished);
                }
                true
            }

            Phase::Finished => {
                let Some(block) = self.received_block.take() else {
                    self.set_phase(Phase::NotStarted);
                    return false;
                };
                let result = self.chain.commit(&block);
                let landed = self.chain.state();
                if landed.block_id == block.id() {
                    if let Err(e) = result {
                        tracing::error!(height, block_id = %block.id(), error = %e, "block committed without checkpoint");
                    }
                    self.actions.push(Action::Committed(block));
                    self.set_phase(Phase::NotStarted);
                    return true;
                }
                if let Err(e) = result {
                    tracing::warn!(height, view, block_id = %block.id(), error = %e, "commit failed");
                }
                // A block applied by sync in the meantime leaves nothing to replace.
                if landed.height >= height || !self.start_view_change(height, view) {
                    self.set_phase(Phase::NotStarted);
                    return false;
                }
                true
            }

            Phase::ViewChanging => {
                if self.log.count(height, view, MessageType::ViewChange) < quorum {
                    return false;
                }
                let next = view + 1;
                self.chain.store().set_view(next);
                tracing::info!(height, view = next, "view changed");
                self.actions.push(Action::ViewChanged { height, view: next });
                self.set_phase(Phase::NotStarted);
                true
            }
        }
    }

    /// Packages pending transactions into a signed proposal.
    ///
    /// Transactions that fail execution are left out and dropped from the pool.
    fn propose(&self, keypair: &Keypair, head: &ChainState) -> Result<ConsensusMessage> {
        let (height, view) = (head.height + 1, head.view);
        let mempool = self.chain.mempool();
        let candidates = mempool.take(self.max_txs_per_block);
        let results = self.chain.executor().dry_run(&candidates);

        let mut transactions = Vec::with_capacity(candidates.len());
        let mut receipts = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();
        for (tx, result) in candidates.into_iter().zip(results) {
            match result {
                Ok(receipt) => {
                    transactions.push(tx);
                    receipts.push(receipt);
                }
                Err(e) => {
                    tracing::debug!(tx_id = %tx.id(), error = %e, "dropping unexecutable transaction");
                    rejected.push(tx.id());
                }
            }
        }
        if !rejected.is_empty() {
            mempool.remove_batch(&rejected);
        }

        let mut block = Block::new(
            height,
            head.block_id,
            unix_millis(),
            view,
            transactions,
            receipts,
        );
        block.sign_as_primary(keypair);

        tracing::info!(
            height,
            view,
            block_id = %block.id(),
            tx_count = block.tx_count(),
            "proposing block"
        );

        Ok(ConsensusMessage::Generic(GenericMessage {
            info: MessageInfo::signed(keypair, MessageType::PrePrepare, height, view),
            other_infos: vec![MessageInfo::signed(keypair, MessageType::Prepare, height, view)],
            block: Some(block),
        }))
    }

    fn on_timeout(&mut self) {
        if !self.phase.is_timed() {
            return;
        }
        let head = self.chain.state();
        let (height, view) = (head.height + 1, head.view);

        tracing::info!(height, view, phase = %self.phase, "view timeout");
        if self.start_view_change(height, view) {
            self.migrate();
        }
    }

    /// Votes to replace the primary of (height, view). Observers never vote.
    fn start_view_change(&mut self, height: u64, view: u64) -> bool {
        let Some(keypair) = self.signer.clone() else {
            return false;
        };
        self.set_phase(Phase::ViewChanging);
        self.emit(ConsensusMessage::ViewChange(ViewChangeMessage {
            info: MessageInfo::signed(&keypair, MessageType::ViewChange, height, view),
        }));
        true
    }

    fn request_proposal(&mut self) {
        if self.phase != Phase::NotStarted {
            return;
        }
        let Some(keypair) = self.signer.clone() else {
            return;
        };
        let head = self.chain.state();
        self.emit(ConsensusMessage::vote(MessageInfo::signed(
            &keypair,
            MessageType::NewBlockProposal,
            head.height + 1,
            head.view,
        )));
    }

    /// Broadcasts a message and queues it for local ingestion.
    fn emit(&mut self, msg: ConsensusMessage) {
        self.actions.push(Action::Broadcast(msg.clone()));
        self.self_feed.push_back(msg);
    }

    fn set_phase(&mut self, to: Phase) {
        let from = self.phase;
        if from == to {
            return;
        }
        self.phase = to;

        match to {
            Phase::NotStarted => {
                self.received_block = None;
                self.actions.push(Action::DisarmTimeout);
            }
            Phase::ViewChanging => self.received_block = None,
            _ => self.actions.push(Action::ArmTimeout),
        }

        tracing::debug!(from = %from, to = %to, "phase changed");
        self.actions.push(Action::PhaseChanged { from, to });
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("phase", &self.phase)
            .field("log_entries", &self.log.len())
            .field("validator", &self.signer.as_ref().map(Keypair::public_key))
            .finish()
    }
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockId;
    use crate::error::ConsensusError;
    use crate::execution::{Executor, Ledger};
    use crate::genesis::generate_devnet_genesis;
    use crate::mempool::Mempool;
    use crate::store::MemoryChainStore;
    use crate::transaction::{Address, Receipt, Transaction};

    /// Executes like the wrapped ledger but refuses to persist anything.
    struct ReadOnlyLedger(Ledger);

    impl Executor for ReadOnlyLedger {
        fn dry_run(&self, txs: &[Transaction]) -> Vec<Result<Receipt>> {
            self.0.dry_run(txs)
        }

        fn apply(&self, _txs: &[Transaction]) -> Result<Vec<Receipt>> {
            Err(ConsensusError::Storage(std::io::Error::other("ledger is read-only")))
        }
    }

    /// A cluster of state machines wired by hand; messages are delivered
    /// explicitly so tests control ordering and loss.
    struct Cluster {
        machines: Vec<StateMachine>,
        keys: Vec<Keypair>,
        ledgers: Vec<Arc<Ledger>>,
    }

    impl Cluster {
        fn new(n: usize) -> Self {
            let (genesis, keys) = generate_devnet_genesis(n).unwrap();
            let validators = Arc::new(genesis.validator_set().unwrap());
            let mut machines = Vec::new();
            let mut ledgers = Vec::new();
            for key in &keys {
                let ledger = Arc::new(Ledger::with_balances(genesis.balances()));
                let chain = Chain::new(
                    Arc::new(MemoryChainStore::new(genesis.block())),
                    ledger.clone(),
                    Arc::new(Mempool::with_defaults()),
                );
                let verifier = Arc::new(Verifier::new(validators.clone(), genesis.block(), chain.clone()));
                machines.push(StateMachine::new(Some(key.clone()), verifier, chain, 3000));
                ledgers.push(ledger);
            }
            Self {
                machines,
                keys,
                ledgers,
            }
        }

        fn height(&self, i: usize) -> u64 {
            self.machines[i].chain().state().height
        }

        /// Delivers every broadcast to every live peer until nothing is left.
        fn run(&mut self, mut pending: Vec<(usize, ConsensusMessage)>, alive: &[usize]) {
            while let Some((from, msg)) = pending.pop() {
                for &to in alive {
                    if to == from {
                        continue;
                    }
                    for action in self.machines[to].handle(Input::Message(msg.clone())) {
                        if let Action::Broadcast(out) = action {
                            pending.push((to, out));
                        }
                    }
                }
            }
        }

        fn broadcasts(from: usize, actions: Vec<Action>) -> Vec<(usize, ConsensusMessage)> {
            actions
                .into_iter()
                .filter_map(|a| match a {
                    Action::Broadcast(msg) => Some((from, msg)),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn test_single_validator_commits_one_block() {
        let mut cluster = Cluster::new(1);
        let actions = cluster.machines[0].handle(Input::RequestProposal);

        let phases: Vec<Phase> = actions
            .iter()
            .filter_map(|a| match a {
                Action::PhaseChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                Phase::Preparing,
                Phase::Checking,
                Phase::Committing,
                Phase::Finished,
                Phase::NotStarted
            ]
        );
        assert!(actions.iter().any(|a| matches!(a, Action::Committed(b) if b.height() == 1)));
        assert_eq!(cluster.height(0), 1);
        assert_eq!(cluster.machines[0].phase(), Phase::NotStarted);

        // Nothing further happens without a new request.
        assert!(cluster.machines[0].handle(Input::Poll).is_empty());
        assert_eq!(cluster.height(0), 1);
    }

    #[test]
    fn test_single_validator_includes_transactions() {
        let mut cluster = Cluster::new(1);
        let to = Address::from_public_key(&Keypair::from_seed(42).public_key()).unwrap();
        let tx = Transaction::transfer(&cluster.keys[0], to.clone(), 10, 0, 0).unwrap();
        let bad = Transaction::transfer(&cluster.keys[0], to.clone(), u64::MAX, 1, 0).unwrap();
        let mempool = cluster.machines[0].chain().mempool().clone();
        mempool.add(tx.clone()).unwrap();
        mempool.add(bad.clone()).unwrap();

        let actions = cluster.machines[0].handle(Input::RequestProposal);

        let committed = actions
            .iter()
            .find_map(|a| match a {
                Action::Committed(b) => Some(b.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(committed.transactions, vec![tx]);
        assert_eq!(cluster.ledgers[0].balance(&to), 10);
        assert!(mempool.is_empty());
    }

    #[test]
    fn test_four_validators_commit() {
        let mut cluster = Cluster::new(4);
        let all = [0, 1, 2, 3];

        let mut pending = Vec::new();
        for i in all {
            pending.extend(Cluster::broadcasts(i, cluster.machines[i].handle(Input::RequestProposal)));
        }
        cluster.run(pending, &all);

        for i in all {
            assert_eq!(cluster.height(i), 1, "validator {i}");
            assert_eq!(cluster.machines[i].phase(), Phase::NotStarted);
        }
        let ids: Vec<_> = all.iter().map(|&i| cluster.machines[i].chain().state().block_id).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_three_of_four_suffice() {
        let mut cluster = Cluster::new(4);
        // Validator 0 is silent; the primary for height 1 is validator 1.
        let alive = [1, 2, 3];

        let mut pending = Vec::new();
        for i in alive {
            pending.extend(Cluster::broadcasts(i, cluster.machines[i].handle(Input::RequestProposal)));
        }
        cluster.run(pending, &alive);

        for i in alive {
            assert_eq!(cluster.height(i), 1);
        }
        assert_eq!(cluster.height(0), 0);
    }

    #[test]
    fn test_replica_waits_for_primary() {
        let mut cluster = Cluster::new(4);
        let actions = cluster.machines[0].handle(Input::RequestProposal);

        assert_eq!(cluster.machines[0].phase(), Phase::PrePreparing);
        assert!(actions.contains(&Action::ArmTimeout));
    }

    #[test]
    fn test_duplicate_message_is_inert() {
        let mut cluster = Cluster::new(4);
        let info = MessageInfo::signed(&cluster.keys[2], MessageType::Prepare, 1, 0);
        let msg = ConsensusMessage::vote(info);

        cluster.machines[0].handle(Input::Message(msg.clone()));
        assert_eq!(cluster.machines[0].log().count(1, 0, MessageType::Prepare), 1);
        cluster.machines[0].handle(Input::Message(msg));
        assert_eq!(cluster.machines[0].log().count(1, 0, MessageType::Prepare), 1);
    }

    #[test]
    fn test_forged_message_not_logged() {
        let mut cluster = Cluster::new(4);
        let mut info = MessageInfo::signed(&cluster.keys[2], MessageType::Prepare, 1, 0);
        info.view = 1;

        cluster.machines[0].handle(Input::Message(ConsensusMessage::vote(info)));
        assert_eq!(cluster.machines[0].log().count(1, 1, MessageType::Prepare), 0);
    }

    #[test]
    fn test_block_from_non_primary_ignored() {
        let mut cluster = Cluster::new(4);
        let genesis_id = cluster.machines[0].chain().state().block_id;
        let mut block = Block::new(1, genesis_id, 1, 0, vec![], vec![]);
        // Validator 2 is not the primary for (1, 0).
        block.sign_as_primary(&cluster.keys[2]);
        let msg = ConsensusMessage::Generic(GenericMessage {
            info: MessageInfo::signed(&cluster.keys[2], MessageType::PrePrepare, 1, 0),
            other_infos: vec![],
            block: Some(block),
        });

        cluster.machines[0].handle(Input::Message(msg));
        assert!(cluster.machines[0].log().find_block(1, 0).is_none());
    }

    #[test]
    fn test_replica_follows_proposal() {
        let mut cluster = Cluster::new(4);
        // Validator 1 is the primary for (1, 0).
        let proposal = Cluster::broadcasts(1, cluster.machines[1].handle(Input::RequestProposal));
        assert_eq!(proposal.len(), 2);
        assert_eq!(cluster.machines[1].phase(), Phase::Preparing);

        // Replaying its own request changes nothing.
        assert!(cluster.machines[1]
            .handle(Input::Message(proposal[0].1.clone()))
            .is_empty());

        for (_, msg) in &proposal {
            cluster.machines[2].handle(Input::Message(msg.clone()));
        }
        assert_eq!(cluster.machines[2].phase(), Phase::Preparing);
        let block = cluster.machines[2].log().find_block(1, 0).unwrap();
        assert!(block.has_signed(&cluster.keys[2].public_key()));
        assert_eq!(cluster.machines[2].log().count(1, 0, MessageType::Prepare), 2);
    }

    #[test]
    fn test_timeout_leads_to_view_change() {
        let mut cluster = Cluster::new(4);
        // Height 1 primary (validator 1) is dead.
        let alive = [0, 2, 3];

        let mut pending = Vec::new();
        for i in alive {
            pending.extend(Cluster::broadcasts(i, cluster.machines[i].handle(Input::RequestProposal)));
        }
        cluster.run(pending, &alive);
        for i in alive {
            assert_eq!(cluster.machines[i].phase(), Phase::PrePreparing);
        }

        let mut pending = Vec::new();
        for i in alive {
            let actions = cluster.machines[i].handle(Input::Timeout);
            assert_eq!(cluster.machines[i].phase(), Phase::ViewChanging);
            pending.extend(Cluster::broadcasts(i, actions));
        }
        cluster.run(pending, &alive);

        for i in alive {
            assert_eq!(cluster.machines[i].chain().state().view, 1, "validator {i}");
            assert_eq!(cluster.machines[i].phase(), Phase::NotStarted);
        }

        // View 1: primary for height 1 is validator 2, which is alive.
        let mut pending = Vec::new();
        for i in alive {
            pending.extend(Cluster::broadcasts(i, cluster.machines[i].handle(Input::RequestProposal)));
        }
        cluster.run(pending, &alive);
        for i in alive {
            assert_eq!(cluster.height(i), 1);
            assert_eq!(cluster.machines[i].chain().state().view, 1);
        }
    }

    #[test]
    fn test_timeout_ignored_when_idle() {
        let mut cluster = Cluster::new(4);
        assert!(cluster.machines[0].handle(Input::Timeout).is_empty());
        assert_eq!(cluster.machines[0].phase(), Phase::NotStarted);
    }

    #[test]
    fn test_reset_returns_to_not_started() {
        let mut cluster = Cluster::new(4);
        cluster.machines[0].handle(Input::RequestProposal);
        assert_eq!(cluster.machines[0].phase(), Phase::PrePreparing);

        let actions = cluster.machines[0].reset();
        assert_eq!(cluster.machines[0].phase(), Phase::NotStarted);
        assert!(actions.contains(&Action::DisarmTimeout));
    }

    #[test]
    fn test_observer_never_votes() {
        let (genesis, _) = generate_devnet_genesis(4).unwrap();
        let validators = Arc::new(genesis.validator_set().unwrap());
        let chain = Chain::new(
            Arc::new(MemoryChainStore::new(genesis.block())),
            Arc::new(Ledger::new()),
            Arc::new(Mempool::with_defaults()),
        );
        let verifier = Arc::new(Verifier::new(validators, genesis.block(), chain.clone()));
        let mut observer = StateMachine::new(None, verifier, chain, 3000);

        assert!(observer.handle(Input::RequestProposal).is_empty());
        assert_eq!(observer.phase(), Phase::NotStarted);
    }

    #[test]
    fn test_garbage_collect_after_progress() {
        let mut cluster = Cluster::new(1);
        for _ in 0..15 {
            cluster.machines[0].handle(Input::RequestProposal);
        }
        assert_eq!(cluster.height(0), 15);
        let removed = cluster.machines[0].garbage_collect(10);
        assert_eq!(removed, 4);
    }

    #[test]
    fn test_block_with_wrong_parent_is_not_countersigned() {
        let mut cluster = Cluster::new(4);
        cluster.machines[0].handle(Input::RequestProposal);
        assert_eq!(cluster.machines[0].phase(), Phase::PrePreparing);

        // Validator 1 is the primary for (1, 0) but builds on an unknown parent.
        let mut block = Block::new(1, BlockId::from_bytes([7; 32]), 1, 0, vec![], vec![]);
        block.sign_as_primary(&cluster.keys[1]);
        let msg = ConsensusMessage::Generic(GenericMessage {
            info: MessageInfo::signed(&cluster.keys[1], MessageType::PrePrepare, 1, 0),
            other_infos: vec![MessageInfo::signed(&cluster.keys[1], MessageType::Prepare, 1, 0)],
            block: Some(block),
        });

        let actions = cluster.machines[0].handle(Input::Message(msg));
        assert!(actions.is_empty());
        assert_eq!(cluster.machines[0].phase(), Phase::PrePreparing);
        assert!(cluster.machines[0].log().find_block(1, 0).is_none());

        // The view timer stays armed and fires into a view change.
        let actions = cluster.machines[0].handle(Input::Timeout);
        assert_eq!(cluster.machines[0].phase(), Phase::ViewChanging);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Broadcast(ConsensusMessage::ViewChange(vc)) if vc.info.height == 1 && vc.info.view == 0
        )));
    }

    #[test]
    fn test_failed_commit_moves_to_next_view() {
        let (genesis, keys) = generate_devnet_genesis(1).unwrap();
        let validators = Arc::new(genesis.validator_set().unwrap());
        let chain = Chain::new(
            Arc::new(MemoryChainStore::new(genesis.block())),
            Arc::new(ReadOnlyLedger(Ledger::with_balances(genesis.balances()))),
            Arc::new(Mempool::with_defaults()),
        );
        let verifier = Arc::new(Verifier::new(validators, genesis.block(), chain.clone()));
        let mut machine = StateMachine::new(Some(keys[0].clone()), verifier, chain, 3000);

        let actions = machine.handle(Input::RequestProposal);

        assert!(!actions.iter().any(|a| matches!(a, Action::Committed(_))));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Broadcast(ConsensusMessage::ViewChange(vc)) if vc.info.height == 1 && vc.info.view == 0
        )));
        assert!(actions.contains(&Action::ViewChanged { height: 1, view: 1 }));
        assert_eq!(machine.chain().state().height, 0);
        assert_eq!(machine.chain().state().view, 1);
        assert_eq!(machine.phase(), Phase::NotStarted);

        // The abandoned proposal for view 0 is not replayed.
        assert!(machine.handle(Input::Poll).is_empty());
        assert_eq!(machine.phase(), Phase::NotStarted);
    }

    #[test]
    fn test_far_future_messages_not_logged() {
        let mut cluster = Cluster::new(4);
        let far_height = MessageInfo::signed(&cluster.keys[2], MessageType::Prepare, 1 + DEFAULT_LOOKAHEAD, 0);
        let far_view = MessageInfo::signed(&cluster.keys[2], MessageType::ViewChange, 1, 1 + DEFAULT_LOOKAHEAD);
        let edge = MessageInfo::signed(&cluster.keys[2], MessageType::Prepare, DEFAULT_LOOKAHEAD, 0);

        cluster.machines[0].handle(Input::Message(ConsensusMessage::vote(far_height)));
        cluster.machines[0].handle(Input::Message(ConsensusMessage::ViewChange(ViewChangeMessage {
            info: far_view,
        })));
        cluster.machines[0].handle(Input::Message(ConsensusMessage::vote(edge)));

        let log = cluster.machines[0].log();
        assert_eq!(log.count(1 + DEFAULT_LOOKAHEAD, 0, MessageType::Prepare), 0);
        assert_eq!(log.count(1, 1 + DEFAULT_LOOKAHEAD, MessageType::ViewChange), 0);
        assert_eq!(log.count(DEFAULT_LOOKAHEAD, 0, MessageType::Prepare), 1);
    }
}
