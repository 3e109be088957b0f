//! Consensus engine.
//!
//! The engine owns the [`StateMachine`] and drives it from a single task:
//! inbound messages, the view timeout, the state poll, the proposal retry
//! and log garbage collection are all handled in one `select!` loop, so
//! consensus state is never touched concurrently. Everything else talks to
//! the engine through a cloneable [`EngineHandle`].

use crate::block::{Block, BlockId};
use crate::broadcast::Broadcaster;
use crate::chain::Chain;
use crate::crypto::Keypair;
use crate::deadline::Deadline;
use crate::error::{ConsensusError, Result};
use crate::message::ConsensusMessage;
use crate::state::{Action, Input, Phase, StateMachine};
use crate::store::ChainState;
use crate::verifier::Verifier;
use parking_lot::RwLock;
use pbft_network::{Transport, CONSENSUS_CHANNEL};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Configuration for the consensus engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time allowed for one height before a view change.
    #[serde(with = "millis")]
    pub view_timeout: Duration,

    /// Interval for re-evaluating the phase against the log.
    #[serde(with = "millis")]
    pub poll_interval: Duration,

    /// Interval for requesting a proposal while idle.
    #[serde(with = "millis")]
    pub proposal_retry_interval: Duration,

    /// Interval for re-sending the latest outbound message.
    #[serde(with = "millis")]
    pub rebroadcast_interval: Duration,

    /// Interval for pruning the message log.
    #[serde(with = "millis")]
    pub gc_interval: Duration,

    /// Heights kept in the message log behind the chain head. Also bounds how
    /// far ahead of the head messages are logged.
    pub retained_heights: u64,

    /// Maximum transactions per proposed block.
    pub max_txs_per_block: usize,

    /// Inbound message queue capacity.
    pub inbound_capacity: usize,

    /// Outbound message queue capacity.
    pub outbound_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            view_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            proposal_retry_interval: Duration::from_secs(5),
            rebroadcast_interval: Duration::from_secs(4),
            gc_interval: Duration::from_secs(10),
            retained_heights: 10,
            max_txs_per_block: 3000,
            inbound_capacity: 10_000,
            outbound_capacity: 100,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Whether the engine is participating.
    pub running: bool,
    /// Current phase.
    pub phase: Phase,
    /// Committed chain height.
    pub height: u64,
    /// Current view.
    pub view: u64,
    /// Head block id.
    pub block_id: BlockId,
}

/// Engine status shared with other tasks.
#[derive(Debug)]
pub struct EngineStatus {
    running: AtomicBool,
    inner: RwLock<(Phase, ChainState)>,
}

impl EngineStatus {
    /// Creates a stopped status at the given chain head.
    pub fn new(state: ChainState) -> Self {
        Self {
            running: AtomicBool::new(false),
            inner: RwLock::new((Phase::NotStarted, state)),
        }
    }

    /// Returns true if the engine is participating in consensus.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.inner.read().0
    }

    /// Returns a snapshot of the status.
    pub fn snapshot(&self) -> StatusSnapshot {
        let (phase, state) = *self.inner.read();
        StatusSnapshot {
            running: self.is_running(),
            phase,
            height: state.height,
            view: state.view,
            block_id: state.block_id,
        }
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.inner.write().0 = phase;
    }

    fn update(&self, phase: Phase, state: ChainState) {
        *self.inner.write() = (phase, state);
    }
}

/// Events emitted by the consensus engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusEvent {
    /// The engine started participating.
    Started,
    /// The engine stopped participating.
    Stopped,
    /// The phase for the height in flight changed.
    PhaseChanged {
        /// Height being decided.
        height: u64,
        /// Previous phase.
        from: Phase,
        /// New phase.
        to: Phase,
    },
    /// A block was committed, by consensus or by sync.
    BlockCommitted {
        /// Block height.
        height: u64,
        /// View the block was proposed in.
        view: u64,
        /// Block id.
        block_id: BlockId,
        /// Number of transactions.
        tx_count: usize,
    },
    /// A view change completed.
    ViewChanged {
        /// Height being decided.
        height: u64,
        /// The new view.
        view: u64,
    },
}

enum Control {
    Start,
    Stop,
    ApplyBlock(Block, oneshot::Sender<Result<()>>),
    Shutdown,
}

enum Event {
    Message(ConsensusMessage),
    Control(Control),
    Timeout,
    Poll,
    Propose,
    GarbageCollect,
    Closed,
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    inbound: mpsc::Sender<ConsensusMessage>,
    control: mpsc::UnboundedSender<Control>,
    events: broadcast::Sender<ConsensusEvent>,
    status: Arc<EngineStatus>,
}

impl EngineHandle {
    /// Starts participating in consensus.
    pub fn start(&self) {
        let _ = self.control.send(Control::Start);
    }

    /// Stops participating and abandons the height in flight.
    pub fn stop(&self) {
        let _ = self.control.send(Control::Stop);
    }

    /// Queues a message from a peer. Returns false if it was dropped.
    pub fn deliver(&self, msg: ConsensusMessage) -> bool {
        self.inbound.try_send(msg).is_ok()
    }

    /// Verifies and commits a block obtained outside consensus.
    ///
    /// Works whether or not the engine is running.
    pub async fn apply_block(&self, block: Block) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(Control::ApplyBlock(block, reply))
            .map_err(|_| ConsensusError::EngineStopped)?;
        rx.await.map_err(|_| ConsensusError::EngineStopped)?
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.events.subscribe()
    }

    /// Returns the current engine status.
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Ends the engine task.
    pub fn shutdown(&self) {
        let _ = self.control.send(Control::Shutdown);
    }

    /// Routes the transport's consensus channel into this engine.
    pub fn register(&self, transport: &dyn Transport) {
        let handle = self.clone();
        transport.register_receiver(
            CONSENSUS_CHANNEL,
            Arc::new(move |peer, envelope| match ConsensusMessage::from_envelope(&envelope) {
                Ok(msg) => {
                    if !handle.deliver(msg) {
                        tracing::trace!(peer = %peer, "inbound queue full, dropping message");
                    }
                }
                Err(e) => tracing::debug!(peer = %peer, error = %e, "undecodable consensus message"),
            }),
        );
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("status", &self.status.snapshot())
            .finish()
    }
}

/// The consensus engine task.
pub struct ConsensusEngine {
    config: EngineConfig,
    machine: StateMachine,
    verifier: Arc<Verifier>,
    broadcaster: Broadcaster,
    status: Arc<EngineStatus>,
    events: broadcast::Sender<ConsensusEvent>,
    inbound: mpsc::Receiver<ConsensusMessage>,
    control: mpsc::UnboundedReceiver<Control>,
    timeout: Deadline,
}

impl ConsensusEngine {
    /// Spawns the engine and its broadcaster. The engine starts stopped.
    ///
    /// Without a signer the node only follows the chain through
    /// [`EngineHandle::apply_block`].
    pub fn spawn(
        config: EngineConfig,
        signer: Option<Keypair>,
        verifier: Arc<Verifier>,
        chain: Chain,
        transport: Arc<dyn Transport>,
    ) -> (EngineHandle, JoinHandle<()>) {
        let status = Arc::new(EngineStatus::new(chain.state()));
        let (broadcaster, _) = Broadcaster::spawn(
            transport,
            status.clone(),
            config.outbound_capacity,
            config.rebroadcast_interval,
        );
        let (inbound_tx, inbound) = mpsc::channel(config.inbound_capacity.max(1));
        let (control_tx, control) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(1024);

        if let Some(keypair) = &signer {
            if !verifier.validators().contains(&keypair.public_key()) {
                tracing::warn!(key = %keypair.public_key(), "local key is not in the validator set");
            }
        }

        let engine = Self {
            machine: StateMachine::new(signer, verifier.clone(), chain, config.max_txs_per_block)
                .with_lookahead(config.retained_heights),
            config,
            verifier,
            broadcaster,
            status: status.clone(),
            events: events.clone(),
            inbound,
            control,
            timeout: Deadline::new(),
        };

        let handle = EngineHandle {
            inbound: inbound_tx,
            control: control_tx,
            events,
            status,
        };

        (handle, tokio::spawn(engine.run()))
    }

    async fn run(mut self) {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut propose = tokio::time::interval(self.config.proposal_retry_interval);
        let mut gc = tokio::time::interval(self.config.gc_interval);
        for interval in [&mut poll, &mut propose, &mut gc] {
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        tracing::debug!(
            height = self.machine.chain().state().height,
            validators = self.verifier.validators().len(),
            "consensus engine ready"
        );

        loop {
            let event = tokio::select! {
                msg = self.inbound.recv() => msg.map_or(Event::Closed, Event::Message),
                ctl = self.control.recv() => ctl.map_or(Event::Closed, Event::Control),
                _ = self.timeout.fired() => Event::Timeout,
                _ = poll.tick() => Event::Poll,
                _ = propose.tick() => Event::Propose,
                _ = gc.tick() => Event::GarbageCollect,
            };

            if !self.handle_event(event) {
                break;
            }
        }

        self.status.set_running(false);
        tracing::info!("consensus engine shut down");
    }

    /// Handles one event. Returns false when the engine should exit.
    fn handle_event(&mut self, event: Event) -> bool {
        let running = self.status.is_running();
        match event {
            Event::Message(msg) if running => self.drive(Input::Message(msg)),
            Event::Timeout if running => self.drive(Input::Timeout),
            Event::Poll if running => self.drive(Input::Poll),
            Event::Propose if running && self.machine.phase() == Phase::NotStarted => {
                tracing::debug!("requesting new block proposal");
                self.drive(Input::RequestProposal);
            }
            Event::Message(_) | Event::Timeout | Event::Poll | Event::Propose => {}
            Event::GarbageCollect => {
                self.machine.garbage_collect(self.config.retained_heights);
                self.machine.chain().mempool().reap_expired();
            }
            Event::Control(Control::Start) => {
                if !running {
                    self.status.set_running(true);
                    tracing::info!(height = self.machine.chain().state().height, "consensus started");
                    let _ = self.events.send(ConsensusEvent::Started);
                    self.drive(Input::RequestProposal);
                }
            }
            Event::Control(Control::Stop) => {
                if running {
                    self.status.set_running(false);
                    let actions = self.machine.reset();
                    self.perform(actions);
                    tracing::info!(height = self.machine.chain().state().height, "consensus stopped");
                    let _ = self.events.send(ConsensusEvent::Stopped);
                }
            }
            Event::Control(Control::ApplyBlock(block, reply)) => {
                let result = self.apply_block(block);
                let _ = reply.send(result);
            }
            Event::Control(Control::Shutdown) | Event::Closed => return false,
        }
        true
    }

    fn drive(&mut self, input: Input) {
        let actions = self.machine.handle(input);
        self.perform(actions);
    }

    fn apply_block(&mut self, block: Block) -> Result<()> {
        if let Err(e) = self.verifier.verify_quorum_block(&block) {
            tracing::warn!(height = block.height(), block_id = %block.id(), error = %e, "rejected synced block");
            return Err(e);
        }
        let result = self.machine.chain().commit(&block);
        if result.is_err() && self.machine.chain().state().block_id != block.id() {
            return result;
        }

        let mut actions = self.machine.reset();
        actions.push(Action::Committed(block));
        self.perform(actions);
        result
    }

    fn perform(&mut self, actions: Vec<Action>) {
        let height = self.machine.chain().state().height + 1;
        for action in actions {
            match action {
                Action::Broadcast(msg) => {
                    self.broadcaster.enqueue(msg);
                }
                Action::ArmTimeout => self.timeout.arm(self.config.view_timeout),
                Action::DisarmTimeout => self.timeout.disarm(),
                Action::PhaseChanged { from, to } => {
                    let _ = self.events.send(ConsensusEvent::PhaseChanged { height, from, to });
                }
                Action::Committed(block) => {
                    let _ = self.events.send(ConsensusEvent::BlockCommitted {
                        height: block.height(),
                        view: block.view(),
                        block_id: block.id(),
                        tx_count: block.tx_count(),
                    });
                }
                Action::ViewChanged { height, view } => {
                    let _ = self.events.send(ConsensusEvent::ViewChanged { height, view });
                }
            }
        }
        self.status
            .update(self.machine.phase(), self.machine.chain().state());
    }
}
