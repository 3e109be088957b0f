//! Outbound consensus messages.
//!
//! Only the latest message is kept. It goes out immediately and is re-sent
//! on every tick while a height is in flight, so a peer that missed it
//! recovers without a retransmission backlog.

use crate::engine::EngineStatus;
use crate::message::ConsensusMessage;
use crate::state::Phase;
use pbft_network::{Envelope, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle for queueing outbound consensus messages.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: mpsc::Sender<ConsensusMessage>,
}

impl Broadcaster {
    /// Spawns the send loop. It exits once every `Broadcaster` is dropped.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        status: Arc<EngineStatus>,
        capacity: usize,
        resend_interval: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run(rx, transport, status, resend_interval));
        (Self { tx }, task)
    }

    /// Queues a message without waiting. Returns false if it was dropped.
    pub fn enqueue(&self, msg: ConsensusMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::debug!(kind = msg.kind(), "outbound queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

async fn run(
    mut rx: mpsc::Receiver<ConsensusMessage>,
    transport: Arc<dyn Transport>,
    status: Arc<EngineStatus>,
    resend_interval: Duration,
) {
    let mut current: Option<Envelope> = None;
    let mut ticker = tokio::time::interval(resend_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else {
                    break;
                };
                match msg.to_envelope() {
                    Ok(envelope) => {
                        transport.broadcast(envelope.clone());
                        current = Some(envelope);
                    }
                    Err(e) => tracing::warn!(kind = msg.kind(), error = %e, "failed to encode message"),
                }
            }
            _ = ticker.tick() => {
                if !status.is_running() || status.phase() == Phase::NotStarted {
                    continue;
                }
                if let Some(envelope) = &current {
                    tracing::trace!("re-broadcasting current message");
                    transport.broadcast(envelope.clone());
                }
            }
        }
    }

    tracing::debug!("broadcaster stopped");
}
