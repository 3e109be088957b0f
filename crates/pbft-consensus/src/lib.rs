//! PBFT consensus for a fixed validator set.
//!
//! This crate decides, height by height, which block extends the chain. A
//! rotating primary proposes; validators countersign during prepare, commit
//! once a block carries a quorum of signatures, and move to the next view
//! when a height stalls.
//!
//! # Components
//!
//! - [`Block`], [`MessageInfo`], [`ConsensusMessage`]: the data model and wire messages
//! - [`ValidatorSet`]: membership, quorum size and primary rotation
//! - [`Verifier`]: signature, membership and quorum checks
//! - [`MessageLog`]: verified votes and block candidates per (height, view)
//! - [`StateMachine`]: the phase transitions
//! - [`Chain`]: the commit path, over a [`ChainStore`], an [`Executor`] and a [`Mempool`]
//! - [`ConsensusEngine`]: the event loop that owns the state machine, its timers and
//!   the [`Broadcaster`]
//!
//! # Flow of a height
//!
//! ```text
//!  NewBlockProposal ──▶ primary: PrePrepare(block) ──▶ replicas countersign: Prepare
//!                                                            │
//!        ┌───────────────────────────────────────────────────┘
//!        ▼
//!  quorum of Prepare + quorum-signed block ──▶ Commit ──▶ quorum of Commit ──▶ commit
//!
//!  timeout in any of the above ──▶ ViewChange ──▶ quorum ──▶ view + 1, new primary
//! ```
//!
//! # Quorum
//!
//! With `N` validators and `f = N / 3`, a quorum is `2f + 1` (or `N` when
//! `f = 0`). The primary for `(height, view)` is validator
//! `(height + view) % N`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod broadcast;
mod chain;
mod crypto;
mod deadline;
mod engine;
mod error;
mod execution;
mod genesis;
mod log;
mod mempool;
mod message;
mod state;
mod store;
mod transaction;
mod validator;
mod verifier;

pub use block::{merkle_root, Block, BlockHeader, BlockId, SignPair};
pub use broadcast::Broadcaster;
pub use chain::Chain;
pub use crypto::{sha256, Hash, Keypair, PublicKey, Signature};
pub use deadline::Deadline;
pub use engine::{
    ConsensusEngine, ConsensusEvent, EngineConfig, EngineHandle, EngineStatus, StatusSnapshot,
};
pub use error::{ConsensusError, Result};
pub use execution::{Executor, Ledger};
pub use genesis::{
    generate_devnet_genesis, ConsensusParams, Genesis, GenesisAccount, GenesisValidator,
    DEVNET_BALANCE,
};
pub use log::MessageLog;
pub use mempool::{Mempool, MempoolConfig, MempoolStats};
pub use message::{
    BlockRequest, BlockResponse, ConsensusMessage, GenericMessage, MessageInfo, MessageType,
    RequestType, ViewChangeMessage,
};
pub use state::{Action, Input, Phase, StateMachine};
pub use store::{ChainState, ChainStore, Checkpoint, MemoryChainStore};
pub use transaction::{Address, Receipt, Transaction, TransactionId};
pub use validator::{primary_index, quorum_size, Validator, ValidatorSet};
pub use verifier::Verifier;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _: BlockId;
        let _: TransactionId;
        assert_eq!(quorum_size(4), 3);
    }
}
