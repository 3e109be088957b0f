//! Consensus and block-sync wire messages.
//!
//! Consensus traffic is a two-armed union: a [`GenericMessage`] carries one
//! signed [`MessageInfo`], optional piggy-backed infos and an optional block;
//! a [`ViewChangeMessage`] carries a lone info. Infos are signed over
//! (type, view, height) only.

use crate::block::Block;
use crate::crypto::{Hash, Keypair, PublicKey, Signature};
use crate::error::Result;
use pbft_network::{Envelope, EnvelopeType, BLOCKCHAIN_CHANNEL, CONSENSUS_CHANNEL};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Protocol message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Request to start agreement on the next height.
    NewBlockProposal,
    /// Primary's proposal.
    PrePrepare,
    /// Replica endorsement of the proposal.
    Prepare,
    /// Commitment to a quorum block.
    Commit,
    /// Vote to abandon the current view.
    ViewChange,
}

impl MessageType {
    fn tag(self) -> u8 {
        match self {
            MessageType::NewBlockProposal => 0,
            MessageType::PrePrepare => 1,
            MessageType::Prepare => 2,
            MessageType::Commit => 3,
            MessageType::ViewChange => 4,
        }
    }

    /// Returns the message type as a string for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::NewBlockProposal => "new_block_proposal",
            MessageType::PrePrepare => "pre_prepare",
            MessageType::Prepare => "prepare",
            MessageType::Commit => "commit",
            MessageType::ViewChange => "view_change",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signed vote: who said what about which (height, view).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    /// Message type.
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// View the vote refers to.
    pub view: u64,
    /// Height the vote refers to.
    pub height: u64,
    /// Signing validator.
    pub signer: PublicKey,
    /// Signature over [`MessageInfo::digest`].
    pub signature: Signature,
}

impl MessageInfo {
    /// Creates and signs an info.
    pub fn signed(keypair: &Keypair, msg_type: MessageType, height: u64, view: u64) -> Self {
        let digest = Self::digest(msg_type, height, view);
        Self {
            msg_type,
            view,
            height,
            signer: keypair.public_key(),
            signature: keypair.sign(&digest),
        }
    }

    /// The signed payload: hash of (type, view, height).
    pub fn digest(msg_type: MessageType, height: u64, view: u64) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update([msg_type.tag()]);
        hasher.update(view.to_be_bytes());
        hasher.update(height.to_be_bytes());
        hasher.finalize().into()
    }

    /// Verifies the signature against the claimed signer.
    pub fn verify_signature(&self) -> Result<()> {
        self.signer.verify(
            &Self::digest(self.msg_type, self.height, self.view),
            &self.signature,
        )
    }
}

/// A protocol message with optional extra votes and block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericMessage {
    /// The primary vote.
    pub info: MessageInfo,
    /// Additional votes by the same sender, logged independently.
    #[serde(default)]
    pub other_infos: Vec<MessageInfo>,
    /// Attached block candidate.
    #[serde(default)]
    pub block: Option<Block>,
}

/// A view-change vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChangeMessage {
    /// The vote.
    pub info: MessageInfo,
}

/// Consensus messages exchanged between validators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsensusMessage {
    /// Proposal, vote or commit, possibly carrying a block.
    Generic(GenericMessage),
    /// View-change vote.
    ViewChange(ViewChangeMessage),
}

impl ConsensusMessage {
    /// Builds a message carrying a single info and no block.
    pub fn vote(info: MessageInfo) -> Self {
        ConsensusMessage::Generic(GenericMessage {
            info,
            other_infos: Vec::new(),
            block: None,
        })
    }

    /// Returns the primary info.
    pub fn info(&self) -> &MessageInfo {
        match self {
            ConsensusMessage::Generic(msg) => &msg.info,
            ConsensusMessage::ViewChange(msg) => &msg.info,
        }
    }

    /// Returns the message type as a string for logging.
    pub fn kind(&self) -> &'static str {
        self.info().msg_type.as_str()
    }

    /// Wraps the message for the consensus channel.
    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::wrap(
            CONSENSUS_CHANNEL,
            EnvelopeType::Consensus,
            self,
        )?)
    }

    /// Unwraps a message received on the consensus channel.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        Ok(envelope.open()?)
    }
}

/// How much of a block a requester wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Header and signatures only.
    HeaderOnly,
    /// Full block including transactions and receipts.
    WholeContent,
}

/// A request for the block at a height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequest {
    /// Requested form.
    pub request_type: RequestType,
    /// Requested height; [`BlockRequest::HEAD`] asks for the responder's head.
    pub height: i64,
}

impl BlockRequest {
    /// Sentinel height meaning "your latest block".
    pub const HEAD: i64 = -1;

    /// Asks for the head header.
    pub fn head() -> Self {
        Self {
            request_type: RequestType::HeaderOnly,
            height: Self::HEAD,
        }
    }

    /// Asks for a full block.
    pub fn whole(height: u64) -> Self {
        Self {
            request_type: RequestType::WholeContent,
            height: i64::try_from(height).unwrap_or(i64::MAX),
        }
    }

    /// Wraps the request for the blockchain channel.
    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::wrap(
            BLOCKCHAIN_CHANNEL,
            EnvelopeType::BlockRequest,
            self,
        )?)
    }
}

/// A reply to a [`BlockRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockResponse {
    /// Form of the attached block.
    pub request_type: RequestType,
    /// The block, stripped of content for header-only replies.
    pub block: Block,
}

impl BlockResponse {
    /// Wraps the response for the blockchain channel.
    pub fn to_envelope(&self) -> Result<Envelope> {
        Ok(Envelope::wrap(
            BLOCKCHAIN_CHANNEL,
            EnvelopeType::BlockResponse,
            self,
        )?)
    }
}
