//! Block structure.
//!
//! A block's identity is the hash of its header only. The primary signs the
//! id and replicas append `SignPair`s over the same id, so signatures stay
//! valid when a block is forwarded header-only.

use crate::crypto::{Hash, Keypair, PublicKey, Signature};
use crate::transaction::{Receipt, Transaction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A unique block identifier (SHA-256 hash of the block header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId([u8; 32]);

impl BlockId {
    /// Parent id of the genesis block (all zeros).
    pub const GENESIS_PARENT: Self = Self([0u8; 32]);

    /// Creates a block ID from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creates a block ID from a hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::GENESIS_PARENT
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// A replica's signature over a block id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignPair {
    /// Signing validator.
    pub signer: PublicKey,
    /// Signature over the block id.
    pub signature: Signature,
}

/// The hashed part of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height (0 = genesis).
    pub height: u64,

    /// Id of the previous block.
    pub previous: BlockId,

    /// Timestamp (unix milliseconds).
    pub timestamp: u64,

    /// View in which the block was proposed.
    pub view: u64,

    /// Merkle root of transaction ids.
    pub tx_root: Hash,

    /// Merkle root of receipts.
    pub receipt_root: Hash,
}

impl BlockHeader {
    /// Computes the block ID from the header.
    pub fn id(&self) -> BlockId {
        let mut hasher = Sha256::new();
        hasher.update(self.height.to_be_bytes());
        hasher.update(self.previous.as_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.view.to_be_bytes());
        hasher.update(self.tx_root);
        hasher.update(self.receipt_root);
        BlockId(hasher.finalize().into())
    }
}

/// A block as proposed, voted on and committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block header.
    pub header: BlockHeader,

    /// Claimed id; must equal `header.id()`.
    pub id: BlockId,

    /// Ordered transactions. Empty in header-only form.
    #[serde(default)]
    pub transactions: Vec<Transaction>,

    /// One receipt per transaction. Empty in header-only form.
    #[serde(default)]
    pub receipts: Vec<Receipt>,

    /// Proposing validator. Empty for genesis.
    #[serde(default)]
    pub signer: PublicKey,

    /// Proposer's signature over the id. Empty for genesis.
    #[serde(default)]
    pub signature: Signature,

    /// Replica signatures over the id.
    #[serde(default)]
    pub sign_pairs: Vec<SignPair>,
}

impl Block {
    /// Assembles an unsigned block; roots and id are computed from the body.
    pub fn new(
        height: u64,
        previous: BlockId,
        timestamp: u64,
        view: u64,
        transactions: Vec<Transaction>,
        receipts: Vec<Receipt>,
    ) -> Self {
        let header = BlockHeader {
            height,
            previous,
            timestamp,
            view,
            tx_root: Self::compute_tx_root(&transactions),
            receipt_root: Self::compute_receipt_root(&receipts),
        };

        Self {
            id: header.id(),
            header,
            transactions,
            receipts,
            signer: PublicKey::default(),
            signature: Signature::default(),
            sign_pairs: Vec::new(),
        }
    }

    /// Creates the genesis block.
    pub fn genesis(timestamp: u64) -> Self {
        Self::new(0, BlockId::GENESIS_PARENT, timestamp, 0, vec![], vec![])
    }

    /// Returns the block ID.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the block height.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Returns the view the block was proposed in.
    pub fn view(&self) -> u64 {
        self.header.view
    }

    /// Returns the previous block ID.
    pub fn previous(&self) -> BlockId {
        self.header.previous
    }

    /// Returns the number of transactions.
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// Returns the number of replica signatures.
    pub fn signature_count(&self) -> usize {
        self.sign_pairs.len()
    }

    /// Signs the block as its proposer.
    pub fn sign_as_primary(&mut self, keypair: &Keypair) {
        self.signer = keypair.public_key();
        self.signature = keypair.sign(self.id.as_bytes());
    }

    /// Adds a replica signature. Returns false if the key already signed.
    pub fn countersign(&mut self, keypair: &Keypair) -> bool {
        let signer = keypair.public_key();
        if self.has_signed(&signer) {
            return false;
        }
        self.sign_pairs.push(SignPair {
            signature: keypair.sign(self.id.as_bytes()),
            signer,
        });
        true
    }

    /// Returns true if `key` is the proposer or already countersigned.
    pub fn has_signed(&self, key: &PublicKey) -> bool {
        self.signer == *key || self.sign_pairs.iter().any(|pair| pair.signer == *key)
    }

    /// Copies sign pairs from `other` that this block does not have yet.
    ///
    /// Returns the number of pairs added.
    pub fn merge_sign_pairs(&mut self, other: &Block) -> usize {
        let mut added = 0;
        for pair in &other.sign_pairs {
            if !self.has_signed(&pair.signer) {
                self.sign_pairs.push(pair.clone());
                added += 1;
            }
        }
        added
    }

    /// Returns a copy without transactions and receipts.
    pub fn header_only(&self) -> Self {
        Self {
            transactions: Vec::new(),
            receipts: Vec::new(),
            ..self.clone()
        }
    }

    /// Checks both merkle roots against the body.
    pub fn verify_roots(&self) -> bool {
        Self::compute_tx_root(&self.transactions) == self.header.tx_root
            && Self::compute_receipt_root(&self.receipts) == self.header.receipt_root
    }

    fn compute_tx_root(transactions: &[Transaction]) -> Hash {
        merkle_root(transactions.iter().map(|tx| *tx.id().as_bytes()).collect())
    }

    fn compute_receipt_root(receipts: &[Receipt]) -> Hash {
        merkle_root(receipts.iter().map(Receipt::hash).collect())
    }
}

/// Computes a binary merkle root, duplicating the last node on odd levels.
pub fn merkle_root(mut hashes: Vec<Hash>) -> Hash {
    if hashes.is_empty() {
        return [0u8; 32];
    }

    while hashes.len() > 1 {
        hashes = hashes
            .chunks(2)
            .map(|chunk| {
                let mut hasher = Sha256::new();
                hasher.update(chunk[0]);
                hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
                let node: Hash = hasher.finalize().into();
                node
            })
            .collect();
    }

    hashes[0]
}
