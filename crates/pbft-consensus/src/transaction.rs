//! Value-transfer transactions and their receipts.

use crate::crypto::{sha256, Keypair, PublicKey, Signature};
use crate::error::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A unique transaction identifier (SHA-256 of the signed body).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId([u8; 32]);

impl TransactionId {
    /// Creates a transaction ID from raw bytes.
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
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// An account address: hex of the SHA-256 of the owner's public key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Derives the address owned by `key`.
    pub fn from_public_key(key: &PublicKey) -> Result<Self> {
        Ok(Self(hex::encode(sha256(&key.to_bytes()?))))
    }

    /// Returns the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A signed transfer of value between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Paying account.
    pub sender: Address,
    /// Receiving account.
    pub recipient: Address,
    /// Amount transferred.
    pub amount: u64,
    /// Sender-chosen nonce; makes otherwise identical transfers distinct.
    pub nonce: u64,
    /// Creation time (unix milliseconds).
    pub timestamp: u64,
    /// Key of the sender; must hash to `sender`.
    pub public_key: PublicKey,
    /// Signature over the transaction id.
    pub signature: Signature,
}

impl Transaction {
    /// Builds and signs a transfer from the keypair's own account.
    pub fn transfer(
        keypair: &Keypair,
        recipient: Address,
        amount: u64,
        nonce: u64,
        timestamp: u64,
    ) -> Result<Self> {
        let public_key = keypair.public_key();
        let mut tx = Self {
            sender: Address::from_public_key(&public_key)?,
            recipient,
            amount,
            nonce,
            timestamp,
            public_key,
            signature: Signature::default(),
        };
        tx.signature = keypair.sign(tx.id().as_bytes());
        Ok(tx)
    }

    /// Computes the transaction ID over every field except the signature.
    pub fn id(&self) -> TransactionId {
        let mut hasher = Sha256::new();
        hasher.update(self.sender.0.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.recipient.0.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.amount.to_be_bytes());
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        hasher.update(self.public_key.0.as_bytes());
        TransactionId(hasher.finalize().into())
    }

    /// Checks that the key owns the sender account and signed this transaction.
    pub fn verify(&self) -> Result<()> {
        if Address::from_public_key(&self.public_key)? != self.sender {
            return Err(ConsensusError::InvalidTransaction(format!(
                "{}: sender does not match public key",
                self.id()
            )));
        }
        self.public_key
            .verify(self.id().as_bytes(), &self.signature)
            .map_err(|_| ConsensusError::InvalidTransaction(format!("{}: bad signature", self.id())))
    }
}

/// The outcome of executing a transaction.
///
/// Receipts record post-execution balances so that a re-execution on another
/// node either reproduces them exactly or the block is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// The executed transaction.
    pub tx_id: TransactionId,
    /// Sender balance after the transfer.
    pub sender_balance: u64,
    /// Recipient balance after the transfer.
    pub recipient_balance: u64,
}

impl Receipt {
    /// Hash of the receipt, used as a merkle leaf.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.tx_id.as_bytes());
        hasher.update(self.sender_balance.to_be_bytes());
        hasher.update(self.recipient_balance.to_be_bytes());
        hasher.finalize().into()
    }
}
