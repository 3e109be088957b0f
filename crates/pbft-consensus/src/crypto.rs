//! Keys, signatures and hashing.
//!
//! Public keys and signatures travel as hex strings so that messages stay
//! readable in JSON and usable as map keys. They are only decoded into
//! Ed25519 types at verification time.

use crate::error::{ConsensusError, Result};
use ed25519_consensus::{SigningKey, VerificationKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 digest.
pub type Hash = [u8; 32];

/// Hashes a byte slice.
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hex-encoded Ed25519 public key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(pub String);

impl PublicKey {
    /// Creates from a hex string.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Creates from raw key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Returns the hex string.
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Decodes the raw key bytes.
    pub fn to_bytes(&self) -> Result<[u8; 32]> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&self.0, &mut bytes)
            .map_err(|e| ConsensusError::InvalidKey(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes into a verification key.
    pub fn to_verification_key(&self) -> Result<VerificationKey> {
        VerificationKey::try_from(self.to_bytes()?)
            .map_err(|e| ConsensusError::InvalidKey(e.to_string()))
    }

    /// Verifies `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let key = self.to_verification_key()?;
        let sig = signature.to_signature()?;
        key.verify(&sig, message)
            .map_err(|_| ConsensusError::InvalidSignature(self.short().to_string()))
    }

    /// Returns a shortened form for log output.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// Hex-encoded Ed25519 signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub String);

impl Signature {
    /// Creates from a hex string.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the hex string.
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Returns true if no signature has been set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_signature(&self) -> Result<ed25519_consensus::Signature> {
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(&self.0, &mut bytes)
            .map_err(|e| ConsensusError::InvalidSignature(e.to_string()))?;
        Ok(ed25519_consensus::Signature::from(bytes))
    }
}

impl From<ed25519_consensus::Signature> for Signature {
    fn from(sig: ed25519_consensus::Signature) -> Self {
        Self(hex::encode(sig.to_bytes()))
    }
}

/// An Ed25519 signing keypair.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generates a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::new(rand::thread_rng()),
        }
    }

    /// Derives a deterministic keypair from a numeric seed.
    ///
    /// Only meant for devnets and tests.
    pub fn from_seed(seed: u64) -> Self {
        let mut material = b"pbft-devnet-seed".to_vec();
        material.extend_from_slice(&seed.to_le_bytes());
        Self {
            signing: SigningKey::from(sha256(&material)),
        }
    }

    /// Restores a keypair from a hex-encoded 32-byte secret.
    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(secret.trim(), &mut bytes)
            .map_err(|e| ConsensusError::InvalidKey(e.to_string()))?;
        Ok(Self {
            signing: SigningKey::from(bytes),
        })
    }

    /// Returns the hex-encoded secret.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    /// Returns the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(&self.signing.verification_key().to_bytes())
    }

    /// Signs a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message).into()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = Keypair::generate();
        let sig = keypair.sign(b"hello");
        assert!(keypair.public_key().verify(b"hello", &sig).is_ok());
        assert!(keypair.public_key().verify(b"hellp", &sig).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let a = Keypair::from_seed(1);
        let b = Keypair::from_seed(2);
        let sig = a.sign(b"msg");
        assert!(matches!(
            b.public_key().verify(b"msg", &sig),
            Err(ConsensusError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_seeded_keys_are_deterministic() {
        assert_eq!(
            Keypair::from_seed(7).public_key(),
            Keypair::from_seed(7).public_key()
        );
        assert_ne!(
            Keypair::from_seed(7).public_key(),
            Keypair::from_seed(8).public_key()
        );
    }

    #[test]
    fn test_secret_hex_restore() {
        let keypair = Keypair::generate();
        let restored = Keypair::from_secret_hex(&keypair.secret_hex()).unwrap();
        assert_eq!(keypair.public_key(), restored.public_key());
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(PublicKey::from_hex("zz").to_verification_key().is_err());
        let keypair = Keypair::from_seed(1);
        assert!(keypair
            .public_key()
            .verify(b"x", &Signature::from_hex("abcd"))
            .is_err());
        assert!(Keypair::from_secret_hex("1234").is_err());
    }
}
