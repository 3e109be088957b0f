//! Wire envelope.
//!
//! Every message on the wire is an [`Envelope`]: a logical channel name, a
//! payload kind and opaque payload bytes. Envelopes and payloads are JSON
//! encoded.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Kind of payload carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    /// A consensus protocol message.
    Consensus,
    /// A request for a block or block header.
    BlockRequest,
    /// A reply carrying a block or block header.
    BlockResponse,
    /// A gossiped transaction.
    Transaction,
}

/// A framed message as exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Logical channel the envelope is routed on.
    pub channel: String,
    /// Payload kind.
    #[serde(rename = "type")]
    pub msg_type: EnvelopeType,
    /// Encoded payload.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope from already-encoded payload bytes.
    #[must_use]
    pub fn new(channel: impl Into<String>, msg_type: EnvelopeType, payload: Vec<u8>) -> Self {
        Self {
            channel: channel.into(),
            msg_type,
            payload,
        }
    }

    /// Encodes `value` as the payload of a new envelope.
    pub fn wrap<T: Serialize>(
        channel: impl Into<String>,
        msg_type: EnvelopeType,
        value: &T,
    ) -> Result<Self> {
        Ok(Self::new(channel, msg_type, serde_json::to_vec(value)?))
    }

    /// Decodes the payload.
    pub fn open<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Serializes the envelope for the wire.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parses an envelope from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CONSENSUS_CHANNEL;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        height: i64,
    }

    #[test]
    fn test_wrap_and_open() {
        let env = Envelope::wrap(CONSENSUS_CHANNEL, EnvelopeType::Consensus, &Ping { height: -1 })
            .unwrap();
        let bytes = env.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();

        assert_eq!(decoded.channel, CONSENSUS_CHANNEL);
        assert_eq!(decoded.msg_type, EnvelopeType::Consensus);
        assert_eq!(decoded.open::<Ping>().unwrap(), Ping { height: -1 });
    }

    #[test]
    fn test_type_field_name_on_wire() {
        let env = Envelope::new("blockchain", EnvelopeType::BlockRequest, vec![1, 2]);
        let json: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "block_request");
        assert_eq!(json["channel"], "blockchain");
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Envelope::decode(b"not json").is_err());
        let env = Envelope::new("consensus", EnvelopeType::Consensus, b"{".to_vec());
        assert!(env.open::<Ping>().is_err());
    }
}
