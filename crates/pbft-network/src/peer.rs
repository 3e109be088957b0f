//! Peer identity.

use serde::{Deserialize, Serialize};

/// An opaque peer identifier.
///
/// Core logic only ever refers to peers by this id; the transport resolves it
/// to a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Creates a peer id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form for log output.
    #[must_use]
    pub fn short_id(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(16)
            .map_or(self.0.len(), |(idx, _)| idx);
        &self.0[..end]
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_id())
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_truncates() {
        let id = PeerId::new("0123456789abcdef0123456789abcdef");
        assert_eq!(id.short_id(), "0123456789abcdef");
        assert_eq!(id.to_string(), "0123456789abcdef");
        assert_eq!(id.as_str().len(), 32);
    }

    #[test]
    fn test_short_id_keeps_short_names() {
        let id = PeerId::from("node-1");
        assert_eq!(id.short_id(), "node-1");
    }
}
