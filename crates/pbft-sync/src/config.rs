//! Sync configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and concurrency settings for the [`BlockSyncPool`](crate::BlockSyncPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between head requests to all peers.
    #[serde(with = "millis")]
    pub head_interval: Duration,

    /// Interval between progress checks.
    #[serde(with = "millis")]
    pub check_interval: Duration,

    /// Maximum heights fetched concurrently in one pass.
    pub window: u64,

    /// Time to wait for a block before asking another peer.
    #[serde(with = "millis")]
    pub fetch_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            head_interval: Duration::from_secs(1),
            check_interval: Duration::from_millis(500),
            window: 100,
            fetch_timeout: Duration::from_secs(5),
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
