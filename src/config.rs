//! JSON configuration for rings, queues and the distributor.
//!
//! Every section has defaults, so a document only needs the keys it changes:
//!
//! ```json
//! { "queue": { "capacity": 65536 }, "distributor": { "conflation_window_us": 500 } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::layout::MAX_CAPACITY;
use crate::core::{Error, OverflowPolicy, Result};

pub const DEFAULT_CLAIM_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_READY_SPIN: u32 = 1024;
pub const DEFAULT_CONFLATION_WINDOW_US: u64 = 1_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    pub capacity: u64,
    pub overflow: OverflowPolicy,
    /// Spins on a claimed slot before falling back to yield + claim timeout.
    pub ready_spin: u32,
    /// How long a consumer waits on a claimed-but-unwritten slot before reclaiming it.
    pub claim_timeout_ms: u64,
    pub memlock: bool,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            overflow: OverflowPolicy::Reject,
            ready_spin: DEFAULT_READY_SPIN,
            claim_timeout_ms: DEFAULT_CLAIM_TIMEOUT_MS,
            memlock: false,
        }
    }
}

impl RingConfig {
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        // A one-slot ring cannot tell "ready" from "released" on its stamp.
        if self.capacity < 2 || self.capacity > MAX_CAPACITY {
            return Err(Error::Config(format!(
                "capacity must be within 2..={MAX_CAPACITY}, got {}",
                self.capacity
            )));
        }
        if self.claim_timeout_ms == 0 {
            return Err(Error::Config("claim_timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: u64,
    /// Longest single park inside `dequeue_wait` before re-polling.
    pub poll_interval_us: u64,
    pub claim_timeout_ms: u64,
    pub memlock: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 65_536,
            poll_interval_us: 1_000,
            claim_timeout_ms: DEFAULT_CLAIM_TIMEOUT_MS,
            memlock: false,
        }
    }
}

impl QueueConfig {
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us.max(1))
    }

    /// Queues never evict.
    pub fn ring_config(&self) -> RingConfig {
        RingConfig {
            capacity: self.capacity,
            overflow: OverflowPolicy::Reject,
            claim_timeout_ms: self.claim_timeout_ms,
            memlock: self.memlock,
            ..RingConfig::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    /// History depth per key.
    pub ring_capacity: u64,
    pub conflation_enabled: bool,
    pub conflation_window_us: u64,
    /// Pending deliveries per subscriber before new ones are dropped.
    pub subscriber_queue_depth: usize,
    /// Keys created at startup; others are added on first publish.
    pub keys: Vec<String>,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1024,
            conflation_enabled: true,
            conflation_window_us: DEFAULT_CONFLATION_WINDOW_US,
            subscriber_queue_depth: 4096,
            keys: Vec::new(),
        }
    }
}

impl DistributorConfig {
    pub fn conflation_window(&self) -> Duration {
        Duration::from_micros(self.conflation_window_us)
    }

    /// Per-key rings keep the newest records.
    pub fn ring_config(&self) -> RingConfig {
        RingConfig {
            capacity: self.ring_capacity,
            overflow: OverflowPolicy::OverwriteOldest,
            ..RingConfig::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.ring_config().validate()?;
        if self.subscriber_queue_depth == 0 {
            return Err(Error::Config("subscriber_queue_depth must be > 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ring: RingConfig,
    pub queue: QueueConfig,
    pub distributor: DistributorConfig,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|err| Error::Config(err.to_string()))?;
        config.ring.validate()?;
        config.queue.ring_config().validate()?;
        config.distributor.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let config = EngineConfig::from_json(
            r#"{ "queue": { "capacity": 8 }, "ring": { "overflow": "overwrite_oldest" } }"#,
        )
        .expect("parse");
        assert_eq!(config.queue.capacity, 8);
        assert_eq!(config.queue.poll_interval_us, 1_000);
        assert_eq!(config.ring.overflow, OverflowPolicy::OverwriteOldest);
        assert_eq!(config.distributor.conflation_window(), Duration::from_millis(1));
    }

    #[test]
    fn invalid_capacity_is_a_config_error() {
        assert!(matches!(
            EngineConfig::from_json(r#"{ "ring": { "capacity": 1 } }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json("{ not json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "distributor": { "keys": ["BTC-USD"] } }"#).expect("write");
        let config = EngineConfig::load(&path).expect("load");
        assert_eq!(config.distributor.keys, vec!["BTC-USD".to_string()]);
        assert_eq!(config.distributor.ring_config().overflow, OverflowPolicy::OverwriteOldest);
    }
}
