//! Packet identifier pool configuration.

use std::sync::Arc;

use pidpool_core::{CircularIdPool, FreePacketIdRanges, PacketIdPool};
use serde::Deserialize;

/// Default max inflight exchanges per client (broker -> client).
pub const DEFAULT_MAX_INFLIGHT: u16 = 32;

/// Default number of packet ids reserved per queue poll.
pub const DEFAULT_POLL_BATCH_SIZE: u16 = 50;

/// Which pool implementation backs each session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStrategy {
    /// Free-interval list, lowest free id first.
    #[default]
    Ranges,
    /// Used-id set with a circular cursor.
    Circular,
}

impl PoolStrategy {
    /// Create a fresh pool for one session.
    pub fn build(self) -> Arc<dyn PacketIdPool> {
        match self {
            PoolStrategy::Ranges => Arc::new(FreePacketIdRanges::new()),
            PoolStrategy::Circular => Arc::new(CircularIdPool::new()),
        }
    }
}

/// Packet identifier pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool implementation used for new sessions.
    pub strategy: PoolStrategy,

    /// Maximum open QoS exchanges per client. 0 = unbounded.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: u16,

    /// Packet ids reserved per queue poll.
    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: u16,
}

fn default_max_inflight() -> u16 {
    DEFAULT_MAX_INFLIGHT
}
fn default_poll_batch_size() -> u16 {
    DEFAULT_POLL_BATCH_SIZE
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            strategy: PoolStrategy::default(),
            max_inflight: DEFAULT_MAX_INFLIGHT,
            poll_batch_size: DEFAULT_POLL_BATCH_SIZE,
        }
    }
}

impl PoolConfig {
    /// Inflight window, `None` when unbounded.
    pub fn inflight_window(&self) -> Option<u16> {
        match self.max_inflight {
            0 => None,
            n => Some(n),
        }
    }

    /// Packet ids to reserve per poll: the larger of the batch size and the
    /// inflight window.
    pub fn poll_limit(&self) -> usize {
        let batch = self.poll_batch_size as usize;
        self.inflight_window()
            .map_or(batch, |window| batch.max(usize::from(window)))
    }

    /// Validate the pool configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_batch_size == 0 {
            return Err("poll_batch_size must be at least 1".into());
        }
        Ok(())
    }
}
