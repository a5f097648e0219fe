//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::store::SnapshotReadPolicy;

/// Configuration for a [`NotificationEngine`](crate::NotificationEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of records kept in the store.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// `limit` sent with snapshot requests.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    /// Whether a snapshot may unset read state.
    #[serde(default)]
    pub snapshot_read_policy: SnapshotReadPolicy,
    /// Push channel reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    /// Periodic refetch interval; disabled when `None`.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

fn default_capacity() -> usize {
    50
}

fn default_fetch_limit() -> usize {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            fetch_limit: default_fetch_limit(),
            snapshot_read_policy: SnapshotReadPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            poll_interval_secs: None,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Bounded exponential backoff for the push connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Attempts after a failure before giving up and staying disconnected.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for the delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Whether to add up to 25% jitter to delays.
    #[serde(default = "default_true")]
    pub use_jitter: bool,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            use_jitter: default_true(),
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Whether attempt number `attempt` (1-based) is still within budget.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);

        if self.use_jitter {
            let jitter = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            Duration::from_millis(delay_ms + jitter)
        } else {
            Duration::from_millis(delay_ms)
        }
    }
}
