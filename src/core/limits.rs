//! Runtime safety limits (normative defaults).
//!
//! Values are intentionally explicit about their units to avoid confusion.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Leaderboard depth.
    pub top_k: usize,
    /// Maximum snapshot staleness before a query forces a recompute.
    pub snapshot_ttl_ms: u64,

    /// Advisory submission-lock lifetime; an expired holder can be taken over.
    pub lock_ttl_ms: u64,

    /// Fixed rate window per (principal, action type).
    pub rate_window_ms: u64,
    /// Default submissions allowed per window; per-type policies may override.
    pub max_actions_per_window: u32,

    pub max_subscribers: usize,
    /// Per-subscriber outbound queue depth before the subscriber is dropped.
    pub subscriber_queue_max_updates: usize,

    /// Retries after the first attempt for transient ledger failures.
    pub submit_max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    pub sqlite_busy_timeout_ms: u64,

    /// Bounded observation queue between the write path and the monitor.
    pub anomaly_queue_max_events: usize,
    /// Recent actions retained per principal for pattern matching.
    pub anomaly_history_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            top_k: 10,
            snapshot_ttl_ms: 5_000,

            lock_ttl_ms: 10_000,

            rate_window_ms: 60_000,
            max_actions_per_window: 10,

            max_subscribers: 256,
            subscriber_queue_max_updates: 64,

            submit_max_retries: 3,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 1_000,

            sqlite_busy_timeout_ms: 5_000,

            anomaly_queue_max_events: 1_024,
            anomaly_history_len: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Limits;

    #[test]
    fn limits_defaults_are_pinned() {
        let limits = Limits::default();
        assert_eq!(limits.top_k, 10);
        assert_eq!(limits.snapshot_ttl_ms, 5_000);
        assert_eq!(limits.lock_ttl_ms, 10_000);
        assert_eq!(limits.rate_window_ms, 60_000);
        assert_eq!(limits.max_actions_per_window, 10);
        assert_eq!(limits.max_subscribers, 256);
        assert_eq!(limits.subscriber_queue_max_updates, 64);
        assert_eq!(limits.submit_max_retries, 3);
        assert_eq!(limits.retry_base_delay_ms, 50);
        assert_eq!(limits.retry_max_delay_ms, 1_000);
        assert_eq!(limits.sqlite_busy_timeout_ms, 5_000);
        assert_eq!(limits.anomaly_queue_max_events, 1_024);
        assert_eq!(limits.anomaly_history_len, 10);
    }

    #[test]
    fn limits_deserialize_with_partial_overrides() {
        let limits: Limits = toml::from_str("top_k = 3\nsnapshot_ttl_ms = 100").unwrap();
        assert_eq!(limits.top_k, 3);
        assert_eq!(limits.snapshot_ttl_ms, 100);
        assert_eq!(limits.lock_ttl_ms, 10_000);
    }
}
