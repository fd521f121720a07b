use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::BackoffConfig;
use crate::crd::TrackingKey;

/// Consecutive failure count per tracking object, reset on success.
#[derive(Clone, Debug, Default)]
pub struct RetryTracker {
    attempts: Arc<DashMap<TrackingKey, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the attempt number (starting at 1).
    pub fn increment(&self, key: &TrackingKey) -> u32 {
        let mut n = self.attempts.entry(key.clone()).or_insert(0);
        *n = n.saturating_add(1);
        *n
    }

    pub fn reset(&self, key: &TrackingKey) {
        self.attempts.remove(key);
    }

    pub fn attempts(&self, key: &TrackingKey) -> u32 {
        self.attempts.get(key).map(|n| *n).unwrap_or(0)
    }
}

/// Delay before retry `attempt`: `base * 2^(attempt-1)` capped at the ceiling.
pub fn compute_backoff(attempt: u32, cfg: &BackoffConfig) -> Duration {
    let ceiling = Duration::from_secs(cfg.max_secs);
    let shift = attempt.saturating_sub(1).min(31);
    let delay = Duration::from_millis(cfg.base_ms.saturating_mul(1u64 << shift));
    delay.min(ceiling)
}
