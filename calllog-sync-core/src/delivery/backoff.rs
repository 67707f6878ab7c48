//! Exponential backoff with a cap

use std::time::Duration;

use crate::config::DeliveryConfig;

/// Delay before a requeued record may be claimed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay())
    }

    /// Wait after the `attempt`-th requeue: `min(base * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}
