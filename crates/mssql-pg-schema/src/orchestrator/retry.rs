//! Exponential backoff for transient failures.

use crate::config::MigrationConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.backoff.initial_delay_ms),
            max_delay: Duration::from_millis(config.backoff.max_delay_ms),
            multiplier: config.backoff.multiplier,
        }
    }

    /// Whether another attempt is allowed after `retries_so_far` retries.
    pub fn allows(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&MigrationConfig::default())
    }
}
