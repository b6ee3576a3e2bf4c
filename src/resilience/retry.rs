//! Retry decisions and exponential backoff.

use std::time::Duration;

use rand::Rng;

use crate::config::ClientConfig;
use crate::errors::A2AError;

/// Shortest backoff ever returned.
const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Bounded exponential-backoff retry policy.
///
/// Attempts are numbered from 1. `max_retries` bounds the total number of
/// attempts, the first one included. The policy holds no state; the caller
/// owns the attempt counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_client_config(config: &ClientConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_retries: config.max_retries.max(1),
            base_backoff: Duration::try_from_secs_f64(config.retry_backoff_seconds)
                .unwrap_or(defaults.base_backoff),
            max_backoff: Duration::try_from_secs_f64(config.max_backoff_seconds)
                .unwrap_or(defaults.max_backoff),
            jitter: config.jitter,
        }
    }

    /// Whether another attempt should follow failed attempt `attempt`.
    ///
    /// Only transient errors (timeouts, connection failures, open circuits)
    /// are retried.
    pub fn should_retry(&self, attempt: u32, error: &A2AError) -> bool {
        attempt < self.max_retries && error.is_transient()
    }

    /// Backoff after attempt `attempt` without jitter:
    /// `base * 2^(attempt - 1)`, capped at `max_backoff`.
    pub fn base_backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
            .max(MIN_BACKOFF)
    }

    /// Backoff to sleep after attempt `attempt`.
    ///
    /// Jitter adds up to one extra base backoff, so the result stays within
    /// `[b, 2b]` of this attempt's base `b`. The next attempt's base is `2b`,
    /// which keeps the sequence non-decreasing up to the ceiling.
    pub fn next_backoff(&self, attempt: u32) -> Duration {
        let backoff = self.base_backoff_for(attempt);
        if !self.jitter {
            return backoff;
        }
        let extra = backoff.mul_f64(rand::thread_rng().gen::<f64>());
        backoff
            .saturating_add(extra)
            .min(self.max_backoff.max(MIN_BACKOFF))
    }
}
