//! Reconnection policy with exponential backoff

use crate::config::{duration_ms, option_duration_ms};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of consulting the policy after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Reconnect after `delay`; `attempt` is 1-indexed
    Retry { attempt: u32, delay: Duration },
    /// Retries exhausted
    GiveUp,
}

/// Settings for automatic reconnection with exponential backoff
///
/// The delay before retry `n` (0-indexed, counted since the last successful
/// open) is `retry_interval * backoff_multiplier^n`, optionally capped by
/// `max_delay` and spread by `jitter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt
    #[serde(with = "duration_ms", rename = "retry_interval_ms")]
    pub retry_interval: Duration,
    /// Maximum number of reconnection attempts (0 = never reconnect)
    pub max_retries: u32,
    /// Multiplier applied per attempt (2.0 doubles the delay each time)
    pub backoff_multiplier: f64,
    /// Upper bound for a single delay
    #[serde(with = "option_duration_ms", rename = "max_delay_ms")]
    pub max_delay: Option<Duration>,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(5000),
            max_retries: 3,
            backoff_multiplier: 2.0,
            max_delay: None,
            jitter: 0.0,
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base retry interval
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set maximum retries
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Cap every delay at `delay`
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Disable reconnection
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry_count` (0-indexed), without jitter
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let delay_ms = self.retry_interval.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        // Saturating float-to-int cast keeps huge exponents finite
        let delay = Duration::from_millis(delay_ms as u64);

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Apply jitter to a base delay
    pub fn apply_jitter(&self, base: Duration) -> Duration {
        if self.jitter == 0.0 {
            return base;
        }

        let jitter_range = base.as_millis() as f64 * self.jitter;
        let jitter = rand::random::<f64>() * 2.0 * jitter_range - jitter_range;
        let adjusted_ms = (base.as_millis() as f64 + jitter).max(0.0) as u64;

        Duration::from_millis(adjusted_ms)
    }

    /// Check if another reconnection may be scheduled
    pub fn should_reconnect(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Decide what to do after a failure observed at `retry_count`
    pub fn decide(&self, retry_count: u32) -> ReconnectDecision {
        if !self.should_reconnect(retry_count) {
            return ReconnectDecision::GiveUp;
        }

        ReconnectDecision::Retry {
            attempt: retry_count + 1,
            delay: self.apply_jitter(self.delay_for_attempt(retry_count)),
        }
    }
}
