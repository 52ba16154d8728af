//! Retry policy with configurable backoff and jitter.
//!
//! Delays never decrease from one attempt to the next and never exceed the
//! configured cap, whatever jitter strategy is selected.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^failures
    Exponential,
    /// delay = base * (failures + 1)
    #[default]
    Linear,
    /// delay = base
    Constant,
}

/// Jitter strategy applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter.
    #[default]
    None,
    /// Random from 0 to delay.
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first call.
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 10_000,
            max_delay_ms: 30_000,
            backoff_strategy: BackoffStrategy::Linear,
            jitter_strategy: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

/// Per-call retry bookkeeping.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Failed attempts so far.
    pub failures: usize,
    last_delay_ms: u64,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no attempts remain.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.failures >= config.max_attempts.max(1)
    }

    /// Calculates the delay before the next attempt.
    ///
    /// Uses the current failure count; the result is at least the previous
    /// delay and at most `max_delay_ms`.
    pub fn calculate_delay(&mut self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let step = self.failures.saturating_sub(1);

        let delay = match config.backoff_strategy {
            BackoffStrategy::Exponential => {
                let exp = u32::try_from(step).unwrap_or(u32::MAX);
                base.saturating_mul(2u64.saturating_pow(exp))
            }
            BackoffStrategy::Linear => {
                base.saturating_mul(u64::try_from(step + 1).unwrap_or(u64::MAX))
            }
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        let clamped = jittered.max(self.last_delay_ms).min(max);
        self.last_delay_ms = clamped;
        Duration::from_millis(clamped)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more attempts, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Records one failed attempt and decides what happens next.
#[must_use]
pub fn should_retry(state: &mut RetryState, config: &RetryConfig, retryable: bool) -> RetryDecision {
    state.failures += 1;
    if !retryable {
        return RetryDecision::NotRetryable;
    }
    if state.is_exhausted(config) {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry(state.calculate_delay(config))
}
