//! Retry policy: backoff schedule and error classification.

use std::time::Duration;

use crate::error::UnillmError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff base.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`
    Retry { delay: Duration },
    /// Propagate the error as-is
    Abort,
    /// Budget spent; wrap the error
    Exhausted,
}

/// Exponential backoff retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Same retry budget with a 1ms base so tests don't sleep for seconds.
    pub fn for_tests() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(1),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before the retry that follows failed `attempt` (0-based): `base * 2^(attempt+1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_add(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Decide what to do after `attempt` (0-based) failed with `error`.
    pub fn classify(&self, attempt: u32, error: &UnillmError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::Abort;
        }
        if attempt >= self.max_retries {
            return RetryDecision::Exhausted;
        }
        let delay = match error {
            UnillmError::RateLimited { retry_after } => (*retry_after).max(self.delay_for(attempt)),
            _ => self.delay_for(attempt),
        };
        RetryDecision::Retry { delay }
    }
}
