use std::time::Duration;

/// Retry limit plus exponential backoff between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub retry_limit: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on backoff delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 2,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// No retries, no delay
    pub fn none() -> Self {
        Self {
            retry_limit: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before re-enqueueing after `attempts` failures (1-based).
    ///
    /// base * 2^(attempts-1), capped at `max_delay`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = 1u32 << attempts.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }
}
