/// Deterministic exponential backoff.
///
/// Delays follow `base * 2^(attempt-1)`, optionally capped. Both the provider
/// retry loop and the poll loop's network backoff share this schedule, so the
/// wait before a given attempt is reproducible.
use std::time::Duration;

/// Retry schedule configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: usize,
    /// Base delay for the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay; `None` leaves the schedule uncapped.
    pub max_delay: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_200),
            max_delay: None,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn new(max_attempts: usize, base_delay: Duration, max_delay: Option<Duration>) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait after the given 1-based attempt has failed.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = u32::try_from(attempt - 1).unwrap_or(u32::MAX).min(31);
        let delay = self.base_delay.saturating_mul(1_u32 << exponent);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts were made.
    #[must_use]
    pub const fn can_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

/// Message substrings the worker treats as transient network conditions.
const TRANSIENT_TOKENS: &[&str] = &[
    "timeout",
    "timed out",
    "temporarily unavailable",
    "service unavailable",
    "internal server error",
    "connection reset",
    "connection aborted",
    "connection error",
    "read error",
];

/// Whether an error message describes a transient condition worth retrying.
#[must_use]
pub fn is_transient_message(message: &str) -> bool {
    let text = message.trim().to_lowercase();
    if text.is_empty() {
        return false;
    }
    TRANSIENT_TOKENS.iter().any(|token| text.contains(token))
}
