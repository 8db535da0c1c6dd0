//! Caller-side retry policy for optimistic conflicts

use std::time::Duration;

use rand::Rng;

/// Default number of attempts (first try included)
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(10);

const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(200);

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; values below 1 act as 1
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, never retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before retry number `attempt`, plus up to half of it as jitter.
    /// Never exceeds `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        let max_jitter = (base / 2).as_micros() as u64;
        if max_jitter == 0 {
            return base;
        }
        let jitter = Duration::from_micros(rand::thread_rng().gen_range(0..=max_jitter));
        (base + jitter).min(self.max_delay)
    }
}
