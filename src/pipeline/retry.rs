use std::time::Duration;

use rand::Rng;

/// How many times a worker tries one identifier and how long it waits in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first one included. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Scale each delay by a random factor in 0.5..1.5.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 1.0,
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(retries: u32) -> Self {
        RetryPolicy { max_attempts: retries.saturating_add(1), ..Self::default() }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exp);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let secs = if self.jitter {
            capped * rand::rng().random_range(0.5..1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }
}
