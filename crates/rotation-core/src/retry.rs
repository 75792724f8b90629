//! Explicit retry policy: attempt budget plus an exponential backoff curve.
//!
//! Used as a value by every loop that retries (transaction re-runs, relay
//! backoff hints, lock polling) so the schedule is inspectable in tests.

use std::time::Duration;

use rand::RngExt;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// When set, each delay is drawn uniformly from `[d/2, d]`.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Defaults for re-running a serialization-conflicted transaction.
    pub fn transactional() -> Self {
        Self::new(3, Duration::from_millis(50))
            .with_max_delay(Duration::from_secs(2))
            .with_jitter(true)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64()).max(0.0);
        if self.jitter && capped > 0.0 {
            let mut rng = rand::rng();
            Duration::from_secs_f64(rng.random_range(capped / 2.0..=capped))
        } else {
            Duration::from_secs_f64(capped)
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts were made.
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transactional()
    }
}
