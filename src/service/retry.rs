//! Bounded retry with exponential backoff and jitter.
//!
//! Only transient failures are retried; deterministic outcomes (validation,
//! duplicates) never reach this layer as errors.

use std::time::Duration;

use rand::Rng;

use crate::core::Limits;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the delay used as symmetric jitter.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_limits(limits: &Limits) -> Self {
        Self {
            max_retries: limits.submit_max_retries,
            base_delay_ms: limits.retry_base_delay_ms,
            max_delay_ms: limits.retry_max_delay_ms,
            jitter: 0.3,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * 2.0_f64.powi(attempt as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        let jitter_range = clamped * self.jitter;
        let jitter: f64 = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((clamped + jitter).max(0.0) as u64)
    }

    /// Run `op`, retrying failures `retryable` accepts until the budget is
    /// exhausted. Returns the last error either way; callers distinguish an
    /// exhausted budget from a permanent failure by re-checking the error.
    pub fn run<T, E>(
        &self,
        op_name: &str,
        retryable: impl Fn(&E) -> bool,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && retryable(&err) => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        op = op_name,
                        attempt = attempt + 1,
                        budget = self.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
