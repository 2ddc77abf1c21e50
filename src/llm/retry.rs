use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::LlmError;
use crate::config::ResolvedConfig;

/// Upper bound on a single exponential retry delay
const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(30);

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed,
    Exponential { factor: f64, max: Duration },
}

/// Retry policy wrapped around every external call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            backoff: Backoff::Fixed,
        }
    }
}

/// Terminal failure of a retried operation
#[derive(Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: LlmError,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Policy for a resolved run: exponential when the backoff factor is above 1
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let mut policy = Self::fixed(config.retry_attempts, config.retry_delay);
        if config.retry_backoff_factor > 1.0 {
            policy.backoff = Backoff::Exponential {
                factor: config.retry_backoff_factor,
                max: MAX_BACKOFF_DELAY,
            };
        }
        policy
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { factor, max } => {
                let exponent = attempt.saturating_sub(1).min(32) as i32;
                let nanos = self.delay.as_nanos() as f64 * factor.powi(exponent);
                Duration::from_nanos(nanos.round().min(u64::MAX as f64) as u64).min(max)
            }
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Returns the value and the attempts used.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<(T, u32), RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) if !error.is_retryable() || attempt >= max_attempts => {
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                    });
                }
                Err(error) => {
                    warn!(
                        "{}: attempt {}/{} failed, retrying: {}",
                        label, attempt, max_attempts, error
                    );
                    let delay = self.delay_after(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
