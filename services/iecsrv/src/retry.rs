//! Retry command executor
//!
//! Runs an operation, retrying on connection-class failures with a configurable
//! delay policy. Knows nothing about devices or relays.

use std::future::Future;
use std::time::{Duration, Instant};

use errors::ClassifiedError;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::error::{IecSrvError, Result};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total invocations, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub delay: Duration,
    /// Delay growth per attempt (1.0 keeps it constant)
    pub backoff_multiplier: f64,
    /// Upper bound of a single delay
    pub max_delay: Duration,
    /// Add ±25% jitter
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: Duration::from_millis(config.delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// Constant delay, no jitter
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            max_delay: delay.max(Duration::from_secs(60)),
            ..Self::default()
        }
    }

    /// Delay after the `failed_attempts`-th failure
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1);
        let multiplier = self.backoff_multiplier.max(1.0);

        // delay = base * multiplier ^ (failed_attempts - 1)
        let mut delay = self.delay.mul_f64(multiplier.powi(exponent as i32));

        if delay > self.max_delay {
            delay = self.max_delay;
        }

        if self.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }
}

/// Generic "run this, retry on transient failure" primitive
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails fatally, or attempts run out
    ///
    /// Transient failures (`ConnectionFailure`, `Timeout`) are retried; after
    /// the last attempt the result is a `ConnectionFailure` naming the
    /// operation, the attempt count and the last error. Any other error is
    /// returned unchanged on first occurrence.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            "{} succeeded after {:?} (attempt {}/{})",
                            operation_name,
                            start_time.elapsed(),
                            attempt,
                            max_attempts
                        );
                    }
                    return Ok(value);
                },
                Err(e) if e.is_transient() => {
                    if attempt >= max_attempts {
                        warn!(
                            "{} giving up after {} attempts: {}",
                            operation_name, attempt, e
                        );
                        return Err(IecSrvError::connection(format!(
                            "{} failed after {} attempts: {}",
                            operation_name, attempt, e
                        )));
                    }

                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        operation_name, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => {
                    debug!(
                        "{} failed on attempt {} with non-transient error: {}",
                        operation_name, attempt, e
                    );
                    return Err(e);
                },
            }
        }
    }
}
