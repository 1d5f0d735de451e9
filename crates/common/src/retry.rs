//! Retry policy applied at the transport boundary
//!
//! Every outbound provider and E-utilities call goes through one `RetryPolicy`,
//! so attempts, backoff and retryable error kinds are configured in one place.

use crate::config::RetryConfig;
use crate::errors::{AppError, ErrorCode, Result};
use backoff::{future::retry, ExponentialBackoff};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff with a hard attempt cap
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_interval: Duration,
    max_interval: Duration,
    multiplier: f64,
    retry_on: Vec<ErrorCode>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_interval: Duration::from_millis(config.initial_backoff_ms),
            max_interval: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            retry_on: config.retry_on.clone(),
        }
    }

    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            multiplier: 1.0,
            retry_on: Vec::new(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `err` qualifies for another attempt under this policy
    pub fn should_retry(&self, err: &AppError) -> bool {
        err.is_transient() && self.retry_on.contains(&err.code())
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of attempts
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        retry(self.backoff(), || {
            attempt += 1;
            let current = attempt;
            let fut = operation();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if current < self.max_attempts && self.should_retry(&e) => {
                        warn!(
                            operation = operation_name,
                            attempt = current,
                            max_attempts = self.max_attempts,
                            error = %e,
                            "Transient failure, retrying"
                        );
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
