//! Exponential backoff for registry refreshes.
//!
//! The delay before retry `n` (0-indexed) is `base * factor^n`, capped at
//! `max_delay`, with optional jitter. Callers observe each failed attempt
//! through a callback so they can report it before the backoff sleep.

use crate::config::{RegistryConfig, SyncSettings};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff policy for one retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Scale each delay by a random factor in `0.5..1.5`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RegistryConfig::DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_secs(RegistryConfig::DEFAULT_RETRY_BASE_DELAY_SECS),
            max_delay: Duration::from_secs(600),
            factor: RegistryConfig::RETRY_EXPONENTIAL_BASE,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_sync_settings(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.retry_attempts.max(1),
            base_delay: settings.retry_base_delay(),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after failed attempt `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.powi(attempt as i32);
        let secs = (self.base_delay.as_secs_f64() * multiplier).min(self.max_delay.as_secs_f64());

        let secs = if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            (secs * factor).min(self.max_delay.as_secs_f64())
        } else {
            secs
        };

        Duration::from_secs_f64(secs)
    }
}

/// What happened to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFailure {
    /// Another attempt follows after `delay`.
    Retrying { attempt: u32, delay: Duration },
    /// No attempts remain, or the error is not retryable.
    Final { attempt: u32 },
}

/// Final result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Run `operation` until it succeeds, the error is not retryable, or the
/// policy's attempts are used up.
///
/// `on_failure` sees every failed attempt before the backoff sleep.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
    mut on_failure: impl FnMut(&E, AttemptFailure),
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", attempt + 1);
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                };
            }
            Err(e) => {
                if !should_retry(&e) || attempt + 1 >= max_attempts {
                    warn!("Attempt {}/{} failed for good: {}", attempt + 1, max_attempts, e);
                    on_failure(&e, AttemptFailure::Final { attempt });
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt + 1,
                    };
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt + 1,
                    max_attempts,
                    e,
                    delay
                );
                on_failure(&e, AttemptFailure::Retrying { attempt, delay });
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
