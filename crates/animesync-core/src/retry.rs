//! Bounded retry policy shared by all remote push operations
//!
//! Adapters never retry on their own. They return an error and the caller
//! (the sync engine) decides whether to try again according to one
//! [`RetryPolicy`].

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed { delay_secs: u64 },
    /// `base * 2^(retry - 1)`, capped at `max_secs`
    Exponential { base_secs: u64, max_secs: u64 },
}

impl Backoff {
    /// Delay to wait before the given 1-based attempt
    ///
    /// The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        match *self {
            Backoff::Fixed { delay_secs } => Duration::from_secs(delay_secs),
            Backoff::Exponential {
                base_secs,
                max_secs,
            } => {
                let exp = (attempt - 2).min(32);
                let secs = base_secs.saturating_mul(1u64 << exp);
                Duration::from_secs(secs.min(max_secs))
            }
        }
    }
}

/// Result of running an operation under a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final result (the last error when every attempt failed)
    pub result: Result<T>,
    /// Errors of the failed attempts, in order
    pub failures: Vec<Error>,
    /// Number of attempts made
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Maximum attempts plus backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed delay between attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed {
                delay_secs: delay.as_secs(),
            },
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds or attempts are exhausted
    ///
    /// `op` receives the 1-based attempt number. Waiting between attempts
    /// goes through `clock`.
    pub async fn run<T, F, Fut>(&self, clock: &dyn Clock, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut failures = Vec::new();
        let mut attempt = 1;

        loop {
            let delay = self.backoff.delay_before(attempt);
            if !delay.is_zero() {
                debug!("Waiting {:?} before attempt {}", delay, attempt);
                clock.sleep(delay).await;
            }

            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        failures,
                        attempts: attempt,
                    };
                }
                Err(e) if attempt < max_attempts => {
                    warn!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                    failures.push(e);
                    attempt += 1;
                }
                Err(e) => {
                    return RetryOutcome {
                        result: Err(e),
                        failures,
                        attempts: attempt,
                    };
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(5))
    }
}
