use std::{fmt::Display, future::Future, time::Duration};

use log::{error, warn};
use rand::Rng;
use tokio::time::sleep;

use crate::{CrawlerConfig, ErrorClass, RetryError};

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts, the first one included.
    max_attempts: u32,

    /// The delay before the second attempt.
    base_delay: Duration,

    /// The upper bound of the non-jittered delay.
    max_delay: Duration,

    /// Whether a random jitter of up to half the delay is added.
    with_jitter: bool,
}

impl RetryPolicy {
    /// Creates a new `RetryPolicy` instance.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            with_jitter: true,
        }
    }

    /// Sets whether to use jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Retrieves the maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The non-jittered delay before attempt `attempt` (counted from 1).
    ///
    /// `base * 2^(attempt - 2)` capped at the max delay; zero before the first attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow((attempt - 2).min(31));

        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Adds a random jitter in `[0, delay / 2]` when enabled.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if !self.with_jitter || delay.is_zero() {
            return delay;
        }
        let max_jitter_ms = u64::try_from((delay / 2).as_millis()).unwrap_or(u64::MAX);

        delay + Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms))
    }
}

impl From<&CrawlerConfig> for RetryPolicy {
    fn from(config: &CrawlerConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay, config.max_delay)
            .with_jitter(config.with_jitter)
    }
}

/// Runs fallible operations under a [`RetryPolicy`], retrying only transient failures.
#[derive(Debug, Clone)]
pub struct Retrier {
    policy: RetryPolicy,
}

impl Retrier {
    /// Creates a new `Retrier` instance with the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Retrieves the policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails fatally or runs out of attempts.
    ///
    /// `classify` decides which errors are worth another attempt; fatal errors are returned
    /// at once without consuming the remaining attempts.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        label: &str,
        mut operation: F,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(res) => return Ok(res),
                Err(e) if classify(&e) == ErrorClass::Fatal => {
                    error!("{label} attempt #{attempt} failed with a fatal error: {e}");
                    return Err(RetryError::Fatal(e));
                }
                Err(e) => {
                    if attempt >= self.policy.max_attempts {
                        error!("{label} failed after {attempt} attempts: {e}");
                        return Err(RetryError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e,
                        });
                    }
                    attempt += 1;
                    let delay = self.policy.jittered(self.policy.backoff_delay(attempt));
                    warn!(
                        "{label} attempt #{} failed: {e}, retrying in {delay:?}",
                        attempt - 1
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
