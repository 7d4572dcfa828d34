use std::{fmt::Display, time::Duration};

use anyhow::anyhow;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::StdResult;

/// What to do with a batch whose retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and continue with the next batch.
    #[default]
    Skip,
    /// Record the failure and end the run.
    Abort,
}

impl Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Skip => write!(f, "skip"),
            FailurePolicy::Abort => write!(f, "abort"),
        }
    }
}

/// The storage the records are persisted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum PersisterBackend {
    /// Embedded SQLite file.
    #[default]
    Sqlite,
    /// PostgreSQL server.
    Postgres,
}

/// Tuning of the batch crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlerConfig {
    /// Maximum number of items fetched per batch.
    pub max_batch_size: u32,

    /// Quota units kept in reserve.
    pub safety_buffer: u32,

    /// Maximum number of attempts per stage.
    pub max_attempts: u32,

    /// Backoff delay before the second attempt.
    pub base_delay: Duration,

    /// Upper bound of the non-jittered backoff delay.
    pub max_delay: Duration,

    /// Whether retry delays get random jitter.
    pub with_jitter: bool,

    /// What to do with a batch whose retries are exhausted.
    pub failure_policy: FailurePolicy,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            safety_buffer: 100,
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            with_jitter: true,
            failure_policy: FailurePolicy::Skip,
        }
    }
}

impl CrawlerConfig {
    /// Checks that the configuration can drive a crawl.
    pub fn validate(&self) -> StdResult<()> {
        if self.max_batch_size == 0 {
            return Err(anyhow!("Maximum batch size must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("Maximum attempts must be greater than 0"));
        }
        if self.base_delay > self.max_delay {
            return Err(anyhow!(
                "Base delay ({:?}) must not exceed max delay ({:?})",
                self.base_delay,
                self.max_delay
            ));
        }

        Ok(())
    }

    #[cfg(test)]
    /// Creates a configuration with fast retries for testing purposes.
    pub fn dummy() -> Self {
        Self {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            with_jitter: false,
            ..Self::default()
        }
    }
}
