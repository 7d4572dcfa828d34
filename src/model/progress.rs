use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Batch;

/// How far the crawl has durably progressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlProgress {
    /// The offset up to which every batch has an outcome.
    pub cursor: u32,

    /// The number of batches persisted successfully.
    pub completed_batches: u32,

    /// The total number of items to crawl.
    pub target_total: u32,

    /// When the progress was last recorded.
    pub updated_at: DateTime<Utc>,
}

impl CrawlProgress {
    /// Creates the progress of a crawl that has not started yet.
    pub fn start(target_total: u32) -> Self {
        Self {
            cursor: 0,
            completed_batches: 0,
            target_total,
            updated_at: Utc::now(),
        }
    }

    /// Moves the cursor past `batch`.
    ///
    /// Batches are strictly ordered: only the batch starting at the cursor can advance it.
    pub fn advance_past(&mut self, batch: &Batch, completed: bool) {
        debug_assert_eq!(self.cursor, batch.start_offset());
        self.cursor = batch.end_offset();
        if completed {
            self.completed_batches += 1;
        }
        self.updated_at = Utc::now();
    }

    /// Whether the cursor reached the target.
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.target_total
    }
}

impl Display for CrawlProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Progress: cursor={}/{}, batches={}",
            self.cursor, self.target_total, self.completed_batches
        )
    }
}

/// The stages a batch goes through, in order.
///
/// The crawler logs each stage a batch reaches. A [`BatchFailure`] only ever records
/// `Fetched` or `Persisted`, the stages that call a remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStage {
    /// Not dispatched yet.
    Pending,
    /// Quota reserved for the fetch.
    Reserved,
    /// Raw payloads fetched.
    Fetched,
    /// Raw payloads mapped to records.
    Transformed,
    /// Records upserted.
    Persisted,
    /// Cursor moved past the batch.
    Advanced,
}

impl Display for BatchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = match self {
            BatchStage::Pending => "pending",
            BatchStage::Reserved => "reserved",
            BatchStage::Fetched => "fetched",
            BatchStage::Transformed => "transformed",
            BatchStage::Persisted => "persisted",
            BatchStage::Advanced => "advanced",
        };
        write!(f, "{stage}")
    }
}

/// A batch that could not be completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// The start offset of the batch.
    pub offset: u32,

    /// The number of items of the batch.
    pub size: u32,

    /// The stage that failed.
    pub stage: BatchStage,

    /// Why it failed.
    pub reason: String,
}

impl BatchFailure {
    /// Creates a new `BatchFailure` instance.
    pub fn new(batch: &Batch, stage: BatchStage, reason: impl Into<String>) -> Self {
        Self {
            offset: batch.start_offset(),
            size: batch.size(),
            stage,
            reason: reason.into(),
        }
    }
}

impl Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Batch at offset {} ({} items) failed at stage {}: {}",
            self.offset, self.size, self.stage, self.reason
        )
    }
}

/// How a crawl run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CrawlOutcome {
    /// The cursor reached the target.
    Completed,
    /// A stop signal was received; progress was saved.
    Interrupted,
    /// A fatal error ended the run.
    Aborted {
        /// Why the run was aborted.
        reason: String,
    },
}

/// The final report of a crawl run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    /// How the run ended.
    pub outcome: CrawlOutcome,

    /// Raw items fetched in batches that completed.
    pub processed: u32,

    /// Rows written by the persister.
    pub upserted: u32,

    /// Raw items dropped by the mapping.
    pub dropped: u32,

    /// Batches that could not be completed, in offset order.
    pub failed_batches: Vec<BatchFailure>,

    /// Repositories stored that were not there before the run, when known.
    pub new_repositories: Option<u64>,

    /// The progress at the end of the run.
    pub progress: CrawlProgress,
}

impl CrawlSummary {
    /// Creates an empty summary starting from `progress`.
    pub fn new(progress: CrawlProgress) -> Self {
        Self {
            outcome: CrawlOutcome::Completed,
            processed: 0,
            upserted: 0,
            dropped: 0,
            failed_batches: vec![],
            new_repositories: None,
            progress,
        }
    }

    /// Whether the run completed without skipping any batch.
    pub fn is_success(&self) -> bool {
        self.outcome == CrawlOutcome::Completed && self.failed_batches.is_empty()
    }
}

impl Display for CrawlSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let outcome = match &self.outcome {
            CrawlOutcome::Completed => "completed".to_string(),
            CrawlOutcome::Interrupted => "interrupted".to_string(),
            CrawlOutcome::Aborted { reason } => format!("aborted ({reason})"),
        };
        write!(
            f,
            "Crawl {outcome}: processed={}, upserted={}, dropped={}, failed_batches={}, new_repositories={}, {}",
            self.processed,
            self.upserted,
            self.dropped,
            self.failed_batches.len(),
            self.new_repositories
                .map(|total| total.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            self.progress
        )
    }
}
