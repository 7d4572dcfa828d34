use crate::{CrawlProgress, CrawlSummary, StdResult};

/// A trait for durably recording crawl progress.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ProgressStore: Sync + Send {
    /// Loads the last recorded progress, if any.
    async fn load(&self) -> StdResult<Option<CrawlProgress>>;

    /// Records the progress.
    async fn save(&self, progress: &CrawlProgress) -> StdResult<()>;

    /// Records the final summary of a run.
    async fn save_summary(&self, summary: &CrawlSummary) -> StdResult<()>;
}
