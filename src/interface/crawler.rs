use crate::{CrawlSummary, StdResult};

/// A trait for crawling GitHub repositories into a storage medium.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RepositoryCrawler: Sync + Send {
    /// Crawls repositories until `target_total` items have an outcome.
    async fn crawl(&self, target_total: u32) -> StdResult<CrawlSummary>;
}
