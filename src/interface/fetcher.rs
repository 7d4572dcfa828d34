use crate::{Batch, FetchError, FetchResponse, QuotaSnapshot};

/// A trait for fetching raw repository payloads from the API.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RepositoryFetcher: Sync + Send {
    /// Fetches one page of raw repository payloads covering the batch.
    async fn fetch(&self, batch: &Batch) -> Result<FetchResponse, FetchError>;

    /// Reads the current API rate limit without fetching any repository.
    async fn quota(&self) -> Result<QuotaSnapshot, FetchError>;
}
