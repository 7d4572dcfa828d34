use crate::{PersistError, RepositoryRecord};

/// A trait for persisting repository records to a storage medium.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RepositoryPersister: Sync + Send {
    /// Inserts new records and refreshes the star count and crawl time of known ones.
    ///
    /// Calling it twice with the same records leaves the same stored state as calling it once.
    async fn upsert(&self, records: &[RepositoryRecord]) -> Result<u32, PersistError>;

    /// Counts the stored repositories.
    async fn count(&self) -> Result<u64, PersistError>;
}
