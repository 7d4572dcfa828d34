use std::sync::Arc;

use crate::{
    PersisterBackend, PostgresSqlPersister, RepositoryPersister, SqlitePersister, StdResult,
};

/// Connects the persister selected by `backend`.
pub async fn connect_persister(
    backend: PersisterBackend,
    database_url: &str,
) -> StdResult<Arc<dyn RepositoryPersister>> {
    Ok(match backend {
        PersisterBackend::Sqlite => Arc::new(SqlitePersister::try_new(database_url).await?),
        PersisterBackend::Postgres => Arc::new(PostgresSqlPersister::try_new(database_url).await?),
    })
}
