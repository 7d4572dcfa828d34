use std::str::FromStr;

use anyhow::Context;
use log::{debug, info};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use crate::{PersistError, RepositoryPersister, RepositoryRecord, StdResult};

const CREATE_SCHEMA: [&str; 3] = [
    r#"
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY,
    full_name TEXT NOT NULL UNIQUE,
    star_count INTEGER NOT NULL DEFAULT 0 CHECK (star_count >= 0),
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    last_crawled_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)
    "#,
    "CREATE INDEX IF NOT EXISTS idx_repositories_star_count ON repositories (star_count DESC)",
    "CREATE INDEX IF NOT EXISTS idx_repositories_last_crawled ON repositories (last_crawled_at)",
];

const UPSERT_REPOSITORY: &str = r#"
INSERT INTO repositories (id, full_name, star_count, last_crawled_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (id) DO UPDATE
SET star_count = excluded.star_count,
    last_crawled_at = excluded.last_crawled_at,
    updated_at = CURRENT_TIMESTAMP
"#;

/// A persister that stores repository metadata in an embedded SQLite database.
pub struct SqlitePersister {
    pool: SqlitePool,
}

impl SqlitePersister {
    /// Creates a new `SqlitePersister` instance, creating the database file and schema if needed.
    pub async fn try_new(database_url: &str) -> StdResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid SQLite database URL: {database_url}"))?
            .create_if_missing(true);
        // A single long-lived connection, so in-memory databases survive between calls.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .with_context(|| "Failed to open the SQLite database")?;
        for statement in CREATE_SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .with_context(|| "Failed to set up the SQLite schema")?;
        }
        info!("SQLite database ready: {database_url}");

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl RepositoryPersister for SqlitePersister {
    async fn upsert(&self, records: &[RepositoryRecord]) -> Result<u32, PersistError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut transaction = self.pool.begin().await?;
        let mut total_upserted = 0;
        for record in records {
            let result = sqlx::query(UPSERT_REPOSITORY)
                .bind(**record.id())
                .bind(record.full_name().as_str())
                .bind(i64::from(**record.star_count()))
                .bind(*record.last_crawled_at())
                .execute(&mut *transaction)
                .await?;
            debug!("Upserted {record}");
            total_upserted += result.rows_affected() as u32;
        }
        transaction.commit().await?;

        Ok(total_upserted)
    }

    async fn count(&self) -> Result<u64, PersistError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM repositories")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;

    async fn persister() -> SqlitePersister {
        SqlitePersister::try_new("sqlite::memory:").await.unwrap()
    }

    fn crawled_at(hour: u32) -> DateTime<Utc> {
        format!("2025-06-01T{hour:02}:00:00Z").parse().unwrap()
    }

    async fn stored_rows(persister: &SqlitePersister) -> Vec<(i64, String, i64, DateTime<Utc>)> {
        sqlx::query_as(
            "SELECT id, full_name, star_count, last_crawled_at FROM repositories ORDER BY id",
        )
        .fetch_all(&persister.pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_inserts_new_records() {
        let persister = persister().await;

        let total = persister
            .upsert(&[
                RepositoryRecord::new(1, "org-1/repository-1", 10, crawled_at(1)),
                RepositoryRecord::new(2, "org-1/repository-2", 20, crawled_at(1)),
            ])
            .await
            .unwrap();

        assert_eq!(2, total);
        assert_eq!(2, persister.count().await.unwrap());
    }

    #[tokio::test]
    async fn upsert_empty_batch_is_a_no_op() {
        let persister = persister().await;

        assert_eq!(0, persister.upsert(&[]).await.unwrap());
        assert_eq!(0, persister.count().await.unwrap());
    }

    #[tokio::test]
    async fn upsert_twice_yields_the_same_state() {
        let persister = persister().await;
        let records = vec![
            RepositoryRecord::new(1, "org-1/repository-1", 10, crawled_at(1)),
            RepositoryRecord::new(2, "org-1/repository-2", 20, crawled_at(1)),
        ];

        persister.upsert(&records).await.unwrap();
        let state_once = stored_rows(&persister).await;
        persister.upsert(&records).await.unwrap();
        let state_twice = stored_rows(&persister).await;

        assert_eq!(state_once, state_twice);
        assert_eq!(2, persister.count().await.unwrap());
    }

    #[tokio::test]
    async fn upsert_refreshes_stars_and_crawl_time_only() {
        let persister = persister().await;
        persister
            .upsert(&[RepositoryRecord::new(1, "org-1/repository-1", 10, crawled_at(1))])
            .await
            .unwrap();
        let (created_at_before,): (String,) =
            sqlx::query_as("SELECT created_at FROM repositories WHERE id = 1")
                .fetch_one(&persister.pool)
                .await
                .unwrap();

        persister
            .upsert(&[RepositoryRecord::new(1, "org-1/renamed", 15, crawled_at(2))])
            .await
            .unwrap();
        let (created_at_after,): (String,) =
            sqlx::query_as("SELECT created_at FROM repositories WHERE id = 1")
                .fetch_one(&persister.pool)
                .await
                .unwrap();

        assert_eq!(
            vec![(1, "org-1/repository-1".to_string(), 15, crawled_at(2))],
            stored_rows(&persister).await
        );
        assert_eq!(created_at_before, created_at_after);
    }

    #[tokio::test]
    async fn upsert_reports_unique_name_clash_as_constraint_violation_and_rolls_back() {
        let persister = persister().await;
        persister
            .upsert(&[RepositoryRecord::new(1, "org-1/repository-1", 10, crawled_at(1))])
            .await
            .unwrap();

        let error = persister
            .upsert(&[
                RepositoryRecord::new(3, "org-1/repository-3", 30, crawled_at(1)),
                RepositoryRecord::new(2, "org-1/repository-1", 20, crawled_at(1)),
            ])
            .await
            .unwrap_err();

        assert!(matches!(error, PersistError::ConstraintViolation(_)));
        assert_eq!(1, persister.count().await.unwrap());
    }
}
