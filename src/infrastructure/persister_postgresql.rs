use anyhow::Context;
use log::{debug, info};
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{PersistError, RepositoryPersister, RepositoryRecord, StdResult};

const CREATE_SCHEMA: [&str; 3] = [
    r#"
CREATE TABLE IF NOT EXISTS repositories (
    id BIGINT PRIMARY KEY,
    full_name VARCHAR(255) NOT NULL UNIQUE,
    star_count BIGINT NOT NULL DEFAULT 0 CHECK (star_count >= 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_crawled_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
    "#,
    "CREATE INDEX IF NOT EXISTS idx_repositories_star_count ON repositories (star_count DESC)",
    "CREATE INDEX IF NOT EXISTS idx_repositories_last_crawled ON repositories (last_crawled_at)",
];

const UPSERT_REPOSITORY: &str = r#"
INSERT INTO repositories (id, full_name, star_count, last_crawled_at)
VALUES ($1, $2, $3, $4)
ON CONFLICT (id) DO UPDATE
SET star_count = EXCLUDED.star_count,
    last_crawled_at = EXCLUDED.last_crawled_at,
    updated_at = NOW()
"#;

/// A persister that stores repository metadata in a PostgreSQL database.
pub struct PostgresSqlPersister {
    pool: PgPool,
}

impl PostgresSqlPersister {
    /// Creates a new `PostgresSqlPersister` instance and makes sure the schema exists.
    pub async fn try_new(connection_string: &str) -> StdResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(connection_string)
            .await
            .with_context(|| "Failed to connect to PostgreSQL")?;
        for statement in CREATE_SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .with_context(|| "Failed to set up the PostgreSQL schema")?;
        }
        info!("PostgreSQL database ready");

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl RepositoryPersister for PostgresSqlPersister {
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
