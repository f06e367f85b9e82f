//! Checkpoint repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use tempo_core::error::{StorageError, StorageResult};
use tempo_core::models::Checkpoint;
use tempo_core::ports::CheckpointRepository;

use super::database::Database;
use super::helpers::{to_i64, to_u64};

/// PostgreSQL implementation of CheckpointRepository.
pub struct PgCheckpointRepository {
    pool: PgPool,
}

impl PgCheckpointRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl CheckpointRepository for PgCheckpointRepository {
    async fn get_checkpoint(&self, source: &str) -> StorageResult<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT source, last_block, updated_at
            FROM indexer_state
            WHERE source = $1
            "#,
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> StorageResult<()> {
        // GREATEST keeps the stored block monotonic even if a stale writer races
        sqlx::query(
            r#"
            INSERT INTO indexer_state (source, last_block, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (source) DO UPDATE SET
                last_block = GREATEST(indexer_state.last_block, EXCLUDED.last_block),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&checkpoint.source)
        .bind(to_i64(checkpoint.last_block, "indexer_state.last_block")?)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    source: String,
    last_block: i64,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl CheckpointRow {
    fn into_checkpoint(self) -> StorageResult<Checkpoint> {
        Ok(Checkpoint {
            source: self.source,
            last_block: to_u64(self.last_block, "indexer_state.last_block")?,
            updated_at: self.updated_at,
        })
    }
}
