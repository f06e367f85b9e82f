//! Poison repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use tempo_core::error::{StorageError, StorageResult};
use tempo_core::models::{EventKey, PoisonItem, TxHash};
use tempo_core::ports::PoisonRepository;

use super::helpers::{bytes_to_hash32, to_i64, to_u64};

/// PostgreSQL implementation of PoisonRepository.
pub struct PgPoisonRepository {
    pool: PgPool,
}

impl PgPoisonRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PoisonRepository for PgPoisonRepository {
    async fn upsert_poison(&self, item: &PoisonItem) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO indexer_poison (
                tx_hash, log_index, block_number, reason, attempts,
                payload, first_failed_at, last_failed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tx_hash, log_index) DO UPDATE SET
                block_number = EXCLUDED.block_number,
                reason = EXCLUDED.reason,
                attempts = EXCLUDED.attempts,
                payload = EXCLUDED.payload,
                last_failed_at = EXCLUDED.last_failed_at
            "#,
        )
        .bind(&item.key.tx_hash.0[..])
        .bind(to_i64(item.key.log_index, "indexer_poison.log_index")?)
        .bind(to_i64(item.block_number, "indexer_poison.block_number")?)
        .bind(&item.reason)
        .bind(i32::try_from(item.attempts).unwrap_or(i32::MAX))
        .bind(&item.payload)
        .bind(item.first_failed_at)
        .bind(item.last_failed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn get_poison(&self, key: &EventKey) -> StorageResult<Option<PoisonItem>> {
        let row = sqlx::query_as::<_, PoisonRow>(
            r#"
            SELECT tx_hash, log_index, block_number, reason, attempts,
                   payload, first_failed_at, last_failed_at
            FROM indexer_poison
            WHERE tx_hash = $1 AND log_index = $2
            "#,
        )
        .bind(&key.tx_hash.0[..])
        .bind(to_i64(key.log_index, "indexer_poison.log_index")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(PoisonRow::into_item).transpose()
    }

    async fn list_poison(&self, limit: u32, offset: u32) -> StorageResult<Vec<PoisonItem>> {
        let rows = sqlx::query_as::<_, PoisonRow>(
            r#"
            SELECT tx_hash, log_index, block_number, reason, attempts,
                   payload, first_failed_at, last_failed_at
            FROM indexer_poison
            ORDER BY last_failed_at DESC, block_number DESC, log_index DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter().map(PoisonRow::into_item).collect()
    }

    async fn delete_poison(&self, key: &EventKey) -> StorageResult<bool> {
        let result =
            sqlx::query("DELETE FROM indexer_poison WHERE tx_hash = $1 AND log_index = $2")
                .bind(&key.tx_hash.0[..])
                .bind(to_i64(key.log_index, "indexer_poison.log_index")?)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_poison(&self) -> StorageResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM indexer_poison")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        to_u64(count, "indexer_poison.count")
    }
}

#[derive(sqlx::FromRow)]
struct PoisonRow {
    tx_hash: Vec<u8>,
    log_index: i64,
    block_number: i64,
    reason: String,
    attempts: i32,
    payload: serde_json::Value,
    first_failed_at: chrono::DateTime<chrono::Utc>,
    last_failed_at: chrono::DateTime<chrono::Utc>,
}

impl PoisonRow {
    fn into_item(self) -> StorageResult<PoisonItem> {
        Ok(PoisonItem {
            key: EventKey::new(
                TxHash(bytes_to_hash32(self.tx_hash, "indexer_poison.tx_hash")?),
                to_u64(self.log_index, "indexer_poison.log_index")?,
            ),
            block_number: to_u64(self.block_number, "indexer_poison.block_number")?,
            reason: self.reason,
            attempts: u32::try_from(self.attempts).unwrap_or_default(),
            payload: self.payload,
            first_failed_at: self.first_failed_at,
            last_failed_at: self.last_failed_at,
        })
    }
}
