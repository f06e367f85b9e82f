//! Song strategy configuration repository for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use tempo_core::error::{StorageError, StorageResult};
use tempo_core::models::{SongId, StrategyConfig};
use tempo_core::ports::StrategyConfigRepository;

use super::helpers::bytes_to_hash32;

/// PostgreSQL implementation of StrategyConfigRepository.
pub struct PgStrategyRepository {
    pool: PgPool,
}

impl PgStrategyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StrategyConfigRepository for PgStrategyRepository {
    async fn get_strategy(&self, song_id: &SongId) -> StorageResult<Option<StrategyConfig>> {
        let row = sqlx::query_as::<_, StrategyRow>(
            r#"
            SELECT song_hash, strategy_id, params, updated_at
            FROM song_strategies
            WHERE song_hash = $1
            "#,
        )
        .bind(&song_id.0[..])
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(StrategyRow::into_config).transpose()
    }

    async fn list_strategies(&self) -> StorageResult<Vec<StrategyConfig>> {
        let rows = sqlx::query_as::<_, StrategyRow>(
            r#"
            SELECT song_hash, strategy_id, params, updated_at
            FROM song_strategies
            ORDER BY song_hash
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter().map(StrategyRow::into_config).collect()
    }

    async fn upsert_strategy(&self, config: &StrategyConfig) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO song_strategies (song_hash, strategy_id, params, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (song_hash) DO UPDATE SET
                strategy_id = EXCLUDED.strategy_id,
                params = EXCLUDED.params,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&config.song_id.0[..])
        .bind(&config.strategy_id)
        .bind(&config.params)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct StrategyRow {
    song_hash: Vec<u8>,
    strategy_id: String,
    params: serde_json::Value,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl StrategyRow {
    fn into_config(self) -> StorageResult<StrategyConfig> {
        Ok(StrategyConfig {
            song_id: SongId(bytes_to_hash32(self.song_hash, "song_strategies.song_hash")?),
            strategy_id: self.strategy_id,
            params: self.params,
            updated_at: self.updated_at,
        })
    }
}
