//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `tempo-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool and migrations
//! - [`PgRepositories`] - Composite repository implementing `Repositories` trait
//! - Individual repos: `PgPlayRepository`, `PgCheckpointRepository`, etc.
//!
//! Amounts are `NUMERIC(78, 0)`: bound as decimal text with a `::NUMERIC`
//! cast and read back with `::TEXT`.

mod checkpoint_repo;
mod database;
mod helpers;
mod play_repo;
mod poison_repo;
mod strategy_repo;

pub use checkpoint_repo::PgCheckpointRepository;
pub use database::{Database, DatabaseConfig};
pub use play_repo::{PgPlayRepository, PgSongRepository};
pub use poison_repo::PgPoisonRepository;
pub use strategy_repo::PgStrategyRepository;

use std::sync::Arc;

use async_trait::async_trait;

use tempo_core::error::{StorageError, StorageResult};
use tempo_core::models::{PaymentEvent, WriteOutcome};
use tempo_core::ports::{
    CheckpointRepository, PlayRepository, PoisonRepository, Repositories, SongRepository,
    StrategyConfigRepository,
};

use helpers::to_i64;

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repositories` trait.
///
/// This provides a single entry point for all storage operations and
/// implements the ledger transaction spanning `plays` and `songs`.
pub struct PgRepositories {
    db: Arc<Database>,
    plays: PgPlayRepository,
    songs: PgSongRepository,
    checkpoints: PgCheckpointRepository,
    poison: PgPoisonRepository,
    strategies: PgStrategyRepository,
}

impl PgRepositories {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        let pool = db.pool().clone();
        Self {
            plays: PgPlayRepository::new(pool.clone()),
            songs: PgSongRepository::new(pool.clone()),
            checkpoints: PgCheckpointRepository::new(&db),
            poison: PgPoisonRepository::new(pool.clone()),
            strategies: PgStrategyRepository::new(pool),
            db,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

#[async_trait]
impl Repositories for PgRepositories {
    fn plays(&self) -> &dyn PlayRepository {
        &self.plays
    }

    fn songs(&self) -> &dyn SongRepository {
        &self.songs
    }

    fn checkpoints(&self) -> &dyn CheckpointRepository {
        &self.checkpoints
    }

    fn poison(&self) -> &dyn PoisonRepository {
        &self.poison
    }

    fn strategies(&self) -> &dyn StrategyConfigRepository {
        &self.strategies
    }

    async fn record_payment_atomic(&self, event: &PaymentEvent) -> StorageResult<WriteOutcome> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        // Resolve the song; row lock serializes concurrent aggregate bumps
        let song_ref: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM songs WHERE song_hash = $1 FOR UPDATE")
                .bind(&event.song_id.0[..])
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StorageError::QueryError(e.to_string()))?;
        let song_ref = song_ref.map(|(id,)| id);

        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO plays (
                tx_hash, log_index, song_hash, song_id, listener,
                gross_amount, protocol_fee, net_amount,
                payment_type, block_number, block_timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7::NUMERIC, $8::NUMERIC, $9, $10, $11)
            ON CONFLICT (tx_hash, log_index) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&event.tx_hash.0[..])
        .bind(to_i64(event.log_index, "plays.log_index")?)
        .bind(&event.song_id.0[..])
        .bind(song_ref)
        .bind(event.listener.as_slice())
        .bind(event.gross_amount.to_string())
        .bind(event.protocol_fee.to_string())
        .bind(event.net_amount.to_string())
        .bind(event.payment_type.as_str())
        .bind(to_i64(event.block_number, "plays.block_number")?)
        .bind(event.timestamp)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        if inserted.is_none() {
            // Nothing written; dropping the transaction rolls back the row lock
            return Ok(WriteOutcome::Duplicate);
        }

        if let Some(song_id) = song_ref {
            sqlx::query(
                r#"
                UPDATE songs
                SET plays = plays + 1,
                    earnings = earnings + $2::NUMERIC
                WHERE id = $1
                "#,
            )
            .bind(song_id)
            .bind(event.net_amount.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(WriteOutcome::Inserted {
            song_resolved: song_ref.is_some(),
        })
    }
}
