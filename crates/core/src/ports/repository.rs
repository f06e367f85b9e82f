//! Port traits for data repositories.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `tempo-storage`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageResult;
use crate::models::{
    Checkpoint, EventKey, PaymentEvent, PlayRecord, PoisonItem, Song, SongId, StrategyConfig,
    WriteOutcome,
};

// =============================================================================
// Repository Traits
// =============================================================================

/// Read access to recorded plays.
#[async_trait]
pub trait PlayRepository: Send + Sync {
    /// Get a play by its event key.
    async fn get_play(&self, key: &EventKey) -> StorageResult<Option<PlayRecord>>;

    /// Total number of recorded plays.
    async fn count_plays(&self) -> StorageResult<u64>;

    /// Payments recorded for a song with a block timestamp at or after
    /// `since`, ordered by `(block_number, log_index)`.
    async fn song_history(
        &self,
        song_id: &SongId,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PaymentEvent>>;
}

/// Read access to song aggregates.
#[async_trait]
pub trait SongRepository: Send + Sync {
    /// Get a song aggregate by its on-chain hash.
    async fn get_song(&self, song_id: &SongId) -> StorageResult<Option<Song>>;
}

/// Repository for indexer checkpoints.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Get the checkpoint for a source.
    async fn get_checkpoint(&self, source: &str) -> StorageResult<Option<Checkpoint>>;

    /// Upsert the checkpoint. The stored block never decreases.
    async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> StorageResult<()>;
}

/// Durable quarantine for events that exhausted their retries.
#[async_trait]
pub trait PoisonRepository: Send + Sync {
    /// Insert, or update reason/attempts/block/payload on key conflict.
    async fn upsert_poison(&self, item: &PoisonItem) -> StorageResult<()>;

    /// Get one poison item.
    async fn get_poison(&self, key: &EventKey) -> StorageResult<Option<PoisonItem>>;

    /// List poison items, most recently failed first.
    async fn list_poison(&self, limit: u32, offset: u32) -> StorageResult<Vec<PoisonItem>>;

    /// Delete a poison item. Returns whether a row was removed.
    async fn delete_poison(&self, key: &EventKey) -> StorageResult<bool>;

    /// Number of poison items.
    async fn count_poison(&self) -> StorageResult<u64>;
}

/// Repository for per-song strategy configuration.
#[async_trait]
pub trait StrategyConfigRepository: Send + Sync {
    /// Get the strategy configured for a song.
    async fn get_strategy(&self, song_id: &SongId) -> StorageResult<Option<StrategyConfig>>;

    /// List every configured song strategy.
    async fn list_strategies(&self) -> StorageResult<Vec<StrategyConfig>>;

    /// Insert or replace a song's strategy.
    async fn upsert_strategy(&self, config: &StrategyConfig) -> StorageResult<()>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Combined repository access for the indexer.
///
/// This trait provides access to all individual repositories and
/// atomic operations that span multiple tables.
#[async_trait]
pub trait Repositories: Send + Sync {
    /// Access the play repository.
    fn plays(&self) -> &dyn PlayRepository;

    /// Access the song repository.
    fn songs(&self) -> &dyn SongRepository;

    /// Access the checkpoint repository.
    fn checkpoints(&self) -> &dyn CheckpointRepository;

    /// Access the poison repository.
    fn poison(&self) -> &dyn PoisonRepository;

    /// Access the strategy configuration repository.
    fn strategies(&self) -> &dyn StrategyConfigRepository;

    /// Record a payment in a single transaction.
    ///
    /// Inserts the play row keyed by `(tx_hash, log_index)`; on conflict
    /// nothing is written and `Duplicate` is returned. When the row is new
    /// and the song hash resolves, the song's plays and earnings are bumped
    /// in the same transaction. Any failure rolls everything back.
    async fn record_payment_atomic(&self, event: &PaymentEvent) -> StorageResult<WriteOutcome>;
}
