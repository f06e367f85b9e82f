//! Play and song repository implementations for PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use tempo_core::error::{StorageError, StorageResult};
use tempo_core::models::{EventKey, PaymentEvent, PlayRecord, Song, SongId, TxHash};
use tempo_core::ports::{PlayRepository, SongRepository};

use super::helpers::{
    bytes_to_address, bytes_to_hash32, parse_numeric, parse_payment_type, to_i64, to_u64,
};

// =============================================================================
// Plays
// =============================================================================

/// PostgreSQL implementation of PlayRepository.
pub struct PgPlayRepository {
    pool: PgPool,
}

impl PgPlayRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlayRepository for PgPlayRepository {
    async fn get_play(&self, key: &EventKey) -> StorageResult<Option<PlayRecord>> {
        let row = sqlx::query_as::<_, PlayRow>(
            r#"
            SELECT id, tx_hash, log_index, song_hash, song_id, listener,
                   gross_amount::TEXT AS gross_amount,
                   protocol_fee::TEXT AS protocol_fee,
                   net_amount::TEXT AS net_amount,
                   payment_type, block_number, block_timestamp, indexed_at
            FROM plays
            WHERE tx_hash = $1 AND log_index = $2
            "#,
        )
        .bind(&key.tx_hash.0[..])
        .bind(to_i64(key.log_index, "plays.log_index")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(PlayRow::into_record).transpose()
    }

    async fn count_plays(&self) -> StorageResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM plays")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        to_u64(count, "plays.count")
    }

    async fn song_history(
        &self,
        song_id: &SongId,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PaymentEvent>> {
        let rows = sqlx::query_as::<_, PlayRow>(
            r#"
            SELECT id, tx_hash, log_index, song_hash, song_id, listener,
                   gross_amount::TEXT AS gross_amount,
                   protocol_fee::TEXT AS protocol_fee,
                   net_amount::TEXT AS net_amount,
                   payment_type, block_number, block_timestamp, indexed_at
            FROM plays
            WHERE song_hash = $1 AND block_timestamp >= $2
            ORDER BY block_number, log_index
            "#,
        )
        .bind(&song_id.0[..])
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        rows.into_iter()
            .map(|row| row.into_record().map(|record| record.event))
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct PlayRow {
    id: i64,
    tx_hash: Vec<u8>,
    log_index: i64,
    song_hash: Vec<u8>,
    song_id: Option<i64>,
    listener: Vec<u8>,
    gross_amount: String,
    protocol_fee: String,
    net_amount: String,
    payment_type: String,
    block_number: i64,
    block_timestamp: DateTime<Utc>,
    indexed_at: DateTime<Utc>,
}

impl PlayRow {
    fn into_record(self) -> StorageResult<PlayRecord> {
        Ok(PlayRecord {
            id: self.id,
            event: PaymentEvent {
                song_id: SongId(bytes_to_hash32(self.song_hash, "plays.song_hash")?),
                listener: bytes_to_address(&self.listener, "plays.listener")?,
                gross_amount: parse_numeric(&self.gross_amount, "plays.gross_amount")?,
                protocol_fee: parse_numeric(&self.protocol_fee, "plays.protocol_fee")?,
                net_amount: parse_numeric(&self.net_amount, "plays.net_amount")?,
                payment_type: parse_payment_type(&self.payment_type)?,
                tx_hash: TxHash(bytes_to_hash32(self.tx_hash, "plays.tx_hash")?),
                log_index: to_u64(self.log_index, "plays.log_index")?,
                block_number: to_u64(self.block_number, "plays.block_number")?,
                timestamp: self.block_timestamp,
            },
            song_ref: self.song_id,
            indexed_at: self.indexed_at,
        })
    }
}

// =============================================================================
// Songs
// =============================================================================

/// PostgreSQL implementation of SongRepository.
pub struct PgSongRepository {
    pool: PgPool,
}

impl PgSongRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SongRepository for PgSongRepository {
    async fn get_song(&self, song_id: &SongId) -> StorageResult<Option<Song>> {
        let row = sqlx::query_as::<_, SongRow>(
            r#"
            SELECT id, song_hash, plays, earnings::TEXT AS earnings
            FROM songs
            WHERE song_hash = $1
            "#,
        )
        .bind(&song_id.0[..])
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(SongRow::into_song).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct SongRow {
    id: i64,
    song_hash: Vec<u8>,
    plays: i64,
    earnings: String,
}

impl SongRow {
    fn into_song(self) -> StorageResult<Song> {
        Ok(Song {
            id: self.id,
            song_hash: SongId(bytes_to_hash32(self.song_hash, "songs.song_hash")?),
            plays: to_u64(self.plays, "songs.plays")?,
            earnings: parse_numeric(&self.earnings, "songs.earnings")?,
        })
    }
}
