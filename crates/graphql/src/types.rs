//! GraphQL type definitions.

use async_graphql::{EmptySubscription, Schema};
use chrono::{DateTime, Utc};

use tempo_core::models::{PaymentType, PoisonItem, Song, Split, StrategyConfig};
use tempo_core::services::ReplayReport;
use tempo_economics::StrategyDescriptor;

use crate::schema::{AdminMutation, AdminQuery};

/// The admin GraphQL schema type.
pub type TempoSchema = Schema<AdminQuery, AdminMutation, EmptySubscription>;

/// Payment kinds as exposed over GraphQL.
#[derive(async_graphql::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentKind {
    Stream,
    Download,
    Tip,
    Patronage,
    NftAccess,
}

impl From<PaymentKind> for PaymentType {
    fn from(kind: PaymentKind) -> Self {
        match kind {
            PaymentKind::Stream => PaymentType::Stream,
            PaymentKind::Download => PaymentType::Download,
            PaymentKind::Tip => PaymentType::Tip,
            PaymentKind::Patronage => PaymentType::Patronage,
            PaymentKind::NftAccess => PaymentType::NftAccess,
        }
    }
}

/// Indexer status.
#[derive(async_graphql::SimpleObject)]
pub struct IndexerStatus {
    pub source: String,
    pub last_block: Option<u64>,
    pub last_updated: Option<DateTime<Utc>>,
    pub play_count: u64,
    pub poison_count: u64,
}

/// Quarantined event.
#[derive(async_graphql::SimpleObject)]
pub struct PoisonEntry {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    pub reason: String,
    pub attempts: u32,
    pub payload: serde_json::Value,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

impl From<PoisonItem> for PoisonEntry {
    fn from(item: PoisonItem) -> Self {
        Self {
            tx_hash: item.key.tx_hash.to_hex(),
            log_index: item.key.log_index,
            block_number: item.block_number,
            reason: item.reason,
            attempts: item.attempts,
            payload: item.payload,
            first_failed_at: item.first_failed_at,
            last_failed_at: item.last_failed_at,
        }
    }
}

/// Song aggregate. Earnings are a decimal string (uint256).
#[derive(async_graphql::SimpleObject)]
pub struct SongAggregate {
    pub song_id: String,
    pub plays: u64,
    pub earnings: String,
}

impl From<Song> for SongAggregate {
    fn from(song: Song) -> Self {
        Self {
            song_id: song.song_hash.to_hex(),
            plays: song.plays,
            earnings: song.earnings.to_string(),
        }
    }
}

/// Registered strategy.
#[derive(async_graphql::SimpleObject)]
pub struct StrategyInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub supports_free_listening: bool,
    pub supports_tips: bool,
    pub supports_subscriptions: bool,
}

impl From<&StrategyDescriptor> for StrategyInfo {
    fn from(d: &StrategyDescriptor) -> Self {
        Self {
            id: d.id.to_string(),
            name: d.name.to_string(),
            description: d.description.to_string(),
            supports_free_listening: d.supports_free_listening,
            supports_tips: d.supports_tips,
            supports_subscriptions: d.supports_subscriptions,
        }
    }
}

/// A song's stored strategy configuration.
#[derive(async_graphql::SimpleObject)]
pub struct SongStrategy {
    pub song_id: String,
    pub strategy_id: String,
    pub params: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl From<StrategyConfig> for SongStrategy {
    fn from(c: StrategyConfig) -> Self {
        Self {
            song_id: c.song_id.to_hex(),
            strategy_id: c.strategy_id,
            params: c.params,
            updated_at: c.updated_at,
        }
    }
}

#[derive(async_graphql::SimpleObject)]
pub struct SplitEntry {
    pub recipient: String,
    pub amount: String,
    pub role: String,
}

impl From<Split> for SplitEntry {
    fn from(s: Split) -> Self {
        Self {
            recipient: s.recipient.to_checksum(None),
            amount: s.amount.to_string(),
            role: s.role,
        }
    }
}

#[derive(async_graphql::SimpleObject)]
pub struct ReplayFailureEntry {
    pub tx_hash: String,
    pub log_index: u64,
    pub reason: String,
}

/// Outcome of a replay mutation.
#[derive(async_graphql::SimpleObject)]
pub struct ReplayResult {
    pub from_block: u64,
    pub to_block: u64,
    pub logs: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub cleared: u64,
    pub failures: Vec<ReplayFailureEntry>,
}

impl From<ReplayReport> for ReplayResult {
    fn from(r: ReplayReport) -> Self {
        Self {
            from_block: r.from_block,
            to_block: r.to_block,
            logs: r.logs as u64,
            inserted: r.inserted as u64,
            duplicates: r.duplicates as u64,
            cleared: r.cleared as u64,
            failures: r
                .failures
                .into_iter()
                .map(|f| ReplayFailureEntry {
                    tx_hash: f.key.tx_hash.to_hex(),
                    log_index: f.key.log_index,
                    reason: f.reason,
                })
                .collect(),
        }
    }
}
