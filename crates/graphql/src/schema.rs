//! GraphQL schema definition.
//!
//! Operator-facing queries over the ledger, poison quarantine and strategy
//! router, plus replay and strategy-configuration mutations.

use std::sync::Arc;

use async_graphql::{Context, EmptySubscription, Object, Result, Schema};
use chrono::Utc;

use tempo_core::models::{EventKey, SongId, StrategyConfig, TxHash};
use tempo_core::ports::Repositories;
use tempo_core::services::ReplayService;
use tempo_economics::RouterHandle;
use tempo_economics::amount::parse_amount;

use crate::types::{
    IndexerStatus, PaymentKind, PoisonEntry, ReplayResult, SongAggregate, SongStrategy,
    SplitEntry, StrategyInfo, TempoSchema,
};

// -----------------------------------------------------------------------------
// Schema Configuration
// -----------------------------------------------------------------------------

/// Maximum query depth to prevent deeply nested queries (DoS protection).
/// Note: GraphQL introspection requires depth ~13, so we use 15 to allow it.
pub const MAX_QUERY_DEPTH: usize = 15;

/// Maximum query complexity score (DoS protection).
pub const MAX_QUERY_COMPLEXITY: usize = 500;

/// Largest block range a single `replayRange` may cover.
pub const MAX_REPLAY_RANGE: u64 = 100_000;

/// Checkpoint source reported by `status`.
#[derive(Debug, Clone)]
pub struct SourceName(pub String);

// -----------------------------------------------------------------------------
// Schema Builder
// -----------------------------------------------------------------------------

/// Build the admin schema with depth and complexity limits.
pub fn build_schema<R: Repositories + 'static>(
    repositories: Arc<R>,
    replay: Arc<ReplayService>,
    router: RouterHandle,
    source_name: impl Into<String>,
) -> TempoSchema {
    let repos: Arc<dyn Repositories> = repositories;
    Schema::build(AdminQuery, AdminMutation, EmptySubscription)
        .data(repos)
        .data(replay)
        .data(router)
        .data(SourceName(source_name.into()))
        .limit_depth(MAX_QUERY_DEPTH)
        .limit_complexity(MAX_QUERY_COMPLEXITY)
        .finish()
}

// -----------------------------------------------------------------------------
// Query Root
// -----------------------------------------------------------------------------

#[derive(Default)]
pub struct AdminQuery;

#[Object]
impl AdminQuery {
    /// Checkpoint and ledger counters.
    async fn status<'ctx>(&self, ctx: &Context<'ctx>) -> Result<IndexerStatus> {
        let repos = ctx.data::<Arc<dyn Repositories>>()?;
        let SourceName(source) = ctx.data::<SourceName>()?;

        let checkpoint = repos.checkpoints().get_checkpoint(source).await?;
        let play_count = repos.plays().count_plays().await?;
        let poison_count = repos.poison().count_poison().await?;

        Ok(IndexerStatus {
            source: source.clone(),
            last_block: checkpoint.as_ref().map(|c| c.last_block),
            last_updated: checkpoint.map(|c| c.updated_at),
            play_count,
            poison_count,
        })
    }

    /// Poisoned events, most recently failed first.
    async fn poison_items<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        #[graphql(default = 20)] limit: i32,
        #[graphql(default = 0)] offset: i32,
    ) -> Result<Vec<PoisonEntry>> {
        let repos = ctx.data::<Arc<dyn Repositories>>()?;

        let items = repos
            .poison()
            .list_poison(validate_limit(limit), offset.max(0) as u32)
            .await?;

        Ok(items.into_iter().map(PoisonEntry::from).collect())
    }

    async fn poison_item<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        tx_hash: String,
        log_index: i64,
    ) -> Result<Option<PoisonEntry>> {
        let repos = ctx.data::<Arc<dyn Repositories>>()?;

        let key = parse_event_key(&tx_hash, log_index)?;
        let item = repos.poison().get_poison(&key).await?;
        Ok(item.map(PoisonEntry::from))
    }

    /// Song aggregate by on-chain song hash.
    async fn song<'ctx>(&self, ctx: &Context<'ctx>, song_id: String) -> Result<Option<SongAggregate>> {
        let repos = ctx.data::<Arc<dyn Repositories>>()?;

        let song = repos.songs().get_song(&parse_song_id(&song_id)?).await?;
        Ok(song.map(SongAggregate::from))
    }

    /// Registered strategies.
    async fn strategies<'ctx>(&self, ctx: &Context<'ctx>) -> Result<Vec<StrategyInfo>> {
        let router = ctx.data::<RouterHandle>()?.inner().read().await;
        Ok(router.registry().descriptors().map(StrategyInfo::from).collect())
    }

    async fn song_strategy<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        song_id: String,
    ) -> Result<Option<SongStrategy>> {
        let repos = ctx.data::<Arc<dyn Repositories>>()?;

        let config = repos
            .strategies()
            .get_strategy(&parse_song_id(&song_id)?)
            .await?;
        Ok(config.map(SongStrategy::from))
    }

    /// Splits of a net amount under the song's current strategy.
    async fn preview_splits<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        song_id: String,
        amount: String,
    ) -> Result<Vec<SplitEntry>> {
        let song = parse_song_id(&song_id)?;
        let amount = parse_amount(&amount).map_err(async_graphql::Error::new)?;
        let router = ctx.data::<RouterHandle>()?.inner().read().await;

        let splits = router.preview_splits(&song, amount)?;
        Ok(splits.into_iter().map(SplitEntry::from).collect())
    }

    /// Current minimum payment, as a decimal string.
    async fn min_payment<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        song_id: String,
        payment_type: PaymentKind,
    ) -> Result<String> {
        let song = parse_song_id(&song_id)?;
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        let router = ctx.data::<RouterHandle>()?.inner().read().await;

        Ok(router.min_payment(&song, payment_type.into(), now)?.to_string())
    }
}

// -----------------------------------------------------------------------------
// Mutation Root
// -----------------------------------------------------------------------------

#[derive(Default)]
pub struct AdminMutation;

#[Object]
impl AdminMutation {
    /// Replay one poisoned event through decode and write.
    async fn replay_event<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        tx_hash: String,
        log_index: i64,
    ) -> Result<ReplayResult> {
        let replay = ctx.data::<Arc<ReplayService>>()?;

        let key = parse_event_key(&tx_hash, log_index)?;
        Ok(replay.replay_event(&key).await?.into())
    }

    /// Replay every payment log in `[fromBlock, toBlock]`. The checkpoint is not moved.
    async fn replay_range<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        from_block: i64,
        to_block: i64,
    ) -> Result<ReplayResult> {
        let replay = ctx.data::<Arc<ReplayService>>()?;

        let (from, to) = validate_range(from_block, to_block)?;
        Ok(replay.replay_range(from, to).await?.into())
    }

    /// Validate, persist and apply a song's strategy.
    async fn set_song_strategy<'ctx>(
        &self,
        ctx: &Context<'ctx>,
        song_id: String,
        strategy_id: String,
        params: serde_json::Value,
    ) -> Result<SongStrategy> {
        let repos = ctx.data::<Arc<dyn Repositories>>()?;
        let router = ctx.data::<RouterHandle>()?;

        let config = StrategyConfig {
            song_id: parse_song_id(&song_id)?,
            strategy_id,
            params,
            updated_at: Utc::now(),
        };
        router.set_strategy(repos.as_ref(), config.clone()).await?;

        Ok(config.into())
    }

    /// Rebuild every song's strategy state from stored configuration and the
    /// ledger. Picks up payments recorded by another process. Returns the
    /// number of songs loaded.
    async fn reload_strategies<'ctx>(&self, ctx: &Context<'ctx>) -> Result<i32> {
        let repos = ctx.data::<Arc<dyn Repositories>>()?;
        let router = ctx.data::<RouterHandle>()?;

        let loaded = router.load_from(repos.as_ref()).await?;
        Ok(i32::try_from(loaded).unwrap_or(i32::MAX))
    }
}

// -----------------------------------------------------------------------------
// Helpers & Validation
// -----------------------------------------------------------------------------

/// Maximum length for hash strings (64 hex chars + "0x" prefix).
const MAX_HASH_LENGTH: usize = 66;
/// Maximum page size for listings.
const MAX_PAGE_SIZE: i32 = 100;

/// Parse and validate a hash string.
fn parse_hash(s: &str) -> Result<[u8; 32]> {
    if s.len() > MAX_HASH_LENGTH {
        return Err(async_graphql::Error::new(format!(
            "Hash too long: maximum {} characters allowed",
            MAX_HASH_LENGTH
        )));
    }

    let s = s.strip_prefix("0x").unwrap_or(s);

    if !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(async_graphql::Error::new(
            "Invalid hash: must contain only hexadecimal characters",
        ));
    }

    let bytes =
        hex::decode(s).map_err(|e| async_graphql::Error::new(format!("Invalid hash: {}", e)))?;

    bytes
        .try_into()
        .map_err(|_| async_graphql::Error::new("Hash must be exactly 32 bytes (64 hex characters)"))
}

fn parse_song_id(s: &str) -> Result<SongId> {
    Ok(SongId(parse_hash(s)?))
}

fn parse_event_key(tx_hash: &str, log_index: i64) -> Result<EventKey> {
    let log_index = u64::try_from(log_index)
        .map_err(|_| async_graphql::Error::new("logIndex must be non-negative"))?;
    Ok(EventKey::new(TxHash(parse_hash(tx_hash)?), log_index))
}

fn validate_range(from_block: i64, to_block: i64) -> Result<(u64, u64)> {
    let (Ok(from), Ok(to)) = (u64::try_from(from_block), u64::try_from(to_block)) else {
        return Err(async_graphql::Error::new("Block numbers must be non-negative"));
    };
    if from > to {
        return Err(async_graphql::Error::new(format!(
            "Invalid range: fromBlock {from} > toBlock {to}"
        )));
    }
    if to - from >= MAX_REPLAY_RANGE {
        return Err(async_graphql::Error::new(format!(
            "Range too large: maximum {} blocks per replay",
            MAX_REPLAY_RANGE
        )));
    }
    Ok((from, to))
}

/// Clamp a listing limit to `1..=MAX_PAGE_SIZE`.
fn validate_limit(limit: i32) -> u32 {
    limit.clamp(1, MAX_PAGE_SIZE) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use alloy_primitives::U256;
    use tempo_core::models::PoisonItem;
    use tempo_core::ports::StrategyConfigRepository;
    use tempo_core::services::LedgerWriter;
    use chrono::DateTime;
    use tempo_core::testing::{
        InMemoryLogSource, InMemoryRepositories, TEST_CONTRACT, payment_log_at, sample_event,
    };
    use tempo_economics::{StrategyRegistry, StrategyRouter};

    const SONG: SongId = SongId([0x5a; 32]);

    struct Harness {
        schema: TempoSchema,
        source: Arc<InMemoryLogSource>,
        repos: Arc<InMemoryRepositories>,
    }

    fn harness() -> Harness {
        let source = Arc::new(InMemoryLogSource::new(100));
        let repos = Arc::new(InMemoryRepositories::new());
        let writer = LedgerWriter::new(repos.clone(), Duration::from_secs(1));
        let replay = Arc::new(ReplayService::new(
            source.clone(),
            repos.clone(),
            writer,
            TEST_CONTRACT,
            100,
            Duration::from_secs(1),
        ));
        let router = RouterHandle::new(
            StrategyRouter::new(
                StrategyRegistry::with_defaults(),
                100,
                alloy_primitives::Address::repeat_byte(0xee),
            )
            .unwrap(),
        );
        Harness {
            schema: build_schema(repos.clone(), replay, router, "payment-router"),
            source,
            repos,
        }
    }

    // Tests de validation critiques - protègent contre les injections/DoS

    #[test]
    fn test_parse_hash_rejects_invalid_input() {
        assert!(parse_hash(&"ab".repeat(100)).is_err());
        assert!(parse_hash("0x<script>alert(1)</script>").is_err());
        assert!(parse_hash(&"ab".repeat(16)).is_err());
        assert!(parse_hash(&"ab".repeat(32)).is_ok());
    }

    #[test]
    fn test_range_and_limit_validation() {
        assert!(validate_range(10, 5).is_err());
        assert!(validate_range(-1, 5).is_err());
        assert!(validate_range(0, MAX_REPLAY_RANGE as i64).is_err());
        assert_eq!(validate_range(5, 5).unwrap(), (5, 5));
        assert_eq!(validate_limit(-3), 1);
        assert_eq!(validate_limit(10_000), MAX_PAGE_SIZE as u32);
        assert!(parse_event_key(&"ab".repeat(32), -1).is_err());
    }

    #[tokio::test]
    async fn test_set_strategy_then_preview_splits() {
        let h = harness();
        let mutation = format!(
            r#"mutation {{
                setSongStrategy(
                    songId: "{song}",
                    strategyId: "pay-per-stream-v1",
                    params: {{
                        price_per_stream: 1000,
                        royalties: [
                            {{ recipient: "0x1111111111111111111111111111111111111111", bps: 6000, role: "artist" }},
                            {{ recipient: "0x2222222222222222222222222222222222222222", bps: 3000, role: "producer" }},
                            {{ recipient: "0x3333333333333333333333333333333333333333", bps: 1000, role: "platform" }}
                        ]
                    }}
                ) {{ strategyId }}
            }}"#,
            song = SONG.to_hex()
        );
        let response = h.schema.execute(mutation).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);

        let query = format!(
            r#"{{ previewSplits(songId: "{song}", amount: "100") {{ amount role }}
                 minPayment(songId: "{song}", paymentType: STREAM) }}"#,
            song = SONG.to_hex()
        );
        let response = h.schema.execute(query).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        let data = response.data.into_json().unwrap();
        let amounts: Vec<&str> = data["previewSplits"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["amount"].as_str().unwrap())
            .collect();
        assert_eq!(amounts, vec!["60", "30", "10"]);
        assert_eq!(data["minPayment"], "1000");
        assert_eq!(h.repos.list_strategies().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reload_strategies_picks_up_recorded_plays() {
        let h = harness();
        h.repos
            .upsert_strategy(&StrategyConfig {
                song_id: SONG,
                strategy_id: "dynamic-pricing-v1".to_string(),
                params: serde_json::json!({
                    "base_price": 10,
                    "step_price": 5,
                    "plays_per_step": 10,
                    "max_price": 100,
                    "refresh_interval_secs": 0,
                    "royalties": [
                        { "recipient": "0x1111111111111111111111111111111111111111", "bps": 10000 }
                    ]
                }),
                updated_at: DateTime::from_timestamp(0, 0).unwrap(),
            })
            .await
            .unwrap();
        // Written without going through this process's router
        for n in 1..=10u8 {
            let mut event = sample_event(SONG, n, 0, 10);
            event.block_number = u64::from(n);
            h.repos.record_payment_atomic(&event).await.unwrap();
        }

        let response = h.schema.execute("mutation { reloadStrategies }").await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(response.data.into_json().unwrap()["reloadStrategies"], 1);

        let query = format!(r#"{{ minPayment(songId: "{}", paymentType: STREAM) }}"#, SONG.to_hex());
        let data = h.schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(data["minPayment"], "15");
    }

    #[tokio::test]
    async fn test_invalid_strategy_is_rejected_and_not_stored() {
        let h = harness();
        let mutation = format!(
            r#"mutation {{ setSongStrategy(songId: "{}", strategyId: "pay-per-stream-v1",
                params: {{ price_per_stream: 1, royalties: [] }}) {{ strategyId }} }}"#,
            SONG.to_hex()
        );
        let response = h.schema.execute(mutation).await;
        assert_eq!(response.errors.len(), 1);
        assert!(h.repos.list_strategies().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replay_event_mutation_clears_poison() {
        let h = harness();
        h.repos.register_song(SONG);
        let log = payment_log_at(SONG, U256::from(1_000u64), 0, TxHash([7; 32]), 2, 9);
        h.source.push(log.clone());
        h.repos.insert_poison(PoisonItem {
            key: log.key(),
            block_number: 9,
            reason: "db down".into(),
            attempts: 4,
            payload: serde_json::Value::Null,
            first_failed_at: Utc::now(),
            last_failed_at: Utc::now(),
        });

        let listing = h.schema.execute("{ poisonItems { txHash logIndex attempts } status { poisonCount } }").await;
        let data = listing.data.into_json().unwrap();
        assert_eq!(data["poisonItems"][0]["attempts"], 4);
        assert_eq!(data["status"]["poisonCount"], 1);

        let mutation = format!(
            r#"mutation {{ replayEvent(txHash: "{}", logIndex: 2) {{ inserted cleared }} }}"#,
            log.tx_hash.to_hex()
        );
        let response = h.schema.execute(mutation).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        let data = response.data.into_json().unwrap();
        assert_eq!(data["replayEvent"]["inserted"], 1);
        assert_eq!(data["replayEvent"]["cleared"], 1);
        assert!(h.repos.poison_items().is_empty());

        let song = h
            .schema
            .execute(format!(r#"{{ song(songId: "{}") {{ plays earnings }} }}"#, SONG.to_hex()))
            .await
            .data
            .into_json()
            .unwrap();
        assert_eq!(song["song"]["plays"], 1);
        assert_eq!(song["song"]["earnings"], "990");
    }
}
