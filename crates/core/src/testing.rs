//! In-memory adapters for tests.
//!
//! Enabled for this crate's own tests and for other crates through the
//! `test-utils` feature.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ChainError, ChainResult, StorageError, StorageResult};
use crate::models::{
    Checkpoint, EventKey, PaymentEvent, PaymentType, PlayRecord, PoisonItem, Song, SongId,
    StrategyConfig, TxHash, WriteOutcome,
};
use crate::ports::{
    CheckpointRepository, LogQuery, LogSource, PaymentObserver, PlayRepository, PoisonRepository,
    RawLog, Repositories, SongRepository, StrategyConfigRepository,
};
use crate::services::decoder::PaymentRecorded;

/// Contract address used by the log helpers.
pub const TEST_CONTRACT: Address = Address::repeat_byte(0xaa);

/// Block timestamp used by the log helpers.
pub const TEST_TIMESTAMP: u64 = 1_700_000_000;

// =============================================================================
// Fixtures
// =============================================================================

/// Encode a `PaymentRecorded` log at block 1.
///
/// The protocol fee is 1% of `gross`.
pub fn payment_log(
    song: SongId,
    listener: Address,
    gross: U256,
    payment_type: u8,
    tx: TxHash,
    log_index: u64,
) -> RawLog {
    let fee = gross / U256::from(100u64);
    let encoded = PaymentRecorded {
        songId: B256::from(song.0),
        listener,
        grossAmount: gross,
        protocolFee: fee,
        netAmount: gross - fee,
        paymentType: payment_type,
    }
    .encode_log_data();

    RawLog {
        address: TEST_CONTRACT,
        topics: encoded.topics().to_vec(),
        data: encoded.data,
        block_number: 1,
        block_timestamp: Some(TEST_TIMESTAMP),
        tx_hash: tx,
        log_index,
    }
}

/// Encode a `PaymentRecorded` log at `block`.
pub fn payment_log_at(
    song: SongId,
    gross: U256,
    payment_type: u8,
    tx: TxHash,
    log_index: u64,
    block: u64,
) -> RawLog {
    let mut log = payment_log(
        song,
        Address::repeat_byte(0x11),
        gross,
        payment_type,
        tx,
        log_index,
    );
    log.block_number = block;
    log.block_timestamp = Some(TEST_TIMESTAMP + block * 5);
    log
}

/// Build a stream payment with `net` as net amount and no fee.
pub fn sample_event(song: SongId, tx: u8, log_index: u64, net: u64) -> PaymentEvent {
    PaymentEvent {
        song_id: song,
        listener: Address::repeat_byte(0x11),
        gross_amount: U256::from(net),
        protocol_fee: U256::ZERO,
        net_amount: U256::from(net),
        payment_type: PaymentType::Stream,
        tx_hash: TxHash([tx; 32]),
        log_index,
        block_number: 1,
        timestamp: DateTime::from_timestamp(TEST_TIMESTAMP as i64, 0).unwrap_or_else(Utc::now),
    }
}

// =============================================================================
// Log Source
// =============================================================================

/// Scriptable log source.
#[derive(Default)]
pub struct InMemoryLogSource {
    head: AtomicU64,
    logs: RwLock<Vec<RawLog>>,
    failing_fetches: AtomicU32,
}

impl InMemoryLogSource {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            ..Default::default()
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn push(&self, log: RawLog) {
        self.logs.write().unwrap().push(log);
    }

    /// Make the next `n` log fetches fail.
    pub fn fail_next_logs(&self, n: u32) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl LogSource for InMemoryLogSource {
    async fn head(&self) -> ChainResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn logs(&self, query: &LogQuery) -> ChainResult<Vec<RawLog>> {
        if self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ChainError::RpcError("injected fetch failure".into()));
        }
        if query.from_block > query.to_block {
            return Ok(Vec::new());
        }

        let mut logs: Vec<RawLog> = self
            .logs
            .read()
            .unwrap()
            .iter()
            .filter(|log| {
                log.address == query.address
                    && log.topics.first() == Some(&query.topic0)
                    && (query.from_block..=query.to_block).contains(&log.block_number)
            })
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }
}

// =============================================================================
// Repositories
// =============================================================================

#[derive(Default)]
struct State {
    songs: BTreeMap<SongId, Song>,
    plays: BTreeMap<EventKey, PlayRecord>,
    checkpoints: HashMap<String, Checkpoint>,
    poison: BTreeMap<EventKey, PoisonItem>,
    strategies: BTreeMap<SongId, StrategyConfig>,
    failing_writes: HashMap<EventKey, u32>,
    lost_acks: HashSet<EventKey>,
    write_calls: HashMap<EventKey, u32>,
    fail_checkpoints: bool,
    fail_poison: bool,
    next_id: i64,
}

/// In-memory implementation of every repository port.
#[derive(Default)]
pub struct InMemoryRepositories {
    state: Mutex<State>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a catalog song so payments resolve to it.
    pub fn register_song(&self, song_hash: SongId) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.songs.insert(
            song_hash,
            Song {
                id,
                song_hash,
                plays: 0,
                earnings: U256::ZERO,
            },
        );
        id
    }

    /// Make the next `n` writes of `key` fail.
    pub fn fail_writes_for(&self, key: EventKey, n: u32) {
        self.state.lock().unwrap().failing_writes.insert(key, n);
    }

    /// Commit the next write of `key`, then report a failure.
    pub fn fail_after_commit_for(&self, key: EventKey) {
        self.state.lock().unwrap().lost_acks.insert(key);
    }

    pub fn fail_checkpoint_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_checkpoints = fail;
    }

    pub fn fail_poison_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_poison = fail;
    }

    /// Number of `record_payment_atomic` calls for `key`.
    pub fn write_attempts(&self, key: &EventKey) -> u32 {
        self.state
            .lock()
            .unwrap()
            .write_calls
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_checkpoint_block(&self, source: &str, block: u64) {
        self.state.lock().unwrap().checkpoints.insert(
            source.to_string(),
            Checkpoint {
                source: source.to_string(),
                last_block: block,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn checkpoint(&self, source: &str) -> Option<u64> {
        self.state
            .lock()
            .unwrap()
            .checkpoints
            .get(source)
            .map(|cp| cp.last_block)
    }

    pub fn insert_poison(&self, item: PoisonItem) {
        self.state.lock().unwrap().poison.insert(item.key, item);
    }

    pub fn poison_items(&self) -> Vec<PoisonItem> {
        self.state.lock().unwrap().poison.values().cloned().collect()
    }

    pub fn play_count(&self) -> usize {
        self.state.lock().unwrap().plays.len()
    }

    pub fn play_records(&self) -> Vec<PlayRecord> {
        self.state.lock().unwrap().plays.values().cloned().collect()
    }

    pub fn song(&self, song_hash: &SongId) -> Option<Song> {
        self.state.lock().unwrap().songs.get(song_hash).cloned()
    }
}

#[async_trait]
impl PlayRepository for InMemoryRepositories {
    async fn get_play(&self, key: &EventKey) -> StorageResult<Option<PlayRecord>> {
        Ok(self.state.lock().unwrap().plays.get(key).cloned())
    }

    async fn count_plays(&self) -> StorageResult<u64> {
        Ok(self.state.lock().unwrap().plays.len() as u64)
    }

    async fn song_history(
        &self,
        song_id: &SongId,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PaymentEvent>> {
        let mut events: Vec<PaymentEvent> = self
            .state
            .lock()
            .unwrap()
            .plays
            .values()
            .map(|play| &play.event)
            .filter(|event| event.song_id == *song_id && event.timestamp >= since)
            .cloned()
            .collect();
        events.sort_by_key(|event| (event.block_number, event.log_index));
        Ok(events)
    }
}

#[async_trait]
impl SongRepository for InMemoryRepositories {
    async fn get_song(&self, song_id: &SongId) -> StorageResult<Option<Song>> {
        Ok(self.song(song_id))
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryRepositories {
    async fn get_checkpoint(&self, source: &str) -> StorageResult<Option<Checkpoint>> {
        Ok(self.state.lock().unwrap().checkpoints.get(source).cloned())
    }

    async fn set_checkpoint(&self, checkpoint: &Checkpoint) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_checkpoints {
            return Err(StorageError::QueryError("injected checkpoint failure".into()));
        }
        let entry = state
            .checkpoints
            .entry(checkpoint.source.clone())
            .or_insert_with(|| checkpoint.clone());
        entry.last_block = entry.last_block.max(checkpoint.last_block);
        entry.updated_at = checkpoint.updated_at;
        Ok(())
    }
}

#[async_trait]
impl PoisonRepository for InMemoryRepositories {
    async fn upsert_poison(&self, item: &PoisonItem) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_poison {
            return Err(StorageError::QueryError("injected poison failure".into()));
        }
        let first_failed_at = state
            .poison
            .get(&item.key)
            .map_or(item.first_failed_at, |existing| existing.first_failed_at);
        state.poison.insert(
            item.key,
            PoisonItem {
                first_failed_at,
                ..item.clone()
            },
        );
        Ok(())
    }

    async fn get_poison(&self, key: &EventKey) -> StorageResult<Option<PoisonItem>> {
        Ok(self.state.lock().unwrap().poison.get(key).cloned())
    }

    async fn list_poison(&self, limit: u32, offset: u32) -> StorageResult<Vec<PoisonItem>> {
        let mut items = self.poison_items();
        items.sort_by(|a, b| b.last_failed_at.cmp(&a.last_failed_at));
        Ok(items
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn delete_poison(&self, key: &EventKey) -> StorageResult<bool> {
        Ok(self.state.lock().unwrap().poison.remove(key).is_some())
    }

    async fn count_poison(&self) -> StorageResult<u64> {
        Ok(self.state.lock().unwrap().poison.len() as u64)
    }
}

#[async_trait]
impl StrategyConfigRepository for InMemoryRepositories {
    async fn get_strategy(&self, song_id: &SongId) -> StorageResult<Option<StrategyConfig>> {
        Ok(self.state.lock().unwrap().strategies.get(song_id).cloned())
    }

    async fn list_strategies(&self) -> StorageResult<Vec<StrategyConfig>> {
        Ok(self.state.lock().unwrap().strategies.values().cloned().collect())
    }

    async fn upsert_strategy(&self, config: &StrategyConfig) -> StorageResult<()> {
        self.state
            .lock()
            .unwrap()
            .strategies
            .insert(config.song_id, config.clone());
        Ok(())
    }
}

#[async_trait]
impl Repositories for InMemoryRepositories {
    fn plays(&self) -> &dyn PlayRepository {
        self
    }

    fn songs(&self) -> &dyn SongRepository {
        self
    }

    fn checkpoints(&self) -> &dyn CheckpointRepository {
        self
    }

    fn poison(&self) -> &dyn PoisonRepository {
        self
    }

    fn strategies(&self) -> &dyn StrategyConfigRepository {
        self
    }

    async fn record_payment_atomic(&self, event: &PaymentEvent) -> StorageResult<WriteOutcome> {
        let mut state = self.state.lock().unwrap();
        let key = event.key();

        let calls = state.write_calls.entry(key).or_insert(0);
        *calls += 1;
        let call = *calls;

        if let Some(remaining) = state.failing_writes.get_mut(&key)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(StorageError::QueryError(format!(
                "injected write failure #{call}"
            )));
        }

        if state.plays.contains_key(&key) {
            return Ok(WriteOutcome::Duplicate);
        }

        let song_ref = state.songs.get_mut(&event.song_id).map(|song| {
            song.plays += 1;
            song.earnings += event.net_amount;
            song.id
        });

        state.next_id += 1;
        let id = state.next_id;
        state.plays.insert(
            key,
            PlayRecord {
                id,
                event: event.clone(),
                song_ref,
                indexed_at: Utc::now(),
            },
        );

        if state.lost_acks.remove(&key) {
            return Err(StorageError::Timeout(format!(
                "injected lost acknowledgement #{call}"
            )));
        }

        Ok(WriteOutcome::Inserted {
            song_resolved: song_ref.is_some(),
        })
    }
}

// =============================================================================
// Observer
// =============================================================================

/// Observer that records the keys it was notified with.
#[derive(Default, Clone)]
pub struct RecordingObserver {
    seen: Arc<Mutex<Vec<EventKey>>>,
}

impl RecordingObserver {
    pub fn seen(&self) -> Vec<EventKey> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentObserver for RecordingObserver {
    async fn observe(&self, event: &PaymentEvent) {
        self.seen.lock().unwrap().push(event.key());
    }
}
