//! Core indexer service - orchestrates range processing.
//!
//! The loop is sequential across block ranges. Within one range, event
//! writes fan out with bounded concurrency; the checkpoint is only written
//! once every event in the range has reached a terminal outcome.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use chrono::Utc;
use futures::{StreamExt, stream};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ChainError, DecodeError, IndexerError, IndexerResult, StorageError};
use crate::metrics::{
    CycleTimer, record_checkpoint_persist_failure, record_cycle_failure, record_decode_error,
    record_event_poisoned, set_checkpoint_block, set_indexer_lag, set_retry_queue_depth,
};
use crate::models::{Checkpoint, PaymentEvent, PoisonItem, WriteOutcome};
use crate::ports::{LogQuery, LogSource, PaymentObserver, RawLog, Repositories};
use crate::services::decoder::{decode_payment, payment_topic};
use crate::services::ledger::LedgerWriter;
use crate::services::retry::{RetryDecision, RetryPipeline};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the indexer service.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Checkpoint key.
    pub source_name: String,
    /// Payment router contract.
    pub contract_address: Address,
    /// Maximum blocks past `from` fetched per cycle.
    pub chunk_size: u64,
    /// First block to scan when no checkpoint exists.
    pub start_block: Option<u64>,
    /// Blocks behind head considered final.
    pub confirmations: u64,
    /// Failed retries tolerated before an event is poisoned.
    pub retry_limit: u32,
    /// Sleep when caught up with the confirmed head.
    pub poll_interval: Duration,
    /// Sleep after a failed cycle.
    pub retry_delay: Duration,
    /// Deadline for each RPC call.
    pub rpc_timeout: Duration,
    /// Deadline for each database call.
    pub db_timeout: Duration,
    /// Concurrent event writes per cycle.
    pub event_concurrency: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            source_name: "payment-router".to_string(),
            contract_address: Address::ZERO,
            chunk_size: 1000,
            start_block: None,
            confirmations: 3,
            retry_limit: 3,
            poll_interval: Duration::from_secs(12),
            retry_delay: Duration::from_secs(5),
            rpc_timeout: Duration::from_secs(30),
            db_timeout: Duration::from_secs(10),
            event_concurrency: 8,
        }
    }
}

impl IndexerConfig {
    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> IndexerResult<()> {
        if self.source_name.is_empty() {
            return Err(IndexerError::ConfigError("source name is empty".into()));
        }
        if self.contract_address == Address::ZERO {
            return Err(IndexerError::ConfigError("contract address is zero".into()));
        }
        if self.chunk_size == 0 {
            return Err(IndexerError::ConfigError("chunk size must be > 0".into()));
        }
        if self.retry_limit == 0 {
            return Err(IndexerError::ConfigError("retry limit must be > 0".into()));
        }
        if self.event_concurrency == 0 {
            return Err(IndexerError::ConfigError(
                "event concurrency must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one retry pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPassReport {
    pub attempted: usize,
    pub resolved: usize,
    pub requeued: usize,
    pub poisoned: usize,
}

/// Summary of one processed range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub from: u64,
    pub to: u64,
    /// Confirmed head observed at the start of the cycle.
    pub head: u64,
    pub logs: usize,
    pub decoded: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub decode_failures: usize,
    /// Events that failed their first write this cycle.
    pub queued: usize,
    pub retry: RetryPassReport,
    pub checkpoint_persisted: bool,
}

/// Result of [`IndexerService::run_cycle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing confirmed past `from` yet.
    Idle { head: u64 },
    /// A range was processed.
    Advanced(CycleReport),
}

// =============================================================================
// IndexerService
// =============================================================================

/// Main indexer service for the payment router.
///
/// # Flow
///
/// 1. Resolve `from` (checkpoint + 1, start override, or confirmed head)
/// 2. Fetch logs for `[from, min(head, from + chunk_size)]`
/// 3. Decode; quarantine undecodable logs
/// 4. Write events, queueing failures for retry
/// 5. Run one retry pass over the whole queue
/// 6. Persist the checkpoint
pub struct IndexerService<S: LogSource, R: Repositories + 'static> {
    config: IndexerConfig,
    log_source: Arc<S>,
    repositories: Arc<R>,
    writer: LedgerWriter,
    retry: RetryPipeline,
    next_from: Option<u64>,
}

impl<S: LogSource, R: Repositories + 'static> IndexerService<S, R> {
    pub fn new(config: IndexerConfig, log_source: Arc<S>, repositories: Arc<R>) -> Self {
        let writer = LedgerWriter::new(repositories.clone(), config.db_timeout);
        let retry = RetryPipeline::new(config.retry_limit);
        Self {
            config,
            log_source,
            repositories,
            writer,
            retry,
            next_from: None,
        }
    }

    /// Forward newly recorded payments to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn PaymentObserver>) -> Self {
        self.writer = self.writer.with_observer(observer);
        self
    }

    /// Current retry queue.
    pub fn retry_pipeline(&self) -> &RetryPipeline {
        &self.retry
    }

    /// Start the indexer loop. Returns `ShutdownRequested` once signalled.
    #[instrument(skip_all, fields(source = %self.config.source_name))]
    pub async fn run(&mut self, mut shutdown_rx: watch::Receiver<bool>) -> IndexerResult<()> {
        info!(
            contract = %self.config.contract_address,
            chunk = self.config.chunk_size,
            confirmations = self.config.confirmations,
            "⛓️  Starting payment indexer"
        );

        loop {
            if *shutdown_rx.borrow() {
                debug!("Shutdown requested");
                return Err(IndexerError::ShutdownRequested);
            }

            let pause = match self.run_cycle().await {
                Ok(CycleOutcome::Advanced(report)) => {
                    info!(
                        from = report.from,
                        to = report.to,
                        inserted = report.inserted,
                        duplicates = report.duplicates,
                        queued = report.queued,
                        poisoned = report.retry.poisoned,
                        "⛓️  Range indexed"
                    );
                    None
                }
                Ok(CycleOutcome::Idle { head }) => {
                    debug!(head, "Caught up with confirmed head");
                    Some(self.config.poll_interval)
                }
                Err(e) => {
                    error!(error = %e, "❌ Indexer cycle failed");
                    record_cycle_failure();
                    Some(self.config.retry_delay)
                }
            };

            if let Some(delay) = pause {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            return Err(IndexerError::ShutdownRequested);
                        }
                    }
                }
            }
        }
    }

    /// Run one cycle. On error the next cycle retries the same `from`.
    #[instrument(skip_all)]
    pub async fn run_cycle(&mut self) -> IndexerResult<CycleOutcome> {
        let _timer = CycleTimer::new();

        let head = self.confirmed_head().await?;
        let from = match self.next_from {
            Some(from) => from,
            None => {
                let from = self.resolve_start(head).await?;
                self.next_from = Some(from);
                from
            }
        };

        if from > head {
            set_indexer_lag(0);
            return Ok(CycleOutcome::Idle { head });
        }

        let to = head.min(from.saturating_add(self.config.chunk_size));
        let mut report = CycleReport {
            from,
            to,
            head,
            ..Default::default()
        };

        let logs = self.fetch_logs(from, to).await?;
        report.logs = logs.len();

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match decode_payment(log) {
                Ok(event) => events.push(event),
                Err(err) => {
                    report.decode_failures += 1;
                    self.quarantine_undecodable(log, &err).await?;
                }
            }
        }
        report.decoded = events.len();

        for (event, result) in self.write_all(events).await {
            match result {
                Ok(WriteOutcome::Inserted { .. }) => report.inserted += 1,
                Ok(WriteOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    debug!(key = %event.key(), error = %e, "Write failed, queueing for retry");
                    report.queued += 1;
                    let decision = self.retry.enqueue(&event, e.to_string(), Utc::now());
                    self.apply_decision(decision).await;
                }
            }
        }

        report.retry = self.retry_pass().await;

        report.checkpoint_persisted = self.persist_checkpoint(to).await;
        set_indexer_lag(head - to);
        set_retry_queue_depth(self.retry.depth());
        self.next_from = Some(to + 1);

        Ok(CycleOutcome::Advanced(report))
    }

    /// Re-attempt every queued event once.
    #[instrument(skip_all, fields(depth = self.retry.depth()))]
    pub async fn retry_pass(&mut self) -> RetryPassReport {
        let mut report = RetryPassReport::default();

        for event in self.retry.snapshot() {
            report.attempted += 1;
            match self.writer.process_event(&event).await {
                Ok(_) => {
                    self.retry.resolve(&event.key());
                    report.resolved += 1;
                }
                Err(e) => {
                    let decision = self.retry.record_failure(&event, e.to_string(), Utc::now());
                    if self.apply_decision(decision).await {
                        report.poisoned += 1;
                    } else {
                        report.requeued += 1;
                    }
                }
            }
        }

        if report.attempted > 0 {
            debug!(
                resolved = report.resolved,
                requeued = report.requeued,
                poisoned = report.poisoned,
                "🔄 Retry pass complete"
            );
        }
        set_retry_queue_depth(self.retry.depth());
        report
    }

    /// Write events with bounded fan-out, keeping each event with its result.
    async fn write_all(
        &self,
        events: Vec<PaymentEvent>,
    ) -> Vec<(PaymentEvent, IndexerResult<WriteOutcome>)> {
        stream::iter(events)
            .map(|event| {
                let writer = self.writer.clone();
                async move {
                    let result = writer.process_event(&event).await;
                    (event, result)
                }
            })
            .buffer_unordered(self.config.event_concurrency)
            .collect()
            .await
    }

    /// Persist a poison decision. Returns whether the item left the queue.
    async fn apply_decision(&mut self, decision: RetryDecision) -> bool {
        let RetryDecision::Poison(item) = decision else {
            return false;
        };

        match self.db(self.repositories.poison().upsert_poison(&item)).await {
            Ok(()) => {
                warn!(
                    key = %item.key,
                    attempts = item.attempts,
                    reason = %item.reason,
                    "☠️  Event poisoned"
                );
                record_event_poisoned();
                self.retry.remove(&item.key);
                true
            }
            Err(e) => {
                error!(key = %item.key, error = %e, "❌ Failed to persist poison item, keeping it queued");
                false
            }
        }
    }

    /// Store an undecodable log in poison storage with its raw payload.
    async fn quarantine_undecodable(&self, log: &RawLog, err: &DecodeError) -> IndexerResult<()> {
        warn!(key = %log.key(), block = log.block_number, error = %err, "⚠️  Undecodable payment log");
        record_decode_error(err.kind());

        let now = Utc::now();
        let item = PoisonItem {
            key: log.key(),
            block_number: log.block_number,
            reason: format!("decode: {err}"),
            attempts: 0,
            payload: serde_json::to_value(log)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?,
            first_failed_at: now,
            last_failed_at: now,
        };
        self.db(self.repositories.poison().upsert_poison(&item))
            .await?;
        record_event_poisoned();
        Ok(())
    }

    async fn persist_checkpoint(&self, block: u64) -> bool {
        let checkpoint = Checkpoint {
            source: self.config.source_name.clone(),
            last_block: block,
            updated_at: Utc::now(),
        };
        match self
            .db(self.repositories.checkpoints().set_checkpoint(&checkpoint))
            .await
        {
            Ok(()) => {
                set_checkpoint_block(block);
                true
            }
            Err(e) => {
                warn!(block, error = %e, "⚠️  Failed to persist checkpoint");
                record_checkpoint_persist_failure();
                false
            }
        }
    }

    async fn resolve_start(&self, confirmed_head: u64) -> IndexerResult<u64> {
        let checkpoint = self
            .db(
                self.repositories
                    .checkpoints()
                    .get_checkpoint(&self.config.source_name),
            )
            .await?;

        let from = match (checkpoint, self.config.start_block) {
            (Some(cp), _) => {
                info!(block = cp.last_block, "📍 Resuming from checkpoint");
                cp.last_block + 1
            }
            (None, Some(start)) => {
                info!(block = start, "📍 Starting from configured block");
                start
            }
            (None, None) => {
                info!(block = confirmed_head, "📍 No checkpoint, starting at chain head");
                confirmed_head
            }
        };
        Ok(from)
    }

    async fn confirmed_head(&self) -> IndexerResult<u64> {
        let head = self
            .rpc(self.log_source.head(), "head")
            .await?;
        Ok(head.saturating_sub(self.config.confirmations))
    }

    async fn fetch_logs(&self, from: u64, to: u64) -> IndexerResult<Vec<RawLog>> {
        let query = LogQuery {
            address: self.config.contract_address,
            topic0: payment_topic(),
            from_block: from,
            to_block: to,
        };
        Ok(self.rpc(self.log_source.logs(&query), "logs").await?)
    }

    async fn rpc<T>(
        &self,
        call: impl Future<Output = Result<T, ChainError>>,
        what: &'static str,
    ) -> Result<T, ChainError> {
        tokio::time::timeout(self.config.rpc_timeout, call)
            .await
            .map_err(|_| ChainError::Timeout(self.config.rpc_timeout, what))?
    }

    async fn db<T>(
        &self,
        call: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        tokio::time::timeout(self.config.db_timeout, call)
            .await
            .map_err(|_| StorageError::Timeout(format!("exceeded {:?}", self.config.db_timeout)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SongId, TxHash};
    use crate::testing::{InMemoryLogSource, InMemoryRepositories, TEST_CONTRACT, payment_log_at};
    use alloy_primitives::U256;

    fn config() -> IndexerConfig {
        IndexerConfig {
            contract_address: TEST_CONTRACT,
            start_block: Some(1),
            confirmations: 0,
            chunk_size: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());
        assert!(IndexerConfig::default().validate().is_err());
        assert!(
            IndexerConfig {
                chunk_size: 0,
                ..config()
            }
            .validate()
            .is_err()
        );
        assert!(
            IndexerConfig {
                retry_limit: 0,
                ..config()
            }
            .validate()
            .is_err()
        );
    }

    #[tokio::test]
    async fn test_idle_when_from_past_confirmed_head() {
        let source = Arc::new(InMemoryLogSource::new(5));
        let repos = Arc::new(InMemoryRepositories::new());
        let mut indexer = IndexerService::new(
            IndexerConfig {
                start_block: Some(10),
                confirmations: 3,
                ..config()
            },
            source.clone(),
            repos.clone(),
        );

        let outcome = indexer.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Idle { head: 2 });
        assert!(repos.checkpoint("payment-router").is_none());
    }

    #[tokio::test]
    async fn test_range_bounded_by_chunk_and_advances() {
        let source = Arc::new(InMemoryLogSource::new(100));
        let repos = Arc::new(InMemoryRepositories::new());
        let mut indexer = IndexerService::new(config(), source.clone(), repos.clone());

        let CycleOutcome::Advanced(first) = indexer.run_cycle().await.unwrap() else {
            panic!("expected progress");
        };
        assert_eq!((first.from, first.to), (1, 11));
        assert!(first.checkpoint_persisted);

        let CycleOutcome::Advanced(second) = indexer.run_cycle().await.unwrap() else {
            panic!("expected progress");
        };
        assert_eq!((second.from, second.to), (12, 22));
        assert_eq!(repos.checkpoint("payment-router"), Some(22));
    }

    #[tokio::test]
    async fn test_resumes_from_checkpoint() {
        let source = Arc::new(InMemoryLogSource::new(100));
        let repos = Arc::new(InMemoryRepositories::new());
        repos.set_checkpoint_block("payment-router", 40);
        let mut indexer = IndexerService::new(config(), source, repos);

        let CycleOutcome::Advanced(report) = indexer.run_cycle().await.unwrap() else {
            panic!("expected progress");
        };
        assert_eq!(report.from, 41);
    }

    #[tokio::test]
    async fn test_rpc_failure_leaves_checkpoint_untouched() {
        let source = Arc::new(InMemoryLogSource::new(100));
        let repos = Arc::new(InMemoryRepositories::new());
        let mut indexer = IndexerService::new(config(), source.clone(), repos.clone());

        source.fail_next_logs(1);
        assert!(indexer.run_cycle().await.is_err());
        assert!(repos.checkpoint("payment-router").is_none());

        let CycleOutcome::Advanced(report) = indexer.run_cycle().await.unwrap() else {
            panic!("expected progress");
        };
        assert_eq!(report.from, 1);
    }

    #[tokio::test]
    async fn test_undecodable_log_is_quarantined_without_retry() {
        let source = Arc::new(InMemoryLogSource::new(100));
        let repos = Arc::new(InMemoryRepositories::new());
        let song = SongId([1; 32]);
        repos.register_song(song);
        source.push(payment_log_at(song, U256::from(100u64), 9, TxHash([1; 32]), 0, 2));
        source.push(payment_log_at(song, U256::from(100u64), 0, TxHash([1; 32]), 1, 2));
        let mut indexer = IndexerService::new(config(), source, repos.clone());

        let CycleOutcome::Advanced(report) = indexer.run_cycle().await.unwrap() else {
            panic!("expected progress");
        };
        assert_eq!(report.decode_failures, 1);
        assert_eq!(report.inserted, 1);
        assert!(indexer.retry_pipeline().is_empty());

        let poisoned = repos.poison_items();
        assert_eq!(poisoned.len(), 1);
        assert_eq!(poisoned[0].attempts, 0);
        assert!(poisoned[0].reason.starts_with("decode:"));
    }

    #[tokio::test]
    async fn test_checkpoint_persist_failure_is_not_fatal() {
        let source = Arc::new(InMemoryLogSource::new(100));
        let repos = Arc::new(InMemoryRepositories::new());
        repos.fail_checkpoint_writes(true);
        let mut indexer = IndexerService::new(config(), source, repos.clone());

        let CycleOutcome::Advanced(report) = indexer.run_cycle().await.unwrap() else {
            panic!("expected progress");
        };
        assert!(!report.checkpoint_persisted);
        assert!(repos.checkpoint("payment-router").is_none());

        // In-process progress still advances
        let CycleOutcome::Advanced(next) = indexer.run_cycle().await.unwrap() else {
            panic!("expected progress");
        };
        assert_eq!(next.from, report.to + 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = Arc::new(InMemoryLogSource::new(0));
        let repos = Arc::new(InMemoryRepositories::new());
        let mut indexer = IndexerService::new(
            IndexerConfig {
                start_block: Some(10),
                poll_interval: Duration::from_secs(3600),
                ..config()
            },
            source,
            repos,
        );
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { indexer.run(rx).await });
        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(IndexerError::ShutdownRequested)));
    }
}
