//! Administrative replay of poisoned events and block ranges.
//!
//! Replays go through the same decode and write path as the indexer loop
//! but never touch the checkpoint.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::error::{ChainError, DomainError, IndexerResult, StorageError};
use crate::models::{EventKey, PoisonItem, WriteOutcome};
use crate::ports::{LogQuery, LogSource, RawLog, Repositories};
use crate::services::decoder::{decode_payment, payment_topic};
use crate::services::ledger::LedgerWriter;

/// One log that failed during a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFailure {
    pub key: EventKey,
    pub reason: String,
}

/// Summary of a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub from_block: u64,
    pub to_block: u64,
    pub logs: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Poison items removed because the replay succeeded.
    pub cleared: usize,
    pub failures: Vec<ReplayFailure>,
}

/// Replays logs through decode and write on operator request.
pub struct ReplayService {
    log_source: Arc<dyn LogSource>,
    repositories: Arc<dyn Repositories>,
    writer: LedgerWriter,
    contract_address: Address,
    chunk_size: u64,
    rpc_timeout: Duration,
}

impl ReplayService {
    pub fn new(
        log_source: Arc<dyn LogSource>,
        repositories: Arc<dyn Repositories>,
        writer: LedgerWriter,
        contract_address: Address,
        chunk_size: u64,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            log_source,
            repositories,
            writer,
            contract_address,
            chunk_size: chunk_size.max(1),
            rpc_timeout,
        }
    }

    /// Replay one poisoned event.
    ///
    /// The log is re-fetched from its block. On success the poison item is
    /// deleted; on failure it is updated with the new reason.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn replay_event(&self, key: &EventKey) -> IndexerResult<ReplayReport> {
        let item = self
            .repositories
            .poison()
            .get_poison(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("poison item {key}")))?;

        let logs = self.fetch(item.block_number, item.block_number).await?;
        let log = logs
            .into_iter()
            .find(|log| log.key() == *key)
            .ok_or_else(|| {
                DomainError::ValidationError(format!(
                    "log {key} not found in block {}",
                    item.block_number
                ))
            })?;

        let mut report = ReplayReport {
            from_block: item.block_number,
            to_block: item.block_number,
            logs: 1,
            ..Default::default()
        };
        self.replay_log(&log, Some(item), &mut report).await?;
        Ok(report)
    }

    /// Replay every payment log in `[from, to]`, in chunks.
    #[instrument(skip(self))]
    pub async fn replay_range(&self, from: u64, to: u64) -> IndexerResult<ReplayReport> {
        if from > to {
            return Err(DomainError::ValidationError(format!(
                "invalid range: from {from} > to {to}"
            ))
            .into());
        }

        let mut report = ReplayReport {
            from_block: from,
            to_block: to,
            ..Default::default()
        };

        let mut start = from;
        loop {
            let end = to.min(start.saturating_add(self.chunk_size - 1));
            let logs = self.fetch(start, end).await?;
            report.logs += logs.len();

            for log in &logs {
                let existing = self.repositories.poison().get_poison(&log.key()).await?;
                self.replay_log(log, existing, &mut report).await?;
            }

            if end >= to {
                break;
            }
            start = end + 1;
        }

        info!(
            logs = report.logs,
            inserted = report.inserted,
            cleared = report.cleared,
            failed = report.failures.len(),
            "🔁 Range replayed"
        );
        Ok(report)
    }

    async fn replay_log(
        &self,
        log: &RawLog,
        existing: Option<PoisonItem>,
        report: &mut ReplayReport,
    ) -> IndexerResult<()> {
        let key = log.key();
        let result = match decode_payment(log) {
            Ok(event) => self
                .writer
                .process_event(&event)
                .await
                .map_err(|e| (e.to_string(), serde_json::to_value(&event).ok())),
            Err(e) => Err((format!("decode: {e}"), serde_json::to_value(log).ok())),
        };

        match result {
            Ok(outcome) => {
                match outcome {
                    WriteOutcome::Inserted { .. } => report.inserted += 1,
                    WriteOutcome::Duplicate => report.duplicates += 1,
                }
                if existing.is_some() && self.repositories.poison().delete_poison(&key).await? {
                    info!(key = %key, "✅ Poison item cleared");
                    report.cleared += 1;
                }
            }
            Err((reason, payload)) => {
                warn!(key = %key, reason = %reason, "⚠️  Replay failed");
                let now = Utc::now();
                let item = match existing {
                    Some(mut item) => {
                        item.attempts = item.attempts.saturating_add(1);
                        item.reason = reason.clone();
                        item.last_failed_at = now;
                        item
                    }
                    None => PoisonItem {
                        key,
                        block_number: log.block_number,
                        reason: reason.clone(),
                        attempts: 1,
                        payload: payload.unwrap_or(serde_json::Value::Null),
                        first_failed_at: now,
                        last_failed_at: now,
                    },
                };
                self.repositories.poison().upsert_poison(&item).await?;
                report.failures.push(ReplayFailure { key, reason });
            }
        }
        Ok(())
    }

    async fn fetch(&self, from: u64, to: u64) -> Result<Vec<RawLog>, ChainError> {
        let query = LogQuery {
            address: self.contract_address,
            topic0: payment_topic(),
            from_block: from,
            to_block: to,
        };
        tokio::time::timeout(self.rpc_timeout, self.log_source.logs(&query))
            .await
            .map_err(|_| ChainError::Timeout(self.rpc_timeout, "logs"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SongId, TxHash};
    use crate::testing::{InMemoryLogSource, InMemoryRepositories, TEST_CONTRACT, payment_log_at};
    use alloy_primitives::U256;

    fn service(source: Arc<InMemoryLogSource>, repos: Arc<InMemoryRepositories>) -> ReplayService {
        let writer = LedgerWriter::new(repos.clone(), Duration::from_secs(1));
        ReplayService::new(source, repos, writer, TEST_CONTRACT, 2, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_replay_event_clears_poison() {
        let source = Arc::new(InMemoryLogSource::new(100));
        let repos = Arc::new(InMemoryRepositories::new());
        let song = SongId([1; 32]);
        repos.register_song(song);
        let log = payment_log_at(song, U256::from(100u64), 0, TxHash([5; 32]), 3, 7);
        source.push(log.clone());
        repos.insert_poison(PoisonItem {
            key: log.key(),
            block_number: 7,
            reason: "db down".into(),
            attempts: 4,
            payload: serde_json::Value::Null,
            first_failed_at: Utc::now(),
            last_failed_at: Utc::now(),
        });

        let report = service(source, repos.clone())
            .replay_event(&log.key())
            .await
            .unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.cleared, 1);
        assert!(repos.poison_items().is_empty());
        assert_eq!(repos.song(&song).unwrap().plays, 1);
    }

    #[tokio::test]
    async fn test_replay_event_requires_poison_item() {
        let source = Arc::new(InMemoryLogSource::new(100));
        let repos = Arc::new(InMemoryRepositories::new());
        let key = EventKey::new(TxHash([5; 32]), 0);

        let err = service(source, repos).replay_event(&key).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_replay_range_records_failures_and_skips_checkpoint() {
        let source = Arc::new(InMemoryLogSource::new(100));
        let repos = Arc::new(InMemoryRepositories::new());
        let song = SongId([1; 32]);
        repos.register_song(song);
        for (i, block) in [3u64, 4, 5, 6, 9].into_iter().enumerate() {
            source.push(payment_log_at(song, U256::from(10u64), 0, TxHash([i as u8; 32]), 0, block));
        }
        let broken = payment_log_at(song, U256::from(10u64), 7, TxHash([9; 32]), 0, 5);
        source.push(broken.clone());

        let report = service(source, repos.clone()).replay_range(3, 8).await.unwrap();

        assert_eq!(report.logs, 5);
        assert_eq!(report.inserted, 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, broken.key());
        assert_eq!(repos.poison_items().len(), 1);
        assert!(repos.checkpoint("payment-router").is_none());
    }

    #[tokio::test]
    async fn test_replay_range_rejects_inverted_range() {
        let source = Arc::new(InMemoryLogSource::new(100));
        let repos = Arc::new(InMemoryRepositories::new());
        assert!(service(source, repos).replay_range(9, 3).await.is_err());
    }
}
