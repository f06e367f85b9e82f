//! Idempotent ledger writes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, trace};

use crate::error::{IndexerResult, StorageError};
use crate::metrics::record_event_processed;
use crate::models::{PaymentEvent, WriteOutcome};
use crate::ports::{PaymentObserver, Repositories};

/// Writes payment events through [`Repositories::record_payment_atomic`].
///
/// Each call is one transaction bounded by `write_timeout`. Every write that
/// leaves the payment recorded, duplicates included, is forwarded to the
/// optional observer.
#[derive(Clone)]
pub struct LedgerWriter {
    repositories: Arc<dyn Repositories>,
    observer: Option<Arc<dyn PaymentObserver>>,
    write_timeout: Duration,
}

impl LedgerWriter {
    pub fn new(repositories: Arc<dyn Repositories>, write_timeout: Duration) -> Self {
        Self {
            repositories,
            observer: None,
            write_timeout,
        }
    }

    /// Attach a payment observer.
    pub fn with_observer(mut self, observer: Arc<dyn PaymentObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Record one event. Duplicates are a successful no-op.
    #[instrument(skip_all, fields(key = %event.key(), block = event.block_number))]
    pub async fn process_event(&self, event: &PaymentEvent) -> IndexerResult<WriteOutcome> {
        let outcome = tokio::time::timeout(
            self.write_timeout,
            self.repositories.record_payment_atomic(event),
        )
        .await
        .map_err(|_| {
            StorageError::Timeout(format!(
                "record_payment_atomic exceeded {:?}",
                self.write_timeout
            ))
        })??;

        match outcome {
            WriteOutcome::Inserted {
                song_resolved: true,
            } => {
                trace!("Payment recorded");
                record_event_processed("inserted");
            }
            WriteOutcome::Inserted {
                song_resolved: false,
            } => {
                debug!(song = %event.song_id, "Payment recorded for unknown song");
                record_event_processed("unresolved");
            }
            WriteOutcome::Duplicate => {
                trace!("Payment already recorded");
                record_event_processed("duplicate");
            }
        }

        // The row exists now whatever the outcome; a duplicate may be our own
        // earlier commit whose acknowledgement was lost.
        if let Some(observer) = &self.observer {
            observer.observe(event).await;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SongId;
    use crate::testing::{InMemoryRepositories, RecordingObserver, sample_event};

    #[tokio::test]
    async fn test_duplicate_write_is_noop() {
        let repos = Arc::new(InMemoryRepositories::new());
        repos.register_song(SongId([1; 32]));
        let writer = LedgerWriter::new(repos.clone(), Duration::from_secs(1));
        let event = sample_event(SongId([1; 32]), 1, 0, 100);

        let first = writer.process_event(&event).await.unwrap();
        let second = writer.process_event(&event).await.unwrap();

        assert_eq!(
            first,
            WriteOutcome::Inserted {
                song_resolved: true
            }
        );
        assert_eq!(second, WriteOutcome::Duplicate);
        assert_eq!(repos.play_count(), 1);
        let song = repos.song(&SongId([1; 32])).unwrap();
        assert_eq!(song.plays, 1);
        assert_eq!(song.earnings, event.net_amount);
    }

    #[tokio::test]
    async fn test_observer_sees_every_recorded_payment() {
        let repos = Arc::new(InMemoryRepositories::new());
        repos.register_song(SongId([1; 32]));
        let observer = Arc::new(RecordingObserver::default());
        let writer = LedgerWriter::new(repos.clone(), Duration::from_secs(1))
            .with_observer(observer.clone());

        let known = sample_event(SongId([1; 32]), 1, 0, 100);
        let unknown = sample_event(SongId([2; 32]), 2, 0, 100);
        writer.process_event(&known).await.unwrap();
        writer.process_event(&known).await.unwrap();
        let outcome = writer.process_event(&unknown).await.unwrap();

        assert_eq!(
            outcome,
            WriteOutcome::Inserted {
                song_resolved: false
            }
        );
        assert_eq!(observer.seen(), vec![known.key(), known.key(), unknown.key()]);
        assert_eq!(repos.play_count(), 2);
    }

    // Test critique: un commit dont l'acquittement est perdu est quand même observé
    #[tokio::test]
    async fn test_lost_commit_ack_is_observed_on_retry() {
        let repos = Arc::new(InMemoryRepositories::new());
        repos.register_song(SongId([1; 32]));
        let observer = Arc::new(RecordingObserver::default());
        let writer = LedgerWriter::new(repos.clone(), Duration::from_secs(1))
            .with_observer(observer.clone());
        let event = sample_event(SongId([1; 32]), 1, 0, 100);
        repos.fail_after_commit_for(event.key());

        assert!(writer.process_event(&event).await.is_err());
        assert!(observer.seen().is_empty());
        assert_eq!(repos.play_count(), 1);

        assert_eq!(
            writer.process_event(&event).await.unwrap(),
            WriteOutcome::Duplicate
        );
        assert_eq!(observer.seen(), vec![event.key()]);
        assert_eq!(repos.song(&SongId([1; 32])).unwrap().plays, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let repos = Arc::new(InMemoryRepositories::new());
        let event = sample_event(SongId([1; 32]), 1, 0, 100);
        repos.fail_writes_for(event.key(), u32::MAX);
        let writer = LedgerWriter::new(repos.clone(), Duration::from_secs(1));

        assert!(writer.process_event(&event).await.is_err());
        assert_eq!(repos.play_count(), 0);
    }
}
