//! Bounded retry buffer for failed ledger writes.
//!
//! The pipeline is plain owned state: the orchestration loop drives the
//! writes and reports each outcome back. It never persists anything itself;
//! a [`RetryDecision::Poison`] tells the caller to quarantine the item.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::{EventKey, PaymentEvent, PoisonItem, RetryItem};

/// What to do with an event after a failed write.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Keep it queued for the next pass.
    Requeued { attempts: u32 },
    /// Retry budget exhausted; persist to poison storage, then [`RetryPipeline::remove`].
    Poison(PoisonItem),
}

/// In-memory retry queue keyed by `(tx_hash, log_index)`.
#[derive(Debug)]
pub struct RetryPipeline {
    limit: u32,
    items: BTreeMap<EventKey, RetryItem>,
}

impl RetryPipeline {
    /// Create a pipeline that poisons an event after `limit` failed retries.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            items: BTreeMap::new(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of queued items.
    pub fn depth(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &EventKey) -> Option<&RetryItem> {
        self.items.get(key)
    }

    /// Queue an event after its first failed write.
    ///
    /// An event that is already queued counts as a further failure.
    pub fn enqueue(
        &mut self,
        event: &PaymentEvent,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        self.record_failure(event, reason, now)
    }

    /// Record a failed write and decide whether the event stays queued.
    ///
    /// Attempts start at 1; the item is poisoned once attempts exceed the limit.
    pub fn record_failure(
        &mut self,
        event: &PaymentEvent,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let reason = reason.into();
        let item = self
            .items
            .entry(event.key())
            .and_modify(|item| {
                item.attempts = item.attempts.saturating_add(1);
                item.reason = reason.clone();
                item.last_failed_at = now;
            })
            .or_insert_with(|| RetryItem {
                event: event.clone(),
                reason,
                attempts: 1,
                first_failed_at: now,
                last_failed_at: now,
            });

        if item.attempts <= self.limit {
            return RetryDecision::Requeued {
                attempts: item.attempts,
            };
        }
        match PoisonItem::from_retry(item) {
            Ok(poison) => RetryDecision::Poison(poison),
            Err(e) => {
                warn!(key = %item.event.key(), error = %e, "⚠️  Cannot build poison payload, keeping event queued");
                RetryDecision::Requeued {
                    attempts: item.attempts,
                }
            }
        }
    }

    /// Drop an item after a successful write.
    pub fn resolve(&mut self, key: &EventKey) -> Option<RetryItem> {
        self.items.remove(key)
    }

    /// Drop an item once it has been quarantined.
    pub fn remove(&mut self, key: &EventKey) -> bool {
        self.items.remove(key).is_some()
    }

    /// Queued events ordered by block number, then key.
    pub fn snapshot(&self) -> Vec<PaymentEvent> {
        let mut events: Vec<PaymentEvent> =
            self.items.values().map(|item| item.event.clone()).collect();
        events.sort_by_key(|e| (e.block_number, e.key()));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentType, SongId, TxHash};
    use alloy_primitives::{Address, U256};

    fn event(tx: u8, block: u64) -> PaymentEvent {
        PaymentEvent {
            song_id: SongId([1; 32]),
            listener: Address::ZERO,
            gross_amount: U256::from(100u64),
            protocol_fee: U256::from(1u64),
            net_amount: U256::from(99u64),
            payment_type: PaymentType::Stream,
            tx_hash: TxHash([tx; 32]),
            log_index: 0,
            block_number: block,
            timestamp: Utc::now(),
        }
    }

    // Test critique: un événement qui échoue toujours est réessayé exactement `limit` fois
    #[test]
    fn test_poisoned_after_limit_retries() {
        let mut pipeline = RetryPipeline::new(3);
        let e = event(1, 10);
        let now = Utc::now();

        assert_eq!(
            pipeline.enqueue(&e, "initial", now),
            RetryDecision::Requeued { attempts: 1 }
        );
        for n in 2..=3 {
            assert_eq!(
                pipeline.record_failure(&e, format!("retry {n}"), now),
                RetryDecision::Requeued { attempts: n }
            );
        }

        match pipeline.record_failure(&e, "final failure", now) {
            RetryDecision::Poison(item) => {
                assert_eq!(item.attempts, 4);
                assert_eq!(item.reason, "final failure");
                assert_eq!(item.key, e.key());
                assert_eq!(item.block_number, 10);
                let payload: PaymentEvent = serde_json::from_value(item.payload).unwrap();
                assert_eq!(payload, e);
            }
            other => panic!("expected poison, got {other:?}"),
        }

        // Stays queued until the caller confirms quarantine
        assert_eq!(pipeline.depth(), 1);
        assert!(pipeline.remove(&e.key()));
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_repeat_failure_updates_in_place() {
        let mut pipeline = RetryPipeline::new(3);
        let e = event(1, 10);
        pipeline.enqueue(&e, "a", Utc::now());
        pipeline.enqueue(&e, "b", Utc::now());

        assert_eq!(pipeline.depth(), 1);
        let item = pipeline.get(&e.key()).unwrap();
        assert_eq!(item.attempts, 2);
        assert_eq!(item.reason, "b");
    }

    #[test]
    fn test_snapshot_order_and_resolve() {
        let mut pipeline = RetryPipeline::new(3);
        pipeline.enqueue(&event(9, 5), "x", Utc::now());
        pipeline.enqueue(&event(1, 7), "x", Utc::now());
        pipeline.enqueue(&event(3, 5), "x", Utc::now());

        let blocks: Vec<(u64, u8)> = pipeline
            .snapshot()
            .iter()
            .map(|e| (e.block_number, e.tx_hash.0[0]))
            .collect();
        assert_eq!(blocks, vec![(5, 3), (5, 9), (7, 1)]);

        assert!(pipeline.resolve(&event(3, 5).key()).is_some());
        assert!(pipeline.resolve(&event(3, 5).key()).is_none());
        assert_eq!(pipeline.depth(), 2);
    }
}
