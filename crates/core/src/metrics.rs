//! Metrics definitions for the payment indexer.
//!
//! This module defines all metrics used by the indexer loop, the ledger
//! writer, and the retry pipeline. Metrics are collected using the
//! `metrics` crate and exported to Prometheus via
//! `metrics-exporter-prometheus` in the binary.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "events_processed_total",
        "Total number of payment events written, labelled by outcome"
    );
    describe_counter!(
        "events_poisoned_total",
        "Total number of payment logs moved to the poison store"
    );
    describe_counter!(
        "decode_errors_total",
        "Total number of raw logs that could not be decoded"
    );
    describe_gauge!(
        "indexer_lag_blocks",
        "Confirmed head minus the last fully processed block"
    );
    describe_gauge!(
        "retry_queue_depth",
        "Number of events waiting in the in-memory retry queue"
    );
    describe_gauge!(
        "indexer_checkpoint_block",
        "Last block persisted as the indexer checkpoint"
    );
    describe_counter!(
        "checkpoint_persist_failures_total",
        "Total number of checkpoint writes that failed after a processed range"
    );
    describe_counter!(
        "indexer_cycle_failures_total",
        "Total number of indexer cycles aborted by an error"
    );
    describe_histogram!(
        "cycle_duration_seconds",
        "Time taken by one indexer cycle in seconds"
    );
}

/// Record a written event.
///
/// # Arguments
/// * `outcome` - `"inserted"`, `"unresolved"` (no matching song) or `"duplicate"`
pub fn record_event_processed(outcome: &'static str) {
    counter!("events_processed_total", "outcome" => outcome).increment(1);
}

/// Record an event moved to the poison store.
pub fn record_event_poisoned() {
    counter!("events_poisoned_total").increment(1);
}

/// Record a decode error.
///
/// # Arguments
/// * `reason` - Short error kind, see [`crate::error::DecodeError::kind`]
pub fn record_decode_error(reason: &'static str) {
    counter!("decode_errors_total", "reason" => reason).increment(1);
}

/// Set the indexer lag in blocks.
pub fn set_indexer_lag(blocks: u64) {
    gauge!("indexer_lag_blocks").set(blocks as f64);
}

/// Set the current retry queue depth.
pub fn set_retry_queue_depth(depth: usize) {
    gauge!("retry_queue_depth").set(depth as f64);
}

/// Set the last persisted checkpoint block.
pub fn set_checkpoint_block(block: u64) {
    gauge!("indexer_checkpoint_block").set(block as f64);
}

/// Record a failed checkpoint write.
pub fn record_checkpoint_persist_failure() {
    counter!("checkpoint_persist_failures_total").increment(1);
}

/// Record an aborted indexer cycle.
pub fn record_cycle_failure() {
    counter!("indexer_cycle_failures_total").increment(1);
}

/// Record cycle duration.
pub fn record_cycle_duration(duration_secs: f64) {
    histogram!("cycle_duration_seconds").record(duration_secs);
}

/// A timer that records the cycle duration when dropped.
pub struct CycleTimer {
    start: Instant,
}

impl CycleTimer {
    /// Start a new cycle timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for CycleTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CycleTimer {
    fn drop(&mut self) {
        record_cycle_duration(self.start.elapsed().as_secs_f64());
    }
}
