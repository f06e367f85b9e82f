//! Port trait for chain log sources.
//!
//! Abstracts over the JSON-RPC node so the indexer can be driven by a live
//! EVM endpoint or by in-memory fixtures in tests.

use alloy_primitives::{Address, B256, Bytes};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChainResult;
use crate::models::{EventKey, TxHash};

/// Mined log as returned by the source, before decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Emitting contract.
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    /// Block timestamp in seconds, if known.
    pub block_timestamp: Option<u64>,
    pub tx_hash: TxHash,
    pub log_index: u64,
}

impl RawLog {
    /// Identity of this log.
    pub fn key(&self) -> EventKey {
        EventKey::new(self.tx_hash, self.log_index)
    }
}

/// Log filter for one bounded block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    /// Event signature hash (topic 0).
    pub topic0: B256,
    pub from_block: u64,
    /// Inclusive upper bound.
    pub to_block: u64,
}

/// Source of confirmed contract logs.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Latest block number known to the source.
    async fn head(&self) -> ChainResult<u64>;

    /// Logs matching `query`, sorted by `(block_number, log_index)`.
    ///
    /// An empty or not-yet-mined range yields an empty list, not an error.
    async fn logs(&self, query: &LogQuery) -> ChainResult<Vec<RawLog>>;
}
