//! EVM JSON-RPC log source.

use std::collections::HashMap;

use alloy::eips::BlockNumberOrTag;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use tracing::{debug, instrument, trace};

use tempo_core::error::{ChainError, ChainResult};
use tempo_core::models::TxHash;
use tempo_core::ports::{LogQuery, LogSource, RawLog};

/// Configuration for the EVM client.
#[derive(Debug, Clone)]
pub struct EvmClientConfig {
    /// HTTP JSON-RPC URL (e.g., "https://rpc.gnosischain.com").
    pub rpc_url: String,
}

impl Default for EvmClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
        }
    }
}

/// EVM client adapter implementing the LogSource port.
pub struct EvmLogSource {
    provider: DynProvider,
    chain_id: u64,
}

impl EvmLogSource {
    /// Connect to a node and check it answers.
    #[instrument(skip_all, fields(url = %config.rpc_url))]
    pub async fn connect(config: EvmClientConfig) -> ChainResult<Self> {
        debug!("Connecting to node");

        let url = url::Url::parse(&config.rpc_url)
            .map_err(|e| ChainError::ConnectionFailed(format!("invalid RPC URL: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;

        debug!(chain_id, "Connected successfully");

        Ok(Self { provider, chain_id })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_timestamp(&self, number: u64) -> ChainResult<u64> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?
            .ok_or_else(|| ChainError::InvalidResponse(format!("block {number} not found")))?;
        Ok(block.header.timestamp)
    }
}

#[async_trait]
impl LogSource for EvmLogSource {
    async fn head(&self) -> ChainResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))
    }

    #[instrument(skip_all, fields(from = query.from_block, to = query.to_block))]
    async fn logs(&self, query: &LogQuery) -> ChainResult<Vec<RawLog>> {
        if query.from_block > query.to_block {
            return Ok(Vec::new());
        }

        let filter = Filter::new()
            .address(query.address)
            .event_signature(query.topic0)
            .from_block(query.from_block)
            .to_block(query.to_block);

        let rpc_logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        let fetched = rpc_logs.len();

        let mut logs: Vec<RawLog> = rpc_logs.into_iter().filter_map(convert_log).collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        // Nodes without `blockTimestamp` on logs: one header fetch per block
        let mut timestamps: HashMap<u64, u64> = HashMap::new();
        for log in logs.iter_mut().filter(|log| log.block_timestamp.is_none()) {
            let ts = match timestamps.get(&log.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = self.block_timestamp(log.block_number).await?;
                    timestamps.insert(log.block_number, ts);
                    ts
                }
            };
            log.block_timestamp = Some(ts);
        }

        debug!(fetched, kept = logs.len(), headers = timestamps.len(), "Logs fetched");
        Ok(logs)
    }
}

/// Convert an RPC log, dropping reorged-out and pending entries.
fn convert_log(log: Log) -> Option<RawLog> {
    if log.removed {
        trace!(tx = ?log.transaction_hash, "Skipping removed log");
        return None;
    }

    let (Some(block_number), Some(tx_hash), Some(log_index)) =
        (log.block_number, log.transaction_hash, log.log_index)
    else {
        trace!("Skipping pending log");
        return None;
    };

    Some(RawLog {
        address: log.inner.address,
        topics: log.inner.data.topics().to_vec(),
        data: log.inner.data.data.clone(),
        block_number,
        block_timestamp: log.block_timestamp,
        tx_hash: TxHash::from(tx_hash),
        log_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256, Bytes, LogData};

    fn rpc_log(block: Option<u64>, removed: bool) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0xaa),
                data: LogData::new_unchecked(
                    vec![B256::repeat_byte(1), B256::repeat_byte(2)],
                    Bytes::from(vec![0u8; 32]),
                ),
            },
            block_hash: None,
            block_number: block,
            block_timestamp: Some(1_700_000_000),
            transaction_hash: Some(B256::repeat_byte(9)),
            transaction_index: Some(0),
            log_index: Some(4),
            removed,
        }
    }

    #[test]
    fn test_convert_keeps_mined_log() {
        let raw = convert_log(rpc_log(Some(12), false)).unwrap();
        assert_eq!(raw.block_number, 12);
        assert_eq!(raw.log_index, 4);
        assert_eq!(raw.topics.len(), 2);
        assert_eq!(raw.tx_hash, TxHash([9; 32]));
        assert_eq!(raw.block_timestamp, Some(1_700_000_000));
    }

    // Test critique: les logs retirés par un reorg ne doivent jamais être indexés
    #[test]
    fn test_convert_drops_removed_and_pending() {
        assert!(convert_log(rpc_log(Some(12), true)).is_none());
        assert!(convert_log(rpc_log(None, false)).is_none());
    }
}
