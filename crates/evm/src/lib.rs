//! EVM RPC adapter for the Tempo payment indexer.
//!
//! This crate implements the [`LogSource`] port from `tempo-core` over an
//! HTTP JSON-RPC endpoint using alloy.
//!
//! # Features
//!
//! - `eth_getLogs` over bounded block ranges, sorted by `(block, log index)`
//! - Reorged-out (`removed`) and pending logs are dropped
//! - Block timestamps from `blockTimestamp` or, when absent, the block header
//!
//! # Usage
//!
//! ```ignore
//! use tempo_evm::{EvmClientConfig, EvmLogSource};
//!
//! let source = EvmLogSource::connect(EvmClientConfig {
//!     rpc_url: "https://rpc.gnosischain.com".to_string(),
//! })
//! .await?;
//! let head = source.head().await?;
//! ```
//!
//! [`LogSource`]: tempo_core::ports::LogSource

mod client;

pub use client::{EvmClientConfig, EvmLogSource};
