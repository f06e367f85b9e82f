//! Core domain layer for the Tempo payment indexer.
//!
//! This crate contains the domain models, port traits (interfaces), and
//! services that turn on-chain `PaymentRecorded` logs into a consistent
//! off-chain ledger. It follows hexagonal architecture principles - this is
//! the innermost layer with no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      tempo (binary)                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │   tempo-graphql   │  tempo-economics   │     tempo-evm      │
//! │   (admin API)     │   (strategies)     │   (JSON-RPC logs)  │
//! ├───────────────────┴────────────────────┴────────────────────┤
//! │                      tempo-storage                          │
//! │                      (PostgreSQL)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      tempo-core  ← YOU ARE HERE             │
//! │               (models, ports, services)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (PaymentEvent, Checkpoint, PoisonItem, etc.)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Decoder, retry pipeline, ledger writer, indexer loop, replay
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Indexer Lifecycle
//!
//! 1. Resolve the first block to scan (checkpoint, start override, or head)
//! 2. Fetch `PaymentRecorded` logs for one bounded block range
//! 3. Decode each log; undecodable logs are quarantined individually
//! 4. Write each event idempotently (play row + song aggregates)
//! 5. Re-attempt every queued retry, poisoning items past the retry budget
//! 6. Persist the checkpoint for the whole range

pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod services;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
