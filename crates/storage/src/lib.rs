//! Storage layer for the Tempo payment indexer.
//!
//! This crate provides PostgreSQL implementations of the repository traits
//! defined in `tempo-core`: the payment ledger (`plays` and the `songs`
//! aggregates), the indexer checkpoint, poison quarantine and per-song
//! strategy configuration.
//!
//! # Usage
//!
//! ```ignore
//! use tempo_storage::{Database, DatabaseConfig, PgRepositories};
//!
//! let config = DatabaseConfig::for_indexer(&database_url, 8);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = Arc::new(PgRepositories::new(Arc::new(db)));
//! ```

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgRepositories};
