//! Administrative GraphQL API for the Tempo payment indexer.
//!
//! Lets operators inspect the checkpoint and the poison quarantine, replay
//! poisoned events or block ranges, and manage per-song strategies.
//!
//! ```ignore
//! use tempo_graphql::{build_schema, serve_with_shutdown, ServerConfig};
//!
//! let schema = build_schema(repositories, replay, router, "payment-router");
//! serve_with_shutdown(schema, ServerConfig::default(), shutdown).await?;
//! ```

mod schema;
mod server;
mod types;

pub use schema::{
    AdminMutation, AdminQuery, MAX_QUERY_COMPLEXITY, MAX_QUERY_DEPTH, MAX_REPLAY_RANGE,
    SourceName, build_schema,
};
pub use server::{ServerConfig, serve_with_shutdown};
pub use types::TempoSchema;
