//! Error types for the indexer domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`DomainError`] - Business logic and strategy errors
//! - [`DecodeError`] - Raw log decoding errors
//! - [`StorageError`] - Database/repository errors
//! - [`ChainError`] - Blockchain RPC errors
//! - [`IndexerError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

use crate::models::PaymentType;

// =============================================================================
// Domain Errors
// =============================================================================

/// Business logic and domain rule violations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Raw log could not be decoded into a payment event.
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Generic validation error (configuration, parameters, admin input).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// No strategy identifier or song strategy is registered.
    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),

    /// The song's strategy does not accept this payment type.
    #[error("Payment type {payment_type} not supported by strategy {strategy}")]
    UnsupportedPaymentType {
        /// Strategy identifier.
        strategy: String,
        /// Rejected payment type.
        payment_type: PaymentType,
    },

    /// Gross payment is below the strategy minimum.
    #[error("Insufficient payment: required {required}, got {provided}")]
    InsufficientPayment {
        /// Minimum payment required by the strategy.
        required: String,
        /// Amount actually provided.
        provided: String,
    },

    /// Payer is not authorized to access the song.
    #[error("Payer {0} is not authorized")]
    Unauthorized(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// Decode Errors
// =============================================================================

/// Failures turning a raw log into a `PaymentEvent`.
///
/// Decode failures are deterministic: the same log always fails the same
/// way, so they are never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// First topic is missing or is not the `PaymentRecorded` signature.
    #[error("unexpected event topic: {0}")]
    UnexpectedTopic(String),

    /// ABI decoding of topics/data failed.
    #[error("abi decode failed: {0}")]
    Abi(String),

    /// `paymentType` is outside the known table.
    #[error("unknown payment type: {0}")]
    UnknownPaymentType(u8),

    /// Log metadata required by the ledger is absent.
    #[error("missing log field: {0}")]
    MissingField(&'static str),
}

impl DecodeError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::UnexpectedTopic(_) => "unexpected_topic",
            DecodeError::Abi(_) => "abi",
            DecodeError::UnknownPaymentType(_) => "unknown_payment_type",
            DecodeError::MissingField(_) => "missing_field",
        }
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and repository errors.
///
/// These errors originate from storage operations like queries,
/// transactions, and data serialization.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Database constraint was violated (unique, foreign key, etc.).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Transaction commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Data serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Storage call exceeded its deadline.
    #[error("Storage timeout: {0}")]
    Timeout(String),
}

// =============================================================================
// Chain Errors
// =============================================================================

/// Blockchain RPC and connectivity errors.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC endpoint could not be reached or configured.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RPC request failed.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Node returned data we cannot use.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Operation timed out.
    #[error("Timeout after {0:?} during {1}")]
    Timeout(std::time::Duration, &'static str),
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level indexer orchestration errors.
///
/// This is the main error type returned by [`crate::services::IndexerService`]
/// and [`crate::services::ReplayService`]. It wraps all lower-level errors and
/// adds indexer-specific variants.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Domain logic error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Blockchain connectivity error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Graceful shutdown was requested.
    ///
    /// This is not really an error but uses the error type for control flow.
    #[error("Indexer shutdown requested")]
    ShutdownRequested,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DecodeError> for IndexerError {
    fn from(err: DecodeError) -> Self {
        IndexerError::Domain(DomainError::Decode(err))
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
