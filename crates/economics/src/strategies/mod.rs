//! Strategy variants.

pub mod dutch_auction;
pub mod dynamic_pricing;
pub mod gift_economy;
pub mod patronage;
pub mod pay_per_stream;

use serde::de::DeserializeOwned;
use tempo_core::error::{DomainError, DomainResult};
use tempo_core::models::PaymentType;

pub use dutch_auction::DutchAuction;
pub use dynamic_pricing::DynamicPricing;
pub use gift_economy::GiftEconomy;
pub use patronage::Patronage;
pub use pay_per_stream::PayPerStream;

/// Decode strategy parameters, tagging errors with the strategy id.
pub(crate) fn parse_params<T: DeserializeOwned>(
    strategy: &str,
    params: &serde_json::Value,
) -> DomainResult<T> {
    serde_json::from_value(params.clone())
        .map_err(|e| DomainError::ValidationError(format!("{strategy}: {e}")))
}

pub(crate) fn unsupported(strategy: &str, payment_type: PaymentType) -> DomainError {
    DomainError::UnsupportedPaymentType {
        strategy: strategy.to_string(),
        payment_type,
    }
}

pub(crate) fn invalid(strategy: &str, reason: impl std::fmt::Display) -> DomainError {
    DomainError::ValidationError(format!("{strategy}: {reason}"))
}
