//! Port traits for economic strategies and payment observers.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use crate::error::DomainResult;
use crate::models::{PaymentEvent, PaymentType, Split};

/// 100% in basis points.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Payment as seen by a strategy, after the protocol fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyPayment {
    pub payer: Address,
    /// Net amount (gross minus protocol fee).
    pub amount: U256,
    pub payment_type: PaymentType,
    /// Unix seconds.
    pub timestamp: u64,
}

/// State change produced by a strategy for one payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEffect {
    /// Nothing beyond the splits.
    None,
    /// Patronage subscription renewed until `paid_through`.
    SubscriptionRenewed { payer: Address, paid_through: u64 },
    /// One-time access grant (auction purchase).
    AccessGranted { payer: Address },
    /// Listener reward credit for a free stream.
    RewardCredited { listener: Address, amount: U256 },
    /// Dynamic price recomputed.
    PriceRefreshed { price: U256 },
}

/// Capability interface shared by every strategy variant.
///
/// Time is always passed explicitly as unix seconds.
pub trait EconomicStrategy: Send + Sync {
    /// Registered identifier of this strategy.
    fn strategy_id(&self) -> &'static str;

    /// Minimum gross payment for `payment_type` at `now`.
    fn compute_min_payment(&self, payment_type: PaymentType, now: u64) -> DomainResult<U256>;

    /// Whether `payer` may stream without paying.
    fn is_authorized(&self, payer: &Address, now: u64) -> bool;

    /// Split a net amount among payees. Shares sum to `amount`.
    fn compute_splits(&self, amount: U256) -> Vec<Split>;

    /// Apply a payment to the strategy state.
    fn on_payment(&mut self, payment: &StrategyPayment) -> DomainResult<PaymentEffect>;
}

/// Notified after every ledger write that leaves a payment recorded.
///
/// Duplicates are delivered too, since a write that timed out client-side
/// may still have committed. Implementations must be idempotent per
/// [`EventKey`](crate::models::EventKey).
#[async_trait]
pub trait PaymentObserver: Send + Sync {
    async fn observe(&self, event: &PaymentEvent);
}
