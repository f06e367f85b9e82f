//! Fixed price per stream with a static royalty table.

use alloy_primitives::{Address, U256};
use serde::Deserialize;
use tempo_core::error::DomainResult;
use tempo_core::models::{PaymentType, Split};
use tempo_core::ports::{EconomicStrategy, PaymentEffect, StrategyPayment};

use super::{parse_params, unsupported};
use crate::registry::StrategyDescriptor;
use crate::royalty::{RoyaltyShare, RoyaltyTable};

pub const ID: &str = "pay-per-stream-v1";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    #[serde(with = "crate::amount")]
    price_per_stream: U256,
    royalties: Vec<RoyaltyShare>,
}

#[derive(Debug, Clone)]
pub struct PayPerStream {
    price_per_stream: U256,
    royalties: RoyaltyTable,
}

impl PayPerStream {
    pub fn new(price_per_stream: U256, royalties: RoyaltyTable) -> Self {
        Self {
            price_per_stream,
            royalties,
        }
    }

    pub fn descriptor() -> StrategyDescriptor {
        StrategyDescriptor {
            id: ID,
            name: "Pay Per Stream",
            description: "Listeners pay a fixed price per stream, split by a static royalty table.",
            supports_free_listening: false,
            supports_tips: true,
            supports_subscriptions: false,
        }
    }

    pub fn build(params: &serde_json::Value) -> DomainResult<Box<dyn EconomicStrategy>> {
        let params: Params = parse_params(ID, params)?;
        let royalties = RoyaltyTable::new(params.royalties)?;
        Ok(Box::new(Self::new(params.price_per_stream, royalties)))
    }
}

impl EconomicStrategy for PayPerStream {
    fn strategy_id(&self) -> &'static str {
        ID
    }

    fn compute_min_payment(&self, payment_type: PaymentType, _now: u64) -> DomainResult<U256> {
        match payment_type {
            PaymentType::Stream => Ok(self.price_per_stream),
            PaymentType::Tip => Ok(U256::ZERO),
            other => Err(unsupported(ID, other)),
        }
    }

    fn is_authorized(&self, _payer: &Address, _now: u64) -> bool {
        true
    }

    fn compute_splits(&self, amount: U256) -> Vec<Split> {
        self.royalties.split(amount)
    }

    fn on_payment(&mut self, _payment: &StrategyPayment) -> DomainResult<PaymentEffect> {
        Ok(PaymentEffect::None)
    }
}
