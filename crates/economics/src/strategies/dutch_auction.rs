//! Dutch auction for a one-time access grant.

use std::collections::HashSet;

use alloy_primitives::{Address, U256};
use serde::Deserialize;
use tempo_core::error::DomainResult;
use tempo_core::models::{PaymentType, Split};
use tempo_core::ports::{EconomicStrategy, PaymentEffect, StrategyPayment};

use super::{invalid, parse_params, unsupported};
use crate::registry::StrategyDescriptor;
use crate::royalty::{RoyaltyShare, RoyaltyTable};

pub const ID: &str = "dutch-auction-v1";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    #[serde(with = "crate::amount")]
    start_price: U256,
    #[serde(with = "crate::amount")]
    end_price: U256,
    start_time: u64,
    end_time: u64,
    royalties: Vec<RoyaltyShare>,
}

/// Linear price decay from `start_price` to `end_price`.
#[derive(Debug, Clone)]
pub struct DutchAuction {
    start_price: U256,
    end_price: U256,
    start_time: u64,
    end_time: u64,
    royalties: RoyaltyTable,
    holders: HashSet<Address>,
}

impl DutchAuction {
    pub fn new(
        start_price: U256,
        end_price: U256,
        start_time: u64,
        end_time: u64,
        royalties: RoyaltyTable,
    ) -> DomainResult<Self> {
        if end_time <= start_time {
            return Err(invalid(ID, "end_time must be after start_time"));
        }
        if end_price > start_price {
            return Err(invalid(ID, "end_price must not exceed start_price"));
        }
        Ok(Self {
            start_price,
            end_price,
            start_time,
            end_time,
            royalties,
            holders: HashSet::new(),
        })
    }

    pub fn descriptor() -> StrategyDescriptor {
        StrategyDescriptor {
            id: ID,
            name: "Dutch Auction",
            description: "Price decays over time; one purchase grants permanent access.",
            supports_free_listening: false,
            supports_tips: false,
            supports_subscriptions: false,
        }
    }

    pub fn build(params: &serde_json::Value) -> DomainResult<Box<dyn EconomicStrategy>> {
        let params: Params = parse_params(ID, params)?;
        let royalties = RoyaltyTable::new(params.royalties)?;
        Ok(Box::new(Self::new(
            params.start_price,
            params.end_price,
            params.start_time,
            params.end_time,
            royalties,
        )?))
    }

    /// Current price, clamped to `end_price` once the auction has elapsed.
    pub fn price_at(&self, now: u64) -> U256 {
        let elapsed = now.saturating_sub(self.start_time);
        let duration = self.end_time - self.start_time;
        if elapsed >= duration {
            return self.end_price;
        }
        let drop = (self.start_price - self.end_price) * U256::from(elapsed) / U256::from(duration);
        self.start_price - drop
    }
}

impl EconomicStrategy for DutchAuction {
    fn strategy_id(&self) -> &'static str {
        ID
    }

    fn compute_min_payment(&self, payment_type: PaymentType, now: u64) -> DomainResult<U256> {
        match payment_type {
            PaymentType::NftAccess => Ok(self.price_at(now)),
            PaymentType::Stream => Ok(U256::ZERO),
            other => Err(unsupported(ID, other)),
        }
    }

    fn is_authorized(&self, payer: &Address, _now: u64) -> bool {
        self.holders.contains(payer)
    }

    fn compute_splits(&self, amount: U256) -> Vec<Split> {
        self.royalties.split(amount)
    }

    fn on_payment(&mut self, payment: &StrategyPayment) -> DomainResult<PaymentEffect> {
        if payment.payment_type == PaymentType::NftAccess && self.holders.insert(payment.payer) {
            return Ok(PaymentEffect::AccessGranted {
                payer: payment.payer,
            });
        }
        Ok(PaymentEffect::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auction() -> DutchAuction {
        DutchAuction::new(
            U256::from(100u64),
            U256::from(10u64),
            1_000,
            2_000,
            RoyaltyTable::sole(Address::repeat_byte(1), "artist"),
        )
        .unwrap()
    }

    // Test critique: 100 -> 10 sur 1000s, price(500s) = 55, price(>=1000s) = 10
    #[test]
    fn test_price_decay() {
        let auction = auction();
        assert_eq!(auction.price_at(500), U256::from(100u64));
        assert_eq!(auction.price_at(1_000), U256::from(100u64));
        assert_eq!(auction.price_at(1_500), U256::from(55u64));
        assert_eq!(auction.price_at(2_000), U256::from(10u64));
        assert_eq!(auction.price_at(9_999), U256::from(10u64));
    }

    #[test]
    fn test_grant_is_one_time() {
        let mut auction = auction();
        let buyer = Address::repeat_byte(9);
        assert!(!auction.is_authorized(&buyer, 1_500));

        let purchase = StrategyPayment {
            payer: buyer,
            amount: U256::from(55u64),
            payment_type: PaymentType::NftAccess,
            timestamp: 1_500,
        };
        assert_eq!(
            auction.on_payment(&purchase).unwrap(),
            PaymentEffect::AccessGranted { payer: buyer }
        );
        assert_eq!(auction.on_payment(&purchase).unwrap(), PaymentEffect::None);
        assert!(auction.is_authorized(&buyer, 99_999));
        assert_eq!(
            auction.compute_min_payment(PaymentType::Stream, 1_500).unwrap(),
            U256::ZERO
        );
    }

    #[test]
    fn test_invalid_curves() {
        let table = || RoyaltyTable::sole(Address::ZERO, "artist");
        assert!(DutchAuction::new(U256::from(1u64), U256::from(2u64), 0, 10, table()).is_err());
        assert!(DutchAuction::new(U256::from(2u64), U256::from(1u64), 10, 10, table()).is_err());
        assert!(auction().compute_min_payment(PaymentType::Tip, 0).is_err());
    }
}
