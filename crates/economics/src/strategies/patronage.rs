//! Recurring patronage: patrons stream for free while their subscription is current.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use serde::Deserialize;
use tempo_core::error::DomainResult;
use tempo_core::models::{PaymentType, Split};
use tempo_core::ports::{EconomicStrategy, PaymentEffect, StrategyPayment};

use super::{invalid, parse_params, unsupported};
use crate::registry::StrategyDescriptor;
use crate::royalty::RoyaltyTable;

pub const ID: &str = "patronage-v1";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    artist: Address,
    #[serde(with = "crate::amount")]
    subscription_fee: U256,
    cycle_length_secs: u64,
    #[serde(default)]
    grace_period_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Patronage {
    payout: RoyaltyTable,
    subscription_fee: U256,
    cycle_length_secs: u64,
    grace_period_secs: u64,
    /// Last subscription payment per patron, unix seconds.
    last_payment: HashMap<Address, u64>,
}

impl Patronage {
    pub fn new(
        artist: Address,
        subscription_fee: U256,
        cycle_length_secs: u64,
        grace_period_secs: u64,
    ) -> Self {
        Self {
            payout: RoyaltyTable::sole(artist, "artist"),
            subscription_fee,
            cycle_length_secs,
            grace_period_secs,
            last_payment: HashMap::new(),
        }
    }

    pub fn descriptor() -> StrategyDescriptor {
        StrategyDescriptor {
            id: ID,
            name: "Patronage",
            description: "Recurring support from patrons, who listen for free while their subscription is current.",
            supports_free_listening: true,
            supports_tips: false,
            supports_subscriptions: true,
        }
    }

    pub fn build(params: &serde_json::Value) -> DomainResult<Box<dyn EconomicStrategy>> {
        let params: Params = parse_params(ID, params)?;
        if params.cycle_length_secs == 0 {
            return Err(invalid(ID, "cycle_length_secs must be > 0"));
        }
        if params.subscription_fee.is_zero() {
            return Err(invalid(ID, "subscription_fee must be > 0"));
        }
        Ok(Box::new(Self::new(
            params.artist,
            params.subscription_fee,
            params.cycle_length_secs,
            params.grace_period_secs,
        )))
    }

    /// First instant at which `payer` is no longer authorized.
    pub fn access_ends_at(&self, payer: &Address) -> Option<u64> {
        self.last_payment.get(payer).map(|paid| {
            paid.saturating_add(self.cycle_length_secs)
                .saturating_add(self.grace_period_secs)
        })
    }
}

impl EconomicStrategy for Patronage {
    fn strategy_id(&self) -> &'static str {
        ID
    }

    fn compute_min_payment(&self, payment_type: PaymentType, _now: u64) -> DomainResult<U256> {
        match payment_type {
            PaymentType::Stream => Ok(U256::ZERO),
            PaymentType::Patronage => Ok(self.subscription_fee),
            other => Err(unsupported(ID, other)),
        }
    }

    fn is_authorized(&self, payer: &Address, now: u64) -> bool {
        self.access_ends_at(payer).is_some_and(|ends| now < ends)
    }

    fn compute_splits(&self, amount: U256) -> Vec<Split> {
        self.payout.split(amount)
    }

    fn on_payment(&mut self, payment: &StrategyPayment) -> DomainResult<PaymentEffect> {
        if payment.payment_type != PaymentType::Patronage {
            return Ok(PaymentEffect::None);
        }
        // Payments may be observed out of order; keep the latest.
        let paid = *self
            .last_payment
            .entry(payment.payer)
            .and_modify(|last| *last = (*last).max(payment.timestamp))
            .or_insert(payment.timestamp);
        Ok(PaymentEffect::SubscriptionRenewed {
            payer: payment.payer,
            paid_through: paid.saturating_add(self.cycle_length_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATRON: Address = Address::repeat_byte(0x42);

    fn subscribed_at(ts: u64) -> Patronage {
        let mut strategy = Patronage::new(Address::repeat_byte(1), U256::from(500u64), 100, 10);
        strategy
            .on_payment(&StrategyPayment {
                payer: PATRON,
                amount: U256::from(495u64),
                payment_type: PaymentType::Patronage,
                timestamp: ts,
            })
            .unwrap();
        strategy
    }

    // Test critique: autorisé strictement avant lastPayment + cycle + grace
    #[test]
    fn test_authorization_window_boundary() {
        let strategy = subscribed_at(1_000);
        assert!(strategy.is_authorized(&PATRON, 1_000));
        assert!(strategy.is_authorized(&PATRON, 1_109));
        assert!(!strategy.is_authorized(&PATRON, 1_110));
        assert!(!strategy.is_authorized(&PATRON, 5_000));
        assert!(!strategy.is_authorized(&Address::ZERO, 1_000));
    }

    #[test]
    fn test_renewal_extends_window() {
        let mut strategy = subscribed_at(1_000);
        let effect = strategy
            .on_payment(&StrategyPayment {
                payer: PATRON,
                amount: U256::from(495u64),
                payment_type: PaymentType::Patronage,
                timestamp: 1_105,
            })
            .unwrap();
        assert_eq!(
            effect,
            PaymentEffect::SubscriptionRenewed {
                payer: PATRON,
                paid_through: 1_205
            }
        );
        assert!(strategy.is_authorized(&PATRON, 1_200));
    }

    #[test]
    fn test_older_payment_does_not_shorten_subscription() {
        let mut strategy = subscribed_at(2_000);
        let effect = strategy
            .on_payment(&StrategyPayment {
                payer: PATRON,
                amount: U256::from(495u64),
                payment_type: PaymentType::Patronage,
                timestamp: 1_000,
            })
            .unwrap();
        assert_eq!(
            effect,
            PaymentEffect::SubscriptionRenewed {
                payer: PATRON,
                paid_through: 2_100
            }
        );
        assert!(strategy.is_authorized(&PATRON, 2_050));
        assert_eq!(strategy.access_ends_at(&PATRON), Some(2_110));
    }

    #[test]
    fn test_streams_do_not_renew_and_splits_go_to_artist() {
        let mut strategy = subscribed_at(1_000);
        let effect = strategy
            .on_payment(&StrategyPayment {
                payer: PATRON,
                amount: U256::ZERO,
                payment_type: PaymentType::Stream,
                timestamp: 1_050,
            })
            .unwrap();
        assert_eq!(effect, PaymentEffect::None);
        assert_eq!(strategy.access_ends_at(&PATRON), Some(1_110));

        let splits = strategy.compute_splits(U256::from(495u64));
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].recipient, Address::repeat_byte(1));
        assert_eq!(splits[0].amount, U256::from(495u64));
    }

    #[test]
    fn test_min_payment_table() {
        let strategy = subscribed_at(0);
        assert_eq!(strategy.compute_min_payment(PaymentType::Stream, 0).unwrap(), U256::ZERO);
        assert_eq!(
            strategy.compute_min_payment(PaymentType::Patronage, 0).unwrap(),
            U256::from(500u64)
        );
        assert!(strategy.compute_min_payment(PaymentType::Tip, 0).is_err());
    }

    #[test]
    fn test_build_rejects_zero_cycle() {
        let params = serde_json::json!({
            "artist": "0x0101010101010101010101010101010101010101",
            "subscription_fee": 500,
            "cycle_length_secs": 0
        });
        assert!(Patronage::build(&params).is_err());
    }
}
