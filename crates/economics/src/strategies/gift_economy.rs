//! Free listening with listener rewards and optional tips.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use serde::Deserialize;
use tempo_core::error::DomainResult;
use tempo_core::models::{PaymentType, Split};
use tempo_core::ports::{BPS_DENOMINATOR, EconomicStrategy, PaymentEffect, StrategyPayment};

use super::{invalid, parse_params, unsupported};
use crate::amount::apply_bps;
use crate::registry::StrategyDescriptor;
use crate::royalty::{RoyaltyShare, RoyaltyTable};

pub const ID: &str = "gift-economy-v1";

/// Songs with fewer unique listeners than this pay the early-listener bonus.
pub const EARLY_LISTENER_THRESHOLD: usize = 100;

/// Listeners with more plays than this get the repeat multiplier.
pub const REPEAT_LISTENER_THRESHOLD: u64 = 10;

fn no_multiplier() -> u64 {
    BPS_DENOMINATOR
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    artist: Address,
    #[serde(with = "crate::amount")]
    base_reward: U256,
    #[serde(default, with = "crate::amount")]
    early_listener_bonus: U256,
    #[serde(default = "no_multiplier")]
    repeat_multiplier_bps: u64,
    #[serde(default, with = "crate::amount")]
    min_tip: U256,
    #[serde(default)]
    tip_royalties: Option<Vec<RoyaltyShare>>,
}

#[derive(Debug, Clone)]
pub struct GiftEconomy {
    base_reward: U256,
    early_listener_bonus: U256,
    repeat_multiplier_bps: u64,
    min_tip: U256,
    tip_royalties: RoyaltyTable,
    /// Free plays per listener.
    listener_plays: HashMap<Address, u64>,
}

impl GiftEconomy {
    pub fn descriptor() -> StrategyDescriptor {
        StrategyDescriptor {
            id: ID,
            name: "Gift Economy",
            description: "Free listening rewarded with listener credits. Optional tips to the artist.",
            supports_free_listening: true,
            supports_tips: true,
            supports_subscriptions: false,
        }
    }

    pub fn build(params: &serde_json::Value) -> DomainResult<Box<dyn EconomicStrategy>> {
        let params: Params = parse_params(ID, params)?;
        if params.repeat_multiplier_bps < BPS_DENOMINATOR {
            return Err(invalid(ID, "repeat_multiplier_bps must be >= 10000"));
        }
        let tip_royalties = match params.tip_royalties {
            Some(shares) => RoyaltyTable::new(shares)?,
            None => RoyaltyTable::sole(params.artist, "artist"),
        };
        Ok(Box::new(Self {
            base_reward: params.base_reward,
            early_listener_bonus: params.early_listener_bonus,
            repeat_multiplier_bps: params.repeat_multiplier_bps,
            min_tip: params.min_tip,
            tip_royalties,
            listener_plays: HashMap::new(),
        }))
    }

    pub fn unique_listeners(&self) -> usize {
        self.listener_plays.len()
    }

    /// Count a free play and compute its reward.
    fn reward_play(&mut self, listener: Address) -> U256 {
        let listeners_before = self.listener_plays.len();
        let plays = self.listener_plays.entry(listener).or_insert(0);
        *plays += 1;

        let mut reward = self.base_reward;
        if listeners_before < EARLY_LISTENER_THRESHOLD {
            reward += self.early_listener_bonus;
        }
        if *plays > REPEAT_LISTENER_THRESHOLD {
            reward = apply_bps(reward, self.repeat_multiplier_bps);
        }
        reward
    }
}

impl EconomicStrategy for GiftEconomy {
    fn strategy_id(&self) -> &'static str {
        ID
    }

    fn compute_min_payment(&self, payment_type: PaymentType, _now: u64) -> DomainResult<U256> {
        match payment_type {
            PaymentType::Stream => Ok(U256::ZERO),
            PaymentType::Tip => Ok(self.min_tip),
            other => Err(unsupported(ID, other)),
        }
    }

    fn is_authorized(&self, _payer: &Address, _now: u64) -> bool {
        true
    }

    fn compute_splits(&self, amount: U256) -> Vec<Split> {
        self.tip_royalties.split(amount)
    }

    fn on_payment(&mut self, payment: &StrategyPayment) -> DomainResult<PaymentEffect> {
        match payment.payment_type {
            PaymentType::Stream if payment.amount.is_zero() => {
                let amount = self.reward_play(payment.payer);
                Ok(PaymentEffect::RewardCredited {
                    listener: payment.payer,
                    amount,
                })
            }
            _ => Ok(PaymentEffect::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strategy() -> GiftEconomy {
        let params = json!({
            "artist": "0x0101010101010101010101010101010101010101",
            "base_reward": 100,
            "early_listener_bonus": 50,
            "repeat_multiplier_bps": 15000,
            "min_tip": 1000
        });
        let params: Params = parse_params(ID, &params).unwrap();
        GiftEconomy {
            base_reward: params.base_reward,
            early_listener_bonus: params.early_listener_bonus,
            repeat_multiplier_bps: params.repeat_multiplier_bps,
            min_tip: params.min_tip,
            tip_royalties: RoyaltyTable::sole(params.artist, "artist"),
            listener_plays: HashMap::new(),
        }
    }

    fn free_play(strategy: &mut GiftEconomy, listener: Address) -> U256 {
        match strategy
            .on_payment(&StrategyPayment {
                payer: listener,
                amount: U256::ZERO,
                payment_type: PaymentType::Stream,
                timestamp: 0,
            })
            .unwrap()
        {
            PaymentEffect::RewardCredited { amount, .. } => amount,
            other => panic!("expected reward, got {other:?}"),
        }
    }

    fn listener(n: u64) -> Address {
        Address::left_padding_from(&n.to_be_bytes())
    }

    #[test]
    fn test_early_listener_bonus_until_threshold() {
        let mut gift = strategy();
        for n in 0..EARLY_LISTENER_THRESHOLD as u64 {
            assert_eq!(free_play(&mut gift, listener(n)), U256::from(150u64));
        }
        assert_eq!(gift.unique_listeners(), EARLY_LISTENER_THRESHOLD);
        assert_eq!(free_play(&mut gift, listener(1_000)), U256::from(100u64));
    }

    #[test]
    fn test_repeat_multiplier_after_threshold() {
        let mut gift = strategy();
        let fan = listener(7);
        for _ in 0..REPEAT_LISTENER_THRESHOLD {
            assert_eq!(free_play(&mut gift, fan), U256::from(150u64));
        }
        // 11th play: (100 + 50) * 1.5
        assert_eq!(free_play(&mut gift, fan), U256::from(225u64));
    }

    #[test]
    fn test_tips_use_separate_table_and_minimum() {
        let mut gift = strategy();
        assert_eq!(
            gift.compute_min_payment(PaymentType::Tip, 0).unwrap(),
            U256::from(1000u64)
        );
        assert!(gift.compute_min_payment(PaymentType::Download, 0).is_err());

        let effect = gift
            .on_payment(&StrategyPayment {
                payer: listener(1),
                amount: U256::from(2000u64),
                payment_type: PaymentType::Tip,
                timestamp: 0,
            })
            .unwrap();
        assert_eq!(effect, PaymentEffect::None);
        assert_eq!(gift.unique_listeners(), 0);
        assert_eq!(gift.compute_splits(U256::from(2000u64))[0].amount, U256::from(2000u64));
    }

    #[test]
    fn test_build_validates_multiplier() {
        let params = json!({
            "artist": "0x0101010101010101010101010101010101010101",
            "base_reward": 100,
            "repeat_multiplier_bps": 5000
        });
        assert!(GiftEconomy::build(&params).is_err());
    }
}
