//! Popularity-driven pricing with time-of-day discounts.
//!
//! The price only moves on refresh, at most once per `refresh_interval_secs`,
//! and never decreases.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tempo_core::error::DomainResult;
use tempo_core::models::{PaymentType, Split};
use tempo_core::ports::{BPS_DENOMINATOR, EconomicStrategy, PaymentEffect, StrategyPayment};

use super::{invalid, parse_params, unsupported};
use crate::amount::apply_bps;
use crate::registry::StrategyDescriptor;
use crate::royalty::{RoyaltyShare, RoyaltyTable};

pub const ID: &str = "dynamic-pricing-v1";

const SECS_PER_DAY: u64 = 86_400;
const SECS_PER_HOUR: u64 = 3_600;

/// UTC hour range `[start_hour, end_hour)`, wrapping past midnight when
/// `start_hour > end_hour`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscountWindow {
    pub start_hour: u8,
    pub end_hour: u8,
    pub discount_bps: u16,
}

impl DiscountWindow {
    fn contains(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            (self.start_hour..self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    #[serde(with = "crate::amount")]
    base_price: U256,
    #[serde(default, with = "crate::amount")]
    step_price: U256,
    plays_per_step: u64,
    #[serde(with = "crate::amount")]
    max_price: U256,
    refresh_interval_secs: u64,
    #[serde(default)]
    discount_windows: Vec<DiscountWindow>,
    royalties: Vec<RoyaltyShare>,
}

#[derive(Debug, Clone)]
pub struct DynamicPricing {
    base_price: U256,
    step_price: U256,
    plays_per_step: u64,
    max_price: U256,
    refresh_interval_secs: u64,
    discount_windows: Vec<DiscountWindow>,
    royalties: RoyaltyTable,
    plays: u64,
    current_price: U256,
    last_refresh: Option<u64>,
}

impl DynamicPricing {
    pub fn descriptor() -> StrategyDescriptor {
        StrategyDescriptor {
            id: ID,
            name: "Dynamic Pricing",
            description: "Per-stream price grows with cumulative plays, with optional off-peak discounts.",
            supports_free_listening: false,
            supports_tips: true,
            supports_subscriptions: false,
        }
    }

    pub fn build(params: &serde_json::Value) -> DomainResult<Box<dyn EconomicStrategy>> {
        let params: Params = parse_params(ID, params)?;
        if params.plays_per_step == 0 {
            return Err(invalid(ID, "plays_per_step must be > 0"));
        }
        if params.max_price < params.base_price {
            return Err(invalid(ID, "max_price must be >= base_price"));
        }
        for window in &params.discount_windows {
            if window.start_hour > 23 || window.end_hour > 23 || window.start_hour == window.end_hour {
                return Err(invalid(ID, format!("invalid discount window {window:?}")));
            }
            if u64::from(window.discount_bps) > BPS_DENOMINATOR {
                return Err(invalid(ID, "discount_bps must be <= 10000"));
            }
        }
        let royalties = RoyaltyTable::new(params.royalties)?;

        Ok(Box::new(Self {
            base_price: params.base_price,
            step_price: params.step_price,
            plays_per_step: params.plays_per_step,
            max_price: params.max_price,
            refresh_interval_secs: params.refresh_interval_secs,
            discount_windows: params.discount_windows,
            royalties,
            plays: 0,
            current_price: params.base_price,
            last_refresh: None,
        }))
    }

    /// `min(max_price, base_price + step_price * floor(plays / plays_per_step))`.
    pub fn price_for(&self, plays: u64) -> U256 {
        let steps = U256::from(plays / self.plays_per_step);
        let price = self
            .base_price
            .saturating_add(self.step_price.saturating_mul(steps));
        price.min(self.max_price)
    }

    /// Price in effect before any discount.
    pub fn current_price(&self) -> U256 {
        self.current_price
    }

    pub fn plays(&self) -> u64 {
        self.plays
    }

    fn discount_at(&self, now: u64) -> u64 {
        let hour = ((now % SECS_PER_DAY) / SECS_PER_HOUR) as u8;
        self.discount_windows
            .iter()
            .filter(|w| w.contains(hour))
            .map(|w| u64::from(w.discount_bps))
            .max()
            .unwrap_or(0)
    }

    fn refresh_due(&self, now: u64) -> bool {
        self.last_refresh
            .is_none_or(|at| now >= at.saturating_add(self.refresh_interval_secs))
    }
}

impl EconomicStrategy for DynamicPricing {
    fn strategy_id(&self) -> &'static str {
        ID
    }

    fn compute_min_payment(&self, payment_type: PaymentType, now: u64) -> DomainResult<U256> {
        match payment_type {
            PaymentType::Stream | PaymentType::Download => {
                let price = self.current_price;
                Ok(price - apply_bps(price, self.discount_at(now)))
            }
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

    fn on_payment(&mut self, payment: &StrategyPayment) -> DomainResult<PaymentEffect> {
        if !matches!(
            payment.payment_type,
            PaymentType::Stream | PaymentType::Download
        ) {
            return Ok(PaymentEffect::None);
        }

        self.plays += 1;
        if !self.refresh_due(payment.timestamp) {
            return Ok(PaymentEffect::None);
        }

        self.current_price = self.current_price.max(self.price_for(self.plays));
        self.last_refresh = Some(payment.timestamp);
        Ok(PaymentEffect::PriceRefreshed {
            price: self.current_price,
        })
    }
}
