//! Strategy identifiers and their factories.

use std::collections::BTreeMap;

use serde::Serialize;
use tempo_core::error::{DomainError, DomainResult};
use tempo_core::ports::EconomicStrategy;

use crate::strategies::{DutchAuction, DynamicPricing, GiftEconomy, Patronage, PayPerStream};

/// Builds a strategy from its JSON parameters, validating them.
pub type StrategyFactory = fn(&serde_json::Value) -> DomainResult<Box<dyn EconomicStrategy>>;

/// Static metadata about a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub supports_free_listening: bool,
    pub supports_tips: bool,
    pub supports_subscriptions: bool,
}

/// Registry of available strategies, keyed by identifier.
pub struct StrategyRegistry {
    entries: BTreeMap<&'static str, (StrategyDescriptor, StrategyFactory)>,
}

impl StrategyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registry with every built-in strategy.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(PayPerStream::descriptor(), PayPerStream::build);
        registry.register(Patronage::descriptor(), Patronage::build);
        registry.register(GiftEconomy::descriptor(), GiftEconomy::build);
        registry.register(DutchAuction::descriptor(), DutchAuction::build);
        registry.register(DynamicPricing::descriptor(), DynamicPricing::build);
        registry
    }

    /// Register (or replace) a strategy.
    pub fn register(&mut self, descriptor: StrategyDescriptor, factory: StrategyFactory) {
        self.entries.insert(descriptor.id, (descriptor, factory));
    }

    pub fn contains(&self, strategy_id: &str) -> bool {
        self.entries.contains_key(strategy_id)
    }

    /// Descriptors ordered by identifier.
    pub fn descriptors(&self) -> impl Iterator<Item = &StrategyDescriptor> {
        self.entries.values().map(|(descriptor, _)| descriptor)
    }

    /// Instantiate a strategy.
    pub fn build(
        &self,
        strategy_id: &str,
        params: &serde_json::Value,
    ) -> DomainResult<Box<dyn EconomicStrategy>> {
        let (_, factory) = self
            .entries
            .get(strategy_id)
            .ok_or_else(|| DomainError::StrategyNotFound(strategy_id.to_string()))?;
        factory(params)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use tempo_core::models::{PaymentType, Split};
    use tempo_core::ports::{PaymentEffect, StrategyPayment};

    struct FreeForAll;

    impl EconomicStrategy for FreeForAll {
        fn strategy_id(&self) -> &'static str {
            "free-v1"
        }
        fn compute_min_payment(&self, _: PaymentType, _: u64) -> DomainResult<U256> {
            Ok(U256::ZERO)
        }
        fn is_authorized(&self, _: &Address, _: u64) -> bool {
            true
        }
        fn compute_splits(&self, _: U256) -> Vec<Split> {
            Vec::new()
        }
        fn on_payment(&mut self, _: &StrategyPayment) -> DomainResult<PaymentEffect> {
            Ok(PaymentEffect::None)
        }
    }

    #[test]
    fn test_defaults_registered() {
        let registry = StrategyRegistry::with_defaults();
        let ids: Vec<&str> = registry.descriptors().map(|d| d.id).collect();
        assert_eq!(
            ids,
            vec![
                "dutch-auction-v1",
                "dynamic-pricing-v1",
                "gift-economy-v1",
                "patronage-v1",
                "pay-per-stream-v1",
            ]
        );
    }

    #[test]
    fn test_unknown_strategy() {
        let registry = StrategyRegistry::with_defaults();
        let err = registry.build("nope-v1", &serde_json::Value::Null).err().unwrap();
        assert!(matches!(err, DomainError::StrategyNotFound(id) if id == "nope-v1"));
    }

    #[test]
    fn test_custom_factory() {
        let mut registry = StrategyRegistry::new();
        registry.register(
            StrategyDescriptor {
                id: "free-v1",
                name: "Free",
                description: "Everything is free.",
                supports_free_listening: true,
                supports_tips: false,
                supports_subscriptions: false,
            },
            |_| Ok(Box::new(FreeForAll)),
        );
        let strategy = registry.build("free-v1", &serde_json::Value::Null).unwrap();
        assert_eq!(strategy.strategy_id(), "free-v1");
    }
}
