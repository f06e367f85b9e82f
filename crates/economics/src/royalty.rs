//! Static basis-point royalty tables.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tempo_core::error::{DomainError, DomainResult};
use tempo_core::models::Split;
use tempo_core::ports::BPS_DENOMINATOR;

use crate::amount::apply_bps;

fn default_role() -> String {
    "artist".to_string()
}

/// One row of a royalty table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoyaltyShare {
    pub recipient: Address,
    /// Share in basis points.
    pub bps: u16,
    #[serde(default = "default_role")]
    pub role: String,
}

/// Royalty table whose shares sum to exactly 10000 bp.
///
/// Validated once at configuration time. The first row receives the
/// rounding remainder of every split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoyaltyTable {
    shares: Vec<RoyaltyShare>,
}

impl RoyaltyTable {
    pub fn new(shares: Vec<RoyaltyShare>) -> DomainResult<Self> {
        if shares.is_empty() {
            return Err(DomainError::ValidationError(
                "royalty table is empty".into(),
            ));
        }
        if let Some(share) = shares.iter().find(|s| s.bps == 0) {
            return Err(DomainError::ValidationError(format!(
                "royalty share for {} is zero",
                share.recipient
            )));
        }

        let total: u64 = shares.iter().map(|s| u64::from(s.bps)).sum();
        if total != BPS_DENOMINATOR {
            return Err(DomainError::ValidationError(format!(
                "royalty shares sum to {total} bp, expected {BPS_DENOMINATOR}"
            )));
        }

        Ok(Self { shares })
    }

    /// Single-recipient table.
    pub fn sole(recipient: Address, role: &str) -> Self {
        Self {
            shares: vec![RoyaltyShare {
                recipient,
                bps: BPS_DENOMINATOR as u16,
                role: role.to_string(),
            }],
        }
    }

    pub fn shares(&self) -> &[RoyaltyShare] {
        &self.shares
    }

    /// Split `amount`; the shares always sum to `amount`.
    pub fn split(&self, amount: U256) -> Vec<Split> {
        let mut splits: Vec<Split> = self
            .shares
            .iter()
            .map(|share| Split {
                recipient: share.recipient,
                amount: apply_bps(amount, u64::from(share.bps)),
                role: share.role.clone(),
            })
            .collect();

        let distributed = splits.iter().fold(U256::ZERO, |acc, s| acc + s.amount);
        if let Some(first) = splits.first_mut() {
            first.amount += amount - distributed;
        }
        splits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(byte: u8, bps: u16, role: &str) -> RoyaltyShare {
        RoyaltyShare {
            recipient: Address::repeat_byte(byte),
            bps,
            role: role.to_string(),
        }
    }

    fn standard() -> RoyaltyTable {
        RoyaltyTable::new(vec![
            share(1, 6000, "artist"),
            share(2, 3000, "producer"),
            share(3, 1000, "platform"),
        ])
        .unwrap()
    }

    // Test critique: [6000, 3000, 1000] sur 100 -> [60, 30, 10]
    #[test]
    fn test_split_exact() {
        let amounts: Vec<U256> = standard()
            .split(U256::from(100u64))
            .into_iter()
            .map(|s| s.amount)
            .collect();
        assert_eq!(
            amounts,
            vec![U256::from(60u64), U256::from(30u64), U256::from(10u64)]
        );
    }

    #[test]
    fn test_remainder_goes_to_first_entry() {
        let splits = standard().split(U256::from(7u64));
        // 7*30% = 2.1 -> 2, 7*10% = 0.7 -> 0, artist gets the rest
        assert_eq!(splits[0].amount, U256::from(5u64));
        assert_eq!(splits[1].amount, U256::from(2u64));
        assert_eq!(splits[2].amount, U256::ZERO);
        assert_eq!(splits[0].role, "artist");
    }

    #[test]
    fn test_validation() {
        assert!(RoyaltyTable::new(vec![]).is_err());
        assert!(RoyaltyTable::new(vec![share(1, 6000, "artist"), share(2, 3000, "producer")]).is_err());
        assert!(RoyaltyTable::new(vec![share(1, 10_000, "artist"), share(2, 0, "producer")]).is_err());
        assert!(RoyaltyTable::new(vec![share(1, 10_000, "artist")]).is_ok());
    }

    #[test]
    fn test_role_defaults_to_artist() {
        let share: RoyaltyShare = serde_json::from_value(serde_json::json!({
            "recipient": "0x0101010101010101010101010101010101010101",
            "bps": 10000
        }))
        .unwrap();
        assert_eq!(share.role, "artist");
    }
}
