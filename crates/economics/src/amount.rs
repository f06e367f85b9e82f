//! Integer amount helpers.
//!
//! Amounts are `U256` base units. Parameters accept either a JSON number
//! or a decimal / `0x` hex string so values above `u64::MAX` survive JSON.

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serializer};
use tempo_core::ports::BPS_DENOMINATOR;

/// Parse a decimal or `0x`-prefixed hex amount.
pub fn parse_amount(s: &str) -> Result<U256, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(s, 10),
    };
    parsed.map_err(|e| format!("invalid amount {s:?}: {e}"))
}

/// `floor(amount * bps / 10000)` without intermediate overflow.
pub fn apply_bps(amount: U256, bps: u64) -> U256 {
    let denominator = U256::from(BPS_DENOMINATOR);
    let bps = U256::from(bps);
    (amount / denominator) * bps + (amount % denominator) * bps / denominator
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AmountRepr {
    Number(u64),
    Text(String),
}

/// Serde adapter for `U256` parameter fields.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    match AmountRepr::deserialize(deserializer)? {
        AmountRepr::Number(n) => Ok(U256::from(n)),
        AmountRepr::Text(s) => parse_amount(&s).map_err(serde::de::Error::custom),
    }
}

/// Serialize as a decimal string.
pub fn serialize<S: Serializer>(amount: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&amount.to_string())
}
