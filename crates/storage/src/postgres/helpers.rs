//! Shared helper functions for PostgreSQL row conversion.

use alloy_primitives::{Address, U256};
use tempo_core::error::{StorageError, StorageResult};
use tempo_core::models::PaymentType;

/// Convert a `Vec<u8>` to a fixed-size 32-byte array.
///
/// Returns an error if the length doesn't match.
pub fn bytes_to_hash32(bytes: Vec<u8>, field_name: &str) -> StorageResult<[u8; 32]> {
    bytes.try_into().map_err(|v: Vec<u8>| {
        StorageError::SerializationError(format!(
            "{} has invalid length: expected 32, got {}",
            field_name,
            v.len()
        ))
    })
}

/// Convert a 20-byte column to an address.
pub fn bytes_to_address(bytes: &[u8], field_name: &str) -> StorageResult<Address> {
    Address::try_from(bytes).map_err(|_| {
        StorageError::SerializationError(format!(
            "{} has invalid length: expected 20, got {}",
            field_name,
            bytes.len()
        ))
    })
}

/// Parse a `NUMERIC(78, 0)` column read back as text.
pub fn parse_numeric(text: &str, field_name: &str) -> StorageResult<U256> {
    U256::from_str_radix(text, 10).map_err(|e| {
        StorageError::SerializationError(format!("{field_name} is not a uint256 ({text}): {e}"))
    })
}

/// Convert a non-negative `BIGINT` column.
pub fn to_u64(value: i64, field_name: &str) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{field_name} is negative: {value}"))
    })
}

/// Convert an unsigned value for a `BIGINT` bind.
pub fn to_i64(value: u64, field_name: &str) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{field_name} overflows BIGINT: {value}"))
    })
}

pub fn parse_payment_type(text: &str) -> StorageResult<PaymentType> {
    text.parse().map_err(StorageError::SerializationError)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test critique: erreurs incluent le nom du champ pour debug
    #[test]
    fn test_error_includes_field_name() {
        let bad_bytes = vec![1u8; 16];
        let err = bytes_to_hash32(bad_bytes, "plays.tx_hash")
            .unwrap_err()
            .to_string();
        assert!(err.contains("plays.tx_hash"));
        assert!(err.contains("expected 32"));

        let err = bytes_to_address(&[1u8; 32], "plays.listener")
            .unwrap_err()
            .to_string();
        assert!(err.contains("expected 20"));
    }

    // Test critique: aucune perte de précision sur les montants uint256
    #[test]
    fn test_numeric_keeps_full_precision() {
        let max = U256::MAX.to_string();
        assert_eq!(parse_numeric(&max, "songs.earnings").unwrap(), U256::MAX);
        assert!(parse_numeric("1.5", "songs.earnings").is_err());
        assert!(parse_numeric("-1", "songs.earnings").is_err());
    }

    #[test]
    fn test_integer_conversions() {
        assert_eq!(to_u64(42, "plays.block_number").unwrap(), 42);
        assert!(to_u64(-1, "plays.block_number").is_err());
        assert!(to_i64(u64::MAX, "plays.block_number").is_err());
        assert_eq!(parse_payment_type("NFT_ACCESS").unwrap(), PaymentType::NftAccess);
    }
}
