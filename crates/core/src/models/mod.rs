//! Domain models representing indexed payment data.
//!
//! These models are storage-agnostic and represent the canonical
//! form of ledger data within the domain layer.

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{StorageError, StorageResult};

// =============================================================================
// 32-byte Hash Types
// =============================================================================

/// Macro to generate 32-byte hash newtypes with common functionality.
///
/// Generates:
/// - `from_hex()` / `to_hex()` - 0x-prefixed hex conversion
/// - `Display`, and serde as a hex string
/// - `From<[u8; 32]>` and `From<B256>` implementations
macro_rules! hash32_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Parse from hex string (with or without 0x prefix).
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// Convert to 0x-prefixed hex string.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// Get the inner bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl From<B256> for $name {
            fn from(word: B256) -> Self {
                Self(word.0)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hash32_newtype!(
    /// 32-byte song identifier, as emitted in the `songId` topic.
    SongId
);

hash32_newtype!(
    /// 32-byte transaction hash.
    TxHash
);

// =============================================================================
// Event Identity
// =============================================================================

/// Identity of a payment log: `(tx_hash, log_index)`.
///
/// Used as the key of play rows, retry items and poison items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub tx_hash: TxHash,
    pub log_index: u64,
}

impl EventKey {
    pub fn new(tx_hash: TxHash, log_index: u64) -> Self {
        Self { tx_hash, log_index }
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.log_index)
    }
}

// =============================================================================
// Payments
// =============================================================================

/// Kind of payment carried by a `PaymentRecorded` log.
///
/// The discriminants are the `uint8` values emitted on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Stream = 0,
    Download = 1,
    Tip = 2,
    Patronage = 3,
    NftAccess = 4,
}

impl PaymentType {
    /// All payment types in on-chain order.
    pub const ALL: [PaymentType; 5] = [
        PaymentType::Stream,
        PaymentType::Download,
        PaymentType::Tip,
        PaymentType::Patronage,
        PaymentType::NftAccess,
    ];

    /// On-chain `uint8` code.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentType::Stream => "STREAM",
            PaymentType::Download => "DOWNLOAD",
            PaymentType::Tip => "TIP",
            PaymentType::Patronage => "PATRONAGE",
            PaymentType::NftAccess => "NFT_ACCESS",
        }
    }
}

impl TryFrom<u8> for PaymentType {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(code as usize).copied().ok_or(code)
    }
}

impl std::str::FromStr for PaymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown payment type: {s}"))
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded `PaymentRecorded` log.
///
/// Amounts are reported by the chain and trusted as-is; `net_amount` is not
/// recomputed from the fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub song_id: SongId,
    pub listener: Address,
    pub gross_amount: U256,
    pub protocol_fee: U256,
    pub net_amount: U256,
    pub payment_type: PaymentType,
    pub tx_hash: TxHash,
    pub log_index: u64,
    pub block_number: u64,
    /// Block timestamp.
    pub timestamp: DateTime<Utc>,
}

impl PaymentEvent {
    /// Identity of this event.
    pub fn key(&self) -> EventKey {
        EventKey::new(self.tx_hash, self.log_index)
    }
}

/// Result of an idempotent ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new play row was created. Song aggregates were bumped iff `song_resolved`.
    Inserted { song_resolved: bool },
    /// The key was already recorded; nothing changed.
    Duplicate,
}

/// Stored view of a written payment event.
#[derive(Debug, Clone)]
pub struct PlayRecord {
    pub id: i64,
    pub event: PaymentEvent,
    /// Resolved `songs` row, `None` when the song hash was unknown at write time.
    pub song_ref: Option<i64>,
    pub indexed_at: DateTime<Utc>,
}

/// Song aggregate maintained by the ledger writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    pub id: i64,
    pub song_hash: SongId,
    pub plays: u64,
    pub earnings: U256,
}

// =============================================================================
// Indexer State
// =============================================================================

/// Last fully processed block for a log source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Source name (checkpoint key).
    pub source: String,
    pub last_block: u64,
    pub updated_at: DateTime<Utc>,
}

/// Event waiting in the in-memory retry queue.
#[derive(Debug, Clone)]
pub struct RetryItem {
    pub event: PaymentEvent,
    /// Last failure message.
    pub reason: String,
    /// Number of failed write attempts so far.
    pub attempts: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

/// Quarantined payment log awaiting administrative replay.
#[derive(Debug, Clone, PartialEq)]
pub struct PoisonItem {
    pub key: EventKey,
    pub block_number: u64,
    pub reason: String,
    /// Failed write attempts; 0 for logs that never decoded.
    pub attempts: u32,
    /// Decoded event, or the raw log when decoding failed.
    pub payload: serde_json::Value,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

impl PoisonItem {
    /// Build a poison item from an exhausted retry item.
    pub fn from_retry(item: &RetryItem) -> StorageResult<Self> {
        let payload = serde_json::to_value(&item.event)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        Ok(Self {
            key: item.event.key(),
            block_number: item.event.block_number,
            reason: item.reason.clone(),
            attempts: item.attempts,
            payload,
            first_failed_at: item.first_failed_at,
            last_failed_at: item.last_failed_at,
        })
    }
}

// =============================================================================
// Strategies
// =============================================================================

/// Per-song strategy selection and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub song_id: SongId,
    /// Registered strategy identifier, e.g. `pay-per-stream-v1`.
    pub strategy_id: String,
    /// Strategy-specific parameters, validated by the strategy factory.
    pub params: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// One payee's share of a net amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub recipient: Address,
    pub amount: U256,
    /// Free-form label (`artist`, `producer`, `platform`...).
    pub role: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex_roundtrip_and_serde() {
        let id = SongId([0xab; 32]);
        let hex = id.to_hex();
        assert!(hex.starts_with("0xabab"));
        assert_eq!(SongId::from_hex(&hex).unwrap(), id);
        assert_eq!(SongId::from_hex(&hex[2..]).unwrap(), id);

        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(hex));
        assert!(TxHash::from_hex("0x1234").is_err());
    }

    #[test]
    fn test_payment_type_table() {
        assert_eq!(PaymentType::try_from(0), Ok(PaymentType::Stream));
        assert_eq!(PaymentType::try_from(4), Ok(PaymentType::NftAccess));
        assert_eq!(PaymentType::try_from(5), Err(5));
        assert_eq!("nft_access".parse::<PaymentType>(), Ok(PaymentType::NftAccess));
        assert_eq!(PaymentType::Tip.as_u8(), 2);
    }

    #[test]
    fn test_event_key_ordering_and_display() {
        let a = EventKey::new(TxHash([1; 32]), 2);
        let b = EventKey::new(TxHash([1; 32]), 10);
        assert!(a < b);
        assert!(a.to_string().ends_with(":2"));
    }
}
