//! `PaymentRecorded` log decoding.

use alloy_primitives::B256;
use alloy_sol_types::{SolEvent, sol};
use chrono::DateTime;

use crate::error::DecodeError;
use crate::models::{PaymentEvent, PaymentType, SongId};
use crate::ports::RawLog;

sol! {
    /// Emitted by the payment router once per processed payment.
    event PaymentRecorded(
        bytes32 indexed songId,
        address indexed listener,
        uint256 grossAmount,
        uint256 protocolFee,
        uint256 netAmount,
        uint8 paymentType
    );
}

/// Topic 0 of `PaymentRecorded`.
pub fn payment_topic() -> B256 {
    PaymentRecorded::SIGNATURE_HASH
}

/// Decode one raw log into a [`PaymentEvent`].
///
/// Failures are per-log and deterministic.
pub fn decode_payment(log: &RawLog) -> Result<PaymentEvent, DecodeError> {
    match log.topics.first() {
        Some(topic) if *topic == PaymentRecorded::SIGNATURE_HASH => {}
        Some(topic) => return Err(DecodeError::UnexpectedTopic(topic.to_string())),
        None => return Err(DecodeError::UnexpectedTopic("<none>".into())),
    }

    let decoded = PaymentRecorded::decode_raw_log(log.topics.iter().copied(), &log.data)
        .map_err(|e| DecodeError::Abi(e.to_string()))?;

    let payment_type =
        PaymentType::try_from(decoded.paymentType).map_err(DecodeError::UnknownPaymentType)?;

    let timestamp = log
        .block_timestamp
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or(DecodeError::MissingField("block_timestamp"))?;

    Ok(PaymentEvent {
        song_id: SongId::from(decoded.songId),
        listener: decoded.listener,
        gross_amount: decoded.grossAmount,
        protocol_fee: decoded.protocolFee,
        net_amount: decoded.netAmount,
        payment_type,
        tx_hash: log.tx_hash,
        log_index: log.log_index,
        block_number: log.block_number,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TxHash;
    use crate::testing::payment_log;
    use alloy_primitives::{Address, Bytes, U256};

    fn song() -> SongId {
        SongId([7; 32])
    }

    #[test]
    fn test_decode_preserves_full_precision() {
        let gross = U256::MAX - U256::from(1u8);
        let mut log = payment_log(song(), Address::repeat_byte(1), gross, 1, TxHash([1; 32]), 0);
        log.block_number = 42;

        let event = decode_payment(&log).unwrap();
        assert_eq!(event.gross_amount, gross);
        assert_eq!(event.song_id, song());
        assert_eq!(event.listener, Address::repeat_byte(1));
        assert_eq!(event.payment_type, PaymentType::Download);
        assert_eq!(event.block_number, 42);
    }

    #[test]
    fn test_unknown_payment_type_fails_only_that_log() {
        let bad = payment_log(song(), Address::ZERO, U256::from(10u8), 9, TxHash([1; 32]), 0);
        let good = payment_log(song(), Address::ZERO, U256::from(10u8), 0, TxHash([1; 32]), 1);

        assert_eq!(decode_payment(&bad), Err(DecodeError::UnknownPaymentType(9)));
        assert!(decode_payment(&good).is_ok());
    }

    #[test]
    fn test_wrong_topic_and_truncated_data() {
        let mut log = payment_log(song(), Address::ZERO, U256::from(1u8), 0, TxHash([2; 32]), 0);
        log.data = Bytes::from(log.data[..32].to_vec());
        assert!(matches!(decode_payment(&log), Err(DecodeError::Abi(_))));

        log.topics[0] = B256::repeat_byte(0xee);
        assert!(matches!(decode_payment(&log), Err(DecodeError::UnexpectedTopic(_))));

        log.topics.clear();
        assert!(matches!(decode_payment(&log), Err(DecodeError::UnexpectedTopic(_))));
    }

    #[test]
    fn test_missing_timestamp() {
        let mut log = payment_log(song(), Address::ZERO, U256::from(1u8), 0, TxHash([3; 32]), 0);
        log.block_timestamp = None;
        assert_eq!(
            decode_payment(&log),
            Err(DecodeError::MissingField("block_timestamp"))
        );
    }
}
