//! Characteristic payload decoding.
//!
//! The sensor tag reports each value as a 3-byte frame:
//!
//! | Byte | Meaning                      |
//! |------|------------------------------|
//! | 0    | Status / reserved            |
//! | 1    | Value, low byte              |
//! | 2    | Value, high byte             |
//!
//! The value is `((byte[2] << 8) | byte[1]) / 100`. The packing is fixed by
//! the firmware and has not been confirmed against every firmware revision;
//! keep it bit-for-bit.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::data::characteristic::{CharacteristicSpec, PayloadEncoding};
use crate::data::reading::Reading;
use crate::error::DecodeError;

/// Size of a sensor value frame in bytes.
pub const FRAME_SIZE: usize = 3;

/// Divisor applied to the raw 16-bit composite.
pub const VALUE_DIVISOR: f64 = 100.0;

/// Decode the raw value of a status-prefixed, hundredths-scaled frame.
///
/// Trailing bytes beyond the frame are ignored.
pub fn decode_centi_value(payload: &[u8]) -> Result<f64, DecodeError> {
    if payload.len() < FRAME_SIZE {
        return Err(DecodeError::InsufficientLength {
            expected: FRAME_SIZE,
            actual: payload.len(),
        });
    }

    let raw = ((payload[2] as u16) << 8) | payload[1] as u16;
    Ok(raw as f64 / VALUE_DIVISOR)
}

/// Decode a payload according to a characteristic spec.
pub fn decode_reading(
    payload: &[u8],
    spec: &CharacteristicSpec,
    captured_at: DateTime<Utc>,
) -> Result<Reading, DecodeError> {
    let value = match spec.encoding {
        PayloadEncoding::StatusPrefixedCentiU16 => decode_centi_value(payload)?,
    };
    Ok(Reading::new(value, spec.unit, captured_at))
}

/// Decode a base64 characteristic value as delivered by bridged transports.
pub fn decode_base64_payload(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| DecodeError::InvalidEncoding {
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::reading::Unit;
    use proptest::prelude::*;

    #[test]
    fn test_decode_documented_example() {
        let value = decode_centi_value(&[0x00, 0x98, 0x09]).unwrap();
        assert!((value - 24.56).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decode_2536() {
        // 2536 = 0x09E8
        let value = decode_centi_value(&[0x00, 0xE8, 0x09]).unwrap();
        assert_eq!(value, 2536.0 / 100.0);
    }

    #[test]
    fn test_status_byte_ignored() {
        let a = decode_centi_value(&[0x00, 0x10, 0x02]).unwrap();
        let b = decode_centi_value(&[0xFF, 0x10, 0x02]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_byte_order_not_swapped() {
        // Big-endian interpretation of bytes 1..2 would give 0x0102 = 258.
        let value = decode_centi_value(&[0x00, 0x01, 0x02]).unwrap();
        assert_eq!(value, 513.0 / 100.0);
    }

    #[test]
    fn test_short_payload_rejected() {
        for len in 0..FRAME_SIZE {
            let payload = vec![0u8; len];
            assert_eq!(
                decode_centi_value(&payload),
                Err(DecodeError::InsufficientLength {
                    expected: 3,
                    actual: len
                })
            );
        }
    }

    #[test]
    fn test_decode_reading_uses_spec_unit() {
        let now = Utc::now();
        let reading = decode_reading(&[0x00, 0x98, 0x09], &CharacteristicSpec::humidity(), now)
            .unwrap();
        assert_eq!(reading.unit, Unit::RelativeHumidity);
        assert_eq!(reading.captured_at, now);
        assert!((reading.value - 24.56).abs() < f64::EPSILON);
    }

    #[test]
    fn test_base64_payload() {
        // [0x00, 0x98, 0x09]
        assert_eq!(decode_base64_payload("AJgJ").unwrap(), vec![0x00, 0x98, 0x09]);
        assert!(matches!(
            decode_base64_payload("not base64!"),
            Err(DecodeError::InvalidEncoding { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_value_matches_composite(status: u8, lo: u8, hi: u8) {
            let value = decode_centi_value(&[status, lo, hi]).unwrap();
            let expected = (((hi as u16) << 8) | lo as u16) as f64 / 100.0;
            prop_assert_eq!(value, expected);
        }

        #[test]
        fn prop_short_payloads_fail(payload in proptest::collection::vec(any::<u8>(), 0..3)) {
            let is_short = matches!(
                decode_centi_value(&payload),
                Err(DecodeError::InsufficientLength { .. })
            );
            prop_assert!(is_short);
        }
    }
}
