//! Integration tests for report decoding
//!
//! Tests the 56-byte framing end to end, including:
//! - Empty and full reports
//! - Property checks of the triple formula over arbitrary bytes
//! - Signature parsing through serde

use protocol::{
    DeviceIdentity, MAX_SAMPLES_PER_REPORT, NIA_IDENTITY, ProtocolError, REPORT_LEN, RawReport,
    decode_report,
};
use proptest::prelude::*;

/// Reference formula, written out independently of the decoder
fn reference_sample(b0: u8, b1: u8, b2: u8) -> i32 {
    let raw = b0 as i64 + b1 as i64 * 256 + b2 as i64 * 65535;
    ((raw - 8_388_480) / 256) as i32
}

mod framing {
    use super::*;

    #[test]
    fn test_zero_count_is_not_an_error() {
        let mut bytes = [0xAAu8; REPORT_LEN];
        bytes[55] = 0;
        let packet = decode_report(&RawReport::from_bytes(&bytes).unwrap()).unwrap();
        assert!(packet.samples.is_empty());
        assert_eq!(packet.valid_count, 0);
    }

    #[test]
    fn test_full_report() {
        let samples: Vec<i32> = (0..MAX_SAMPLES_PER_REPORT as i32).map(|i| i * 100 - 800).collect();
        let report = RawReport::from_samples(&samples, 0x1234).unwrap();
        let packet = decode_report(&report).unwrap();

        assert_eq!(packet.samples, samples);
        assert_eq!(packet.valid_count, MAX_SAMPLES_PER_REPORT);
        assert_eq!(packet.packet_timer, 0x1234 - MAX_SAMPLES_PER_REPORT as i64);
    }

    #[test]
    fn test_timer_can_go_negative() {
        let report = RawReport::from_samples(&[5, 6, 7], 1).unwrap();
        let packet = decode_report(&report).unwrap();
        assert_eq!(packet.packet_timer, -2);
    }

    #[test]
    fn test_too_many_samples_rejected_by_builder() {
        let samples = vec![0; MAX_SAMPLES_PER_REPORT + 1];
        assert!(matches!(
            RawReport::from_samples(&samples, 0),
            Err(ProtocolError::SampleCountOutOfRange { .. })
        ));
    }
}

mod signature {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Section {
        signature: DeviceIdentity,
    }

    #[test]
    fn test_signature_from_toml() {
        let section: Section = toml::from_str(r#"signature = "0x1234:0x0000""#).unwrap();
        assert_eq!(section.signature, NIA_IDENTITY);
    }

    #[test]
    fn test_invalid_signature_from_toml() {
        let result: Result<Section, _> = toml::from_str(r#"signature = "nia""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_signature_to_toml() {
        let text = toml::to_string(&Section {
            signature: NIA_IDENTITY,
        })
        .unwrap();
        assert!(text.contains("0x1234:0x0000"));
    }
}

proptest! {
    /// Property: a report claiming k valid samples decodes to exactly k samples
    /// computed by the triple formula
    #[test]
    fn prop_decode_follows_formula(
        body in proptest::collection::vec(any::<u8>(), REPORT_LEN - 1),
        count in 0u8..=MAX_SAMPLES_PER_REPORT as u8,
    ) {
        let mut bytes = body.clone();
        bytes.push(count);
        let report = RawReport::from_bytes(&bytes).unwrap();
        let packet = decode_report(&report).unwrap();

        prop_assert_eq!(packet.samples.len(), count as usize);
        for (i, sample) in packet.samples.iter().enumerate() {
            let base = i * 3 + 1;
            prop_assert_eq!(*sample, reference_sample(bytes[base], bytes[base + 1], bytes[base + 2]));
        }

        let timer = bytes[54] as i64 * 256 + bytes[53] as i64;
        prop_assert_eq!(packet.packet_timer, timer - count as i64);
    }

    /// Property: decoded samples stay inside the sensor's working range
    #[test]
    fn prop_samples_bounded(b0 in any::<u8>(), b1 in any::<u8>(), b2 in any::<u8>()) {
        let sample = reference_sample(b0, b1, b2);
        prop_assert!((-32767..=32767).contains(&sample));
    }

    /// Property: builder output decodes back to the samples it was given
    #[test]
    fn prop_builder_matches_decoder(
        samples in proptest::collection::vec(-32767i32..=32767, 0..=MAX_SAMPLES_PER_REPORT),
        timer in any::<u16>(),
    ) {
        let report = RawReport::from_samples(&samples, timer).unwrap();
        let packet = decode_report(&report).unwrap();
        prop_assert_eq!(packet.samples, samples);
    }
}
