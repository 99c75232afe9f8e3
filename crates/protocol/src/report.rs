//! NIA input report framing
//!
//! The device pushes a fixed 56-byte input report:
//!
//! ```text
//! byte  0        report ID (always 0)
//! bytes 1..=51   up to 17 sample triples, 3 bytes each
//! bytes 53..=54  rolling packet timer (little endian)
//! byte  55       number of valid triples in this report
//! ```
//!
//! Each triple combines as `b0 + b1*256 + b2*65535`. The third weight is
//! 65535, not 65536; that is how the device firmware has always been read
//! and the DC offset below is calibrated against it.

use crate::error::{ProtocolError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Size of one input report, report ID byte included
pub const REPORT_LEN: usize = 56;

/// Offset of the valid-sample count
const COUNT_OFFSET: usize = 55;

/// Offset of the packet timer (two bytes)
const TIMER_OFFSET: usize = 53;

/// First byte of the first sample triple
const SAMPLES_OFFSET: usize = 1;

/// Bytes per sample
const TRIPLE_LEN: usize = 3;

/// Triples that fit before the timer bytes
pub const MAX_SAMPLES_PER_REPORT: usize = (TIMER_OFFSET - SAMPLES_OFFSET) / TRIPLE_LEN;

/// Midpoint of the sensor's raw range
pub const SAMPLE_DC_OFFSET: i64 = 8_388_480;

/// Scale applied after removing the DC offset
const SAMPLE_SCALE: i64 = 256;

/// Weight of the third triple byte
const HIGH_BYTE_WEIGHT: i64 = 65_535;

/// One decoded sample
pub type Sample = i32;

/// A validated input report buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReport {
    bytes: [u8; REPORT_LEN],
}

impl RawReport {
    /// Wrap a buffer read from the device
    ///
    /// Buffers longer than [`REPORT_LEN`] are truncated; shorter ones are a
    /// framing error.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < REPORT_LEN {
            return Err(ProtocolError::ReportTooShort {
                needed: REPORT_LEN,
                actual: data.len(),
            });
        }

        let mut bytes = [0u8; REPORT_LEN];
        bytes.copy_from_slice(&data[..REPORT_LEN]);
        Ok(Self { bytes })
    }

    /// Build a report carrying the given samples
    ///
    /// `timer` is the raw value stored in the timer bytes.
    pub fn from_samples(samples: &[Sample], timer: u16) -> Result<Self> {
        if samples.len() > MAX_SAMPLES_PER_REPORT {
            return Err(ProtocolError::SampleCountOutOfRange {
                count: samples.len(),
                max: MAX_SAMPLES_PER_REPORT,
            });
        }

        let mut bytes = [0u8; REPORT_LEN];
        for (i, &sample) in samples.iter().enumerate() {
            let offset = SAMPLES_OFFSET + i * TRIPLE_LEN;
            bytes[offset..offset + TRIPLE_LEN].copy_from_slice(&encode_sample(sample)?);
        }
        LittleEndian::write_u16(&mut bytes[TIMER_OFFSET..TIMER_OFFSET + 2], timer);
        bytes[COUNT_OFFSET] = samples.len() as u8;

        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of valid sample triples claimed by the device
    pub fn valid_count(&self) -> usize {
        self.bytes[COUNT_OFFSET] as usize
    }

    /// Raw value of the packet timer bytes
    pub fn timer(&self) -> u16 {
        LittleEndian::read_u16(&self.bytes[TIMER_OFFSET..TIMER_OFFSET + 2])
    }
}

/// Samples extracted from one report
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedPacket {
    /// Valid-sample count from the report
    pub valid_count: usize,
    /// Position of the first sample in the device's framing
    pub packet_timer: i64,
    /// Decoded samples, oldest first
    pub samples: Vec<Sample>,
}

impl DecodedPacket {
    /// Framing position of each sample
    pub fn timer_positions(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.samples.len() as i64).map(move |i| self.packet_timer + i)
    }

    /// Integer mean of the samples, truncated toward zero
    pub fn mean(&self) -> Option<Sample> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: i64 = self.samples.iter().map(|&s| s as i64).sum();
        Some((sum / self.samples.len() as i64) as Sample)
    }
}

/// Decode every valid sample in a report
pub fn decode_report(report: &RawReport) -> Result<DecodedPacket> {
    let bytes = report.as_bytes();
    let valid_count = report.valid_count();

    if valid_count > MAX_SAMPLES_PER_REPORT {
        return Err(ProtocolError::SampleCountOutOfRange {
            count: valid_count,
            max: MAX_SAMPLES_PER_REPORT,
        });
    }

    let packet_timer = report.timer() as i64 - valid_count as i64;

    let samples = bytes[SAMPLES_OFFSET..SAMPLES_OFFSET + valid_count * TRIPLE_LEN]
        .chunks_exact(TRIPLE_LEN)
        .map(decode_triple)
        .collect();

    Ok(DecodedPacket {
        valid_count,
        packet_timer,
        samples,
    })
}

fn decode_triple(triple: &[u8]) -> Sample {
    let raw = triple[0] as i64 + triple[1] as i64 * 256 + triple[2] as i64 * HIGH_BYTE_WEIGHT;
    ((raw - SAMPLE_DC_OFFSET) / SAMPLE_SCALE) as Sample
}

/// Encode a sample as the triple the device would send for it
pub fn encode_sample(sample: Sample) -> Result<[u8; 3]> {
    let raw = sample as i64 * SAMPLE_SCALE + SAMPLE_DC_OFFSET;
    let high = raw.div_euclid(HIGH_BYTE_WEIGHT);
    let rest = raw.rem_euclid(HIGH_BYTE_WEIGHT);

    if !(0..=255).contains(&high) {
        return Err(ProtocolError::SampleOutOfRange(sample));
    }

    Ok([(rest % 256) as u8, (rest / 256) as u8, high as u8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with_count(count: u8) -> RawReport {
        let mut bytes = [0u8; REPORT_LEN];
        bytes[COUNT_OFFSET] = count;
        RawReport::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn test_empty_report_decodes_to_no_samples() {
        let packet = decode_report(&report_with_count(0)).unwrap();
        assert_eq!(packet.valid_count, 0);
        assert!(packet.samples.is_empty());
        assert_eq!(packet.mean(), None);
    }

    #[test]
    fn test_triple_formula() {
        let mut bytes = [0u8; REPORT_LEN];
        bytes[1] = 0x80;
        bytes[2] = 0x12;
        bytes[3] = 0x7f;
        bytes[53] = 0x10;
        bytes[54] = 0x02;
        bytes[55] = 1;

        let packet = decode_report(&RawReport::from_bytes(&bytes).unwrap()).unwrap();
        let raw: i64 = 0x80 + 0x12 * 256 + 0x7f * 65535;
        assert_eq!(packet.samples, vec![((raw - 8_388_480) / 256) as i32]);
        assert_eq!(packet.packet_timer, 0x02 * 256 + 0x10 - 1);
    }

    #[test]
    fn test_division_truncates_toward_zero() {
        // raw - offset = -255 must decode to 0, not -1
        let raw = SAMPLE_DC_OFFSET - 255;
        let triple = [
            (raw % 65535 % 256) as u8,
            (raw % 65535 / 256) as u8,
            (raw / 65535) as u8,
        ];
        assert_eq!(decode_triple(&triple), 0);
    }

    #[test]
    fn test_sample_extremes() {
        assert_eq!(decode_triple(&[0, 0, 0]), -32767);
        assert_eq!(decode_triple(&[255, 255, 255]), 32767);
    }

    #[test]
    fn test_short_report_rejected() {
        let err = RawReport::from_bytes(&[0u8; 20]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ReportTooShort {
                needed: REPORT_LEN,
                actual: 20
            }
        );
    }

    #[test]
    fn test_long_report_truncated() {
        let mut bytes = vec![0u8; 65];
        bytes[55] = 2;
        bytes[60] = 0xff;
        let report = RawReport::from_bytes(&bytes).unwrap();
        assert_eq!(report.as_bytes().len(), REPORT_LEN);
        assert_eq!(report.valid_count(), 2);
    }

    #[test]
    fn test_count_overlapping_timer_rejected() {
        let err = decode_report(&report_with_count(18)).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::SampleCountOutOfRange { count: 18, max: 17 }
        );
        assert!(decode_report(&report_with_count(17)).is_ok());
    }

    #[test]
    fn test_encode_matches_decoder() {
        for sample in [-32767, -1000, -1, 0, 1, 600, 981, 32767] {
            let triple = encode_sample(sample).unwrap();
            assert_eq!(decode_triple(&triple), sample, "sample {}", sample);
        }
        assert!(encode_sample(40_000).is_err());
    }

    #[test]
    fn test_timer_positions() {
        let report = RawReport::from_samples(&[1, 2, 3], 500).unwrap();
        let packet = decode_report(&report).unwrap();
        let positions: Vec<i64> = packet.timer_positions().collect();
        assert_eq!(positions, vec![497, 498, 499]);
    }

    #[test]
    fn test_packet_mean() {
        let packet = DecodedPacket {
            valid_count: 3,
            packet_timer: 0,
            samples: vec![10, 20, -3],
        };
        assert_eq!(packet.mean(), Some(9));
    }
}
