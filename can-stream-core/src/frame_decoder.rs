//! Frame decoding engine
//!
//! Extracts signal values from raw CAN frames based on the catalog's signal
//! specs. Handles bit extraction, endianness, sign extension, multiplexing,
//! and physical value conversion.
//!
//! Decoding is a pure function of (frame, catalog, session start). The
//! decoder hands out a lazy iterator so the ingest hot path never allocates.

use crate::signals::catalog::{ByteOrder, Multiplexing, SignalCatalog, SignalSpec, ValueType};
use crate::types::{RawFrame, SamplePoint};

/// A decoded sample together with the spec that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedSample<'c> {
    /// Catalog entry of the decoded signal
    pub signal: &'c SignalSpec,
    /// Session-relative timestamp and physical value
    pub point: SamplePoint,
}

impl<'c> DecodedSample<'c> {
    /// Name of the decoded signal
    pub fn name(&self) -> &'c str {
        &self.signal.name
    }
}

/// Frame decoder - a stateless view over a signal catalog
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder<'c> {
    catalog: &'c SignalCatalog,
}

impl<'c> FrameDecoder<'c> {
    /// Create a decoder over a catalog
    pub fn new(catalog: &'c SignalCatalog) -> Self {
        Self { catalog }
    }

    /// Decode a frame into the samples it implies
    ///
    /// `session_start` is the bus timestamp of the first frame of the session;
    /// emitted timestamps are relative to it. Frames with no matching spec
    /// produce an empty iterator.
    pub fn decode<'f>(&self, frame: &'f RawFrame, session_start: f64) -> DecodedFrame<'c, 'f> {
        let specs = self.catalog.signals_for(frame.id);

        let mut multiplexor_missing = false;
        let multiplexer_value = specs
            .iter()
            .find(|s| s.multiplexing == Multiplexing::Multiplexor)
            .and_then(|mux| {
                let value = extract_raw_bits(&frame.data, mux);
                multiplexor_missing = value.is_none();
                value
            });

        DecodedFrame {
            specs: specs.iter(),
            data: &frame.data,
            timestamp: frame.timestamp - session_start,
            multiplexer_value,
            multiplexor_missing,
            skipped: 0,
        }
    }
}

/// Lazy iterator over the samples decoded from one frame
#[derive(Debug)]
pub struct DecodedFrame<'c, 'f> {
    specs: std::slice::Iter<'c, SignalSpec>,
    data: &'f [u8],
    timestamp: f64,
    multiplexer_value: Option<u64>,
    multiplexor_missing: bool,
    skipped: usize,
}

impl<'c, 'f> DecodedFrame<'c, 'f> {
    /// Number of specs skipped so far because the payload was too short
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<'c, 'f> Iterator for DecodedFrame<'c, 'f> {
    type Item = DecodedSample<'c>;

    fn next(&mut self) -> Option<Self::Item> {
        for spec in self.specs.by_ref() {
            if let Multiplexing::Multiplexed(switch_value) = spec.multiplexing {
                match self.multiplexer_value {
                    Some(current) if current == switch_value => {}
                    Some(_) => continue,
                    None => {
                        if self.multiplexor_missing {
                            self.skipped += 1;
                        }
                        continue;
                    }
                }
            }

            match decode_value(self.data, spec) {
                Some(value) => {
                    return Some(DecodedSample {
                        signal: spec,
                        point: SamplePoint {
                            timestamp: self.timestamp,
                            value,
                        },
                    })
                }
                None => {
                    log::trace!(
                        "Signal '{}' needs more than {} payload bytes, skipping",
                        spec.name,
                        self.data.len()
                    );
                    self.skipped += 1;
                }
            }
        }
        None
    }
}

/// Decode a single signal to its physical value (`raw * factor + offset`)
pub fn decode_value(data: &[u8], spec: &SignalSpec) -> Option<f64> {
    let bits = extract_raw_bits(data, spec)?;
    let raw = match spec.value_type {
        ValueType::Unsigned => bits as f64,
        ValueType::Signed => sign_extend(bits, spec.length as usize) as f64,
    };
    Some(raw * spec.factor + spec.offset)
}

/// Extract the raw, unsigned bit pattern of a signal
///
/// Returns `None` when the signal reaches past the end of the payload.
fn extract_raw_bits(data: &[u8], spec: &SignalSpec) -> Option<u64> {
    let start_bit = spec.start_bit as usize;
    let length = spec.length as usize;
    if length == 0 || length > 64 {
        return None;
    }

    match spec.byte_order {
        ByteOrder::LittleEndian => extract_little_endian(data, start_bit, length),
        ByteOrder::BigEndian => extract_big_endian(data, start_bit, length),
    }
}

/// Extract signal with little-endian (Intel) byte order
///
/// The start bit is the LSB; bits are numbered from LSB to MSB within each
/// byte and continue into the following byte.
fn extract_little_endian(data: &[u8], start_bit: usize, length: usize) -> Option<u64> {
    let required_bytes = (start_bit + length + 7) / 8;
    if required_bytes > data.len() {
        return None;
    }

    let mut result: u64 = 0;
    for i in 0..length {
        let bit_pos = start_bit + i;
        let bit_value = (data[bit_pos / 8] >> (bit_pos % 8)) & 0x01;
        result |= (bit_value as u64) << i;
    }
    Some(result)
}

/// Extract signal with big-endian (Motorola) byte order
///
/// DBC convention: the start bit is the MSB, numbered in sawtooth order
/// (bit 7 is the MSB of byte 0, bit 8 the LSB of byte 1). Walking towards the
/// LSB moves down within a byte, then to the MSB of the next byte.
fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> Option<u64> {
    let mut result: u64 = 0;
    let mut bit_pos = start_bit;

    for i in 0..length {
        let byte_idx = bit_pos / 8;
        let byte = *data.get(byte_idx)?;
        let bit_value = (byte >> (bit_pos % 8)) & 0x01;
        result = (result << 1) | bit_value as u64;

        if i + 1 < length {
            bit_pos = if bit_pos % 8 == 0 { bit_pos + 15 } else { bit_pos - 1 };
        }
    }
    Some(result)
}

/// Sign-extend a value from N bits to 64 bits
fn sign_extend(value: u64, bit_length: usize) -> i64 {
    if bit_length >= 64 {
        return value as i64;
    }

    let sign_bit = 1u64 << (bit_length - 1);
    if (value & sign_bit) != 0 {
        let mask = !0u64 << bit_length;
        (value | mask) as i64
    } else {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpm_catalog() -> SignalCatalog {
        SignalCatalog::new()
            .with_signal(SignalSpec::new("RPM", 0x100, 0, 16).with_scale(0.25, 0.0))
            .unwrap()
            .with_signal(SignalSpec::new("CoolantTemp", 0x100, 16, 8).with_scale(1.0, -40.0))
            .unwrap()
            .with_signal(SignalSpec::new("OilPressure", 0x100, 56, 16).with_scale(0.1, 0.0))
            .unwrap()
    }

    #[test]
    fn test_extract_little_endian_simple() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_little_endian(&data, 0, 8), Some(0xAB));
    }

    #[test]
    fn test_extract_little_endian_cross_byte() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_little_endian(&data, 0, 16), Some(0xCDAB));
        assert_eq!(extract_little_endian(&data, 4, 8), Some(0xDA));
    }

    #[test]
    fn test_extract_big_endian_simple() {
        let data = vec![0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(extract_big_endian(&data, 7, 8), Some(0xAB));
    }

    #[test]
    fn test_extract_big_endian_cross_byte() {
        // MSB at bit 7 of byte 0, 16 bits -> bytes 0..2 in network order
        let data = vec![0x12, 0x34, 0x00, 0x00];
        assert_eq!(extract_big_endian(&data, 7, 16), Some(0x1234));

        // 12-bit value starting mid-byte: bits 3..0 of byte 0, then byte 1
        let data = vec![0x0A, 0xBC];
        assert_eq!(extract_big_endian(&data, 3, 12), Some(0xABC));
    }

    #[test]
    fn test_extract_past_end_is_none() {
        let data = vec![0xFF];
        assert_eq!(extract_little_endian(&data, 0, 16), None);
        assert_eq!(extract_big_endian(&data, 7, 16), None);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x7F, 8), 127);
        assert_eq!(sign_extend(0xFF, 8), -1);
        assert_eq!(sign_extend(0x8000, 16), -32768);
        assert_eq!(sign_extend(u64::MAX, 64), -1);
    }

    #[test]
    fn test_decode_signed_scaled() {
        let spec = SignalSpec::new("Current", 0x200, 0, 16)
            .signed()
            .with_scale(0.1, 0.0);
        // 0xFF9C = -100 -> -10.0 A
        let value = decode_value(&[0x9C, 0xFF], &spec).unwrap();
        assert!((value + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_rpm_scenario() {
        let catalog = rpm_catalog();
        let decoder = FrameDecoder::new(&catalog);
        let frame = RawFrame::new(0x100, vec![0x10, 0x27, 0x5A, 0, 0, 0, 0, 0], 1.0);

        let samples: Vec<_> = decoder.decode(&frame, 1.0).collect();
        let rpm = samples.iter().find(|s| s.name() == "RPM").unwrap();
        assert_eq!(rpm.point.value, 2500.0);
        assert_eq!(rpm.point.timestamp, 0.0);

        let temp = samples.iter().find(|s| s.name() == "CoolantTemp").unwrap();
        assert_eq!(temp.point.value, 50.0);
    }

    #[test]
    fn test_short_payload_skips_only_that_signal() {
        let catalog = rpm_catalog();
        let decoder = FrameDecoder::new(&catalog);
        // 3 bytes: RPM and CoolantTemp fit, OilPressure (bits 56..72) does not
        let frame = RawFrame::new(0x100, vec![0x10, 0x27, 0x5A], 2.0);

        let mut decoded = decoder.decode(&frame, 1.0);
        let names: Vec<&str> = decoded.by_ref().map(|s| s.name()).collect();
        assert_eq!(names, vec!["RPM", "CoolantTemp"]);
        assert_eq!(decoded.skipped(), 1);
    }

    #[test]
    fn test_unknown_frame_yields_nothing() {
        let catalog = rpm_catalog();
        let decoder = FrameDecoder::new(&catalog);
        let frame = RawFrame::new(0x7FF, vec![0; 8], 0.0);

        let mut decoded = decoder.decode(&frame, 0.0);
        assert!(decoded.next().is_none());
        assert_eq!(decoded.skipped(), 0);
    }

    #[test]
    fn test_multiplexed_signals() {
        let catalog = SignalCatalog::new()
            .with_signal(
                SignalSpec::new("Mode", 0x300, 0, 8).with_multiplexing(Multiplexing::Multiplexor),
            )
            .unwrap()
            .with_signal(
                SignalSpec::new("SignalA", 0x300, 8, 16)
                    .with_multiplexing(Multiplexing::Multiplexed(0)),
            )
            .unwrap()
            .with_signal(
                SignalSpec::new("SignalB", 0x300, 8, 16)
                    .with_scale(0.1, 0.0)
                    .with_multiplexing(Multiplexing::Multiplexed(1)),
            )
            .unwrap();
        let decoder = FrameDecoder::new(&catalog);

        let frame = RawFrame::new(0x300, vec![0x01, 0x64, 0x00], 0.0);
        let names: Vec<&str> = decoder.decode(&frame, 0.0).map(|s| s.name()).collect();
        assert_eq!(names, vec!["Mode", "SignalB"]);

        let frame = RawFrame::new(0x300, vec![0x00, 0x64, 0x00], 0.0);
        let names: Vec<&str> = decoder.decode(&frame, 0.0).map(|s| s.name()).collect();
        assert_eq!(names, vec!["Mode", "SignalA"]);
    }
}
