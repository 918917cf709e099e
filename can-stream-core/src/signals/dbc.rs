//! DBC file parser
//!
//! Parses Vector DBC files and flattens their messages into catalog signal specs.

use crate::signals::catalog::{ByteOrder, Multiplexing, SignalSpec, ValueType};
use crate::types::{CatalogError, Result};
use std::path::Path;

/// Bit 31 of a DBC message ID marks an extended (29-bit) identifier
const DBC_EXTENDED_FLAG: u32 = 0x8000_0000;

/// Parse a DBC file and return its signal definitions
pub fn parse_dbc_file(path: &Path) -> Result<Vec<SignalSpec>> {
    log::info!("Parsing DBC file: {:?}", path);

    // Read the DBC file as bytes first (handle non-UTF8 encodings)
    let bytes = std::fs::read(path).map_err(|e| {
        CatalogError::DbcParseError(format!("Failed to read file {:?}: {}", path, e))
    })?;

    let dbc_content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(e) => {
            // Latin-1 maps every byte to the code point of the same value
            log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let source = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.dbc");

    parse_dbc_str(&dbc_content, source)
}

/// Parse DBC text and return its signal definitions
pub fn parse_dbc_str(content: &str, source: &str) -> Result<Vec<SignalSpec>> {
    let dbc = can_dbc::DBC::from_slice(content.as_bytes()).map_err(|e| {
        CatalogError::DbcParseError(format!("Failed to parse DBC {}: {:?}", source, e))
    })?;

    let mut specs = Vec::new();
    for dbc_msg in dbc.messages() {
        let frame_id = dbc_msg.message_id().0 & !DBC_EXTENDED_FLAG;
        for dbc_sig in dbc_msg.signals() {
            match convert_signal(dbc_sig, frame_id) {
                Ok(spec) => specs.push(spec),
                Err(e) => log::warn!("Skipping signal in {}: {}", source, e),
            }
        }
    }

    log::info!(
        "Parsed {} messages ({} signals) from {}",
        dbc.messages().len(),
        specs.len(),
        source
    );

    Ok(specs)
}

/// Convert a can-dbc signal to our SignalSpec
fn convert_signal(dbc_sig: &can_dbc::Signal, frame_id: u32) -> Result<SignalSpec> {
    let byte_order = match *dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
    };

    let value_type = match *dbc_sig.value_type() {
        can_dbc::ValueType::Signed => ValueType::Signed,
        can_dbc::ValueType::Unsigned => ValueType::Unsigned,
    };

    let multiplexing = match *dbc_sig.multiplexer_indicator() {
        can_dbc::MultiplexIndicator::Multiplexor => Multiplexing::Multiplexor,
        can_dbc::MultiplexIndicator::MultiplexedSignal(switch_value) => {
            Multiplexing::Multiplexed(switch_value)
        }
        // Extended multiplexing: treat the signal as selected by the outer multiplexor
        can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(switch_value) => {
            Multiplexing::Multiplexed(switch_value)
        }
        can_dbc::MultiplexIndicator::Plain => Multiplexing::None,
    };

    let start_bit = u16::try_from(*dbc_sig.start_bit()).map_err(|_| {
        CatalogError::InvalidSignalDefinition(format!(
            "signal '{}' start bit out of range",
            dbc_sig.name()
        ))
    })?;
    let length = u16::try_from(*dbc_sig.signal_size()).map_err(|_| {
        CatalogError::InvalidSignalDefinition(format!(
            "signal '{}' size out of range",
            dbc_sig.name()
        ))
    })?;

    Ok(SignalSpec {
        name: dbc_sig.name().to_string(),
        frame_id,
        start_bit,
        length,
        byte_order,
        value_type,
        factor: *dbc_sig.factor(),
        offset: *dbc_sig.offset(),
        min: *dbc_sig.min(),
        max: *dbc_sig.max(),
        unit: if dbc_sig.unit().is_empty() {
            None
        } else {
            Some(dbc_sig.unit().to_string())
        },
        multiplexing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ENGINE_DBC: &str = r#"
VERSION ""

NS_ :
    NS_DESC_
    CM_
    BA_DEF_
    BA_
    VAL_

BS_:

BU_: ECU1 ECU2

BO_ 291 EngineData: 8 ECU1
 SG_ EngineSpeed : 0|16@1+ (1,0) [0|8000] "rpm" ECU2
 SG_ EngineTemp : 16|8@1+ (1,-40) [-40|215] "C" ECU2

BO_ 512 BatteryStatus: 8 ECU1
 SG_ BatteryVoltage : 0|16@1+ (0.01,0) [0|16] "V" ECU2
 SG_ BatteryCurrent : 23|16@0- (0.1,0) [-3276.8|3276.7] "A" ECU2
"#;

    #[test]
    fn test_parse_simple_dbc() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(ENGINE_DBC.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let specs = parse_dbc_file(temp_file.path()).unwrap();
        assert_eq!(specs.len(), 4);

        let speed = specs.iter().find(|s| s.name == "EngineSpeed").unwrap();
        assert_eq!(speed.frame_id, 291);
        assert_eq!(speed.start_bit, 0);
        assert_eq!(speed.length, 16);
        assert_eq!(speed.factor, 1.0);
        assert_eq!(speed.offset, 0.0);
        assert_eq!(speed.unit, Some("rpm".to_string()));
        assert_eq!(speed.byte_order, ByteOrder::LittleEndian);

        let temp = specs.iter().find(|s| s.name == "EngineTemp").unwrap();
        assert_eq!(temp.offset, -40.0);

        let current = specs.iter().find(|s| s.name == "BatteryCurrent").unwrap();
        assert_eq!(current.frame_id, 512);
        assert_eq!(current.byte_order, ByteOrder::BigEndian);
        assert_eq!(current.value_type, ValueType::Signed);
    }

    #[test]
    fn test_parse_multiplexed_signals() {
        let dbc_content = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 512 MultiplexedMsg: 8 ECU1
 SG_ Mode M : 0|8@1+ (1,0) [0|3] "" ECU1
 SG_ SignalA m0 : 8|16@1+ (1,0) [0|100] "%" ECU1
 SG_ SignalB m1 : 8|16@1+ (0.1,0) [0|1000] "mV" ECU1
"#;

        let specs = parse_dbc_str(dbc_content, "mux.dbc").unwrap();
        assert_eq!(specs.len(), 3);

        let mode = specs.iter().find(|s| s.name == "Mode").unwrap();
        assert_eq!(mode.multiplexing, Multiplexing::Multiplexor);
        assert_eq!(mode.unit, None);

        let sig_b = specs.iter().find(|s| s.name == "SignalB").unwrap();
        assert_eq!(sig_b.multiplexing, Multiplexing::Multiplexed(1));
    }

    #[test]
    fn test_out_of_range_signal_skipped() {
        let dbc_content = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 256 Mixed: 8 ECU1
 SG_ Valid : 0|8@1+ (1,0) [0|255] "" ECU1
 SG_ Huge : 70000|8@1+ (1,0) [0|255] "" ECU1
"#;

        let specs = parse_dbc_str(dbc_content, "mixed.dbc").unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "Valid");
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = parse_dbc_file(Path::new("/nonexistent/definitely_missing.dbc"));
        assert!(matches!(result, Err(CatalogError::DbcParseError(_))));
    }
}
