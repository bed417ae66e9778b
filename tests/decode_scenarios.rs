use dalytelemetry_lib::checksum::{additive_checksum, crc16_modbus};
use dalytelemetry_lib::protocol::{ble_info_request, legacy_request, LegacyCommand};
use dalytelemetry_lib::{
    Decoder, Error, Field, FieldError, FrameError, ProtocolVariant, RawFrame, TelemetryRecord,
};

fn legacy_reply(command: u8, data: [u8; 8]) -> RawFrame {
    let mut bytes = vec![0xA5, 0x40, command, 0x08];
    bytes.extend_from_slice(&data);
    bytes.push(additive_checksum(&bytes));
    RawFrame::new(bytes, ProtocolVariant::LegacyChecksum)
}

fn ble_reply(payload: &[u8]) -> RawFrame {
    let mut bytes = vec![0xD2, 0x03, payload.len() as u8];
    bytes.extend_from_slice(payload);
    let crc = crc16_modbus(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    RawFrame::new(bytes, ProtocolVariant::BleCrc16)
}

fn decode(raw: &RawFrame, command: u8) -> Result<TelemetryRecord, Error> {
    Decoder::default().decode(raw, command)
}

#[test]
fn voltage_current_soc_frame() {
    let raw = RawFrame::new(
        [
            0xA5, 0x40, 0x90, 0x08, 0x00, 0x7D, 0x75, 0x30, 0x03, 0x84, 0x00, 0x00, 0x26,
        ],
        ProtocolVariant::LegacyChecksum,
    );
    let record = decode(&raw, 0x90).unwrap();
    assert_eq!(record.pack_voltage, Field::Valid(12.5));
    assert_eq!(record.current, Field::Valid(0.0));
    assert_eq!(record.soc, Field::Valid(90.0));
    assert!(record.warnings.is_empty());
}

#[test]
fn voltage_current_soc_reencode_to_the_same_bytes() {
    let voltages: [u16; 5] = [0, 1, 125, 530, 65535];
    let currents: [u16; 6] = [0, 1, 29999, 30000, 30001, 65535];
    let socs: [u16; 4] = [0, 1, 904, 1000];

    for raw_voltage in voltages {
        for raw_current in currents {
            for raw_soc in socs {
                let (v, a, s) = (
                    raw_voltage.to_be_bytes(),
                    raw_current.to_be_bytes(),
                    raw_soc.to_be_bytes(),
                );
                let record = decode(
                    &legacy_reply(0x90, [v[0], v[1], a[0], a[1], s[0], s[1], 0, 0]),
                    0x90,
                )
                .unwrap();

                let volts = record.pack_voltage.get().unwrap();
                let amps = record.current.get().unwrap();
                let soc = record.soc.get().unwrap();
                assert_eq!(((volts * 10.0).round() as u16).to_be_bytes(), v);
                assert_eq!(
                    (((amps * 10.0).round() as i32 + 30000) as u16).to_be_bytes(),
                    a
                );
                assert_eq!(((soc * 10.0).round() as u16).to_be_bytes(), s);
            }
        }
    }
}

#[test]
fn decoding_twice_gives_the_same_record() {
    let mut payload = vec![0u8; 124];
    payload[..2].copy_from_slice(&[0x0C, 0xF6]);
    let raw = ble_reply(&payload);
    assert_eq!(decode(&raw, 0x03).unwrap(), decode(&raw, 0x03).unwrap());
}

#[test]
fn legacy_length_boundary() {
    let raw = legacy_reply(0x90, [0x00, 0x7D, 0x75, 0x30, 0x03, 0x84, 0, 0]);
    let short = RawFrame::new(&raw.bytes()[..12], ProtocolVariant::LegacyChecksum);
    let err = decode(&short, 0x90).unwrap_err();
    assert_eq!(
        err.frame_error(),
        Some(&FrameError::TooShort {
            required: 13,
            received: 12
        })
    );
    assert!(decode(&raw, 0x90).is_ok());
}

#[test]
fn checksum_ignores_byte_order() {
    let bytes = [0xA5, 0x80, 0x90, 0x08, 0x12, 0x34];
    let mut reversed = bytes;
    reversed.reverse();
    assert_eq!(additive_checksum(&bytes), additive_checksum(&reversed));
}

#[test]
fn crc_reference_vectors() {
    assert_eq!(crc16_modbus(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
    assert_eq!(crc16_modbus(&[0xD2, 0x03, 0x00, 0x00, 0x00, 0x3E]), 0xB9D7);
    assert_eq!(
        ble_info_request(),
        [0xD2, 0x03, 0x00, 0x00, 0x00, 0x3E, 0xD7, 0xB9]
    );
}

#[test]
fn legacy_request_is_checksummed() {
    let request = legacy_request(LegacyCommand::VoltageCurrentSoc);
    assert_eq!(&request[..4], &[0xA5, 0x80, 0x90, 0x08]);
    assert_eq!(request[12], additive_checksum(&request[..12]));
}

#[test]
fn ble_length_mismatch_despite_valid_crc() {
    // Length byte claims 0x7C payload bytes, only 100 arrived.
    let mut bytes = vec![0xD2, 0x03, 0x7C];
    bytes.extend(std::iter::repeat(0x0C).take(100));
    let crc = crc16_modbus(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());
    let raw = RawFrame::new(bytes, ProtocolVariant::BleCrc16);

    match decode(&raw, 0x03) {
        Err(Error::Rejected {
            variant: ProtocolVariant::BleCrc16,
            error: FrameError::LengthMismatch { declared, received },
            raw_hex,
        }) => {
            assert_eq!(declared, 129);
            assert_eq!(received, 105);
            assert!(raw_hex.starts_with("D2037C"));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn temperature_bias() {
    let record = decode(&legacy_reply(0x92, [0x46, 1, 0x46, 1, 0, 0, 0, 0]), 0x92).unwrap();
    assert_eq!(record.max_temperature.get().map(|t| t.celsius), Some(30));
    assert_eq!(record.min_temperature.get().map(|t| t.celsius), Some(30));
}

#[test]
fn ble_cell_band_edges() {
    let mut payload = vec![0u8; 124];
    payload[0..2].copy_from_slice(&0x09FFu16.to_be_bytes());
    payload[2..4].copy_from_slice(&0x0A00u16.to_be_bytes());
    let record = decode(&ble_reply(&payload), 0x03).unwrap();
    let cells = record.cell_voltages.value().unwrap();
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].cell, 2);
    assert_eq!(cells[0].millivolts, 0x0A00);
    assert_eq!(record.pack_voltage, Field::Valid(2.56));
}

#[test]
fn invalid_fields_do_not_hide_valid_ones() {
    // 0xFFFF SOC is implausible, voltage and current still decode.
    let record = decode(
        &legacy_reply(0x90, [0x02, 0x12, 0x75, 0x30, 0xFF, 0xFF, 0, 0]),
        0x90,
    )
    .unwrap();
    assert!(matches!(
        record.soc.error(),
        Some(FieldError::OutOfRange { .. })
    ));
    assert_eq!(record.pack_voltage, Field::Valid(53.0));
    assert_eq!(record.current, Field::Valid(0.0));
}

#[test]
fn merged_records_derive_remaining_capacity() {
    let soc = decode(
        &legacy_reply(0x90, [0x02, 0x12, 0x75, 0x30, 0x01, 0xF4, 0, 0]),
        0x90,
    )
    .unwrap();
    // 100000 mAh
    let capacity = decode(
        &legacy_reply(0x93, [1, 1, 12, 0x00, 0x01, 0x86, 0xA0, 0]),
        0x93,
    )
    .unwrap();
    let merged = soc.merge(&capacity);
    assert_eq!(merged.soc, Field::Valid(50.0));
    assert_eq!(merged.total_capacity, Field::Valid(100.0));
    assert_eq!(merged.remaining_capacity, Field::Valid(50.0));
    assert_eq!(merged.power(), Some(0.0));
}

#[cfg(feature = "serde")]
#[test]
fn record_serializes_with_field_validity() {
    let record = decode(
        &legacy_reply(0x90, [0x00, 0x7D, 0x75, 0x30, 0xFF, 0xFF, 0, 0]),
        0x90,
    )
    .unwrap();
    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value["pack_voltage"]["valid"], serde_json::json!(12.5));
    assert!(value["soc"]["invalid"]["OutOfRange"].is_object());
    assert_eq!(value["cell_voltages"], serde_json::json!("absent"));
}
