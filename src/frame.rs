//! Frame validation.
//!
//! Nothing in a received buffer is trusted until it has been turned into a
//! [`ValidatedFrame`]. Checks run cheapest first: length, header, declared
//! length and only then the checksum or CRC.

use crate::checksum::{additive_checksum, crc16_modbus};
use crate::error::{FrameError, FrameWarning};
use crate::protocol::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A buffer as handed over by the transport, tagged with the variant it should match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Vec<u8>,
    variant: ProtocolVariant,
}

impl RawFrame {
    pub fn new(bytes: impl Into<Vec<u8>>, variant: ProtocolVariant) -> Self {
        Self {
            bytes: bytes.into(),
            variant,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }
}

/// Integrity trailer of a validated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Trailer {
    Checksum(u8),
    Crc16(u16),
}

/// A frame that passed every structural check of its variant.
///
/// Only the validators in this module construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFrame<'a> {
    bytes: &'a [u8],
    variant: ProtocolVariant,
    command: u8,
    payload: std::ops::Range<usize>,
    trailer: Trailer,
    warnings: Vec<FrameWarning>,
}

impl<'a> ValidatedFrame<'a> {
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    /// Command id carried in the frame (legacy data id, BLE function code).
    pub fn command(&self) -> u8 {
        self.command
    }

    /// Data region between header and trailer.
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[self.payload.clone()]
    }

    /// Absolute offset of the first payload byte.
    pub fn payload_offset(&self) -> usize {
        self.payload.start
    }

    pub fn trailer(&self) -> Trailer {
        self.trailer
    }

    pub fn warnings(&self) -> &[FrameWarning] {
        &self.warnings
    }

    /// Byte at an absolute frame offset, if it lies inside the payload.
    pub(crate) fn payload_u8(&self, offset: usize) -> Option<u8> {
        self.payload
            .contains(&offset)
            .then(|| self.bytes[offset])
    }

    /// Big-endian u16 at an absolute frame offset, if it lies inside the payload.
    pub(crate) fn payload_u16(&self, offset: usize) -> Option<u16> {
        (self.payload.start <= offset && offset + 2 <= self.payload.end)
            .then(|| u16::from_be_bytes([self.bytes[offset], self.bytes[offset + 1]]))
    }

    /// Big-endian u32 at an absolute frame offset, if it lies inside the payload.
    pub(crate) fn payload_u32(&self, offset: usize) -> Option<u32> {
        (self.payload.start <= offset && offset + 4 <= self.payload.end).then(|| {
            u32::from_be_bytes([
                self.bytes[offset],
                self.bytes[offset + 1],
                self.bytes[offset + 2],
                self.bytes[offset + 3],
            ])
        })
    }
}

/// How the legacy command echo is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoCheck {
    /// A mismatching echo is recorded as a warning and decoding continues.
    #[default]
    Warn,
    /// A mismatching echo rejects the frame.
    Strict,
}

fn validate_len(buffer: &[u8], required: usize) -> Result<(), FrameError> {
    if buffer.len() < required {
        return Err(FrameError::TooShort {
            required,
            received: buffer.len(),
        });
    }
    Ok(())
}

/// Validates one legacy frame `A5 <addr> <cmd> <len> <data..> <checksum>`.
pub fn validate_legacy(
    buffer: &[u8],
    expected_command: u8,
    echo: EchoCheck,
) -> Result<ValidatedFrame<'_>, FrameError> {
    validate_len(buffer, LEGACY_FRAME_LENGTH)?;

    if buffer[0] != LEGACY_START_BYTE {
        return Err(FrameError::BadHeader {
            expected: vec![LEGACY_START_BYTE],
            received: vec![buffer[0]],
        });
    }

    let mut warnings = Vec::new();
    if buffer[2] != expected_command {
        match echo {
            EchoCheck::Strict => {
                return Err(FrameError::CommandMismatch {
                    expected: expected_command,
                    received: buffer[2],
                })
            }
            EchoCheck::Warn => {
                log::warn!(
                    "Command mismatch - expected={:02X?} received={:02X?}",
                    expected_command,
                    buffer[2]
                );
                warnings.push(FrameWarning::CommandMismatch {
                    expected: expected_command,
                    received: buffer[2],
                });
            }
        }
    }
    if buffer[1] != Address::Bms as u8 {
        log::debug!("Unexpected reply address {:02X?}", buffer[1]);
        warnings.push(FrameWarning::AddressMismatch {
            received: buffer[1],
        });
    }

    let last = buffer.len() - 1;
    let checksum = additive_checksum(&buffer[..last]);
    if buffer[last] != checksum {
        return Err(FrameError::ChecksumMismatch {
            calculated: checksum as u16,
            received: buffer[last] as u16,
        });
    }

    // The data length byte bounds the payload; the data region never extends into the trailer.
    let data_len = (buffer[3] as usize).min(last - LEGACY_DATA_OFFSET);
    Ok(ValidatedFrame {
        bytes: buffer,
        variant: ProtocolVariant::LegacyChecksum,
        command: buffer[2],
        payload: LEGACY_DATA_OFFSET..LEGACY_DATA_OFFSET + data_len,
        trailer: Trailer::Checksum(buffer[last]),
        warnings,
    })
}

/// Validates one BLE frame `D2 03 <len> <payload..> <crc lo> <crc hi>`.
pub fn validate_ble(buffer: &[u8]) -> Result<ValidatedFrame<'_>, FrameError> {
    validate_len(buffer, BLE_HEADER_LENGTH + BLE_TRAILER_LENGTH)?;

    if buffer[0] != BLE_START_BYTE || buffer[1] != BLE_READ_FUNCTION {
        return Err(FrameError::BadHeader {
            expected: vec![BLE_START_BYTE, BLE_READ_FUNCTION],
            received: buffer[..2].to_vec(),
        });
    }

    let payload_len = buffer[2] as usize;
    let expected_len = BLE_HEADER_LENGTH + payload_len + BLE_TRAILER_LENGTH;
    if buffer.len() != expected_len {
        return Err(FrameError::LengthMismatch {
            declared: expected_len,
            received: buffer.len(),
        });
    }

    let crc_pos = buffer.len() - BLE_TRAILER_LENGTH;
    let crc = crc16_modbus(&buffer[..crc_pos]);
    let received = u16::from_le_bytes([buffer[crc_pos], buffer[crc_pos + 1]]);
    if received != crc {
        return Err(FrameError::ChecksumMismatch {
            calculated: crc,
            received,
        });
    }

    Ok(ValidatedFrame {
        bytes: buffer,
        variant: ProtocolVariant::BleCrc16,
        command: buffer[1],
        payload: BLE_HEADER_LENGTH..crc_pos,
        trailer: Trailer::Crc16(received),
        warnings: Vec::new(),
    })
}

/// Validates `buffer` as a frame of `variant`.
///
/// For BLE frames `expected_command` is not echoed by the BMS; the function
/// code in the header is checked instead.
pub fn validate(
    buffer: &[u8],
    variant: ProtocolVariant,
    expected_command: u8,
) -> Result<ValidatedFrame<'_>, FrameError> {
    match variant {
        ProtocolVariant::LegacyChecksum => {
            validate_legacy(buffer, expected_command, EchoCheck::Warn)
        }
        ProtocolVariant::BleCrc16 => validate_ble(buffer),
    }
}

/// Splits a multi-frame legacy reply and validates every chunk in order.
///
/// Chunk `n` (1-based) must carry frame number `n` in its first data byte.
pub fn validate_legacy_series(
    buffer: &[u8],
    expected_command: u8,
    n_frames: usize,
    echo: EchoCheck,
) -> Result<Vec<ValidatedFrame<'_>>, FrameError> {
    validate_len(buffer, n_frames * LEGACY_FRAME_LENGTH)?;
    buffer
        .chunks_exact(LEGACY_FRAME_LENGTH)
        .take(n_frames)
        .enumerate()
        .map(|(index, part)| {
            let frame = validate_legacy(part, expected_command, echo)?;
            let expected = (index + 1) as u8;
            let received = part[LEGACY_DATA_OFFSET];
            if received != expected {
                return Err(FrameError::FrameOutOfOrder { expected, received });
            }
            Ok(frame)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checksum::{set_additive_checksum, set_crc16_modbus};

    /// Builds a checksummed BMS reply for `command` with `data` in bytes 4..12.
    pub(crate) fn legacy_reply(command: u8, data: [u8; 8]) -> Vec<u8> {
        let mut frame = vec![LEGACY_START_BYTE, Address::Bms as u8, command, LEGACY_DATA_LENGTH];
        frame.extend_from_slice(&data);
        frame.push(0);
        set_additive_checksum(&mut frame);
        frame
    }

    /// Builds a BLE reply around `payload` with a valid length byte and CRC.
    pub(crate) fn ble_reply(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![BLE_START_BYTE, BLE_READ_FUNCTION, payload.len() as u8];
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&[0, 0]);
        set_crc16_modbus(&mut frame);
        frame
    }

    #[test]
    fn test_legacy_twelve_bytes_too_short() {
        let frame = legacy_reply(0x90, [0; 8]);
        assert_eq!(
            validate_legacy(&frame[..12], 0x90, EchoCheck::Warn),
            Err(FrameError::TooShort {
                required: 13,
                received: 12
            })
        );
    }

    #[test]
    fn test_legacy_thirteen_bytes_valid() {
        let frame = legacy_reply(0x90, [0x00, 0x7D, 0x75, 0x30, 0x03, 0x84, 0x00, 0x00]);
        let validated = validate_legacy(&frame, 0x90, EchoCheck::Warn).unwrap();
        assert_eq!(validated.command(), 0x90);
        assert_eq!(validated.payload().len(), 8);
        assert_eq!(validated.payload_offset(), 4);
        assert_eq!(validated.trailer(), Trailer::Checksum(frame[12]));
        assert!(validated.warnings().is_empty());
    }

    #[test]
    fn test_legacy_bad_header() {
        let mut frame = legacy_reply(0x90, [0; 8]);
        frame[0] = 0xAA;
        set_additive_checksum(&mut frame);
        assert!(matches!(
            validate_legacy(&frame, 0x90, EchoCheck::Warn),
            Err(FrameError::BadHeader { .. })
        ));
    }

    #[test]
    fn test_legacy_header_checked_before_checksum() {
        let mut frame = legacy_reply(0x90, [0; 8]);
        frame[0] = 0x00;
        assert!(matches!(
            validate_legacy(&frame, 0x90, EchoCheck::Warn),
            Err(FrameError::BadHeader { .. })
        ));
    }

    #[test]
    fn test_legacy_checksum_mismatch() {
        let mut frame = legacy_reply(0x90, [0; 8]);
        frame[5] ^= 0x01;
        assert!(matches!(
            validate_legacy(&frame, 0x90, EchoCheck::Warn),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_legacy_command_mismatch_is_warning() {
        let frame = legacy_reply(0x91, [0; 8]);
        let validated = validate_legacy(&frame, 0x90, EchoCheck::Warn).unwrap();
        assert_eq!(
            validated.warnings(),
            &[FrameWarning::CommandMismatch {
                expected: 0x90,
                received: 0x91
            }]
        );
        assert_eq!(
            validate_legacy(&frame, 0x90, EchoCheck::Strict),
            Err(FrameError::CommandMismatch {
                expected: 0x90,
                received: 0x91
            })
        );
    }

    #[test]
    fn test_legacy_unexpected_address_is_warning() {
        let mut frame = legacy_reply(0x90, [0; 8]);
        frame[1] = 0x01;
        set_additive_checksum(&mut frame);
        let validated = validate_legacy(&frame, 0x90, EchoCheck::Warn).unwrap();
        assert_eq!(
            validated.warnings(),
            &[FrameWarning::AddressMismatch { received: 0x01 }]
        );
    }

    #[test]
    fn test_legacy_declared_length_bounds_payload() {
        let mut frame = legacy_reply(0x90, [0; 8]);
        frame[3] = 0x02;
        set_additive_checksum(&mut frame);
        let validated = validate_legacy(&frame, 0x90, EchoCheck::Warn).unwrap();
        assert_eq!(validated.payload().len(), 2);
        assert_eq!(validated.payload_u16(6), None);
    }

    #[test]
    fn test_ble_valid_frame() {
        let frame = ble_reply(&[0x0C, 0xF6, 0x0C, 0xF5]);
        let validated = validate_ble(&frame).unwrap();
        assert_eq!(validated.payload(), &[0x0C, 0xF6, 0x0C, 0xF5]);
        assert_eq!(validated.payload_u16(3), Some(0x0CF6));
        assert_eq!(validated.payload_u16(6), None);
        let crc = crc16_modbus(&frame[..7]);
        assert_eq!(validated.trailer(), Trailer::Crc16(crc));
    }

    #[test]
    fn test_ble_too_short() {
        assert_eq!(
            validate_ble(&[0xD2, 0x03, 0x00, 0x00]),
            Err(FrameError::TooShort {
                required: 5,
                received: 4
            })
        );
    }

    #[test]
    fn test_ble_bad_header() {
        let mut frame = ble_reply(&[0; 4]);
        frame[1] = 0x10;
        assert!(matches!(
            validate_ble(&frame),
            Err(FrameError::BadHeader { .. })
        ));
    }

    #[test]
    fn test_ble_truncated_reassembly() {
        let frame = ble_reply(&[0x11; 124]);
        assert_eq!(frame.len(), 129);
        assert_eq!(
            validate_ble(&frame[..109]),
            Err(FrameError::LengthMismatch {
                declared: 129,
                received: 109
            })
        );
    }

    #[test]
    fn test_ble_length_mismatch_despite_matching_crc() {
        // Declares 6 payload bytes but carries 4, with a CRC that is correct
        // for the bytes actually present.
        let mut frame = ble_reply(&[1, 2, 3, 4]);
        frame[2] = 6;
        set_crc16_modbus(&mut frame);
        assert_eq!(
            validate_ble(&frame),
            Err(FrameError::LengthMismatch {
                declared: 11,
                received: 9
            })
        );
    }

    #[test]
    fn test_ble_crc_mismatch() {
        let mut frame = ble_reply(&[0x0C, 0xF6]);
        frame[3] = 0x0D;
        assert!(matches!(
            validate_ble(&frame),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_ble_empty_payload_validates() {
        let frame = ble_reply(&[]);
        let validated = validate_ble(&frame).unwrap();
        assert!(validated.payload().is_empty());
    }

    #[test]
    fn test_validate_dispatches_on_variant() {
        let legacy = legacy_reply(0x94, [0; 8]);
        let ble = ble_reply(&[0; 2]);
        assert!(validate(&legacy, ProtocolVariant::LegacyChecksum, 0x94).is_ok());
        assert!(validate(&ble, ProtocolVariant::BleCrc16, 0x03).is_ok());
        assert!(matches!(
            validate(&legacy, ProtocolVariant::BleCrc16, 0x03),
            Err(FrameError::BadHeader { .. })
        ));
    }

    #[test]
    fn test_series_in_order() {
        let mut buffer = legacy_reply(0x95, [1, 0x0C, 0xF6, 0x0C, 0xF5, 0x0C, 0xF4, 0]);
        buffer.extend(legacy_reply(0x95, [2, 0x0C, 0xF3, 0, 0, 0, 0, 0]));
        let frames = validate_legacy_series(&buffer, 0x95, 2, EchoCheck::Warn).unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_series_out_of_order() {
        let mut buffer = legacy_reply(0x95, [2, 0, 0, 0, 0, 0, 0, 0]);
        buffer.extend(legacy_reply(0x95, [1, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(
            validate_legacy_series(&buffer, 0x95, 2, EchoCheck::Warn),
            Err(FrameError::FrameOutOfOrder {
                expected: 1,
                received: 2
            })
        );
    }

    #[test]
    fn test_series_too_short() {
        let buffer = legacy_reply(0x95, [1, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            validate_legacy_series(&buffer, 0x95, 2, EchoCheck::Warn),
            Err(FrameError::TooShort { .. })
        ));
    }
}
