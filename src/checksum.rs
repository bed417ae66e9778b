//! Integrity checks used by the two Daly wire formats.
//!
//! The legacy UART/Bluetooth Classic protocol ends every 13-byte frame with an
//! additive checksum. The BLE protocol ends its frames with a CRC-16/MODBUS.

use crc16::{State, MODBUS};

/// Sum of all bytes modulo 256.
///
/// Callers pass every frame byte except the trailing checksum itself.
pub fn additive_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// CRC-16/MODBUS (init `0xFFFF`, reflected poly `0xA001`, no final XOR).
///
/// # Examples
///
/// ```
/// use dalytelemetry_lib::checksum::crc16_modbus;
///
/// assert_eq!(crc16_modbus(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
/// ```
pub fn crc16_modbus(bytes: &[u8]) -> u16 {
    State::<MODBUS>::calculate(bytes)
}

/// Overwrites the last byte of a legacy frame with its checksum.
pub(crate) fn set_additive_checksum(frame: &mut [u8]) {
    let len = frame.len();
    frame[len - 1] = additive_checksum(&frame[..len - 1]);
}

/// Overwrites the last two bytes of a BLE frame with its CRC, low byte first.
pub(crate) fn set_crc16_modbus(frame: &mut [u8]) {
    let len = frame.len();
    let crc = crc16_modbus(&frame[..len - 2]).to_le_bytes();
    frame[len - 2] = crc[0];
    frame[len - 1] = crc[1];
}
