use crate::checksum::{set_additive_checksum, set_crc16_modbus};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Address {
    /// Sender address used by the host in requests
    Host = 0x80,
    /// Sender address used by the BMS in replies
    Bms = 0x40,
}

// https://minimalmodbus.readthedocs.io/en/stable/serialcommunication.html#timing-of-the-serial-communications
// minimum delay 4ms by baud rate 9600
pub const MINIMUM_DELAY: std::time::Duration = std::time::Duration::from_millis(4);

pub const LEGACY_FRAME_LENGTH: usize = 13;
pub const LEGACY_START_BYTE: u8 = 0xa5;
pub const LEGACY_DATA_LENGTH: u8 = 0x08;
/// First byte of the data region of a legacy frame
pub const LEGACY_DATA_OFFSET: usize = 4;

pub const BLE_START_BYTE: u8 = 0xd2;
/// MODBUS "read holding registers" function code echoed in every BLE reply
pub const BLE_READ_FUNCTION: u8 = 0x03;
pub const BLE_HEADER_LENGTH: usize = 3;
pub const BLE_TRAILER_LENGTH: usize = 2;

/// Register window of the main information block
pub const BLE_INFO_REGISTERS: (u16, u16) = (0x0000, 0x003e);
/// Register window of the MOSFET information block
pub const BLE_MOS_REGISTERS: (u16, u16) = (0x003e, 0x0009);

/// Frame shape a buffer is expected to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ProtocolVariant {
    /// Fixed 13-byte frames with an additive checksum.
    LegacyChecksum,
    /// Length-prefixed frames with a CRC-16/MODBUS trailer.
    BleCrc16,
}

/// Data ids of the legacy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum LegacyCommand {
    VoltageCurrentSoc = 0x90,
    CellVoltageRange = 0x91,
    TemperatureRange = 0x92,
    MosfetCapacity = 0x93,
    StatusInfo = 0x94,
    CellVoltages = 0x95,
    CellTemperatures = 0x96,
    FailureCodes = 0x98,
}

impl LegacyCommand {
    pub const ALL: [LegacyCommand; 8] = [
        LegacyCommand::VoltageCurrentSoc,
        LegacyCommand::CellVoltageRange,
        LegacyCommand::TemperatureRange,
        LegacyCommand::MosfetCapacity,
        LegacyCommand::StatusInfo,
        LegacyCommand::CellVoltages,
        LegacyCommand::CellTemperatures,
        LegacyCommand::FailureCodes,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Number of 13-byte frames the BMS answers with.
    ///
    /// Cell voltages come three per frame and temperatures seven per frame,
    /// so those replies depend on the counts reported by [`LegacyCommand::StatusInfo`].
    pub fn reply_frames(self, cells: u8, sensors: u8) -> usize {
        match self {
            LegacyCommand::CellVoltages => (cells as usize).div_ceil(3),
            LegacyCommand::CellTemperatures => (sensors as usize).div_ceil(7),
            _ => 1,
        }
    }
}

impl TryFrom<u8> for LegacyCommand {
    type Error = crate::Error;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        LegacyCommand::ALL
            .into_iter()
            .find(|command| command.id() == id)
            .ok_or(crate::Error::UnsupportedCommand(id))
    }
}

impl fmt::Display for LegacyCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LegacyCommand::VoltageCurrentSoc => write!(f, "voltage, current and SOC"),
            LegacyCommand::CellVoltageRange => write!(f, "cell voltage range"),
            LegacyCommand::TemperatureRange => write!(f, "temperature range"),
            LegacyCommand::MosfetCapacity => write!(f, "MOSFET status and capacity"),
            LegacyCommand::StatusInfo => write!(f, "status information"),
            LegacyCommand::CellVoltages => write!(f, "cell voltages"),
            LegacyCommand::CellTemperatures => write!(f, "cell temperatures"),
            LegacyCommand::FailureCodes => write!(f, "failure codes"),
        }
    }
}

/// Builds the 13-byte legacy request `A5 80 <cmd> 08 00.. <checksum>`.
pub fn legacy_request(command: LegacyCommand) -> [u8; LEGACY_FRAME_LENGTH] {
    let mut tx_buffer = [0; LEGACY_FRAME_LENGTH];
    tx_buffer[0] = LEGACY_START_BYTE;
    tx_buffer[1] = Address::Host as u8;
    tx_buffer[2] = command.id();
    tx_buffer[3] = LEGACY_DATA_LENGTH;
    set_additive_checksum(&mut tx_buffer);
    log::trace!("legacy_request: {:02X?}", tx_buffer);
    tx_buffer
}

/// Builds an 8-byte BLE register read `D2 03 <start> <count> <crc>`.
pub fn ble_read_request(start: u16, count: u16) -> [u8; 8] {
    let mut tx_buffer = [0; 8];
    tx_buffer[0] = BLE_START_BYTE;
    tx_buffer[1] = BLE_READ_FUNCTION;
    tx_buffer[2..4].copy_from_slice(&start.to_be_bytes());
    tx_buffer[4..6].copy_from_slice(&count.to_be_bytes());
    set_crc16_modbus(&mut tx_buffer);
    log::trace!("ble_read_request: {:02X?}", tx_buffer);
    tx_buffer
}

/// The main information request, `D2 03 00 00 00 3E D7 B9`.
pub fn ble_info_request() -> [u8; 8] {
    ble_read_request(BLE_INFO_REGISTERS.0, BLE_INFO_REGISTERS.1)
}

/// The MOSFET information request, `D2 03 00 3E 00 09 F7 A3`.
pub fn ble_mos_request() -> [u8; 8] {
    ble_read_request(BLE_MOS_REGISTERS.0, BLE_MOS_REGISTERS.1)
}
