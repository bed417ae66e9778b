//! Decoder for the main information reply of the BLE protocol.
//!
//! The offsets of SOC, current, cycle count and temperatures inside the
//! ~129-byte reply were inferred from captured frames rather than taken from a
//! vendor document, so they are carried in a [`BleLayout`] instead of being
//! hard coded. Temperatures are located by scanning a configured byte window
//! for plausible biased values.

use super::legacy::{current, soc, temperature};
use crate::error::FieldError;
use crate::frame::ValidatedFrame;
use crate::protocol::BLE_HEADER_LENGTH;
use crate::telemetry::{CellVoltage, Field, TelemetryRecord, Temperature};
use crate::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Byte positions (absolute frame offsets) and plausibility windows of the BLE reply.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct BleLayout {
    /// First byte of the cell voltage block
    pub cell_offset: usize,
    /// Number of 16-bit cell slots
    pub cell_slots: usize,
    /// Lowest accepted cell reading in mV (inclusive)
    pub cell_min_millivolts: u16,
    /// Highest accepted cell reading in mV (exclusive)
    pub cell_max_millivolts: u16,
    pub soc_offset: usize,
    pub current_offset: usize,
    /// Single byte tried first for the cycle count
    pub cycles_offset: usize,
    /// First register word scanned when the cycle byte reads zero
    pub cycles_scan_start: usize,
    /// Exclusive upper bound of a plausible cycle count in the first scan
    pub cycles_scan_max: u16,
    /// First register word of the second, wider scan
    pub cycles_fallback_start: usize,
    /// Exclusive upper bound of a plausible cycle count in the second scan
    pub cycles_fallback_max: u16,
    /// Start of the temperature scan window (inclusive)
    pub temperature_scan_start: usize,
    /// End of the temperature scan window (exclusive)
    pub temperature_scan_end: usize,
    /// Lowest raw byte taken for a temperature (inclusive)
    pub temperature_raw_min: u8,
    /// Highest raw byte taken for a temperature (inclusive)
    pub temperature_raw_max: u8,
    pub max_temperature_sensors: usize,
}

impl Default for BleLayout {
    fn default() -> Self {
        Self {
            cell_offset: BLE_HEADER_LENGTH,
            cell_slots: 16,
            // 0x0A00..0x1200
            cell_min_millivolts: 2560,
            cell_max_millivolts: 4608,
            soc_offset: 68,
            current_offset: 70,
            cycles_offset: 80,
            cycles_scan_start: 81,
            cycles_scan_max: 5000,
            cycles_fallback_start: 101,
            cycles_fallback_max: 10000,
            temperature_scan_start: 72,
            temperature_scan_end: 80,
            // 0..80°C
            temperature_raw_min: 40,
            temperature_raw_max: 120,
            max_temperature_sensors: 4,
        }
    }
}

impl BleLayout {
    fn accepts_cell(&self, millivolts: u16) -> bool {
        (self.cell_min_millivolts..self.cell_max_millivolts).contains(&millivolts)
    }

    fn accepts_temperature(&self, raw: u8) -> bool {
        (self.temperature_raw_min..=self.temperature_raw_max).contains(&raw)
    }
}

fn or_not_found<T>(value: Option<T>) -> Field<T> {
    value.map_or(Field::Invalid(FieldError::NotFound), Field::Valid)
}

/// Decodes a validated BLE main information reply.
pub fn decode(frame: &ValidatedFrame<'_>, layout: &BleLayout) -> Result<TelemetryRecord, Error> {
    if frame.payload().is_empty() {
        return Err(Error::EmptyPayload);
    }
    log::trace!("Decoding BLE frame {:02X?}", frame.bytes());

    let mut record = TelemetryRecord {
        trailer: Some(frame.trailer()),
        warnings: frame.warnings().to_vec(),
        ..Default::default()
    };

    let cells = cell_voltages(frame, layout);
    record.pack_voltage = if cells.is_empty() {
        Field::Invalid(FieldError::NotFound)
    } else {
        let total: u32 = cells.iter().map(|c| c.millivolts as u32).sum();
        Field::Valid(total as f32 / 1000.0)
    };
    record.set_cells(cells);

    record.soc = frame
        .payload_u16(layout.soc_offset)
        .map_or(Field::Invalid(FieldError::NotFound), soc);
    record.current = or_not_found(frame.payload_u16(layout.current_offset).map(current));
    record.cycles = cycles(frame, layout);
    record.set_temperatures(scan_temperatures(frame, layout));

    Ok(record)
}

fn cell_voltages(frame: &ValidatedFrame<'_>, layout: &BleLayout) -> Vec<CellVoltage> {
    let mut result = Vec::with_capacity(layout.cell_slots);
    for slot in 0..layout.cell_slots {
        let Some(mv) = frame.payload_u16(layout.cell_offset + 2 * slot) else {
            break;
        };
        if layout.accepts_cell(mv) {
            log::trace!("Cell #{} mV={}", slot + 1, mv);
            result.push(CellVoltage {
                cell: (slot + 1) as u8,
                millivolts: mv,
            });
        } else {
            log::debug!("Cell slot #{} value {:#06X} outside accepted band", slot + 1, mv);
        }
    }
    result
}

/// Cycle count from the fixed byte, or from the first plausible register word.
///
/// A zero byte stays a valid zero when neither scan finds anything.
fn cycles(frame: &ValidatedFrame<'_>, layout: &BleLayout) -> Field<u16> {
    let fixed = frame.payload_u8(layout.cycles_offset);
    if let Some(cycles) = fixed.filter(|cycles| *cycles != 0) {
        return Field::Valid(cycles.into());
    }
    let scanned = scan_words(frame, layout.cycles_scan_start, layout.cycles_scan_max)
        .or_else(|| scan_words(frame, layout.cycles_fallback_start, layout.cycles_fallback_max));
    match (scanned, fixed) {
        (Some((offset, cycles)), _) => {
            log::debug!("Cycle count {cycles} found at offset {offset}");
            Field::Valid(cycles)
        }
        (None, Some(_)) => Field::Valid(0),
        (None, None) => Field::Invalid(FieldError::NotFound),
    }
}

/// First big-endian word in `(0, max)`, stepping one register at a time from `start`.
fn scan_words(frame: &ValidatedFrame<'_>, start: usize, max: u16) -> Option<(usize, u16)> {
    let end = frame.payload_offset() + frame.payload().len();
    (start..end)
        .step_by(2)
        .filter_map(|offset| frame.payload_u16(offset).map(|value| (offset, value)))
        .find(|(_, value)| (1..max).contains(value))
}

/// First plausible biased bytes of the scan window, in scan order.
fn scan_temperatures(frame: &ValidatedFrame<'_>, layout: &BleLayout) -> Vec<Temperature> {
    (layout.temperature_scan_start..layout.temperature_scan_end)
        .filter_map(|offset| frame.payload_u8(offset))
        .filter(|raw| layout.accepts_temperature(*raw))
        .take(layout.max_temperature_sensors)
        .enumerate()
        .map(|(i, raw)| Temperature {
            sensor: (i + 1) as u8,
            celsius: temperature(raw),
        })
        .collect()
}
