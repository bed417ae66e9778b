use crate::error::FieldError;
use crate::frame::{validate_legacy_series, EchoCheck, ValidatedFrame};
use crate::protocol::{LegacyCommand, LEGACY_DATA_OFFSET};
use crate::telemetry::{
    read_bit, CellVoltage, FaultCode, Field, MosfetState, Status, TelemetryRecord, Temperature,
};
use crate::Error;

/// The current measurement is given with a 30000 unit offset
pub const CURRENT_OFFSET: i32 = 30000;
/// An offset of 40 is added by the BMS to avoid having to deal with negative numbers
pub const TEMPERATURE_OFFSET: i16 = 40;
/// Plausible cell voltage window in mV; anything outside points to mis-framing
pub const CELL_MILLIVOLTS: (u16, u16) = (2500, 4500);

const CELLS_PER_FRAME: usize = 3;
const SENSORS_PER_FRAME: usize = 7;

pub(crate) fn voltage(raw: u16) -> f32 {
    raw as f32 / 10.0
}

pub(crate) fn current(raw: u16) -> f32 {
    (raw as i32 - CURRENT_OFFSET) as f32 / 10.0
}

pub(crate) fn soc(raw: u16) -> Field<f32> {
    Field::checked(raw as f32 / 10.0, 0.0, 100.0)
}

pub(crate) fn temperature(raw: u8) -> i16 {
    raw as i16 - TEMPERATURE_OFFSET
}

fn or_not_found<T>(value: Option<T>) -> Field<T> {
    value.map_or(Field::Invalid(FieldError::NotFound), Field::Valid)
}

fn plausible_cell(cell: u8, millivolts: u16) -> Field<CellVoltage> {
    let (min, max) = CELL_MILLIVOLTS;
    if (min..=max).contains(&millivolts) {
        Field::Valid(CellVoltage { cell, millivolts })
    } else {
        log::debug!("Cell #{cell} {millivolts}mV outside plausible range");
        Field::Invalid(FieldError::OutOfRange {
            value: millivolts as f64,
            min: min as f64,
            max: max as f64,
        })
    }
}

/// Decodes a single validated legacy frame according to its data id.
pub fn decode(frame: &ValidatedFrame<'_>) -> Result<TelemetryRecord, Error> {
    if frame.payload().is_empty() {
        return Err(Error::EmptyPayload);
    }
    let command = LegacyCommand::try_from(frame.command())?;
    log::trace!("Decoding {command} frame {:02X?}", frame.bytes());

    let mut record = TelemetryRecord {
        trailer: Some(frame.trailer()),
        warnings: frame.warnings().to_vec(),
        ..Default::default()
    };

    match command {
        LegacyCommand::VoltageCurrentSoc => {
            record.pack_voltage = or_not_found(frame.payload_u16(4).map(voltage));
            record.current = or_not_found(frame.payload_u16(6).map(current));
            record.soc = frame
                .payload_u16(8)
                .map_or(Field::Invalid(FieldError::NotFound), soc);
        }
        LegacyCommand::CellVoltageRange => {
            let max = match (frame.payload_u16(4), frame.payload_u8(6)) {
                (Some(mv), Some(cell)) => plausible_cell(cell, mv),
                _ => Field::Invalid(FieldError::NotFound),
            };
            let min = match (frame.payload_u16(7), frame.payload_u8(9)) {
                (Some(mv), Some(cell)) => plausible_cell(cell, mv),
                _ => Field::Invalid(FieldError::NotFound),
            };
            match (max.get(), min.get()) {
                (Some(high), Some(low)) if low.millivolts > high.millivolts => {
                    log::debug!("Lowest cell {low:?} above highest cell {high:?}");
                    record.max_cell_voltage = Field::Invalid(FieldError::Inconsistent);
                    record.min_cell_voltage = Field::Invalid(FieldError::Inconsistent);
                    record.cell_voltage_delta = Field::Invalid(FieldError::Inconsistent);
                }
                (Some(high), Some(low)) => {
                    record.cell_voltage_delta = Field::Valid(high.millivolts - low.millivolts);
                    record.max_cell_voltage = max;
                    record.min_cell_voltage = min;
                }
                _ => {
                    record.cell_voltage_delta = Field::Invalid(FieldError::NotFound);
                    record.max_cell_voltage = max;
                    record.min_cell_voltage = min;
                }
            }
        }
        LegacyCommand::TemperatureRange => {
            let sensor_at = |offset: usize| {
                frame
                    .payload_u8(offset)
                    .zip(frame.payload_u8(offset + 1))
                    .map(|(raw, sensor)| Temperature {
                        sensor,
                        celsius: temperature(raw),
                    })
            };
            let (max, min) = (sensor_at(4), sensor_at(6));
            record.temperature_delta = match (max, min) {
                (Some(high), Some(low)) if low.celsius > high.celsius => {
                    log::debug!("Lowest sensor {low:?} above highest sensor {high:?}");
                    Field::Invalid(FieldError::Inconsistent)
                }
                (Some(high), Some(low)) => Field::Valid(high.celsius - low.celsius),
                _ => Field::Invalid(FieldError::NotFound),
            };
            record.max_temperature = or_not_found(max);
            record.min_temperature = or_not_found(min);
        }
        LegacyCommand::MosfetCapacity => {
            record.mosfets = or_not_found(frame.payload_u8(4).zip(frame.payload_u8(5)).map(
                |(charging, discharging)| MosfetState {
                    charging: charging != 0,
                    discharging: discharging != 0,
                },
            ));
            record.cycles = or_not_found(frame.payload_u8(6).map(u16::from));
            // Capacity is reported in mAh
            record.total_capacity =
                or_not_found(frame.payload_u32(7).map(|raw| raw as f32 / 1000.0));
        }
        LegacyCommand::StatusInfo => {
            record.status = match (
                frame.payload_u8(4),
                frame.payload_u8(5),
                frame.payload_u8(6),
                frame.payload_u8(7),
                frame.payload_u8(8),
            ) {
                (Some(cells), Some(sensors), Some(charger), Some(load), Some(dio)) => {
                    Field::Valid(Status {
                        cells,
                        temperature_sensors: sensors,
                        charger_running: charger != 0,
                        load_running: load != 0,
                        states: dio.into(),
                    })
                }
                _ => Field::Invalid(FieldError::NotFound),
            };
            record.cycles = or_not_found(frame.payload_u16(9));
        }
        LegacyCommand::CellVoltages => {
            let cells = cell_voltages(frame, 0, &mut record.rejected_cells);
            record.set_cells(cells);
        }
        LegacyCommand::CellTemperatures => {
            let temperatures = cell_temperatures(frame, 0);
            record.set_temperatures(temperatures);
        }
        LegacyCommand::FailureCodes => {
            record.faults = Field::Valid(fault_codes(frame));
        }
    }

    Ok(record)
}

/// Cells carried by one 0x95 frame, numbered from its frame number.
///
/// When `n_cells` is non-zero, cells beyond it are ignored. Implausible
/// readings are left out and their cell numbers pushed to `rejected`.
fn cell_voltages(
    frame: &ValidatedFrame<'_>,
    n_cells: usize,
    rejected: &mut Vec<u8>,
) -> Vec<CellVoltage> {
    let Some(n_frame) = frame.payload_u8(LEGACY_DATA_OFFSET) else {
        return Vec::new();
    };
    let mut result = Vec::with_capacity(CELLS_PER_FRAME);
    for i in 0..CELLS_PER_FRAME {
        let n_cell = (n_frame as usize).saturating_sub(1) * CELLS_PER_FRAME + i + 1;
        if n_cells != 0 && n_cell > n_cells {
            break;
        }
        let Some(mv) = frame.payload_u16(5 + 2 * i) else {
            break;
        };
        log::trace!("Frame #{} cell #{} mV={}", n_frame, n_cell, mv);
        match plausible_cell(n_cell as u8, mv) {
            Field::Valid(cell) => result.push(cell),
            _ => {
                log::warn!("Frame #{n_frame} cell #{n_cell} reading {mv}mV rejected");
                rejected.push(n_cell as u8);
            }
        }
    }
    result
}

/// Sensors carried by one 0x96 frame, numbered from its frame number.
fn cell_temperatures(frame: &ValidatedFrame<'_>, n_sensors: usize) -> Vec<Temperature> {
    let Some(n_frame) = frame.payload_u8(LEGACY_DATA_OFFSET) else {
        return Vec::new();
    };
    let mut result = Vec::with_capacity(SENSORS_PER_FRAME);
    for i in 0..SENSORS_PER_FRAME {
        let n_sensor = (n_frame as usize).saturating_sub(1) * SENSORS_PER_FRAME + i + 1;
        if n_sensors != 0 && n_sensor > n_sensors {
            break;
        }
        let Some(raw) = frame.payload_u8(5 + i) else {
            break;
        };
        let celsius = temperature(raw);
        log::trace!("Frame #{} sensor #{} °C={}", n_frame, n_sensor, celsius);
        result.push(Temperature {
            sensor: n_sensor as u8,
            celsius,
        });
    }
    result
}

fn fault_codes(frame: &ValidatedFrame<'_>) -> Vec<FaultCode> {
    let mut result = Vec::new();
    for (i, codes) in FaultCode::BIT_MAP.iter().enumerate() {
        let Some(byte) = frame.payload_u8(LEGACY_DATA_OFFSET + i) else {
            break;
        };
        for (bit, code) in codes.iter().enumerate() {
            if read_bit!(byte, bit) {
                result.push(*code);
            }
        }
    }
    result
}

/// Decodes a complete multi-frame reply to [`LegacyCommand::CellVoltages`] or
/// [`LegacyCommand::CellTemperatures`].
///
/// `count` is the number of cells or sensors reported by the status reply.
/// Every chunk is validated before any of them is decoded.
pub fn decode_series(
    buffer: &[u8],
    command: LegacyCommand,
    count: u8,
    echo: EchoCheck,
) -> Result<TelemetryRecord, Error> {
    let n_frames = match command {
        LegacyCommand::CellVoltages => command.reply_frames(count, 0),
        LegacyCommand::CellTemperatures => command.reply_frames(0, count),
        _ => return Err(Error::UnsupportedCommand(command.id())),
    };
    if n_frames == 0 {
        return Err(Error::EmptyPayload);
    }
    let frames = validate_legacy_series(buffer, command.id(), n_frames, echo).map_err(|err| {
        Error::rejected(
            crate::ProtocolVariant::LegacyChecksum,
            err,
            &buffer[..buffer.len().min(n_frames * crate::protocol::LEGACY_FRAME_LENGTH)],
        )
    })?;

    let mut record = TelemetryRecord {
        trailer: frames.last().map(|frame| frame.trailer()),
        warnings: frames
            .iter()
            .flat_map(|frame| frame.warnings().iter().copied())
            .collect(),
        ..Default::default()
    };
    match command {
        LegacyCommand::CellVoltages => {
            let mut rejected = Vec::new();
            let cells = frames
                .iter()
                .flat_map(|frame| cell_voltages(frame, count as usize, &mut rejected))
                .collect();
            record.set_cells(cells);
            record.rejected_cells = rejected;
        }
        _ => record.set_temperatures(
            frames
                .iter()
                .flat_map(|frame| cell_temperatures(frame, count as usize))
                .collect(),
        ),
    }
    Ok(record)
}
