//! The decoder's output model.
//!
//! A [`TelemetryRecord`] is built fresh for every decoded frame. Each value is
//! wrapped in a [`Field`] so that a measured zero can never be confused with a
//! value that failed to decode.

use crate::error::{FieldError, FrameWarning};
use crate::frame::Trailer;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One telemetry value together with its validity.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Field<T> {
    /// The decoded frame does not carry this value.
    Absent,
    Valid(T),
    Invalid(FieldError),
}

impl<T> Field<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Field::Valid(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Field::Absent)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Valid(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FieldError> {
        match self {
            Field::Invalid(error) => Some(error),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Field::Absent => Field::Absent,
            Field::Valid(value) => Field::Valid(f(value)),
            Field::Invalid(error) => Field::Invalid(error),
        }
    }

    /// Keeps `self` unless `newer` carries something.
    fn or_newer(&self, newer: &Field<T>) -> Field<T>
    where
        T: Clone,
    {
        if newer.is_absent() {
            self.clone()
        } else {
            newer.clone()
        }
    }
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Absent
    }
}

impl<T: Copy> Field<T> {
    pub fn get(&self) -> Option<T> {
        self.value().copied()
    }
}

impl Field<f32> {
    /// Valid when `value` lies in `[min, max]`, flagged otherwise.
    pub(crate) fn checked(value: f32, min: f32, max: f32) -> Self {
        if (min..=max).contains(&value) {
            Field::Valid(value)
        } else {
            log::debug!("value {value} outside [{min}, {max}]");
            Field::Invalid(FieldError::OutOfRange {
                value: value as f64,
                min: min as f64,
                max: max as f64,
            })
        }
    }
}

/// The voltage of one physical cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CellVoltage {
    /// 1-based cell number
    pub cell: u8,
    pub millivolts: u16,
}

/// The reading of one temperature sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Temperature {
    /// 1-based sensor number
    pub sensor: u8,
    pub celsius: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MosfetState {
    pub charging: bool,
    pub discharging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IOState {
    pub di1: bool,
    pub di2: bool,
    pub di3: bool,
    pub di4: bool,
    pub do1: bool,
    pub do2: bool,
    pub do3: bool,
    pub do4: bool,
}

macro_rules! read_bit {
    ($byte:expr,$position:expr) => {
        ($byte >> $position) & 1 != 0
    };
}
pub(crate) use read_bit;

impl From<u8> for IOState {
    fn from(dio: u8) -> Self {
        Self {
            di1: read_bit!(dio, 0),
            di2: read_bit!(dio, 1),
            di3: read_bit!(dio, 2),
            di4: read_bit!(dio, 3),
            do1: read_bit!(dio, 4),
            do2: read_bit!(dio, 5),
            do3: read_bit!(dio, 6),
            do4: read_bit!(dio, 7),
        }
    }
}

/// Content of the legacy status information reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Status {
    pub cells: u8,
    pub temperature_sensors: u8,
    pub charger_running: bool,
    pub load_running: bool,
    pub states: IOState,
}

/// One battery snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TelemetryRecord {
    /// Pack voltage in V
    pub pack_voltage: Field<f32>,
    /// Current in A, negative=charging, positive=discharging
    pub current: Field<f32>,
    /// State of charge in percent
    pub soc: Field<f32>,
    /// Accepted cell voltages ordered by cell number
    pub cell_voltages: Field<Vec<CellVoltage>>,
    pub max_cell_voltage: Field<CellVoltage>,
    pub min_cell_voltage: Field<CellVoltage>,
    /// Difference between the highest and lowest cell in mV
    pub cell_voltage_delta: Field<u16>,
    /// Cell numbers whose reading was implausible and left out of `cell_voltages`
    pub rejected_cells: Vec<u8>,
    pub temperatures: Field<Vec<Temperature>>,
    pub max_temperature: Field<Temperature>,
    pub min_temperature: Field<Temperature>,
    /// Difference between the highest and lowest sensor in °C
    pub temperature_delta: Field<i16>,
    pub cycles: Field<u16>,
    pub mosfets: Field<MosfetState>,
    pub faults: Field<Vec<FaultCode>>,
    /// Remaining capacity in Ah
    pub remaining_capacity: Field<f32>,
    /// Total capacity in Ah
    pub total_capacity: Field<f32>,
    pub status: Field<Status>,
    /// Trailer of the frame this record was decoded from
    pub trailer: Option<Trailer>,
    pub warnings: Vec<FrameWarning>,
}

impl TelemetryRecord {
    /// Power in W, when voltage and current are both valid.
    pub fn power(&self) -> Option<f32> {
        Some(self.pack_voltage.get()? * self.current.get()?)
    }

    /// True when no field carries a valid value.
    pub fn is_empty(&self) -> bool {
        !(self.pack_voltage.is_valid()
            || self.current.is_valid()
            || self.soc.is_valid()
            || self.cell_voltages.is_valid()
            || self.max_cell_voltage.is_valid()
            || self.min_cell_voltage.is_valid()
            || self.cell_voltage_delta.is_valid()
            || self.temperatures.is_valid()
            || self.max_temperature.is_valid()
            || self.min_temperature.is_valid()
            || self.temperature_delta.is_valid()
            || self.cycles.is_valid()
            || self.mosfets.is_valid()
            || self.faults.is_valid()
            || self.remaining_capacity.is_valid()
            || self.total_capacity.is_valid()
            || self.status.is_valid())
    }

    /// Fills the cell aggregates from a list of accepted cells.
    pub(crate) fn set_cells(&mut self, cells: Vec<CellVoltage>) {
        let max = cells.iter().copied().max_by_key(|c| c.millivolts);
        let min = cells.iter().copied().min_by_key(|c| c.millivolts);
        match (max, min) {
            (Some(max), Some(min)) => {
                self.max_cell_voltage = Field::Valid(max);
                self.min_cell_voltage = Field::Valid(min);
                self.cell_voltage_delta = Field::Valid(max.millivolts - min.millivolts);
                self.cell_voltages = Field::Valid(cells);
            }
            _ => {
                self.max_cell_voltage = Field::Invalid(FieldError::NotFound);
                self.min_cell_voltage = Field::Invalid(FieldError::NotFound);
                self.cell_voltage_delta = Field::Invalid(FieldError::NotFound);
                self.cell_voltages = Field::Invalid(FieldError::NotFound);
            }
        }
    }

    /// Fills the temperature aggregates from a list of sensor readings.
    pub(crate) fn set_temperatures(&mut self, temperatures: Vec<Temperature>) {
        let max = temperatures.iter().copied().max_by_key(|t| t.celsius);
        let min = temperatures.iter().copied().min_by_key(|t| t.celsius);
        match (max, min) {
            (Some(max), Some(min)) => {
                self.max_temperature = Field::Valid(max);
                self.min_temperature = Field::Valid(min);
                self.temperature_delta = Field::Valid(max.celsius - min.celsius);
                self.temperatures = Field::Valid(temperatures);
            }
            _ => {
                self.max_temperature = Field::Invalid(FieldError::NotFound);
                self.min_temperature = Field::Invalid(FieldError::NotFound);
                self.temperature_delta = Field::Invalid(FieldError::NotFound);
                self.temperatures = Field::Invalid(FieldError::NotFound);
            }
        }
    }

    /// Returns a new record holding every field `newer` carries and `self` otherwise.
    ///
    /// Remaining capacity is recomputed from the merged SOC and total capacity
    /// unless `newer` reported it directly.
    pub fn merge(&self, newer: &TelemetryRecord) -> TelemetryRecord {
        let mut merged = TelemetryRecord {
            pack_voltage: self.pack_voltage.or_newer(&newer.pack_voltage),
            current: self.current.or_newer(&newer.current),
            soc: self.soc.or_newer(&newer.soc),
            cell_voltages: self.cell_voltages.or_newer(&newer.cell_voltages),
            max_cell_voltage: self.max_cell_voltage.or_newer(&newer.max_cell_voltage),
            min_cell_voltage: self.min_cell_voltage.or_newer(&newer.min_cell_voltage),
            cell_voltage_delta: self.cell_voltage_delta.or_newer(&newer.cell_voltage_delta),
            rejected_cells: if newer.cell_voltages.is_absent() {
                self.rejected_cells.clone()
            } else {
                newer.rejected_cells.clone()
            },
            temperatures: self.temperatures.or_newer(&newer.temperatures),
            max_temperature: self.max_temperature.or_newer(&newer.max_temperature),
            min_temperature: self.min_temperature.or_newer(&newer.min_temperature),
            temperature_delta: self.temperature_delta.or_newer(&newer.temperature_delta),
            cycles: self.cycles.or_newer(&newer.cycles),
            mosfets: self.mosfets.or_newer(&newer.mosfets),
            faults: self.faults.or_newer(&newer.faults),
            remaining_capacity: newer.remaining_capacity.clone(),
            total_capacity: self.total_capacity.or_newer(&newer.total_capacity),
            status: self.status.or_newer(&newer.status),
            trailer: newer.trailer.or(self.trailer),
            warnings: newer.warnings.clone(),
        };
        if merged.remaining_capacity.is_absent() {
            merged.remaining_capacity = match (&merged.soc, &merged.total_capacity) {
                (Field::Valid(soc), Field::Valid(total)) => Field::Valid(soc / 100.0 * total),
                (Field::Invalid(error), _) | (_, Field::Invalid(error)) => {
                    Field::Invalid(error.clone())
                }
                _ => Field::Absent,
            };
        }
        merged
    }
}

/// Alarm and failure flags reported by the legacy failure code reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FaultCode {
    CellVoltHighLevel1,
    CellVoltHighLevel2,
    CellVoltLowLevel1,
    CellVoltLowLevel2,
    SumVoltHighLevel1,
    SumVoltHighLevel2,
    SumVoltLowLevel1,
    SumVoltLowLevel2,
    ChargeTempHighLevel1,
    ChargeTempHighLevel2,
    ChargeTempLowLevel1,
    ChargeTempLowLevel2,
    DischargeTempHighLevel1,
    DischargeTempHighLevel2,
    DischargeTempLowLevel1,
    DischargeTempLowLevel2,
    ChargeOvercurrentLevel1,
    ChargeOvercurrentLevel2,
    DischargeOvercurrentLevel1,
    DischargeOvercurrentLevel2,
    SocHighLevel1,
    SocHighLevel2,
    SocLowLevel1,
    SocLowLevel2,
    DiffVoltLevel1,
    DiffVoltLevel2,
    DiffTempLevel1,
    DiffTempLevel2,
    ChargeMosTempHighAlarm,
    DischargeMosTempHighAlarm,
    ChargeMosTempSensorErr,
    DischargeMosTempSensorErr,
    ChargeMosAdhesionErr,
    DischargeMosAdhesionErr,
    ChargeMosOpenCircuitErr,
    DischargeMosOpenCircuitErr,
    AfeCollectChipErr,
    VoltageCollectDropped,
    CellTempSensorErr,
    EepromErr,
    RtcErr,
    PrechargeFailure,
    CommunicationFailure,
    InternalCommunicationFailure,
    CurrentModuleFault,
    SumVoltageDetectFault,
    ShortCircuitProtectFault,
    LowVoltForbiddenChargeFault,
}

impl FaultCode {
    /// Bit layout of the failure code reply, data byte by data byte, LSB first.
    pub(crate) const BIT_MAP: [&'static [FaultCode]; 7] = [
        &[
            FaultCode::CellVoltHighLevel1,
            FaultCode::CellVoltHighLevel2,
            FaultCode::CellVoltLowLevel1,
            FaultCode::CellVoltLowLevel2,
            FaultCode::SumVoltHighLevel1,
            FaultCode::SumVoltHighLevel2,
            FaultCode::SumVoltLowLevel1,
            FaultCode::SumVoltLowLevel2,
        ],
        &[
            FaultCode::ChargeTempHighLevel1,
            FaultCode::ChargeTempHighLevel2,
            FaultCode::ChargeTempLowLevel1,
            FaultCode::ChargeTempLowLevel2,
            FaultCode::DischargeTempHighLevel1,
            FaultCode::DischargeTempHighLevel2,
            FaultCode::DischargeTempLowLevel1,
            FaultCode::DischargeTempLowLevel2,
        ],
        &[
            FaultCode::ChargeOvercurrentLevel1,
            FaultCode::ChargeOvercurrentLevel2,
            FaultCode::DischargeOvercurrentLevel1,
            FaultCode::DischargeOvercurrentLevel2,
            FaultCode::SocHighLevel1,
            FaultCode::SocHighLevel2,
            FaultCode::SocLowLevel1,
            FaultCode::SocLowLevel2,
        ],
        &[
            FaultCode::DiffVoltLevel1,
            FaultCode::DiffVoltLevel2,
            FaultCode::DiffTempLevel1,
            FaultCode::DiffTempLevel2,
        ],
        &[
            FaultCode::ChargeMosTempHighAlarm,
            FaultCode::DischargeMosTempHighAlarm,
            FaultCode::ChargeMosTempSensorErr,
            FaultCode::DischargeMosTempSensorErr,
            FaultCode::ChargeMosAdhesionErr,
            FaultCode::DischargeMosAdhesionErr,
            FaultCode::ChargeMosOpenCircuitErr,
            FaultCode::DischargeMosOpenCircuitErr,
        ],
        &[
            FaultCode::AfeCollectChipErr,
            FaultCode::VoltageCollectDropped,
            FaultCode::CellTempSensorErr,
            FaultCode::EepromErr,
            FaultCode::RtcErr,
            FaultCode::PrechargeFailure,
            FaultCode::CommunicationFailure,
            FaultCode::InternalCommunicationFailure,
        ],
        &[
            FaultCode::CurrentModuleFault,
            FaultCode::SumVoltageDetectFault,
            FaultCode::ShortCircuitProtectFault,
            FaultCode::LowVoltForbiddenChargeFault,
        ],
    ];
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FaultCode::CellVoltHighLevel1 => write!(f, "Cell voltage is too high level one alarm"),
            FaultCode::CellVoltHighLevel2 => write!(f, "Cell voltage is too high level two alarm"),
            FaultCode::CellVoltLowLevel1 => write!(f, "Cell voltage is too low level one alarm"),
            FaultCode::CellVoltLowLevel2 => write!(f, "Cell voltage is too low level two alarm"),
            FaultCode::SumVoltHighLevel1 => write!(f, "Total voltage is too high level one alarm"),
            FaultCode::SumVoltHighLevel2 => write!(f, "Total voltage is too high level two alarm"),
            FaultCode::SumVoltLowLevel1 => write!(f, "Total voltage is too low level one alarm"),
            FaultCode::SumVoltLowLevel2 => write!(f, "Total voltage is too low level two alarm"),
            FaultCode::ChargeTempHighLevel1 => {
                write!(f, "Charging temperature too high level one alarm")
            }
            FaultCode::ChargeTempHighLevel2 => {
                write!(f, "Charging temperature too high level two alarm")
            }
            FaultCode::ChargeTempLowLevel1 => {
                write!(f, "Charging temperature too low level one alarm")
            }
            FaultCode::ChargeTempLowLevel2 => {
                write!(f, "Charging temperature too low level two alarm")
            }
            FaultCode::DischargeTempHighLevel1 => {
                write!(f, "Discharging temperature too high level one alarm")
            }
            FaultCode::DischargeTempHighLevel2 => {
                write!(f, "Discharging temperature too high level two alarm")
            }
            FaultCode::DischargeTempLowLevel1 => {
                write!(f, "Discharging temperature too low level one alarm")
            }
            FaultCode::DischargeTempLowLevel2 => {
                write!(f, "Discharging temperature too low level two alarm")
            }
            FaultCode::ChargeOvercurrentLevel1 => write!(f, "Charge over current level one alarm"),
            FaultCode::ChargeOvercurrentLevel2 => write!(f, "Charge over current level two alarm"),
            FaultCode::DischargeOvercurrentLevel1 => {
                write!(f, "Discharge over current level one alarm")
            }
            FaultCode::DischargeOvercurrentLevel2 => {
                write!(f, "Discharge over current level two alarm")
            }
            FaultCode::SocHighLevel1 => write!(f, "SOC is too high level one alarm"),
            FaultCode::SocHighLevel2 => write!(f, "SOC is too high level two alarm"),
            FaultCode::SocLowLevel1 => write!(f, "SOC is too low level one alarm"),
            FaultCode::SocLowLevel2 => write!(f, "SOC is too low level two alarm"),
            FaultCode::DiffVoltLevel1 => {
                write!(f, "Excessive cell voltage difference level one alarm")
            }
            FaultCode::DiffVoltLevel2 => {
                write!(f, "Excessive cell voltage difference level two alarm")
            }
            FaultCode::DiffTempLevel1 => {
                write!(f, "Excessive temperature difference level one alarm")
            }
            FaultCode::DiffTempLevel2 => {
                write!(f, "Excessive temperature difference level two alarm")
            }
            FaultCode::ChargeMosTempHighAlarm => write!(f, "Charging MOS overtemperature alarm"),
            FaultCode::DischargeMosTempHighAlarm => {
                write!(f, "Discharging MOS overtemperature alarm")
            }
            FaultCode::ChargeMosTempSensorErr => {
                write!(f, "Charging MOS temperature sensor failure")
            }
            FaultCode::DischargeMosTempSensorErr => {
                write!(f, "Discharging MOS temperature sensor failure")
            }
            FaultCode::ChargeMosAdhesionErr => write!(f, "Charging MOS adhesion failure"),
            FaultCode::DischargeMosAdhesionErr => write!(f, "Discharging MOS adhesion failure"),
            FaultCode::ChargeMosOpenCircuitErr => write!(f, "Charging MOS open circuit failure"),
            FaultCode::DischargeMosOpenCircuitErr => {
                write!(f, "Discharging MOS open circuit failure")
            }
            FaultCode::AfeCollectChipErr => write!(f, "AFE acquisition chip malfunction"),
            FaultCode::VoltageCollectDropped => write!(f, "Cell voltage collection dropped"),
            FaultCode::CellTempSensorErr => write!(f, "Cell temperature sensor failure"),
            FaultCode::EepromErr => write!(f, "EEPROM storage failure"),
            FaultCode::RtcErr => write!(f, "RTC clock malfunction"),
            FaultCode::PrechargeFailure => write!(f, "Precharge failure"),
            FaultCode::CommunicationFailure => write!(f, "Vehicle communication failure"),
            FaultCode::InternalCommunicationFailure => {
                write!(f, "Internal communication module failure")
            }
            FaultCode::CurrentModuleFault => write!(f, "Current module failure"),
            FaultCode::SumVoltageDetectFault => write!(f, "Total voltage detection failure"),
            FaultCode::ShortCircuitProtectFault => write!(f, "Short circuit protection failure"),
            FaultCode::LowVoltForbiddenChargeFault => write!(f, "Low voltage, charging forbidden"),
        }
    }
}
