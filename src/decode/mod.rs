//! Field decoding for both protocol variants.
//!
//! Each variant is a [`Protocol`] strategy pairing its validator with its
//! field decoder. [`Decoder`] holds both and dispatches on the variant a
//! [`RawFrame`] is tagged with.

pub mod ble;
pub mod legacy;

pub use ble::BleLayout;

use crate::frame::{validate_ble, validate_legacy, EchoCheck, RawFrame, ValidatedFrame};
use crate::protocol::ProtocolVariant;
use crate::telemetry::TelemetryRecord;
use crate::Error;

/// Validation and decoding of one protocol variant.
pub trait Protocol {
    fn variant(&self) -> ProtocolVariant;

    /// Structural checks; nothing is decoded here.
    fn validate<'a>(
        &self,
        buffer: &'a [u8],
        expected_command: u8,
    ) -> Result<ValidatedFrame<'a>, crate::FrameError>;

    /// Field extraction from a frame that passed [`Protocol::validate`].
    fn decode(&self, frame: &ValidatedFrame<'_>) -> Result<TelemetryRecord, Error>;

    /// Validates then decodes, reporting rejections with the raw frame.
    fn decode_buffer(&self, buffer: &[u8], expected_command: u8) -> Result<TelemetryRecord, Error> {
        let frame = self
            .validate(buffer, expected_command)
            .map_err(|err| Error::rejected(self.variant(), err, buffer))?;
        self.decode(&frame)
    }
}

/// The 13-byte checksum protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct Legacy {
    pub echo: EchoCheck,
}

impl Protocol for Legacy {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::LegacyChecksum
    }

    fn validate<'a>(
        &self,
        buffer: &'a [u8],
        expected_command: u8,
    ) -> Result<ValidatedFrame<'a>, crate::FrameError> {
        validate_legacy(buffer, expected_command, self.echo)
    }

    fn decode(&self, frame: &ValidatedFrame<'_>) -> Result<TelemetryRecord, Error> {
        legacy::decode(frame)
    }
}

/// The CRC-16/MODBUS protocol spoken over BLE.
#[derive(Debug, Clone, Default)]
pub struct Ble {
    pub layout: BleLayout,
}

impl Protocol for Ble {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::BleCrc16
    }

    fn validate<'a>(
        &self,
        buffer: &'a [u8],
        _expected_command: u8,
    ) -> Result<ValidatedFrame<'a>, crate::FrameError> {
        validate_ble(buffer)
    }

    fn decode(&self, frame: &ValidatedFrame<'_>) -> Result<TelemetryRecord, Error> {
        ble::decode(frame, &self.layout)
    }
}

/// Stateless entry point turning raw frames into telemetry records.
///
/// # Example
///
/// ```
/// use dalytelemetry_lib::{Decoder, Field, ProtocolVariant, RawFrame};
///
/// let raw = RawFrame::new(
///     [0xA5, 0x40, 0x90, 0x08, 0x00, 0x7D, 0x75, 0x30, 0x03, 0x84, 0x00, 0x00, 0x26],
///     ProtocolVariant::LegacyChecksum,
/// );
/// let record = Decoder::default().decode(&raw, 0x90)?;
/// assert_eq!(record.pack_voltage, Field::Valid(12.5));
/// assert_eq!(record.soc, Field::Valid(90.0));
/// # Ok::<(), dalytelemetry_lib::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    pub legacy: Legacy,
    pub ble: Ble,
}

impl Decoder {
    pub fn new(legacy: Legacy, ble: Ble) -> Self {
        Self { legacy, ble }
    }

    pub fn with_layout(layout: BleLayout) -> Self {
        Self {
            legacy: Legacy::default(),
            ble: Ble { layout },
        }
    }

    pub fn protocol(&self, variant: ProtocolVariant) -> &dyn Protocol {
        match variant {
            ProtocolVariant::LegacyChecksum => &self.legacy,
            ProtocolVariant::BleCrc16 => &self.ble,
        }
    }

    /// Decodes one frame; `expected_command` is the command id that was sent.
    pub fn decode(&self, raw: &RawFrame, expected_command: u8) -> Result<TelemetryRecord, Error> {
        self.protocol(raw.variant())
            .decode_buffer(raw.bytes(), expected_command)
    }
}
