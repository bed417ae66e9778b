use crate::protocol::ProtocolVariant;

/// Reasons a raw buffer is rejected before any field is decoded.
///
/// Every variant aborts the whole decode: the frame is untrustworthy and the
/// caller may retry the read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The buffer cannot hold the smallest valid frame of its variant.
    #[error("frame too short - required={required} received={received}")]
    TooShort { required: usize, received: usize },
    /// Start byte (legacy) or start/function bytes (BLE) do not match.
    #[error("bad header - expected={expected:02X?} received={received:02X?}")]
    BadHeader { expected: Vec<u8>, received: Vec<u8> },
    /// The BLE length byte disagrees with the number of bytes received.
    #[error("length mismatch - declared={declared} received={received}")]
    LengthMismatch { declared: usize, received: usize },
    /// The echoed command differs from the one sent; only raised in strict mode.
    #[error("command mismatch - expected={expected:#04X} received={received:#04X}")]
    CommandMismatch { expected: u8, received: u8 },
    /// Trailer does not match the checksum/CRC computed over the frame.
    #[error("invalid checksum - calculated={calculated:#06X} received={received:#06X}")]
    ChecksumMismatch { calculated: u16, received: u16 },
    /// A chunk of a multi-frame reply carries the wrong frame number.
    #[error("frame out of order - expected={expected} received={received}")]
    FrameOutOfOrder { expected: u8, received: u8 },
}

/// Non-fatal observations made while validating a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameWarning {
    #[error("command echo mismatch - expected={expected:#04X} received={received:#04X}")]
    CommandMismatch { expected: u8, received: u8 },
    #[error("unexpected reply address {received:#04X}")]
    AddressMismatch { received: u8 },
}

/// Why a single telemetry field is not valid.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldError {
    /// The field was decoded but its value is implausible.
    #[error("value {value} out of range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
    /// The field lies outside the payload or nothing plausible was found.
    #[error("field not found in payload")]
    NotFound,
    /// The field contradicts another field of the same frame.
    #[error("field inconsistent with related fields")]
    Inconsistent,
}

/// Errors returned by the decoder and the transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame-level validation failed; no telemetry is returned.
    #[error("{variant:?} frame rejected: {error} (raw={raw_hex})")]
    Rejected {
        variant: ProtocolVariant,
        #[source]
        error: FrameError,
        raw_hex: String,
    },
    /// The frame validated but carries no payload bytes at all.
    #[error("frame carries an empty payload")]
    EmptyPayload,
    /// The legacy command id has no known layout.
    #[error("unsupported command {0:#04X}")]
    UnsupportedCommand(u8),
    /// A multi-frame request needs the cell or sensor count from a status reply first.
    #[error("get_status() has to be called at least once before")]
    StatusRequired,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serialport")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl Error {
    pub(crate) fn rejected(variant: ProtocolVariant, error: FrameError, raw: &[u8]) -> Self {
        let raw_hex = hex::encode_upper(raw);
        log::warn!("{variant:?} frame rejected: {error} buffer={raw_hex}");
        Error::Rejected {
            variant,
            error,
            raw_hex,
        }
    }

    /// Returns the frame-level cause when this error is a rejection.
    pub fn frame_error(&self) -> Option<&FrameError> {
        match self {
            Error::Rejected { error, .. } => Some(error),
            _ => None,
        }
    }
}
