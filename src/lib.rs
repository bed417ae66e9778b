#![cfg_attr(docsrs, feature(doc_cfg))]
//! # dalytelemetry_lib
//!
//! Validation and decoding of the telemetry frames sent by Daly BMS devices.
//!
//! Two wire variants are supported:
//! - the 13-byte serial/RS485 frames protected by an additive checksum
//!   ([`ProtocolVariant::LegacyChecksum`]),
//! - the variable-length BLE frames protected by CRC-16/MODBUS
//!   ([`ProtocolVariant::BleCrc16`]).
//!
//! Every buffer passes through a validator before any field is read. The
//! result is a [`TelemetryRecord`] in which each field is independently
//! [`Field::Valid`], [`Field::Invalid`] or [`Field::Absent`].
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `dalytelemetry` command-line tool.
//!
//! ### Transport Features
//! - `serialport`: Enables a **synchronous** serial client using the `serialport` crate.
//!
//! ### Utility Features
//! - `serde`: Enables `serde` support for telemetry records and the BLE layout.
//! - `bin-dependencies`: Enables all features required by the `dalytelemetry` binary executable.

/// Contains error types for the library.
mod error;
/// Additive checksum and CRC-16/MODBUS.
pub mod checksum;
/// Field decoders and the variant dispatch.
pub mod decode;
/// Structural validation of raw buffers.
pub mod frame;
/// Wire constants, commands and request encoding.
pub mod protocol;
/// The decoded telemetry model.
pub mod telemetry;

pub use decode::{BleLayout, Decoder};
pub use error::{Error, FieldError, FrameError, FrameWarning};
pub use frame::{RawFrame, ValidatedFrame};
pub use protocol::ProtocolVariant;
pub use telemetry::{Field, TelemetryRecord};

/// Synchronous client for Daly BMS communication.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;
