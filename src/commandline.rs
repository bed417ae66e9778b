use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use dalytelemetry_lib::protocol::LegacyCommand;
use dalytelemetry_lib::ProtocolVariant;
use std::path::PathBuf;
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/rfcomm0")
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum Variant {
    /// 13-byte frames with an additive checksum (UART, RS485)
    Legacy,
    /// Length-prefixed frames with a CRC-16/MODBUS trailer (Bluetooth LE)
    Ble,
}

impl From<Variant> for ProtocolVariant {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::Legacy => ProtocolVariant::LegacyChecksum,
            Variant::Ble => ProtocolVariant::BleCrc16,
        }
    }
}

/// Register block of a BLE read request.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum BleBlock {
    /// Main information: cells, SOC, current, temperatures, cycles
    Info,
    /// MOSFET information
    Mos,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum ReadCommand {
    /// Total voltage, current and SOC
    Soc,
    /// Highest/lowest cell voltage
    VoltageRange,
    /// Highest/lowest temperature
    TemperatureRange,
    /// MOSFET state, cycles and capacity
    Mosfet,
    /// Cell count, sensor count, charger/load state
    Status,
    /// Individual cell voltages (fetches the status first)
    CellVoltages,
    /// Individual temperature sensors (fetches the status first)
    CellTemperatures,
    /// Failure codes
    Errors,
    /// BLE main information block
    BleInfo,
    /// Every legacy command, merged into one record
    All,
}

impl ReadCommand {
    pub fn legacy_command(self) -> Option<LegacyCommand> {
        match self {
            ReadCommand::Soc => Some(LegacyCommand::VoltageCurrentSoc),
            ReadCommand::VoltageRange => Some(LegacyCommand::CellVoltageRange),
            ReadCommand::TemperatureRange => Some(LegacyCommand::TemperatureRange),
            ReadCommand::Mosfet => Some(LegacyCommand::MosfetCapacity),
            ReadCommand::Status => Some(LegacyCommand::StatusInfo),
            ReadCommand::CellVoltages => Some(LegacyCommand::CellVoltages),
            ReadCommand::CellTemperatures => Some(LegacyCommand::CellTemperatures),
            ReadCommand::Errors => Some(LegacyCommand::FailureCodes),
            ReadCommand::BleInfo | ReadCommand::All => None,
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Validate and decode a frame given as hex
    Decode {
        /// Frame bytes as hex, e.g. "A5409008007D75300384000026"
        frame: String,
        #[arg(long, value_enum, default_value_t = Variant::Legacy)]
        variant: Variant,
        /// Command id that was sent (decimal or 0x prefixed hex)
        #[arg(long, short, value_parser = clap_num::maybe_hex::<u8>, default_value = "0x90")]
        command: u8,
        /// Reject legacy frames whose command echo differs from --command
        #[arg(long)]
        strict: bool,
        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the bytes of a request frame
    Request {
        #[arg(long, value_enum, default_value_t = Variant::Legacy)]
        variant: Variant,
        /// Legacy command id (decimal or 0x prefixed hex)
        #[arg(long, short, value_parser = clap_num::maybe_hex::<u8>, default_value = "0x90")]
        command: u8,
        /// BLE register block
        #[arg(long, value_enum, default_value_t = BleBlock::Info)]
        block: BleBlock,
    },
    /// Print the additive checksum and CRC-16/MODBUS of hex bytes
    Checksum {
        /// Bytes as hex
        data: String,
    },
    /// Send one request over a serial device and decode the reply
    Read {
        #[arg(value_enum)]
        command: ReadCommand,
        /// Serial port device path (e.g., /dev/ttyUSB0 or /dev/rfcomm0 on Linux, COM1 on Windows)
        #[arg(short, long, default_value_t = default_device_name())]
        device: String,
        /// Timeout for serial I/O operations (e.g., "500ms", "1s", "2s 500ms")
        #[arg(value_parser = humantime::parse_duration, long, default_value = "500ms")]
        timeout: Duration,
        // Some USB - RS485 dongles requires at least 10ms to switch between TX and RX, so use a save delay between frames
        /// Delay between sending multiple commands to the BMS (e.g., "50ms", "100ms")
        #[arg(value_parser = humantime::parse_duration, long, default_value = "50ms")]
        delay: Duration,
        /// Reject replies whose command echo differs from the request
        #[arg(long)]
        strict: bool,
        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },
}

const fn about_text() -> &'static str {
    "daly bms telemetry decoder"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// YAML file overriding the BLE field offsets (defaults to ./ble-layout.yaml when present)
    #[arg(long, global = true)]
    pub layout: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommands,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_decode_hex_command() {
        let args = CliArgs::parse_from([
            "dalytelemetry",
            "decode",
            "--variant",
            "ble",
            "--command",
            "0x03",
            "D203",
        ]);
        assert_eq!(
            args.command,
            CliCommands::Decode {
                frame: "D203".to_string(),
                variant: Variant::Ble,
                command: 0x03,
                strict: false,
                json: false,
            }
        );
    }

    #[test]
    fn test_read_defaults() {
        let args = CliArgs::parse_from(["dalytelemetry", "read", "soc", "--layout", "x.yaml"]);
        assert_eq!(args.layout, Some(PathBuf::from("x.yaml")));
        match args.command {
            CliCommands::Read {
                command,
                timeout,
                delay,
                ..
            } => {
                assert_eq!(command, ReadCommand::Soc);
                assert_eq!(timeout, Duration::from_millis(500));
                assert_eq!(delay, Duration::from_millis(50));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
