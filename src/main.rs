use anyhow::{Context, Result};
use clap::Parser;
use dalytelemetry_lib::checksum::{additive_checksum, crc16_modbus};
use dalytelemetry_lib::decode::{Ble, Legacy};
use dalytelemetry_lib::frame::EchoCheck;
use dalytelemetry_lib::protocol::{self, LegacyCommand};
use dalytelemetry_lib::telemetry::Status;
use dalytelemetry_lib::{BleLayout, Decoder, RawFrame, TelemetryRecord};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};

mod commandline;
mod config;

use commandline::{BleBlock, CliArgs, CliCommands, ReadCommand, Variant};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let cleaned = cleaned.trim_start_matches("0x");
    hex::decode(cleaned).with_context(|| format!("Cannot parse hex bytes {input:?}"))
}

fn print_record(record: &TelemetryRecord, json: bool) -> Result<()> {
    if json {
        let output = serde_json::json!({
            "timestamp": chrono::Local::now().to_rfc3339(),
            "record": record,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).with_context(|| "Cannot serialize record")?
        );
    } else {
        println!("{record:#?}");
    }
    Ok(())
}

/// Legacy commands with a non-empty reply for the reported cell and sensor counts.
fn readable_commands(status: &Status) -> impl Iterator<Item = LegacyCommand> + '_ {
    LegacyCommand::ALL.into_iter().filter(|command| {
        let frames = command.reply_frames(status.cells, status.temperature_sensors);
        if frames == 0 {
            info!("Skipping {command}, the BMS reports none");
        }
        frames > 0
    })
}

fn read(
    bms: &mut dalytelemetry_lib::serialport::DalyBMS,
    command: ReadCommand,
    layout: BleLayout,
) -> Result<TelemetryRecord> {
    match (command, command.legacy_command()) {
        (_, Some(legacy)) => {
            if matches!(
                legacy,
                LegacyCommand::CellVoltages | LegacyCommand::CellTemperatures
            ) {
                bms.get_status().with_context(|| "Cannot get status")?;
            }
            bms.request(legacy)
                .with_context(|| format!("Cannot get {legacy}"))
        }
        (ReadCommand::BleInfo, None) => bms
            .request_ble_info(&Ble { layout })
            .with_context(|| "Cannot get BLE information"),
        (_, None) => {
            let status = bms.get_status().with_context(|| "Cannot get status")?;
            let mut record = TelemetryRecord::default();
            for legacy in readable_commands(&status) {
                let newer = bms
                    .request(legacy)
                    .with_context(|| format!("Cannot get {legacy}"))?;
                record = record.merge(&newer);
            }
            Ok(record)
        }
    }
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let layout = config::load_layout(args.layout.as_deref())?;

    match args.command {
        CliCommands::Decode {
            frame,
            variant,
            command,
            strict,
            json,
        } => {
            let echo = if strict {
                EchoCheck::Strict
            } else {
                EchoCheck::Warn
            };
            let decoder = Decoder::new(Legacy { echo }, Ble { layout });
            let raw = RawFrame::new(parse_hex(&frame)?, variant.into());
            let record = decoder
                .decode(&raw, command)
                .with_context(|| "Cannot decode frame")?;
            for warning in &record.warnings {
                warn!("{warning}");
            }
            print_record(&record, json)?;
        }
        CliCommands::Request {
            variant,
            command,
            block,
        } => {
            let bytes = match variant {
                Variant::Legacy => {
                    let command = LegacyCommand::try_from(command)
                        .with_context(|| format!("Cannot build request {command:#04X}"))?;
                    protocol::legacy_request(command).to_vec()
                }
                Variant::Ble => match block {
                    BleBlock::Info => protocol::ble_info_request().to_vec(),
                    BleBlock::Mos => protocol::ble_mos_request().to_vec(),
                },
            };
            println!("{}", hex::encode_upper(bytes));
        }
        CliCommands::Checksum { data } => {
            let bytes = parse_hex(&data)?;
            let crc = crc16_modbus(&bytes);
            println!("additive checksum: {:#04X}", additive_checksum(&bytes));
            println!(
                "crc16/modbus: {:#06X} (transmitted {:02X} {:02X})",
                crc,
                crc.to_le_bytes()[0],
                crc.to_le_bytes()[1]
            );
        }
        CliCommands::Read {
            command,
            device,
            timeout,
            delay,
            strict,
            json,
        } => {
            let mut bms = dalytelemetry_lib::serialport::DalyBMS::new(&device)
                .with_context(|| format!("Cannot open serial port '{}'", device))?;
            bms.set_timeout(timeout)?;
            bms.set_delay(delay);
            bms.set_strict_echo(strict);
            let record = read(&mut bms, command, layout)?;
            print_record(&record, json)?;
        }
    }

    Ok(())
}
