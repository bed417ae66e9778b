use crate::decode::{legacy, Ble, Legacy, Protocol};
use crate::protocol::*;
use crate::telemetry::{Status, TelemetryRecord};
use crate::Error;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

type Result<T> = std::result::Result<T, Error>;

/// Blocking client speaking to a BMS over a serial device.
///
/// Works with RS485/UART adapters as well as Bluetooth Classic RFCOMM ports.
#[derive(Debug)]
pub struct DalyBMS {
    serial: Box<dyn serialport::SerialPort>,
    last_execution: Instant,
    delay: Duration,
    legacy: Legacy,
    status: Option<Status>,
}

impl DalyBMS {
    pub fn new(port: &str) -> Result<Self> {
        let serial = serialport::new(port, 9600)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .inspect_err(|err| log::error!("Cannot open serial port '{port}': {err}"))?;
        Ok(Self {
            serial,
            last_execution: Instant::now(),
            delay: MINIMUM_DELAY,
            legacy: Legacy::default(),
            status: None,
        })
    }

    fn serial_await_delay(&self) {
        let last_exec_diff = Instant::now().duration_since(self.last_execution);
        if let Some(time_until_delay_reached) = self.delay.checked_sub(last_exec_diff) {
            std::thread::sleep(time_until_delay_reached);
        }
    }

    fn send_bytes(&mut self, tx_buffer: &[u8]) -> Result<()> {
        // clear all incoming serial to avoid data collision
        loop {
            let pending = self.serial.bytes_to_read()?;
            if pending == 0 {
                break;
            }
            log::trace!("Got {} pending bytes", pending);
            let mut buf: Vec<u8> = vec![0; 64];
            let received = self.serial.read(buf.as_mut_slice())?;
            log::trace!("Read {} pending bytes", received);
        }
        self.serial_await_delay();

        log::trace!("send_bytes: {:02X?}", tx_buffer);
        self.serial.write_all(tx_buffer)?;
        Ok(())
    }

    fn receive_bytes(&mut self, size: usize) -> Result<Vec<u8>> {
        let mut rx_buffer = vec![0; size];
        self.serial.read_exact(&mut rx_buffer)?;
        self.last_execution = Instant::now();

        log::trace!("receive_bytes: {:02X?}", rx_buffer);
        Ok(rx_buffer)
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        Ok(self.serial.set_timeout(timeout)?)
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = Duration::max(delay, MINIMUM_DELAY);
    }

    /// Rejects replies whose command echo differs from the request.
    pub fn set_strict_echo(&mut self, strict: bool) {
        self.legacy.echo = if strict {
            crate::frame::EchoCheck::Strict
        } else {
            crate::frame::EchoCheck::Warn
        };
    }

    /// Sends one legacy request and decodes its reply.
    ///
    /// [`LegacyCommand::CellVoltages`] and [`LegacyCommand::CellTemperatures`]
    /// need the counts of a previous [`DalyBMS::get_status`].
    pub fn request(&mut self, command: LegacyCommand) -> Result<TelemetryRecord> {
        let count = match command {
            LegacyCommand::CellVoltages => Some(self.cached_status()?.cells),
            LegacyCommand::CellTemperatures => Some(self.cached_status()?.temperature_sensors),
            _ => None,
        };

        self.send_bytes(&legacy_request(command))?;
        match count {
            Some(count) => {
                let n_frames = match command {
                    LegacyCommand::CellVoltages => command.reply_frames(count, 0),
                    _ => command.reply_frames(0, count),
                };
                let rx_buffer = self.receive_bytes(n_frames * LEGACY_FRAME_LENGTH)?;
                legacy::decode_series(&rx_buffer, command, count, self.legacy.echo)
            }
            None => {
                let rx_buffer = self.receive_bytes(LEGACY_FRAME_LENGTH)?;
                self.legacy.decode_buffer(&rx_buffer, command.id())
            }
        }
    }

    /// Requests the status block and keeps it for multi-frame requests.
    pub fn get_status(&mut self) -> Result<Status> {
        let record = self.request(LegacyCommand::StatusInfo)?;
        let status = record.status.get().ok_or(Error::StatusRequired)?;
        self.status = Some(status);
        Ok(status)
    }

    fn cached_status(&self) -> Result<Status> {
        self.status.ok_or(Error::StatusRequired)
    }

    /// Sends the BLE main information request and decodes its reply.
    ///
    /// The reply length is taken from its own length byte.
    pub fn request_ble_info(&mut self, ble: &Ble) -> Result<TelemetryRecord> {
        self.send_bytes(&ble_info_request())?;
        let mut rx_buffer = self.receive_bytes(BLE_HEADER_LENGTH)?;
        if rx_buffer[0] == BLE_START_BYTE && rx_buffer[1] == BLE_READ_FUNCTION {
            let remaining = rx_buffer[2] as usize + BLE_TRAILER_LENGTH;
            rx_buffer.extend(self.receive_bytes(remaining)?);
        }
        ble.decode_buffer(&rx_buffer, BLE_READ_FUNCTION)
    }
}
