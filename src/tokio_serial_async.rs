//! Asynchronous client for the BMS using Tokio and the `tokio-serial` crate.
//!
//! Every request is retried on transport or decode failures; the last
//! attempt's error is returned to the caller.
//!
//! # Example
//!
//! ```no_run
//! use bmstest_lib::tokio_serial_async::{BmsClient, Error};
//! use std::time::Duration;
//!
//! async fn read_pack() -> Result<(), Error> {
//!     let mut bms = BmsClient::new("/dev/ttyUSB0", 9600)?;
//!     bms.set_timeout(Duration::from_millis(500))?;
//!
//!     let info = bms.get_basic_info().await?;
//!     println!("SoC: {}%", info.rsoc_percent);
//!
//!     let voltages = bms.get_cell_voltages().await?;
//!     println!("Cell voltages: {:?}", voltages);
//!
//!     Ok(())
//! }
//! ```

use crate::protocol::*;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt};

/// Errors specific to the asynchronous Tokio serial port client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error originating from the frame codec.
    #[error("BMS error: {0}")]
    Bms(#[from] crate::Error),
    /// An I/O error, typically from the serial port communication.
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    /// An error from the `tokio-serial` crate.
    #[error("Tokio serial error: {0}")]
    TokioSerial(#[from] tokio_serial::Error),
    /// A Tokio timeout elapsed during an I/O operation.
    #[error("Tokio timeout elapsed: {0}")]
    TokioElapsed(#[from] tokio::time::error::Elapsed),
}

type Result<T> = std::result::Result<T, Error>;

/// Asynchronous BMS connection.
///
/// Replies are read frame by frame: the four header bytes first, then the
/// payload, checksum and stop byte they announce.
#[derive(Debug)]
pub struct BmsClient {
    serial: tokio_serial::SerialStream,
    last_execution: Instant,
    io_timeout: Duration, // per read/write
    delay: Duration,      // between commands
    retries: u8,
}

macro_rules! request_with_retry {
    ($self:ident, $command:expr, $X:ident, $request_bytes:expr) => {{
        'retry_block: {
            for t in 0..$self.retries {
                match $self.send_and_receive($command, $request_bytes).await {
                    Ok(reply_bytes) => match $X::decode(&reply_bytes) {
                        Ok(result) => break 'retry_block Ok(result),
                        Err(err) => {
                            log::trace!(
                                "Failed try {} of {}, repeating ({err})",
                                t + 1,
                                $self.retries
                            );
                        }
                    },
                    Err(err) => {
                        log::trace!(
                            "Failed try {} of {}, repeating ({err})",
                            t + 1,
                            $self.retries
                        );
                    }
                }
            }
            Ok($X::decode(
                &$self.send_and_receive($command, $request_bytes).await?,
            )?)
        }
    }};
}

impl BmsClient {
    /// Opens `port` at `baud_rate`, 8N1 without flow control.
    pub fn new(port: &str, baud_rate: u32) -> Result<Self> {
        Ok(Self {
            serial: tokio_serial::new(port, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()?,
            last_execution: Instant::now(),
            delay: MINIMUM_DELAY,
            io_timeout: Duration::from_secs(1),
            retries: 3,
        })
    }

    /// Number of extra attempts after a failed request.
    pub fn set_retry(&mut self, n_retries: u8) {
        self.retries = n_retries;
    }

    async fn serial_await_delay(&self) {
        let last_exec_diff = Instant::now().duration_since(self.last_execution);
        if let Some(time_until_delay_reached) = self.delay.checked_sub(last_exec_diff) {
            tokio::time::sleep(time_until_delay_reached).await;
        }
    }

    async fn send_bytes(&mut self, tx_buffer: &[u8]) -> Result<()> {
        // a late reply to a timed out request must not be read as this one's
        loop {
            let pending = self.serial.bytes_to_read()?;
            if pending > 0 {
                log::trace!("got {pending} pending bytes");
                let mut buf: Vec<u8> = vec![0; 64];
                let received =
                    tokio::time::timeout(self.io_timeout, self.serial.read(buf.as_mut_slice()))
                        .await??;
                log::trace!("{received} pending bytes consumed");
            } else {
                break;
            }
        }
        self.serial_await_delay().await;

        log::trace!("write bytes: {tx_buffer:02X?}");
        tokio::time::timeout(self.io_timeout, self.serial.write_all(tx_buffer)).await??;
        Ok(())
    }

    async fn receive_frame(&mut self) -> Result<Vec<u8>> {
        let mut rx_buffer = vec![0; HEADER_LENGTH];
        tokio::time::timeout(self.io_timeout, self.serial.read_exact(&mut rx_buffer)).await??;

        let size = frame_size(&rx_buffer).ok_or(crate::Error::FrameError {
            start: rx_buffer[0],
            stop: 0,
        })?;
        rx_buffer.resize(size, 0);
        tokio::time::timeout(
            self.io_timeout,
            self.serial.read_exact(&mut rx_buffer[HEADER_LENGTH..]),
        )
        .await??;

        self.last_execution = Instant::now();

        log::trace!("receive_frame: {rx_buffer:02X?}");
        Ok(rx_buffer)
    }

    async fn send_and_receive(&mut self, command: Command, tx_buffer: &[u8]) -> Result<Vec<u8>> {
        self.send_bytes(tx_buffer).await?;
        let frame = self.receive_frame().await?;
        expect_command(&frame, command)?;
        Ok(frame)
    }

    /// Timeout for each individual read or write.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        log::trace!("set timeout to {timeout:?}");
        self.io_timeout = timeout;
        Ok(())
    }

    /// Minimum pause between commands, never below [`MINIMUM_DELAY`].
    pub fn set_delay(&mut self, delay: Duration) {
        if delay < MINIMUM_DELAY {
            log::warn!("delay {delay:?} lower minimum {MINIMUM_DELAY:?}, use minimum");
            self.delay = MINIMUM_DELAY;
        } else {
            self.delay = delay;
        }
        log::trace!("set delay to {:?}", self.delay);
    }

    /// Pack voltage, current, capacities, protection and FET state, temperatures.
    pub async fn get_basic_info(&mut self) -> Result<BasicInfo> {
        log::trace!("get basic info");
        request_with_retry!(self, Command::BasicInfo, BasicInfo, &BasicInfo::request())
    }

    /// Per-cell voltages in volts.
    pub async fn get_cell_voltages(&mut self) -> Result<Vec<f64>> {
        log::trace!("get cell voltages");
        request_with_retry!(
            self,
            Command::CellVoltages,
            CellVoltages,
            &CellVoltages::request()
        )
    }

    pub async fn get_version(&mut self) -> Result<String> {
        log::trace!("get version");
        request_with_retry!(
            self,
            Command::Version,
            HardwareVersion,
            &HardwareVersion::request()
        )
    }

    /// Switches the charge and discharge MOSFETs; `true` means on.
    pub async fn set_mosfets(&mut self, charge: bool, discharge: bool) -> Result<()> {
        log::trace!("set mosfets charge={charge} discharge={discharge}");
        request_with_retry!(
            self,
            Command::MosControl,
            MosControl,
            &MosControl::request(charge, discharge)
        )
    }
}
