use crate::protocol::*;
use crate::Error;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

type Result<T> = std::result::Result<T, Error>;

pub const DEFAULT_BAUD_RATE: u32 = 9600;

#[derive(Debug)]
pub struct BmsClient {
    serial: Box<dyn serialport::SerialPort>,
    last_execution: Instant,
    delay: Duration,
}

impl BmsClient {
    pub fn new(port: &str, baud_rate: u32) -> Result<Self> {
        let serial = serialport::new(port, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_secs(1))
            .open()?;
        log::debug!("Opened {port} @ {baud_rate} baud");
        Ok(Self {
            serial,
            last_execution: Instant::now(),
            delay: MINIMUM_DELAY,
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
            if pending > 0 {
                log::trace!("Got {} pending bytes", pending);
                let mut buf: Vec<u8> = vec![0; 64];
                let received = self.serial.read(buf.as_mut_slice())?;
                log::trace!("Read {} pending bytes", received);
            } else {
                break;
            }
        }
        self.serial_await_delay();

        log::trace!("send_bytes: {:02X?}", tx_buffer);
        self.serial.write_all(tx_buffer)?;
        Ok(())
    }

    /// Reads one frame: the header first, then the rest it announces.
    fn receive_frame(&mut self) -> Result<Vec<u8>> {
        let mut rx_buffer = vec![0; HEADER_LENGTH];
        self.serial.read_exact(&mut rx_buffer)?;

        let size = frame_size(&rx_buffer).ok_or(Error::FrameError {
            start: rx_buffer[0],
            stop: 0,
        })?;
        rx_buffer.resize(size, 0);
        self.serial.read_exact(&mut rx_buffer[HEADER_LENGTH..])?;

        self.last_execution = Instant::now();

        log::trace!("receive_frame: {:02X?}", rx_buffer);
        Ok(rx_buffer)
    }

    fn request(&mut self, command: Command, tx_buffer: &[u8]) -> Result<Vec<u8>> {
        self.send_bytes(tx_buffer)?;
        let frame = self.receive_frame()?;
        expect_command(&frame, command)?;
        Ok(frame)
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        Ok(self.serial.set_timeout(timeout)?)
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = Duration::max(delay, MINIMUM_DELAY);
    }

    pub fn get_basic_info(&mut self) -> Result<BasicInfo> {
        let frame = self.request(Command::BasicInfo, &BasicInfo::request())?;
        BasicInfo::decode(&frame)
    }

    pub fn get_cell_voltages(&mut self) -> Result<Vec<f64>> {
        let frame = self.request(Command::CellVoltages, &CellVoltages::request())?;
        CellVoltages::decode(&frame)
    }

    pub fn get_version(&mut self) -> Result<String> {
        let frame = self.request(Command::Version, &HardwareVersion::request())?;
        HardwareVersion::decode(&frame)
    }

    pub fn set_mosfets(&mut self, charge: bool, discharge: bool) -> Result<()> {
        let frame = self.request(Command::MosControl, &MosControl::request(charge, discharge))?;
        MosControl::decode(&frame)
    }
}
