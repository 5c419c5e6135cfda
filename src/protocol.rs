use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// Request:  DD A5|5A CMD LEN DATA.. CK_HI CK_LO 77
// Response: DD CMD STATUS LEN DATA.. CK_HI CK_LO 77
pub const START_BYTE: u8 = 0xDD;
pub const STOP_BYTE: u8 = 0x77;
pub const STATUS_READ: u8 = 0xA5;
pub const STATUS_WRITE: u8 = 0x5A;

/// Start, status, command, length, two checksum bytes and stop.
pub const FRAME_OVERHEAD: usize = 7;
/// Start, command/status, status/command and length.
pub const HEADER_LENGTH: usize = 4;

/// Fixed part of the basic info payload, before the NTC readings.
const BASIC_INFO_PREFIX: usize = 23;
const KELVIN_OFFSET: f64 = 273.15;

/// Minimum pause between the end of one reply and the next request.
pub const MINIMUM_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    BasicInfo = 0x03,
    CellVoltages = 0x04,
    Version = 0x05,
    MosControl = 0xE1,
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command as u8
    }
}

macro_rules! read_bit {
    ($word:expr,$position:expr) => {
        ($word >> $position) & 1 != 0
    };
}

/// Two's-complement negation of the byte sum, truncated to 16 bits.
pub fn calc_checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |sum, b| sum.wrapping_add(u16::from(*b)))
        .wrapping_neg()
}

fn build_frame(status: u8, command: u8, payload: &[u8]) -> Result<Vec<u8>, Error> {
    let length = u8::try_from(payload.len()).map_err(|_| Error::PayloadTooLong(payload.len()))?;
    let mut tx_buffer = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    tx_buffer.push(START_BYTE);
    tx_buffer.push(status);
    tx_buffer.push(command);
    tx_buffer.push(length);
    tx_buffer.extend_from_slice(payload);
    let checksum = calc_checksum(&tx_buffer[2..]);
    tx_buffer.extend_from_slice(&checksum.to_be_bytes());
    tx_buffer.push(STOP_BYTE);
    Ok(tx_buffer)
}

/// Builds a read request frame for `command` carrying `payload`.
pub fn build_request(command: u8, payload: &[u8]) -> Result<Vec<u8>, Error> {
    build_frame(STATUS_READ, command, payload)
}

/// Builds a write request frame for `command` carrying `payload`.
pub fn build_write_request(command: u8, payload: &[u8]) -> Result<Vec<u8>, Error> {
    build_frame(STATUS_WRITE, command, payload)
}

/// Frames a reply the way the BMS sends it: the command echo sits in byte 1
/// and byte 2 carries the status (`0x00` = ok).
pub fn encode_response(command: u8, status: u8, payload: &[u8]) -> Result<Vec<u8>, Error> {
    // the checksum still covers bytes 2.., here STATUS LEN DATA
    build_frame(command, status, payload)
}

/// Structural check: minimum size, delimiters and declared length.
///
/// The checksum is deliberately left to [`verify_checksum`].
pub fn validate(frame: &[u8]) -> bool {
    check_structure(frame).is_ok()
}

fn check_structure(frame: &[u8]) -> Result<(), Error> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(Error::ReplySizeError {
            required: FRAME_OVERHEAD,
            received: frame.len(),
        });
    }
    let (start, stop) = (frame[0], frame[frame.len() - 1]);
    if start != START_BYTE || stop != STOP_BYTE {
        return Err(Error::FrameError { start, stop });
    }
    let declared = usize::from(frame[3]);
    if frame.len() != FRAME_OVERHEAD + declared {
        return Err(Error::LengthError {
            declared,
            frame: frame.len(),
        });
    }
    Ok(())
}

/// Recomputes the checksum over bytes `2 .. len-3` and compares it with the
/// transmitted one. Structurally invalid frames never verify.
pub fn verify_checksum(frame: &[u8]) -> bool {
    check_structure(frame).is_ok() && check_checksum(frame).is_ok()
}

fn check_checksum(frame: &[u8]) -> Result<(), Error> {
    let n = frame.len();
    let calculated = calc_checksum(&frame[2..n - 3]);
    let received = u16::from_be_bytes([frame[n - 3], frame[n - 2]]);
    if calculated != received {
        return Err(Error::CheckSumError {
            calculated,
            received,
        });
    }
    Ok(())
}

/// Returns the payload of a structurally valid frame with a matching checksum.
fn checked_payload(frame: &[u8]) -> Result<&[u8], Error> {
    if let Err(err) = check_structure(frame).and_then(|_| check_checksum(frame)) {
        log::warn!("Dropping frame ({err}) frame={frame:02X?}");
        return Err(err);
    }
    Ok(&frame[HEADER_LENGTH..frame.len() - 3])
}

/// Command byte echoed in a reply, if the frame is long enough to carry one.
pub fn response_command(frame: &[u8]) -> Option<u8> {
    (frame.len() >= HEADER_LENGTH && frame[0] == START_BYTE).then(|| frame[1])
}

/// Total frame size announced by a received header.
pub fn frame_size(header: &[u8]) -> Option<usize> {
    (header.len() >= HEADER_LENGTH && header[0] == START_BYTE)
        .then(|| FRAME_OVERHEAD + usize::from(header[3]))
}

/// Checks that a reply echoes the command it answers.
pub fn expect_command(frame: &[u8], command: Command) -> Result<(), Error> {
    let expected = u8::from(command);
    match response_command(frame) {
        Some(received) if received == expected => Ok(()),
        Some(received) => Err(Error::CommandMismatch { expected, received }),
        None => Err(Error::ReplySizeError {
            required: HEADER_LENGTH,
            received: frame.len(),
        }),
    }
}

fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

/// Per-cell voltages in volts, `None` for any rejected frame.
pub fn parse_cell_voltages(frame: &[u8]) -> Option<Vec<f64>> {
    CellVoltages::decode(frame).ok()
}

/// Basic pack information, `None` for any rejected frame.
pub fn parse_basic_info(frame: &[u8]) -> Option<BasicInfo> {
    BasicInfo::decode(frame).ok()
}

pub struct CellVoltages;

impl CellVoltages {
    pub fn request() -> Vec<u8> {
        request_without_payload(Command::CellVoltages)
    }

    pub fn decode(rx_buffer: &[u8]) -> Result<Vec<f64>, Error> {
        let data = checked_payload(rx_buffer)?;
        let voltages: Vec<f64> = data
            .chunks_exact(2)
            .map(|mv| round_to(f64::from(u16::from_be_bytes([mv[0], mv[1]])) / 1000.0, 3))
            .collect();
        log::trace!("Decoded {} cell voltages: {:?}", voltages.len(), voltages);
        Ok(voltages)
    }
}

/// Reply to the 0x03 basic info command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub total_voltage_mv: u32,
    /// negative=discharging, positive=charging
    pub current_ma: i32,
    pub residual_capacity_mah: u32,
    pub nominal_capacity_mah: u32,
    pub cycle_count: u16,
    pub protection_status: u16,
    pub software_version: u8,
    pub rsoc_percent: u8,
    pub fet_status: u8,
    pub cell_count: u8,
    pub ntc_count: u8,
    pub temperatures_c: Vec<f64>,
}

impl BasicInfo {
    pub fn request() -> Vec<u8> {
        request_without_payload(Command::BasicInfo)
    }

    pub fn decode(rx_buffer: &[u8]) -> Result<Self, Error> {
        let data = checked_payload(rx_buffer)?;
        if data.len() < BASIC_INFO_PREFIX {
            log::warn!(
                "Basic info payload too short - required={} received={}",
                BASIC_INFO_PREFIX,
                data.len()
            );
            return Err(Error::PayloadSizeError {
                required: BASIC_INFO_PREFIX,
                received: data.len(),
            });
        }
        let ntc_count = data[22];
        // readings announced but not transmitted are skipped
        let temperatures_c = data[BASIC_INFO_PREFIX..]
            .chunks_exact(2)
            .take(usize::from(ntc_count))
            .map(|raw| f64::from(u16::from_be_bytes([raw[0], raw[1]])) * 0.1 - KELVIN_OFFSET)
            .collect();
        Ok(Self {
            total_voltage_mv: u32::from(be_u16(data, 0)) * 10,
            current_ma: i32::from(i16::from_be_bytes([data[2], data[3]])) * 10,
            residual_capacity_mah: u32::from(be_u16(data, 4)) * 10,
            nominal_capacity_mah: u32::from(be_u16(data, 6)) * 10,
            cycle_count: be_u16(data, 8),
            protection_status: be_u16(data, 16),
            software_version: data[18],
            rsoc_percent: data[19],
            fet_status: data[20],
            cell_count: data[21],
            ntc_count,
            temperatures_c,
        })
    }

    pub fn protections(&self) -> Vec<ProtectionFlag> {
        ProtectionFlag::decode(self.protection_status)
    }

    pub fn cell_undervoltage(&self) -> bool {
        read_bit!(self.protection_status, 1)
    }

    pub fn charge_fet_on(&self) -> bool {
        read_bit!(self.fet_status, 0)
    }

    pub fn discharge_fet_on(&self) -> bool {
        read_bit!(self.fet_status, 1)
    }
}

pub struct HardwareVersion;

impl HardwareVersion {
    pub fn request() -> Vec<u8> {
        request_without_payload(Command::Version)
    }

    pub fn decode(rx_buffer: &[u8]) -> Result<String, Error> {
        let data = checked_payload(rx_buffer)?;
        Ok(String::from_utf8_lossy(data).trim_end_matches('\0').to_string())
    }
}

/// Switches the charge and discharge MOSFETs.
pub struct MosControl;

impl MosControl {
    pub fn request(charge: bool, discharge: bool) -> Vec<u8> {
        let mut state = 0u8;
        if !charge {
            state |= 0x01;
        }
        if !discharge {
            state |= 0x02;
        }
        // two payload bytes always fit
        build_write_request(Command::MosControl.into(), &[0x00, state]).unwrap_or_default()
    }

    pub fn decode(rx_buffer: &[u8]) -> Result<(), Error> {
        checked_payload(rx_buffer)?;
        let status = rx_buffer[2];
        if status != 0x00 {
            log::warn!("MOS control rejected with status {status:#04X}");
            return Err(Error::Rejected {
                command: Command::MosControl.into(),
                status,
            });
        }
        Ok(())
    }
}

fn request_without_payload(command: Command) -> Vec<u8> {
    // an empty payload always fits
    build_request(command.into(), &[]).unwrap_or_default()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Bits of the protection status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectionFlag {
    CellOvervoltage,
    CellUndervoltage,
    PackOvervoltage,
    PackUndervoltage,
    ChargeOvertemperature,
    ChargeUndertemperature,
    DischargeOvertemperature,
    DischargeUndertemperature,
    ChargeOvercurrent,
    DischargeOvercurrent,
    ShortCircuit,
    FrontEndIcError,
    SoftwareMosLock,
}

impl ProtectionFlag {
    const ALL: [ProtectionFlag; 13] = [
        ProtectionFlag::CellOvervoltage,
        ProtectionFlag::CellUndervoltage,
        ProtectionFlag::PackOvervoltage,
        ProtectionFlag::PackUndervoltage,
        ProtectionFlag::ChargeOvertemperature,
        ProtectionFlag::ChargeUndertemperature,
        ProtectionFlag::DischargeOvertemperature,
        ProtectionFlag::DischargeUndertemperature,
        ProtectionFlag::ChargeOvercurrent,
        ProtectionFlag::DischargeOvercurrent,
        ProtectionFlag::ShortCircuit,
        ProtectionFlag::FrontEndIcError,
        ProtectionFlag::SoftwareMosLock,
    ];

    pub fn decode(status: u16) -> Vec<Self> {
        Self::ALL
            .iter()
            .enumerate()
            .filter(|(bit, _)| read_bit!(status, *bit))
            .map(|(_, flag)| *flag)
            .collect()
    }
}

impl fmt::Display for ProtectionFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtectionFlag::CellOvervoltage => write!(f, "Cell overvoltage protection"),
            ProtectionFlag::CellUndervoltage => write!(f, "Cell undervoltage protection"),
            ProtectionFlag::PackOvervoltage => write!(f, "Pack overvoltage protection"),
            ProtectionFlag::PackUndervoltage => write!(f, "Pack undervoltage protection"),
            ProtectionFlag::ChargeOvertemperature => {
                write!(f, "Charging over temperature protection")
            }
            ProtectionFlag::ChargeUndertemperature => {
                write!(f, "Charging under temperature protection")
            }
            ProtectionFlag::DischargeOvertemperature => {
                write!(f, "Discharging over temperature protection")
            }
            ProtectionFlag::DischargeUndertemperature => {
                write!(f, "Discharging under temperature protection")
            }
            ProtectionFlag::ChargeOvercurrent => write!(f, "Charge over current protection"),
            ProtectionFlag::DischargeOvercurrent => write!(f, "Discharge over current protection"),
            ProtectionFlag::ShortCircuit => write!(f, "Short circuit protection"),
            ProtectionFlag::FrontEndIcError => write!(f, "Front-end detection IC error"),
            ProtectionFlag::SoftwareMosLock => write!(f, "Software MOS lock-in"),
        }
    }
}
