/// Errors produced by the protocol codec, the configuration loader and the
/// transport clients.
///
/// The test engine itself never returns these; it degrades to a no-op instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Fewer bytes than the smallest possible frame, or than the frame declares.
    #[error("Frame too short - required={required} received={received}")]
    ReplySizeError { required: usize, received: usize },
    /// Start or stop byte does not match the framing constants.
    #[error("Invalid frame delimiters - start={start:#04X} stop={stop:#04X}")]
    FrameError { start: u8, stop: u8 },
    /// Declared payload length disagrees with the frame size.
    #[error("Frame length mismatch - declared={declared} frame={frame}")]
    LengthError { declared: usize, frame: usize },
    /// Recomputed checksum differs from the transmitted one.
    #[error("Invalid checksum - calculated={calculated:#06X} received={received:#06X}")]
    CheckSumError { calculated: u16, received: u16 },
    /// Payload is shorter than the fixed part of the record.
    #[error("Payload too short - required={required} received={received}")]
    PayloadSizeError { required: usize, received: usize },
    /// Payload does not fit in the one-byte LEN field.
    #[error("Payload too long for a single frame: {0} bytes")]
    PayloadTooLong(usize),
    /// Reply echoes a different command than the one requested.
    #[error("Command mismatch - expected={expected:#04X} received={received:#04X}")]
    CommandMismatch { expected: u8, received: u8 },
    /// BMS answered a write request with a non-zero status byte.
    #[error("BMS rejected command {command:#04X} with status {status:#04X}")]
    Rejected { command: u8, status: u8 },
    /// Configuration values that cannot be used together.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Cannot parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serialport")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}
