//! Crate-wide error type.
//!
//! Errors are never retried inside the engine: an overcurrent aborts the
//! whole operation, a verify mismatch aborts, a USB failure aborts. The
//! orchestrator ends any open transaction before surfacing one of these so
//! the ZIF socket is not left powered.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// USB or filesystem failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// No programmer attached, or it disappeared mid-operation.
    #[error("No TL866 programmer found")]
    NoDevice,

    /// Device name not present in the database.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Inconsistent or missing command-line arguments.
    #[error("{0}")]
    BadArguments(String),

    /// The programmer raised overcurrent protection on the ZIF socket.
    #[error("Overcurrent protection!")]
    Overcurrent,

    /// The chip in the socket does not report the expected id.
    #[error("Invalid chip ID: expected {expected:#06x}, got {got:#06x}\n(use '-y' to continue anyway at your own risk)")]
    ChipIdMismatch { expected: u32, got: u32 },

    /// Input file length does not match the selected memory page.
    #[error("Incorrect file size: {got} (needed {expected})")]
    SizeMismatch { expected: usize, got: usize },

    /// Read-back byte differs from the written image.
    #[error("Verification failed at {addr:#06x}: {file_byte:#04x} != {chip_byte:#04x}")]
    VerifyMismatch {
        addr: usize,
        file_byte: u8,
        chip_byte: u8,
    },

    /// TSOP48 adapter missing or counterfeit.
    #[error("TSOP48 adapter problem: {0}")]
    TsopAdapter(crate::protocol::TsopAdapter),

    /// Decrypted firmware image failed its CRC-32 check.
    #[error("Firmware CRC error")]
    FirmwareCrc,

    /// update.dat is not exactly the expected container size.
    #[error("Firmware file size error")]
    FirmwareSize,

    /// Device refused to enter (or leave) bootloader mode.
    #[error("Unexpected bootloader state")]
    BootloaderState,

    /// Malformed fuse configuration file.
    #[error("Config parse error on line {0}")]
    ConfigParse(usize),

    /// Fuse configuration file is missing a declared key.
    #[error("Unknown config key: {0}")]
    UnknownKey(String),

    /// Page selector does not exist for this chip.
    #[error("Unknown memory type")]
    UnknownMemoryType,

    /// No fuse layout is known for this protocol/variant pair.
    #[error("Unknown fuse layout for protocol {protocol_id:#x} variant {variant:#x}")]
    UnknownFuseLayout { protocol_id: u32, variant: u8 },
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<rusb::Error> for Error {
    fn from(e: rusb::Error) -> Self {
        Error::Io(format!("USB: {e}"))
    }
}
