//! Programmer handle and session state.
//!
//! A [`Handle`] owns the byte channel to one programmer and the session
//! state the wire dialect needs: the selected chip descriptor, the ICSP
//! flags, and what the GET_SYSTEM_INFO probe reported (model, firmware
//! version, normal-vs-bootloader status).
//!
//! # Transactions
//!
//! Programming commands only work between BEGIN and END. While a
//! transaction is open the programmer applies programming voltages to the
//! ZIF socket; END removes them. The engine keeps at most one transaction
//! outstanding, and every fatal path ends it before the error surfaces so
//! a chip is never left powered.
//!
//! ```text
//! Host                                   Programmer
//!   │ BEGIN (48 B, descriptor params)        │
//!   ├───────────────────────────────────────►│  ZIF powered
//!   │ GET_STATUS ──► overcurrent?            │
//!   │ READ/WRITE/ERASE/... commands          │
//!   ├───────────────────────────────────────►│
//!   │ END (4 B)                              │
//!   ├───────────────────────────────────────►│  ZIF unpowered
//! ```
//!
//! Two hardware variants share this dialect (TL866A and TL866CS; they
//! differ in firmware key, not protocol). The TL866II+ speaks a parallel
//! dialect that would hang off the same handle; it is not implemented.

pub mod tl866a;

use crate::database::Chip;
use crate::error::{Error, Result};
use crate::fuses::{FuseCmd, FuseLayout};
use crate::usb::{Transport, UsbTransport};
use std::fmt;
use std::time::{Duration, Instant};

/// Hardware variant, as reported by GET_SYSTEM_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Tl866a,
    Tl866cs,
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::Tl866a => write!(f, "TL866A"),
            Model::Tl866cs => write!(f, "TL866CS"),
        }
    }
}

/// Whether the firmware or the bootloader answered the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Normal,
    Bootloader,
}

/// ICSP flag bits carried in BEGIN.
pub const ICSP_ENABLE: u8 = 0x80;
pub const ICSP_VCC: u8 = 0x01;

/// Memory page addressed by block commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Code,
    Data,
}

/// Decoded GET_STATUS reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusReply {
    /// Verify-while-writing error flag.
    pub error: u8,
    /// Expected byte of a failed in-flight verify.
    pub expected: u16,
    /// Actual byte of a failed in-flight verify.
    pub actual: u16,
    /// Address of a failed in-flight verify.
    pub address: u32,
    pub overcurrent: bool,
}

/// TSOP48 adapter identification, reply byte `[1]` of UNLOCK_TSOP48.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsopAdapter {
    None,
    V0,
    V3,
    Fake1,
    Fake2,
}

impl TsopAdapter {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(TsopAdapter::None),
            1 => Some(TsopAdapter::V0),
            2 => Some(TsopAdapter::V3),
            3 => Some(TsopAdapter::Fake1),
            4 => Some(TsopAdapter::Fake2),
            _ => None,
        }
    }
}

impl fmt::Display for TsopAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TsopAdapter::None => write!(f, "adapter not found"),
            TsopAdapter::V0 => write!(f, "adapter V0"),
            TsopAdapter::V3 => write!(f, "adapter V3"),
            TsopAdapter::Fake1 | TsopAdapter::Fake2 => write!(f, "fake adapter"),
        }
    }
}

/// One open programmer session.
///
/// The handle owns its transport, so concurrent use of the USB channel is
/// ruled out at the type level.
pub struct Handle<T: Transport> {
    pub(crate) transport: T,
    device: Option<&'static Chip>,
    pub icsp: u8,
    pub model: Model,
    pub firmware: u16,
    pub status: DeviceStatus,
    fuse_layout: Option<&'static FuseLayout>,
}

impl<T: Transport> Handle<T> {
    /// Probe the programmer and bind an optional chip descriptor.
    pub fn open(transport: T, device: Option<&'static Chip>) -> Result<Self> {
        let mut handle = Handle {
            transport,
            device,
            icsp: 0,
            model: Model::Tl866a,
            firmware: 0,
            status: DeviceStatus::Normal,
            fuse_layout: None,
        };
        tl866a::get_system_info(&mut handle)?;
        Ok(handle)
    }

    pub fn device(&self) -> Result<&'static Chip> {
        self.device
            .ok_or_else(|| Error::BadArguments("no device selected".to_string()))
    }

    pub fn fuse_layout(&self) -> Option<&'static FuseLayout> {
        self.fuse_layout
    }

    /// Bind the fuse layout resolved for the selected chip. Done once,
    /// after the chip-id gate.
    pub fn set_fuse_layout(&mut self, layout: Option<&'static FuseLayout>) {
        self.fuse_layout = layout;
    }

    pub fn begin_transaction(&mut self) -> Result<()> {
        tl866a::begin_transaction(self)
    }

    pub fn end_transaction(&mut self) -> Result<()> {
        tl866a::end_transaction(self)
    }

    /// Run `body` inside a transaction. The transaction is ended on both
    /// the success and the error path, and an END failure is surfaced only
    /// when the body itself succeeded.
    pub fn with_transaction<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.begin_transaction()?;
        match body(self) {
            Ok(value) => {
                self.end_transaction()?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.end_transaction();
                Err(e)
            }
        }
    }

    pub fn get_status(&mut self) -> Result<StatusReply> {
        tl866a::get_status(self)
    }

    pub fn erase(&mut self) -> Result<()> {
        tl866a::erase(self)
    }

    pub fn protect_off(&mut self) -> Result<()> {
        tl866a::protect_off(self)
    }

    pub fn protect_on(&mut self) -> Result<()> {
        tl866a::protect_on(self)
    }

    pub fn read_block(&mut self, page: Page, addr: u32, buf: &mut [u8]) -> Result<()> {
        tl866a::read_block(self, page, addr, buf)
    }

    pub fn write_block(&mut self, page: Page, addr: u32, data: &[u8]) -> Result<()> {
        tl866a::write_block(self, page, addr, data)
    }

    /// Raw chip id reply: `(id_type, id)`.
    pub fn get_chip_id(&mut self) -> Result<(u8, u32)> {
        tl866a::get_chip_id(self)
    }

    pub fn read_fuses(&mut self, cmd: FuseCmd, length: usize, items: u8) -> Result<Vec<u8>> {
        tl866a::read_fuses(self, cmd, length, items)
    }

    pub fn write_fuses(&mut self, cmd: FuseCmd, items: u8, data: &[u8]) -> Result<()> {
        tl866a::write_fuses(self, cmd, items, data)
    }

    pub fn read_jedec_row(&mut self, row: u8, bits: usize, buf: &mut [u8]) -> Result<()> {
        tl866a::read_jedec_row(self, row, bits, buf)
    }

    pub fn write_jedec_row(&mut self, row: u8, bits: usize, data: &[u8]) -> Result<()> {
        tl866a::write_jedec_row(self, row, bits, data)
    }

    pub fn unlock_tsop48(&mut self) -> Result<TsopAdapter> {
        tl866a::unlock_tsop48(self)
    }

    /// Reset the programmer. It drops off the bus and re-enumerates.
    pub fn reset(&mut self) -> Result<()> {
        tl866a::reset(self)
    }

    pub fn hardware_check(&mut self) -> Result<u32> {
        tl866a::hardware_check(self)
    }

    /// Consume the handle, returning the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }
}

impl Handle<UsbTransport> {
    /// Open the first attached programmer.
    pub fn open_usb(device: Option<&'static Chip>) -> Result<Self> {
        Handle::open(UsbTransport::open()?, device)
    }

    /// Re-open after a reset. The device re-enumerates, so poll until the
    /// endpoint reappears, for at most 10 seconds.
    pub fn reopen(device: Option<&'static Chip>) -> Result<Self> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match UsbTransport::open() {
                Ok(transport) => return Handle::open(transport, device),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
