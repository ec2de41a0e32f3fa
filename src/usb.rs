//! USB bulk transport for the TL866A/CS.
//!
//! The programmer enumerates as vendor 0x04D8, product 0xE11C with a single
//! configuration: one bulk OUT endpoint (0x01) and one bulk IN endpoint
//! (0x81). Command packets are at most 64 bytes; data payloads may be longer
//! and are carried as one logical bulk transfer (the host controller splits
//! them into max-packet frames).
//!
//! The transport has no retry logic. A timeout or stall is fatal and
//! surfaces as [`Error::Io`]; the caller aborts the whole operation.

use crate::error::{Error, Result};
use std::time::Duration;

pub const TL866_VID: u16 = 0x04D8;
pub const TL866_PID: u16 = 0xE11C;

const EP_OUT: u8 = 0x01;
const EP_IN: u8 = 0x81;

/// Per-transfer timeout. A transaction holds programming voltages, so a
/// stuck transfer must fail rather than hang forever.
const USB_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte-channel seam between the protocol engine and the hardware.
///
/// The engine is written against this trait so integration tests can drive
/// it with a scripted mock instead of a physical programmer.
pub trait Transport {
    /// Write one framed command (or command + payload) to the device.
    fn msg_send(&mut self, buf: &[u8]) -> Result<()>;

    /// Read one reply into `buf`, returning the number of bytes received.
    fn msg_recv(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// A claimed TL866 USB device.
pub struct UsbTransport {
    handle: rusb::DeviceHandle<rusb::Context>,
}

impl UsbTransport {
    /// Open the first attached TL866A/CS.
    pub fn open() -> Result<Self> {
        use rusb::UsbContext;

        let context = rusb::Context::new()?;
        for device in context.devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(d) => d,
                Err(_) => continue,
            };
            if desc.vendor_id() != TL866_VID || desc.product_id() != TL866_PID {
                continue;
            }
            let handle = device.open()?;
            if handle.kernel_driver_active(0).unwrap_or(false) {
                let _ = handle.detach_kernel_driver(0);
            }
            handle.claim_interface(0)?;
            return Ok(UsbTransport { handle });
        }
        Err(Error::NoDevice)
    }

    /// Number of TL866A/CS programmers currently attached.
    pub fn devices_count() -> Result<usize> {
        use rusb::UsbContext;

        let context = rusb::Context::new()?;
        let mut count = 0;
        for device in context.devices()?.iter() {
            if let Ok(desc) = device.device_descriptor() {
                if desc.vendor_id() == TL866_VID && desc.product_id() == TL866_PID {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

impl Transport for UsbTransport {
    fn msg_send(&mut self, buf: &[u8]) -> Result<()> {
        let written = self.handle.write_bulk(EP_OUT, buf, USB_TIMEOUT)?;
        if written != buf.len() {
            return Err(Error::Io(format!(
                "short bulk write: {written} of {} bytes",
                buf.len()
            )));
        }
        Ok(())
    }

    fn msg_recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.handle.read_bulk(EP_IN, buf, USB_TIMEOUT)?)
    }
}
