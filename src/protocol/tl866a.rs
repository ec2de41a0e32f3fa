//! TL866A/CS wire dialect.
//!
//! Every command is a zero-filled 64-byte buffer with the opcode at `[0]`,
//! the chip's protocol id at `[1]` and its variant at `[2]`; the number of
//! bytes actually sent varies per opcode (4 to 64, plus payload for block
//! writes). Replies are 64 bytes unless noted.
//!
//! BEGIN packet layout (48 bytes sent):
//!
//! ```text
//! [0]      opcode 0x03
//! [1]      protocol id          [2]      variant
//! [3..5)   data memory size     u16 LE
//! [5]      VPP voltage code     (opts1 low byte)
//! [6..8)   options word         (opts2, u16 LE)
//! [8]      VDD/VCC voltage code (opts1 high byte)
//! [9..11)  device options       (opts3, u16 LE)
//! [11]     ICSP flags
//! [12..15) code memory size     u24 LE
//! ```
//!
//! Block commands carry a u16 LE size at `[2..4)` and a u24 LE address at
//! `[4..7)`; the address is pre-shifted right by one for word-addressed
//! chips before it reaches this layer.

use super::{DeviceStatus, Handle, Model, Page, StatusReply, TsopAdapter};
use crate::bytes::{format_int, load_int, Endianness};
use crate::error::{Error, Result};
use crate::fuses::{FuseCmd, FUSE_BUFFER_SIZE};
use crate::usb::Transport;
use rand::RngCore;
use std::time::Duration;

// Commands
const GET_SYSTEM_INFO: u8 = 0x00;
const START_TRANSACTION: u8 = 0x03;
const END_TRANSACTION: u8 = 0x04;
const GET_CHIP_ID: u8 = 0x05;
const READ_USER: u8 = 0x10;
const WRITE_USER: u8 = 0x11;
const READ_CFG: u8 = 0x12;
const WRITE_CFG: u8 = 0x13;
const WRITE_CODE: u8 = 0x20;
const READ_CODE: u8 = 0x21;
const ERASE: u8 = 0x22;
const READ_DATA: u8 = 0x30;
const WRITE_DATA: u8 = 0x31;
const WRITE_LOCK: u8 = 0x40;
const READ_LOCK: u8 = 0x41;
const PROTECT_OFF: u8 = 0x44;
const PROTECT_ON: u8 = 0x45;
pub(crate) const BOOTLOADER_WRITE: u8 = 0xAA;
pub(crate) const BOOTLOADER_ERASE: u8 = 0xCC;
const UNLOCK_TSOP48: u8 = 0xFD;
const GET_STATUS: u8 = 0xFE;
const RESET: u8 = 0xFF;

// Hardware bit banging (self-test)
const RESET_PIN_DRIVERS: u8 = 0xD0;
const SET_LATCH: u8 = 0xD1;
const READ_ZIF_PINS: u8 = 0xD2;
const OE_VCC_GND: u8 = 0x02;
const OE_ALL: u8 = 0x03;

fn msg_init<T: Transport>(handle: &Handle<T>, command: u8) -> Result<[u8; 64]> {
    let device = handle.device()?;
    let mut msg = [0u8; 64];
    msg[0] = command;
    msg[1] = device.protocol_id as u8;
    msg[2] = device.variant;
    Ok(msg)
}

fn recv_exact<T: Transport>(handle: &mut Handle<T>, buf: &mut [u8]) -> Result<()> {
    let received = handle.transport.msg_recv(buf)?;
    if received < buf.len() {
        return Err(Error::Io(format!(
            "short reply: {received} of {} bytes",
            buf.len()
        )));
    }
    Ok(())
}

/// Probe model, firmware version and run state. Works in both normal and
/// bootloader mode, with or without a selected chip.
pub fn get_system_info<T: Transport>(handle: &mut Handle<T>) -> Result<()> {
    let mut msg = [0u8; 64];
    msg[0] = GET_SYSTEM_INFO;
    handle.transport.msg_send(&msg[..5])?;
    let mut reply = [0u8; 64];
    recv_exact(handle, &mut reply)?;

    handle.status = match reply[1] {
        1 => DeviceStatus::Normal,
        2 => DeviceStatus::Bootloader,
        _ => return Err(Error::BootloaderState),
    };
    handle.firmware = u16::from_le_bytes([reply[4], reply[5]]);
    handle.model = match reply[6] {
        1 => Model::Tl866a,
        2 => Model::Tl866cs,
        other => return Err(Error::Io(format!("unknown device version {other}"))),
    };
    Ok(())
}

pub fn begin_transaction<T: Transport>(handle: &mut Handle<T>) -> Result<()> {
    let device = handle.device()?;
    let mut msg = msg_init(handle, START_TRANSACTION)?;

    format_int(
        &mut msg[3..],
        device.data_memory_size as u32,
        2,
        Endianness::Little,
    );
    msg[5] = device.opts1 as u8;
    format_int(&mut msg[6..], device.opts2 as u32, 2, Endianness::Little);
    msg[8] = (device.opts1 >> 8) as u8;
    format_int(&mut msg[9..], device.opts3, 2, Endianness::Little);
    msg[11] = handle.icsp;
    format_int(
        &mut msg[12..],
        device.code_memory_size as u32,
        3,
        Endianness::Little,
    );

    handle.transport.msg_send(&msg[..48])?;

    // The firmware powers the socket on BEGIN; a mis-seated chip shows up
    // as overcurrent right away.
    if get_status(handle)?.overcurrent {
        return Err(Error::Overcurrent);
    }
    Ok(())
}

pub fn end_transaction<T: Transport>(handle: &mut Handle<T>) -> Result<()> {
    let msg = msg_init(handle, END_TRANSACTION)?;
    handle.transport.msg_send(&msg[..4])
}

pub fn protect_off<T: Transport>(handle: &mut Handle<T>) -> Result<()> {
    let msg = msg_init(handle, PROTECT_OFF)?;
    handle.transport.msg_send(&msg[..10])
}

pub fn protect_on<T: Transport>(handle: &mut Handle<T>) -> Result<()> {
    let msg = msg_init(handle, PROTECT_ON)?;
    handle.transport.msg_send(&msg[..10])
}

pub fn get_status<T: Transport>(handle: &mut Handle<T>) -> Result<StatusReply> {
    let msg = msg_init(handle, GET_STATUS)?;
    handle.transport.msg_send(&msg[..5])?;
    let mut reply = [0u8; 64];
    recv_exact(handle, &mut reply)?;
    Ok(StatusReply {
        error: reply[0],
        expected: load_int(&reply[2..], 2, Endianness::Little) as u16,
        actual: load_int(&reply[4..], 2, Endianness::Little) as u16,
        address: load_int(&reply[6..], 3, Endianness::Little),
        overcurrent: reply[9] != 0,
    })
}

pub fn erase<T: Transport>(handle: &mut Handle<T>) -> Result<()> {
    let device = handle.device()?;
    let mut msg = msg_init(handle, ERASE)?;
    format_int(&mut msg[2..], 0x03, 2, Endianness::Little);
    // There is no separate "write unlock". Byte [2] carries the number of
    // fuses the controller has, or 1 for anything else; GAL classes keep
    // the 0x03 marker.
    if !device.is_pld() {
        msg[2] = handle
            .fuse_layout()
            .map(|layout| layout.erase_num_fuses)
            .unwrap_or(1);
    }
    handle.transport.msg_send(&msg[..15])?;
    let mut reply = [0u8; 64];
    recv_exact(handle, &mut reply)
}

pub fn read_block<T: Transport>(
    handle: &mut Handle<T>,
    page: Page,
    addr: u32,
    buf: &mut [u8],
) -> Result<()> {
    let opcode = match page {
        Page::Code => READ_CODE,
        Page::Data => READ_DATA,
    };
    let mut msg = msg_init(handle, opcode)?;
    format_int(&mut msg[2..], buf.len() as u32, 2, Endianness::Little);
    format_int(&mut msg[4..], addr, 3, Endianness::Little);
    handle.transport.msg_send(&msg[..18])?;
    recv_exact(handle, buf)
}

pub fn write_block<T: Transport>(
    handle: &mut Handle<T>,
    page: Page,
    addr: u32,
    data: &[u8],
) -> Result<()> {
    let opcode = match page {
        Page::Code => WRITE_CODE,
        Page::Data => WRITE_DATA,
    };
    let header = msg_init(handle, opcode)?;
    let mut msg = vec![0u8; data.len() + 7];
    msg[..7].copy_from_slice(&header[..7]);
    format_int(&mut msg[2..], data.len() as u32, 2, Endianness::Little);
    format_int(&mut msg[4..], addr, 3, Endianness::Little);
    msg[7..].copy_from_slice(data);
    handle.transport.msg_send(&msg)
}

/// Model-specific id, at most 4 bytes. Returns `(id_type, id)`; types 3
/// and 4 arrive little-endian, the rest big-endian.
pub fn get_chip_id<T: Transport>(handle: &mut Handle<T>) -> Result<(u8, u32)> {
    let msg = msg_init(handle, GET_CHIP_ID)?;
    handle.transport.msg_send(&msg[..8])?;
    let mut reply = [0u8; 32];
    recv_exact(handle, &mut reply)?;

    let id_type = reply[0];
    let endian = if id_type == 3 || id_type == 4 {
        Endianness::Little
    } else {
        Endianness::Big
    };
    // The length byte is always 1-4, but never trust it.
    let length = (reply[1] & 0x03) as usize;
    let id = if length > 0 {
        load_int(&reply[2..], length, endian)
    } else {
        0
    };
    Ok((id_type, id))
}

fn fuse_read_opcode(cmd: FuseCmd) -> u8 {
    match cmd {
        FuseCmd::User => READ_USER,
        FuseCmd::Cfg => READ_CFG,
        FuseCmd::Lock => READ_LOCK,
    }
}

fn fuse_write_opcode(cmd: FuseCmd) -> u8 {
    match cmd {
        FuseCmd::User => WRITE_USER,
        FuseCmd::Cfg => WRITE_CFG,
        FuseCmd::Lock => WRITE_LOCK,
    }
}

pub fn read_fuses<T: Transport>(
    handle: &mut Handle<T>,
    cmd: FuseCmd,
    length: usize,
    items: u8,
) -> Result<Vec<u8>> {
    debug_assert!(length <= FUSE_BUFFER_SIZE);
    let device = handle.device()?;
    let mut msg = msg_init(handle, fuse_read_opcode(cmd))?;
    msg[2] = items;
    format_int(
        &mut msg[4..],
        device.code_memory_size as u32,
        3,
        Endianness::Little,
    );
    handle.transport.msg_send(&msg[..18])?;
    let mut reply = [0u8; 64];
    recv_exact(handle, &mut reply)?;
    Ok(reply[7..7 + length].to_vec())
}

pub fn write_fuses<T: Transport>(
    handle: &mut Handle<T>,
    cmd: FuseCmd,
    items: u8,
    data: &[u8],
) -> Result<()> {
    debug_assert!(data.len() <= FUSE_BUFFER_SIZE);
    let device = handle.device()?;
    let mut msg = msg_init(handle, fuse_write_opcode(cmd))?;
    msg[2] = items;
    // 0x38 below the code size, a quirk the firmware expects.
    format_int(
        &mut msg[4..],
        device.code_memory_size as u32 - 0x38,
        3,
        Endianness::Little,
    );
    msg[7..7 + data.len()].copy_from_slice(data);
    handle.transport.msg_send(&msg[..64])
}

/// Read one JEDEC fuse row of a GAL device. `bits` is the row width; the
/// payload spans `bits / 8 + 1` bytes.
pub fn read_jedec_row<T: Transport>(
    handle: &mut Handle<T>,
    row: u8,
    bits: usize,
    buf: &mut [u8],
) -> Result<()> {
    let device = handle.device()?;
    let mut msg = [0u8; 64];
    msg[0] = READ_CODE;
    msg[1] = device.protocol_id as u8;
    msg[2] = bits as u8;
    msg[4] = row;
    handle.transport.msg_send(&msg[..18])?;
    let mut reply = [0u8; 64];
    recv_exact(handle, &mut reply)?;
    let len = bits / 8 + 1;
    buf[..len].copy_from_slice(&reply[..len]);
    Ok(())
}

pub fn write_jedec_row<T: Transport>(
    handle: &mut Handle<T>,
    row: u8,
    bits: usize,
    data: &[u8],
) -> Result<()> {
    let device = handle.device()?;
    let mut msg = [0u8; 64];
    msg[0] = WRITE_CODE;
    msg[1] = device.protocol_id as u8;
    msg[2] = bits as u8;
    msg[4] = row;
    let len = bits / 8 + 1;
    msg[7..7 + len].copy_from_slice(&data[..len]);
    handle.transport.msg_send(&msg[..64])
}

/// CRC-16 step used by the TSOP48 unlock handshake.
fn tsop48_crc_step(mut crc: u16, byte: u8) -> u16 {
    crc = (crc >> 8) | (crc << 8);
    crc ^= byte as u16;
    crc ^= (crc & 0xFF) >> 4;
    crc ^= crc << 12;
    crc ^= (crc & 0xFF) << 5;
    crc
}

/// Unlock the lockable TSOP48 adapter with a random challenge.
pub fn unlock_tsop48<T: Transport>(handle: &mut Handle<T>) -> Result<TsopAdapter> {
    let mut msg = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut msg[7..15]);

    let mut crc: u16 = 0;
    for i in 7..15 {
        crc = tsop48_crc_step(crc, msg[i]);
    }
    msg[0] = UNLOCK_TSOP48;
    msg[15] = msg[9];
    msg[16] = msg[11];
    msg[9] = crc as u8;
    msg[11] = (crc >> 8) as u8;

    handle.transport.msg_send(&msg[..17])?;
    let mut reply = [0u8; 64];
    recv_exact(handle, &mut reply)?;
    TsopAdapter::from_raw(reply[1])
        .ok_or_else(|| Error::Io(format!("bad TSOP48 reply {:#04x}", reply[1])))
}

/// Reboot the programmer (into the bootloader from normal mode and vice
/// versa). The device drops off the bus; use [`Handle::reopen`].
pub fn reset<T: Transport>(handle: &mut Handle<T>) -> Result<()> {
    let mut msg = [0u8; 8];
    msg[0] = RESET;
    handle.transport.msg_send(&msg)
}

// ---------------------------------------------------------------------------
// Hardware self-test
// ---------------------------------------------------------------------------

struct ZifPin {
    pin: u8,
    latch: u8,
    oe: u8,
    mask: u8,
}

const fn zif(pin: u8, latch: u8, oe: u8, mask: u8) -> ZifPin {
    ZifPin {
        pin,
        latch,
        oe,
        mask,
    }
}

// 16 VPP pins, NPN transistor masks.
static VPP_PINS: [ZifPin; 16] = [
    zif(1, 1, 1, 0x04),
    zif(2, 1, 1, 0x08),
    zif(3, 0, 1, 0x04),
    zif(4, 0, 1, 0x08),
    zif(9, 0, 1, 0x20),
    zif(10, 0, 1, 0x10),
    zif(30, 1, 1, 0x01),
    zif(31, 0, 1, 0x01),
    zif(32, 1, 1, 0x80),
    zif(33, 0, 1, 0x40),
    zif(34, 0, 1, 0x02),
    zif(36, 1, 1, 0x02),
    zif(37, 0, 1, 0x80),
    zif(38, 1, 1, 0x40),
    zif(39, 1, 1, 0x20),
    zif(40, 1, 1, 0x10),
];

// 24 VCC pins, PNP transistor masks.
static VCC_PINS: [ZifPin; 24] = [
    zif(1, 2, 2, 0x7F),
    zif(2, 2, 2, 0xEF),
    zif(3, 2, 2, 0xDF),
    zif(4, 3, 2, 0xFE),
    zif(5, 2, 2, 0xFB),
    zif(6, 3, 2, 0xFB),
    zif(7, 4, 2, 0xBF),
    zif(8, 4, 2, 0xFD),
    zif(9, 4, 2, 0xFB),
    zif(10, 4, 2, 0xF7),
    zif(11, 4, 2, 0xFE),
    zif(12, 4, 2, 0x7F),
    zif(13, 4, 2, 0xEF),
    zif(21, 4, 2, 0xDF),
    zif(30, 3, 2, 0xBF),
    zif(32, 3, 2, 0xFD),
    zif(33, 3, 2, 0xDF),
    zif(34, 3, 2, 0xF7),
    zif(35, 3, 2, 0xEF),
    zif(36, 3, 2, 0x7F),
    zif(37, 2, 2, 0xF7),
    zif(38, 2, 2, 0xBF),
    zif(39, 2, 2, 0xFE),
    zif(40, 2, 2, 0xFD),
];

// 25 GND pins, NPN transistor masks.
static GND_PINS: [ZifPin; 25] = [
    zif(1, 6, 2, 0x04),
    zif(2, 6, 2, 0x08),
    zif(3, 6, 2, 0x40),
    zif(4, 6, 2, 0x02),
    zif(5, 5, 2, 0x04),
    zif(6, 5, 2, 0x08),
    zif(7, 5, 2, 0x40),
    zif(8, 5, 2, 0x02),
    zif(9, 5, 2, 0x01),
    zif(10, 5, 2, 0x80),
    zif(11, 5, 2, 0x10),
    zif(12, 5, 2, 0x20),
    zif(14, 7, 2, 0x08),
    zif(16, 7, 2, 0x40),
    zif(20, 9, 2, 0x01),
    zif(30, 7, 2, 0x04),
    zif(31, 6, 2, 0x01),
    zif(32, 6, 2, 0x80),
    zif(34, 6, 2, 0x10),
    zif(35, 6, 2, 0x20),
    zif(36, 7, 2, 0x20),
    zif(37, 7, 2, 0x10),
    zif(38, 7, 2, 0x02),
    zif(39, 7, 2, 0x80),
    zif(40, 7, 2, 0x01),
];

fn reset_pin_drivers<T: Transport>(handle: &mut Handle<T>) -> Result<()> {
    let mut msg = [0u8; 10];
    msg[0] = RESET_PIN_DRIVERS;
    handle.transport.msg_send(&msg)
}

// The self-test runs without a selected chip, so END goes out bare.
fn end_transaction_raw<T: Transport>(handle: &mut Handle<T>) -> Result<()> {
    let mut msg = [0u8; 4];
    msg[0] = END_TRANSACTION;
    handle.transport.msg_send(&msg)
}

fn set_latch<T: Transport>(handle: &mut Handle<T>, pairs: &[(u8, u8)], oe: u8) -> Result<()> {
    let mut msg = [0u8; 32];
    msg[0] = SET_LATCH;
    msg[7] = pairs.len() as u8;
    msg[8] = oe;
    for (i, (latch, mask)) in pairs.iter().enumerate() {
        msg[9 + 2 * i] = *latch;
        msg[10 + 2 * i] = *mask;
    }
    handle.transport.msg_send(&msg)
}

fn read_zif_pins<T: Transport>(handle: &mut Handle<T>) -> Result<[u8; 64]> {
    let mut msg = [0u8; 18];
    msg[0] = READ_ZIF_PINS;
    handle.transport.msg_send(&msg)?;
    let mut reply = [0u8; 64];
    recv_exact(handle, &mut reply)?;
    Ok(reply)
}

/// Drive one pin driver, let the latch settle, and read the pin back.
fn check_pin_driver<T: Transport>(handle: &mut Handle<T>, pin: &ZifPin) -> Result<bool> {
    set_latch(handle, &[(pin.latch, pin.mask)], pin.oe)?;
    std::thread::sleep(Duration::from_millis(5));
    let zif = read_zif_pins(handle)?;
    if zif[1] != 0 {
        reset_pin_drivers(handle)?;
        end_transaction_raw(handle)?;
        return Err(Error::Overcurrent);
    }
    let state = zif[6 + pin.pin as usize] != 0;
    reset_pin_drivers(handle)?;
    Ok(state)
}

/// Exercise every VPP/VCC/GND pin driver and both overcurrent paths.
/// Returns the number of failing drivers; protocol failures abort.
pub fn hardware_check<T: Transport>(handle: &mut Handle<T>) -> Result<u32> {
    let mut errors = 0;
    reset_pin_drivers(handle)?;

    for pin in &VPP_PINS {
        let ok = check_pin_driver(handle, pin)?;
        if !ok {
            errors += 1;
        }
        eprintln!("VPP driver pin {} is {}", pin.pin, if ok { "OK" } else { "Bad" });
    }
    eprintln!();

    for pin in &VCC_PINS {
        let ok = check_pin_driver(handle, pin)?;
        if !ok {
            errors += 1;
        }
        eprintln!("VCC driver pin {} is {}", pin.pin, if ok { "OK" } else { "Bad" });
    }
    eprintln!();

    for pin in &GND_PINS {
        // GND drivers pull the pin low; a high read-back is the failure.
        let high = check_pin_driver(handle, pin)?;
        if high {
            errors += 1;
        }
        eprintln!("GND driver pin {} is {}", pin.pin, if high { "Bad" } else { "OK" });
    }
    eprintln!();

    // Short VPP against GND on ZIF pin 1; the firmware must trip.
    set_latch(
        handle,
        &[
            (VPP_PINS[0].latch, VPP_PINS[0].mask),
            (GND_PINS[0].latch, GND_PINS[0].mask),
        ],
        OE_ALL,
    )?;
    if read_zif_pins(handle)?[1] != 0 {
        eprintln!("VPP overcurrent protection is OK.");
    } else {
        eprintln!("VPP overcurrent protection failed!");
        errors += 1;
    }
    reset_pin_drivers(handle)?;
    end_transaction_raw(handle)?;
    std::thread::sleep(Duration::from_millis(5));

    // Same short, VCC against GND on ZIF pin 40.
    let vcc40 = &VCC_PINS[23];
    let gnd40 = &GND_PINS[24];
    set_latch(
        handle,
        &[(vcc40.latch, vcc40.mask), (gnd40.latch, gnd40.mask)],
        OE_VCC_GND,
    )?;
    if read_zif_pins(handle)?[1] != 0 {
        eprintln!("VCC overcurrent protection is OK.");
    } else {
        eprintln!("VCC overcurrent protection failed!");
        errors += 1;
    }
    reset_pin_drivers(handle)?;
    end_transaction_raw(handle)?;

    if errors != 0 {
        eprintln!("\nHardware test completed with {errors} error(s).");
    } else {
        eprintln!("\nHardware test completed successfully!");
    }
    Ok(errors)
}
