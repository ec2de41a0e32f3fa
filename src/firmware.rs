//! Firmware update codec and reflash flow.
//!
//! The vendor ships both variant firmwares in one opaque container,
//! `update.dat`, always exactly 312,348 bytes:
//!
//! ```text
//! +--------------------------------------+ 0
//! | header (4 B, [0] = minor of 3.2.x)   |
//! +--------------------------------------+ 4
//! | A:  ~crc32, pad, erase, pad, pad     | 8 B
//! | CS: ~crc32, pad, erase, pad, pad     | 8 B
//! +--------------------------------------+ 20
//! | A:  index u32, xortable1, xortable2  | 4 + 256 + 1024 B
//! | CS: index u32, xortable1, xortable2  | 4 + 256 + 1024 B
//! +--------------------------------------+ 2588
//! | A firmware  (0x25D00 B, encrypted)   |
//! +--------------------------------------+ 157468
//! | CS firmware (0x25D00 B, encrypted)   |
//! +--------------------------------------+ 312348
//! ```
//!
//! Peeling the per-file XOR layer yields the image the bootloader accepts:
//! 1936 blocks of 80 bytes, each still scrambled by the per-variant block
//! transform keyed by a 256-byte table baked into the hardware. The block
//! transform is what makes A and CS firmware mutually unreadable, and
//! undoing it with one variant's table and redoing it with the other's is
//! how an A device can run CS firmware (and vice versa).
//!
//! Each 80-byte block carries 64 payload bytes plus 16 nonce bytes, which
//! is why the flash address advances by 64 per block.

use crate::error::{Error, Result};
use crate::protocol::{tl866a, DeviceStatus, Handle, Model};
use crate::usb::{Transport, UsbTransport};
use crate::bytes::{format_int, load_int, Endianness};
use crc::{Crc, CRC_32_ISO_HDLC};
use rand::RngCore;
use std::fs;
use std::path::Path;

pub const UPDATE_DAT_SIZE: usize = 312_348;
pub const ENC_FIRMWARE_SIZE: usize = 0x25D00;
pub const UNENC_FIRMWARE_SIZE: usize = 0x1E400;
pub const FIRMWARE_BLOCK_SIZE: usize = 0x50;
/// First flash address above the bootloader.
pub const BOOTLOADER_SIZE: u32 = 0x1800;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

// Per-variant block transform tables, baked into the respective hardware.
#[rustfmt::skip]
static A_XORTABLE: [u8; 256] = [
    0xA4, 0x1E, 0x42, 0x8C, 0x3C, 0x76, 0x14, 0xC7, 0xB8, 0xB5, 0x81, 0x4A,
    0x13, 0x37, 0x7C, 0x0A, 0xFE, 0x3B, 0x63, 0xC1, 0xD5, 0xFD, 0x8C, 0x39,
    0xD1, 0x1F, 0x22, 0xC7, 0x7F, 0x4D, 0x2F, 0x15, 0x71, 0x21, 0xF9, 0x25,
    0x33, 0x44, 0x92, 0x93, 0x80, 0xD7, 0xAB, 0x1B, 0xB6, 0x11, 0xA9, 0x5A,
    0x88, 0x29, 0xFB, 0xD9, 0xF3, 0x76, 0xAA, 0x47, 0x73, 0xD5, 0x31, 0x06,
    0x76, 0x4B, 0x90, 0xEA, 0x11, 0xEB, 0x9C, 0x3D, 0xF2, 0xFA, 0x99, 0x06,
    0x96, 0x52, 0x0A, 0x8A, 0xBC, 0x04, 0xC8, 0x14, 0x19, 0x41, 0x52, 0xF2,
    0x4D, 0x7B, 0x64, 0xC0, 0x16, 0xC7, 0xCB, 0xE9, 0xC3, 0x86, 0x77, 0x6A,
    0xEC, 0x44, 0xD2, 0xD9, 0x61, 0xE0, 0x50, 0xA6, 0x60, 0xED, 0x47, 0xA2,
    0x0B, 0x59, 0x02, 0xBD, 0x18, 0x4C, 0x11, 0x14, 0xCB, 0x53, 0xE2, 0x2B,
    0x21, 0xBE, 0x96, 0x76, 0x4F, 0x47, 0x0D, 0x1F, 0x6A, 0xF4, 0x43, 0x03,
    0x68, 0x3E, 0xE0, 0xFE, 0x47, 0x72, 0x0A, 0x68, 0x8C, 0x58, 0x7E, 0xDF,
    0xEF, 0x13, 0xDF, 0x47, 0x55, 0x48, 0x4D, 0x10, 0xFE, 0x82, 0x3A, 0xB7,
    0x00, 0xD5, 0x79, 0x90, 0xF4, 0xC2, 0x98, 0xC2, 0xEF, 0x5B, 0x70, 0x93,
    0xB4, 0xA7, 0xFA, 0xE6, 0x27, 0x48, 0x65, 0x01, 0x05, 0x5B, 0x65, 0x94,
    0xD3, 0xA0, 0xCD, 0xF7, 0x14, 0xDB, 0x60, 0xB4, 0xBF, 0x7A, 0xE4, 0x45,
    0xF0, 0x77, 0x79, 0x1F, 0xDE, 0x80, 0x29, 0xEF, 0x0D, 0x56, 0xC0, 0x23,
    0xC5, 0x73, 0xDE, 0xAC, 0xC2, 0xEF, 0x4A, 0x02, 0x2D, 0xA4, 0x89, 0x69,
    0xCB, 0x91, 0xB0, 0x74, 0x75, 0x7C, 0x76, 0xC7, 0xC8, 0xDB, 0x8D, 0x20,
    0x1D, 0xF5, 0x33, 0x99, 0xBB, 0x45, 0x04, 0x27, 0x4C, 0x1F, 0x12, 0x67,
    0x8E, 0x96, 0x37, 0x9A, 0x4B, 0x9C, 0xAA, 0xED, 0x8B, 0x6B, 0xD1, 0xFF,
    0x08, 0x24, 0x56, 0x9D,
];

#[rustfmt::skip]
static CS_XORTABLE: [u8; 256] = [
    0x0B, 0x08, 0x07, 0x18, 0xEC, 0xC7, 0xDF, 0x8C, 0xD6, 0x76, 0xCE, 0x10,
    0x9F, 0x61, 0x7C, 0xF5, 0x61, 0x09, 0xFB, 0x59, 0xD0, 0x24, 0xB4, 0x4F,
    0xCA, 0xE4, 0xA1, 0x3A, 0x30, 0x7C, 0xBD, 0x7A, 0xF5, 0xE1, 0xB9, 0x4B,
    0x74, 0xCD, 0xF1, 0xE9, 0x07, 0x0A, 0x9E, 0xF9, 0xD5, 0xED, 0x4D, 0x24,
    0xEB, 0x21, 0x90, 0x05, 0x8F, 0xA5, 0xF3, 0x45, 0xD0, 0x18, 0x31, 0x04,
    0x62, 0x35, 0xA8, 0x7B, 0xA9, 0x9A, 0x0B, 0xE0, 0x14, 0xCD, 0x57, 0x8A,
    0xAC, 0x80, 0x08, 0x56, 0xED, 0x14, 0x8C, 0x49, 0xD4, 0x5D, 0xF8, 0x77,
    0x39, 0xA5, 0xFA, 0x23, 0x5F, 0xF3, 0x0E, 0x27, 0xCA, 0x8D, 0xF5, 0x97,
    0x50, 0xBB, 0x64, 0xA1, 0x73, 0xCE, 0xF9, 0xB7, 0xEE, 0x61, 0x72, 0xF1,
    0x8E, 0xDF, 0x21, 0xAC, 0x43, 0x45, 0x9B, 0x78, 0x77, 0x29, 0xB1, 0x31,
    0x9E, 0xFC, 0xA1, 0x6B, 0x0F, 0x8C, 0x8D, 0x13, 0x12, 0xCC, 0x2B, 0x54,
    0x3A, 0xD8, 0xBF, 0xB8, 0xF5, 0x34, 0x46, 0x90, 0x61, 0x54, 0xF4, 0x95,
    0x61, 0x62, 0xE1, 0xCF, 0xF1, 0x3B, 0x00, 0xB6, 0xB6, 0xBB, 0x50, 0x98,
    0xD9, 0x3A, 0x56, 0x3A, 0x16, 0x56, 0xCA, 0xC2, 0x10, 0xF3, 0x91, 0xD4,
    0xE8, 0x81, 0xEB, 0xFC, 0x0D, 0x7E, 0xEE, 0x4C, 0x56, 0x3B, 0x33, 0x46,
    0x4E, 0xE2, 0xCF, 0xFC, 0xCF, 0xB8, 0x84, 0x75, 0xD2, 0xA0, 0x39, 0x53,
    0x85, 0xE1, 0xA8, 0xB3, 0x9E, 0x28, 0x57, 0x55, 0xEF, 0xD1, 0xC9, 0xFD,
    0x3B, 0x62, 0xF5, 0x18, 0x49, 0x58, 0xF7, 0xA3, 0x36, 0x27, 0x06, 0x49,
    0x0F, 0x7C, 0xA6, 0xCB, 0xA0, 0xC5, 0x1E, 0xA5, 0x86, 0xF3, 0x2D, 0xEF,
    0x8C, 0x7E, 0xF9, 0x81, 0x34, 0xAA, 0x48, 0x5A, 0x93, 0x0A, 0xF2, 0x43,
    0x62, 0x42, 0x97, 0xAF, 0x53, 0x10, 0x8D, 0xE6, 0xA1, 0x8E, 0x1C, 0x62,
    0xEB, 0xB1, 0xEE, 0x79,
];

fn xortable(model: Model) -> &'static [u8; 256] {
    match model {
        Model::Tl866a => &A_XORTABLE,
        Model::Tl866cs => &CS_XORTABLE,
    }
}

/// Scramble one 80-byte block in place: fresh nonce bytes, the pairwise
/// swap, the 3-bit carry chain, then the table run starting at `index`.
pub fn encrypt_block(data: &mut [u8; FIRMWARE_BLOCK_SIZE], table: &[u8; 256], index: u8) {
    rand::thread_rng().fill_bytes(&mut data[64..]);

    for i in (0..FIRMWARE_BLOCK_SIZE / 2).step_by(4) {
        data.swap(i, FIRMWARE_BLOCK_SIZE - i - 1);
    }
    for i in 0..FIRMWARE_BLOCK_SIZE - 1 {
        data[i] = ((data[i] << 3) & 0xF8) | (data[i + 1] >> 5);
    }
    data[FIRMWARE_BLOCK_SIZE - 1] = (data[FIRMWARE_BLOCK_SIZE - 1] << 3) & 0xF8;
    for (k, byte) in data.iter_mut().enumerate() {
        *byte ^= table[index.wrapping_add(k as u8) as usize];
    }
}

/// Inverse of [`encrypt_block`], steps in reverse order.
pub fn decrypt_block(data: &mut [u8; FIRMWARE_BLOCK_SIZE], table: &[u8; 256], index: u8) {
    for (k, byte) in data.iter_mut().enumerate() {
        *byte ^= table[index.wrapping_add(k as u8) as usize];
    }
    for i in (1..FIRMWARE_BLOCK_SIZE).rev() {
        data[i] = ((data[i] >> 3) & 0x1F) | (data[i - 1] << 5);
    }
    data[0] = (data[0] >> 3) & 0x1F;

    for i in (0..FIRMWARE_BLOCK_SIZE / 2).step_by(4) {
        data.swap(i, FIRMWARE_BLOCK_SIZE - i - 1);
    }
}

/// Block-encrypt a plain 123,904-byte firmware for `model`. The table
/// index starts at the variant's erase byte and advances 4 per block.
pub fn encrypt_firmware(plain: &[u8], model: Model, mut index: u8) -> Vec<u8> {
    debug_assert_eq!(plain.len(), UNENC_FIRMWARE_SIZE);
    let table = xortable(model);
    let mut out = Vec::with_capacity(ENC_FIRMWARE_SIZE);
    let mut block = [0u8; FIRMWARE_BLOCK_SIZE];
    for chunk in plain.chunks(FIRMWARE_BLOCK_SIZE - 16) {
        block[..64].copy_from_slice(chunk);
        encrypt_block(&mut block, table, index);
        out.extend_from_slice(&block);
        index = index.wrapping_add(4);
    }
    out
}

/// Block-decrypt a 154,880-byte image, dropping the per-block nonces.
pub fn decrypt_firmware(enc: &[u8], model: Model, mut index: u8) -> Vec<u8> {
    debug_assert_eq!(enc.len(), ENC_FIRMWARE_SIZE);
    let table = xortable(model);
    let mut out = Vec::with_capacity(UNENC_FIRMWARE_SIZE);
    let mut block = [0u8; FIRMWARE_BLOCK_SIZE];
    for chunk in enc.chunks(FIRMWARE_BLOCK_SIZE) {
        block.copy_from_slice(chunk);
        decrypt_block(&mut block, table, index);
        out.extend_from_slice(&block[..64]);
        index = index.wrapping_add(4);
    }
    out
}

struct ImageSlot {
    erase: u8,
    /// Per-file XOR layer removed, CRC verified; still block-scrambled.
    firmware: Vec<u8>,
}

/// A parsed and verified `update.dat`.
pub struct UpdateFile {
    /// Minor of the contained 3.2.x firmware.
    pub minor: u8,
    a: ImageSlot,
    cs: ImageSlot,
}

impl UpdateFile {
    pub fn load(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path)?;
        if meta.len() != UPDATE_DAT_SIZE as u64 {
            return Err(Error::FirmwareSize);
        }
        UpdateFile::parse(&fs::read(path)?)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != UPDATE_DAT_SIZE {
            return Err(Error::FirmwareSize);
        }

        let a = ImageSlot {
            erase: data[9],
            firmware: decode_slot(data, 4, 20, 2588)?,
        };
        let cs = ImageSlot {
            erase: data[17],
            firmware: decode_slot(data, 12, 1304, 157_468)?,
        };

        Ok(UpdateFile {
            minor: data[0],
            a,
            cs,
        })
    }

    fn slot(&self, model: Model) -> &ImageSlot {
        match model {
            Model::Tl866a => &self.a,
            Model::Tl866cs => &self.cs,
        }
    }

    pub fn erase(&self, model: Model) -> u8 {
        self.slot(model).erase
    }

    pub fn image(&self, model: Model) -> &[u8] {
        &self.slot(model).firmware
    }
}

/// Remove one variant's per-file XOR layer and verify its CRC.
fn decode_slot(data: &[u8], crc_at: usize, keys_at: usize, enc_at: usize) -> Result<Vec<u8>> {
    let stored_crc = load_int(&data[crc_at..], 4, Endianness::Little);
    let index = load_int(&data[keys_at..], 4, Endianness::Little) as usize;
    let xt1 = &data[keys_at + 4..keys_at + 4 + 256];
    let xt2 = &data[keys_at + 4 + 256..keys_at + 4 + 256 + 1024];
    let enc = &data[enc_at..enc_at + ENC_FIRMWARE_SIZE];

    let firmware: Vec<u8> = enc
        .iter()
        .enumerate()
        .map(|(i, byte)| byte ^ xt2[(i + index) & 0x3FF] ^ xt1[(i / 80) & 0xFF])
        .collect();

    // The vendor stores the complement of the standard CRC-32/IEEE.
    if CRC32.checksum(&firmware) != !stored_crc {
        return Err(Error::FirmwareCrc);
    }
    Ok(firmware)
}

/// The byte stream to flash onto a `device_model` programmer when the user
/// chose `chosen` firmware. A cross-variant choice is unwrapped with the
/// chosen variant's key and wrapped again with the device's own.
pub fn prepare_image(update: &UpdateFile, chosen: Model, device_model: Model) -> Vec<u8> {
    if chosen == device_model {
        return update.image(device_model).to_vec();
    }
    let plain = decrypt_firmware(update.image(chosen), chosen, update.erase(chosen));
    encrypt_firmware(&plain, device_model, update.erase(device_model))
}

/// Erase the application flash and stream `image` through the bootloader.
pub fn flash_image<T: Transport>(
    handle: &mut Handle<T>,
    erase: u8,
    image: &[u8],
) -> Result<()> {
    eprint!("Erasing... ");
    let mut msg = [0u8; 20];
    msg[0] = tl866a::BOOTLOADER_ERASE;
    msg[7] = erase;
    handle.transport.msg_send(&msg)?;
    let mut reply = [0u8; 32];
    let received = handle.transport.msg_recv(&mut reply)?;
    if received < 1 || reply[0] != tl866a::BOOTLOADER_ERASE {
        eprintln!("failed");
        return Err(Error::BootloaderState);
    }
    eprintln!("OK");

    let blocks = image.len() / FIRMWARE_BLOCK_SIZE;
    let mut address = BOOTLOADER_SIZE;
    let mut packet = [0u8; FIRMWARE_BLOCK_SIZE + 7];
    for (i, block) in image.chunks(FIRMWARE_BLOCK_SIZE).enumerate() {
        packet[0] = tl866a::BOOTLOADER_WRITE;
        packet[1] = 0x00;
        packet[2] = FIRMWARE_BLOCK_SIZE as u8;
        packet[3] = 0x00;
        format_int(&mut packet[4..], address, 3, Endianness::Little);
        packet[7..].copy_from_slice(block);
        handle.transport.msg_send(&packet)?;
        // 64 payload bytes per 80-byte block; the rest are nonces.
        address += 64;
        eprint!("\r\x1b[KReflashing... {:2}%", i * 100 / blocks);
    }
    eprintln!("\r\x1b[KReflashing... 100%");
    Ok(())
}

/// Full update flow against real hardware: enter the bootloader, reflash,
/// reboot, and confirm the application came back.
pub fn update_firmware(
    mut handle: Handle<UsbTransport>,
    update: &UpdateFile,
    chosen: Model,
) -> Result<()> {
    if handle.status == DeviceStatus::Normal {
        eprint!("Switching to bootloader... ");
        handle.reset()?;
        drop(handle);
        handle = Handle::reopen(None)?;
        if handle.status == DeviceStatus::Normal {
            eprintln!("failed");
            return Err(Error::BootloaderState);
        }
        eprintln!("OK");
    }

    let image = prepare_image(update, chosen, handle.model);
    let erase = update.erase(handle.model);
    flash_image(&mut handle, erase, &image)?;

    eprint!("Resetting device... ");
    handle.reset()?;
    drop(handle);
    let handle = Handle::reopen(None)?;
    if handle.status != DeviceStatus::Normal {
        eprintln!("failed");
        return Err(Error::BootloaderState);
    }
    eprintln!("OK");
    Ok(())
}
