#![allow(dead_code)]

//! A scripted stand-in for the programmer hardware.
//!
//! [`MockProgrammer`] implements the bulk transport by decoding each sent
//! frame and synthesizing the reply the firmware would produce, so the
//! whole engine runs headless. Every sent frame is recorded for the tests
//! to assert packet layouts and command ordering.

use std::collections::VecDeque;
use tlprog::bytes::{format_int, load_int, Endianness};
use tlprog::error::Result;
use tlprog::usb::Transport;

// Opcodes mirrored from the wire dialect.
pub const GET_SYSTEM_INFO: u8 = 0x00;
pub const BEGIN: u8 = 0x03;
pub const END: u8 = 0x04;
pub const GET_CHIP_ID: u8 = 0x05;
pub const READ_CFG: u8 = 0x12;
pub const WRITE_CODE: u8 = 0x20;
pub const READ_CODE: u8 = 0x21;
pub const ERASE: u8 = 0x22;
pub const READ_DATA: u8 = 0x30;
pub const READ_LOCK: u8 = 0x41;
pub const PROTECT_OFF: u8 = 0x44;
pub const PROTECT_ON: u8 = 0x45;
pub const BOOTLOADER_WRITE: u8 = 0xAA;
pub const BOOTLOADER_ERASE: u8 = 0xCC;
pub const UNLOCK_TSOP48: u8 = 0xFD;
pub const GET_STATUS: u8 = 0xFE;

pub struct MockProgrammer {
    pub sent: Vec<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,

    /// System-info bytes: run state (1 normal, 2 bootloader) and model.
    pub run_state: u8,
    pub model_byte: u8,
    /// 0-based GET_STATUS call index that reports overcurrent.
    pub ovc_on_status_call: Option<usize>,
    status_calls: usize,

    /// `(id_type, id bytes)` served for GET_CHIP_ID.
    pub chip_id: (u8, Vec<u8>),
    /// Adapter byte served for UNLOCK_TSOP48.
    pub tsop48_adapter: u8,

    /// Backing images served chunk-by-chunk for code and data reads.
    pub code_image: Vec<u8>,
    pub data_image: Vec<u8>,
    code_cursor: usize,
    data_cursor: usize,

    /// Fuse buffers served at `[7..)` of fuse read replies.
    pub cfg_fuses: Vec<u8>,
    pub lock_fuses: Vec<u8>,
}

impl Default for MockProgrammer {
    fn default() -> Self {
        MockProgrammer {
            sent: Vec::new(),
            replies: VecDeque::new(),
            run_state: 1,
            model_byte: 1,
            ovc_on_status_call: None,
            status_calls: 0,
            chip_id: (0, Vec::new()),
            tsop48_adapter: 0,
            code_image: Vec::new(),
            data_image: Vec::new(),
            code_cursor: 0,
            data_cursor: 0,
            cfg_fuses: Vec::new(),
            lock_fuses: Vec::new(),
        }
    }
}

impl MockProgrammer {
    pub fn new() -> Self {
        MockProgrammer::default()
    }

    /// Frames sent with the given opcode, in order.
    pub fn frames_with(&self, opcode: u8) -> Vec<&Vec<u8>> {
        self.sent.iter().filter(|f| f[0] == opcode).collect()
    }

    fn serve(&mut self, frame: &[u8]) {
        match frame[0] {
            GET_SYSTEM_INFO => {
                let mut reply = vec![0u8; 64];
                reply[1] = self.run_state;
                reply[4] = 0x55; // firmware 3.2.85
                reply[5] = 0x03;
                reply[6] = self.model_byte;
                self.replies.push_back(reply);
            }
            GET_STATUS => {
                let mut reply = vec![0u8; 64];
                if self.ovc_on_status_call == Some(self.status_calls) {
                    reply[9] = 1;
                }
                self.status_calls += 1;
                self.replies.push_back(reply);
            }
            GET_CHIP_ID => {
                let mut reply = vec![0u8; 32];
                reply[0] = self.chip_id.0;
                reply[1] = self.chip_id.1.len() as u8;
                reply[2..2 + self.chip_id.1.len()].copy_from_slice(&self.chip_id.1);
                self.replies.push_back(reply);
            }
            READ_CODE => {
                let size = load_int(&frame[2..], 2, Endianness::Little) as usize;
                let reply = take_chunk(&self.code_image, &mut self.code_cursor, size);
                self.replies.push_back(reply);
            }
            READ_DATA => {
                let size = load_int(&frame[2..], 2, Endianness::Little) as usize;
                let reply = take_chunk(&self.data_image, &mut self.data_cursor, size);
                self.replies.push_back(reply);
            }
            READ_CFG | READ_LOCK => {
                let mut reply = vec![0u8; 64];
                let fuse = if frame[0] == READ_CFG {
                    &self.cfg_fuses
                } else {
                    &self.lock_fuses
                };
                reply[7..7 + fuse.len()].copy_from_slice(fuse);
                self.replies.push_back(reply);
            }
            ERASE => self.replies.push_back(vec![0u8; 64]),
            UNLOCK_TSOP48 => {
                let mut reply = vec![0u8; 64];
                reply[1] = self.tsop48_adapter;
                self.replies.push_back(reply);
            }
            BOOTLOADER_ERASE => {
                let mut reply = vec![0u8; 32];
                reply[0] = BOOTLOADER_ERASE;
                self.replies.push_back(reply);
            }
            // BEGIN, END, writes and the rest produce no reply.
            _ => {}
        }
    }
}

fn take_chunk(image: &[u8], cursor: &mut usize, size: usize) -> Vec<u8> {
    let mut chunk = vec![0u8; size];
    let available = image.len().saturating_sub(*cursor).min(size);
    if available > 0 {
        chunk[..available].copy_from_slice(&image[*cursor..*cursor + available]);
    }
    *cursor += size;
    chunk
}

impl Transport for MockProgrammer {
    fn msg_send(&mut self, buf: &[u8]) -> Result<()> {
        self.sent.push(buf.to_vec());
        self.serve(buf);
        Ok(())
    }

    fn msg_recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let reply = self.replies.pop_front().expect("reply with nothing pending");
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }
}

/// Assemble a valid `update.dat` container around two stage-1 images.
pub fn synthetic_update(a_image: &[u8], cs_image: &[u8], a_erase: u8, cs_erase: u8) -> Vec<u8> {
    use crc::{Crc, CRC_32_ISO_HDLC};
    const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

    let mut data = vec![0u8; tlprog::firmware::UPDATE_DAT_SIZE];
    data[0] = 85;
    data[9] = a_erase;
    data[17] = cs_erase;
    for (crc_at, keys_at, enc_at, image) in
        [(4, 20, 2588, a_image), (12, 1304, 157_468, cs_image)]
    {
        format_int(
            &mut data[crc_at..],
            !CRC32.checksum(image),
            4,
            Endianness::Little,
        );
        let index = 0x2A7usize;
        format_int(&mut data[keys_at..], index as u32, 4, Endianness::Little);
        for i in 0..256 {
            data[keys_at + 4 + i] = (i as u8).wrapping_mul(31).wrapping_add(5);
        }
        for i in 0..1024 {
            data[keys_at + 4 + 256 + i] = (i as u8).rotate_left(3) ^ 0x42;
        }
        for i in 0..tlprog::firmware::ENC_FIRMWARE_SIZE {
            let xt1 = data[keys_at + 4 + (i / 80) % 256];
            let xt2 = data[keys_at + 4 + 256 + ((i + index) & 0x3FF)];
            data[enc_at + i] = image[i] ^ xt1 ^ xt2;
        }
    }
    data
}
