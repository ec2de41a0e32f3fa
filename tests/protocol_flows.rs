//! End-to-end flows driven through the mock programmer.

mod common;

use common::*;
use tlprog::actions::{self, Options, PageFilter, Silent};
use tlprog::database;
use tlprog::error::Error;
use tlprog::protocol::{Handle, Page, TsopAdapter};

fn open(chip: &str, mock: MockProgrammer) -> Handle<MockProgrammer> {
    let device = database::get_by_name(chip).unwrap();
    Handle::open(mock, Some(device)).unwrap()
}

#[test]
fn read_at28c256_emits_32_chunks_with_ovc_polls() {
    let mut mock = MockProgrammer::new();
    mock.code_image = (0..32768).map(|i| (i % 253) as u8).collect();
    let image = mock.code_image.clone();
    let mut handle = open("AT28C256", mock);

    let data = handle
        .with_transaction(|handle| {
            actions::read_page(handle, Page::Code, 32768, &mut Silent)
        })
        .unwrap();
    assert_eq!(data, image);

    let mock = handle.into_transport();
    let reads = mock.frames_with(READ_CODE);
    assert_eq!(reads.len(), 32);
    for (i, frame) in reads.iter().enumerate() {
        assert_eq!(frame.len(), 18);
        // size 1024, address i * 1024, both little-endian
        assert_eq!(&frame[2..4], &[0x00, 0x04]);
        let addr = (i * 1024) as u32;
        assert_eq!(
            &frame[4..7],
            &[addr as u8, (addr >> 8) as u8, (addr >> 16) as u8]
        );
    }

    // BEGIN polls once; the pipeline polls after chunks 10, 20 and 30.
    assert_eq!(mock.frames_with(GET_STATUS).len(), 4);
    assert_eq!(mock.frames_with(BEGIN).len(), 1);
    assert_eq!(mock.frames_with(BEGIN)[0].len(), 48);
    let last = mock.sent.last().unwrap();
    assert_eq!(last[0], END);
    assert_eq!(last.len(), 4);

    // Command ordering: BEGIN before the first read, END after the last.
    let opcodes: Vec<u8> = mock.sent.iter().skip(1).map(|f| f[0]).collect();
    assert_eq!(opcodes[0], BEGIN);
    assert_eq!(opcodes[1], GET_STATUS);
    assert_eq!(opcodes[2], READ_CODE);
}

#[test]
fn write_pic16f84a_uses_word_addresses() {
    let mut mock = MockProgrammer::new();
    let image: Vec<u8> = (0..2048).map(|i| (i % 247) as u8).collect();
    let mut handle = open("PIC16F84A", mock);

    handle
        .with_transaction(|handle| {
            actions::write_page(handle, Page::Code, &image, &mut Silent)
        })
        .unwrap();

    mock = handle.into_transport();
    let writes = mock.frames_with(WRITE_CODE);
    assert_eq!(writes.len(), 64);

    let mut reassembled = Vec::new();
    for (i, frame) in writes.iter().enumerate() {
        assert_eq!(frame.len(), 7 + 32);
        assert_eq!(&frame[2..4], &[32, 0]);
        // Byte offset i*32, pre-shifted for the 14-bit words.
        let addr = (i * 32 / 2) as u32;
        assert_eq!(
            &frame[4..7],
            &[addr as u8, (addr >> 8) as u8, (addr >> 16) as u8]
        );
        reassembled.extend_from_slice(&frame[7..]);
    }
    assert_eq!(writes[63][4..7], [0xF0, 0x03, 0x00]); // 1008
    // Chunking law: the payloads concatenate back to the exact image.
    assert_eq!(reassembled, image);
}

#[test]
fn chip_id_type3_discards_revision_bits() {
    // The chip reports (id << 5) | revision; the gate must accept it.
    let mut mock = MockProgrammer::new();
    let raw = (0x0560 << 5) | 0x02;
    mock.chip_id = (3, vec![raw as u8, (raw >> 8) as u8]); // little-endian
    let mut handle = open("PIC16F84A", mock);

    actions::check_chip_id(&mut handle, false).unwrap();

    // A different die is rejected...
    let mut mock = MockProgrammer::new();
    let raw = (0x1060 << 5) | 0x01;
    mock.chip_id = (3, vec![raw as u8, (raw >> 8) as u8]);
    let mut handle = open("PIC16F84A", mock);
    match actions::check_chip_id(&mut handle, false) {
        Err(Error::ChipIdMismatch { expected, got }) => {
            assert_eq!(expected, 0x0560);
            assert_eq!(got, 0x1060);
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
    // ...and the transaction was closed before the error surfaced.
    let mock = handle.into_transport();
    assert_eq!(mock.sent.last().unwrap()[0], END);

    // -y downgrades the mismatch to a warning.
    let mut mock = MockProgrammer::new();
    let raw = (0x1060 << 5) | 0x01;
    mock.chip_id = (3, vec![raw as u8, (raw >> 8) as u8]);
    let mut handle = open("PIC16F84A", mock);
    actions::check_chip_id(&mut handle, true).unwrap();
}

#[test]
fn chip_id_microchip_table_supplies_expected_id() {
    // PIC18F2550 has no id of its own; opts3 points into the id table.
    let mut mock = MockProgrammer::new();
    let raw = (0x1240 << 5) | 0x07;
    mock.chip_id = (3, vec![raw as u8, (raw >> 8) as u8]);
    let mut handle = open("PIC18F2550", mock);
    actions::check_chip_id(&mut handle, false).unwrap();
}

#[test]
fn chip_id_big_endian_types_match_verbatim() {
    let mut mock = MockProgrammer::new();
    mock.chip_id = (5, vec![0xEF, 0x40, 0x17]);
    let mut handle = open("W25Q64BV", mock);
    actions::check_chip_id(&mut handle, false).unwrap();
}

#[test]
fn tsop48_missing_adapter_powers_down_and_fails() {
    let mut mock = MockProgrammer::new();
    mock.tsop48_adapter = 0; // none
    let mut handle = open("MX29LV160B@TSOP48", mock);

    match actions::tsop48_check(&mut handle) {
        Err(Error::TsopAdapter(TsopAdapter::None)) => {}
        other => panic!("expected missing adapter, got {other:?}"),
    }
    let mock = handle.into_transport();
    let unlock = mock.frames_with(UNLOCK_TSOP48);
    assert_eq!(unlock.len(), 1);
    assert_eq!(unlock[0].len(), 17);
    // END follows the failed handshake so the socket is unpowered.
    assert_eq!(mock.sent.last().unwrap()[0], END);

    // A V3 adapter passes.
    let mut mock = MockProgrammer::new();
    mock.tsop48_adapter = 2;
    let mut handle = open("MX29LV160B@TSOP48", mock);
    actions::tsop48_check(&mut handle).unwrap();

    // A chip without the lockable adapter never starts the handshake.
    let mut handle = open("27C256", MockProgrammer::new());
    actions::tsop48_check(&mut handle).unwrap();
    assert!(handle.into_transport().frames_with(UNLOCK_TSOP48).is_empty());
}

#[test]
fn overcurrent_mid_write_aborts_with_end() {
    let mut mock = MockProgrammer::new();
    // Call 0 answers BEGIN's poll; the pipeline's own polls follow.
    mock.ovc_on_status_call = Some(3);
    let image = vec![0xA5u8; 32768];
    let mut handle = open("AT28C256", mock);

    let result = handle.with_transaction(|handle| {
        actions::write_page(handle, Page::Code, &image, &mut Silent)
    });
    assert!(matches!(result, Err(Error::Overcurrent)));

    let mock = handle.into_transport();
    // Chunks stop right after the tripped poll: 3 polls x 10 blocks.
    assert_eq!(mock.frames_with(WRITE_CODE).len(), 30);
    assert_eq!(mock.sent.last().unwrap()[0], END);
}

#[test]
fn action_write_runs_erase_protect_write_verify_protect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.bin");
    let image: Vec<u8> = (0..32768).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, &image).unwrap();

    let mut mock = MockProgrammer::new();
    mock.code_image = image.clone(); // verify reads back what was written
    let mut handle = open("AT28C256", mock);

    let opts = Options::default();
    actions::action_write(&mut handle, path.to_str().unwrap(), &opts, &mut Silent).unwrap();

    let mock = handle.into_transport();
    assert_eq!(mock.frames_with(ERASE).len(), 1);
    assert_eq!(mock.frames_with(ERASE)[0].len(), 15);
    assert_eq!(mock.frames_with(PROTECT_OFF).len(), 1);
    assert_eq!(mock.frames_with(PROTECT_OFF)[0].len(), 10);
    assert_eq!(mock.frames_with(WRITE_CODE).len(), 128);
    assert_eq!(mock.frames_with(READ_CODE).len(), 32);
    assert_eq!(mock.frames_with(PROTECT_ON).len(), 1);

    // protect-off precedes the writes, protect-on follows the verify.
    let order: Vec<u8> = mock.sent.iter().map(|f| f[0]).collect();
    let off = order.iter().position(|&o| o == PROTECT_OFF).unwrap();
    let first_write = order.iter().position(|&o| o == WRITE_CODE).unwrap();
    let on = order.iter().position(|&o| o == PROTECT_ON).unwrap();
    let last_read = order.iter().rposition(|&o| o == READ_CODE).unwrap();
    assert!(off < first_write);
    assert!(first_write < last_read);
    assert!(last_read < on);
}

#[test]
fn action_write_size_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.bin");
    std::fs::write(&path, vec![0x11u8; 1000]).unwrap();

    // Mismatch is fatal by default.
    let mut handle = open("AT28C256", MockProgrammer::new());
    let result = actions::action_write(
        &mut handle,
        path.to_str().unwrap(),
        &Options::default(),
        &mut Silent,
    );
    match result {
        Err(Error::SizeMismatch { expected, got }) => {
            assert_eq!(expected, 32768);
            assert_eq!(got, 1000);
        }
        other => panic!("expected size mismatch, got {other:?}"),
    }

    // -s pads the image and proceeds; only the file's bytes are verified.
    let mut mock = MockProgrammer::new();
    let mut padded = vec![0x11u8; 1000];
    padded.resize(32768, 0xFF);
    mock.code_image = padded;
    let mut handle = open("AT28C256", mock);
    let opts = Options {
        size_error: true,
        ..Options::default()
    };
    actions::action_write(&mut handle, path.to_str().unwrap(), &opts, &mut Silent).unwrap();
}

#[test]
fn action_read_unfiltered_writes_three_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.bin");

    let mut mock = MockProgrammer::new();
    mock.code_image = vec![0x42u8; 8192];
    mock.data_image = vec![0x24u8; 512];
    mock.cfg_fuses = vec![0x62, 0xD9];
    mock.lock_fuses = vec![0xFF];
    let mut handle = open("ATMEGA8", mock);
    handle.set_fuse_layout(Some(&tlprog::fuses::AVR2_FUSES));

    actions::action_read(
        &mut handle,
        path.to_str().unwrap(),
        &Options::default(),
        &mut Silent,
    )
    .unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), vec![0x42u8; 8192]);
    assert_eq!(
        std::fs::read(dir.path().join("dump.eeprom.bin")).unwrap(),
        vec![0x24u8; 512]
    );
    let conf = std::fs::read_to_string(dir.path().join("dump.fuses.conf")).unwrap();
    assert_eq!(conf, "fuses_lo = 0x62\nfuses_hi = 0xd9\nlock_byte = 0xff\n");

    // One transaction wrapped all three pages.
    let mock = handle.into_transport();
    assert_eq!(mock.frames_with(BEGIN).len(), 1);
    assert_eq!(mock.frames_with(END).len(), 1);
}

#[test]
fn action_read_filtered_reads_one_page() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eeprom.bin");

    let mut mock = MockProgrammer::new();
    mock.data_image = vec![0x5Au8; 512];
    let mut handle = open("ATMEGA8", mock);
    handle.set_fuse_layout(Some(&tlprog::fuses::AVR2_FUSES));

    let opts = Options {
        page: PageFilter::Data,
        ..Options::default()
    };
    actions::action_read(&mut handle, path.to_str().unwrap(), &opts, &mut Silent).unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), vec![0x5Au8; 512]);
    let mock = handle.into_transport();
    assert!(mock.frames_with(READ_CODE).is_empty());
    assert!(mock.frames_with(READ_CFG).is_empty());
    assert_eq!(mock.frames_with(READ_DATA).len(), 2);
}
