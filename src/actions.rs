//! High-level read/write/verify flows.
//!
//! Everything here drives the protocol engine through whole-page pipelines:
//! pages are chunked into descriptor-sized blocks, overcurrent is polled
//! every ten blocks, and any fatal error ends the open transaction before
//! it surfaces so the ZIF socket is left unpowered.

use crate::config::FuseConfig;
use crate::database::{chip_ids, Chip};
use crate::error::{Error, Result};
use crate::fuses::{self, FuseLayout, FUSE_BUFFER_SIZE};
use crate::protocol::{Handle, Page, TsopAdapter};
use crate::usb::Transport;
use std::fs;
use std::io::Write as _;

/// Page selection from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageFilter {
    #[default]
    Unspecified,
    Code,
    Data,
    Config,
}

/// Behavior switches collected from the command line.
#[derive(Debug, Default)]
pub struct Options {
    pub page: PageFilter,
    pub no_erase: bool,
    pub no_protect_off: bool,
    pub no_protect_on: bool,
    pub no_verify: bool,
    /// Downgrade a file-size mismatch to a warning.
    pub size_error: bool,
    /// Suppress even the warning (implies `size_error`).
    pub size_nowarn: bool,
}

/// Progress sink for long operations; the engine stays headless in tests.
pub trait Progress {
    fn begin(&mut self, label: &str);
    fn update(&mut self, percent: usize);
    fn finish_ok(&mut self);
}

/// Terminal reporter: carriage-return percent updates on stderr.
#[derive(Default)]
pub struct TermProgress {
    label: String,
}

impl Progress for TermProgress {
    fn begin(&mut self, label: &str) {
        self.label = label.to_string();
        eprint!("{label}");
        let _ = std::io::stderr().flush();
    }

    fn update(&mut self, percent: usize) {
        eprint!("\r\x1b[K{}{percent:2}%", self.label);
        let _ = std::io::stderr().flush();
    }

    fn finish_ok(&mut self) {
        eprintln!("\r\x1b[K{}OK", self.label);
    }
}

/// No-op sink for headless use.
pub struct Silent;

impl Progress for Silent {
    fn begin(&mut self, _label: &str) {}
    fn update(&mut self, _percent: usize) {}
    fn finish_ok(&mut self) {}
}

/// Read a whole memory page in descriptor-sized chunks.
pub fn read_page<T: Transport>(
    handle: &mut Handle<T>,
    page: Page,
    size: usize,
    progress: &mut dyn Progress,
) -> Result<Vec<u8>> {
    let device = handle.device()?;
    let buffer_size = device.read_buffer_size;
    let blocks = size.div_ceil(buffer_size);
    let mut data = vec![0u8; size];

    for i in 0..blocks {
        progress.update(i * 100 / blocks);
        let offset = i * buffer_size;
        let len = buffer_size.min(size - offset);
        let addr = wire_address(device, offset);
        handle.read_block(page, addr, &mut data[offset..offset + len])?;
        if (i + 1) % 10 == 0 && handle.get_status()?.overcurrent {
            return Err(Error::Overcurrent);
        }
    }
    progress.update(100);
    Ok(data)
}

/// Write a whole memory page in descriptor-sized chunks.
pub fn write_page<T: Transport>(
    handle: &mut Handle<T>,
    page: Page,
    data: &[u8],
    progress: &mut dyn Progress,
) -> Result<()> {
    let device = handle.device()?;
    let buffer_size = device.write_buffer_size;
    let blocks = data.len().div_ceil(buffer_size);

    for i in 0..blocks {
        progress.update(i * 100 / blocks);
        let offset = i * buffer_size;
        let len = buffer_size.min(data.len() - offset);
        let addr = wire_address(device, offset);
        handle.write_block(page, addr, &data[offset..offset + len])?;
        if (i + 1) % 10 == 0 && handle.get_status()?.overcurrent {
            return Err(Error::Overcurrent);
        }
    }
    progress.update(100);
    Ok(())
}

fn wire_address(device: &Chip, offset: usize) -> u32 {
    let mut addr = offset as u32;
    if device.word_addressed() {
        addr >>= 1;
    }
    addr
}

/// First differing index with both bytes, or `None` when equal.
pub fn compare_memory(file: &[u8], chip: &[u8]) -> Option<(usize, u8, u8)> {
    file.iter()
        .zip(chip)
        .position(|(a, b)| a != b)
        .map(|i| (i, file[i], chip[i]))
}

/// Read every fuse group into a named configuration.
pub fn read_fuse_values<T: Transport>(
    handle: &mut Handle<T>,
    layout: &'static FuseLayout,
) -> Result<FuseConfig> {
    let mut config = FuseConfig::new();
    for group in layout.groups() {
        let length = fuses::group_length(group);
        let buf = handle.read_fuses(group[0].cmd, length, group.len() as u8)?;
        for (name, value) in fuses::unpack_group(group, &buf) {
            config.set(name, value);
        }
    }
    Ok(config)
}

/// Write every fuse group from a named configuration.
pub fn write_fuse_values<T: Transport>(
    handle: &mut Handle<T>,
    layout: &'static FuseLayout,
    config: &FuseConfig,
) -> Result<()> {
    for group in layout.groups() {
        let length = fuses::group_length(group);
        let mut buf = [0u8; FUSE_BUFFER_SIZE];
        fuses::pack_group(group, &mut buf, |name| config.get(name))?;
        handle.write_fuses(group[0].cmd, group.len() as u8, &buf[..length])?;
    }
    Ok(())
}

/// The id the database expects. Microchip parts keep theirs in a separate
/// table indexed by `opts3 - 1`.
pub fn expected_chip_id(device: &Chip) -> u32 {
    if device.chip_id == 0 && device.chip_id_bytes_count > 0 {
        if let Some(entry) = chip_ids::for_opts3(device.opts3) {
            return entry.chip_id;
        }
    }
    device.chip_id
}

fn shift_for(device: &Chip) -> u8 {
    chip_ids::for_opts3(device.opts3).map(|e| e.shift).unwrap_or(0)
}

/// Chip-id gate, run before any read or write.
///
/// Types 1, 2 and 5 match the id verbatim; type 3 discards a 5-bit silicon
/// revision; type 4 discards a revision of table-defined width.
pub fn check_chip_id<T: Transport>(handle: &mut Handle<T>, continue_on_mismatch: bool) -> Result<()> {
    let device = handle.device()?;
    if device.chip_id_bytes_count == 0 {
        return Ok(());
    }
    let expected = expected_chip_id(device);

    let (id_type, chip_id) = handle.with_transaction(|handle| {
        if handle.get_status()?.overcurrent {
            return Err(Error::Overcurrent);
        }
        handle.get_chip_id()
    })?;

    let (got, revision) = match id_type {
        3 => (chip_id >> 5, Some(chip_id & 0x1F)),
        4 => {
            let shift = shift_for(device);
            (chip_id >> shift, Some(chip_id & ((1u32 << shift) - 1)))
        }
        _ => (chip_id, None),
    };

    if got == expected {
        match revision {
            Some(rev) => println!("Chip ID OK: {got:#06X} Rev.{rev:#04X}"),
            None => println!("Chip ID OK: {got:#04X}"),
        }
        Ok(())
    } else if continue_on_mismatch {
        println!("WARNING: Chip ID mismatch: expected {expected:#06X}, got {got:#06X}");
        Ok(())
    } else {
        Err(Error::ChipIdMismatch { expected, got })
    }
}

/// Read and print the chip id without touching the database expectation.
pub fn show_chip_id<T: Transport>(handle: &mut Handle<T>) -> Result<()> {
    let device = handle.device()?;
    let (id_type, chip_id) = handle.with_transaction(|handle| {
        let id = handle.get_chip_id()?;
        if handle.get_status()?.overcurrent {
            return Err(Error::Overcurrent);
        }
        Ok(id)
    })?;

    match id_type {
        3 => println!("Chip ID: {:#06X} Rev.{:#04X}", chip_id >> 5, chip_id & 0x1F),
        4 => {
            let shift = shift_for(device);
            println!(
                "Chip ID: {:#06X} Rev.{:#04X}",
                chip_id >> shift,
                chip_id & ((1u32 << shift) - 1)
            );
        }
        _ => println!("Chip ID: {chip_id:#04X}"),
    }
    Ok(())
}

/// Unlock the TSOP48 adapter when the descriptor calls for one. A missing
/// adapter powers the socket down before failing.
pub fn tsop48_check<T: Transport>(handle: &mut Handle<T>) -> Result<()> {
    if !handle.device()?.needs_tsop48_unlock() {
        return Ok(());
    }
    let adapter = handle.unlock_tsop48()?;
    match adapter {
        TsopAdapter::V0 => println!("Found TSOP adapter V0"),
        TsopAdapter::V3 => println!("Found TSOP adapter V3"),
        TsopAdapter::Fake1 | TsopAdapter::Fake2 => println!("Fake TSOP adapter found!"),
        TsopAdapter::None => {
            let _ = handle.end_transaction();
            return Err(Error::TsopAdapter(adapter));
        }
    }
    Ok(())
}

/// `replace_extension("image.foo", ".bar")` -> `"image.bar"`.
fn replace_extension(filename: &str, extension: &str) -> String {
    match filename.rfind('.') {
        Some(dot) => format!("{}{extension}", &filename[..dot]),
        None => format!("{filename}{extension}"),
    }
}

/// Read the selected pages into files.
pub fn action_read<T: Transport>(
    handle: &mut Handle<T>,
    filename: &str,
    opts: &Options,
    progress: &mut dyn Progress,
) -> Result<()> {
    let device = handle.device()?;
    let layout = handle.fuse_layout();

    let want_code = matches!(opts.page, PageFilter::Unspecified | PageFilter::Code);
    let want_data = matches!(opts.page, PageFilter::Unspecified | PageFilter::Data);
    let want_config = matches!(opts.page, PageFilter::Unspecified | PageFilter::Config);

    // Unfiltered reads spread over three files; a filtered read owns the name.
    let (data_filename, config_filename) = if opts.page == PageFilter::Unspecified {
        (
            replace_extension(filename, ".eeprom.bin"),
            replace_extension(filename, ".fuses.conf"),
        )
    } else {
        (filename.to_string(), filename.to_string())
    };

    handle.with_transaction(|handle| {
        if want_code {
            progress.begin("Reading Code... ");
            let buf = read_page(handle, Page::Code, device.code_memory_size, progress)?;
            fs::write(filename, buf)?;
            progress.finish_ok();
        }
        if want_data && device.data_memory_size > 0 {
            progress.begin("Reading Data... ");
            let buf = read_page(handle, Page::Data, device.data_memory_size, progress)?;
            fs::write(&data_filename, buf)?;
            progress.finish_ok();
        }
        if want_config {
            if let Some(layout) = layout {
                progress.begin("Reading fuses... ");
                let config = read_fuse_values(handle, layout)?;
                config.save(config_filename.as_ref())?;
                progress.finish_ok();
            }
        }
        Ok(())
    })
}

/// Erase, write, verify and re-protect from a file.
pub fn action_write<T: Transport>(
    handle: &mut Handle<T>,
    filename: &str,
    opts: &Options,
    progress: &mut dyn Progress,
) -> Result<()> {
    let device = handle.device()?;

    let (page, page_name, expected) = match opts.page {
        PageFilter::Unspecified | PageFilter::Code => {
            (Some(Page::Code), "Code", device.code_memory_size)
        }
        PageFilter::Data => (Some(Page::Data), "Data", device.data_memory_size),
        PageFilter::Config => (None, "fuses", 0),
    };

    let mut image = Vec::new();
    let mut file_len = 0;
    if page.is_some() {
        image = fs::read(filename)?;
        file_len = image.len();
        if file_len != expected {
            if !opts.size_error {
                return Err(Error::SizeMismatch {
                    expected,
                    got: file_len,
                });
            } else if !opts.size_nowarn {
                println!("Warning: Incorrect file size: {file_len} (needed {expected})");
            }
        }
        // Blank-fill a short image; the firmware always gets full pages.
        image.resize(expected, 0xFF);
    }

    if !opts.no_erase {
        progress.begin("Erasing... ");
        handle.with_transaction(|handle| {
            handle.erase()?;
            if handle.get_status()?.overcurrent {
                return Err(Error::Overcurrent);
            }
            Ok(())
        })?;
        progress.finish_ok();
    }

    handle.with_transaction(|handle| {
        if handle.get_status()?.overcurrent {
            return Err(Error::Overcurrent);
        }
        if !opts.no_protect_off && device.protection_supported() {
            handle.protect_off()?;
        }

        match page {
            Some(page) => {
                progress.begin(&format!("Writing {page_name}... "));
                write_page(handle, page, &image, progress)?;
                progress.finish_ok();

                if !opts.no_verify {
                    // With a tolerated size mismatch only the file's bytes
                    // are compared.
                    let verify_len = if opts.size_error {
                        file_len.min(expected)
                    } else {
                        expected
                    };
                    progress.begin(&format!("Reading {page_name}... "));
                    let chip = read_page(handle, page, verify_len, progress)?;
                    progress.finish_ok();
                    if let Some((addr, file_byte, chip_byte)) =
                        compare_memory(&image[..verify_len], &chip)
                    {
                        return Err(Error::VerifyMismatch {
                            addr,
                            file_byte,
                            chip_byte,
                        });
                    }
                    println!("Verification OK");
                }
            }
            None => {
                let layout = handle.fuse_layout().ok_or(Error::UnknownMemoryType)?;
                progress.begin("Writing fuses... ");
                let config = FuseConfig::load(filename.as_ref())?;
                write_fuse_values(handle, layout, &config)?;
                progress.finish_ok();
            }
        }
        Ok(())
    })?;

    if !opts.no_protect_on && device.protection_supported() {
        handle.with_transaction(|handle| handle.protect_on())?;
    }
    Ok(())
}
