//! tlprog - command-line front end for the TL866A/CS programmers.

use clap::{Parser, ValueEnum};
use std::io::{IsTerminal, Write};
use std::process::{ExitCode, Stdio};

use tlprog::actions::{self, Options, PageFilter, TermProgress};
use tlprog::database::{self, Chip, MemoryUnit};
use tlprog::error::{Error, Result};
use tlprog::firmware::{self, UpdateFile};
use tlprog::fuses;
use tlprog::protocol::{Handle, Model, ICSP_ENABLE, ICSP_VCC};
use tlprog::usb::UsbTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PageArg {
    Code,
    Data,
    Config,
}

#[derive(Parser, Debug)]
#[command(name = "tlprog")]
#[command(version)]
#[command(about = "A free and open TL866A/CS programmer")]
struct Args {
    /// List all supported devices
    #[arg(short = 'l')]
    list: bool,

    /// List devices beginning like this
    #[arg(short = 'L', value_name = "PREFIX")]
    list_prefix: Option<String>,

    /// Show device information
    #[arg(short = 'd', value_name = "DEVICE")]
    describe: Option<String>,

    /// Just read the chip ID
    #[arg(short = 'D')]
    idcheck_only: bool,

    /// Read memory into a file
    #[arg(short = 'r', value_name = "FILE")]
    read: Option<String>,

    /// Write memory from a file
    #[arg(short = 'w', value_name = "FILE")]
    write: Option<String>,

    /// Specify device (use quotes)
    #[arg(short = 'p', value_name = "DEVICE")]
    device: Option<String>,

    /// Specify memory type
    #[arg(short = 'c', value_name = "TYPE", value_enum)]
    page: Option<PageArg>,

    /// Do NOT erase device
    #[arg(short = 'e')]
    no_erase: bool,

    /// Do NOT disable write-protect
    #[arg(short = 'u')]
    no_protect_off: bool,

    /// Do NOT enable write-protect
    #[arg(short = 'P')]
    no_protect_on: bool,

    /// Do NOT verify after write
    #[arg(short = 'v')]
    no_verify: bool,

    /// Use ICSP
    #[arg(short = 'i')]
    icsp: bool,

    /// Use ICSP without enabling Vcc
    #[arg(short = 'I')]
    icsp_no_vcc: bool,

    /// Do NOT error on file size mismatch (only a warning)
    #[arg(short = 's')]
    size_error: bool,

    /// No warning message for file size mismatch (implies -s)
    #[arg(short = 'S')]
    size_nowarn: bool,

    /// Do NOT attempt to read ID (only valid in read mode)
    #[arg(short = 'x')]
    idcheck_skip: bool,

    /// Do NOT error on ID mismatch
    #[arg(short = 'y')]
    idcheck_continue: bool,

    /// Reflash the programmer firmware from an update.dat
    #[arg(short = 'F', value_name = "FILE")]
    firmware: Option<String>,

    /// Run the hardware self-test (empty ZIF socket!)
    #[arg(short = 't')]
    selftest: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(args: Args) -> Result<()> {
    if args.list {
        return print_devices(None);
    }
    if let Some(prefix) = args.list_prefix.as_deref() {
        return print_devices(Some(prefix));
    }
    if let Some(name) = &args.describe {
        let chip = lookup(name)?;
        print_device_info(chip);
        return Ok(());
    }

    let has_action = args.read.is_some()
        || args.write.is_some()
        || args.idcheck_only
        || args.firmware.is_some()
        || args.selftest;
    if !has_action {
        return Err(Error::BadArguments(
            "nothing to do (try -r, -w, -D, -F, -t or -h)".to_string(),
        ));
    }
    if args.read.is_some() && args.write.is_some() {
        return Err(Error::BadArguments("-r and -w are exclusive".to_string()));
    }
    // Skipping the id test makes no sense when writing or when the id is
    // the whole point.
    if args.idcheck_skip && (args.write.is_some() || args.idcheck_only) {
        return Err(Error::BadArguments(
            "-x is only valid in read mode".to_string(),
        ));
    }

    let device = match &args.device {
        Some(name) if name.eq_ignore_ascii_case("help") => return print_devices(None),
        Some(name) => Some(lookup(name)?),
        None => None,
    };
    let needs_device = args.read.is_some() || args.write.is_some() || args.idcheck_only;
    if needs_device && device.is_none() {
        return Err(Error::BadArguments("device required (-p)".to_string()));
    }

    let mut handle = Handle::open_usb(device)?;
    handle.icsp = if args.icsp {
        ICSP_ENABLE | ICSP_VCC
    } else if args.icsp_no_vcc {
        ICSP_ENABLE
    } else {
        0
    };

    eprintln!(
        "Found {} 0{}.2.{}",
        handle.model,
        handle.firmware >> 8,
        handle.firmware & 0xFF
    );

    if args.selftest {
        eprintln!("Testing pin drivers, keep the ZIF socket empty!");
        handle.hardware_check()?;
        return Ok(());
    }

    if let Some(path) = &args.firmware {
        return firmware_update(handle, path);
    }

    if device.is_some() {
        actions::tsop48_check(&mut handle)?;
    }

    if args.idcheck_only {
        return actions::show_chip_id(&mut handle);
    }

    let chip = handle.device()?;
    if args.idcheck_skip {
        println!("WARNING: skipping Chip ID test");
    } else {
        actions::check_chip_id(&mut handle, args.idcheck_continue)?;
    }

    // Fuse layout, resolved once after the id gate.
    let layout = fuses::layout_for(chip.protocol_id, chip.variant)?;
    handle.set_fuse_layout(layout);

    let opts = Options {
        page: match args.page {
            None => PageFilter::Unspecified,
            Some(PageArg::Code) => PageFilter::Code,
            Some(PageArg::Data) => PageFilter::Data,
            Some(PageArg::Config) => PageFilter::Config,
        },
        no_erase: args.no_erase,
        no_protect_off: args.no_protect_off,
        no_protect_on: args.no_protect_on,
        no_verify: args.no_verify,
        size_error: args.size_error || args.size_nowarn,
        size_nowarn: args.size_nowarn,
    };
    let mut progress = TermProgress::default();

    if let Some(filename) = &args.read {
        actions::action_read(&mut handle, filename, &opts, &mut progress)?;
    } else if let Some(filename) = &args.write {
        actions::action_write(&mut handle, filename, &opts, &mut progress)?;
    }
    Ok(())
}

fn lookup(name: &str) -> Result<&'static Chip> {
    database::get_by_name(name).ok_or_else(|| Error::UnknownDevice(name.to_string()))
}

/// Print device names, through $PAGER when stdout is a terminal.
fn print_devices(prefix: Option<&str>) -> Result<()> {
    let names: Vec<&str> = match prefix {
        Some(prefix) => database::list_prefix(prefix).map(|c| c.name).collect(),
        None => database::all().map(|c| c.name).collect(),
    };

    if std::io::stdout().is_terminal() {
        let pager = std::env::var("PAGER").unwrap_or_else(|_| "less".to_string());
        if let Ok(mut child) = std::process::Command::new(&pager)
            .stdin(Stdio::piped())
            .spawn()
        {
            if let Some(stdin) = child.stdin.as_mut() {
                for name in &names {
                    let _ = writeln!(stdin, "{name}");
                }
            }
            let _ = child.wait();
            return Ok(());
        }
        // No pager available; fall through to plain output.
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

fn print_device_info(chip: &Chip) {
    println!("Name: {}", chip.name);

    let unit = match chip.memory_unit() {
        Some(MemoryUnit::Bytes) => "Bytes",
        Some(MemoryUnit::Words) => "Words",
        Some(MemoryUnit::Bits) => "Bits",
        None => "?",
    };
    print!("Memory: {} {unit}", chip.code_memory_size / chip.word_size());
    if chip.data_memory_size > 0 {
        print!(" + {} Bytes", chip.data_memory_size);
    }
    if chip.data_memory2_size > 0 {
        print!(" + {} Bytes", chip.data_memory2_size);
    }
    println!();

    if chip.adapter_image_id() != 0 {
        println!("Package: Adapter{:03}.JPG", chip.adapter_image_id());
    } else if chip.dip_pin_count() != 0 {
        println!("Package: DIP{}", chip.dip_pin_count());
    } else {
        println!("Package: ISP only");
    }
    if chip.icsp_image_id() != 0 {
        println!("ISP: ICP{:03}.JPG", chip.icsp_image_id());
    } else {
        println!("ISP: -");
    }

    println!("Protocol: {:#04x}", chip.protocol_id);
    println!("Read buffer size: {} Bytes", chip.read_buffer_size);
    println!("Write buffer size: {} Bytes", chip.write_buffer_size);
}

/// Interactive firmware update: report versions, let the user pick the
/// variant, then hand off to the updater.
fn firmware_update(handle: Handle<UsbTransport>, path: &str) -> Result<()> {
    let update = UpdateFile::load(path.as_ref())?;

    let age = match (handle.firmware & 0xFF) as u8 {
        minor if minor > update.minor => " (older)",
        minor if minor < update.minor => " (newer)",
        _ => "",
    };
    eprintln!("{path} contains firmware version 3.2.{}{age}", update.minor);

    let other = match handle.model {
        Model::Tl866a => Model::Tl866cs,
        Model::Tl866cs => Model::Tl866a,
    };
    println!("\nWhich firmware version do you want to reflash?");
    println!("1) Device default ({})", handle.model);
    println!("2) {other}");
    println!("3) Exit");

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let chosen = match line.trim() {
        "1" => handle.model,
        "2" => other,
        _ => return Err(Error::BadArguments("firmware update aborted".to_string())),
    };

    firmware::update_firmware(handle, &update, chosen)
}
