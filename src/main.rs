use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use daisylink::link::config::{DisconnectPolicy, LinkConfig, TitlePolicy};
use daisylink::link::rom::image::CartridgeImage;
use daisylink::link::serial::liveness;
use daisylink::link::serial::port::{SerialPort, BAUD_RATE};
use daisylink::link::serial::protocol::{FrameWriter, DEFAULT_CHUNK_SIZE};

const PROGRESS: [char; 4] = ['/', '-', '\\', '|'];

#[derive(Parser)]
#[command(
    name = "daisylink",
    version,
    about = "Load .nes images and stream gamepads to an FPGA NES"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print what the iNES header says about a ROM
    Info {
        rom: PathBuf,
        /// Reject titles that aren't ASCII instead of ignoring them
        #[arg(long)]
        strict_title: bool,
    },
    /// Send a ROM to the target
    Send {
        #[command(flatten)]
        link: LinkArgs,
        rom: PathBuf,
    },
    /// Optionally send a ROM, then stream both controllers until quit
    Run {
        #[command(flatten)]
        link: LinkArgs,
        /// Milliseconds between device scans for an empty controller slot
        #[arg(long, default_value_t = 100)]
        scan_interval_ms: u64,
        /// Keep a pad's buttons held when it is unplugged
        #[arg(long)]
        keep_buttons_on_disconnect: bool,
        rom: Option<PathBuf>,
    },
}

#[derive(Args)]
struct LinkArgs {
    /// Serial device of the target, e.g. /dev/ttyUSB1
    #[arg(short, long)]
    port: PathBuf,
    /// Line speed of the target's UART
    #[arg(long, default_value_t = BAUD_RATE)]
    baud: u32,
    /// Bytes per write while sending a ROM
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

impl LinkArgs {
    fn config(&self) -> LinkConfig {
        LinkConfig {
            port: Some(self.port.clone()),
            baud_rate: self.baud,
            chunk_size: self.chunk_size,
            ..LinkConfig::default()
        }
    }
}

fn show_ines_info(path: &Path, size: usize, policy: TitlePolicy) -> Result<(), Box<dyn Error>> {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    println!("{}", name);
    println!("Size: {}", size);
    let rom = CartridgeImage::from_file(path, policy)?;
    let header = &rom.header;
    println!("Mapper: {}", rom.mapper());
    println!("PRG: {}KB, CHR: {}KB", rom.prg_rom_kib(), rom.chr_rom_kib());
    let (flags6, flags7) = (&header.flags6, &header.flags7);
    println!("Mirroring: {:?}, four-screen: {}", flags6.mirroring, flags6.four_screen);
    println!("Battery RAM: {}, trainer: {}", flags6.battery_ram, header.has_trainer());
    println!("VS Unisystem: {}, PlayChoice-10: {}", flags7.vs_unisystem, header.has_playchoice10());
    println!("TV system: {:?}", header.flags9.tv_system);
    if let Some(title) = rom.title.as_str() {
        println!("Title: {}", title);
    }
    Ok(())
}

fn send_ines(
    port: &mut SerialPort,
    path: &Path,
    config: &LinkConfig,
) -> Result<(), Box<dyn Error>> {
    let data = fs::read(path)?;
    // only for display; the file goes out as-is either way
    match CartridgeImage::from_bytes(&data, config.title) {
        Ok(rom) => info!("{}: mapper {}, PRG {}KB, CHR {}KB",
                         path.display(), rom.mapper(), rom.prg_rom_kib(), rom.chr_rom_kib()),
        Err(e) => warn!("{}: {}", path.display(), e),
    }

    let mut writer = FrameWriter::with_chunk_size(port, config.chunk_size);
    let chunk_size = config.chunk_size.max(1);
    writer.send_ines_with_progress(&data, |sent, total| {
        let spinner = PROGRESS[(sent - 1) / chunk_size % PROGRESS.len()];
        eprint!("\r{} {}/{}", spinner, sent, total);
    })?;
    eprintln!();
    info!("Sent {} bytes over serial line.", data.len());
    Ok(())
}

#[cfg(feature = "sdl")]
fn stream_controllers(port: SerialPort, config: &LinkConfig) -> Result<(), Box<dyn Error>> {
    use daisylink::link::input::aggregator::PadHub;
    use daisylink::link::input::sdl::SdlHub;
    use std::thread;

    let mut sdl = SdlHub::new()?;
    let mut hub = PadHub::start(sdl.scanner(), config)?;
    let shutdown = hub.shutdown_flag();
    let mut writer = FrameWriter::new(port);
    let sender = thread::Builder::new().name("pad-sender".into()).spawn(move || {
        hub.run(|masks| writer.send_buttons(masks));
        hub.shutdown();
    })?;

    while !shutdown.load(Ordering::Relaxed) {
        if !sdl.pump(Duration::from_millis(50)) {
            shutdown.store(true, Ordering::Relaxed);
        }
    }
    if sender.join().is_err() {
        warn!("Controller sender panicked");
    }
    Ok(())
}

#[cfg(not(feature = "sdl"))]
fn stream_controllers(_port: SerialPort, _config: &LinkConfig) -> Result<(), Box<dyn Error>> {
    Err("daisylink was built without controller support; rebuild with `--features sdl`".into())
}

pub fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Info { rom, strict_title } => {
            let size = fs::metadata(&rom)?.len() as usize;
            let policy = if strict_title { TitlePolicy::Strict } else { TitlePolicy::Advisory };
            show_ines_info(&rom, size, policy)?;
        }
        Command::Send { link, rom } => {
            let config = link.config();
            let mut port = SerialPort::from_config(&config)?;
            send_ines(&mut port, &rom, &config)?;
        }
        Command::Run { link, scan_interval_ms, keep_buttons_on_disconnect, rom } => {
            let config = LinkConfig {
                scan_interval: Duration::from_millis(scan_interval_ms),
                disconnect: if keep_buttons_on_disconnect {
                    DisconnectPolicy::KeepLast
                } else {
                    DisconnectPolicy::ReleaseAll
                },
                ..link.config()
            };
            let mut port = SerialPort::from_config(&config)?;
            let acknowledged = Arc::new(AtomicBool::new(false));
            let stop_reader = Arc::new(AtomicBool::new(false));
            let inbound = port.try_clone()?;
            let _reader = liveness::watch(inbound, acknowledged.clone(), stop_reader.clone())?;
            if let Some(rom) = rom {
                send_ines(&mut port, &rom, &config)?;
            }
            let result = stream_controllers(port, &config);
            stop_reader.store(true, Ordering::Relaxed);
            if !acknowledged.load(Ordering::Relaxed) {
                warn!("Target never confirmed an image");
            }
            result?;
        }
    }
    Ok(())
}
