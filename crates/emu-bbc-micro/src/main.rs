//! BBC Micro emulator binary.
//!
//! Runs the machine on its own thread, paced at 50 frames per second,
//! with frames served over RFB and optionally mirrored into a shared
//! memory file. Headless runs of a fixed number of frames go as fast as
//! the host allows and can finish with a screenshot.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use emu_bbc_micro::shm::ShmBridge;
use emu_bbc_micro::{Bbc, BbcConfig, Roms, SidewaysRom, capture};
use format_ssd::DiskImage;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Frame duration at 50 Hz.
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Sideways slot the BASIC ROM goes in.
const BASIC_SLOT: u8 = 15;

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CliArgs {
    config_path: Option<PathBuf>,
    os_rom: Option<PathBuf>,
    basic_rom: Option<PathBuf>,
    discs: [Option<PathBuf>; 2],
    frames: Option<u64>,
    headless: bool,
    screenshot_path: Option<PathBuf>,
    rfb_bind: Option<String>,
    shm_path: Option<PathBuf>,
    run: Option<String>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                cli.config_path = args.get(i).map(PathBuf::from);
            }
            "--os-rom" => {
                i += 1;
                cli.os_rom = args.get(i).map(PathBuf::from);
            }
            "--basic-rom" => {
                i += 1;
                cli.basic_rom = args.get(i).map(PathBuf::from);
            }
            "--disc0" => {
                i += 1;
                cli.discs[0] = args.get(i).map(PathBuf::from);
            }
            "--disc1" => {
                i += 1;
                cli.discs[1] = args.get(i).map(PathBuf::from);
            }
            "--frames" => {
                i += 1;
                cli.frames = args.get(i).and_then(|s| s.parse().ok());
            }
            "--headless" => {
                cli.headless = true;
            }
            "--screenshot" => {
                i += 1;
                cli.screenshot_path = args.get(i).map(PathBuf::from);
            }
            "--rfb" => {
                i += 1;
                cli.rfb_bind = args.get(i).cloned();
            }
            "--shm" => {
                i += 1;
                cli.shm_path = args.get(i).map(PathBuf::from);
            }
            "--run" => {
                i += 1;
                cli.run = args.get(i).cloned();
            }
            "--help" | "-h" => {
                eprintln!("Usage: emu-bbc-micro [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --config <file>      JSON configuration file");
                eprintln!("  --os-rom <file>      OS ROM image (16K)");
                eprintln!("  --basic-rom <file>   BASIC ROM image, loaded into slot 15");
                eprintln!("  --disc0 <file>       Disk image for drive 0 (.ssd or .fdi)");
                eprintln!("  --disc1 <file>       Disk image for drive 1");
                eprintln!("  --frames <n>         Stop after n frames");
                eprintln!("  --headless           No RFB server; unpaced with --frames");
                eprintln!("  --screenshot <file>  Save a PNG of the last frame on exit");
                eprintln!("  --rfb <addr>         RFB listen address [default: 127.0.0.1:5900]");
                eprintln!("  --shm <file>         Mirror frames into a shared memory file");
                eprintln!("  --run <file>@<addr>  Load a binary at hex <addr> and jump to it");
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

/// Config file values, overridden by the command line.
fn build_config(cli: &CliArgs) -> Result<BbcConfig> {
    let mut config = match &cli.config_path {
        Some(path) => BbcConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BbcConfig::default(),
    };

    if let Some(path) = &cli.os_rom {
        config.os_rom = Some(path.clone());
    }
    if let Some(path) = &cli.basic_rom {
        config.sideways_roms.retain(|rom| rom.slot != BASIC_SLOT);
        config.sideways_roms.push(SidewaysRom {
            slot: BASIC_SLOT,
            path: path.clone(),
        });
    }
    for (drive, disc) in cli.discs.iter().enumerate() {
        if let Some(path) = disc {
            config.drives[drive] = Some(path.clone());
        }
    }
    if let Some(bind) = &cli.rfb_bind {
        config.rfb.bind = bind
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid RFB address {bind}"))?;
    }
    if let Some(path) = &cli.shm_path {
        config.shm_path = Some(path.clone());
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Disks
// ---------------------------------------------------------------------------

struct MountedDisk {
    path: PathBuf,
    image: Arc<Mutex<DiskImage>>,
}

fn insert_disks(bbc: &mut Bbc, config: &BbcConfig) -> Result<Vec<MountedDisk>> {
    let mut mounted = Vec::new();
    for (drive, path) in config.drives.iter().enumerate() {
        let Some(path) = path else { continue };
        let mut image = DiskImage::load(path)
            .with_context(|| format!("loading disk image {}", path.display()))?;
        image.write_protected = config.write_protect[drive];
        let image = Arc::new(Mutex::new(image));
        bbc.insert_disk(drive, Arc::clone(&image));
        mounted.push(MountedDisk {
            path: path.clone(),
            image,
        });
    }
    Ok(mounted)
}

fn flush_disks(disks: &[MountedDisk]) -> Result<()> {
    for disk in disks {
        let mut image = disk
            .image
            .lock()
            .map_err(|_| anyhow!("disk image lock poisoned"))?;
        if image.is_dirty() {
            image
                .save(&disk.path)
                .with_context(|| format!("saving disk image {}", disk.path.display()))?;
            info!(path = %disk.path.display(), "disk flushed");
        }
    }
    Ok(())
}

/// Load `file@addr` (hex address, optional `$` or `0x`) and jump to it.
fn run_program(bbc: &mut Bbc, spec: &str) -> Result<()> {
    let (file, address) = spec
        .rsplit_once('@')
        .ok_or_else(|| anyhow!("--run expects <file>@<addr>, got {spec}"))?;
    let digits = address.trim_start_matches('$').trim_start_matches("0x");
    let address = u16::from_str_radix(digits, 16)
        .with_context(|| format!("invalid load address {address}"))?;
    let data = std::fs::read(file).with_context(|| format!("reading program {file}"))?;
    if usize::from(address) + data.len() > 0x1_0000 {
        return Err(anyhow!("program {file} does not fit at {address:04X}"));
    }
    bbc.load_and_run(address, &data);
    Ok(())
}

// ---------------------------------------------------------------------------
// Machine thread
// ---------------------------------------------------------------------------

fn run_machine(mut bbc: Bbc, frames: Option<u64>, paced: bool, stop: &AtomicBool) -> Bbc {
    let mut next_frame = Instant::now();
    let mut count = 0;
    while !stop.load(Ordering::Relaxed) {
        if frames.is_some_and(|limit| count >= limit) {
            break;
        }
        bbc.run_frame();
        count += 1;

        if paced {
            next_frame += FRAME_DURATION;
            let now = Instant::now();
            if next_frame > now {
                thread::sleep(next_frame - now);
            } else {
                // Fell behind; don't try to catch up.
                next_frame = now;
            }
        }
    }
    info!(frames = count, "machine stopped");
    bbc
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = parse_args();
    let config = build_config(&cli)?;
    let roms = Roms::load(&config).context("loading ROMs")?;

    let mut bbc = Bbc::new(&config, &roms);
    let disks = insert_disks(&mut bbc, &config)?;
    if let Some(spec) = &cli.run {
        run_program(&mut bbc, spec)?;
    }

    let shm = config
        .shm_path
        .as_ref()
        .and_then(|path| match ShmBridge::start(path, bbc.frame_slot()) {
            Ok(bridge) => Some(bridge),
            Err(e) => {
                warn!(path = %path.display(), "shared memory unavailable, running without it: {e}");
                None
            }
        });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    let server = if cli.headless {
        None
    } else {
        let handle = runtime
            .block_on(emu_rfb::start_server(
                config.rfb.clone(),
                bbc.frame_slot(),
                bbc.event_sender(),
            ))
            .with_context(|| format!("binding RFB listener on {}", config.rfb.bind))?;
        Some(handle)
    };

    let stop = Arc::new(AtomicBool::new(false));
    let paced = !(cli.headless && cli.frames.is_some());
    let machine = {
        let stop = Arc::clone(&stop);
        let frames = cli.frames;
        thread::Builder::new()
            .name("machine".into())
            .spawn(move || run_machine(bbc, frames, paced, &stop))
            .context("spawning machine thread")?
    };

    if cli.frames.is_none() {
        runtime.block_on(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("cannot wait for Ctrl-C: {e}");
            }
        });
        info!("interrupted");
        stop.store(true, Ordering::Relaxed);
    }

    let bbc = machine
        .join()
        .map_err(|_| anyhow!("machine thread panicked"))?;

    if let Some(server) = server {
        runtime.block_on(server.shutdown());
    }
    if let Some(bridge) = shm {
        bridge.stop();
    }

    if let Some(path) = &cli.screenshot_path {
        capture::save_screenshot(&bbc, path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("saving screenshot {}", path.display()))?;
        info!(path = %path.display(), "screenshot saved");
    }

    flush_disks(&disks)
}
