//! Machine configuration: ROM images, drives and host bridges.
//!
//! The config file is JSON. Every field has a default, so `{}` is a valid
//! config (it still needs an OS ROM from the command line).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use emu_rfb::RfbConfig;
use intel_8271::FdcConfig;
use mos_6502::IllegalOpcodePolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of one ROM bank (OS or sideways).
pub const ROM_SIZE: usize = 0x4000;

/// Number of sideways ROM slots selectable through ROMSEL.
pub const SIDEWAYS_SLOTS: u8 = 16;

/// The tick loop hands frames over through a single slot plus one spare.
pub const FRAME_QUEUE_DEPTH: usize = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: {actual} bytes, a ROM bank holds at most {ROM_SIZE}", path.display())]
    RomSize { path: PathBuf, actual: usize },
    #[error("{}: empty ROM image", path.display())]
    EmptyRom { path: PathBuf },
    #[error("sideways ROM slot {0} is outside 0-15")]
    BadSlot(u8),
    #[error("frame_queue_depth is fixed at {FRAME_QUEUE_DEPTH}, got {0}")]
    FrameQueueDepth(usize),
    #[error("no OS ROM configured")]
    MissingOsRom,
}

/// A ROM image to place in a sideways slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidewaysRom {
    pub slot: u8,
    pub path: PathBuf,
}

/// Everything needed to build and host a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BbcConfig {
    pub os_rom: Option<PathBuf>,
    pub sideways_roms: Vec<SidewaysRom>,
    /// Disk images for drives 0 and 1.
    pub drives: [Option<PathBuf>; 2],
    pub write_protect: [bool; 2],
    pub illegal_opcodes: IllegalOpcodePolicy,
    pub fdc: FdcConfig,
    pub event_queue_capacity: usize,
    pub frame_queue_depth: usize,
    pub shm_path: Option<PathBuf>,
    pub rfb: RfbConfig,
    /// Startup option links read through keyboard row 0 (bit 0 = column 9).
    pub keyboard_links: u8,
}

impl Default for BbcConfig {
    fn default() -> Self {
        Self {
            os_rom: None,
            sideways_roms: Vec::new(),
            drives: [None, None],
            write_protect: [false, false],
            illegal_opcodes: IllegalOpcodePolicy::Emulate,
            fdc: FdcConfig::default(),
            event_queue_capacity: 256,
            frame_queue_depth: FRAME_QUEUE_DEPTH,
            shm_path: None,
            rfb: RfbConfig::default(),
            keyboard_links: 0,
        }
    }
}

impl BbcConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_queue_depth != FRAME_QUEUE_DEPTH {
            return Err(ConfigError::FrameQueueDepth(self.frame_queue_depth));
        }
        if let Some(rom) = self.sideways_roms.iter().find(|r| r.slot >= SIDEWAYS_SLOTS) {
            return Err(ConfigError::BadSlot(rom.slot));
        }
        Ok(())
    }
}

/// ROM images ready to map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roms {
    pub os: Vec<u8>,
    /// `(slot, image)` pairs; a later entry for the same slot wins.
    pub sideways: Vec<(u8, Vec<u8>)>,
}

impl Roms {
    #[must_use]
    pub fn new(os: Vec<u8>) -> Self {
        Self {
            os,
            sideways: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sideways(mut self, slot: u8, image: Vec<u8>) -> Self {
        self.sideways.push((slot, image));
        self
    }

    /// Load the OS ROM and every sideways ROM the config names.
    pub fn load(config: &BbcConfig) -> Result<Self, ConfigError> {
        let os_path = config.os_rom.as_deref().ok_or(ConfigError::MissingOsRom)?;
        let mut roms = Self::new(read_rom(os_path)?);
        for rom in &config.sideways_roms {
            if rom.slot >= SIDEWAYS_SLOTS {
                return Err(ConfigError::BadSlot(rom.slot));
            }
            roms.sideways.push((rom.slot, read_rom(&rom.path)?));
        }
        Ok(roms)
    }
}

fn read_rom(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let data = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if data.is_empty() {
        return Err(ConfigError::EmptyRom {
            path: path.to_path_buf(),
        });
    }
    if data.len() > ROM_SIZE {
        return Err(ConfigError::RomSize {
            path: path.to_path_buf(),
            actual: data.len(),
        });
    }
    Ok(data)
}

/// Fill a 16 KiB bank from a smaller image by mirroring it.
#[must_use]
pub fn rom_bank(image: &[u8]) -> Box<[u8; ROM_SIZE]> {
    let mut bank = Box::new([0xFF; ROM_SIZE]);
    if !image.is_empty() {
        for (i, byte) in bank.iter_mut().enumerate() {
            *byte = image[i % image.len()];
        }
    }
    bank
}
