//! Acorn DFS disk images.
//!
//! A single-sided 5.25" DFS disk holds 40 or 80 tracks of 10 sectors, each
//! 256 bytes. Two file formats are understood:
//!
//! - **SSD**: a raw sector dump, track 0 sector 0 first. Carries no CRCs, so
//!   they are computed on load and dropped on save.
//! - **FDI**: a small native format that stores each sector's CRC as it was
//!   last written, so deliberately bad CRCs survive a save/load cycle.
//!
//! The store only enforces geometry and payload size. Command semantics
//! belong to the controller.

use std::fs;
use std::path::Path;

use thiserror::Error;

pub const SECTOR_SIZE: usize = 256;
pub const SECTORS_PER_TRACK: u8 = 10;
pub const TRACKS_40: u8 = 40;
pub const TRACKS_80: u8 = 80;

/// Data address mark preceding every sector payload on the surface.
pub const DATA_MARK: u8 = 0xFB;

/// Magic at the start of an FDI image.
pub const FDI_MAGIC: [u8; 8] = *b"BBCFDI\0\x01";
const FDI_HEADER_LEN: usize = 12;

const TRACK_BYTES: usize = SECTORS_PER_TRACK as usize * SECTOR_SIZE;

pub type Result<T> = std::result::Result<T, DiskError>;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("sector not found: track {track} sector {sector}")]
    NotFound { track: u8, sector: u8 },

    #[error("payload is {actual} bytes, sector holds {expected}")]
    PayloadSize { expected: usize, actual: usize },

    #[error("disk is write protected")]
    WriteProtected,

    #[error("image of {0} bytes is larger than an 80-track disk")]
    TooLarge(usize),

    #[error("unsupported geometry: {tracks} tracks x {sectors} sectors x {sector_size} bytes")]
    UnsupportedGeometry {
        tracks: u8,
        sectors: u8,
        sector_size: u16,
    },

    #[error("truncated FDI image: {actual} bytes, expected {expected}")]
    Truncated { expected: usize, actual: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed disk geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub tracks: u8,
    pub sectors_per_track: u8,
    pub sector_size: usize,
}

impl Geometry {
    #[must_use]
    pub const fn dfs(tracks: u8) -> Self {
        Self {
            tracks,
            sectors_per_track: SECTORS_PER_TRACK,
            sector_size: SECTOR_SIZE,
        }
    }

    #[must_use]
    pub const fn sector_count(&self) -> usize {
        self.tracks as usize * self.sectors_per_track as usize
    }

    #[must_use]
    pub const fn contains(&self, track: u8, sector: u8) -> bool {
        track < self.tracks && sector < self.sectors_per_track
    }
}

/// File format an image was loaded from; `save` writes the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Ssd,
    Fdi,
}

/// A sector as read from the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorRead {
    pub payload: Vec<u8>,
    pub stored_crc: u16,
}

impl SectorRead {
    /// Stored CRC matches the payload.
    #[must_use]
    pub fn crc_ok(&self) -> bool {
        sector_crc(&self.payload) == self.stored_crc
    }
}

#[derive(Debug, Clone)]
struct Sector {
    data: [u8; SECTOR_SIZE],
    crc: u16,
}

impl Sector {
    fn filled(fill: u8) -> Self {
        let data = [fill; SECTOR_SIZE];
        Self {
            crc: sector_crc(&data),
            data,
        }
    }
}

/// Track/sector addressable disk contents.
#[derive(Debug, Clone)]
pub struct DiskImage {
    geometry: Geometry,
    sectors: Vec<Sector>,
    format: ImageFormat,
    dirty: bool,
    pub write_protected: bool,
}

impl DiskImage {
    /// A zero-filled disk with valid CRCs.
    #[must_use]
    pub fn blank(tracks: u8) -> Self {
        let geometry = Geometry::dfs(tracks);
        Self {
            geometry,
            sectors: vec![Sector::filled(0); geometry.sector_count()],
            format: ImageFormat::Ssd,
            dirty: false,
            write_protected: false,
        }
    }

    /// Parse a raw sector dump. Short images are zero-padded to 40 or 80
    /// tracks.
    pub fn from_ssd(bytes: &[u8]) -> Result<Self> {
        let tracks = if bytes.len() <= usize::from(TRACKS_40) * TRACK_BYTES {
            TRACKS_40
        } else if bytes.len() <= usize::from(TRACKS_80) * TRACK_BYTES {
            TRACKS_80
        } else {
            return Err(DiskError::TooLarge(bytes.len()));
        };

        let mut image = Self::blank(tracks);
        for (sector, chunk) in image.sectors.iter_mut().zip(bytes.chunks(SECTOR_SIZE)) {
            sector.data[..chunk.len()].copy_from_slice(chunk);
            sector.crc = sector_crc(&sector.data);
        }
        Ok(image)
    }

    /// Parse an FDI image, keeping the stored CRCs as they are.
    pub fn from_fdi(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FDI_HEADER_LEN {
            return Err(DiskError::Truncated {
                expected: FDI_HEADER_LEN,
                actual: bytes.len(),
            });
        }
        if bytes[..8] != FDI_MAGIC {
            // Not ours: treat it as a raw dump.
            return Self::from_ssd(bytes);
        }

        let tracks = bytes[8];
        let sectors = bytes[9];
        let sector_size = u16::from_le_bytes([bytes[10], bytes[11]]);
        if !matches!(tracks, TRACKS_40 | TRACKS_80)
            || sectors != SECTORS_PER_TRACK
            || usize::from(sector_size) != SECTOR_SIZE
        {
            return Err(DiskError::UnsupportedGeometry {
                tracks,
                sectors,
                sector_size,
            });
        }

        let geometry = Geometry::dfs(tracks);
        let record = SECTOR_SIZE + 2;
        let expected = FDI_HEADER_LEN + geometry.sector_count() * record;
        if bytes.len() < expected {
            return Err(DiskError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        let sectors = bytes[FDI_HEADER_LEN..expected]
            .chunks_exact(record)
            .map(|chunk| {
                let mut data = [0; SECTOR_SIZE];
                data.copy_from_slice(&chunk[..SECTOR_SIZE]);
                Sector {
                    data,
                    crc: u16::from_be_bytes([chunk[SECTOR_SIZE], chunk[SECTOR_SIZE + 1]]),
                }
            })
            .collect();

        Ok(Self {
            geometry,
            sectors,
            format: ImageFormat::Fdi,
            dirty: false,
            write_protected: false,
        })
    }

    /// Load an image file, choosing the format by its magic.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        if bytes.starts_with(&FDI_MAGIC) {
            Self::from_fdi(&bytes)
        } else {
            Self::from_ssd(&bytes)
        }
    }

    /// Write the image in the format it was loaded from and clear the dirty
    /// flag.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = match self.format {
            ImageFormat::Ssd => self.to_ssd(),
            ImageFormat::Fdi => self.to_fdi(),
        };
        fs::write(path, bytes)?;
        self.dirty = false;
        Ok(())
    }

    #[must_use]
    pub fn to_ssd(&self) -> Vec<u8> {
        self.sectors.iter().flat_map(|s| s.data).collect()
    }

    #[must_use]
    pub fn to_fdi(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            FDI_HEADER_LEN + self.sectors.len() * (SECTOR_SIZE + 2),
        );
        out.extend_from_slice(&FDI_MAGIC);
        out.push(self.geometry.tracks);
        out.push(self.geometry.sectors_per_track);
        out.extend_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        for sector in &self.sectors {
            out.extend_from_slice(&sector.data);
            out.extend_from_slice(&sector.crc.to_be_bytes());
        }
        out
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[must_use]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Save as FDI from now on.
    pub fn set_format(&mut self, format: ImageFormat) {
        self.format = format;
    }

    /// Modified since load or the last save.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn read_sector(&self, track: u8, sector: u8) -> Result<SectorRead> {
        let s = &self.sectors[self.index(track, sector)?];
        Ok(SectorRead {
            payload: s.data.to_vec(),
            stored_crc: s.crc,
        })
    }

    /// Replace a sector's payload and recompute its CRC.
    pub fn write_sector(&mut self, track: u8, sector: u8, payload: &[u8]) -> Result<()> {
        let index = self.index(track, sector)?;
        if payload.len() != SECTOR_SIZE {
            return Err(DiskError::PayloadSize {
                expected: SECTOR_SIZE,
                actual: payload.len(),
            });
        }
        if self.write_protected {
            return Err(DiskError::WriteProtected);
        }
        let s = &mut self.sectors[index];
        s.data.copy_from_slice(payload);
        s.crc = sector_crc(&s.data);
        self.dirty = true;
        Ok(())
    }

    /// Fill every sector of a track with `fill`.
    pub fn format_track(&mut self, track: u8, fill: u8) -> Result<()> {
        let first = self.index(track, 0)?;
        if self.write_protected {
            return Err(DiskError::WriteProtected);
        }
        let count = usize::from(self.geometry.sectors_per_track);
        for s in &mut self.sectors[first..first + count] {
            *s = Sector::filled(fill);
        }
        self.dirty = true;
        Ok(())
    }

    /// Overwrite a sector's stored CRC without touching its payload.
    pub fn set_stored_crc(&mut self, track: u8, sector: u8, crc: u16) -> Result<()> {
        let index = self.index(track, sector)?;
        self.sectors[index].crc = crc;
        self.dirty = true;
        Ok(())
    }

    fn index(&self, track: u8, sector: u8) -> Result<usize> {
        if !self.geometry.contains(track, sector) {
            return Err(DiskError::NotFound { track, sector });
        }
        Ok(usize::from(track) * usize::from(self.geometry.sectors_per_track) + usize::from(sector))
    }
}

/// CRC-16-CCITT (poly 0x1021, init 0xFFFF).
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    crc16_update(0xFFFF, data)
}

fn crc16_update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// CRC of a sector's data field: the data mark followed by the payload.
#[must_use]
pub fn sector_crc(payload: &[u8]) -> u16 {
    crc16_update(crc16(&[DATA_MARK]), payload)
}
