//! File-backed shared frame region for external display clients.
//!
//! Layout (little-endian):
//!
//! | offset | size | field                          |
//! |--------|------|--------------------------------|
//! | 0      | 4    | magic `BBCF`                   |
//! | 4      | 4    | version (1)                    |
//! | 8      | 4    | width                          |
//! | 12     | 4    | height                         |
//! | 16     | 4    | format (1 = XRGB8888)          |
//! | 20     | 8    | generation                     |
//! | 28     | 4    | sequence                       |
//! | 32     | ...  | `width * height` packed pixels |
//!
//! The pixel area is sized for the largest frame the region accepts.
//! Larger frames are cropped.
//!
//! The sequence word is a seqlock. The writer makes it odd before it
//! touches the size fields, generation or pixels, and even again once
//! they are all written. A reader must load the sequence, retry while it
//! is odd, copy what it needs, then load the sequence again and discard
//! the copy if the value changed. [`ShmReader`] does exactly that.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use emu_core::{Frame, FrameSlot};
use tracing::{info, warn};

pub const MAGIC: [u8; 4] = *b"BBCF";
pub const VERSION: u32 = 2;
pub const HEADER_SIZE: u64 = 32;
pub const FORMAT_XRGB8888: u32 = 1;
pub const MAX_WIDTH: u32 = 1024;
pub const MAX_HEIGHT: u32 = 640;

const GENERATION_OFFSET: u64 = 20;
const SEQUENCE_OFFSET: u64 = 28;

/// Total size of the region on disk.
pub const REGION_SIZE: u64 = HEADER_SIZE + MAX_WIDTH as u64 * MAX_HEIGHT as u64 * 4;

/// How long the bridge waits for a frame before checking for shutdown.
const POLL: Duration = Duration::from_millis(100);

/// An open shared frame region.
pub struct ShmRegion {
    file: File,
    scratch: Vec<u8>,
    sequence: u32,
}

impl ShmRegion {
    /// Create (or truncate) the region at `path` with an empty frame.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(REGION_SIZE)?;
        let mut region = Self {
            file,
            scratch: Vec::new(),
            sequence: 0,
        };
        region.write_header(0, 0)?;
        region.write_generation(0)?;
        region.write_sequence()?;
        Ok(region)
    }

    /// Copy `frame` into the region, cropping it to the maximum size.
    pub fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let width = frame.width.min(MAX_WIDTH);
        let height = frame.height.min(MAX_HEIGHT);

        self.scratch.clear();
        for y in 0..height as usize {
            let start = y * frame.width as usize;
            let row = &frame.pixels[start..start + width as usize];
            for pixel in row {
                self.scratch.extend_from_slice(&pixel.to_le_bytes());
            }
        }

        self.sequence = self.sequence.wrapping_add(1);
        self.write_sequence()?;
        self.file.seek(SeekFrom::Start(HEADER_SIZE))?;
        self.file.write_all(&self.scratch)?;
        self.write_header(width, height)?;
        self.write_generation(frame.generation)?;
        self.sequence = self.sequence.wrapping_add(1);
        self.write_sequence()
    }

    /// Current seqlock value; even when no update is in progress.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    fn write_header(&mut self, width: u32, height: u32) -> io::Result<()> {
        let mut header = [0u8; 20];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..8].copy_from_slice(&VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&width.to_le_bytes());
        header[12..16].copy_from_slice(&height.to_le_bytes());
        header[16..20].copy_from_slice(&FORMAT_XRGB8888.to_le_bytes());
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)
    }

    fn write_generation(&mut self, generation: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(GENERATION_OFFSET))?;
        self.file.write_all(&generation.to_le_bytes())
    }

    fn write_sequence(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(SEQUENCE_OFFSET))?;
        self.file.write_all(&self.sequence.to_le_bytes())?;
        self.file.flush()
    }
}

/// Consumer side of a shared frame region.
pub struct ShmReader {
    file: File,
}

impl ShmReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file })
    }

    /// Copy the current frame. Returns `None` when the writer was part way
    /// through an update; the caller tries again later.
    pub fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        let before = self.sequence()?;
        if before % 2 == 1 {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut header)?;
        if header[0..4] != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not a BBCF region"));
        }
        let field = |offset: usize| {
            u32::from_le_bytes([
                header[offset],
                header[offset + 1],
                header[offset + 2],
                header[offset + 3],
            ])
        };
        let width = field(8).min(MAX_WIDTH);
        let height = field(12).min(MAX_HEIGHT);
        let mut generation = [0u8; 8];
        generation.copy_from_slice(&header[20..28]);

        let mut bytes = vec![0u8; width as usize * height as usize * 4];
        self.file.read_exact(&mut bytes)?;

        if self.sequence()? != before {
            return Ok(None);
        }
        let pixels = bytes
            .chunks_exact(4)
            .map(|p| u32::from_le_bytes([p[0], p[1], p[2], p[3]]))
            .collect();
        Ok(Some(Frame {
            width,
            height,
            pixels,
            generation: u64::from_le_bytes(generation),
        }))
    }

    fn sequence(&mut self) -> io::Result<u32> {
        let mut word = [0u8; 4];
        self.file.seek(SeekFrom::Start(SEQUENCE_OFFSET))?;
        self.file.read_exact(&mut word)?;
        Ok(u32::from_le_bytes(word))
    }
}

/// Background thread mirroring published frames into a [`ShmRegion`].
pub struct ShmBridge {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ShmBridge {
    /// Create the region and start mirroring `frames` into it.
    pub fn start(path: &Path, frames: Arc<FrameSlot>) -> io::Result<Self> {
        let mut region = ShmRegion::create(path)?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("shm-bridge".into())
            .spawn(move || {
                let mut seen = 0;
                while !thread_stop.load(Ordering::Relaxed) {
                    let Some(frame) = frames.wait_newer(seen, POLL) else {
                        continue;
                    };
                    seen = frame.generation;
                    if let Err(e) = region.write_frame(&frame) {
                        warn!("shared frame region write failed, bridge stopped: {e}");
                        return;
                    }
                }
            })?;
        info!(path = %path.display(), "shared frame region ready");
        Ok(Self {
            path: path.to_path_buf(),
            stop,
            thread: Some(thread),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop the thread and wait for it to finish its current frame.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ShmBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("4 bytes"))
    }

    fn generation(bytes: &[u8]) -> u64 {
        u64::from_le_bytes(bytes[20..28].try_into().expect("8 bytes"))
    }

    #[test]
    fn new_region_has_header_and_full_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frame.shm");
        ShmRegion::create(&path).expect("create");

        let bytes = fs::read(&path).expect("read");
        assert_eq!(bytes.len() as u64, REGION_SIZE);
        assert_eq!(&bytes[0..4], b"BBCF");
        assert_eq!(u32_at(&bytes, 4), VERSION);
        assert_eq!(u32_at(&bytes, 16), FORMAT_XRGB8888);
        assert_eq!(generation(&bytes), 0);
    }

    #[test]
    fn frame_is_written_with_generation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frame.shm");
        let mut region = ShmRegion::create(&path).expect("create");

        let mut frame = Frame::blank(3, 2);
        frame.pixels = vec![1, 2, 3, 4, 5, 6];
        frame.generation = 9;
        region.write_frame(&frame).expect("write");

        let bytes = fs::read(&path).expect("read");
        assert_eq!((u32_at(&bytes, 8), u32_at(&bytes, 12)), (3, 2));
        assert_eq!(generation(&bytes), 9);
        assert_eq!(u32_at(&bytes, 32), 1);
        assert_eq!(u32_at(&bytes, 32 + 5 * 4), 6);
    }

    #[test]
    fn sequence_is_even_between_updates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frame.shm");
        let mut region = ShmRegion::create(&path).expect("create");
        region.write_frame(&Frame::blank(2, 2)).expect("write");
        region.write_frame(&Frame::blank(2, 2)).expect("write");

        let bytes = fs::read(&path).expect("read");
        assert_eq!(region.sequence(), 4);
        assert_eq!(u32_at(&bytes, 28), 4);
    }

    #[test]
    fn reader_rejects_update_in_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frame.shm");
        let mut region = ShmRegion::create(&path).expect("create");
        let mut frame = Frame::blank(2, 1);
        frame.pixels = vec![0x0012_3456, 0x0065_4321];
        frame.generation = 5;
        region.write_frame(&frame).expect("write");

        let mut reader = ShmReader::open(&path).expect("open");
        let copy = reader.read_frame().expect("read").expect("settled frame");
        assert_eq!((copy.width, copy.height), (2, 1));
        assert_eq!(copy.pixels, frame.pixels);
        assert_eq!(copy.generation, 5);

        // What a reader sees while the writer is between its two
        // sequence stores.
        region.sequence += 1;
        region.write_sequence().expect("write");
        assert!(reader.read_frame().expect("read").is_none());

        region.sequence += 1;
        region.write_sequence().expect("write");
        assert!(reader.read_frame().expect("read").is_some());
    }

    #[test]
    fn oversized_frame_is_cropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frame.shm");
        let mut region = ShmRegion::create(&path).expect("create");

        let mut frame = Frame::blank(MAX_WIDTH + 8, 2);
        frame.pixels[MAX_WIDTH as usize + 8] = 0x00AB_CDEF;
        region.write_frame(&frame).expect("write");

        let bytes = fs::read(&path).expect("read");
        assert_eq!(u32_at(&bytes, 8), MAX_WIDTH);
        // Second row starts right after the first cropped row.
        assert_eq!(u32_at(&bytes, 32 + MAX_WIDTH as usize * 4), 0x00AB_CDEF);
    }

    #[test]
    fn bridge_mirrors_published_frames() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frame.shm");
        let slot = Arc::new(FrameSlot::new(2, 2));
        let bridge = ShmBridge::start(&path, Arc::clone(&slot)).expect("start");

        slot.publish(Frame::blank(2, 2));
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let bytes = fs::read(&path).expect("read");
            if generation(&bytes) == 1 {
                break;
            }
            assert!(Instant::now() < deadline, "frame never mirrored");
            thread::sleep(Duration::from_millis(10));
        }
        bridge.stop();
    }

    #[test]
    fn unwritable_path_fails_to_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("frame.shm");
        let slot = Arc::new(FrameSlot::new(1, 1));
        assert!(ShmBridge::start(&path, slot).is_err());
    }
}
