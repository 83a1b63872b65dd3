//! Machine side of the frame hand-off.
//!
//! The mixer appends displayed pixels scanline by scanline. At VSYNC the
//! sink packs the field into a [`Frame`] sized to the display-enabled
//! area (short rows are padded with black) and publishes it. The buffer
//! of the frame it replaces is kept as the single spare when no reader
//! still holds it.
//!
//! A field that never sees VSYNC (R7 beyond the vertical total) is cut
//! at [`MAX_FIELD_LINES`] displayed scanlines and published as if VSYNC
//! had arrived, so the buffer stays bounded.

use std::sync::Arc;

use emu_core::{Frame, FrameSlot};

/// Displayed scanlines buffered before a field is forced out.
pub const MAX_FIELD_LINES: usize = 640;

pub struct FrameSink {
    slot: Arc<FrameSlot>,
    /// Completed scanlines of the current field, back to back.
    field: Vec<u32>,
    row_lengths: Vec<usize>,
    line: Vec<u32>,
    spare: Option<Vec<u32>>,
    published: u64,
}

impl FrameSink {
    #[must_use]
    pub fn new(slot: Arc<FrameSlot>) -> Self {
        Self {
            slot,
            field: Vec::new(),
            row_lengths: Vec::new(),
            line: Vec::new(),
            spare: None,
            published: 0,
        }
    }

    /// Append pixels to the scanline being built.
    pub fn push(&mut self, pixels: &[u32]) {
        self.line.extend_from_slice(pixels);
    }

    /// Close the current scanline. Lines with no displayed pixels are
    /// not part of the frame. Returns true if the line filled the field
    /// and it was published.
    pub fn end_scanline(&mut self) -> bool {
        self.close_line();
        self.row_lengths.len() >= MAX_FIELD_LINES && self.publish()
    }

    /// Publish the field. Returns false if nothing was displayed.
    pub fn end_field(&mut self) -> bool {
        self.close_line();
        self.publish()
    }

    /// Displayed scanlines waiting for the end of the field.
    #[must_use]
    pub fn buffered_lines(&self) -> usize {
        self.row_lengths.len()
    }

    fn close_line(&mut self) {
        if self.line.is_empty() {
            return;
        }
        self.row_lengths.push(self.line.len());
        self.field.append(&mut self.line);
    }

    fn publish(&mut self) -> bool {
        if self.row_lengths.is_empty() {
            return false;
        }

        let width = self.row_lengths.iter().copied().max().unwrap_or(0);
        let height = self.row_lengths.len();
        let mut pixels = self.spare.take().unwrap_or_default();
        pixels.clear();
        pixels.reserve(width * height);

        let mut offset = 0;
        for &length in &self.row_lengths {
            pixels.extend_from_slice(&self.field[offset..offset + length]);
            pixels.resize(pixels.len() + width - length, 0);
            offset += length;
        }
        self.field.clear();
        self.row_lengths.clear();

        let frame = Frame {
            width: width as u32,
            height: height as u32,
            pixels,
            generation: 0,
        };
        let previous = self.slot.publish(frame);
        if let Ok(old) = Arc::try_unwrap(previous) {
            self.spare = Some(old.pixels);
        }
        self.published += 1;
        true
    }

    /// Fields published since power-on.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published
    }

    #[must_use]
    pub fn slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }
}
