//! Video ULA: palette, pixel shifter and teletext path.
//!
//! The CRTC supplies the address and timing; the ULA turns each fetched
//! screen byte into output pixels. In graphics modes the byte is shifted
//! out through the palette. In teletext mode it goes to the SAA5050 and
//! the decoder's colour indices are used directly.
//!
//! # Registers
//!
//! Control (`FE20`, even addresses):
//!
//! | Bits | Function                                      |
//! |------|-----------------------------------------------|
//! | 0    | Flash phase for flashing palette entries      |
//! | 1    | Teletext output                               |
//! | 2-3  | Characters per line: 10, 20, 40, 80           |
//! | 4    | CRTC clock: 1 = 2 MHz, 0 = 1 MHz              |
//! | 5-7  | Cursor segments (bit 7 first, bit 5 last two) |
//!
//! Palette (`FE21`, odd addresses): high nibble logical colour, low
//! nibble physical colour XOR 7 with bit 3 marking a flashing colour.
//!
//! # Skew
//!
//! Display enable and the cursor can be delayed by up to two characters
//! (CRTC R8). The character stream and its display enable move through
//! the same delay; the teletext decoder adds one more character, which the
//! usual mode 7 setting (display skew 1, cursor skew 2) compensates for.
//! A skew of 3 blanks the signal.

use motorola_6845::CrtcOutput;
use mullard_saa5050::{PIXELS_PER_CHAR, Saa5050};

use crate::frame_sink::FrameSink;

/// 0x00RRGGBB for each 3-bit colour (bit 0 red, 1 green, 2 blue).
pub const PHYSICAL_RGB: [u32; 8] = [
    0x0000_0000,
    0x00FF_0000,
    0x0000_FF00,
    0x00FF_FF00,
    0x0000_00FF,
    0x00FF_00FF,
    0x0000_FFFF,
    0x00FF_FFFF,
];

/// Output pixels per character with a 2 MHz CRTC clock.
pub const FAST_CHAR_PIXELS: usize = 8;
/// Output pixels per character with a 1 MHz CRTC clock.
pub const SLOW_CHAR_PIXELS: usize = 16;

const PIPELINE: usize = 4;
const SKEW_OFF: u8 = 3;

/// Beam state for the character the CRTC just produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Beam {
    pub output: CrtcOutput,
    /// Horizontal count of this character (0 starts a scanline).
    pub hcc: u8,
    pub row: u8,
    pub field_odd: bool,
    pub display_skew: u8,
    pub cursor_skew: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct Stage {
    byte: u8,
    display: bool,
    cursor: bool,
}

/// Screen address for a CRTC address. `wrap` is the hardware scroll
/// size from the addressable latch.
#[must_use]
pub fn screen_address(ma: u16, ra: u8, teletext: bool, wrap: u16) -> u16 {
    if teletext {
        let base = if ma & 0x2000 != 0 { 0x7C00 } else { 0x3C00 };
        return base | (ma & 0x03FF);
    }
    let address = ((ma & 0x0FFF) << 3) | u16::from(ra & 0x07);
    if ma & 0x1000 != 0 {
        address.wrapping_sub(wrap) & 0x7FFF
    } else {
        address
    }
}

pub struct VideoUla {
    control: u8,
    /// Raw low nibbles as written, per logical colour.
    palette: [u8; 16],
    teletext: Saa5050,
    pipeline: [Stage; PIPELINE],
    head: usize,
    /// Cursor segments still to draw, lowest bit next.
    cursor_segments: u8,
    last_row: Option<u8>,
    last_vsync: bool,
}

impl VideoUla {
    #[must_use]
    pub fn new() -> Self {
        Self {
            control: 0,
            palette: [0; 16],
            teletext: Saa5050::new(),
            pipeline: [Stage::default(); PIPELINE],
            head: 0,
            cursor_segments: 0,
            last_row: None,
            last_vsync: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Register write; `reg` is the SHEILA offset within `FE20-FE2F`.
    pub fn write(&mut self, reg: u8, value: u8) {
        if reg & 1 == 0 {
            self.control = value;
        } else {
            self.palette[usize::from(value >> 4)] = value & 0x0F;
        }
    }

    #[must_use]
    pub fn control(&self) -> u8 {
        self.control
    }

    #[must_use]
    pub fn teletext_enabled(&self) -> bool {
        self.control & 0x02 != 0
    }

    /// CRTC clocked at 2 MHz rather than 1 MHz.
    #[must_use]
    pub fn fast_clock(&self) -> bool {
        self.control & 0x10 != 0
    }

    /// Physical colour (0-7) for a logical colour, after flashing.
    #[must_use]
    pub fn physical_colour(&self, logical: u8) -> u8 {
        let entry = self.palette[usize::from(logical & 0x0F)];
        let colour = (entry & 0x07) ^ 0x07;
        if entry & 0x08 != 0 && self.control & 0x01 != 0 {
            colour ^ 0x07
        } else {
            colour
        }
    }

    /// Logical pixels in one screen byte.
    #[must_use]
    pub fn pixels_per_byte(&self) -> usize {
        let pixel_rate_mhz = 2usize << ((self.control >> 2) & 0x03);
        let crtc_mhz = if self.fast_clock() { 2 } else { 1 };
        (pixel_rate_mhz / crtc_mhz).clamp(1, SLOW_CHAR_PIXELS)
    }

    /// Process one character clock. `byte` is the screen byte at the
    /// address of `beam.output`. Returns true if a frame was published.
    pub fn character(&mut self, beam: Beam, byte: u8, sink: &mut FrameSink) -> bool {
        let out = beam.output;
        let mut published = false;
        if beam.hcc == 0 {
            published = sink.end_scanline();
            if self.teletext_enabled() {
                if self.last_row != Some(beam.row) {
                    self.teletext.start_row(beam.row);
                }
                self.teletext.start_scanline(out.ra, beam.field_odd);
            }
            self.last_row = Some(beam.row);
        }

        if out.vsync && !self.last_vsync {
            published |= sink.end_field();
            self.teletext.end_field();
            self.last_row = None;
        }
        self.last_vsync = out.vsync;

        self.head = (self.head + 1) % PIPELINE;
        self.pipeline[self.head] = Stage {
            byte,
            display: out.display_enable,
            cursor: out.cursor,
        };

        let teletext = self.teletext_enabled();
        let data_delay = beam.display_skew + u8::from(teletext);
        let stage = if beam.display_skew == SKEW_OFF {
            Stage::default()
        } else {
            self.delayed(data_delay)
        };
        let cursor = beam.cursor_skew != SKEW_OFF && self.delayed(beam.cursor_skew).cursor;
        if cursor {
            let c = self.control;
            let last = (c >> 5) & 1;
            self.cursor_segments = ((c >> 7) & 1) | ((c >> 5) & 2) | (last << 2) | (last << 3);
        }
        let invert = self.cursor_segments & 1 != 0;
        self.cursor_segments >>= 1;

        if stage.display {
            let mut pixels = [0u32; SLOW_CHAR_PIXELS];
            let count = if teletext {
                self.teletext_pixels(stage.byte, &mut pixels)
            } else {
                self.graphics_pixels(stage.byte, &mut pixels)
            };
            if invert {
                for pixel in &mut pixels[..count] {
                    *pixel ^= 0x00FF_FFFF;
                }
            }
            sink.push(&pixels[..count]);
        }
        published
    }

    fn delayed(&self, delay: u8) -> Stage {
        let back = usize::from(delay).min(PIPELINE - 1);
        self.pipeline[(self.head + PIPELINE - back) % PIPELINE]
    }

    fn teletext_pixels(&mut self, byte: u8, pixels: &mut [u32; SLOW_CHAR_PIXELS]) -> usize {
        let colours = self.teletext.push_char(byte);
        for (pixel, &colour) in pixels.iter_mut().zip(colours.iter()) {
            *pixel = PHYSICAL_RGB[usize::from(colour & 0x07)];
        }
        PIXELS_PER_CHAR
    }

    fn graphics_pixels(&self, byte: u8, pixels: &mut [u32; SLOW_CHAR_PIXELS]) -> usize {
        let total = if self.fast_clock() {
            FAST_CHAR_PIXELS
        } else {
            SLOW_CHAR_PIXELS
        };
        let logical = self.pixels_per_byte().min(total);
        let width = total / logical;

        let mut shift = byte;
        for chunk in pixels[..total].chunks_mut(width) {
            let index = ((shift >> 4) & 0x08)
                | ((shift >> 3) & 0x04)
                | ((shift >> 2) & 0x02)
                | ((shift >> 1) & 0x01);
            chunk.fill(PHYSICAL_RGB[usize::from(self.physical_colour(index))]);
            shift = (shift << 1) | 1;
        }
        total
    }
}

impl Default for VideoUla {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::FrameSlot;
    use std::sync::Arc;

    /// Palette for a two-colour mode: logical 0-7 black, 8-15 white.
    fn two_colour(ula: &mut VideoUla) {
        for logical in 0..16u8 {
            let physical = if logical >= 8 { 7 } else { 0 };
            ula.write(1, (logical << 4) | (physical ^ 7));
        }
    }

    fn beam(hcc: u8, display: bool) -> Beam {
        Beam {
            output: CrtcOutput {
                display_enable: display,
                ..CrtcOutput::default()
            },
            hcc,
            ..Beam::default()
        }
    }

    #[test]
    fn screen_address_wraps_for_hardware_scroll() {
        assert_eq!(screen_address(0x0600, 0, false, 0x5000), 0x3000);
        assert_eq!(screen_address(0x0600, 5, false, 0x5000), 0x3005);
        assert_eq!(screen_address(0x1000, 0, false, 0x5000), 0x3000);
        assert_eq!(screen_address(0x1000, 0, false, 0x2800), 0x5800);
        assert_eq!(screen_address(0x2000 | 0x3C00 | 5, 0, true, 0), 0x7C05);
        assert_eq!(screen_address(0x0005, 0, true, 0), 0x3C05);
    }

    #[test]
    fn mode_zero_shifts_one_bit_per_pixel() {
        let mut ula = VideoUla::new();
        ula.write(0, 0x9C); // 2 MHz, 80 characters
        two_colour(&mut ula);
        assert_eq!(ula.pixels_per_byte(), 8);

        let mut pixels = [0; SLOW_CHAR_PIXELS];
        assert_eq!(ula.graphics_pixels(0b1010_0001, &mut pixels), 8);
        let white = PHYSICAL_RGB[7];
        assert_eq!(
            pixels[..8],
            [white, 0, white, 0, 0, 0, 0, white]
        );
    }

    #[test]
    fn mode_two_pixels_are_four_wide() {
        let mut ula = VideoUla::new();
        ula.write(0, 0xF4); // 2 MHz, 20 characters
        // Logical 1 (byte bits 6,4,2,0 after one shift) to red.
        ula.write(1, 0x10 | (1 ^ 7));
        assert_eq!(ula.pixels_per_byte(), 2);

        let mut pixels = [0; SLOW_CHAR_PIXELS];
        // Second pixel: after one shift bit 0 lands in bit 1.
        ula.graphics_pixels(0b0000_0001, &mut pixels);
        assert_eq!(pixels[4..8], [PHYSICAL_RGB[1]; 4]);
    }

    #[test]
    fn flashing_entry_follows_control_bit() {
        let mut ula = VideoUla::new();
        ula.write(1, 0x30 | 0x08 | (1 ^ 7));
        assert_eq!(ula.physical_colour(3), 1);
        ula.write(0, 0x01);
        assert_eq!(ula.physical_colour(3), 6);
    }

    #[test]
    fn cursor_inverts_enabled_segments() {
        let slot = Arc::new(FrameSlot::new(1, 1));
        let mut sink = FrameSink::new(Arc::clone(&slot));
        let mut ula = VideoUla::new();
        ula.write(0, 0x9C | 0x80); // first segment only
        two_colour(&mut ula);

        let mut with_cursor = beam(0, true);
        with_cursor.output.cursor = true;
        ula.character(with_cursor, 0x00, &mut sink);
        ula.character(beam(1, true), 0x00, &mut sink);
        sink.end_field();

        let frame = slot.latest();
        assert_eq!(frame.width, 16);
        assert_eq!(frame.pixel(0, 0), Some(PHYSICAL_RGB[7]));
        assert_eq!(frame.pixel(8, 0), Some(0));
    }

    #[test]
    fn vsync_edge_publishes_frame() {
        let slot = Arc::new(FrameSlot::new(1, 1));
        let mut sink = FrameSink::new(Arc::clone(&slot));
        let mut ula = VideoUla::new();
        ula.write(0, 0x9C);
        ula.character(beam(0, true), 0xFF, &mut sink);
        let mut sync = beam(0, false);
        sync.output.vsync = true;
        assert!(ula.character(sync, 0, &mut sink));
        assert!(!ula.character(sync, 0, &mut sink), "level, not edge");
        assert_eq!(slot.generation(), 1);
    }

    #[test]
    fn skew_three_blanks_output() {
        let slot = Arc::new(FrameSlot::new(1, 1));
        let mut sink = FrameSink::new(Arc::clone(&slot));
        let mut ula = VideoUla::new();
        ula.write(0, 0x9C);
        let mut blanked = beam(0, true);
        blanked.display_skew = 3;
        ula.character(blanked, 0xFF, &mut sink);
        assert!(!sink.end_field());
    }
}
