//! Mullard SAA5050 teletext character generator.
//!
//! Turns a stream of 7-bit character codes into pixel rows. Each character
//! cell is 6 dots wide and 10 glyph lines tall; every dot is emitted as two
//! output pixels and every glyph line spans two half-lines, so a character
//! row covers 20 half-lines and 12 pixels per character. Character rounding
//! fills in half-dots along diagonals on the second half-line of each pair.
//!
//! Codes 0x00-0x1F are serial attributes: they occupy a cell (shown as a
//! space, or the held mosaic) and change the state for the rest of the row.
//! Some take effect at the control cell itself ("set-at"), the rest from the
//! following cell ("set-after"). All state resets at the start of every
//! scanline, so the owner feeds the same row of codes once per scanline.
//!
//! Output pixels are 3-bit colour indices: bit 0 red, bit 1 green, bit 2
//! blue.
//!
//! # Standalone IC
//!
//! No dependencies and no memory access; the owner calls `start_row`,
//! `start_scanline` and `push_char` from its video fetch and `end_field` at
//! vertical sync.

mod font;

use font::FONT;

/// Output pixels per character cell.
pub const PIXELS_PER_CHAR: usize = 12;

/// Half-lines per character row.
pub const HALF_LINES_PER_ROW: u8 = 20;

/// Flash shows for this many fields...
const FLASH_ON_FIELDS: u32 = 32;
/// ...out of this many.
const FLASH_CYCLE_FIELDS: u32 = 48;

pub const BLACK: u8 = 0;
pub const WHITE: u8 = 7;

/// Serial attribute state, reset at the start of every scanline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Attributes {
    foreground: u8,
    background: u8,
    graphics: bool,
    flash: bool,
    double_height: bool,
    conceal: bool,
    separated: bool,
    hold: bool,
    /// Last mosaic shown, repeated in control cells while holding.
    held_char: u8,
    held_separated: bool,
}

impl Attributes {
    const fn new() -> Self {
        Self {
            foreground: WHITE,
            background: BLACK,
            graphics: false,
            flash: false,
            double_height: false,
            conceal: false,
            separated: false,
            hold: false,
            held_char: 0x20,
            held_separated: false,
        }
    }

    fn set_graphics(&mut self, graphics: bool) {
        if self.graphics != graphics {
            self.held_char = 0x20;
        }
        self.graphics = graphics;
    }

    fn set_double_height(&mut self, double_height: bool) {
        if self.double_height != double_height {
            self.held_char = 0x20;
        }
        self.double_height = double_height;
    }
}

/// Mullard SAA5050.
#[derive(Debug, Clone)]
pub struct Saa5050 {
    attrs: Attributes,
    /// Half-line within the character row (0-19).
    ra: u8,
    /// Rounding select: the lower half-line of each glyph line pair.
    field_odd: bool,
    /// This row shows the bottom halves of the double-height row above.
    bottom_row: bool,
    /// A double-height code appeared in the current row.
    row_has_double: bool,
    field_count: u32,
}

impl Saa5050 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            attrs: Attributes::new(),
            ra: 0,
            field_odd: false,
            bottom_row: false,
            row_has_double: false,
            field_count: 0,
        }
    }

    /// Begin a character row. Row 0 is the top of the field.
    pub fn start_row(&mut self, row_in_field: u8) {
        self.bottom_row = row_in_field != 0 && self.row_has_double && !self.bottom_row;
        self.row_has_double = false;
    }

    /// Begin a scanline within the current row. `ra` is the half-line
    /// (0-19); the glyph line is `ra / 2` and `field_odd` selects the
    /// lower half of each pair for rounding.
    pub fn start_scanline(&mut self, ra: u8, field_odd: bool) {
        self.ra = ra % HALF_LINES_PER_ROW;
        self.field_odd = field_odd;
        self.attrs = Attributes::new();
    }

    /// Decode one character and return its pixels.
    pub fn push_char(&mut self, code: u8) -> [u8; PIXELS_PER_CHAR] {
        let code = code & 0x7F;

        if code < 0x20 {
            self.set_at(code);
            let shown = self.attrs;
            let pixels = if shown.hold && shown.graphics {
                self.render(shown.held_char, &shown, shown.held_separated)
            } else {
                [shown.background; PIXELS_PER_CHAR]
            };
            self.set_after(code);
            return pixels;
        }

        let shown = self.attrs;
        if shown.graphics && is_mosaic(code) {
            self.attrs.held_char = code;
            self.attrs.held_separated = shown.separated;
        }
        self.render(code, &shown, shown.separated)
    }

    /// Count a field for the flash timer.
    pub fn end_field(&mut self) {
        self.field_count = self.field_count.wrapping_add(1);
    }

    /// Flashing characters are in their visible phase.
    #[must_use]
    pub fn flash_visible(&self) -> bool {
        self.field_count % FLASH_CYCLE_FIELDS < FLASH_ON_FIELDS
    }

    #[must_use]
    pub fn is_bottom_row(&self) -> bool {
        self.bottom_row
    }

    fn set_at(&mut self, code: u8) {
        let a = &mut self.attrs;
        match code {
            0x09 => a.flash = false,
            0x0C => a.set_double_height(false),
            0x18 => a.conceal = true,
            0x19 => a.separated = false,
            0x1A => a.separated = true,
            0x1C => a.background = BLACK,
            0x1D => a.background = a.foreground,
            0x1E => a.hold = true,
            _ => {}
        }
    }

    fn set_after(&mut self, code: u8) {
        let a = &mut self.attrs;
        match code {
            0x01..=0x07 => {
                a.set_graphics(false);
                a.foreground = code;
                a.conceal = false;
            }
            0x08 => a.flash = true,
            0x0D => {
                a.set_double_height(true);
                self.row_has_double = true;
            }
            0x11..=0x17 => {
                a.set_graphics(true);
                a.foreground = code & 0x07;
                a.conceal = false;
            }
            0x1F => a.hold = false,
            _ => {}
        }
    }

    fn render(&self, code: u8, attrs: &Attributes, separated: bool) -> [u8; PIXELS_PER_CHAR] {
        let blank = [attrs.background; PIXELS_PER_CHAR];
        if self.bottom_row && !attrs.double_height {
            return blank;
        }
        if attrs.conceal || (attrs.flash && !self.flash_visible()) {
            return blank;
        }

        let mask = if attrs.graphics && is_mosaic(code) {
            self.mosaic_mask(code, attrs.double_height, separated)
        } else {
            self.glyph_mask(code, attrs.double_height)
        };

        let mut pixels = blank;
        for (x, pixel) in pixels.iter_mut().enumerate() {
            if mask & (1 << (PIXELS_PER_CHAR - 1 - x)) != 0 {
                *pixel = attrs.foreground;
            }
        }
        pixels
    }

    /// Half-line in a 20-half-line cell, after double-height scaling.
    fn cell_half_line(&self, double_height: bool) -> u8 {
        match (double_height, self.bottom_row) {
            (false, _) => self.ra,
            (true, false) => self.ra / 2,
            (true, true) => HALF_LINES_PER_ROW / 2 + self.ra / 2,
        }
    }

    /// 12-bit pixel mask, bit 11 leftmost.
    fn glyph_mask(&self, code: u8, double_height: bool) -> u16 {
        let glyph = &FONT[usize::from(code - 0x20)];
        let half_line = self.cell_half_line(double_height);
        let line = usize::from(half_line / 2);
        let lower = if double_height {
            half_line & 1 == 1
        } else {
            self.field_odd
        };

        let current = glyph[line];
        let neighbour = if lower {
            glyph.get(line + 1).copied().unwrap_or(0)
        } else if line > 0 {
            glyph[line - 1]
        } else {
            0
        };
        round(current, neighbour)
    }

    fn mosaic_mask(&self, code: u8, double_height: bool, separated: bool) -> u16 {
        let half_line = self.cell_half_line(double_height);
        let (band, gap) = match half_line {
            0..=5 => (0, half_line >= 4),
            6..=13 => (1, half_line >= 12),
            _ => (2, half_line >= 18),
        };
        if separated && gap {
            return 0;
        }

        // Sixel bits: 0/1 top, 2/3 middle, 4/6 bottom; bit 5 selects mosaics.
        let (left_bit, right_bit) = match band {
            0 => (0x01, 0x02),
            1 => (0x04, 0x08),
            _ => (0x10, 0x40),
        };
        let (left, right) = if separated {
            (0b0011_1100_0000, 0b0000_0000_1111)
        } else {
            (0b1111_1100_0000, 0b0000_0011_1111)
        };

        let mut mask = 0;
        if code & left_bit != 0 {
            mask |= left;
        }
        if code & right_bit != 0 {
            mask |= right;
        }
        mask
    }
}

impl Default for Saa5050 {
    fn default() -> Self {
        Self::new()
    }
}

/// Codes that show as mosaics in graphics mode; 0x40-0x5F blast through
/// as capitals.
const fn is_mosaic(code: u8) -> bool {
    code & 0x20 != 0
}

/// Double each dot and fill half-dots where the glyph steps diagonally
/// towards `neighbour`.
fn round(current: u8, neighbour: u8) -> u16 {
    let dot = |row: u8, column: i32| (0..5).contains(&column) && row & (0x10 >> column) != 0;
    let mut mask: u16 = 0;
    for column in 0..5 {
        if !dot(current, column) {
            continue;
        }
        let left_px = 2 * column;
        mask |= 0b11 << (10 - left_px);
        for step in [-1, 1] {
            let diagonal = column + step;
            if dot(neighbour, diagonal) && !dot(current, diagonal) && !dot(neighbour, column) {
                let px = if step > 0 { 2 * diagonal } else { 2 * diagonal + 1 };
                mask |= 1 << (11 - px);
            }
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    const F: u8 = WHITE;
    const B: u8 = BLACK;

    fn decoder(ra: u8, field_odd: bool) -> Saa5050 {
        let mut saa = Saa5050::new();
        saa.start_row(0);
        saa.start_scanline(ra, field_odd);
        saa
    }

    #[test]
    fn alpha_glyph_line() {
        let mut saa = decoder(2, false);
        // 'A' line 1 is ..#..
        assert_eq!(saa.push_char(b'A'), [B, B, B, B, F, F, B, B, B, B, B, B]);
    }

    #[test]
    fn rounding_fills_diagonals() {
        // '/' line 2 is ...#. between ....# above and ..#.. below.
        let mut upper = decoder(4, false);
        let mut lower = decoder(5, true);
        assert_eq!(upper.push_char(b'/'), [B, B, B, B, B, B, F, F, F, B, B, B]);
        assert_eq!(lower.push_char(b'/'), [B, B, B, B, B, F, F, F, B, B, B, B]);
    }

    #[test]
    fn colour_codes_are_set_after() {
        let mut saa = decoder(2, false);
        assert_eq!(saa.push_char(0x01), [B; 12]);
        let a = saa.push_char(b'A');
        assert_eq!(a[4], 1, "red foreground");
    }

    #[test]
    fn new_background_is_set_at() {
        let mut saa = decoder(0, false);
        saa.push_char(0x04);
        assert_eq!(saa.push_char(0x1D), [4; 12]);
        assert_eq!(saa.push_char(b' '), [4; 12]);
        saa.push_char(0x1C);
        assert_eq!(saa.push_char(b' '), [B; 12]);
    }

    #[test]
    fn contiguous_and_separated_mosaics() {
        let mut saa = decoder(0, false);
        saa.push_char(0x17);
        assert_eq!(saa.push_char(0x7F), [F; 12]);
        saa.push_char(0x1A);
        assert_eq!(saa.push_char(0x7F), [B, B, F, F, F, F, B, B, F, F, F, F]);

        let mut gap = decoder(4, false);
        gap.push_char(0x17);
        gap.push_char(0x1A);
        assert_eq!(gap.push_char(0x7F), [B; 12], "separated rows have a gap");
    }

    #[test]
    fn mosaic_bands_follow_sixel_bits() {
        // 0x21: top-left only; 0x70: bottom-left and bottom-right.
        let mut top = decoder(0, false);
        top.push_char(0x17);
        assert_eq!(top.push_char(0x21), [F, F, F, F, F, F, B, B, B, B, B, B]);
        let mut bottom = decoder(16, false);
        bottom.push_char(0x17);
        assert_eq!(bottom.push_char(0x70), [F; 12]);
        bottom.start_scanline(8, false);
        bottom.push_char(0x17);
        assert_eq!(bottom.push_char(0x70), [B; 12]);
    }

    #[test]
    fn capitals_blast_through_graphics() {
        let mut saa = decoder(2, false);
        saa.push_char(0x17);
        assert_eq!(saa.push_char(b'A'), [B, B, B, B, F, F, B, B, B, B, B, B]);
    }

    #[test]
    fn hold_repeats_last_mosaic_in_control_cells() {
        let mut saa = decoder(0, false);
        saa.push_char(0x17);
        saa.push_char(0x1E);
        saa.push_char(0x7F);
        assert_eq!(saa.push_char(0x08), [F; 12]);
        assert_eq!(saa.push_char(0x1F), [F; 12], "release is set-after");
        assert_eq!(saa.push_char(0x09), [B; 12]);
    }

    #[test]
    fn scanline_start_resets_attributes() {
        let mut saa = decoder(2, false);
        saa.push_char(0x01);
        saa.start_scanline(2, false);
        assert_eq!(saa.push_char(b'A')[4], WHITE);
    }

    #[test]
    fn conceal_hides_until_colour_change() {
        let mut saa = decoder(2, false);
        saa.push_char(0x18);
        assert_eq!(saa.push_char(b'A'), [B; 12]);
        saa.push_char(0x07);
        assert_eq!(saa.push_char(b'A')[4], WHITE);
    }

    #[test]
    fn double_height_spans_two_rows() {
        let mut saa = Saa5050::new();
        saa.start_row(0);
        saa.start_scanline(4, false);
        saa.push_char(0x0D);
        // Top row, half-line 4 -> glyph line 1 stretched.
        assert_eq!(saa.push_char(b'A'), [B, B, B, B, F, F, B, B, B, B, B, B]);

        saa.start_row(1);
        assert!(saa.is_bottom_row());
        saa.start_scanline(4, false);
        assert_eq!(saa.push_char(b'A'), [B; 12], "single height suppressed");
        saa.push_char(0x0D);
        // Bottom row, half-line 4 -> glyph line 6 (#...#).
        assert_eq!(saa.push_char(b'A'), [F, F, B, B, B, B, B, B, F, F, B, B]);

        saa.start_row(2);
        assert!(!saa.is_bottom_row(), "a bottom row never starts another");
    }

    #[test]
    fn flash_cycle() {
        let mut saa = decoder(2, false);
        saa.push_char(0x08);
        assert_eq!(saa.push_char(b'A')[4], F);

        for _ in 0..FLASH_ON_FIELDS {
            saa.end_field();
        }
        saa.start_scanline(2, false);
        saa.push_char(0x08);
        assert_eq!(saa.push_char(b'A'), [B; 12]);

        for _ in FLASH_ON_FIELDS..FLASH_CYCLE_FIELDS {
            saa.end_field();
        }
        assert!(saa.flash_visible());
    }

    #[test]
    fn font_covers_every_printable_code() {
        for code in 0x21..0x80u8 {
            let glyph = FONT[usize::from(code - 0x20)];
            assert!(glyph.iter().any(|&line| line != 0), "{code:#04X} is blank");
            assert!(glyph.iter().all(|&line| line < 0x20));
        }
    }
}
