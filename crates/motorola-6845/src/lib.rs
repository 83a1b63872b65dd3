//! Motorola 6845 CRT Controller (CRTC).
//!
//! The CRTC generates video timing and display memory addresses. It knows
//! nothing about pixels: every character clock it produces a memory address
//! (MA), a raster address within the character row (RA), and the display
//! enable, sync and cursor signals. The video hardware downstream fetches
//! and serialises the bytes.
//!
//! # Standalone IC
//!
//! No dependencies and no memory access. The owner calls [`Crtc6845::tick`]
//! once per character clock and consumes the returned [`CrtcOutput`].
//!
//! # Registers
//!
//! | Reg | Name                 | Width |
//! |-----|----------------------|-------|
//! | R0  | Horizontal total     | 8     |
//! | R1  | Horizontal displayed | 8     |
//! | R2  | HSYNC position       | 8     |
//! | R3  | Sync widths (V:H)    | 4:4   |
//! | R4  | Vertical total       | 7     |
//! | R5  | Vertical adjust      | 5     |
//! | R6  | Vertical displayed   | 7     |
//! | R7  | VSYNC position       | 7     |
//! | R8  | Interlace and skew   | 8     |
//! | R9  | Max scan line        | 5     |
//! | R10 | Cursor start/blink   | 7     |
//! | R11 | Cursor end           | 5     |
//! | R12 | Start address high   | 6     |
//! | R13 | Start address low    | 8     |
//! | R14 | Cursor high          | 6     |
//! | R15 | Cursor low           | 8     |
//! | R16 | Light pen high (RO)  | 6     |
//! | R17 | Light pen low (RO)   | 8     |
//!
//! Register writes are held until the next character boundary so a
//! timing change never lands mid-character.

#![allow(clippy::cast_possible_truncation)]

const REGISTER_COUNT: usize = 18;

/// Significant bits of each register; unused bits read back as zero.
const REGISTER_MASKS: [u8; REGISTER_COUNT] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0x7F, 0x1F, 0x7F, 0x7F, 0xFF, 0x1F, 0x7F, 0x1F, 0x3F, 0xFF, 0x3F,
    0xFF, 0x3F, 0xFF,
];

/// Signals for one character clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrtcOutput {
    /// Memory address (14 bits).
    pub ma: u16,
    /// Raster address within the character row.
    pub ra: u8,
    pub display_enable: bool,
    pub hsync: bool,
    pub vsync: bool,
    pub cursor: bool,
}

/// R8 bits 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterlaceMode {
    Off,
    /// Alternate fields are offset by half a line; both show every scanline.
    Sync,
    /// Each field shows alternate scanlines of every row.
    SyncAndVideo,
}

/// Motorola 6845 CRT Controller.
#[derive(Debug, Clone)]
pub struct Crtc6845 {
    regs: [u8; REGISTER_COUNT],
    /// Address register (selects R0-R17).
    address: u8,
    /// Writes waiting for the next character boundary.
    pending: [Option<u8>; REGISTER_COUNT],

    /// Horizontal character counter.
    hcc: u8,
    /// Character row counter.
    row: u8,
    /// Raster address (scanline within row).
    ra: u8,
    /// In the R5 vertical-adjust scanlines after the last row.
    in_adjust: bool,
    adjust_count: u8,

    hsync: bool,
    hsync_count: u8,
    vsync: bool,
    vsync_count: u8,
    /// Vertical display window still open (row < R6).
    v_display: bool,

    ma: u16,
    /// MA at the start of the current character row.
    row_start: u16,

    field_odd: bool,
    /// Fields since power-on, for cursor blink.
    field_count: u32,
}

impl Crtc6845 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: [0; REGISTER_COUNT],
            address: 0,
            pending: [None; REGISTER_COUNT],
            hcc: 0,
            row: 0,
            ra: 0,
            in_adjust: false,
            adjust_count: 0,
            hsync: false,
            hsync_count: 0,
            vsync: false,
            vsync_count: 0,
            v_display: true,
            ma: 0,
            row_start: 0,
            field_odd: false,
            field_count: 0,
        }
    }

    /// Select the register for subsequent data accesses.
    pub fn write_address(&mut self, value: u8) {
        self.address = value & 0x1F;
    }

    /// Write the selected register. Takes effect at the next character
    /// boundary. Writes to R16/R17 and to unassigned addresses are ignored.
    pub fn write_data(&mut self, value: u8) {
        let index = usize::from(self.address);
        if index < 16 {
            self.pending[index] = Some(value & REGISTER_MASKS[index]);
        }
    }

    /// Read the selected register. Only R14-R17 are readable; the rest
    /// return 0.
    #[must_use]
    pub fn read_data(&self) -> u8 {
        let index = usize::from(self.address);
        if (14..REGISTER_COUNT).contains(&index) {
            self.pending[index].unwrap_or(self.regs[index])
        } else {
            0
        }
    }

    /// Current (applied) value of a register.
    #[must_use]
    pub fn register(&self, index: usize) -> u8 {
        self.regs.get(index).copied().unwrap_or(0)
    }

    /// Latch the current MA into R16/R17.
    pub fn strobe_light_pen(&mut self) {
        self.regs[16] = (self.ma >> 8) as u8 & REGISTER_MASKS[16];
        self.regs[17] = self.ma as u8;
    }

    #[must_use]
    pub fn interlace_mode(&self) -> InterlaceMode {
        match self.regs[8] & 0x03 {
            0b01 => InterlaceMode::Sync,
            0b11 => InterlaceMode::SyncAndVideo,
            _ => InterlaceMode::Off,
        }
    }

    /// Display enable delay in characters (R8 bits 4-5). 3 disables output.
    #[must_use]
    pub fn display_skew(&self) -> u8 {
        (self.regs[8] >> 4) & 0x03
    }

    /// Cursor delay in characters (R8 bits 6-7). 3 disables the cursor.
    #[must_use]
    pub fn cursor_skew(&self) -> u8 {
        (self.regs[8] >> 6) & 0x03
    }

    #[must_use]
    pub fn field_odd(&self) -> bool {
        self.field_odd
    }

    #[must_use]
    pub fn field_count(&self) -> u32 {
        self.field_count
    }

    #[must_use]
    pub fn hcc(&self) -> u8 {
        self.hcc
    }

    #[must_use]
    pub fn row(&self) -> u8 {
        self.row
    }

    #[must_use]
    pub fn ra(&self) -> u8 {
        self.ra
    }

    #[must_use]
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Character clocks per field for the programmed timing, including
    /// writes not yet applied. Interlace is ignored.
    #[must_use]
    pub fn frame_ticks(&self) -> u64 {
        let r = |index: usize| u64::from(self.pending[index].unwrap_or(self.regs[index]));
        let scanlines = (r(4) + 1) * (r(9) + 1) + r(5);
        (r(0) + 1) * scanlines
    }

    /// Advance one character clock and return its signals.
    pub fn tick(&mut self) -> CrtcOutput {
        self.apply_pending();

        if self.hcc == self.regs[2] && self.hsync_width() > 0 {
            self.hsync = true;
            self.hsync_count = 0;
        }

        let display_enable = self.hcc < self.regs[1] && self.v_display && !self.in_adjust;
        let output = CrtcOutput {
            ma: self.ma & 0x3FFF,
            ra: self.ra,
            display_enable,
            hsync: self.hsync,
            vsync: self.vsync,
            cursor: display_enable && self.cursor_active(),
        };

        if self.hsync {
            self.hsync_count += 1;
            if self.hsync_count >= self.hsync_width() {
                self.hsync = false;
            }
        }

        self.ma = self.ma.wrapping_add(1) & 0x3FFF;
        if self.hcc == self.regs[0] {
            self.hcc = 0;
            self.end_of_line();
        } else {
            self.hcc = self.hcc.wrapping_add(1);
        }

        output
    }

    fn apply_pending(&mut self) {
        for (reg, pending) in self.regs.iter_mut().zip(self.pending.iter_mut()) {
            if let Some(value) = pending.take() {
                *reg = value;
            }
        }
    }

    /// HSYNC width in characters; 0 means no HSYNC.
    fn hsync_width(&self) -> u8 {
        self.regs[3] & 0x0F
    }

    /// VSYNC height in scanlines; 0 means 16.
    fn vsync_height(&self) -> u8 {
        match self.regs[3] >> 4 {
            0 => 16,
            lines => lines,
        }
    }

    fn cursor_address(&self) -> u16 {
        u16::from_be_bytes([self.regs[14], self.regs[15]])
    }

    fn cursor_active(&self) -> bool {
        if self.ma & 0x3FFF != self.cursor_address() {
            return false;
        }
        let start = self.regs[10] & 0x1F;
        let end = self.regs[11];
        if self.ra < start || self.ra > end {
            return false;
        }
        match (self.regs[10] >> 5) & 0x03 {
            0b00 => true,
            0b01 => false,
            0b10 => self.field_count & 0x08 == 0,
            _ => self.field_count & 0x10 == 0,
        }
    }

    /// True when `ra` is the last scanline of a character row.
    fn is_last_scanline(&self) -> bool {
        let max = self.regs[9];
        if self.interlace_mode() == InterlaceMode::SyncAndVideo {
            (self.ra & !1) >= (max & !1)
        } else {
            self.ra >= max
        }
    }

    fn end_of_line(&mut self) {
        if self.vsync {
            self.vsync_count += 1;
            if self.vsync_count >= self.vsync_height() {
                self.vsync = false;
            }
        }

        if self.in_adjust {
            self.adjust_count += 1;
            self.ra = self.ra.wrapping_add(1) & 0x1F;
            if self.adjust_count >= self.regs[5] {
                self.start_field();
            } else {
                self.ma = self.row_start;
            }
            return;
        }

        if !self.is_last_scanline() {
            let step = if self.interlace_mode() == InterlaceMode::SyncAndVideo {
                2
            } else {
                1
            };
            self.ra = self.ra.wrapping_add(step) & 0x1F;
            self.ma = self.row_start;
            return;
        }

        // End of the character row.
        self.row_start = self.row_start.wrapping_add(u16::from(self.regs[1])) & 0x3FFF;
        self.ma = self.row_start;
        self.ra = self.first_scanline();

        if self.row >= self.regs[4] {
            if self.regs[5] > 0 {
                self.in_adjust = true;
                self.adjust_count = 0;
                self.ra = 0;
                self.row = self.row.wrapping_add(1) & 0x7F;
            } else {
                self.start_field();
            }
            return;
        }

        self.row = self.row.wrapping_add(1) & 0x7F;
        if self.row == self.regs[6] {
            self.v_display = false;
        }
        if self.row == self.regs[7] {
            self.start_vsync();
        }
    }

    fn first_scanline(&self) -> u8 {
        if self.interlace_mode() == InterlaceMode::SyncAndVideo {
            u8::from(self.field_odd)
        } else {
            0
        }
    }

    fn start_vsync(&mut self) {
        self.vsync = true;
        self.vsync_count = 0;
    }

    fn start_field(&mut self) {
        self.field_count = self.field_count.wrapping_add(1);
        if self.interlace_mode() == InterlaceMode::Off {
            self.field_odd = false;
        } else {
            self.field_odd = !self.field_odd;
        }

        self.row = 0;
        self.in_adjust = false;
        self.adjust_count = 0;
        self.ra = self.first_scanline();
        self.row_start = u16::from_be_bytes([self.regs[12], self.regs[13]]);
        self.ma = self.row_start;
        self.v_display = self.regs[6] > 0;
        if self.regs[7] == 0 {
            self.start_vsync();
        }
    }
}

impl Default for Crtc6845 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(crtc: &mut Crtc6845, values: &[(u8, u8)]) {
        for &(reg, value) in values {
            crtc.write_address(reg);
            crtc.write_data(value);
        }
    }

    /// Small frame: 10 chars/line, 8 shown, 3 rows of 2 scanlines,
    /// 1 adjust line, 2 rows displayed, vsync on row 2.
    fn small() -> Crtc6845 {
        let mut crtc = Crtc6845::new();
        program(
            &mut crtc,
            &[
                (0, 9),
                (1, 8),
                (2, 8),
                (3, 0x21),
                (4, 2),
                (5, 1),
                (6, 2),
                (7, 2),
                (8, 0),
                (9, 1),
                (12, 0x01),
                (13, 0x00),
            ],
        );
        crtc
    }

    fn run_field(crtc: &mut Crtc6845) -> Vec<CrtcOutput> {
        let ticks = crtc.frame_ticks();
        (0..ticks).map(|_| crtc.tick()).collect()
    }

    #[test]
    fn writes_wait_for_character_boundary() {
        let mut crtc = Crtc6845::new();
        program(&mut crtc, &[(0, 63)]);
        assert_eq!(crtc.register(0), 0);
        crtc.tick();
        assert_eq!(crtc.register(0), 63);
    }

    #[test]
    fn only_cursor_and_light_pen_are_readable() {
        let mut crtc = Crtc6845::new();
        program(&mut crtc, &[(1, 80), (14, 0x12), (15, 0x34)]);
        crtc.write_address(1);
        assert_eq!(crtc.read_data(), 0);
        crtc.write_address(14);
        assert_eq!(crtc.read_data(), 0x12);
        crtc.write_address(16);
        crtc.write_data(0x55);
        crtc.tick();
        assert_eq!(crtc.read_data(), 0, "light pen is read-only");
    }

    #[test]
    fn register_widths_are_masked() {
        let mut crtc = Crtc6845::new();
        program(&mut crtc, &[(9, 0xFF), (12, 0xFF)]);
        crtc.tick();
        assert_eq!(crtc.register(9), 0x1F);
        assert_eq!(crtc.register(12), 0x3F);
    }

    #[test]
    fn frame_ticks_formula() {
        let crtc = {
            let mut c = small();
            c.tick();
            c
        };
        assert_eq!(crtc.frame_ticks(), 10 * (3 * 2 + 1));
    }

    #[test]
    fn field_wraps_back_to_start_address() {
        let mut crtc = small();
        // The first field starts from power-on MA 0; the next one from R12:R13.
        run_field(&mut crtc);
        let second = run_field(&mut crtc);
        assert_eq!(second[0].ma, 0x0100);
        assert_eq!((crtc.row(), crtc.ra(), crtc.hcc()), (0, 0, 0));
    }

    #[test]
    fn addresses_repeat_per_scanline_and_advance_per_row() {
        let mut crtc = small();
        run_field(&mut crtc);
        let out = run_field(&mut crtc);
        assert_eq!(out[0].ma, 0x100);
        assert_eq!(out[7].ma, 0x107);
        assert_eq!(out[10].ma, 0x100, "second scanline restarts the row");
        assert_eq!(out[10].ra, 1);
        assert_eq!(out[20].ma, 0x108, "next row advances by R1");
        assert_eq!(out[20].ra, 0);
    }

    #[test]
    fn display_enable_window() {
        let mut crtc = small();
        run_field(&mut crtc);
        let out = run_field(&mut crtc);
        let shown = out.iter().filter(|o| o.display_enable).count();
        assert_eq!(shown, 8 * 2 * 2, "8 chars x 2 rows x 2 scanlines");
        assert!(out[7].display_enable);
        assert!(!out[8].display_enable);
    }

    #[test]
    fn hsync_position_and_width() {
        let mut crtc = small();
        let out = run_field(&mut crtc);
        let line: Vec<bool> = out[..10].iter().map(|o| o.hsync).collect();
        assert_eq!(
            line,
            [false, false, false, false, false, false, false, false, true, false]
        );
    }

    #[test]
    fn vsync_starts_on_row_r7_for_r3_high_lines() {
        let mut crtc = small();
        let out = run_field(&mut crtc);
        let vsync_lines: Vec<bool> = out.chunks(10).map(|line| line[0].vsync).collect();
        // Rows 0-1 are four scanlines; row 2 starts at line 4.
        assert_eq!(vsync_lines, [false, false, false, false, true, true, false]);
    }

    #[test]
    fn zero_vsync_width_means_sixteen() {
        let mut crtc = Crtc6845::new();
        program(&mut crtc, &[(0, 1), (3, 0x01), (4, 31), (7, 1), (9, 0)]);
        let out: Vec<_> = (0..64).map(|_| crtc.tick()).collect();
        let count = out.chunks(2).filter(|line| line[0].vsync).count();
        assert_eq!(count, 16);
    }

    #[test]
    fn cursor_matches_address_and_scanlines() {
        let mut crtc = small();
        program(&mut crtc, &[(10, 0x01), (11, 1), (14, 0x01), (15, 0x03)]);
        run_field(&mut crtc);
        let out = run_field(&mut crtc);
        let cursors: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|(_, o)| o.cursor)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(cursors, vec![13], "MA $103 on scanline 1 only");
    }

    #[test]
    fn cursor_blink_modes() {
        let mut crtc = small();
        program(&mut crtc, &[(10, 0x20), (11, 1), (14, 0x01), (15, 0x00)]);
        run_field(&mut crtc);
        let out = run_field(&mut crtc);
        assert!(!out.iter().any(|o| o.cursor), "mode 01 hides the cursor");

        program(&mut crtc, &[(10, 0x40)]);
        let mut on = Vec::new();
        for _ in 0..32 {
            on.push(run_field(&mut crtc).iter().any(|o| o.cursor));
        }
        let toggles = on.windows(2).filter(|w| w[0] != w[1]).count();
        assert!(toggles >= 3, "16-field blink toggles every 8 fields");
    }

    #[test]
    fn interlace_video_steps_raster_by_two() {
        let mut crtc = Crtc6845::new();
        program(&mut crtc, &[(0, 3), (1, 2), (4, 1), (6, 2), (7, 5), (8, 0x03), (9, 5)]);
        crtc.tick();
        let ticks_per_field = 4 * 2 * 3;
        let mut even = Vec::new();
        // Skip the power-on field, which started before R8 was applied.
        while crtc.row() != 0 || crtc.ra() > 1 || crtc.hcc() != 0 {
            crtc.tick();
        }
        for _ in 0..ticks_per_field {
            even.push(crtc.tick().ra);
        }
        let mut ras: Vec<u8> = even.chunks(4).map(|line| line[0]).collect();
        ras.dedup();
        let parity = ras[0] & 1;
        assert!(ras.iter().all(|ra| ra & 1 == parity), "one field, one parity");
        assert!(ras.contains(&(4 | parity)));
    }

    #[test]
    fn light_pen_latches_ma() {
        let mut crtc = small();
        for _ in 0..5 {
            crtc.tick();
        }
        crtc.strobe_light_pen();
        crtc.write_address(17);
        assert_eq!(crtc.read_data(), 5);
    }
}
