//! BBC Micro keyboard matrix.
//!
//! Ten columns by eight rows. The system VIA drives the column on PA0-3
//! and the row on PA4-6, and reads the addressed key back on PA7. Row 0
//! holds SHIFT, CTRL and, in columns 2-9, the startup option links.
//!
//! With the keyboard enable latch bit high the keyboard scans itself: a
//! 1 MHz counter walks the columns and CA2 goes high while the current
//! column has a key down in rows 1-7. That edge is what wakes the OS
//! keyboard handler.

pub const COLUMNS: u8 = 10;
pub const ROWS: u8 = 8;

/// A key on the BBC keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BbcKey {
    Shift,
    Ctrl,
    // Row 1
    Q,
    N3,
    N4,
    N5,
    F4,
    N8,
    F7,
    Minus,
    Caret,
    Left,
    // Row 2
    F0,
    W,
    E,
    T,
    N7,
    I,
    N9,
    N0,
    Underscore,
    Down,
    // Row 3
    N1,
    N2,
    D,
    R,
    N6,
    U,
    O,
    P,
    LeftBracket,
    Up,
    // Row 4
    CapsLock,
    A,
    X,
    F,
    Y,
    J,
    K,
    At,
    Colon,
    Return,
    // Row 5
    ShiftLock,
    S,
    C,
    G,
    H,
    N,
    L,
    Semicolon,
    RightBracket,
    Delete,
    // Row 6
    Tab,
    Z,
    Space,
    V,
    B,
    M,
    Comma,
    Period,
    Slash,
    Copy,
    // Row 7
    Escape,
    F1,
    F2,
    F3,
    F5,
    F6,
    F8,
    F9,
    Backslash,
    Right,
}

impl BbcKey {
    /// `(column, row)` of this key in the matrix.
    #[must_use]
    pub const fn matrix(self) -> (u8, u8) {
        match self {
            Self::Shift => (0, 0),
            Self::Ctrl => (1, 0),

            Self::Q => (0, 1),
            Self::N3 => (1, 1),
            Self::N4 => (2, 1),
            Self::N5 => (3, 1),
            Self::F4 => (4, 1),
            Self::N8 => (5, 1),
            Self::F7 => (6, 1),
            Self::Minus => (7, 1),
            Self::Caret => (8, 1),
            Self::Left => (9, 1),

            Self::F0 => (0, 2),
            Self::W => (1, 2),
            Self::E => (2, 2),
            Self::T => (3, 2),
            Self::N7 => (4, 2),
            Self::I => (5, 2),
            Self::N9 => (6, 2),
            Self::N0 => (7, 2),
            Self::Underscore => (8, 2),
            Self::Down => (9, 2),

            Self::N1 => (0, 3),
            Self::N2 => (1, 3),
            Self::D => (2, 3),
            Self::R => (3, 3),
            Self::N6 => (4, 3),
            Self::U => (5, 3),
            Self::O => (6, 3),
            Self::P => (7, 3),
            Self::LeftBracket => (8, 3),
            Self::Up => (9, 3),

            Self::CapsLock => (0, 4),
            Self::A => (1, 4),
            Self::X => (2, 4),
            Self::F => (3, 4),
            Self::Y => (4, 4),
            Self::J => (5, 4),
            Self::K => (6, 4),
            Self::At => (7, 4),
            Self::Colon => (8, 4),
            Self::Return => (9, 4),

            Self::ShiftLock => (0, 5),
            Self::S => (1, 5),
            Self::C => (2, 5),
            Self::G => (3, 5),
            Self::H => (4, 5),
            Self::N => (5, 5),
            Self::L => (6, 5),
            Self::Semicolon => (7, 5),
            Self::RightBracket => (8, 5),
            Self::Delete => (9, 5),

            Self::Tab => (0, 6),
            Self::Z => (1, 6),
            Self::Space => (2, 6),
            Self::V => (3, 6),
            Self::B => (4, 6),
            Self::M => (5, 6),
            Self::Comma => (6, 6),
            Self::Period => (7, 6),
            Self::Slash => (8, 6),
            Self::Copy => (9, 6),

            Self::Escape => (0, 7),
            Self::F1 => (1, 7),
            Self::F2 => (2, 7),
            Self::F3 => (3, 7),
            Self::F5 => (4, 7),
            Self::F6 => (5, 7),
            Self::F8 => (6, 7),
            Self::F9 => (7, 7),
            Self::Backslash => (8, 7),
            Self::Right => (9, 7),
        }
    }
}

/// Key state plus the autoscan column counter.
pub struct KeyboardMatrix {
    /// `columns[c]` has bit `r` set while key (c, r) is down.
    columns: [u8; COLUMNS as usize],
    /// Startup links; bit 0 appears in column 9, bit 7 in column 2.
    links: u8,
    scan_column: u8,
}

impl KeyboardMatrix {
    #[must_use]
    pub fn new(links: u8) -> Self {
        Self {
            columns: [0; COLUMNS as usize],
            links,
            scan_column: 0,
        }
    }

    pub fn set_key(&mut self, column: u8, row: u8, pressed: bool) {
        if column >= COLUMNS || row >= ROWS {
            return;
        }
        let bits = &mut self.columns[usize::from(column)];
        if pressed {
            *bits |= 1 << row;
        } else {
            *bits &= !(1 << row);
        }
    }

    pub fn set(&mut self, key: BbcKey, pressed: bool) {
        let (column, row) = key.matrix();
        self.set_key(column, row, pressed);
    }

    pub fn release_all(&mut self) {
        self.columns = [0; COLUMNS as usize];
    }

    /// Level the addressed switch puts on PA7. Links read as closed
    /// switches.
    #[must_use]
    pub fn is_pressed(&self, column: u8, row: u8) -> bool {
        if column >= COLUMNS || row >= ROWS {
            return false;
        }
        if row == 0 && column >= 2 {
            return self.links & (1 << (9 - column)) != 0;
        }
        self.columns[usize::from(column)] & (1 << row) != 0
    }

    /// PA7 for the column and row the CPU drives on PA0-6.
    #[must_use]
    pub fn read_pa7(&self, port_a: u8) -> bool {
        self.is_pressed(port_a & 0x0F, (port_a >> 4) & 0x07)
    }

    /// A key in rows 1-7 of `column` is down.
    #[must_use]
    pub fn column_active(&self, column: u8) -> bool {
        column < COLUMNS && self.columns[usize::from(column)] & 0xFE != 0
    }

    /// Advance the autoscan counter one 1 MHz step.
    pub fn autoscan_tick(&mut self) {
        self.scan_column = (self.scan_column + 1) % COLUMNS;
    }

    #[must_use]
    pub fn scan_column(&self) -> u8 {
        self.scan_column
    }

    /// CA2 level: the autoscan column in autoscan mode, otherwise the
    /// column on PA0-3.
    #[must_use]
    pub fn ca2(&self, autoscan: bool, port_a: u8) -> bool {
        let column = if autoscan {
            self.scan_column
        } else {
            port_a & 0x0F
        };
        self.column_active(column)
    }
}

impl Default for KeyboardMatrix {
    fn default() -> Self {
        Self::new(0)
    }
}
