//! Register file and processor status.

/// Status register bit masks.
pub mod flags {
    /// Carry.
    pub const C: u8 = 0x01;
    /// Zero.
    pub const Z: u8 = 0x02;
    /// IRQ disable.
    pub const I: u8 = 0x04;
    /// Decimal mode.
    pub const D: u8 = 0x08;
    /// Break. Exists only in the byte pushed by BRK and PHP.
    pub const B: u8 = 0x10;
    /// Unused, always reads as 1.
    pub const U: u8 = 0x20;
    /// Overflow.
    pub const V: u8 = 0x40;
    /// Negative.
    pub const N: u8 = 0x80;
}

use flags::{B, I, N, U, Z};

/// Processor status register (P).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status(pub u8);

impl Status {
    /// Status as restored by PLP/RTI: B is not a stored bit.
    #[must_use]
    pub const fn from_stack(value: u8) -> Self {
        Self((value | U) & !B)
    }

    /// Byte pushed by BRK and PHP.
    #[must_use]
    pub const fn pushed_by_software(self) -> u8 {
        self.0 | U | B
    }

    /// Byte pushed by IRQ and NMI.
    #[must_use]
    pub const fn pushed_by_hardware(self) -> u8 {
        (self.0 | U) & !B
    }

    #[must_use]
    pub const fn is_set(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    pub fn set_if(&mut self, flag: u8, condition: bool) {
        if condition {
            self.set(flag);
        } else {
            self.clear(flag);
        }
    }

    /// Set N and Z from a result byte.
    pub fn update_nz(&mut self, value: u8) {
        self.set_if(N, value & 0x80 != 0);
        self.set_if(Z, value == 0);
    }
}

/// The programmer-visible registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    /// Stack pointer; the stack lives in page 1.
    pub s: u8,
    pub pc: u16,
    pub p: Status,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    /// Values as if a reset sequence had just completed from S = $00.
    /// A, X and Y are really undefined.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            s: 0xFD,
            pc: 0,
            p: Status(U | I),
        }
    }

    /// Address for a push; decrements S.
    pub fn push(&mut self) -> u16 {
        let address = self.stack_addr();
        self.s = self.s.wrapping_sub(1);
        address
    }

    /// Address for a pull; increments S first.
    pub fn pull(&mut self) -> u16 {
        self.s = self.s.wrapping_add(1);
        self.stack_addr()
    }

    #[must_use]
    pub const fn stack_addr(&self) -> u16 {
        0x0100 | self.s as u16
    }
}
