//! System VIA and the addressable latch (IC32).
//!
//! Port B bits 0-2 address one of eight latch bits and PB3 is the value
//! written to it. The latch gates the keyboard, selects the screen wrap
//! size for hardware scrolling and drives the sound, speech and LED lines
//! (stored but otherwise unused here).
//!
//! | Bit | Function                         |
//! |-----|----------------------------------|
//! | 0   | Sound chip write enable (low)    |
//! | 1   | Speech read select               |
//! | 2   | Speech write select              |
//! | 3   | Keyboard enable (low = CPU scan) |
//! | 4   | Screen wrap C0                   |
//! | 5   | Screen wrap C1                   |
//! | 6   | CAPS LOCK LED                    |
//! | 7   | SHIFT LOCK LED                   |

use mos_via_6522::Via6522;

use crate::keyboard::KeyboardMatrix;

/// Eight write-only latch bits addressed through port B.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressableLatch(u8);

impl AddressableLatch {
    /// Apply the bit write encoded in a port B value.
    pub fn update(&mut self, port_b: u8) {
        let bit = port_b & 0x07;
        if port_b & 0x08 != 0 {
            self.0 |= 1 << bit;
        } else {
            self.0 &= !(1 << bit);
        }
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Keyboard enable is high: the keyboard scans itself.
    #[must_use]
    pub const fn autoscan(self) -> bool {
        self.0 & 0x08 != 0
    }

    /// Bytes to subtract from a screen address past the top of RAM.
    #[must_use]
    pub const fn wrap_size(self) -> u16 {
        match (self.0 >> 4) & 0x03 {
            0b00 => 0x4000,
            0b01 => 0x2000,
            0b10 => 0x5000,
            _ => 0x2800,
        }
    }
}

/// The system VIA with its keyboard and latch wiring.
pub struct SystemVia {
    pub via: Via6522,
    pub latch: AddressableLatch,
    pub keyboard: KeyboardMatrix,
}

impl SystemVia {
    #[must_use]
    pub fn new(keyboard_links: u8) -> Self {
        Self {
            via: Via6522::new(),
            latch: AddressableLatch::default(),
            keyboard: KeyboardMatrix::new(keyboard_links),
        }
    }

    pub fn reset(&mut self) {
        self.via.reset();
        self.latch = AddressableLatch::default();
        self.refresh_inputs();
    }

    pub fn read(&mut self, reg: u8) -> u8 {
        self.refresh_inputs();
        self.via.read(reg)
    }

    pub fn write(&mut self, reg: u8, value: u8) {
        self.via.write(reg, value);
        // Port B and its direction register both change the pins.
        if matches!(reg & 0x0F, 0x00 | 0x02) {
            self.latch.update(self.via.port_b_output());
        }
        self.refresh_inputs();
    }

    /// One 1 MHz cycle. `vsync` is the CRTC VSYNC output on CA1.
    pub fn tick(&mut self, vsync: bool) {
        self.via.tick();
        if self.latch.autoscan() {
            self.keyboard.autoscan_tick();
        }
        self.via.set_ca1(vsync);
        self.refresh_inputs();
    }

    /// Recompute PA7 and CA2 from the key state.
    pub fn refresh_inputs(&mut self) {
        let port_a = self.via.port_a_output();
        let pa7 = if self.keyboard.read_pa7(port_a) { 0x80 } else { 0 };
        self.via.external_a = (port_a & 0x7F) | pa7;
        let ca2 = self.keyboard.ca2(self.latch.autoscan(), port_a);
        self.via.set_ca2(ca2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::BbcKey;
    use mos_via_6522::IFR_CA2;

    #[test]
    fn latch_bits_follow_port_b_writes() {
        let mut latch = AddressableLatch::default();
        latch.update(0x0B);
        assert!(latch.autoscan());
        latch.update(0x03);
        assert!(!latch.autoscan());
        latch.update(0x0C);
        latch.update(0x0D);
        assert_eq!(latch.wrap_size(), 0x2800);
        latch.update(0x04);
        assert_eq!(latch.wrap_size(), 0x5000);
    }

    #[test]
    fn cpu_scan_reads_key_on_pa7() {
        let mut sys = SystemVia::new(0);
        sys.write(0x02, 0x0F); // PB0-3 outputs
        sys.write(0x00, 0x03); // latch bit 3 low: CPU scan
        sys.write(0x03, 0x7F); // PA0-6 outputs
        sys.keyboard.set(BbcKey::Q, true);

        sys.write(0x0F, 0x10); // column 0, row 1
        assert_eq!(sys.read(0x0F) & 0x80, 0x80);
        sys.write(0x0F, 0x11);
        assert_eq!(sys.read(0x0F) & 0x80, 0x00);
    }

    #[test]
    fn autoscan_raises_ca2_interrupt() {
        let mut sys = SystemVia::new(0);
        sys.write(0x0C, 0x04); // CA2 positive edge input
        sys.write(0x02, 0x0F);
        sys.write(0x00, 0x0B); // autoscan
        sys.keyboard.set(BbcKey::Space, true);
        for _ in 0..10 {
            sys.tick(false);
        }
        assert_ne!(sys.via.ifr() & IFR_CA2, 0);
    }
}
