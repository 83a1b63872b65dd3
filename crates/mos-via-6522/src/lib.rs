//! MOS 6522 Versatile Interface Adapter (VIA).
//!
//! The 6522 provides two 8-bit I/O ports with handshake lines, two 16-bit
//! timers, a serial shift register, and an interrupt controller. The BBC
//! Micro carries two: the system VIA (keyboard, addressable latch, vertical
//! sync) and the user VIA (user port and printer).
//!
//! # Registers ($0-$F)
//!
//! | Reg | Name | Description                              |
//! |-----|------|------------------------------------------|
//! | $0  | ORB  | Port B data (handshake)                  |
//! | $1  | ORA  | Port A data (handshake)                  |
//! | $2  | DDRB | Port B data direction (1 = output)       |
//! | $3  | DDRA | Port A data direction (1 = output)       |
//! | $4  | T1CL | Timer 1 counter low (read clears T1 IRQ) |
//! | $5  | T1CH | Timer 1 counter high (write starts T1)   |
//! | $6  | T1LL | Timer 1 latch low                        |
//! | $7  | T1LH | Timer 1 latch high                       |
//! | $8  | T2CL | Timer 2 counter low (read clears T2 IRQ) |
//! | $9  | T2CH | Timer 2 counter high (write starts T2)   |
//! | $A  | SR   | Shift register                           |
//! | $B  | ACR  | Auxiliary control register               |
//! | $C  | PCR  | Peripheral control register              |
//! | $D  | IFR  | Interrupt flag register                  |
//! | $E  | IER  | Interrupt enable register                |
//! | $F  | ORA  | Port A data (no handshake)               |
//!
//! Control lines are modelled as levels: the owner calls `set_ca1` and
//! friends whenever an input changes and samples `ca2_output` /
//! `cb2_output` for the outputs.

#![allow(clippy::cast_possible_truncation)]

// IFR/IER bit masks
pub const IFR_CA2: u8 = 0x01;
pub const IFR_CA1: u8 = 0x02;
pub const IFR_SR: u8 = 0x04;
pub const IFR_CB2: u8 = 0x08;
pub const IFR_CB1: u8 = 0x10;
pub const IFR_T2: u8 = 0x20;
pub const IFR_T1: u8 = 0x40;

/// Behaviour of CA2 or CB2, decoded from a 3-bit PCR field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Input; `positive` selects the active edge. `independent` means port
    /// accesses do not clear the flag.
    Input { positive: bool, independent: bool },
    /// Output goes low on a port access and high on the next active C1 edge.
    Handshake,
    /// Output goes low for one cycle after a port access.
    Pulse,
    /// Output held at the given level.
    Manual(bool),
}

impl ControlMode {
    const fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0b000 => ControlMode::Input {
                positive: false,
                independent: false,
            },
            0b001 => ControlMode::Input {
                positive: false,
                independent: true,
            },
            0b010 => ControlMode::Input {
                positive: true,
                independent: false,
            },
            0b011 => ControlMode::Input {
                positive: true,
                independent: true,
            },
            0b100 => ControlMode::Handshake,
            0b101 => ControlMode::Pulse,
            0b110 => ControlMode::Manual(false),
            _ => ControlMode::Manual(true),
        }
    }

    const fn is_independent(self) -> bool {
        matches!(
            self,
            ControlMode::Input {
                independent: true,
                ..
            }
        )
    }
}

/// Shift register clocking, from ACR bits 4-2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShiftMode {
    Disabled,
    InT2,
    InPhi2,
    InExternal,
    FreeRunOutT2,
    OutT2,
    OutPhi2,
    OutExternal,
}

impl ShiftMode {
    const fn from_acr(acr: u8) -> Self {
        match (acr >> 2) & 0x07 {
            0b000 => ShiftMode::Disabled,
            0b001 => ShiftMode::InT2,
            0b010 => ShiftMode::InPhi2,
            0b011 => ShiftMode::InExternal,
            0b100 => ShiftMode::FreeRunOutT2,
            0b101 => ShiftMode::OutT2,
            0b110 => ShiftMode::OutPhi2,
            _ => ShiftMode::OutExternal,
        }
    }

    const fn is_output(self) -> bool {
        matches!(
            self,
            ShiftMode::FreeRunOutT2 | ShiftMode::OutT2 | ShiftMode::OutPhi2 | ShiftMode::OutExternal
        )
    }

    const fn uses_t2(self) -> bool {
        matches!(
            self,
            ShiftMode::InT2 | ShiftMode::FreeRunOutT2 | ShiftMode::OutT2
        )
    }
}

/// MOS 6522 Versatile Interface Adapter.
#[derive(Debug, Clone)]
pub struct Via6522 {
    /// Port A output register.
    ora: u8,
    /// Port B output register.
    orb: u8,
    /// Port A data direction register (1 = output).
    ddra: u8,
    /// Port B data direction register (1 = output).
    ddrb: u8,
    /// External input lines for port A. Undriven lines float high.
    pub external_a: u8,
    /// External input lines for port B.
    pub external_b: u8,
    /// Port A inputs captured on the last active CA1 edge.
    latched_a: u8,
    /// Port B inputs captured on the last active CB1 edge.
    latched_b: u8,

    timer1_counter: u16,
    timer1_latch: u16,
    /// Timer 1 will raise its flag at the next underflow.
    timer1_armed: bool,
    /// PB7 level when timer 1 drives it.
    pb7_output: bool,

    timer2_counter: u16,
    /// Timer 2 latch low byte (only the low byte is latched).
    timer2_latch_lo: u8,
    timer2_armed: bool,
    /// PB6 level at the previous tick, for pulse counting.
    pb6_prev: bool,

    shift_register: u8,
    /// Bits shifted since the last SR access.
    shift_count: u8,
    shift_running: bool,
    /// Divider for T2-clocked shifting.
    shift_timer: u8,

    /// Auxiliary control register.
    /// Bits 7-6: T1 control (bit 6 = free-run, bit 7 = PB7 output)
    /// Bit 5: T2 control (0 = timed, 1 = count PB6 pulses)
    /// Bits 4-2: shift register control
    /// Bit 1: PB latching enable
    /// Bit 0: PA latching enable
    acr: u8,
    /// Peripheral control register.
    /// Bits 7-5: CB2 control
    /// Bit 4: CB1 edge (0 = negative, 1 = positive)
    /// Bits 3-1: CA2 control
    /// Bit 0: CA1 edge (0 = negative, 1 = positive)
    pcr: u8,
    ifr: u8,
    ier: u8,

    ca1: bool,
    ca2: bool,
    cb1: bool,
    cb2: bool,
    /// CA2 level when CA2 is an output.
    ca2_out: bool,
    /// CB2 level when CB2 is an output.
    cb2_out: bool,
    /// A pulse-mode output is low and returns high on the next tick.
    ca2_pulse: bool,
    cb2_pulse: bool,
}

impl Via6522 {
    /// Create a new VIA with all registers in their reset state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ora: 0,
            orb: 0,
            ddra: 0,
            ddrb: 0,
            external_a: 0xFF,
            external_b: 0xFF,
            latched_a: 0xFF,
            latched_b: 0xFF,
            timer1_counter: 0xFFFF,
            timer1_latch: 0xFFFF,
            timer1_armed: false,
            pb7_output: true,
            timer2_counter: 0xFFFF,
            timer2_latch_lo: 0xFF,
            timer2_armed: false,
            pb6_prev: true,
            shift_register: 0,
            shift_count: 0,
            shift_running: false,
            shift_timer: 0,
            acr: 0,
            pcr: 0,
            ifr: 0,
            ier: 0,
            ca1: true,
            ca2: true,
            cb1: true,
            cb2: true,
            ca2_out: true,
            cb2_out: true,
            ca2_pulse: false,
            cb2_pulse: false,
        }
    }

    /// Hardware reset: clears the port, control and interrupt registers.
    /// Timer counters and latches and the shift register are unaffected.
    pub fn reset(&mut self) {
        self.ora = 0;
        self.orb = 0;
        self.ddra = 0;
        self.ddrb = 0;
        self.acr = 0;
        self.pcr = 0;
        self.ifr = 0;
        self.ier = 0;
        self.timer1_armed = false;
        self.timer2_armed = false;
        self.shift_running = false;
        self.ca2_out = true;
        self.cb2_out = true;
        self.ca2_pulse = false;
        self.cb2_pulse = false;
    }

    /// Advance the VIA by one phi2 cycle.
    pub fn tick(&mut self) {
        if self.ca2_pulse {
            self.ca2_pulse = false;
            self.ca2_out = true;
        }
        if self.cb2_pulse {
            self.cb2_pulse = false;
            self.cb2_out = true;
        }
        self.tick_timer1();
        self.tick_timer2();
        self.tick_shift();
    }

    /// An enabled interrupt flag is set.
    #[must_use]
    pub fn irq_active(&self) -> bool {
        (self.ifr & self.ier & 0x7F) != 0
    }

    /// Read a VIA register.
    pub fn read(&mut self, reg: u8) -> u8 {
        match reg & 0x0F {
            0x00 => {
                self.clear_port_flags(IFR_CB1, IFR_CB2, self.cb2_mode());
                self.read_port_b()
            }
            0x01 => {
                self.clear_port_flags(IFR_CA1, IFR_CA2, self.ca2_mode());
                self.ca2_handshake();
                self.read_port_a()
            }
            0x02 => self.ddrb,
            0x03 => self.ddra,
            0x04 => {
                self.ifr &= !IFR_T1;
                self.timer1_counter as u8
            }
            0x05 => (self.timer1_counter >> 8) as u8,
            0x06 => self.timer1_latch as u8,
            0x07 => (self.timer1_latch >> 8) as u8,
            0x08 => {
                self.ifr &= !IFR_T2;
                self.timer2_counter as u8
            }
            0x09 => (self.timer2_counter >> 8) as u8,
            0x0A => {
                self.start_shift();
                self.shift_register
            }
            0x0B => self.acr,
            0x0C => self.pcr,
            0x0D => {
                let any = if self.irq_active() { 0x80 } else { 0 };
                (self.ifr & 0x7F) | any
            }
            0x0E => self.ier | 0x80,
            _ => self.read_port_a(),
        }
    }

    /// Write a VIA register.
    pub fn write(&mut self, reg: u8, value: u8) {
        match reg & 0x0F {
            0x00 => {
                self.clear_port_flags(IFR_CB1, IFR_CB2, self.cb2_mode());
                self.orb = value;
                self.cb2_handshake();
            }
            0x01 => {
                self.clear_port_flags(IFR_CA1, IFR_CA2, self.ca2_mode());
                self.ora = value;
                self.ca2_handshake();
            }
            0x02 => self.ddrb = value,
            0x03 => self.ddra = value,
            0x04 | 0x06 => {
                self.timer1_latch = (self.timer1_latch & 0xFF00) | u16::from(value);
            }
            0x05 => {
                self.timer1_latch = (self.timer1_latch & 0x00FF) | (u16::from(value) << 8);
                self.timer1_counter = self.timer1_latch;
                self.timer1_armed = true;
                self.ifr &= !IFR_T1;
                if self.acr & 0x80 != 0 {
                    self.pb7_output = false;
                }
            }
            0x07 => {
                self.timer1_latch = (self.timer1_latch & 0x00FF) | (u16::from(value) << 8);
                self.ifr &= !IFR_T1;
            }
            0x08 => self.timer2_latch_lo = value,
            0x09 => {
                self.timer2_counter = u16::from_le_bytes([self.timer2_latch_lo, value]);
                self.timer2_armed = true;
                self.ifr &= !IFR_T2;
            }
            0x0A => {
                self.shift_register = value;
                self.start_shift();
            }
            0x0B => {
                // Entering PB7 mode drives PB7 from the toggle, high until T1 starts.
                if value & 0x80 != 0 && self.acr & 0x80 == 0 {
                    self.pb7_output = true;
                }
                self.acr = value;
                if ShiftMode::from_acr(value) == ShiftMode::Disabled {
                    self.shift_running = false;
                }
            }
            0x0C => {
                self.pcr = value;
                if let ControlMode::Manual(level) = self.ca2_mode() {
                    self.ca2_out = level;
                }
                if let ControlMode::Manual(level) = self.cb2_mode() {
                    self.cb2_out = level;
                }
            }
            // Bit 7 is computed, never stored.
            0x0D => self.ifr &= !(value & 0x7F),
            0x0E => {
                if value & 0x80 != 0 {
                    self.ier |= value & 0x7F;
                } else {
                    self.ier &= !(value & 0x7F);
                }
            }
            _ => self.ora = value,
        }
    }

    /// Drive the CA1 input. Sets the CA1 flag on the edge chosen by PCR
    /// bit 0 and latches port A when ACR bit 0 is set.
    pub fn set_ca1(&mut self, level: bool) {
        let positive = self.pcr & 0x01 != 0;
        if is_active_edge(self.ca1, level, positive) {
            self.ifr |= IFR_CA1;
            if self.acr & 0x01 != 0 {
                self.latched_a = self.external_a;
            }
            if self.ca2_mode() == ControlMode::Handshake {
                self.ca2_out = true;
            }
        }
        self.ca1 = level;
    }

    /// Drive the CA2 input. Ignored while CA2 is an output.
    pub fn set_ca2(&mut self, level: bool) {
        if let ControlMode::Input { positive, .. } = self.ca2_mode()
            && is_active_edge(self.ca2, level, positive)
        {
            self.ifr |= IFR_CA2;
        }
        self.ca2 = level;
    }

    /// Drive the CB1 input. Also the external shift clock.
    pub fn set_cb1(&mut self, level: bool) {
        let positive = self.pcr & 0x10 != 0;
        if is_active_edge(self.cb1, level, positive) {
            self.ifr |= IFR_CB1;
            if self.acr & 0x02 != 0 {
                self.latched_b = self.external_b;
            }
            if self.cb2_mode() == ControlMode::Handshake {
                self.cb2_out = true;
            }
        }
        let mode = ShiftMode::from_acr(self.acr);
        if matches!(mode, ShiftMode::InExternal | ShiftMode::OutExternal) && !self.cb1 && level {
            self.shift_bit(mode);
        }
        self.cb1 = level;
    }

    /// Drive the CB2 input. Also the shift-in data line.
    pub fn set_cb2(&mut self, level: bool) {
        if let ControlMode::Input { positive, .. } = self.cb2_mode()
            && is_active_edge(self.cb2, level, positive)
        {
            self.ifr |= IFR_CB2;
        }
        self.cb2 = level;
    }

    /// Port A pin levels driven by the VIA (input bits read as 0).
    #[must_use]
    pub fn port_a_output(&self) -> u8 {
        self.ora & self.ddra
    }

    /// Port B pin levels driven by the VIA. With ACR bit 7 set, bit 7 is
    /// the timer 1 output.
    #[must_use]
    pub fn port_b_output(&self) -> u8 {
        let mut out = self.orb & self.ddrb;
        if self.acr & 0x80 != 0 {
            out = (out & 0x7F) | if self.pb7_output { 0x80 } else { 0 };
        }
        out
    }

    /// CA2 level. Inputs read high.
    #[must_use]
    pub fn ca2_output(&self) -> bool {
        match self.ca2_mode() {
            ControlMode::Input { .. } => true,
            _ => self.ca2_out,
        }
    }

    /// CB2 level. The shift register drives CB2 in its output modes.
    #[must_use]
    pub fn cb2_output(&self) -> bool {
        if ShiftMode::from_acr(self.acr).is_output() {
            return self.cb2_out;
        }
        match self.cb2_mode() {
            ControlMode::Input { .. } => true,
            _ => self.cb2_out,
        }
    }

    #[must_use]
    pub fn ifr(&self) -> u8 {
        self.ifr
    }

    #[must_use]
    pub fn ier(&self) -> u8 {
        self.ier
    }

    #[must_use]
    pub fn acr(&self) -> u8 {
        self.acr
    }

    #[must_use]
    pub fn pcr(&self) -> u8 {
        self.pcr
    }

    #[must_use]
    pub fn timer1_counter(&self) -> u16 {
        self.timer1_counter
    }

    #[must_use]
    pub fn timer2_counter(&self) -> u16 {
        self.timer2_counter
    }

    #[must_use]
    pub fn ca2_mode(&self) -> ControlMode {
        ControlMode::from_bits(self.pcr >> 1)
    }

    #[must_use]
    pub fn cb2_mode(&self) -> ControlMode {
        ControlMode::from_bits(self.pcr >> 5)
    }

    // --- Internal helpers ---

    fn clear_port_flags(&mut self, c1: u8, c2: u8, mode: ControlMode) {
        self.ifr &= !c1;
        if !mode.is_independent() {
            self.ifr &= !c2;
        }
    }

    fn ca2_handshake(&mut self) {
        match self.ca2_mode() {
            ControlMode::Handshake => self.ca2_out = false,
            ControlMode::Pulse => {
                self.ca2_out = false;
                self.ca2_pulse = true;
            }
            _ => {}
        }
    }

    /// CB2 handshakes on ORB writes only.
    fn cb2_handshake(&mut self) {
        match self.cb2_mode() {
            ControlMode::Handshake => self.cb2_out = false,
            ControlMode::Pulse => {
                self.cb2_out = false;
                self.cb2_pulse = true;
            }
            _ => {}
        }
    }

    fn read_port_a(&self) -> u8 {
        let inputs = if self.acr & 0x01 != 0 {
            self.latched_a
        } else {
            self.external_a
        };
        (self.ora & self.ddra) | (inputs & !self.ddra)
    }

    fn read_port_b(&self) -> u8 {
        let inputs = if self.acr & 0x02 != 0 {
            self.latched_b
        } else {
            self.external_b
        };
        let mut value = (self.orb & self.ddrb) | (inputs & !self.ddrb);
        if self.acr & 0x80 != 0 {
            value = (value & 0x7F) | if self.pb7_output { 0x80 } else { 0 };
        }
        value
    }

    fn tick_timer1(&mut self) {
        let (next, underflow) = self.timer1_counter.overflowing_sub(1);
        self.timer1_counter = next;
        if !underflow {
            return;
        }

        let free_run = self.acr & 0x40 != 0;
        if self.timer1_armed {
            self.ifr |= IFR_T1;
            if self.acr & 0x80 != 0 {
                self.pb7_output = !self.pb7_output;
            }
            self.timer1_armed = free_run;
        }
        if free_run {
            self.timer1_counter = self.timer1_latch;
        }
    }

    fn tick_timer2(&mut self) {
        if self.acr & 0x20 != 0 {
            // Pulse counting: decrement on each falling edge of PB6.
            let pb6 = self.external_b & 0x40 != 0;
            let falling = self.pb6_prev && !pb6;
            self.pb6_prev = pb6;
            if !falling {
                return;
            }
        }

        let (next, underflow) = self.timer2_counter.overflowing_sub(1);
        self.timer2_counter = next;
        if underflow && self.timer2_armed {
            self.ifr |= IFR_T2;
            self.timer2_armed = false;
        }
    }

    fn start_shift(&mut self) {
        self.ifr &= !IFR_SR;
        self.shift_count = 0;
        self.shift_timer = self.timer2_latch_lo;
        self.shift_running = ShiftMode::from_acr(self.acr) != ShiftMode::Disabled;
    }

    fn tick_shift(&mut self) {
        if !self.shift_running {
            return;
        }
        let mode = ShiftMode::from_acr(self.acr);
        if mode.uses_t2() {
            if self.shift_timer > 0 {
                self.shift_timer -= 1;
                return;
            }
            self.shift_timer = self.timer2_latch_lo;
            self.shift_bit(mode);
        } else if matches!(mode, ShiftMode::InPhi2 | ShiftMode::OutPhi2) {
            self.shift_bit(mode);
        }
    }

    fn shift_bit(&mut self, mode: ShiftMode) {
        if !self.shift_running {
            return;
        }
        if mode.is_output() {
            let msb = self.shift_register & 0x80 != 0;
            self.shift_register = self.shift_register.rotate_left(1);
            self.cb2_out = msb;
        } else {
            self.shift_register = (self.shift_register << 1) | u8::from(self.cb2);
        }

        if mode == ShiftMode::FreeRunOutT2 {
            return;
        }
        self.shift_count += 1;
        if self.shift_count == 8 {
            self.shift_running = false;
            self.ifr |= IFR_SR;
        }
    }
}

impl Default for Via6522 {
    fn default() -> Self {
        Self::new()
    }
}

fn is_active_edge(previous: bool, level: bool, positive: bool) -> bool {
    if positive {
        !previous && level
    } else {
        previous && !level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started_timer1(latch: u16, acr: u8) -> Via6522 {
        let mut via = Via6522::new();
        via.write(0x0B, acr);
        via.write(0x04, latch as u8);
        via.write(0x05, (latch >> 8) as u8);
        via
    }

    #[test]
    fn timer1_one_shot_fires_once() {
        let mut via = started_timer1(3, 0x00);
        assert_eq!(via.timer1_counter(), 3);
        for _ in 0..3 {
            via.tick();
        }
        assert_eq!(via.ifr() & IFR_T1, 0);
        via.tick(); // 0 -> FFFF
        assert_ne!(via.ifr() & IFR_T1, 0);

        via.write(0x0D, IFR_T1);
        for _ in 0..0x10000 {
            via.tick();
        }
        assert_eq!(via.ifr() & IFR_T1, 0, "one-shot does not refire");
        assert_eq!(via.timer1_counter(), 0xFFFF, "counter keeps running");
    }

    #[test]
    fn timer1_free_run_reloads() {
        let mut via = started_timer1(2, 0x40);
        for _ in 0..3 {
            via.tick();
        }
        assert_ne!(via.ifr() & IFR_T1, 0);
        assert_eq!(via.timer1_counter(), 2);

        via.read(0x04);
        for _ in 0..3 {
            via.tick();
        }
        assert_ne!(via.ifr() & IFR_T1, 0, "refires every period");
    }

    #[test]
    fn timer1_drives_pb7() {
        let mut via = started_timer1(1, 0xC0);
        assert_eq!(via.port_b_output() & 0x80, 0, "PB7 low after start");
        via.tick();
        via.tick();
        assert_eq!(via.port_b_output() & 0x80, 0x80);
        via.tick();
        via.tick();
        assert_eq!(via.port_b_output() & 0x80, 0);
        assert_eq!(via.read(0x00) & 0x80, 0);
    }

    #[test]
    fn timer1_latch_write_does_not_start() {
        let mut via = Via6522::new();
        via.write(0x06, 0x10);
        via.write(0x07, 0x00);
        assert_eq!(via.timer1_counter(), 0xFFFF);
        assert_eq!(via.read(0x06), 0x10);
    }

    #[test]
    fn timer2_one_shot_and_read_clear() {
        let mut via = Via6522::new();
        via.write(0x08, 3);
        via.write(0x09, 0);
        for _ in 0..4 {
            via.tick();
        }
        assert_ne!(via.ifr() & IFR_T2, 0);
        let _ = via.read(0x08);
        assert_eq!(via.ifr() & IFR_T2, 0);
    }

    #[test]
    fn timer2_counts_pb6_pulses() {
        let mut via = Via6522::new();
        via.write(0x0B, 0x20);
        via.write(0x08, 1);
        via.write(0x09, 0);

        for _ in 0..10 {
            via.tick();
        }
        assert_eq!(via.timer2_counter(), 1, "no pulses, no count");

        for _ in 0..2 {
            via.external_b &= !0x40;
            via.tick();
            via.external_b |= 0x40;
            via.tick();
        }
        assert_ne!(via.ifr() & IFR_T2, 0);
    }

    #[test]
    fn ifr_bit7_reflects_enabled_flags_and_ignores_writes() {
        let mut via = Via6522::new();
        via.write(0x0E, 0x80 | IFR_CA1);
        via.write(0x0D, 0x80);
        via.set_ca1(false); // falling edge, PCR bit 0 clear
        assert_eq!(via.read(0x0D), 0x80 | IFR_CA1);
        assert!(via.irq_active());

        via.write(0x0D, 0x80);
        assert!(via.irq_active(), "bit 7 alone clears nothing");
        via.write(0x0D, IFR_CA1);
        assert!(!via.irq_active());
    }

    #[test]
    fn ier_set_clear_mode() {
        let mut via = Via6522::new();
        via.write(0x0E, 0x80 | IFR_T1 | IFR_CB1);
        via.write(0x0E, IFR_T1);
        assert_eq!(via.read(0x0E), 0x80 | IFR_CB1);
    }

    #[test]
    fn port_reads_merge_outputs_and_inputs() {
        let mut via = Via6522::new();
        via.write(0x03, 0x0F);
        via.write(0x0F, 0xAB);
        via.external_a = 0xC0;
        assert_eq!(via.read(0x0F), 0xCB);
        assert_eq!(via.port_a_output(), 0x0B);
    }

    #[test]
    fn port_a_latches_on_ca1() {
        let mut via = Via6522::new();
        via.write(0x0B, 0x01);
        via.write(0x0C, 0x01); // CA1 positive edge
        via.set_ca1(false);
        via.external_a = 0x5A;
        via.set_ca1(true);
        via.external_a = 0x00;
        assert_eq!(via.read(0x01), 0x5A);
    }

    #[test]
    fn port_b_latches_on_cb1() {
        let mut via = Via6522::new();
        via.write(0x0B, 0x02);
        via.external_b = 0x33;
        via.set_cb1(false);
        via.external_b = 0xFF;
        assert_eq!(via.read(0x00), 0x33);
    }

    #[test]
    fn port_access_clears_c2_unless_independent() {
        let mut via = Via6522::new();
        via.set_ca2(false);
        assert_ne!(via.ifr() & IFR_CA2, 0);
        let _ = via.read(0x01);
        assert_eq!(via.ifr() & IFR_CA2, 0);

        via.write(0x0C, 0b0000_0010); // CA2 independent, negative edge
        via.set_ca2(true);
        via.set_ca2(false);
        let _ = via.read(0x01);
        assert_ne!(via.ifr() & IFR_CA2, 0);
        let _ = via.read(0x0F);
        assert_ne!(via.ifr() & IFR_CA2, 0, "no-handshake read never clears");
    }

    #[test]
    fn ca2_positive_edge_input() {
        let mut via = Via6522::new();
        via.write(0x0C, 0b0000_0100);
        via.set_ca2(false);
        assert_eq!(via.ifr() & IFR_CA2, 0);
        via.set_ca2(true);
        assert_ne!(via.ifr() & IFR_CA2, 0);
    }

    #[test]
    fn ca2_handshake_output() {
        let mut via = Via6522::new();
        via.write(0x0C, 0b0000_1000);
        assert!(via.ca2_output());
        via.write(0x01, 0x00);
        assert!(!via.ca2_output());
        via.set_ca1(false);
        assert!(via.ca2_output(), "data taken on CA1");
    }

    #[test]
    fn cb2_pulse_output_lasts_one_cycle() {
        let mut via = Via6522::new();
        via.write(0x0C, 0b1010_0000);
        let _ = via.read(0x00);
        assert!(via.cb2_output(), "reads do not pulse CB2");
        via.write(0x00, 0x00);
        assert!(!via.cb2_output());
        via.tick();
        assert!(via.cb2_output());
    }

    #[test]
    fn manual_control_outputs() {
        let mut via = Via6522::new();
        via.write(0x0C, 0b1100_1100);
        assert!(!via.ca2_output());
        assert!(!via.cb2_output());
        via.write(0x0C, 0b1110_1110);
        assert!(via.ca2_output());
        assert!(via.cb2_output());
    }

    #[test]
    fn shift_out_under_phi2() {
        let mut via = Via6522::new();
        via.write(0x0B, 0b0001_1000);
        via.write(0x0A, 0b1010_0000);
        via.tick();
        assert!(via.cb2_output());
        via.tick();
        assert!(!via.cb2_output());
        for _ in 0..6 {
            via.tick();
        }
        assert_ne!(via.ifr() & IFR_SR, 0);
        assert_eq!(via.read(0x0A), 0b1010_0000, "eight rotations restore it");
    }

    #[test]
    fn shift_in_from_external_clock() {
        let mut via = Via6522::new();
        via.write(0x0B, 0b0000_1100);
        let _ = via.read(0x0A);
        for bit in [true, false, true, true, false, false, true, false] {
            via.set_cb2(bit);
            via.set_cb1(false);
            via.set_cb1(true);
        }
        assert_ne!(via.ifr() & IFR_SR, 0);
        assert_eq!(via.shift_register, 0b1011_0010);
    }

    #[test]
    fn free_running_shift_never_flags() {
        let mut via = Via6522::new();
        via.write(0x08, 0);
        via.write(0x0B, 0b0001_0000);
        via.write(0x0A, 0x81);
        for _ in 0..64 {
            via.tick();
        }
        assert_eq!(via.ifr() & IFR_SR, 0);
    }

    #[test]
    fn reset_clears_control_state() {
        let mut via = Via6522::new();
        via.write(0x0E, 0xFF);
        via.write(0x0B, 0xFF);
        via.reset();
        assert_eq!(via.ier(), 0);
        assert_eq!(via.acr(), 0);
        assert!(!via.irq_active());
    }
}
