//! Motorola 6850 Asynchronous Communications Interface Adapter (ACIA).
//!
//! A UART with one transmit data register, one receive data register and a
//! shift register behind each. Bit timing comes from external transmit and
//! receive clocks divided by 1, 16 or 64.
//!
//! # Registers
//!
//! | RS | Read            | Write           |
//! |----|-----------------|-----------------|
//! | 0  | Status          | Control         |
//! | 1  | Receive data    | Transmit data   |
//!
//! # Standalone IC
//!
//! No dependencies. The owner ticks the ACIA at its bus rate, supplies the
//! clock frequencies, feeds received bytes with [`Acia6850::receive`] when
//! [`Acia6850::receiver_idle`] and collects finished bytes from
//! [`Acia6850::take_transmitted`]. Bytes move whole: the line itself is not
//! modelled, so framing and parity errors never occur.

/// Receive data register full.
pub const STATUS_RDRF: u8 = 0x01;
/// Transmit data register empty.
pub const STATUS_TDRE: u8 = 0x02;
/// Data carrier lost.
pub const STATUS_DCD: u8 = 0x04;
/// Clear-to-send input high (transmitter inhibited).
pub const STATUS_CTS: u8 = 0x08;
/// Framing error.
pub const STATUS_FE: u8 = 0x10;
/// Receiver overrun.
pub const STATUS_OVRN: u8 = 0x20;
/// Parity error.
pub const STATUS_PE: u8 = 0x40;
/// Interrupt request.
pub const STATUS_IRQ: u8 = 0x80;

/// Frame layout from control bits 4-2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordFormat {
    pub data_bits: u8,
    pub parity: bool,
    pub stop_bits: u8,
}

impl WordFormat {
    #[must_use]
    pub const fn from_control(control: u8) -> Self {
        let (data_bits, parity, stop_bits) = match (control >> 2) & 0x07 {
            0b000 | 0b001 => (7, true, 2),
            0b010 | 0b011 => (7, true, 1),
            0b100 => (8, false, 2),
            0b101 => (8, false, 1),
            _ => (8, true, 1),
        };
        Self {
            data_bits,
            parity,
            stop_bits,
        }
    }

    /// Bits on the line per character, including start and stop bits.
    #[must_use]
    pub const fn frame_bits(self) -> u32 {
        1 + self.data_bits as u32 + self.parity as u32 + self.stop_bits as u32
    }
}

/// Motorola 6850 ACIA.
#[derive(Debug, Clone)]
pub struct Acia6850 {
    control: u8,
    /// Held in master reset (control bits 1-0 = 11).
    in_reset: bool,

    tdr: u8,
    tdr_full: bool,
    /// Byte in the transmit shift register.
    tx_shift: Option<u8>,
    /// Clock edges until the transmit shift register empties.
    tx_edges: u32,
    tx_phase: u32,
    transmitted: Option<u8>,

    rdr: u8,
    rdrf: bool,
    overrun: bool,
    rx_shift: Option<u8>,
    rx_edges: u32,
    rx_phase: u32,

    /// DCD input high (no carrier).
    dcd_input: bool,
    /// Loss of carrier seen; cleared by reading status then data.
    dcd_latched: bool,
    status_read: bool,
    /// CTS input high.
    cts_input: bool,

    bus_hz: u32,
    tx_clock_hz: u32,
    rx_clock_hz: u32,
}

impl Acia6850 {
    /// A new ACIA clocked by a bus of `bus_hz`. It powers up in master
    /// reset.
    #[must_use]
    pub fn new(bus_hz: u32) -> Self {
        Self {
            control: 0x03,
            in_reset: true,
            tdr: 0,
            tdr_full: false,
            tx_shift: None,
            tx_edges: 0,
            tx_phase: 0,
            transmitted: None,
            rdr: 0,
            rdrf: false,
            overrun: false,
            rx_shift: None,
            rx_edges: 0,
            rx_phase: 0,
            dcd_input: false,
            dcd_latched: false,
            status_read: false,
            cts_input: false,
            bus_hz: bus_hz.max(1),
            tx_clock_hz: 0,
            rx_clock_hz: 0,
        }
    }

    /// Set the external transmit and receive clock inputs.
    pub fn set_clocks(&mut self, tx_clock_hz: u32, rx_clock_hz: u32) {
        self.tx_clock_hz = tx_clock_hz;
        self.rx_clock_hz = rx_clock_hz;
    }

    pub fn read(&mut self, reg: u8) -> u8 {
        if reg & 1 == 0 {
            self.status_read = true;
            return self.status();
        }
        self.rdrf = false;
        self.overrun = false;
        if self.status_read {
            self.dcd_latched = false;
        }
        self.status_read = false;
        self.rdr
    }

    pub fn write(&mut self, reg: u8, value: u8) {
        if reg & 1 == 1 {
            self.tdr = value;
            self.tdr_full = true;
            return;
        }
        if value & 0x03 == 0x03 {
            self.master_reset();
        } else {
            self.in_reset = false;
        }
        self.control = value;
    }

    /// Status register value, without read side effects.
    #[must_use]
    pub fn status(&self) -> u8 {
        let mut status = 0;
        if self.rdrf {
            status |= STATUS_RDRF;
        }
        if self.tdre() {
            status |= STATUS_TDRE;
        }
        if self.dcd_input || self.dcd_latched {
            status |= STATUS_DCD;
        }
        if self.cts_input {
            status |= STATUS_CTS;
        }
        if self.overrun {
            status |= STATUS_OVRN;
        }
        if self.irq_active() {
            status |= STATUS_IRQ;
        }
        status
    }

    #[must_use]
    pub fn control(&self) -> u8 {
        self.control
    }

    #[must_use]
    pub fn word_format(&self) -> WordFormat {
        WordFormat::from_control(self.control)
    }

    /// Clock divide ratio from control bits 1-0.
    #[must_use]
    pub fn divide(&self) -> u32 {
        match self.control & 0x03 {
            0b00 => 1,
            0b01 => 16,
            _ => 64,
        }
    }

    #[must_use]
    pub fn irq_active(&self) -> bool {
        if self.in_reset {
            return false;
        }
        let rx = self.control & 0x80 != 0 && (self.rdrf || self.overrun || self.dcd_latched);
        let tx = (self.control >> 5) & 0x03 == 0b01 && self.tdre();
        rx || tx
    }

    /// RTS output asserted (pin low).
    #[must_use]
    pub fn rts(&self) -> bool {
        (self.control >> 5) & 0x03 != 0b10
    }

    pub fn set_dcd(&mut self, high: bool) {
        if high && !self.dcd_input {
            self.dcd_latched = true;
        }
        self.dcd_input = high;
    }

    pub fn set_cts(&mut self, high: bool) {
        self.cts_input = high;
    }

    /// The receive shift register can take another byte.
    #[must_use]
    pub fn receiver_idle(&self) -> bool {
        !self.in_reset && self.rx_shift.is_none()
    }

    /// Start shifting in `byte`. Returns false if the receiver is busy or
    /// held in reset.
    pub fn receive(&mut self, byte: u8) -> bool {
        if !self.receiver_idle() {
            return false;
        }
        self.rx_shift = Some(byte);
        self.rx_edges = self.frame_edges();
        true
    }

    /// A byte that has finished transmitting, if any.
    pub fn take_transmitted(&mut self) -> Option<u8> {
        self.transmitted.take()
    }

    /// Advance one bus cycle.
    pub fn tick(&mut self) {
        if self.in_reset {
            return;
        }

        if self.tx_shift.is_none() && self.tdr_full && !self.cts_input {
            self.tx_shift = Some(self.tdr);
            self.tdr_full = false;
            self.tx_edges = self.frame_edges();
        }
        if self.tx_shift.is_some() {
            let edges = advance(&mut self.tx_phase, self.tx_clock_hz, self.bus_hz);
            self.tx_edges = self.tx_edges.saturating_sub(edges);
            if self.tx_edges == 0 {
                let mask = self.data_mask();
                self.transmitted = self.tx_shift.take().map(|byte| byte & mask);
            }
        }

        if self.rx_shift.is_some() {
            let edges = advance(&mut self.rx_phase, self.rx_clock_hz, self.bus_hz);
            self.rx_edges = self.rx_edges.saturating_sub(edges);
            if self.rx_edges == 0
                && let Some(byte) = self.rx_shift.take()
            {
                if self.rdrf {
                    self.overrun = true;
                } else {
                    self.rdr = byte & self.data_mask();
                    self.rdrf = true;
                }
            }
        }
    }

    fn tdre(&self) -> bool {
        !self.tdr_full && !self.cts_input
    }

    fn data_mask(&self) -> u8 {
        if self.word_format().data_bits == 7 {
            0x7F
        } else {
            0xFF
        }
    }

    fn frame_edges(&self) -> u32 {
        self.word_format().frame_bits() * self.divide()
    }

    fn master_reset(&mut self) {
        self.in_reset = true;
        self.tdr_full = false;
        self.tx_shift = None;
        self.transmitted = None;
        self.rx_shift = None;
        self.rdrf = false;
        self.overrun = false;
        self.dcd_latched = false;
        self.status_read = false;
        self.tx_phase = 0;
        self.rx_phase = 0;
    }
}

/// Clock edges of a `clock_hz` signal during one `bus_hz` cycle, carrying
/// the remainder in `phase`.
fn advance(phase: &mut u32, clock_hz: u32, bus_hz: u32) -> u32 {
    let total = u64::from(*phase) + u64::from(clock_hz);
    let edges = total / u64::from(bus_hz);
    *phase = u32::try_from(total % u64::from(bus_hz)).unwrap_or(0);
    u32::try_from(edges).unwrap_or(u32::MAX)
}
