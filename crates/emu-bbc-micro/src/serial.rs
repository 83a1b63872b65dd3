//! RS423 serial port: serial ULA clock selection plus the 6850 ACIA.
//!
//! The serial ULA (`FE10`, write-only) picks the transmit and receive
//! baud rates and supplies the ACIA with a clock of 64 times the baud
//! rate, matching the /64 divide the OS programs. Host bytes wait in a
//! bounded receive FIFO until the ACIA's receiver is free; transmitted
//! bytes go to a drop-oldest queue the host drains.

use std::collections::VecDeque;
use std::sync::Arc;

use emu_core::EventQueue;
use motorola_6850::Acia6850;
use tracing::warn;

/// Baud rate for each 3-bit selector.
pub const BAUD_RATES: [u32; 8] = [19_200, 1_200, 4_800, 150, 9_600, 300, 2_400, 75];

/// Clock the ULA feeds the ACIA, per baud.
const CLOCK_PER_BAUD: u32 = 64;

/// The ACIA and FDC run from the 1 MHz bus phase.
const ACIA_BUS_HZ: u32 = 1_000_000;

/// Serial ULA control register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerialUla(u8);

impl SerialUla {
    pub fn write(&mut self, value: u8) {
        self.0 = value;
    }

    #[must_use]
    pub const fn control(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn tx_baud(self) -> u32 {
        BAUD_RATES[(self.0 & 0x07) as usize]
    }

    #[must_use]
    pub const fn rx_baud(self) -> u32 {
        BAUD_RATES[((self.0 >> 3) & 0x07) as usize]
    }

    /// RS423 rather than cassette drives the ACIA.
    #[must_use]
    pub const fn rs423(self) -> bool {
        self.0 & 0x40 != 0
    }

    #[must_use]
    pub const fn cassette_motor(self) -> bool {
        self.0 & 0x80 != 0
    }
}

pub struct SerialPort {
    pub acia: Acia6850,
    pub ula: SerialUla,
    rx_fifo: VecDeque<u8>,
    rx_capacity: usize,
    rx_dropped: u64,
    output: Arc<EventQueue<u8>>,
}

impl SerialPort {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut port = Self {
            acia: Acia6850::new(ACIA_BUS_HZ),
            ula: SerialUla::default(),
            rx_fifo: VecDeque::with_capacity(capacity),
            rx_capacity: capacity.max(1),
            rx_dropped: 0,
            output: Arc::new(EventQueue::new(capacity)),
        };
        port.apply_clocks();
        port
    }

    pub fn reset(&mut self) {
        self.acia = Acia6850::new(ACIA_BUS_HZ);
        self.ula = SerialUla::default();
        self.rx_fifo.clear();
        self.apply_clocks();
    }

    /// Queue a byte arriving from the host. The oldest byte is dropped
    /// when the FIFO is full.
    pub fn receive(&mut self, byte: u8) {
        if self.rx_fifo.len() >= self.rx_capacity {
            self.rx_fifo.pop_front();
            self.rx_dropped += 1;
            if self.rx_dropped == 1 {
                warn!("serial receive FIFO full, dropping oldest bytes");
            }
        }
        self.rx_fifo.push_back(byte);
    }

    pub fn write_ula(&mut self, value: u8) {
        self.ula.write(value);
        self.apply_clocks();
    }

    /// One 1 MHz cycle.
    pub fn tick(&mut self) {
        if self.acia.receiver_idle()
            && let Some(&byte) = self.rx_fifo.front()
            && self.acia.receive(byte)
        {
            self.rx_fifo.pop_front();
        }
        self.acia.tick();
        if let Some(byte) = self.acia.take_transmitted() {
            self.output.push(byte);
        }
    }

    /// Bytes the machine has transmitted.
    #[must_use]
    pub fn output(&self) -> Arc<EventQueue<u8>> {
        Arc::clone(&self.output)
    }

    #[must_use]
    pub fn rx_pending(&self) -> usize {
        self.rx_fifo.len()
    }

    fn apply_clocks(&mut self) {
        self.acia.set_clocks(
            self.ula.tx_baud() * CLOCK_PER_BAUD,
            self.ula.rx_baud() * CLOCK_PER_BAUD,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ula_selects_independent_rates() {
        let mut ula = SerialUla::default();
        ula.write(0x64);
        assert_eq!(ula.tx_baud(), 9_600);
        assert_eq!(ula.rx_baud(), 19_200);
        assert!(ula.rs423());
        assert!(!ula.cassette_motor());
    }

    #[test]
    fn transmitted_byte_reaches_output_queue() {
        let mut port = SerialPort::new(16);
        // 19200 baud both ways, /64, 8N1.
        port.write_ula(0x40);
        port.acia.write(0, 0x03);
        port.acia.write(0, 0x16);
        port.acia.write(1, b'A');
        let output = port.output();
        for _ in 0..2_000 {
            port.tick();
        }
        assert_eq!(output.pop(), Some(b'A'));
        assert_eq!(output.pop(), None);
    }

    #[test]
    fn received_bytes_wait_for_the_receiver() {
        let mut port = SerialPort::new(16);
        port.write_ula(0x40);
        port.acia.write(0, 0x03);
        port.acia.write(0, 0x16);
        port.receive(b'x');
        port.receive(b'y');

        let mut got = Vec::new();
        for _ in 0..4_000 {
            port.tick();
            if port.acia.status() & motorola_6850::STATUS_RDRF != 0 {
                got.push(port.acia.read(1));
            }
        }
        assert_eq!(got, b"xy");
        assert_eq!(port.rx_pending(), 0);
    }

    #[test]
    fn full_fifo_drops_oldest() {
        let mut port = SerialPort::new(2);
        port.receive(1);
        port.receive(2);
        port.receive(3);
        assert_eq!(port.rx_pending(), 2);
        assert_eq!(port.rx_fifo.front(), Some(&2));
    }
}
