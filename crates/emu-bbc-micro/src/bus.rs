//! BBC Micro bus: memory map and SHEILA I/O routing.
//!
//! Implements `emu_core::Bus` for the CPU. The map is fixed apart from the
//! sideways ROM bank selected through ROMSEL.
//!
//! | Range       | Device                                    |
//! |-------------|-------------------------------------------|
//! | `0000-7FFF` | RAM                                       |
//! | `8000-BFFF` | Sideways ROM bank (ROMSEL `FE30`)         |
//! | `C000-FBFF` | OS ROM                                    |
//! | `FC00-FCFF` | FRED (open bus)                           |
//! | `FD00-FDFF` | JIM (open bus)                            |
//! | `FE00-FEFF` | SHEILA                                    |
//! | `FF00-FFFF` | OS ROM                                    |
//!
//! SHEILA devices on the 1 MHz bus (CRTC, ACIA, serial ULA, VIAs, FDC,
//! ADLC, ADC) stretch the CPU clock so the access lines up with the
//! 1 MHz phase.

use emu_core::Bus;
use intel_8271::{FdcConfig, Fdc8271};
use mos_via_6522::Via6522;
use motorola_6845::Crtc6845;
use tracing::warn;

use crate::config::{ROM_SIZE, Roms, SIDEWAYS_SLOTS, rom_bank};
use crate::irq::{InterruptSource, IrqLines};
use crate::pointer::AmxMouse;
use crate::serial::SerialPort;
use crate::system_via::SystemVia;
use crate::vidproc::VideoUla;

/// Value read from addresses nothing drives.
pub const OPEN_BUS: u8 = 0xFE;

pub const RAM_SIZE: usize = 0x8000;

type RomBank = Box<[u8; ROM_SIZE]>;

/// The BBC bus, implementing `emu_core::Bus`.
///
/// Owns every device. The CPU reaches them through the `Bus` trait; the
/// machine ticks them directly.
pub struct BbcBus {
    pub ram: Box<[u8; RAM_SIZE]>,
    os_rom: RomBank,
    sideways: [Option<RomBank>; SIDEWAYS_SLOTS as usize],
    romsel: u8,
    pub crtc: Crtc6845,
    pub ula: VideoUla,
    pub system_via: SystemVia,
    pub user_via: Via6522,
    pub mouse: AmxMouse,
    pub serial: SerialPort,
    pub fdc: Fdc8271,
    open_bus_accesses: u64,
    /// CPU ticks still to skip for a 1 MHz access.
    pub stretch: u8,
    /// The current tick is on the 1 MHz phase.
    pub odd_tick: bool,
}

impl BbcBus {
    #[must_use]
    pub fn new(roms: &Roms, fdc: FdcConfig, keyboard_links: u8, serial_capacity: usize) -> Self {
        let mut sideways: [Option<RomBank>; SIDEWAYS_SLOTS as usize] = Default::default();
        for (slot, image) in &roms.sideways {
            sideways[usize::from(slot & 0x0F)] = Some(rom_bank(image));
        }
        Self {
            ram: Box::new([0; RAM_SIZE]),
            os_rom: rom_bank(&roms.os),
            sideways,
            romsel: 0,
            crtc: Crtc6845::new(),
            ula: VideoUla::new(),
            system_via: SystemVia::new(keyboard_links),
            user_via: Via6522::new(),
            mouse: AmxMouse::new(),
            serial: SerialPort::new(serial_capacity),
            fdc: Fdc8271::new(fdc),
            open_bus_accesses: 0,
            stretch: 0,
            odd_tick: false,
        }
    }

    /// Power-on state for everything on the bus. Disks stay inserted.
    pub fn reset(&mut self) {
        self.ram.fill(0);
        self.romsel = 0;
        self.crtc = Crtc6845::new();
        self.ula.reset();
        self.system_via.reset();
        self.reset_peripherals();
        self.stretch = 0;
    }

    /// Devices on the CPU reset line other than the system VIA.
    pub fn reset_peripherals(&mut self) {
        self.user_via.reset();
        self.mouse = AmxMouse::new();
        self.serial.reset();
        self.fdc.reset();
    }

    /// Clock the 1 MHz devices.
    pub fn tick_slow(&mut self) {
        self.system_via.tick(self.crtc.vsync());
        self.user_via.tick();
        self.mouse.tick(&mut self.user_via);
        self.serial.tick();
        self.fdc.tick();
    }

    /// Interrupt outputs as they stand now.
    #[must_use]
    pub fn interrupt_lines(&self) -> IrqLines {
        let mut lines = IrqLines::empty();
        lines.set(InterruptSource::SystemVia, self.system_via.via.irq_active());
        lines.set(InterruptSource::UserVia, self.user_via.irq_active());
        lines.set(InterruptSource::Acia, self.serial.acia.irq_active());
        lines.set(InterruptSource::Fdc, self.fdc.nmi_active());
        lines
    }

    #[must_use]
    pub fn romsel(&self) -> u8 {
        self.romsel
    }

    #[must_use]
    pub fn open_bus_accesses(&self) -> u64 {
        self.open_bus_accesses
    }

    /// Memory contents without side effects. I/O reads as open bus.
    #[must_use]
    pub fn peek(&self, address: u16) -> u8 {
        match address {
            0x0000..=0x7FFF => self.ram[usize::from(address)],
            0x8000..=0xBFFF => self.sideways[usize::from(self.romsel)]
                .as_ref()
                .map_or(OPEN_BUS, |rom| rom[usize::from(address - 0x8000)]),
            0xC000..=0xFBFF | 0xFF00..=0xFFFF => self.os_rom[usize::from(address - 0xC000)],
            _ => OPEN_BUS,
        }
    }

    /// Store to RAM without side effects. Other addresses are ignored.
    pub fn poke(&mut self, address: u16, value: u8) {
        if let Some(byte) = self.ram.get_mut(usize::from(address)) {
            *byte = value;
        }
    }

    fn open_bus(&mut self, address: u16) -> u8 {
        self.open_bus_accesses += 1;
        if self.open_bus_accesses == 1 {
            warn!("open bus access at {address:#06X}");
        }
        OPEN_BUS
    }

    /// Lose CPU ticks until the 1 MHz phase.
    fn stretch_cpu(&mut self) {
        self.stretch = if self.odd_tick { 1 } else { 2 };
    }

    fn read_sheila(&mut self, address: u16) -> u8 {
        let offset = (address & 0xFF) as u8;
        if is_one_megahertz(offset) {
            self.stretch_cpu();
        }
        match offset {
            0x00..=0x07 => {
                if offset & 1 == 1 {
                    self.crtc.read_data()
                } else {
                    0
                }
            }
            0x08..=0x0F => self.serial.acia.read(offset & 1),
            // Serial ULA, video ULA and ROMSEL are write-only.
            0x10..=0x3F => OPEN_BUS,
            0x40..=0x5F => self.system_via.read(offset & 0x0F),
            0x60..=0x7F => self.user_via.read(offset & 0x0F),
            0x80..=0x9F => self.fdc.read(offset & 0x07),
            _ => self.open_bus(address),
        }
    }

    fn write_sheila(&mut self, address: u16, value: u8) {
        let offset = (address & 0xFF) as u8;
        if is_one_megahertz(offset) {
            self.stretch_cpu();
        }
        match offset {
            0x00..=0x07 => {
                if offset & 1 == 1 {
                    self.crtc.write_data(value);
                } else {
                    self.crtc.write_address(value);
                }
            }
            0x08..=0x0F => self.serial.acia.write(offset & 1, value),
            0x10..=0x1F => self.serial.write_ula(value),
            0x20..=0x2F => self.ula.write(offset & 0x0F, value),
            0x30..=0x3F => self.romsel = value & 0x0F,
            0x40..=0x5F => self.system_via.write(offset & 0x0F, value),
            0x60..=0x7F => self.user_via.write(offset & 0x0F, value),
            0x80..=0x9F => self.fdc.write(offset & 0x07, value),
            _ => {
                self.open_bus(address);
            }
        }
    }
}

/// SHEILA offsets served by the 1 MHz bus.
const fn is_one_megahertz(offset: u8) -> bool {
    matches!(offset, 0x00..=0x1F | 0x40..=0xDF)
}

impl Bus for BbcBus {
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0x0000..=0x7FFF => self.ram[usize::from(address)],
            0x8000..=0xBFFF => match &self.sideways[usize::from(self.romsel)] {
                Some(rom) => rom[usize::from(address - 0x8000)],
                None => self.open_bus(address),
            },
            0xC000..=0xFBFF | 0xFF00..=0xFFFF => self.os_rom[usize::from(address - 0xC000)],
            0xFC00..=0xFDFF => self.open_bus(address),
            _ => self.read_sheila(address),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x7FFF => self.ram[usize::from(address)] = value,
            0x8000..=0xFBFF | 0xFF00..=0xFFFF => {}
            0xFC00..=0xFDFF => {
                self.open_bus(address);
            }
            _ => self.write_sheila(address, value),
        }
    }
}
