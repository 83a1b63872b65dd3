//! Cycle-accurate BBC Micro Model B emulator.
//!
//! The master clock ticks at 2 MHz, the rate of the CPU and the fast
//! video modes. The VIAs, ACIA, FDC and 1 MHz video modes act on every
//! other tick. One 50 Hz frame is 40,000 ticks.
//!
//! Frames leave the machine through an [`emu_core::FrameSlot`] and host
//! input arrives through an [`emu_core::EventQueue`]. Both can be shared
//! with other threads, so the tick loop never blocks on a display.

mod bbc;
mod bus;
pub mod capture;
pub mod config;
mod frame_sink;
mod irq;
mod keyboard;
pub mod keyboard_map;
mod pointer;
mod serial;
pub mod shm;
mod system_via;
pub mod vidproc;

pub use bbc::{Bbc, FRAMES_PER_SECOND, MASTER_HZ};
pub use bus::BbcBus;
pub use config::{BbcConfig, ConfigError, Roms, SidewaysRom};
pub use frame_sink::{FrameSink, MAX_FIELD_LINES};
pub use irq::{InterruptSource, IrqLines};
pub use keyboard::{BbcKey, KeyboardMatrix};
pub use pointer::AmxMouse;
pub use serial::{SerialPort, SerialUla};
pub use system_via::{AddressableLatch, SystemVia};
pub use vidproc::VideoUla;
