//! Remote framebuffer (VNC) server for emulated machines.
//!
//! The server reads completed frames from an [`emu_core::FrameSlot`] and
//! forwards key and pointer input to an [`emu_core::EventQueue`]. It never
//! touches the machine directly, so a slow or misbehaving client cannot
//! stall the emulation.
//!
//! Protocol versions 3.3, 3.7 and 3.8 are accepted with security type
//! None. Updates are always one Raw rectangle covering the whole frame.

mod config;
pub mod protocol;
mod server;

pub use config::RfbConfig;
pub use protocol::{PixelFormat, ProtocolError};
pub use server::{ServerHandle, start_server};
