//! Cycle-accurate NMOS 6502.
//!
//! Each `tick()` is one CPU cycle and performs exactly one bus access,
//! including the dummy reads and writes the real part makes. Interrupts
//! (reset, NMI, IRQ and BRK) share one seven-cycle sequence that differs
//! only in its vector and in what it pushes.
//!
//! Undocumented opcodes are governed by an [`IllegalOpcodePolicy`] chosen
//! by the machine, never hardcoded.

mod cpu;
mod decode;
mod registers;

pub use cpu::{IllegalOpcode, IllegalOpcodePolicy, InterruptKind, Mos6502};
pub use registers::{Registers, Status, flags};
