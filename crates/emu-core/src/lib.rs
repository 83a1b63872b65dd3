//! Core traits and types for cycle-accurate emulation.
//!
//! Every machine advances in whole ticks of its master clock. Chips see the
//! world through the [`Bus`] and the interrupt lines the machine samples
//! between ticks. The only places where the deterministic tick loop meets
//! the asynchronous host are the hand-off types in [`handoff`].

mod bus;
mod clock;
mod cpu;
pub mod handoff;
mod observable;
mod tickable;
mod ticks;

pub use bus::{Bus, SimpleBus};
pub use clock::MasterClock;
pub use cpu::Cpu;
pub use handoff::{EventQueue, Frame, FrameSlot, HostEvent};
pub use observable::{Observable, Value};
pub use tickable::Tickable;
pub use ticks::Ticks;
