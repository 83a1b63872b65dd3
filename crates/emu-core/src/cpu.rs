//! CPU core trait.

use crate::Bus;

/// A CPU core.
///
/// Unlike other [`Tickable`](crate::Tickable) components, a CPU takes the
/// bus in its tick method because it performs a bus access on every cycle.
/// Interrupts are modelled as input lines: the machine drives their levels
/// and the core decides when to sample them.
pub trait Cpu {
    /// The type used for register inspection.
    type Registers;

    /// Advance the CPU by one cycle, performing one bus access.
    fn tick<B: Bus>(&mut self, bus: &mut B);

    /// Returns the current program counter.
    ///
    /// Returns `u32` so that wider address buses fit; 16-bit CPUs
    /// zero-extend.
    fn pc(&self) -> u32;

    /// Returns a snapshot of all registers for inspection.
    fn registers(&self) -> Self::Registers;

    /// Returns true if the CPU has stopped executing.
    fn is_halted(&self) -> bool;

    /// Drive the maskable interrupt line (true = asserted).
    fn set_irq(&mut self, asserted: bool);

    /// Drive the non-maskable interrupt line (true = asserted).
    fn set_nmi(&mut self, asserted: bool);

    /// Start the reset sequence.
    fn reset(&mut self);
}
