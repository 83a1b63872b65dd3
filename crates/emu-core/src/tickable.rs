//! Trait for components that can be advanced by clock ticks.

use crate::Ticks;

/// A component that advances on its own clock.
///
/// The machine decides which master ticks reach the component (a 1 MHz
/// peripheral on a 2 MHz bus is ticked on alternate master ticks), so
/// `tick` always means one cycle of the component's own clock.
pub trait Tickable {
    /// Advance the component by one of its own clock cycles.
    fn tick(&mut self);

    /// Advance the component by multiple cycles.
    ///
    /// Must produce the same state as calling `tick()` `count` times.
    fn tick_n(&mut self, count: Ticks) {
        for _ in 0..count.get() {
            self.tick();
        }
    }
}
