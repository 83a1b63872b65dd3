//! Master clock configuration.

use std::time::Duration;

use crate::Ticks;

/// Master clock configuration for a system.
///
/// A machine picks the fastest clock its bus ever sees as its tick. Slower
/// chips count ticks and act on the ones that line up with their own rate.
#[derive(Debug, Clone, Copy)]
pub struct MasterClock {
    /// Tick frequency in Hz (e.g., `2_000_000` for the BBC Micro bus).
    pub frequency_hz: u64,
}

impl MasterClock {
    #[must_use]
    pub const fn new(frequency_hz: u64) -> Self {
        Self { frequency_hz }
    }

    /// Ticks per frame at the given frame rate (integer division).
    #[must_use]
    pub const fn ticks_per_frame(&self, frames_per_second: u64) -> Ticks {
        Ticks::new(self.frequency_hz / frames_per_second)
    }

    /// Wall-clock time that `ticks` represent at this frequency.
    #[must_use]
    pub fn duration_of(&self, ticks: Ticks) -> Duration {
        let nanos = u128::from(ticks.get()) * 1_000_000_000 / u128::from(self.frequency_hz);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_megahertz_frame() {
        let clock = MasterClock::new(2_000_000);
        assert_eq!(clock.ticks_per_frame(50), Ticks::new(40_000));
        assert_eq!(clock.duration_of(Ticks::new(40_000)), Duration::from_millis(20));
    }
}
