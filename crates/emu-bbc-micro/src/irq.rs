//! Interrupt line aggregation.
//!
//! Each source owns one bit. The lines are recomputed at the end of every
//! tick and sampled by the CPU at the start of the next, so a device that
//! raises its output during tick N is seen by the CPU on tick N+1.

/// A device that can pull IRQ or NMI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterruptSource {
    SystemVia = 0x01,
    UserVia = 0x02,
    Acia = 0x04,
    /// The only NMI source.
    Fdc = 0x08,
}

impl InterruptSource {
    const fn bit(self) -> u8 {
        self as u8
    }
}

const IRQ_MASK: u8 = 0x07;
const NMI_MASK: u8 = 0x08;

/// Bitset of asserted interrupt sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqLines(u8);

impl IrqLines {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn set(&mut self, source: InterruptSource, asserted: bool) {
        if asserted {
            self.0 |= source.bit();
        } else {
            self.0 &= !source.bit();
        }
    }

    #[must_use]
    pub const fn contains(self, source: InterruptSource) -> bool {
        self.0 & source.bit() != 0
    }

    /// Level on the CPU's IRQ input.
    #[must_use]
    pub const fn irq(self) -> bool {
        self.0 & IRQ_MASK != 0
    }

    /// Level on the CPU's NMI input.
    #[must_use]
    pub const fn nmi(self) -> bool {
        self.0 & NMI_MASK != 0
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fdc_drives_nmi_only() {
        let mut lines = IrqLines::empty();
        lines.set(InterruptSource::Fdc, true);
        assert!(lines.nmi());
        assert!(!lines.irq());
    }

    #[test]
    fn any_via_or_acia_drives_irq() {
        for source in [
            InterruptSource::SystemVia,
            InterruptSource::UserVia,
            InterruptSource::Acia,
        ] {
            let mut lines = IrqLines::empty();
            lines.set(source, true);
            assert!(lines.irq(), "{source:?}");
            assert!(!lines.nmi());
            lines.set(source, false);
            assert_eq!(lines, IrqLines::empty());
        }
    }

    #[test]
    fn sources_are_independent() {
        let mut lines = IrqLines::empty();
        lines.set(InterruptSource::SystemVia, true);
        lines.set(InterruptSource::Acia, true);
        lines.set(InterruptSource::SystemVia, false);
        assert!(lines.contains(InterruptSource::Acia));
        assert!(lines.irq());
        assert_eq!(lines.bits(), 0x04);
    }
}
