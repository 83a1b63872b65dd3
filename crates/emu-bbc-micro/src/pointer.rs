//! AMX mouse on the user VIA.
//!
//! The mouse reports quadrature-style steps: each step pulses CB1 (X) or
//! CB2 (Y) and the direction is read from PB0 (X) or PB2 (Y) when the
//! interrupt fires. Buttons are active low on PB5 (left), PB6 (middle)
//! and PB7 (right).
//!
//! Host pointer events carry absolute positions, so the mouse keeps the
//! last position and turns each event into a backlog of relative steps
//! that the pulse generator pays out one every [`STEP_TICKS`] cycles.

use mos_via_6522::Via6522;

/// 1 MHz cycles per mouse step.
pub const STEP_TICKS: u8 = 32;

const PB_X_DIRECTION: u8 = 0x01;
const PB_Y_DIRECTION: u8 = 0x04;
const PB_BUTTONS: u8 = 0xE0;

/// Largest backlog kept per axis; a bigger jump is clamped.
const MAX_PENDING: i32 = 1024;

#[derive(Debug, Default)]
pub struct AmxMouse {
    last: Option<(u16, u16)>,
    pending_x: i32,
    pending_y: i32,
    /// Port B levels this mouse drives (direction and buttons).
    port_b: u8,
    phase: u8,
}

impl AmxMouse {
    #[must_use]
    pub fn new() -> Self {
        Self {
            port_b: PB_BUTTONS | PB_X_DIRECTION | PB_Y_DIRECTION,
            ..Self::default()
        }
    }

    /// Take a host pointer event. Buttons apply immediately.
    pub fn apply(&mut self, via: &mut Via6522, x: u16, y: u16, buttons: u8) {
        if let Some((last_x, last_y)) = self.last {
            self.pending_x = (self.pending_x + i32::from(x) - i32::from(last_x))
                .clamp(-MAX_PENDING, MAX_PENDING);
            // Screen Y grows downwards; the AMX counts up.
            self.pending_y = (self.pending_y + i32::from(last_y) - i32::from(y))
                .clamp(-MAX_PENDING, MAX_PENDING);
        }
        self.last = Some((x, y));

        // Host bit 0 left, 1 middle, 2 right -> PB5, PB6, PB7, active low.
        let pressed = (buttons & 0x07) << 5;
        self.port_b = (self.port_b & !PB_BUTTONS) | (!pressed & PB_BUTTONS);
        self.drive(via);
    }

    /// One 1 MHz cycle of the pulse generator.
    pub fn tick(&mut self, via: &mut Via6522) {
        match self.phase {
            0 => {
                if self.pending_x != 0 {
                    self.set_direction(PB_X_DIRECTION, self.pending_x > 0);
                    self.pending_x -= self.pending_x.signum();
                    self.drive(via);
                    via.set_cb1(true);
                }
                if self.pending_y != 0 {
                    self.set_direction(PB_Y_DIRECTION, self.pending_y > 0);
                    self.pending_y -= self.pending_y.signum();
                    self.drive(via);
                    via.set_cb2(true);
                }
            }
            half if half == STEP_TICKS / 2 => {
                via.set_cb1(false);
                via.set_cb2(false);
            }
            _ => {}
        }
        self.phase = (self.phase + 1) % STEP_TICKS;
    }

    /// Steps not yet sent, as `(x, y)`.
    #[must_use]
    pub fn pending(&self) -> (i32, i32) {
        (self.pending_x, self.pending_y)
    }

    fn set_direction(&mut self, bit: u8, positive: bool) {
        if positive {
            self.port_b |= bit;
        } else {
            self.port_b &= !bit;
        }
    }

    fn drive(&self, via: &mut Via6522) {
        let mask = PB_BUTTONS | PB_X_DIRECTION | PB_Y_DIRECTION;
        via.external_b = (via.external_b & !mask) | (self.port_b & mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mos_via_6522::{IFR_CB1, IFR_CB2};

    fn user_via() -> Via6522 {
        let mut via = Via6522::new();
        // CB1 and CB2 positive-edge inputs.
        via.write(0x0C, 0x50);
        via
    }

    #[test]
    fn buttons_are_active_low_on_port_b() {
        let mut via = user_via();
        let mut mouse = AmxMouse::new();
        mouse.apply(&mut via, 0, 0, 0b001);
        assert_eq!(via.read(0x00) & 0xE0, 0xC0);
        mouse.apply(&mut via, 0, 0, 0b110);
        assert_eq!(via.read(0x00) & 0xE0, 0x20);
        mouse.apply(&mut via, 0, 0, 0);
        assert_eq!(via.read(0x00) & 0xE0, 0xE0);
    }

    #[test]
    fn motion_becomes_paced_steps() {
        let mut via = user_via();
        let mut mouse = AmxMouse::new();
        mouse.apply(&mut via, 100, 100, 0);
        mouse.apply(&mut via, 103, 100, 0);
        assert_eq!(mouse.pending(), (3, 0));

        let mut pulses = 0;
        for _ in 0..(u32::from(STEP_TICKS) * 4) {
            mouse.tick(&mut via);
            if via.ifr() & IFR_CB1 != 0 {
                pulses += 1;
                assert_eq!(via.read(0x00) & PB_X_DIRECTION, PB_X_DIRECTION);
            }
        }
        assert_eq!(pulses, 3);
        assert_eq!(mouse.pending(), (0, 0));
    }

    #[test]
    fn moving_down_the_screen_counts_negative_y() {
        let mut via = user_via();
        let mut mouse = AmxMouse::new();
        mouse.apply(&mut via, 10, 10, 0);
        mouse.apply(&mut via, 10, 12, 0);
        assert_eq!(mouse.pending(), (0, -2));
        mouse.tick(&mut via);
        assert_ne!(via.ifr() & IFR_CB2, 0);
        assert_eq!(via.read(0x00) & PB_Y_DIRECTION, 0);
    }
}
