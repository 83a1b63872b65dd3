//! Host keysym to BBC key mapping.
//!
//! Host keys arrive as X11 keysyms (the RFB key event carries them
//! unchanged). The mapping is positional on a UK layout: the key in the
//! same place on the host keyboard, not the same legend. Shifted symbol
//! keysyms map to their unshifted key, since the host already sent SHIFT.

use crate::keyboard::BbcKey;

/// F12 acts as BREAK, which is wired to the reset line, not the matrix.
pub const KEYSYM_BREAK: u32 = 0xFFC9;

/// Map an X11 keysym to a BBC key. Returns `None` for unmapped keys.
#[must_use]
pub fn map_keysym(keysym: u32) -> Option<BbcKey> {
    let key = match keysym {
        // Latin letters, either case.
        0x41..=0x5A => return letter(keysym - 0x41),
        0x61..=0x7A => return letter(keysym - 0x61),

        0x30 | 0x29 => BbcKey::N0,
        0x31 | 0x21 => BbcKey::N1,
        0x32 | 0x22 => BbcKey::N2,
        0x33 | 0xA3 => BbcKey::N3,
        0x34 | 0x24 => BbcKey::N4,
        0x35 | 0x25 => BbcKey::N5,
        0x36 | 0x26 => BbcKey::N6,
        0x37 | 0x27 => BbcKey::N7,
        0x38 | 0x28 => BbcKey::N8,
        0x39 => BbcKey::N9,

        0x20 => BbcKey::Space,
        0x2C | 0x3C => BbcKey::Comma,
        0x2E | 0x3E => BbcKey::Period,
        0x2F | 0x3F => BbcKey::Slash,
        0x3B | 0x2B => BbcKey::Semicolon,
        0x3A | 0x2A => BbcKey::Colon,
        0x2D | 0x3D => BbcKey::Minus,
        0x5E | 0x7E => BbcKey::Caret,
        0x5C | 0x7C => BbcKey::Backslash,
        0x40 | 0x60 => BbcKey::At,
        0x5B | 0x7B => BbcKey::LeftBracket,
        0x5D | 0x7D => BbcKey::RightBracket,
        0x5F | 0xA4 => BbcKey::Underscore,

        0xFF0D | 0xFF8D => BbcKey::Return,
        0xFF08 | 0xFFFF => BbcKey::Delete,
        0xFF09 => BbcKey::Tab,
        0xFF1B => BbcKey::Escape,
        0xFF57 | 0xFFC8 => BbcKey::Copy,
        0xFFE1 | 0xFFE2 => BbcKey::Shift,
        0xFFE3 | 0xFFE4 => BbcKey::Ctrl,
        0xFFE5 => BbcKey::CapsLock,
        0xFFE6 => BbcKey::ShiftLock,

        0xFF51 => BbcKey::Left,
        0xFF52 => BbcKey::Up,
        0xFF53 => BbcKey::Right,
        0xFF54 => BbcKey::Down,

        // F1-F9 are f1-f9; F10 is f0.
        0xFFBE => BbcKey::F1,
        0xFFBF => BbcKey::F2,
        0xFFC0 => BbcKey::F3,
        0xFFC1 => BbcKey::F4,
        0xFFC2 => BbcKey::F5,
        0xFFC3 => BbcKey::F6,
        0xFFC4 => BbcKey::F7,
        0xFFC5 => BbcKey::F8,
        0xFFC6 => BbcKey::F9,
        0xFFC7 => BbcKey::F0,

        _ => return None,
    };
    Some(key)
}

fn letter(index: u32) -> Option<BbcKey> {
    const LETTERS: [BbcKey; 26] = [
        BbcKey::A,
        BbcKey::B,
        BbcKey::C,
        BbcKey::D,
        BbcKey::E,
        BbcKey::F,
        BbcKey::G,
        BbcKey::H,
        BbcKey::I,
        BbcKey::J,
        BbcKey::K,
        BbcKey::L,
        BbcKey::M,
        BbcKey::N,
        BbcKey::O,
        BbcKey::P,
        BbcKey::Q,
        BbcKey::R,
        BbcKey::S,
        BbcKey::T,
        BbcKey::U,
        BbcKey::V,
        BbcKey::W,
        BbcKey::X,
        BbcKey::Y,
        BbcKey::Z,
    ];
    LETTERS.get(index as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_ignore_case() {
        assert_eq!(map_keysym(u32::from(b'a')), Some(BbcKey::A));
        assert_eq!(map_keysym(u32::from(b'Z')), Some(BbcKey::Z));
    }

    #[test]
    fn shifted_digits_map_to_their_key() {
        assert_eq!(map_keysym(u32::from(b'!')), Some(BbcKey::N1));
        assert_eq!(map_keysym(u32::from(b'(')), Some(BbcKey::N8));
    }

    #[test]
    fn function_keys_and_editing() {
        assert_eq!(map_keysym(0xFFC7), Some(BbcKey::F0));
        assert_eq!(map_keysym(0xFF0D), Some(BbcKey::Return));
        assert_eq!(map_keysym(0xFF08), Some(BbcKey::Delete));
    }

    #[test]
    fn break_and_unknown_keys_are_not_matrix_keys() {
        assert_eq!(map_keysym(KEYSYM_BREAK), None);
        assert_eq!(map_keysym(0x1234_5678), None);
    }
}
