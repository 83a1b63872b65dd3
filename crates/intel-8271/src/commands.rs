//! Intel 8271 command decoding.
//!
//! The command byte carries the drive select in bits 7-6 and the opcode in
//! bits 5-0. Each opcode takes a fixed number of parameter bytes. Read,
//! write and verify come in two forms: a single 128-byte record (two
//! parameters) and a variable form whose third parameter packs the record
//! size code and count as `(size << 5) | count`.

/// Command completed without error.
pub const RESULT_OK: u8 = 0x00;
/// The CPU did not service a data request in time.
pub const RESULT_LATE_DATA: u8 = 0x0A;
/// Data field CRC mismatch after all retries.
pub const RESULT_DATA_CRC: u8 = 0x0E;
/// No disk in the selected drive, or no drive selected.
pub const RESULT_NOT_READY: u8 = 0x10;
pub const RESULT_WRITE_PROTECTED: u8 = 0x12;
/// Track or sector outside the disk, or a record size the disk does not use.
pub const RESULT_SECTOR_NOT_FOUND: u8 = 0x18;

/// Record size code of a 256-byte sector.
pub const SIZE_CODE_256: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    WriteData { deleted: bool },
    ReadData { include_deleted: bool },
    ReadId,
    Verify,
    Format,
    Seek,
    ReadDriveStatus,
    Specify,
    WriteSpecial,
    ReadSpecial,
}

impl Opcode {
    /// Changes the disk surface.
    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::WriteData { .. } | Self::Format)
    }
}

/// Decoded opcode plus the parameter bytes it expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandKind {
    pub opcode: Opcode,
    /// Takes a size/count parameter.
    pub variable: bool,
    pub params: usize,
}

/// Decode the low six bits of a command byte.
#[must_use]
pub fn decode(command: u8) -> Option<CommandKind> {
    let (opcode, variable, params) = match command & 0x3F {
        0x0A => (Opcode::WriteData { deleted: false }, false, 2),
        0x0B => (Opcode::WriteData { deleted: false }, true, 3),
        0x0E => (Opcode::WriteData { deleted: true }, false, 2),
        0x0F => (Opcode::WriteData { deleted: true }, true, 3),
        0x12 => (Opcode::ReadData { include_deleted: false }, false, 2),
        0x13 => (Opcode::ReadData { include_deleted: false }, true, 3),
        0x16 => (Opcode::ReadData { include_deleted: true }, false, 2),
        0x17 => (Opcode::ReadData { include_deleted: true }, true, 3),
        0x1B => (Opcode::ReadId, false, 3),
        0x1E => (Opcode::Verify, false, 2),
        0x1F => (Opcode::Verify, true, 3),
        0x23 => (Opcode::Format, true, 5),
        0x29 => (Opcode::Seek, false, 1),
        0x2C => (Opcode::ReadDriveStatus, false, 0),
        0x35 => (Opcode::Specify, false, 4),
        0x3A => (Opcode::WriteSpecial, false, 2),
        0x3D => (Opcode::ReadSpecial, false, 1),
        _ => return None,
    };
    Some(CommandKind {
        opcode,
        variable,
        params,
    })
}

/// Drive addressed by the select bits, if exactly one is selected.
#[must_use]
pub const fn drive_select(command: u8) -> Option<usize> {
    match command >> 6 {
        0b01 => Some(0),
        0b10 => Some(1),
        _ => None,
    }
}

/// A command with all of its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub raw: u8,
    pub kind: CommandKind,
    pub params: Vec<u8>,
}

impl Command {
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.kind.opcode
    }

    #[must_use]
    pub fn drive(&self) -> Option<usize> {
        drive_select(self.raw)
    }

    #[must_use]
    pub fn param(&self, index: usize) -> u8 {
        self.params.get(index).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn track(&self) -> u8 {
        self.param(0)
    }

    #[must_use]
    pub fn sector(&self) -> u8 {
        self.param(1)
    }

    /// Record size code: 0 for single-record forms.
    #[must_use]
    pub fn size_code(&self) -> u8 {
        if self.kind.variable {
            self.param(2) >> 5
        } else {
            0
        }
    }

    /// Number of records (sector IDs for Read ID).
    #[must_use]
    pub fn count(&self) -> u8 {
        match self.kind.opcode {
            Opcode::ReadId => self.param(2),
            _ if self.kind.variable => self.param(2) & 0x1F,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_counts() {
        let counts: Vec<(u8, usize)> = [0x0B, 0x13, 0x12, 0x1B, 0x23, 0x29, 0x2C, 0x35, 0x3A, 0x3D]
            .iter()
            .map(|&op| (op, decode(op).expect("known").params))
            .collect();
        assert_eq!(
            counts,
            vec![
                (0x0B, 3),
                (0x13, 3),
                (0x12, 2),
                (0x1B, 3),
                (0x23, 5),
                (0x29, 1),
                (0x2C, 0),
                (0x35, 4),
                (0x3A, 2),
                (0x3D, 1)
            ]
        );
        assert!(decode(0x00).is_none());
        assert!(decode(0x3F).is_none());
    }

    #[test]
    fn drive_select_bits() {
        assert_eq!(drive_select(0x53), Some(0));
        assert_eq!(drive_select(0x93), Some(1));
        assert_eq!(drive_select(0x13), None);
        assert_eq!(drive_select(0xD3), None);
    }

    #[test]
    fn size_and_count() {
        let cmd = Command {
            raw: 0x53,
            kind: decode(0x53).expect("known"),
            params: vec![2, 3, 0x2A],
        };
        assert_eq!(cmd.track(), 2);
        assert_eq!(cmd.sector(), 3);
        assert_eq!(cmd.size_code(), 1);
        assert_eq!(cmd.count(), 10);

        let single = Command {
            raw: 0x52,
            kind: decode(0x52).expect("known"),
            params: vec![2, 3],
        };
        assert_eq!(single.size_code(), 0);
        assert_eq!(single.count(), 1);
    }
}
