//! Opcode decode table.
//!
//! Every one of the 256 opcodes maps to an operation and an addressing
//! mode. The CPU drives the bus cycles from the mode and applies the
//! operation on the cycle where the operand becomes available.

/// Addressing mode. `Imp` covers both implied and accumulator forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Imp,
    Imm,
    Zp,
    Zpx,
    Zpy,
    Abs,
    Abx,
    Aby,
    Izx,
    Izy,
    Rel,
    Ind,
}

/// Operation, documented and undocumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
    // Undocumented.
    Alr,
    Anc,
    Arr,
    Axs,
    Dcp,
    Isc,
    Jam,
    Las,
    Lax,
    Lxa,
    Rla,
    Rra,
    Sax,
    Sha,
    Shx,
    Shy,
    Slo,
    Sre,
    Tas,
    Xaa,
}

/// How an operation uses its effective address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    Write,
    ReadModifyWrite,
    /// Implied, stack, branch and jump operations with their own sequences.
    Control,
}

impl Op {
    pub(crate) const fn access(self) -> Access {
        match self {
            Op::Adc
            | Op::And
            | Op::Bit
            | Op::Cmp
            | Op::Cpx
            | Op::Cpy
            | Op::Eor
            | Op::Lda
            | Op::Ldx
            | Op::Ldy
            | Op::Nop
            | Op::Ora
            | Op::Sbc
            | Op::Alr
            | Op::Anc
            | Op::Arr
            | Op::Axs
            | Op::Las
            | Op::Lax
            | Op::Lxa
            | Op::Xaa => Access::Read,
            Op::Sta | Op::Stx | Op::Sty | Op::Sax | Op::Sha | Op::Shx | Op::Shy | Op::Tas => {
                Access::Write
            }
            Op::Asl
            | Op::Dec
            | Op::Inc
            | Op::Lsr
            | Op::Rol
            | Op::Ror
            | Op::Dcp
            | Op::Isc
            | Op::Rla
            | Op::Rra
            | Op::Slo
            | Op::Sre => Access::ReadModifyWrite,
            _ => Access::Control,
        }
    }
}

/// One decoded opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Instruction {
    pub op: Op,
    pub mode: Mode,
    /// False for opcodes outside the published instruction set.
    pub documented: bool,
}

#[allow(clippy::enum_glob_use)]
pub(crate) const fn decode(opcode: u8) -> Instruction {
    use Mode::*;
    use Op::*;

    let (op, mode, documented) = match opcode {
        0x00 => (Brk, Imp, true),
        0x01 => (Ora, Izx, true),
        0x02 => (Jam, Imp, false),
        0x03 => (Slo, Izx, false),
        0x04 => (Nop, Zp, false),
        0x05 => (Ora, Zp, true),
        0x06 => (Asl, Zp, true),
        0x07 => (Slo, Zp, false),
        0x08 => (Php, Imp, true),
        0x09 => (Ora, Imm, true),
        0x0A => (Asl, Imp, true),
        0x0B => (Anc, Imm, false),
        0x0C => (Nop, Abs, false),
        0x0D => (Ora, Abs, true),
        0x0E => (Asl, Abs, true),
        0x0F => (Slo, Abs, false),
        0x10 => (Bpl, Rel, true),
        0x11 => (Ora, Izy, true),
        0x12 => (Jam, Imp, false),
        0x13 => (Slo, Izy, false),
        0x14 => (Nop, Zpx, false),
        0x15 => (Ora, Zpx, true),
        0x16 => (Asl, Zpx, true),
        0x17 => (Slo, Zpx, false),
        0x18 => (Clc, Imp, true),
        0x19 => (Ora, Aby, true),
        0x1A => (Nop, Imp, false),
        0x1B => (Slo, Aby, false),
        0x1C => (Nop, Abx, false),
        0x1D => (Ora, Abx, true),
        0x1E => (Asl, Abx, true),
        0x1F => (Slo, Abx, false),
        0x20 => (Jsr, Abs, true),
        0x21 => (And, Izx, true),
        0x22 => (Jam, Imp, false),
        0x23 => (Rla, Izx, false),
        0x24 => (Bit, Zp, true),
        0x25 => (And, Zp, true),
        0x26 => (Rol, Zp, true),
        0x27 => (Rla, Zp, false),
        0x28 => (Plp, Imp, true),
        0x29 => (And, Imm, true),
        0x2A => (Rol, Imp, true),
        0x2B => (Anc, Imm, false),
        0x2C => (Bit, Abs, true),
        0x2D => (And, Abs, true),
        0x2E => (Rol, Abs, true),
        0x2F => (Rla, Abs, false),
        0x30 => (Bmi, Rel, true),
        0x31 => (And, Izy, true),
        0x32 => (Jam, Imp, false),
        0x33 => (Rla, Izy, false),
        0x34 => (Nop, Zpx, false),
        0x35 => (And, Zpx, true),
        0x36 => (Rol, Zpx, true),
        0x37 => (Rla, Zpx, false),
        0x38 => (Sec, Imp, true),
        0x39 => (And, Aby, true),
        0x3A => (Nop, Imp, false),
        0x3B => (Rla, Aby, false),
        0x3C => (Nop, Abx, false),
        0x3D => (And, Abx, true),
        0x3E => (Rol, Abx, true),
        0x3F => (Rla, Abx, false),
        0x40 => (Rti, Imp, true),
        0x41 => (Eor, Izx, true),
        0x42 => (Jam, Imp, false),
        0x43 => (Sre, Izx, false),
        0x44 => (Nop, Zp, false),
        0x45 => (Eor, Zp, true),
        0x46 => (Lsr, Zp, true),
        0x47 => (Sre, Zp, false),
        0x48 => (Pha, Imp, true),
        0x49 => (Eor, Imm, true),
        0x4A => (Lsr, Imp, true),
        0x4B => (Alr, Imm, false),
        0x4C => (Jmp, Abs, true),
        0x4D => (Eor, Abs, true),
        0x4E => (Lsr, Abs, true),
        0x4F => (Sre, Abs, false),
        0x50 => (Bvc, Rel, true),
        0x51 => (Eor, Izy, true),
        0x52 => (Jam, Imp, false),
        0x53 => (Sre, Izy, false),
        0x54 => (Nop, Zpx, false),
        0x55 => (Eor, Zpx, true),
        0x56 => (Lsr, Zpx, true),
        0x57 => (Sre, Zpx, false),
        0x58 => (Cli, Imp, true),
        0x59 => (Eor, Aby, true),
        0x5A => (Nop, Imp, false),
        0x5B => (Sre, Aby, false),
        0x5C => (Nop, Abx, false),
        0x5D => (Eor, Abx, true),
        0x5E => (Lsr, Abx, true),
        0x5F => (Sre, Abx, false),
        0x60 => (Rts, Imp, true),
        0x61 => (Adc, Izx, true),
        0x62 => (Jam, Imp, false),
        0x63 => (Rra, Izx, false),
        0x64 => (Nop, Zp, false),
        0x65 => (Adc, Zp, true),
        0x66 => (Ror, Zp, true),
        0x67 => (Rra, Zp, false),
        0x68 => (Pla, Imp, true),
        0x69 => (Adc, Imm, true),
        0x6A => (Ror, Imp, true),
        0x6B => (Arr, Imm, false),
        0x6C => (Jmp, Ind, true),
        0x6D => (Adc, Abs, true),
        0x6E => (Ror, Abs, true),
        0x6F => (Rra, Abs, false),
        0x70 => (Bvs, Rel, true),
        0x71 => (Adc, Izy, true),
        0x72 => (Jam, Imp, false),
        0x73 => (Rra, Izy, false),
        0x74 => (Nop, Zpx, false),
        0x75 => (Adc, Zpx, true),
        0x76 => (Ror, Zpx, true),
        0x77 => (Rra, Zpx, false),
        0x78 => (Sei, Imp, true),
        0x79 => (Adc, Aby, true),
        0x7A => (Nop, Imp, false),
        0x7B => (Rra, Aby, false),
        0x7C => (Nop, Abx, false),
        0x7D => (Adc, Abx, true),
        0x7E => (Ror, Abx, true),
        0x7F => (Rra, Abx, false),
        0x80 => (Nop, Imm, false),
        0x81 => (Sta, Izx, true),
        0x82 => (Nop, Imm, false),
        0x83 => (Sax, Izx, false),
        0x84 => (Sty, Zp, true),
        0x85 => (Sta, Zp, true),
        0x86 => (Stx, Zp, true),
        0x87 => (Sax, Zp, false),
        0x88 => (Dey, Imp, true),
        0x89 => (Nop, Imm, false),
        0x8A => (Txa, Imp, true),
        0x8B => (Xaa, Imm, false),
        0x8C => (Sty, Abs, true),
        0x8D => (Sta, Abs, true),
        0x8E => (Stx, Abs, true),
        0x8F => (Sax, Abs, false),
        0x90 => (Bcc, Rel, true),
        0x91 => (Sta, Izy, true),
        0x92 => (Jam, Imp, false),
        0x93 => (Sha, Izy, false),
        0x94 => (Sty, Zpx, true),
        0x95 => (Sta, Zpx, true),
        0x96 => (Stx, Zpy, true),
        0x97 => (Sax, Zpy, false),
        0x98 => (Tya, Imp, true),
        0x99 => (Sta, Aby, true),
        0x9A => (Txs, Imp, true),
        0x9B => (Tas, Aby, false),
        0x9C => (Shy, Abx, false),
        0x9D => (Sta, Abx, true),
        0x9E => (Shx, Aby, false),
        0x9F => (Sha, Aby, false),
        0xA0 => (Ldy, Imm, true),
        0xA1 => (Lda, Izx, true),
        0xA2 => (Ldx, Imm, true),
        0xA3 => (Lax, Izx, false),
        0xA4 => (Ldy, Zp, true),
        0xA5 => (Lda, Zp, true),
        0xA6 => (Ldx, Zp, true),
        0xA7 => (Lax, Zp, false),
        0xA8 => (Tay, Imp, true),
        0xA9 => (Lda, Imm, true),
        0xAA => (Tax, Imp, true),
        0xAB => (Lxa, Imm, false),
        0xAC => (Ldy, Abs, true),
        0xAD => (Lda, Abs, true),
        0xAE => (Ldx, Abs, true),
        0xAF => (Lax, Abs, false),
        0xB0 => (Bcs, Rel, true),
        0xB1 => (Lda, Izy, true),
        0xB2 => (Jam, Imp, false),
        0xB3 => (Lax, Izy, false),
        0xB4 => (Ldy, Zpx, true),
        0xB5 => (Lda, Zpx, true),
        0xB6 => (Ldx, Zpy, true),
        0xB7 => (Lax, Zpy, false),
        0xB8 => (Clv, Imp, true),
        0xB9 => (Lda, Aby, true),
        0xBA => (Tsx, Imp, true),
        0xBB => (Las, Aby, false),
        0xBC => (Ldy, Abx, true),
        0xBD => (Lda, Abx, true),
        0xBE => (Ldx, Aby, true),
        0xBF => (Lax, Aby, false),
        0xC0 => (Cpy, Imm, true),
        0xC1 => (Cmp, Izx, true),
        0xC2 => (Nop, Imm, false),
        0xC3 => (Dcp, Izx, false),
        0xC4 => (Cpy, Zp, true),
        0xC5 => (Cmp, Zp, true),
        0xC6 => (Dec, Zp, true),
        0xC7 => (Dcp, Zp, false),
        0xC8 => (Iny, Imp, true),
        0xC9 => (Cmp, Imm, true),
        0xCA => (Dex, Imp, true),
        0xCB => (Axs, Imm, false),
        0xCC => (Cpy, Abs, true),
        0xCD => (Cmp, Abs, true),
        0xCE => (Dec, Abs, true),
        0xCF => (Dcp, Abs, false),
        0xD0 => (Bne, Rel, true),
        0xD1 => (Cmp, Izy, true),
        0xD2 => (Jam, Imp, false),
        0xD3 => (Dcp, Izy, false),
        0xD4 => (Nop, Zpx, false),
        0xD5 => (Cmp, Zpx, true),
        0xD6 => (Dec, Zpx, true),
        0xD7 => (Dcp, Zpx, false),
        0xD8 => (Cld, Imp, true),
        0xD9 => (Cmp, Aby, true),
        0xDA => (Nop, Imp, false),
        0xDB => (Dcp, Aby, false),
        0xDC => (Nop, Abx, false),
        0xDD => (Cmp, Abx, true),
        0xDE => (Dec, Abx, true),
        0xDF => (Dcp, Abx, false),
        0xE0 => (Cpx, Imm, true),
        0xE1 => (Sbc, Izx, true),
        0xE2 => (Nop, Imm, false),
        0xE3 => (Isc, Izx, false),
        0xE4 => (Cpx, Zp, true),
        0xE5 => (Sbc, Zp, true),
        0xE6 => (Inc, Zp, true),
        0xE7 => (Isc, Zp, false),
        0xE8 => (Inx, Imp, true),
        0xE9 => (Sbc, Imm, true),
        0xEA => (Nop, Imp, true),
        0xEB => (Sbc, Imm, false),
        0xEC => (Cpx, Abs, true),
        0xED => (Sbc, Abs, true),
        0xEE => (Inc, Abs, true),
        0xEF => (Isc, Abs, false),
        0xF0 => (Beq, Rel, true),
        0xF1 => (Sbc, Izy, true),
        0xF2 => (Jam, Imp, false),
        0xF3 => (Isc, Izy, false),
        0xF4 => (Nop, Zpx, false),
        0xF5 => (Sbc, Zpx, true),
        0xF6 => (Inc, Zpx, true),
        0xF7 => (Isc, Zpx, false),
        0xF8 => (Sed, Imp, true),
        0xF9 => (Sbc, Aby, true),
        0xFA => (Nop, Imp, false),
        0xFB => (Isc, Aby, false),
        0xFC => (Nop, Abx, false),
        0xFD => (Sbc, Abx, true),
        0xFE => (Inc, Abx, true),
        0xFF => (Isc, Abx, false),
    };
    Instruction {
        op,
        mode,
        documented,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_set_has_151_opcodes() {
        let count = (0..=255u8).filter(|&op| decode(op).documented).count();
        assert_eq!(count, 151);
    }

    #[test]
    fn accumulator_shifts_decode_as_implied() {
        for opcode in [0x0A, 0x2A, 0x4A, 0x6A] {
            assert_eq!(decode(opcode).mode, Mode::Imp);
        }
    }

    #[test]
    fn every_jam_is_undocumented() {
        for opcode in 0..=255u8 {
            let instr = decode(opcode);
            if instr.op == Op::Jam {
                assert!(!instr.documented, "{opcode:#04X}");
            }
        }
    }
}
