//! 6502 execution core.
//!
//! The core is a small state machine: `Fetch` reads an opcode and decodes
//! it, `Execute` steps through the addressing-mode cycles one bus access at
//! a time, and `Interrupt` runs the shared seven-cycle sequence used by
//! reset, NMI, IRQ and BRK.

use emu_core::{Bus, Cpu, Observable, Value};

use crate::decode::{Access, Instruction, Mode, Op, decode};
use crate::registers::flags::{C, D, I, N, V, Z};
use crate::{Registers, Status};

/// What to do with an opcode outside the documented instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum IllegalOpcodePolicy {
    /// Execute the NMOS behaviour software relies on; JAM opcodes halt.
    #[default]
    Emulate,
    /// Treat every undocumented opcode as a one-byte, two-cycle no-op.
    Nop,
    /// Stop the core on the first undocumented opcode.
    Halt,
}

/// Record of the most recent undocumented opcode the core fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalOpcode {
    pub opcode: u8,
    /// Address the opcode was fetched from.
    pub pc: u16,
}

/// The four causes of the interrupt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    Reset,
    Nmi,
    Irq,
    Brk,
}

impl InterruptKind {
    const fn vector(self) -> u16 {
        match self {
            InterruptKind::Reset => 0xFFFC,
            InterruptKind::Nmi => 0xFFFA,
            InterruptKind::Irq | InterruptKind::Brk => 0xFFFE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fetch,
    Execute,
    Interrupt(InterruptKind),
    Halted,
}

/// Address a halted core keeps reading.
const JAMMED_ADDRESS: u16 = 0xFFFF;

/// The MOS 6502 CPU.
#[derive(Debug)]
pub struct Mos6502 {
    pub regs: Registers,
    policy: IllegalOpcodePolicy,
    state: State,
    instr: Instruction,
    /// Cycle within the current instruction; the fetch is cycle 0.
    cycle: u8,
    /// Effective address being built or used.
    addr: u16,
    data: u8,
    /// Zero-page pointer for indexed and indirect modes.
    pointer: u8,
    /// High byte of the base address before indexing.
    base_hi: u8,
    page_crossed: bool,
    /// Read-modify-write progress after the address is known.
    rmw_stage: u8,
    vector: u16,
    irq_line: bool,
    nmi_line: bool,
    /// Set on a rising edge of the NMI line until serviced.
    nmi_edge: bool,
    /// Interrupt recognised at the last instruction boundary.
    pending: Option<InterruptKind>,
    total_cycles: u64,
    last_illegal: Option<IllegalOpcode>,
    illegal_count: u64,
}

impl Default for Mos6502 {
    fn default() -> Self {
        Self::new()
    }
}

impl Mos6502 {
    /// A core ready to fetch from PC 0 with the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(IllegalOpcodePolicy::default())
    }

    #[must_use]
    pub fn with_policy(policy: IllegalOpcodePolicy) -> Self {
        Self {
            regs: Registers::new(),
            policy,
            state: State::Fetch,
            instr: decode(0xEA),
            cycle: 0,
            addr: 0,
            data: 0,
            pointer: 0,
            base_hi: 0,
            page_crossed: false,
            rmw_stage: 0,
            vector: 0,
            irq_line: false,
            nmi_line: false,
            nmi_edge: false,
            pending: None,
            total_cycles: 0,
            last_illegal: None,
            illegal_count: 0,
        }
    }

    #[must_use]
    pub fn policy(&self) -> IllegalOpcodePolicy {
        self.policy
    }

    /// True between instructions, when the next tick will fetch an opcode
    /// (or start a pending interrupt).
    #[must_use]
    pub fn is_instruction_complete(&self) -> bool {
        self.state == State::Fetch
    }

    /// Jump straight to `pc` at an instruction boundary. Used by loaders
    /// and tests; abandons any instruction in progress.
    pub fn force_pc(&mut self, pc: u16) {
        self.regs.pc = pc;
        self.state = State::Fetch;
        self.cycle = 0;
    }

    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    #[must_use]
    pub fn last_illegal(&self) -> Option<IllegalOpcode> {
        self.last_illegal
    }

    /// Number of undocumented opcodes fetched since power-on.
    #[must_use]
    pub fn illegal_count(&self) -> u64 {
        self.illegal_count
    }

    fn step<B: Bus>(&mut self, bus: &mut B) {
        self.total_cycles += 1;
        match self.state {
            State::Fetch => self.fetch(bus),
            State::Execute => self.execute(bus),
            State::Interrupt(kind) => self.interrupt_sequence(bus, kind),
            // A jammed core holds the address bus at $FFFF, away from any
            // I/O register a repeated read would disturb.
            State::Halted => {
                let _ = bus.read(JAMMED_ADDRESS);
            }
        }
    }

    fn fetch<B: Bus>(&mut self, bus: &mut B) {
        self.cycle = 1;
        self.rmw_stage = 0;

        if let Some(kind) = self.pending.take() {
            // The opcode read still happens but is discarded and PC holds.
            let _ = bus.read(self.regs.pc);
            self.state = State::Interrupt(kind);
            return;
        }

        let pc = self.regs.pc;
        let opcode = bus.read(pc);
        self.regs.pc = pc.wrapping_add(1);

        let mut instr = decode(opcode);
        if !instr.documented {
            self.last_illegal = Some(IllegalOpcode { opcode, pc });
            self.illegal_count += 1;
            match self.policy {
                IllegalOpcodePolicy::Emulate => {}
                IllegalOpcodePolicy::Nop => {
                    instr = Instruction {
                        op: Op::Nop,
                        mode: Mode::Imp,
                        documented: false,
                    };
                }
                IllegalOpcodePolicy::Halt => {
                    self.state = State::Halted;
                    return;
                }
            }
        }

        self.instr = instr;
        self.state = if instr.op == Op::Brk {
            State::Interrupt(InterruptKind::Brk)
        } else {
            State::Execute
        };
    }

    /// Sample the interrupt inputs at an instruction boundary.
    fn poll_interrupts(&mut self) {
        if self.nmi_edge {
            self.nmi_edge = false;
            self.pending = Some(InterruptKind::Nmi);
        } else if self.irq_line && !self.regs.p.is_set(I) {
            self.pending = Some(InterruptKind::Irq);
        }
    }

    /// End the instruction without sampling interrupts.
    fn end_instruction(&mut self) {
        self.state = State::Fetch;
        self.cycle = 0;
    }

    /// End the instruction, sampling interrupts with the final flag state.
    fn finish(&mut self) {
        self.poll_interrupts();
        self.end_instruction();
    }

    fn fetch_operand<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    // ------------------------------------------------------------------
    // Interrupt sequence
    // ------------------------------------------------------------------

    fn interrupt_sequence<B: Bus>(&mut self, bus: &mut B, kind: InterruptKind) {
        match self.cycle {
            // Reset only: stands in for the opcode fetch.
            0 => {
                let _ = bus.read(self.regs.pc);
            }
            1 => {
                let _ = bus.read(self.regs.pc);
                if kind == InterruptKind::Brk {
                    // BRK skips its signature byte.
                    self.regs.pc = self.regs.pc.wrapping_add(1);
                }
            }
            2 => self.push_unless_reset(bus, kind, (self.regs.pc >> 8) as u8),
            3 => self.push_unless_reset(bus, kind, self.regs.pc as u8),
            4 => {
                let p = if kind == InterruptKind::Brk {
                    self.regs.p.pushed_by_software()
                } else {
                    self.regs.p.pushed_by_hardware()
                };
                self.push_unless_reset(bus, kind, p);

                self.vector = kind.vector();
                // An NMI arriving before the vector fetch takes over BRK/IRQ.
                if matches!(kind, InterruptKind::Brk | InterruptKind::Irq) && self.nmi_edge {
                    self.nmi_edge = false;
                    self.vector = InterruptKind::Nmi.vector();
                }
                self.regs.p.set(I);
            }
            5 => {
                self.addr = u16::from(bus.read(self.vector));
            }
            6 => {
                self.addr |= u16::from(bus.read(self.vector.wrapping_add(1))) << 8;
                self.regs.pc = self.addr;
                self.end_instruction();
                return;
            }
            _ => unreachable!(),
        }
        self.cycle += 1;
    }

    /// Reset runs the push cycles as reads: S still decrements.
    fn push_unless_reset<B: Bus>(&mut self, bus: &mut B, kind: InterruptKind, value: u8) {
        if kind == InterruptKind::Reset {
            let _ = bus.read(self.regs.stack_addr());
            self.regs.s = self.regs.s.wrapping_sub(1);
        } else {
            let address = self.regs.push();
            bus.write(address, value);
        }
    }

    // ------------------------------------------------------------------
    // Instruction dispatch
    // ------------------------------------------------------------------

    fn execute<B: Bus>(&mut self, bus: &mut B) {
        let instr = self.instr;
        match (instr.mode, instr.op.access()) {
            (Mode::Imp, _) => self.implied(bus, instr.op),
            (Mode::Rel, _) => self.branch(bus, instr.op),
            (_, Access::Read) => self.read_op(bus, instr.op),
            (_, Access::Write) => self.write_op(bus, instr.op),
            (_, Access::ReadModifyWrite) => self.rmw_op(bus, instr.op),
            (_, Access::Control) => self.jump(bus, instr.op),
        }
    }

    /// Advance the addressing sequence by one cycle.
    ///
    /// Returns the effective address on the cycle during which the operand
    /// access itself must happen. `always_fix` forces the extra cycle that
    /// indexed writes and read-modify-writes take even without a page
    /// crossing.
    fn effective_address<B: Bus>(&mut self, bus: &mut B, always_fix: bool) -> Option<u16> {
        let mode = self.instr.mode;
        let cycle = self.cycle;
        self.cycle += 1;

        match (mode, cycle) {
            (Mode::Imm, 1) => {
                let address = self.regs.pc;
                self.regs.pc = address.wrapping_add(1);
                Some(address)
            }
            (Mode::Zp | Mode::Abs | Mode::Abx | Mode::Aby, 1) => {
                self.addr = u16::from(self.fetch_operand(bus));
                None
            }
            (Mode::Zpx | Mode::Zpy | Mode::Izx | Mode::Izy, 1) => {
                self.pointer = self.fetch_operand(bus);
                None
            }
            (Mode::Zp, 2) | (Mode::Zpx | Mode::Zpy | Mode::Abs, 3) | (Mode::Izx, 5) => {
                Some(self.addr)
            }
            (Mode::Zpx | Mode::Zpy, 2) => {
                // Dummy read of the unindexed address; the sum wraps in page zero.
                let _ = bus.read(u16::from(self.pointer));
                let index = if mode == Mode::Zpx {
                    self.regs.x
                } else {
                    self.regs.y
                };
                self.addr = u16::from(self.pointer.wrapping_add(index));
                None
            }
            (Mode::Abs, 2) => {
                self.addr |= u16::from(self.fetch_operand(bus)) << 8;
                None
            }
            (Mode::Abx | Mode::Aby, 2) => {
                let hi = self.fetch_operand(bus);
                let index = if mode == Mode::Abx {
                    self.regs.x
                } else {
                    self.regs.y
                };
                self.index_address(self.addr as u8, hi, index);
                None
            }
            (Mode::Abx | Mode::Aby, 3) | (Mode::Izy, 4) => self.fix_page(bus, always_fix),
            (Mode::Abx | Mode::Aby, 4) | (Mode::Izy, 5) => Some(self.addr),
            (Mode::Izx, 2) => {
                let _ = bus.read(u16::from(self.pointer));
                self.pointer = self.pointer.wrapping_add(self.regs.x);
                None
            }
            (Mode::Izx, 3) | (Mode::Izy, 2) => {
                self.addr = u16::from(bus.read(u16::from(self.pointer)));
                None
            }
            (Mode::Izx, 4) => {
                let hi = bus.read(u16::from(self.pointer.wrapping_add(1)));
                self.addr |= u16::from(hi) << 8;
                None
            }
            (Mode::Izy, 3) => {
                let hi = bus.read(u16::from(self.pointer.wrapping_add(1)));
                self.index_address(self.addr as u8, hi, self.regs.y);
                None
            }
            _ => unreachable!("{mode:?} has no addressing cycle {cycle}"),
        }
    }

    /// Add an index to the low byte only; the high byte is fixed up on the
    /// following cycle if the addition carried.
    fn index_address(&mut self, lo: u8, hi: u8, index: u8) {
        let (lo, carried) = lo.overflowing_add(index);
        self.base_hi = hi;
        self.page_crossed = carried;
        self.addr = u16::from_le_bytes([lo, hi]);
    }

    fn fix_page<B: Bus>(&mut self, bus: &mut B, always_fix: bool) -> Option<u16> {
        if !self.page_crossed && !always_fix {
            return Some(self.addr);
        }
        // Read from the not-yet-corrected address.
        let _ = bus.read(self.addr);
        if self.page_crossed {
            self.addr = self.addr.wrapping_add(0x100);
        }
        None
    }

    fn read_op<B: Bus>(&mut self, bus: &mut B, op: Op) {
        if let Some(address) = self.effective_address(bus, false) {
            let value = bus.read(address);
            self.apply_read(op, value);
            self.finish();
        }
    }

    fn write_op<B: Bus>(&mut self, bus: &mut B, op: Op) {
        if let Some(address) = self.effective_address(bus, true) {
            let value = self.store_value(op);
            bus.write(address, value);
            self.finish();
        }
    }

    fn rmw_op<B: Bus>(&mut self, bus: &mut B, op: Op) {
        match self.rmw_stage {
            0 => {
                if let Some(address) = self.effective_address(bus, true) {
                    self.addr = address;
                    self.data = bus.read(address);
                    self.rmw_stage = 1;
                }
            }
            1 => {
                // The unmodified value is written back first.
                bus.write(self.addr, self.data);
                self.data = self.apply_rmw(op, self.data);
                self.rmw_stage = 2;
            }
            2 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn implied<B: Bus>(&mut self, bus: &mut B, op: Op) {
        match op {
            Op::Pha | Op::Php => self.push_op(bus, op),
            Op::Pla | Op::Plp => self.pull_op(bus, op),
            Op::Rts => self.op_rts(bus),
            Op::Rti => self.op_rti(bus),
            Op::Jam => {
                let _ = bus.read(self.regs.pc);
                self.state = State::Halted;
            }
            Op::Cli | Op::Sei => {
                let _ = bus.read(self.regs.pc);
                // Sampled before the flag changes: CLI lets one more
                // instruction run, SEI can still be interrupted.
                self.poll_interrupts();
                self.regs.p.set_if(I, op == Op::Sei);
                self.end_instruction();
            }
            _ => {
                let _ = bus.read(self.regs.pc);
                self.apply_implied(op);
                self.finish();
            }
        }
    }

    fn branch<B: Bus>(&mut self, bus: &mut B, op: Op) {
        match self.cycle {
            1 => {
                self.data = self.fetch_operand(bus);
                if self.branch_taken(op) {
                    self.cycle = 2;
                } else {
                    self.finish();
                }
            }
            2 => {
                let _ = bus.read(self.regs.pc);
                let target = self.regs.pc.wrapping_add_signed(i16::from(self.data as i8));
                if target & 0xFF00 == self.regs.pc & 0xFF00 {
                    self.regs.pc = target;
                    self.finish();
                } else {
                    // PCL is updated first; PCH is fixed on the next cycle.
                    self.regs.pc = (self.regs.pc & 0xFF00) | (target & 0x00FF);
                    self.addr = target;
                    self.cycle = 3;
                }
            }
            3 => {
                let _ = bus.read(self.regs.pc);
                self.regs.pc = self.addr;
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn branch_taken(&self, op: Op) -> bool {
        let p = self.regs.p;
        match op {
            Op::Bpl => !p.is_set(N),
            Op::Bmi => p.is_set(N),
            Op::Bvc => !p.is_set(V),
            Op::Bvs => p.is_set(V),
            Op::Bcc => !p.is_set(C),
            Op::Bcs => p.is_set(C),
            Op::Bne => !p.is_set(Z),
            Op::Beq => p.is_set(Z),
            _ => unreachable!("{op:?} is not a branch"),
        }
    }

    /// JMP abs, JMP (ind) and JSR.
    fn jump<B: Bus>(&mut self, bus: &mut B, op: Op) {
        match (op, self.cycle) {
            (_, 1) => {
                self.addr = u16::from(self.fetch_operand(bus));
                self.cycle = 2;
            }
            (Op::Jmp, 2) => {
                self.addr |= u16::from(self.fetch_operand(bus)) << 8;
                if self.instr.mode == Mode::Abs {
                    self.regs.pc = self.addr;
                    self.finish();
                } else {
                    self.cycle = 3;
                }
            }
            (Op::Jmp, 3) => {
                self.data = bus.read(self.addr);
                self.cycle = 4;
            }
            (Op::Jmp, 4) => {
                // The pointer's high byte is read without carrying into the
                // page number: JMP ($10FF) reads $10FF and $1000.
                let hi_addr = (self.addr & 0xFF00) | (self.addr.wrapping_add(1) & 0x00FF);
                let hi = bus.read(hi_addr);
                self.regs.pc = u16::from_le_bytes([self.data, hi]);
                self.finish();
            }
            (Op::Jsr, 2) => {
                let _ = bus.read(self.regs.stack_addr());
                self.cycle = 3;
            }
            (Op::Jsr, 3) => {
                let address = self.regs.push();
                bus.write(address, (self.regs.pc >> 8) as u8);
                self.cycle = 4;
            }
            (Op::Jsr, 4) => {
                let address = self.regs.push();
                bus.write(address, self.regs.pc as u8);
                self.cycle = 5;
            }
            (Op::Jsr, 5) => {
                let hi = bus.read(self.regs.pc);
                self.regs.pc = (u16::from(hi) << 8) | self.addr;
                self.finish();
            }
            _ => unreachable!("{op:?} cycle {}", self.cycle),
        }
    }

    fn push_op<B: Bus>(&mut self, bus: &mut B, op: Op) {
        match self.cycle {
            1 => {
                let _ = bus.read(self.regs.pc);
                self.cycle = 2;
            }
            2 => {
                let value = if op == Op::Php {
                    self.regs.p.pushed_by_software()
                } else {
                    self.regs.a
                };
                let address = self.regs.push();
                bus.write(address, value);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn pull_op<B: Bus>(&mut self, bus: &mut B, op: Op) {
        match self.cycle {
            1 => {
                let _ = bus.read(self.regs.pc);
                self.cycle = 2;
            }
            2 => {
                let _ = bus.read(self.regs.stack_addr());
                self.cycle = 3;
            }
            3 => {
                let address = self.regs.pull();
                let value = bus.read(address);
                if op == Op::Plp {
                    // Like CLI, the new I flag is not seen by this poll.
                    self.poll_interrupts();
                    self.regs.p = Status::from_stack(value);
                    self.end_instruction();
                } else {
                    self.regs.a = value;
                    self.regs.p.update_nz(value);
                    self.finish();
                }
            }
            _ => unreachable!(),
        }
    }

    fn op_rts<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                let _ = bus.read(self.regs.pc);
                self.cycle = 2;
            }
            2 => {
                let _ = bus.read(self.regs.stack_addr());
                self.cycle = 3;
            }
            3 => {
                let address = self.regs.pull();
                self.addr = u16::from(bus.read(address));
                self.cycle = 4;
            }
            4 => {
                let address = self.regs.pull();
                self.addr |= u16::from(bus.read(address)) << 8;
                self.cycle = 5;
            }
            5 => {
                let _ = bus.read(self.addr);
                self.regs.pc = self.addr.wrapping_add(1);
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    fn op_rti<B: Bus>(&mut self, bus: &mut B) {
        match self.cycle {
            1 => {
                let _ = bus.read(self.regs.pc);
                self.cycle = 2;
            }
            2 => {
                let _ = bus.read(self.regs.stack_addr());
                self.cycle = 3;
            }
            3 => {
                let address = self.regs.pull();
                self.regs.p = Status::from_stack(bus.read(address));
                self.cycle = 4;
            }
            4 => {
                let address = self.regs.pull();
                self.addr = u16::from(bus.read(address));
                self.cycle = 5;
            }
            5 => {
                let address = self.regs.pull();
                self.addr |= u16::from(bus.read(address)) << 8;
                self.regs.pc = self.addr;
                self.finish();
            }
            _ => unreachable!(),
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    fn apply_implied(&mut self, op: Op) {
        let r = &mut self.regs;
        match op {
            Op::Tax => {
                r.x = r.a;
                r.p.update_nz(r.x);
            }
            Op::Tay => {
                r.y = r.a;
                r.p.update_nz(r.y);
            }
            Op::Txa => {
                r.a = r.x;
                r.p.update_nz(r.a);
            }
            Op::Tya => {
                r.a = r.y;
                r.p.update_nz(r.a);
            }
            Op::Tsx => {
                r.x = r.s;
                r.p.update_nz(r.x);
            }
            Op::Txs => r.s = r.x,
            Op::Inx => {
                r.x = r.x.wrapping_add(1);
                r.p.update_nz(r.x);
            }
            Op::Iny => {
                r.y = r.y.wrapping_add(1);
                r.p.update_nz(r.y);
            }
            Op::Dex => {
                r.x = r.x.wrapping_sub(1);
                r.p.update_nz(r.x);
            }
            Op::Dey => {
                r.y = r.y.wrapping_sub(1);
                r.p.update_nz(r.y);
            }
            Op::Clc => r.p.clear(C),
            Op::Sec => r.p.set(C),
            Op::Clv => r.p.clear(V),
            Op::Cld => r.p.clear(D),
            Op::Sed => r.p.set(D),
            Op::Nop => {}
            Op::Asl | Op::Lsr | Op::Rol | Op::Ror => {
                let a = self.regs.a;
                self.regs.a = self.apply_rmw(op, a);
            }
            _ => unreachable!("{op:?} is not implied"),
        }
    }

    fn store_value(&mut self, op: Op) -> u8 {
        let r = &mut self.regs;
        // The SH* family ANDs with the base page + 1.
        let page = self.base_hi.wrapping_add(1);
        match op {
            Op::Sta => r.a,
            Op::Stx => r.x,
            Op::Sty => r.y,
            Op::Sax => r.a & r.x,
            Op::Sha => r.a & r.x & page,
            Op::Shx => r.x & page,
            Op::Shy => r.y & page,
            Op::Tas => {
                r.s = r.a & r.x;
                r.s & page
            }
            _ => unreachable!("{op:?} is not a store"),
        }
    }

    fn apply_read(&mut self, op: Op, value: u8) {
        match op {
            Op::Lda => self.load_a(value),
            Op::Ldx => {
                self.regs.x = value;
                self.regs.p.update_nz(value);
            }
            Op::Ldy => {
                self.regs.y = value;
                self.regs.p.update_nz(value);
            }
            Op::Ora => self.load_a(self.regs.a | value),
            Op::And => self.load_a(self.regs.a & value),
            Op::Eor => self.load_a(self.regs.a ^ value),
            Op::Adc => self.adc(value),
            Op::Sbc => self.sbc(value),
            Op::Cmp => self.compare(self.regs.a, value),
            Op::Cpx => self.compare(self.regs.x, value),
            Op::Cpy => self.compare(self.regs.y, value),
            Op::Bit => {
                self.regs.p.set_if(Z, self.regs.a & value == 0);
                self.regs.p.set_if(N, value & 0x80 != 0);
                self.regs.p.set_if(V, value & 0x40 != 0);
            }
            Op::Nop => {}
            Op::Lax => {
                self.regs.x = value;
                self.load_a(value);
            }
            Op::Lxa => {
                let result = (self.regs.a | 0xEE) & value;
                self.regs.x = result;
                self.load_a(result);
            }
            Op::Xaa => self.load_a((self.regs.a | 0xEE) & self.regs.x & value),
            Op::Anc => {
                self.load_a(self.regs.a & value);
                self.regs.p.set_if(C, self.regs.a & 0x80 != 0);
            }
            Op::Alr => {
                let masked = self.regs.a & value;
                self.regs.a = self.apply_rmw(Op::Lsr, masked);
            }
            Op::Arr => {
                let carry_in = if self.regs.p.is_set(C) { 0x80 } else { 0 };
                let result = ((self.regs.a & value) >> 1) | carry_in;
                self.load_a(result);
                self.regs.p.set_if(C, result & 0x40 != 0);
                self.regs.p.set_if(V, ((result >> 6) ^ (result >> 5)) & 1 != 0);
            }
            Op::Axs => {
                let masked = self.regs.a & self.regs.x;
                self.regs.p.set_if(C, masked >= value);
                self.regs.x = masked.wrapping_sub(value);
                self.regs.p.update_nz(self.regs.x);
            }
            Op::Las => {
                let result = value & self.regs.s;
                self.regs.s = result;
                self.regs.x = result;
                self.load_a(result);
            }
            _ => unreachable!("{op:?} does not read memory"),
        }
    }

    fn apply_rmw(&mut self, op: Op, value: u8) -> u8 {
        let p = &mut self.regs.p;
        let result = match op {
            Op::Asl | Op::Slo => {
                p.set_if(C, value & 0x80 != 0);
                value << 1
            }
            Op::Lsr | Op::Sre => {
                p.set_if(C, value & 0x01 != 0);
                value >> 1
            }
            Op::Rol | Op::Rla => {
                let carry_in = u8::from(p.is_set(C));
                p.set_if(C, value & 0x80 != 0);
                (value << 1) | carry_in
            }
            Op::Ror | Op::Rra => {
                let carry_in = if p.is_set(C) { 0x80 } else { 0 };
                p.set_if(C, value & 0x01 != 0);
                (value >> 1) | carry_in
            }
            Op::Inc | Op::Isc => value.wrapping_add(1),
            Op::Dec | Op::Dcp => value.wrapping_sub(1),
            _ => unreachable!("{op:?} is not read-modify-write"),
        };
        p.update_nz(result);

        // Undocumented combinations feed the result into a second operation.
        match op {
            Op::Slo => self.load_a(self.regs.a | result),
            Op::Rla => self.load_a(self.regs.a & result),
            Op::Sre => self.load_a(self.regs.a ^ result),
            Op::Rra => self.adc(result),
            Op::Dcp => self.compare(self.regs.a, result),
            Op::Isc => self.sbc(result),
            _ => {}
        }
        result
    }

    fn load_a(&mut self, value: u8) {
        self.regs.a = value;
        self.regs.p.update_nz(value);
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.regs.p.set_if(C, register >= value);
        self.regs.p.update_nz(register.wrapping_sub(value));
    }

    fn adc(&mut self, value: u8) {
        if self.regs.p.is_set(D) {
            self.adc_decimal(value);
        } else {
            self.adc_binary(value);
        }
    }

    fn adc_binary(&mut self, value: u8) {
        let a = self.regs.a;
        let sum = u16::from(a) + u16::from(value) + u16::from(self.regs.p.is_set(C));
        let result = sum as u8;
        self.regs.p.set_if(C, sum > 0xFF);
        self.regs.p.set_if(V, (a ^ result) & (value ^ result) & 0x80 != 0);
        self.load_a(result);
    }

    /// NMOS decimal add: Z comes from the binary sum, N and V from the
    /// intermediate result before the high-nibble correction.
    fn adc_decimal(&mut self, value: u8) {
        let a = self.regs.a;
        let carry = u8::from(self.regs.p.is_set(C));

        let mut lo = (a & 0x0F) + (value & 0x0F) + carry;
        if lo > 9 {
            lo += 6;
        }
        let mut hi = (a >> 4) + (value >> 4) + u8::from(lo > 0x0F);

        let binary = a.wrapping_add(value).wrapping_add(carry);
        let intermediate = (hi << 4) | (lo & 0x0F);
        self.regs.p.set_if(Z, binary == 0);
        self.regs.p.set_if(N, intermediate & 0x80 != 0);
        self.regs
            .p
            .set_if(V, (a ^ intermediate) & (value ^ intermediate) & 0x80 != 0 && (a ^ value) & 0x80 == 0);

        if hi > 9 {
            hi += 6;
        }
        self.regs.p.set_if(C, hi > 0x0F);
        self.regs.a = (hi << 4) | (lo & 0x0F);
    }

    fn sbc(&mut self, value: u8) {
        if self.regs.p.is_set(D) {
            self.sbc_decimal(value);
        } else {
            self.adc_binary(!value);
        }
    }

    /// NMOS decimal subtract: all flags come from the binary result.
    fn sbc_decimal(&mut self, value: u8) {
        let a = self.regs.a;
        let borrow = i16::from(!self.regs.p.is_set(C));

        let binary = i16::from(a) - i16::from(value) - borrow;
        let result = binary as u8;
        self.regs.p.set_if(C, binary >= 0);
        self.regs.p.update_nz(result);
        self.regs
            .p
            .set_if(V, (a ^ value) & (a ^ result) & 0x80 != 0);

        let mut lo = i16::from(a & 0x0F) - i16::from(value & 0x0F) - borrow;
        let mut hi = i16::from(a >> 4) - i16::from(value >> 4);
        if lo < 0 {
            lo -= 6;
            hi -= 1;
        }
        if hi < 0 {
            hi -= 6;
        }
        self.regs.a = ((hi << 4) as u8) | ((lo & 0x0F) as u8);
    }
}

impl Cpu for Mos6502 {
    type Registers = Registers;

    fn tick<B: Bus>(&mut self, bus: &mut B) {
        self.step(bus);
    }

    fn pc(&self) -> u32 {
        u32::from(self.regs.pc)
    }

    fn registers(&self) -> Registers {
        self.regs
    }

    fn is_halted(&self) -> bool {
        self.state == State::Halted
    }

    fn set_irq(&mut self, asserted: bool) {
        self.irq_line = asserted;
    }

    fn set_nmi(&mut self, asserted: bool) {
        if asserted && !self.nmi_line {
            self.nmi_edge = true;
        }
        self.nmi_line = asserted;
    }

    fn reset(&mut self) {
        self.state = State::Interrupt(InterruptKind::Reset);
        self.cycle = 0;
        self.pending = None;
        self.nmi_edge = false;
    }
}

const QUERY_PATHS: &[&str] = &[
    "pc",
    "a",
    "x",
    "y",
    "s",
    "p",
    "flags.c",
    "flags.z",
    "flags.i",
    "flags.d",
    "flags.v",
    "flags.n",
    "cycles",
    "halted",
    "illegal_count",
];

impl Observable for Mos6502 {
    fn query(&self, path: &str) -> Option<Value> {
        let p = self.regs.p;
        match path {
            "pc" => Some(self.regs.pc.into()),
            "a" => Some(self.regs.a.into()),
            "x" => Some(self.regs.x.into()),
            "y" => Some(self.regs.y.into()),
            "s" => Some(self.regs.s.into()),
            "p" => Some(p.0.into()),
            "flags.c" => Some(p.is_set(C).into()),
            "flags.z" => Some(p.is_set(Z).into()),
            "flags.i" => Some(p.is_set(I).into()),
            "flags.d" => Some(p.is_set(D).into()),
            "flags.v" => Some(p.is_set(V).into()),
            "flags.n" => Some(p.is_set(N).into()),
            "cycles" => Some(self.total_cycles.into()),
            "halted" => Some((self.state == State::Halted).into()),
            "illegal_count" => Some(self.illegal_count.into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        QUERY_PATHS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::SimpleBus;

    fn run_to_boundary(cpu: &mut Mos6502, bus: &mut SimpleBus) -> u32 {
        cpu.tick(bus);
        let mut ticks = 1;
        while !cpu.is_instruction_complete() && !cpu.is_halted() {
            cpu.tick(bus);
            ticks += 1;
            assert!(ticks < 16, "instruction did not complete");
        }
        ticks
    }

    #[test]
    fn reset_takes_seven_cycles_and_loads_vector() {
        let mut bus = SimpleBus::new();
        bus.load(0xFFFC, &[0x00, 0xC0]);
        let mut cpu = Mos6502::new();
        cpu.regs.s = 0x00;
        cpu.reset();

        for _ in 0..7 {
            cpu.tick(&mut bus);
        }
        assert!(cpu.is_instruction_complete());
        assert_eq!(cpu.regs.pc, 0xC000);
        assert_eq!(cpu.regs.s, 0xFD, "three phantom pushes");
        assert!(cpu.regs.p.is_set(I));
    }

    #[test]
    fn reset_never_writes_the_stack() {
        let mut bus = SimpleBus::new();
        bus.load(0xFFFC, &[0x00, 0xC0]);
        let mut cpu = Mos6502::new();
        cpu.reset();
        bus.enable_trace();
        for _ in 0..7 {
            cpu.tick(&mut bus);
        }
        assert!(bus.trace().iter().all(|&(_, _, write)| !write));
    }

    #[test]
    fn nmi_hijacks_brk_before_vector_fetch() {
        let mut bus = SimpleBus::new();
        bus.load(0x0200, &[0x00, 0x00]);
        bus.load(0xFFFA, &[0x00, 0x90]);
        bus.load(0xFFFE, &[0x00, 0x80]);
        let mut cpu = Mos6502::new();
        cpu.regs.pc = 0x0200;

        // Fetch BRK plus the first two cycles, then raise NMI.
        for _ in 0..3 {
            cpu.tick(&mut bus);
        }
        cpu.set_nmi(true);
        for _ in 0..4 {
            cpu.tick(&mut bus);
        }
        assert_eq!(cpu.regs.pc, 0x9000);
        // The pushed status still carries B from the BRK.
        assert_eq!(bus.peek(0x01FB) & flags_b(), flags_b());
    }

    fn flags_b() -> u8 {
        crate::flags::B
    }

    #[test]
    fn irq_is_masked_by_i_flag() {
        let mut bus = SimpleBus::new();
        bus.load(0x0200, &[0xEA, 0xEA]);
        bus.load(0xFFFE, &[0x00, 0x80]);
        let mut cpu = Mos6502::new();
        cpu.regs.pc = 0x0200;
        cpu.set_irq(true);

        run_to_boundary(&mut cpu, &mut bus);
        run_to_boundary(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.pc, 0x0202, "I is set after power-on");
    }

    #[test]
    fn cli_delays_irq_by_one_instruction() {
        let mut bus = SimpleBus::new();
        // CLI; INX; INX
        bus.load(0x0200, &[0x58, 0xE8, 0xE8]);
        bus.load(0xFFFE, &[0x00, 0x80]);
        let mut cpu = Mos6502::new();
        cpu.regs.pc = 0x0200;
        cpu.set_irq(true);

        run_to_boundary(&mut cpu, &mut bus); // CLI
        run_to_boundary(&mut cpu, &mut bus); // INX still runs
        assert_eq!(cpu.regs.x, 1);
        let ticks = run_to_boundary(&mut cpu, &mut bus); // IRQ sequence
        assert_eq!(ticks, 7);
        assert_eq!(cpu.regs.pc, 0x8000);
        assert_eq!(bus.peek(0x01FB) & crate::flags::B, 0, "hardware push clears B");
    }

    #[test]
    fn nmi_is_edge_triggered() {
        let mut bus = SimpleBus::new();
        bus.load(0x0200, &[0xEA; 16]);
        bus.load(0x9000, &[0xEA; 16]);
        bus.load(0xFFFA, &[0x00, 0x90]);
        let mut cpu = Mos6502::new();
        cpu.regs.pc = 0x0200;

        cpu.set_nmi(true);
        run_to_boundary(&mut cpu, &mut bus); // NOP, polls the edge
        run_to_boundary(&mut cpu, &mut bus); // NMI sequence
        assert_eq!(cpu.regs.pc, 0x9000);

        // Holding the line does not retrigger.
        cpu.set_nmi(true);
        run_to_boundary(&mut cpu, &mut bus);
        run_to_boundary(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.pc, 0x9002);
    }

    #[test]
    fn policy_nop_skips_one_byte_in_two_cycles() {
        let mut bus = SimpleBus::new();
        bus.load(0x0200, &[0xA7, 0x10]); // LAX $10 when emulated
        let mut cpu = Mos6502::with_policy(IllegalOpcodePolicy::Nop);
        cpu.regs.pc = 0x0200;
        let a_before = cpu.regs.a;

        assert_eq!(run_to_boundary(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.regs.pc, 0x0201);
        assert_eq!(cpu.regs.a, a_before);
        assert_eq!(cpu.last_illegal(), Some(IllegalOpcode { opcode: 0xA7, pc: 0x0200 }));
    }

    #[test]
    fn policy_halt_stops_on_undocumented_opcode() {
        let mut bus = SimpleBus::new();
        bus.load(0x0200, &[0x07, 0x10]);
        let mut cpu = Mos6502::with_policy(IllegalOpcodePolicy::Halt);
        cpu.regs.pc = 0x0200;
        cpu.tick(&mut bus);
        assert!(cpu.is_halted());
        assert_eq!(cpu.illegal_count(), 1);
        cpu.tick(&mut bus);
        assert!(cpu.is_halted(), "stays halted until reset");
    }

    #[test]
    fn jam_halts_under_emulation() {
        let mut bus = SimpleBus::new();
        bus.load(0x0200, &[0x02]);
        let mut cpu = Mos6502::new();
        cpu.regs.pc = 0x0200;
        run_to_boundary(&mut cpu, &mut bus);
        assert!(cpu.is_halted());
    }

    #[test]
    fn decimal_add_and_subtract() {
        let mut bus = SimpleBus::new();
        // SED; CLC; LDA #$19; ADC #$28; SEC; SBC #$09
        bus.load(0x0200, &[0xF8, 0x18, 0xA9, 0x19, 0x69, 0x28, 0x38, 0xE9, 0x09]);
        let mut cpu = Mos6502::new();
        cpu.regs.pc = 0x0200;
        for _ in 0..4 {
            run_to_boundary(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.regs.a, 0x47);
        run_to_boundary(&mut cpu, &mut bus);
        run_to_boundary(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0x38);
        assert!(cpu.regs.p.is_set(C));
    }

    #[test]
    fn observable_paths_resolve() {
        let cpu = Mos6502::new();
        for path in cpu.query_paths() {
            assert!(cpu.query(path).is_some(), "{path}");
        }
    }
}
