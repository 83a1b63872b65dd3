//! Instruction behaviour: results, flags and stack effects.

use emu_core::{Bus, Cpu, SimpleBus};
use mos_6502::{Mos6502, flags};

/// Run one complete instruction (fetch + execute cycles).
fn run_instruction(cpu: &mut Mos6502, bus: &mut SimpleBus) {
    cpu.tick(bus);
    for _ in 0..20 {
        if cpu.is_instruction_complete() || cpu.is_halted() {
            return;
        }
        cpu.tick(bus);
    }
    panic!("instruction did not complete within 20 cycles");
}

fn run(cpu: &mut Mos6502, bus: &mut SimpleBus, count: usize) {
    for _ in 0..count {
        run_instruction(cpu, bus);
    }
}

/// Load a program at $0200 and point PC at it.
fn setup(program: &[u8]) -> (Mos6502, SimpleBus) {
    let mut bus = SimpleBus::new();
    let mut cpu = Mos6502::new();
    bus.load(0x0200, program);
    cpu.regs.pc = 0x0200;
    (cpu, bus)
}

#[test]
fn pha_pla_round_trips_accumulator() {
    // LDA #$42; LDX #$FF; TXS; PHA; LDA #$00; PLA
    let (mut cpu, mut bus) = setup(&[0xA9, 0x42, 0xA2, 0xFF, 0x9A, 0x48, 0xA9, 0x00, 0x68]);
    run(&mut cpu, &mut bus, 6);

    assert_eq!(cpu.regs.a, 0x42, "PLA restores A");
    assert_eq!(cpu.regs.s, 0xFF, "stack pointer balanced");
    assert!(!cpu.regs.p.is_set(flags::Z));
}

#[test]
fn php_pushes_break_and_unused_bits() {
    // LDX #$FF; TXS; SEC; PHP; CLC; PLP
    let (mut cpu, mut bus) = setup(&[0xA2, 0xFF, 0x9A, 0x38, 0x08, 0x18, 0x28]);
    run(&mut cpu, &mut bus, 4);
    assert_eq!(bus.peek(0x01FF) & 0x30, 0x30, "PHP sets B and U in the pushed byte");

    run(&mut cpu, &mut bus, 2);
    assert!(cpu.regs.p.is_set(flags::C), "PLP restores C");
    assert!(!cpu.regs.p.is_set(flags::B), "B is not a real flag");
}

#[test]
fn brk_pushes_return_past_signature_byte() {
    // LDX #$FF; TXS; CLI; BRK; (signature)
    let (mut cpu, mut bus) = setup(&[0xA2, 0xFF, 0x9A, 0x58, 0x00, 0xEA]);
    bus.load(0xFFFE, &[0x00, 0x03]);
    run(&mut cpu, &mut bus, 4);

    assert_eq!(cpu.pc(), 0x0300);
    assert_eq!(cpu.regs.s, 0xFC);
    assert!(cpu.regs.p.is_set(flags::I));
    assert_eq!(bus.peek(0x01FF), 0x02, "PCH");
    assert_eq!(bus.peek(0x01FE), 0x06, "PCL skips the signature byte");
    let pushed = bus.peek(0x01FD);
    assert_eq!(pushed & 0x30, 0x30, "B and U pushed");
    assert_eq!(pushed & flags::I, 0, "I was clear when BRK ran");
}

#[test]
fn rti_returns_from_brk_handler() {
    let (mut cpu, mut bus) = setup(&[0xA2, 0xFF, 0x9A, 0x00, 0xEA, 0xA9, 0x07]);
    bus.load(0xFFFE, &[0x00, 0x03]);
    bus.write(0x0300, 0x40); // RTI
    run(&mut cpu, &mut bus, 5);

    assert_eq!(cpu.pc(), 0x0207, "after RTI and LDA");
    assert_eq!(cpu.regs.a, 0x07);
    assert_eq!(cpu.regs.s, 0xFF);
}

#[test]
fn jsr_rts_round_trip() {
    // JSR $0300; LDA #$11   /  $0300: LDX #$22; RTS
    let (mut cpu, mut bus) = setup(&[0x20, 0x00, 0x03, 0xA9, 0x11]);
    bus.load(0x0300, &[0xA2, 0x22, 0x60]);
    cpu.regs.s = 0xFF;

    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.pc(), 0x0300);
    assert_eq!(bus.peek(0x01FF), 0x02);
    assert_eq!(bus.peek(0x01FE), 0x02, "JSR pushes the address of its last byte");

    run(&mut cpu, &mut bus, 3);
    assert_eq!((cpu.regs.a, cpu.regs.x), (0x11, 0x22));
    assert_eq!(cpu.regs.s, 0xFF);
}

#[test]
fn jmp_indirect_does_not_cross_page() {
    let (mut cpu, mut bus) = setup(&[0x6C, 0xFF, 0x10]);
    bus.write(0x10FF, 0x34);
    bus.write(0x1000, 0x12);
    bus.write(0x1100, 0x99);
    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.pc(), 0x1234);
}

#[test]
fn zero_page_indexing_wraps() {
    // LDX #$10; LDA $F8,X  -> reads $08
    let (mut cpu, mut bus) = setup(&[0xA2, 0x10, 0xB5, 0xF8]);
    bus.write(0x0008, 0x5A);
    bus.write(0x0108, 0xFF);
    run(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.regs.a, 0x5A);
}

#[test]
fn indexed_indirect_and_indirect_indexed() {
    // LDX #$04; LDA ($20,X); LDY #$10; ORA ($30),Y
    let (mut cpu, mut bus) = setup(&[0xA2, 0x04, 0xA1, 0x20, 0xA0, 0x10, 0x11, 0x30]);
    bus.load(0x0024, &[0x00, 0x40]);
    bus.write(0x4000, 0x01);
    bus.load(0x0030, &[0xF8, 0x40]);
    bus.write(0x4108, 0x80);
    run(&mut cpu, &mut bus, 4);
    assert_eq!(cpu.regs.a, 0x81);
    assert!(cpu.regs.p.is_set(flags::N));
}

#[test]
fn binary_adc_sets_overflow() {
    // CLC; LDA #$50; ADC #$50
    let (mut cpu, mut bus) = setup(&[0x18, 0xA9, 0x50, 0x69, 0x50]);
    run(&mut cpu, &mut bus, 3);
    assert_eq!(cpu.regs.a, 0xA0);
    assert!(cpu.regs.p.is_set(flags::V));
    assert!(cpu.regs.p.is_set(flags::N));
    assert!(!cpu.regs.p.is_set(flags::C));
}

#[test]
fn binary_sbc_borrows() {
    // SEC; LDA #$00; SBC #$01
    let (mut cpu, mut bus) = setup(&[0x38, 0xA9, 0x00, 0xE9, 0x01]);
    run(&mut cpu, &mut bus, 3);
    assert_eq!(cpu.regs.a, 0xFF);
    assert!(!cpu.regs.p.is_set(flags::C), "borrow clears C");
}

#[test]
fn decimal_adc_carries_out() {
    // SED; CLC; LDA #$99; ADC #$01
    let (mut cpu, mut bus) = setup(&[0xF8, 0x18, 0xA9, 0x99, 0x69, 0x01]);
    run(&mut cpu, &mut bus, 4);
    assert_eq!(cpu.regs.a, 0x00);
    assert!(cpu.regs.p.is_set(flags::C));
}

#[test]
fn compare_sets_carry_and_zero() {
    // LDA #$40; CMP #$40
    let (mut cpu, mut bus) = setup(&[0xA9, 0x40, 0xC9, 0x40]);
    run(&mut cpu, &mut bus, 2);
    assert!(cpu.regs.p.is_set(flags::Z));
    assert!(cpu.regs.p.is_set(flags::C));

    let (mut cpu, mut bus) = setup(&[0xA2, 0x01, 0xE0, 0x02]);
    run(&mut cpu, &mut bus, 2);
    assert!(!cpu.regs.p.is_set(flags::C));
    assert!(cpu.regs.p.is_set(flags::N));
}

#[test]
fn bit_copies_high_bits() {
    let (mut cpu, mut bus) = setup(&[0xA9, 0x01, 0x24, 0x10]);
    bus.write(0x0010, 0xC0);
    run(&mut cpu, &mut bus, 2);
    assert!(cpu.regs.p.is_set(flags::N));
    assert!(cpu.regs.p.is_set(flags::V));
    assert!(cpu.regs.p.is_set(flags::Z));
}

#[test]
fn rmw_rotates_through_carry() {
    // SEC; ROL $10; ROR A
    let (mut cpu, mut bus) = setup(&[0x38, 0x26, 0x10, 0xA9, 0x01, 0x6A]);
    bus.write(0x0010, 0x80);
    run(&mut cpu, &mut bus, 2);
    assert_eq!(bus.peek(0x0010), 0x01);
    assert!(cpu.regs.p.is_set(flags::C));

    run(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.regs.a, 0x80);
    assert!(cpu.regs.p.is_set(flags::C));
}

#[test]
fn rmw_writes_old_value_before_new() {
    let (mut cpu, mut bus) = setup(&[0xEE, 0x00, 0x30]); // INC $3000
    bus.write(0x3000, 0x41);
    bus.enable_trace();
    run_instruction(&mut cpu, &mut bus);

    let writes: Vec<_> = bus
        .trace()
        .iter()
        .filter(|&&(_, _, write)| write)
        .map(|&(addr, value, _)| (addr, value))
        .collect();
    assert_eq!(writes, vec![(0x3000, 0x41), (0x3000, 0x42)]);
}

#[test]
fn branch_backwards_across_page() {
    // BNE at $0300 back to DEX at $02FE.
    let (mut cpu, mut bus) = setup(&[]);
    bus.load(0x02FE, &[0xCA, 0xEA]);
    bus.load(0x0300, &[0xD0, 0xFC]); // BNE $02FE
    cpu.regs.pc = 0x0300;
    cpu.regs.x = 2;
    run_instruction(&mut cpu, &mut bus);
    assert_eq!(cpu.pc(), 0x02FE);
    run_instruction(&mut cpu, &mut bus); // DEX
    assert_eq!(cpu.regs.x, 1);
}

// Undocumented opcodes.

#[test]
fn lax_loads_a_and_x() {
    let (mut cpu, mut bus) = setup(&[0xA7, 0x10]);
    bus.write(0x0010, 0x42);
    run_instruction(&mut cpu, &mut bus);
    assert_eq!((cpu.regs.a, cpu.regs.x), (0x42, 0x42));
    assert_eq!(cpu.illegal_count(), 1);
}

#[test]
fn sax_stores_a_and_x() {
    let (mut cpu, mut bus) = setup(&[0xA9, 0xF0, 0xA2, 0x3C, 0x87, 0x10]);
    run(&mut cpu, &mut bus, 3);
    assert_eq!(bus.peek(0x0010), 0x30);
}

#[test]
fn slo_shifts_then_ors() {
    let (mut cpu, mut bus) = setup(&[0xA9, 0x01, 0x07, 0x10]);
    bus.write(0x0010, 0x81);
    run(&mut cpu, &mut bus, 2);
    assert_eq!(bus.peek(0x0010), 0x02);
    assert_eq!(cpu.regs.a, 0x03);
    assert!(cpu.regs.p.is_set(flags::C));
}

#[test]
fn rla_rotates_then_ands() {
    // SEC; LDA #$FF; RLA $10
    let (mut cpu, mut bus) = setup(&[0x38, 0xA9, 0xFF, 0x27, 0x10]);
    bus.write(0x0010, 0x40);
    run(&mut cpu, &mut bus, 3);
    assert_eq!(bus.peek(0x0010), 0x81);
    assert_eq!(cpu.regs.a, 0x81);
}

#[test]
fn dcp_decrements_then_compares() {
    let (mut cpu, mut bus) = setup(&[0xA9, 0x41, 0xC7, 0x10]);
    bus.write(0x0010, 0x42);
    run(&mut cpu, &mut bus, 2);
    assert_eq!(bus.peek(0x0010), 0x41);
    assert!(cpu.regs.p.is_set(flags::Z));
    assert!(cpu.regs.p.is_set(flags::C));
}

#[test]
fn isc_increments_then_subtracts() {
    // SEC; LDA #$10; ISC $10
    let (mut cpu, mut bus) = setup(&[0x38, 0xA9, 0x10, 0xE7, 0x10]);
    bus.write(0x0010, 0x0F);
    run(&mut cpu, &mut bus, 3);
    assert_eq!(bus.peek(0x0010), 0x10);
    assert_eq!(cpu.regs.a, 0x00);
    assert!(cpu.regs.p.is_set(flags::Z));
}

#[test]
fn anc_copies_n_into_c() {
    let (mut cpu, mut bus) = setup(&[0xA9, 0xFF, 0x0B, 0x80]);
    run(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.regs.a, 0x80);
    assert!(cpu.regs.p.is_set(flags::C));
}

#[test]
fn alr_ands_then_shifts() {
    let (mut cpu, mut bus) = setup(&[0xA9, 0xFF, 0x4B, 0x0F]);
    run(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.regs.a, 0x07);
    assert!(cpu.regs.p.is_set(flags::C));
}

#[test]
fn axs_subtracts_from_a_and_x() {
    let (mut cpu, mut bus) = setup(&[0xA9, 0x0F, 0xA2, 0xFF, 0xCB, 0x0F]);
    run(&mut cpu, &mut bus, 3);
    assert_eq!(cpu.regs.x, 0x00);
    assert!(cpu.regs.p.is_set(flags::Z));
    assert!(cpu.regs.p.is_set(flags::C));
}

#[test]
fn undocumented_nops_consume_operands() {
    for (program, length) in [
        (&[0x1A, 0xA9, 0x42][..], 1u16),
        (&[0x80, 0xFF, 0xA9, 0x42][..], 2),
        (&[0x0C, 0x00, 0x10, 0xA9, 0x42][..], 3),
    ] {
        let (mut cpu, mut bus) = setup(program);
        run_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.pc, 0x0200 + length);
        run_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0x42, "following LDA runs");
    }
}

#[test]
fn jam_freezes_pc() {
    let (mut cpu, mut bus) = setup(&[0x02, 0xA9, 0x42]);
    cpu.tick(&mut bus);
    cpu.tick(&mut bus);
    let pc = cpu.pc();
    for _ in 0..10 {
        cpu.tick(&mut bus);
    }
    assert!(cpu.is_halted());
    assert_eq!(cpu.pc(), pc);
    assert_ne!(cpu.regs.a, 0x42);

    cpu.reset();
    assert!(!cpu.is_halted(), "reset clears the jam");
}

#[test]
fn jammed_core_only_reads_ffff() {
    let (mut cpu, mut bus) = setup(&[0x02, 0xAD, 0x00, 0x02]);
    for _ in 0..4 {
        cpu.tick(&mut bus);
    }
    assert!(cpu.is_halted());

    bus.enable_trace();
    for _ in 0..8 {
        cpu.tick(&mut bus);
    }
    assert_eq!(bus.trace().len(), 8, "one access per cycle");
    assert!(
        bus.trace().iter().all(|&(address, _, write)| address == 0xFFFF && !write),
        "halted core must not touch the program or I/O: {:?}",
        bus.trace()
    );
}
