//! CPU tests for the NES emulator

use nes_core::bus::{FlatMemory, Memory};
use nes_core::cpu::{Cpu, CpuError, StatusFlags, NMI_VECTOR, RESET_VECTOR};

fn setup(program: &[u8]) -> (Cpu, FlatMemory) {
    let mut mem = FlatMemory::new();
    mem.load(0x8000, program);
    mem.load(RESET_VECTOR, &[0x00, 0x80]);
    let mut cpu = Cpu::new();
    cpu.reset(&mut mem);
    cpu.registers_mut().sp = 0xFD;
    (cpu, mem)
}

/// Run `opcode #operand` once with the given A and P
fn run_immediate(cpu: &mut Cpu, mem: &mut FlatMemory, opcode: u8, a: u8, operand: u8, p: u8) {
    mem.load(0x8000, &[opcode, operand]);
    cpu.registers_mut().pc = 0x8000;
    cpu.registers_mut().a = a;
    cpu.set_status(p);
    cpu.step(mem).unwrap();
}

#[test]
fn test_cpu_reset() {
    let (cpu, _) = setup(&[]);
    assert_eq!(cpu.registers().a, 0);
    assert_eq!(cpu.registers().x, 0);
    assert_eq!(cpu.registers().y, 0);
    assert_eq!(cpu.registers().pc, 0x8000);
    assert_eq!(cpu.cycles(), 0);
    assert!(!cpu.nmi_pending());
}

#[test]
fn test_adc_zero_page_scenario() {
    let (mut cpu, mut mem) = setup(&[0x65, 0x10]);
    cpu.registers_mut().a = 0x01;
    mem.write8(0x0010, 0x01);
    assert!(!cpu.status().carry());

    let cycles = cpu.step(&mut mem).unwrap();

    let status = cpu.status();
    assert_eq!(cpu.registers().a, 0x02);
    assert!(!status.zero());
    assert!(!status.negative());
    assert!(!status.carry());
    assert!(!status.overflow());
    assert_eq!(cpu.registers().pc, 0x8002);
    assert_eq!(cycles, 3);
}

#[test]
fn test_adc_flags_for_all_operands() {
    let (mut cpu, mut mem) = setup(&[]);
    for a in 0..=255u8 {
        for b in 0..=255u8 {
            run_immediate(&mut cpu, &mut mem, 0x69, a, b, StatusFlags::UNUSED);
            let result = a.wrapping_add(b);
            let status = cpu.status();
            assert_eq!(cpu.registers().a, result);
            assert_eq!(status.carry(), a as u16 + b as u16 > 0xFF, "{:02X}+{:02X}", a, b);
            assert_eq!(
                status.overflow(),
                (!(a ^ b) & (a ^ result) & 0x80) != 0,
                "{:02X}+{:02X}",
                a,
                b
            );
            assert_eq!(status.zero(), result == 0);
            assert_eq!(status.negative(), result & 0x80 != 0);
        }
    }
}

#[test]
fn test_sbc_flags_for_all_operands() {
    let (mut cpu, mut mem) = setup(&[]);
    for a in 0..=255u8 {
        for b in 0..=255u8 {
            // Carry set means no borrow
            run_immediate(
                &mut cpu,
                &mut mem,
                0xE9,
                a,
                b,
                StatusFlags::UNUSED | StatusFlags::CARRY,
            );
            let result = a.wrapping_sub(b);
            let status = cpu.status();
            assert_eq!(cpu.registers().a, result);
            assert_eq!(status.carry(), a >= b, "{:02X}-{:02X}", a, b);
            assert_eq!(
                status.overflow(),
                ((a ^ b) & (a ^ result) & 0x80) != 0,
                "{:02X}-{:02X}",
                a,
                b
            );
        }
    }
}

#[test]
fn test_overflow_without_carry_and_carry_without_overflow() {
    let (mut cpu, mut mem) = setup(&[]);

    // Same-sign operands: 0x50 + 0x50 overflows into the sign bit
    run_immediate(&mut cpu, &mut mem, 0x69, 0x50, 0x50, StatusFlags::UNUSED);
    assert!(cpu.status().overflow());
    assert!(!cpu.status().carry());

    // Mixed signs: 0xFF + 0x01 wraps without overflow
    run_immediate(&mut cpu, &mut mem, 0x69, 0xFF, 0x01, StatusFlags::UNUSED);
    assert!(!cpu.status().overflow());
    assert!(cpu.status().carry());
    assert!(cpu.status().zero());
}

#[test]
fn test_load_flags_match_result() {
    let (mut cpu, mut mem) = setup(&[]);
    // LDA, LDX, LDY, AND, ORA, EOR immediate
    for opcode in [0xA9, 0xA2, 0xA0, 0x29, 0x09, 0x49] {
        for value in 0..=255u8 {
            run_immediate(&mut cpu, &mut mem, opcode, 0xA5, value, StatusFlags::UNUSED);
            let regs = cpu.registers();
            let result = match opcode {
                0xA9 => regs.a,
                0xA2 => regs.x,
                0xA0 => regs.y,
                _ => regs.a,
            };
            assert_eq!(cpu.status().zero(), result == 0, "{:02X} {:02X}", opcode, value);
            assert_eq!(cpu.status().negative(), result & 0x80 != 0);
        }
    }
}

#[test]
fn test_stack_round_trip_wraps() {
    // LDA #1; PHA; LDA #2; PHA; LDA #3; PHA; PLA; PLA; PLA
    let program = [
        0xA9, 0x01, 0x48, 0xA9, 0x02, 0x48, 0xA9, 0x03, 0x48, 0x68, 0x68, 0x68,
    ];
    let (mut cpu, mut mem) = setup(&program);
    cpu.registers_mut().sp = 0x01;

    for _ in 0..6 {
        cpu.step(&mut mem).unwrap();
    }
    assert_eq!(cpu.registers().sp, 0xFE);
    assert_eq!(mem.read8(0x0101), 1);
    assert_eq!(mem.read8(0x0100), 2);
    assert_eq!(mem.read8(0x01FF), 3);

    let mut popped = Vec::new();
    for _ in 0..3 {
        cpu.step(&mut mem).unwrap();
        popped.push(cpu.registers().a);
    }
    assert_eq!(popped, vec![3, 2, 1]);
    assert_eq!(cpu.registers().sp, 0x01);
}

#[test]
fn test_nmi_rti_round_trip() {
    let (mut cpu, mut mem) = setup(&[0xEA]);
    mem.load(NMI_VECTOR, &[0x00, 0x90]);
    mem.load(0x9000, &[0x40]); // RTI
    cpu.registers_mut().pc = 0x8123;
    let before = StatusFlags::UNUSED | StatusFlags::CARRY | StatusFlags::NEGATIVE;
    cpu.set_status(before);

    cpu.trigger_nmi();
    assert_eq!(cpu.step(&mut mem).unwrap(), 7);
    assert_eq!(cpu.registers().pc, 0x9000);
    assert!(cpu.status().interrupt());
    // Pushed copy of P has Break clear
    assert_eq!(mem.read8(0x01FB) & StatusFlags::BREAK, 0);

    cpu.step(&mut mem).unwrap();
    assert_eq!(cpu.registers().pc, 0x8123);
    assert_eq!(cpu.status().bits(), before);
    assert_eq!(cpu.registers().sp, 0xFD);
}

#[test]
fn test_nmi_ignores_interrupt_disable() {
    let (mut cpu, mut mem) = setup(&[0xEA]);
    mem.load(NMI_VECTOR, &[0x00, 0x90]);
    cpu.set_status(StatusFlags::UNUSED | StatusFlags::INTERRUPT);
    cpu.trigger_nmi();
    cpu.step(&mut mem).unwrap();
    assert_eq!(cpu.registers().pc, 0x9000);
}

#[test]
fn test_status_flags() {
    let mut flags = StatusFlags::new(0xFF);
    assert!(flags.carry());
    assert!(flags.zero());
    assert!(flags.interrupt());
    assert!(flags.overflow());
    assert!(flags.negative());

    flags.set_carry(false);
    assert!(!flags.carry());

    flags.set_overflow(true);
    assert!(flags.overflow());
}

#[test]
fn test_disassemble_at_pc() {
    let (cpu, mut mem) = setup(&[0xB9, 0x00, 0x03]);
    let (text, len) = cpu.disassemble(&mut mem);
    assert_eq!(text, "LDA $0300,Y");
    assert_eq!(len, 3);
}

#[test]
fn test_every_opcode_moves_pc() {
    for opcode in 0..=255u8 {
        let mut mem = FlatMemory::new();
        mem.load(0x0200, &[opcode]);
        let mut cpu = Cpu::new();
        cpu.reset(&mut mem);
        cpu.registers_mut().pc = 0x0200;
        cpu.registers_mut().sp = 0xFD;

        let cycles = match cpu.step(&mut mem) {
            Ok(cycles) => cycles,
            Err(CpuError::IllegalOpcode { opcode: op, pc }) => {
                assert_eq!((op, pc), (opcode, 0x0200));
                assert_eq!(cpu.registers().pc, 0x0201);
                cpu.cycles()
            }
        };
        assert!(cycles >= 2, "opcode {:02X} took {} cycles", opcode, cycles);
        assert_ne!(cpu.registers().pc, 0x0200, "opcode {:02X} left PC in place", opcode);
    }
}
