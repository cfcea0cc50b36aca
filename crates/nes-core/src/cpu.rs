//! CPU module - 2A03 (6502 variant) implementation
//!
//! The NES uses a modified 6502 CPU without decimal mode. Instructions are
//! dispatched through [`crate::opcode::OPCODES`]; the addressing resolver
//! hands back the operand location together with a page-crossing flag, and
//! the cycle cost is computed from the table entry and that flag.

use std::fmt;

use tracing::{debug, trace};

use crate::bus::Memory;
use crate::opcode::{self, AddressingMode, Instruction, Mnemonic};

/// NMI vector
pub const NMI_VECTOR: u16 = 0xFFFA;
/// Reset vector
pub const RESET_VECTOR: u16 = 0xFFFC;
/// IRQ/BRK vector
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// Cycles taken to enter an interrupt handler
pub const INTERRUPT_CYCLES: u32 = 7;

/// Base of the hardware stack page
const STACK_BASE: u16 = 0x0100;

/// 2A03 CPU registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuRegisters {
    pub a: u8,   // Accumulator
    pub x: u8,   // X index register
    pub y: u8,   // Y index register
    pub sp: u8,  // Stack pointer
    pub pc: u16, // Program counter
}

/// CPU status flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags(u8);

impl StatusFlags {
    pub const CARRY: u8 = 0b00000001;
    pub const ZERO: u8 = 0b00000010;
    pub const INTERRUPT: u8 = 0b00000100;
    pub const DECIMAL: u8 = 0b00001000;
    pub const BREAK: u8 = 0b00010000;
    pub const UNUSED: u8 = 0b00100000;
    pub const OVERFLOW: u8 = 0b01000000;
    pub const NEGATIVE: u8 = 0b10000000;

    pub fn new(flags: u8) -> Self {
        Self(flags)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Returns true if every bit in `mask` is set
    pub fn contains(&self, mask: u8) -> bool {
        self.0 & mask == mask
    }

    pub fn set(&mut self, mask: u8, on: bool) {
        self.0 = if on { self.0 | mask } else { self.0 & !mask };
    }

    pub fn carry(&self) -> bool {
        self.contains(Self::CARRY)
    }

    pub fn zero(&self) -> bool {
        self.contains(Self::ZERO)
    }

    pub fn interrupt(&self) -> bool {
        self.contains(Self::INTERRUPT)
    }

    pub fn decimal(&self) -> bool {
        self.contains(Self::DECIMAL)
    }

    pub fn overflow(&self) -> bool {
        self.contains(Self::OVERFLOW)
    }

    pub fn negative(&self) -> bool {
        self.contains(Self::NEGATIVE)
    }

    pub fn set_carry(&mut self, val: bool) {
        self.set(Self::CARRY, val);
    }

    pub fn set_zero(&mut self, val: bool) {
        self.set(Self::ZERO, val);
    }

    pub fn set_interrupt(&mut self, val: bool) {
        self.set(Self::INTERRUPT, val);
    }

    pub fn set_decimal(&mut self, val: bool) {
        self.set(Self::DECIMAL, val);
    }

    pub fn set_overflow(&mut self, val: bool) {
        self.set(Self::OVERFLOW, val);
    }

    pub fn set_negative(&mut self, val: bool) {
        self.set(Self::NEGATIVE, val);
    }

    /// Value pushed to the stack: Unused always set, Break only for PHP/BRK
    fn pushed(&self, brk: bool) -> u8 {
        let p = self.0 | Self::UNUSED;
        if brk {
            p | Self::BREAK
        } else {
            p & !Self::BREAK
        }
    }

    /// Value restored from the stack by PLP and RTI
    fn pulled(value: u8) -> Self {
        Self((value & !Self::BREAK) | Self::UNUSED)
    }
}

impl fmt::Display for StatusFlags {
    /// Renders as `NV-BDIZC`, upper case for set flags
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [char; 8] = ['N', 'V', '-', 'B', 'D', 'I', 'Z', 'C'];
        for (i, name) in NAMES.iter().enumerate() {
            let set = self.0 & (0x80 >> i) != 0;
            if *name == '-' || set {
                write!(f, "{}", name)?;
            } else {
                write!(f, "{}", name.to_ascii_lowercase())?;
            }
        }
        Ok(())
    }
}

/// Where an instruction's operand lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Implied,
    Accumulator,
    Address(u16),
}

/// Output of the addressing resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub operand: Operand,
    /// Indexed or relative address landed on a different page than its base
    pub page_crossed: bool,
}

impl Resolved {
    fn at(address: u16) -> Self {
        Self { operand: Operand::Address(address), page_crossed: false }
    }

    fn indexed(base: u16, address: u16) -> Self {
        Self { operand: Operand::Address(address), page_crossed: crosses_page(base, address) }
    }
}

#[inline]
fn crosses_page(a: u16, b: u16) -> bool {
    (a ^ b) & 0xFF00 != 0
}

/// CPU error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuError {
    /// Opcode with no documented behavior. `pc` is the address it was fetched from.
    IllegalOpcode { opcode: u8, pc: u16 },
}

impl fmt::Display for CpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuError::IllegalOpcode { opcode, pc } => {
                write!(f, "Illegal opcode 0x{:02X} at ${:04X}", opcode, pc)
            }
        }
    }
}

impl std::error::Error for CpuError {}

/// 2A03 CPU
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    registers: CpuRegisters,
    status: StatusFlags,
    nmi_pending: bool,
    /// Cycles consumed since the driver last drained the counter
    cycles: u32,
}

impl Cpu {
    /// Create a CPU in its power-on state. Call [`Cpu::reset`] before stepping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the CPU.
    ///
    /// Registers and status are zeroed, PC is loaded from the reset vector, a
    /// pending NMI is dropped and the cycle counter cleared. Peripheral latch
    /// state on the memory side is reset too.
    pub fn reset<M: Memory + ?Sized>(&mut self, mem: &mut M) {
        self.registers = CpuRegisters::default();
        self.status = StatusFlags::default();
        self.registers.pc = read16(mem, RESET_VECTOR);
        self.nmi_pending = false;
        self.cycles = 0;
        mem.reset_peripherals();
    }

    pub fn registers(&self) -> &CpuRegisters {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut CpuRegisters {
        &mut self.registers
    }

    pub fn status(&self) -> StatusFlags {
        self.status
    }

    pub fn set_status(&mut self, p: u8) {
        self.status = StatusFlags::new(p);
    }

    /// Cycles consumed since the last drain
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn reset_cycles(&mut self) {
        self.cycles = 0;
    }

    /// Drain `budget` cycles from the counter, keeping any overshoot
    pub fn consume_cycles(&mut self, budget: u32) {
        self.cycles = self.cycles.saturating_sub(budget);
    }

    /// Charge extra cycles, e.g. a DMA stall
    pub fn add_cycles(&mut self, cycles: u32) {
        self.cycles += cycles;
    }

    /// Raise the NMI line. Serviced before the next instruction fetch.
    pub fn trigger_nmi(&mut self) {
        self.nmi_pending = true;
    }

    pub fn nmi_pending(&self) -> bool {
        self.nmi_pending
    }

    /// Request a maskable interrupt. Returns the cycles spent, 0 when masked.
    pub fn irq<M: Memory + ?Sized>(&mut self, mem: &mut M) -> u32 {
        if self.status.interrupt() {
            return 0;
        }
        let cycles = self.interrupt(mem, IRQ_VECTOR);
        self.cycles += cycles;
        cycles
    }

    /// Disassemble the instruction at the current PC
    pub fn disassemble<M: Memory + ?Sized>(&self, mem: &mut M) -> (String, u16) {
        opcode::disassemble(mem, self.registers.pc)
    }

    /// Execute one instruction, or enter the NMI handler if one is pending.
    ///
    /// Returns the cycles consumed; the same amount is added to
    /// [`Cpu::cycles`].
    pub fn step<M: Memory + ?Sized>(&mut self, mem: &mut M) -> Result<u32, CpuError> {
        if self.nmi_pending {
            self.nmi_pending = false;
            let cycles = self.interrupt(mem, NMI_VECTOR);
            self.cycles += cycles;
            return Ok(cycles);
        }

        let pc = self.registers.pc;
        let opcode = self.fetch8(mem);
        let instruction = opcode::decode(opcode);

        trace!(
            "{:04X}  {:02X}  {:<3}  A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X}",
            pc,
            opcode,
            instruction.mnemonic,
            self.registers.a,
            self.registers.x,
            self.registers.y,
            self.status.bits(),
            self.registers.sp
        );

        if instruction.is_illegal() {
            self.cycles += instruction.cycles as u32;
            debug!("illegal opcode {:02X} at {:04X}", opcode, pc);
            return Err(CpuError::IllegalOpcode { opcode, pc });
        }

        let resolved = self.resolve(mem, instruction.mode);
        let extra = self.execute(mem, &instruction, resolved);

        let mut cycles = instruction.cycles as u32 + extra;
        if instruction.page_penalty && resolved.page_crossed {
            cycles += 1;
        }
        self.cycles += cycles;
        Ok(cycles)
    }

    // Instruction stream

    fn fetch8<M: Memory + ?Sized>(&mut self, mem: &mut M) -> u8 {
        let value = mem.read8(self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        value
    }

    fn fetch16<M: Memory + ?Sized>(&mut self, mem: &mut M) -> u16 {
        let lo = self.fetch8(mem);
        let hi = self.fetch8(mem);
        u16::from_le_bytes([lo, hi])
    }

    /// Resolve the operand, consuming its bytes from the instruction stream
    fn resolve<M: Memory + ?Sized>(&mut self, mem: &mut M, mode: AddressingMode) -> Resolved {
        use AddressingMode::*;

        match mode {
            Implied => Resolved { operand: Operand::Implied, page_crossed: false },
            Accumulator => Resolved { operand: Operand::Accumulator, page_crossed: false },
            Immediate => {
                let address = self.registers.pc;
                self.registers.pc = self.registers.pc.wrapping_add(1);
                Resolved::at(address)
            }
            ZeroPage => Resolved::at(self.fetch8(mem) as u16),
            ZeroPageX => Resolved::at(self.fetch8(mem).wrapping_add(self.registers.x) as u16),
            ZeroPageY => Resolved::at(self.fetch8(mem).wrapping_add(self.registers.y) as u16),
            Absolute => Resolved::at(self.fetch16(mem)),
            AbsoluteX => {
                let base = self.fetch16(mem);
                Resolved::indexed(base, base.wrapping_add(self.registers.x as u16))
            }
            AbsoluteY => {
                let base = self.fetch16(mem);
                Resolved::indexed(base, base.wrapping_add(self.registers.y as u16))
            }
            Indirect => {
                // The pointer's high byte never carries into the next page
                let ptr = self.fetch16(mem);
                let lo = mem.read8(ptr);
                let hi = mem.read8((ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF));
                Resolved::at(u16::from_le_bytes([lo, hi]))
            }
            IndirectX => {
                let zp = self.fetch8(mem).wrapping_add(self.registers.x);
                Resolved::at(read16_zp(mem, zp))
            }
            IndirectY => {
                let zp = self.fetch8(mem);
                let base = read16_zp(mem, zp);
                Resolved::indexed(base, base.wrapping_add(self.registers.y as u16))
            }
            Relative => {
                let offset = self.fetch8(mem) as i8;
                let next = self.registers.pc;
                Resolved::indexed(next, next.wrapping_add(offset as u16))
            }
        }
    }

    fn load<M: Memory + ?Sized>(&mut self, mem: &mut M, operand: Operand) -> u8 {
        match operand {
            Operand::Accumulator => self.registers.a,
            Operand::Address(address) => mem.read8(address),
            Operand::Implied => 0,
        }
    }

    fn store<M: Memory + ?Sized>(&mut self, mem: &mut M, operand: Operand, value: u8) {
        match operand {
            Operand::Accumulator => self.registers.a = value,
            Operand::Address(address) => mem.write8(address, value),
            Operand::Implied => {}
        }
    }

    fn address(operand: Operand) -> u16 {
        match operand {
            Operand::Address(address) => address,
            _ => 0,
        }
    }

    /// Run the operation. Returns cycles beyond the table cost (branches only).
    fn execute<M: Memory + ?Sized>(
        &mut self,
        mem: &mut M,
        instruction: &Instruction,
        resolved: Resolved,
    ) -> u32 {
        use Mnemonic::*;

        let operand = resolved.operand;
        match instruction.mnemonic {
            // Loads and stores
            Lda => {
                let value = self.load(mem, operand);
                self.op_lda(value);
            }
            Ldx => {
                let value = self.load(mem, operand);
                self.op_ldx(value);
            }
            Ldy => {
                let value = self.load(mem, operand);
                self.op_ldy(value);
            }
            Sta => self.store(mem, operand, self.registers.a),
            Stx => self.store(mem, operand, self.registers.x),
            Sty => self.store(mem, operand, self.registers.y),

            // Transfers
            Tax => self.op_tax(),
            Tay => self.op_tay(),
            Tsx => self.op_tsx(),
            Txa => self.op_txa(),
            Txs => self.registers.sp = self.registers.x,
            Tya => self.op_tya(),

            // Arithmetic
            Adc => {
                let value = self.load(mem, operand);
                self.op_adc(value);
            }
            Sbc => {
                let value = self.load(mem, operand);
                self.op_adc(!value);
            }
            Cmp => {
                let value = self.load(mem, operand);
                self.compare(self.registers.a, value);
            }
            Cpx => {
                let value = self.load(mem, operand);
                self.compare(self.registers.x, value);
            }
            Cpy => {
                let value = self.load(mem, operand);
                self.compare(self.registers.y, value);
            }

            // Increments and decrements
            Inc => {
                let value = self.load(mem, operand).wrapping_add(1);
                self.store(mem, operand, value);
                self.set_zn(value);
            }
            Dec => {
                let value = self.load(mem, operand).wrapping_sub(1);
                self.store(mem, operand, value);
                self.set_zn(value);
            }
            Inx => {
                self.registers.x = self.registers.x.wrapping_add(1);
                self.set_zn(self.registers.x);
            }
            Iny => {
                self.registers.y = self.registers.y.wrapping_add(1);
                self.set_zn(self.registers.y);
            }
            Dex => {
                self.registers.x = self.registers.x.wrapping_sub(1);
                self.set_zn(self.registers.x);
            }
            Dey => {
                self.registers.y = self.registers.y.wrapping_sub(1);
                self.set_zn(self.registers.y);
            }

            // Logical
            And => {
                let value = self.load(mem, operand);
                self.op_lda(self.registers.a & value);
            }
            Ora => {
                let value = self.load(mem, operand);
                self.op_lda(self.registers.a | value);
            }
            Eor => {
                let value = self.load(mem, operand);
                self.op_lda(self.registers.a ^ value);
            }
            Bit => {
                let value = self.load(mem, operand);
                self.op_bit(value);
            }

            // Shifts and rotates
            Asl => {
                let value = self.load(mem, operand);
                let result = self.op_asl(value);
                self.store(mem, operand, result);
            }
            Lsr => {
                let value = self.load(mem, operand);
                let result = self.op_lsr(value);
                self.store(mem, operand, result);
            }
            Rol => {
                let value = self.load(mem, operand);
                let result = self.op_rol(value);
                self.store(mem, operand, result);
            }
            Ror => {
                let value = self.load(mem, operand);
                let result = self.op_ror(value);
                self.store(mem, operand, result);
            }

            // Branches
            Bcc => return self.branch(!self.status.carry(), resolved),
            Bcs => return self.branch(self.status.carry(), resolved),
            Beq => return self.branch(self.status.zero(), resolved),
            Bne => return self.branch(!self.status.zero(), resolved),
            Bmi => return self.branch(self.status.negative(), resolved),
            Bpl => return self.branch(!self.status.negative(), resolved),
            Bvs => return self.branch(self.status.overflow(), resolved),
            Bvc => return self.branch(!self.status.overflow(), resolved),

            // Jumps and returns
            Jmp => self.registers.pc = Self::address(operand),
            Jsr => self.op_jsr(mem, Self::address(operand)),
            Rts => {
                self.registers.pc = self.pull16(mem).wrapping_add(1);
            }
            Rti => self.op_rti(mem),
            Brk => self.op_brk(mem),

            // Stack
            Pha => self.push(mem, self.registers.a),
            Php => {
                let p = self.status.pushed(true);
                self.push(mem, p);
            }
            Pla => {
                let value = self.pull(mem);
                self.op_lda(value);
            }
            Plp => {
                let value = self.pull(mem);
                self.status = StatusFlags::pulled(value);
            }

            // Flags
            Clc => self.status.set_carry(false),
            Sec => self.status.set_carry(true),
            Cli => self.status.set_interrupt(false),
            Sei => self.status.set_interrupt(true),
            Cld => self.status.set_decimal(false),
            Sed => self.status.set_decimal(true),
            Clv => self.status.set_overflow(false),

            Nop | Illegal => {}
        }
        0
    }

    // Operations

    fn op_lda(&mut self, value: u8) {
        self.registers.a = value;
        self.set_zn(value);
    }

    fn op_ldx(&mut self, value: u8) {
        self.registers.x = value;
        self.set_zn(value);
    }

    fn op_ldy(&mut self, value: u8) {
        self.registers.y = value;
        self.set_zn(value);
    }

    fn op_tax(&mut self) {
        self.registers.x = self.registers.a;
        self.set_zn(self.registers.x);
    }

    fn op_tay(&mut self) {
        self.registers.y = self.registers.a;
        self.set_zn(self.registers.y);
    }

    fn op_tsx(&mut self) {
        self.registers.x = self.registers.sp;
        self.set_zn(self.registers.x);
    }

    fn op_txa(&mut self) {
        self.registers.a = self.registers.x;
        self.set_zn(self.registers.a);
    }

    fn op_tya(&mut self) {
        self.registers.a = self.registers.y;
        self.set_zn(self.registers.a);
    }

    /// Binary add with carry. SBC feeds the one's complement of its operand.
    fn op_adc(&mut self, value: u8) {
        let a = self.registers.a;
        let sum = a as u16 + value as u16 + self.status.carry() as u16;
        let result = sum as u8;

        self.status.set_carry(sum > 0xFF);
        self.status.set_overflow((!(a ^ value) & (a ^ result)) & 0x80 != 0);
        self.op_lda(result);
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.status.set_carry(register >= value);
        self.set_zn(register.wrapping_sub(value));
    }

    fn op_bit(&mut self, value: u8) {
        self.status.set_zero(self.registers.a & value == 0);
        self.status.set_overflow(value & 0x40 != 0);
        self.status.set_negative(value & 0x80 != 0);
    }

    fn op_asl(&mut self, value: u8) -> u8 {
        self.status.set_carry(value & 0x80 != 0);
        let result = value << 1;
        self.set_zn(result);
        result
    }

    fn op_lsr(&mut self, value: u8) -> u8 {
        self.status.set_carry(value & 0x01 != 0);
        let result = value >> 1;
        self.set_zn(result);
        result
    }

    fn op_rol(&mut self, value: u8) -> u8 {
        let carry_in = self.status.carry() as u8;
        self.status.set_carry(value & 0x80 != 0);
        let result = (value << 1) | carry_in;
        self.set_zn(result);
        result
    }

    fn op_ror(&mut self, value: u8) -> u8 {
        let carry_in = (self.status.carry() as u8) << 7;
        self.status.set_carry(value & 0x01 != 0);
        let result = (value >> 1) | carry_in;
        self.set_zn(result);
        result
    }

    /// One extra cycle when taken, another when the target is on a new page
    fn branch(&mut self, condition: bool, resolved: Resolved) -> u32 {
        if !condition {
            return 0;
        }
        self.registers.pc = Self::address(resolved.operand);
        if resolved.page_crossed {
            2
        } else {
            1
        }
    }

    fn op_jsr<M: Memory + ?Sized>(&mut self, mem: &mut M, target: u16) {
        // Return address is the last byte of the JSR instruction
        let ret = self.registers.pc.wrapping_sub(1);
        self.push16(mem, ret);
        self.registers.pc = target;
    }

    fn op_rti<M: Memory + ?Sized>(&mut self, mem: &mut M) {
        let p = self.pull(mem);
        self.status = StatusFlags::pulled(p);
        self.registers.pc = self.pull16(mem);
    }

    fn op_brk<M: Memory + ?Sized>(&mut self, mem: &mut M) {
        // BRK has a padding byte, so the pushed address skips it
        let ret = self.registers.pc.wrapping_add(1);
        self.push16(mem, ret);
        let p = self.status.pushed(true);
        self.push(mem, p);
        self.status.set_interrupt(true);
        self.registers.pc = read16(mem, IRQ_VECTOR);
    }

    /// Hardware interrupt entry shared by NMI and IRQ
    fn interrupt<M: Memory + ?Sized>(&mut self, mem: &mut M, vector: u16) -> u32 {
        self.push16(mem, self.registers.pc);
        let p = self.status.pushed(false);
        self.push(mem, p);
        self.status.set_interrupt(true);
        self.registers.pc = read16(mem, vector);
        INTERRUPT_CYCLES
    }

    fn set_zn(&mut self, value: u8) {
        self.status.set_zero(value == 0);
        self.status.set_negative(value & 0x80 != 0);
    }

    // Stack: push writes then decrements, pull increments then reads

    fn push<M: Memory + ?Sized>(&mut self, mem: &mut M, value: u8) {
        mem.write8(STACK_BASE | self.registers.sp as u16, value);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
    }

    fn pull<M: Memory + ?Sized>(&mut self, mem: &mut M) -> u8 {
        self.registers.sp = self.registers.sp.wrapping_add(1);
        mem.read8(STACK_BASE | self.registers.sp as u16)
    }

    fn push16<M: Memory + ?Sized>(&mut self, mem: &mut M, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.push(mem, hi);
        self.push(mem, lo);
    }

    fn pull16<M: Memory + ?Sized>(&mut self, mem: &mut M) -> u16 {
        let lo = self.pull(mem);
        let hi = self.pull(mem);
        u16::from_le_bytes([lo, hi])
    }
}

fn read16<M: Memory + ?Sized>(mem: &mut M, address: u16) -> u16 {
    let lo = mem.read8(address);
    let hi = mem.read8(address.wrapping_add(1));
    u16::from_le_bytes([lo, hi])
}

/// Pointer read that wraps within the zero page
fn read16_zp<M: Memory + ?Sized>(mem: &mut M, zp: u8) -> u16 {
    let lo = mem.read8(zp as u16);
    let hi = mem.read8(zp.wrapping_add(1) as u16);
    u16::from_le_bytes([lo, hi])
}
