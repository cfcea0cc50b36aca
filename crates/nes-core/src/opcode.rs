//! Opcode dispatch table
//!
//! Every one of the 256 opcode values maps to an [`Instruction`]: the operation,
//! its addressing mode, the base cycle cost, and whether a page crossing on the
//! effective address costs one extra cycle. The 105 slots the 2A03 leaves
//! undocumented are marked [`Mnemonic::Illegal`].

use std::fmt;

use crate::bus::Memory;

/// Operation performed by an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
    /// No documented behavior on the 2A03
    Illegal,
}

impl Mnemonic {
    pub fn as_str(self) -> &'static str {
        use Mnemonic::*;
        match self {
            Adc => "ADC", And => "AND", Asl => "ASL", Bcc => "BCC", Bcs => "BCS",
            Beq => "BEQ", Bit => "BIT", Bmi => "BMI", Bne => "BNE", Bpl => "BPL",
            Brk => "BRK", Bvc => "BVC", Bvs => "BVS", Clc => "CLC", Cld => "CLD",
            Cli => "CLI", Clv => "CLV", Cmp => "CMP", Cpx => "CPX", Cpy => "CPY",
            Dec => "DEC", Dex => "DEX", Dey => "DEY", Eor => "EOR", Inc => "INC",
            Inx => "INX", Iny => "INY", Jmp => "JMP", Jsr => "JSR", Lda => "LDA",
            Ldx => "LDX", Ldy => "LDY", Lsr => "LSR", Nop => "NOP", Ora => "ORA",
            Pha => "PHA", Php => "PHP", Pla => "PLA", Plp => "PLP", Rol => "ROL",
            Ror => "ROR", Rti => "RTI", Rts => "RTS", Sbc => "SBC", Sec => "SEC",
            Sed => "SED", Sei => "SEI", Sta => "STA", Stx => "STX", Sty => "STY",
            Tax => "TAX", Tay => "TAY", Tsx => "TSX", Txa => "TXA", Txs => "TXS",
            Tya => "TYA", Illegal => "???",
        }
    }

    /// Store-class operations write their operand and never read it
    #[cfg(test)]
    fn is_store(self) -> bool {
        matches!(self, Mnemonic::Sta | Mnemonic::Stx | Mnemonic::Sty)
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Addressing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    /// `JMP ($xxxx)` only
    Indirect,
    /// `($zz,X)`: pointer in zero page, pre-indexed by X
    IndirectX,
    /// `($zz),Y`: pointer in zero page, post-indexed by Y
    IndirectY,
    Relative,
}

impl AddressingMode {
    /// Instruction length in bytes including the opcode
    pub fn len(self) -> u16 {
        use AddressingMode::*;
        match self {
            Implied | Accumulator => 1,
            Immediate | ZeroPage | ZeroPageX | ZeroPageY | IndirectX | IndirectY | Relative => 2,
            Absolute | AbsoluteX | AbsoluteY | Indirect => 3,
        }
    }

    /// Modes whose effective address can land on a different page than the base
    #[cfg(test)]
    fn can_cross_page(self) -> bool {
        matches!(
            self,
            AddressingMode::AbsoluteX | AddressingMode::AbsoluteY | AddressingMode::IndirectY
        )
    }
}

/// CPU instruction info
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
    /// Base cycle cost
    pub cycles: u8,
    /// Extra cycle if the indexed address crosses a page
    pub page_penalty: bool,
}

impl Instruction {
    pub fn is_illegal(&self) -> bool {
        self.mnemonic == Mnemonic::Illegal
    }
}

const fn op(mnemonic: Mnemonic, mode: AddressingMode, cycles: u8, page_penalty: bool) -> Instruction {
    Instruction { mnemonic, mode, cycles, page_penalty }
}

const ILLEGAL: Instruction = op(Mnemonic::Illegal, AddressingMode::Implied, 2, false);

/// The 256-entry dispatch table
pub static OPCODES: [Instruction; 256] = build_table();

const fn build_table() -> [Instruction; 256] {
    use AddressingMode::*;
    use Mnemonic::*;

    let mut t = [ILLEGAL; 256];

    // ADC - Add with Carry
    t[0x69] = op(Adc, Immediate, 2, false);
    t[0x65] = op(Adc, ZeroPage, 3, false);
    t[0x75] = op(Adc, ZeroPageX, 4, false);
    t[0x6D] = op(Adc, Absolute, 4, false);
    t[0x7D] = op(Adc, AbsoluteX, 4, true);
    t[0x79] = op(Adc, AbsoluteY, 4, true);
    t[0x61] = op(Adc, IndirectX, 6, false);
    t[0x71] = op(Adc, IndirectY, 5, true);

    // AND - Logical AND
    t[0x29] = op(And, Immediate, 2, false);
    t[0x25] = op(And, ZeroPage, 3, false);
    t[0x35] = op(And, ZeroPageX, 4, false);
    t[0x2D] = op(And, Absolute, 4, false);
    t[0x3D] = op(And, AbsoluteX, 4, true);
    t[0x39] = op(And, AbsoluteY, 4, true);
    t[0x21] = op(And, IndirectX, 6, false);
    t[0x31] = op(And, IndirectY, 5, true);

    // ASL - Arithmetic Shift Left
    t[0x0A] = op(Asl, Accumulator, 2, false);
    t[0x06] = op(Asl, ZeroPage, 5, false);
    t[0x16] = op(Asl, ZeroPageX, 6, false);
    t[0x0E] = op(Asl, Absolute, 6, false);
    t[0x1E] = op(Asl, AbsoluteX, 7, false);

    // Branches
    t[0x90] = op(Bcc, Relative, 2, false);
    t[0xB0] = op(Bcs, Relative, 2, false);
    t[0xF0] = op(Beq, Relative, 2, false);
    t[0x30] = op(Bmi, Relative, 2, false);
    t[0xD0] = op(Bne, Relative, 2, false);
    t[0x10] = op(Bpl, Relative, 2, false);
    t[0x50] = op(Bvc, Relative, 2, false);
    t[0x70] = op(Bvs, Relative, 2, false);

    // BIT - Test Bits
    t[0x24] = op(Bit, ZeroPage, 3, false);
    t[0x2C] = op(Bit, Absolute, 4, false);

    // BRK - Break
    t[0x00] = op(Brk, Implied, 7, false);

    // Flag instructions
    t[0x18] = op(Clc, Implied, 2, false);
    t[0xD8] = op(Cld, Implied, 2, false);
    t[0x58] = op(Cli, Implied, 2, false);
    t[0xB8] = op(Clv, Implied, 2, false);
    t[0x38] = op(Sec, Implied, 2, false);
    t[0xF8] = op(Sed, Implied, 2, false);
    t[0x78] = op(Sei, Implied, 2, false);

    // CMP - Compare
    t[0xC9] = op(Cmp, Immediate, 2, false);
    t[0xC5] = op(Cmp, ZeroPage, 3, false);
    t[0xD5] = op(Cmp, ZeroPageX, 4, false);
    t[0xCD] = op(Cmp, Absolute, 4, false);
    t[0xDD] = op(Cmp, AbsoluteX, 4, true);
    t[0xD9] = op(Cmp, AbsoluteY, 4, true);
    t[0xC1] = op(Cmp, IndirectX, 6, false);
    t[0xD1] = op(Cmp, IndirectY, 5, true);

    // CPX / CPY - Compare Index Registers
    t[0xE0] = op(Cpx, Immediate, 2, false);
    t[0xE4] = op(Cpx, ZeroPage, 3, false);
    t[0xEC] = op(Cpx, Absolute, 4, false);
    t[0xC0] = op(Cpy, Immediate, 2, false);
    t[0xC4] = op(Cpy, ZeroPage, 3, false);
    t[0xCC] = op(Cpy, Absolute, 4, false);

    // DEC / DEX / DEY - Decrement
    t[0xC6] = op(Dec, ZeroPage, 5, false);
    t[0xD6] = op(Dec, ZeroPageX, 6, false);
    t[0xCE] = op(Dec, Absolute, 6, false);
    t[0xDE] = op(Dec, AbsoluteX, 7, false);
    t[0xCA] = op(Dex, Implied, 2, false);
    t[0x88] = op(Dey, Implied, 2, false);

    // EOR - Exclusive OR
    t[0x49] = op(Eor, Immediate, 2, false);
    t[0x45] = op(Eor, ZeroPage, 3, false);
    t[0x55] = op(Eor, ZeroPageX, 4, false);
    t[0x4D] = op(Eor, Absolute, 4, false);
    t[0x5D] = op(Eor, AbsoluteX, 4, true);
    t[0x59] = op(Eor, AbsoluteY, 4, true);
    t[0x41] = op(Eor, IndirectX, 6, false);
    t[0x51] = op(Eor, IndirectY, 5, true);

    // INC / INX / INY - Increment
    t[0xE6] = op(Inc, ZeroPage, 5, false);
    t[0xF6] = op(Inc, ZeroPageX, 6, false);
    t[0xEE] = op(Inc, Absolute, 6, false);
    t[0xFE] = op(Inc, AbsoluteX, 7, false);
    t[0xE8] = op(Inx, Implied, 2, false);
    t[0xC8] = op(Iny, Implied, 2, false);

    // JMP / JSR
    t[0x4C] = op(Jmp, Absolute, 3, false);
    t[0x6C] = op(Jmp, Indirect, 5, false);
    t[0x20] = op(Jsr, Absolute, 6, false);

    // LDA - Load Accumulator
    t[0xA9] = op(Lda, Immediate, 2, false);
    t[0xA5] = op(Lda, ZeroPage, 3, false);
    t[0xB5] = op(Lda, ZeroPageX, 4, false);
    t[0xAD] = op(Lda, Absolute, 4, false);
    t[0xBD] = op(Lda, AbsoluteX, 4, true);
    t[0xB9] = op(Lda, AbsoluteY, 4, true);
    t[0xA1] = op(Lda, IndirectX, 6, false);
    t[0xB1] = op(Lda, IndirectY, 5, true);

    // LDX - Load X Register
    t[0xA2] = op(Ldx, Immediate, 2, false);
    t[0xA6] = op(Ldx, ZeroPage, 3, false);
    t[0xB6] = op(Ldx, ZeroPageY, 4, false);
    t[0xAE] = op(Ldx, Absolute, 4, false);
    t[0xBE] = op(Ldx, AbsoluteY, 4, true);

    // LDY - Load Y Register
    t[0xA0] = op(Ldy, Immediate, 2, false);
    t[0xA4] = op(Ldy, ZeroPage, 3, false);
    t[0xB4] = op(Ldy, ZeroPageX, 4, false);
    t[0xAC] = op(Ldy, Absolute, 4, false);
    t[0xBC] = op(Ldy, AbsoluteX, 4, true);

    // LSR - Logical Shift Right
    t[0x4A] = op(Lsr, Accumulator, 2, false);
    t[0x46] = op(Lsr, ZeroPage, 5, false);
    t[0x56] = op(Lsr, ZeroPageX, 6, false);
    t[0x4E] = op(Lsr, Absolute, 6, false);
    t[0x5E] = op(Lsr, AbsoluteX, 7, false);

    // NOP - No Operation
    t[0xEA] = op(Nop, Implied, 2, false);

    // ORA - Logical OR
    t[0x09] = op(Ora, Immediate, 2, false);
    t[0x05] = op(Ora, ZeroPage, 3, false);
    t[0x15] = op(Ora, ZeroPageX, 4, false);
    t[0x0D] = op(Ora, Absolute, 4, false);
    t[0x1D] = op(Ora, AbsoluteX, 4, true);
    t[0x19] = op(Ora, AbsoluteY, 4, true);
    t[0x01] = op(Ora, IndirectX, 6, false);
    t[0x11] = op(Ora, IndirectY, 5, true);

    // Stack
    t[0x48] = op(Pha, Implied, 3, false);
    t[0x08] = op(Php, Implied, 3, false);
    t[0x68] = op(Pla, Implied, 4, false);
    t[0x28] = op(Plp, Implied, 4, false);

    // ROL - Rotate Left
    t[0x2A] = op(Rol, Accumulator, 2, false);
    t[0x26] = op(Rol, ZeroPage, 5, false);
    t[0x36] = op(Rol, ZeroPageX, 6, false);
    t[0x2E] = op(Rol, Absolute, 6, false);
    t[0x3E] = op(Rol, AbsoluteX, 7, false);

    // ROR - Rotate Right
    t[0x6A] = op(Ror, Accumulator, 2, false);
    t[0x66] = op(Ror, ZeroPage, 5, false);
    t[0x76] = op(Ror, ZeroPageX, 6, false);
    t[0x6E] = op(Ror, Absolute, 6, false);
    t[0x7E] = op(Ror, AbsoluteX, 7, false);

    // RTI / RTS
    t[0x40] = op(Rti, Implied, 6, false);
    t[0x60] = op(Rts, Implied, 6, false);

    // SBC - Subtract with Carry
    t[0xE9] = op(Sbc, Immediate, 2, false);
    t[0xE5] = op(Sbc, ZeroPage, 3, false);
    t[0xF5] = op(Sbc, ZeroPageX, 4, false);
    t[0xED] = op(Sbc, Absolute, 4, false);
    t[0xFD] = op(Sbc, AbsoluteX, 4, true);
    t[0xF9] = op(Sbc, AbsoluteY, 4, true);
    t[0xE1] = op(Sbc, IndirectX, 6, false);
    t[0xF1] = op(Sbc, IndirectY, 5, true);

    // STA - Store Accumulator
    t[0x85] = op(Sta, ZeroPage, 3, false);
    t[0x95] = op(Sta, ZeroPageX, 4, false);
    t[0x8D] = op(Sta, Absolute, 4, false);
    t[0x9D] = op(Sta, AbsoluteX, 5, false);
    t[0x99] = op(Sta, AbsoluteY, 5, false);
    t[0x81] = op(Sta, IndirectX, 6, false);
    t[0x91] = op(Sta, IndirectY, 6, false);

    // STX / STY
    t[0x86] = op(Stx, ZeroPage, 3, false);
    t[0x96] = op(Stx, ZeroPageY, 4, false);
    t[0x8E] = op(Stx, Absolute, 4, false);
    t[0x84] = op(Sty, ZeroPage, 3, false);
    t[0x94] = op(Sty, ZeroPageX, 4, false);
    t[0x8C] = op(Sty, Absolute, 4, false);

    // Transfers
    t[0xAA] = op(Tax, Implied, 2, false);
    t[0xA8] = op(Tay, Implied, 2, false);
    t[0xBA] = op(Tsx, Implied, 2, false);
    t[0x8A] = op(Txa, Implied, 2, false);
    t[0x9A] = op(Txs, Implied, 2, false);
    t[0x98] = op(Tya, Implied, 2, false);

    t
}

/// Look up the table entry for an opcode byte
#[inline]
pub fn decode(opcode: u8) -> Instruction {
    OPCODES[opcode as usize]
}

/// Disassemble the instruction at `pc`.
///
/// Returns the formatted text and the instruction length. Operand bytes are
/// fetched through `read8`, so memory-mapped registers in the operand
/// position will see a read.
pub fn disassemble<M: Memory + ?Sized>(mem: &mut M, pc: u16) -> (String, u16) {
    use AddressingMode::*;

    let opcode = mem.read8(pc);
    let instruction = decode(opcode);
    if instruction.is_illegal() {
        return (format!(".DB ${:02X}", opcode), 1);
    }

    let lo = mem.read8(pc.wrapping_add(1));
    let hi = mem.read8(pc.wrapping_add(2));
    let word = u16::from_le_bytes([lo, hi]);
    let name = instruction.mnemonic;

    let text = match instruction.mode {
        Implied => name.to_string(),
        Accumulator => format!("{} A", name),
        Immediate => format!("{} #${:02X}", name, lo),
        ZeroPage => format!("{} ${:02X}", name, lo),
        ZeroPageX => format!("{} ${:02X},X", name, lo),
        ZeroPageY => format!("{} ${:02X},Y", name, lo),
        Absolute => format!("{} ${:04X}", name, word),
        AbsoluteX => format!("{} ${:04X},X", name, word),
        AbsoluteY => format!("{} ${:04X},Y", name, word),
        Indirect => format!("{} (${:04X})", name, word),
        IndirectX => format!("{} (${:02X},X)", name, lo),
        IndirectY => format!("{} (${:02X}),Y", name, lo),
        Relative => {
            let target = pc.wrapping_add(2).wrapping_add(lo as i8 as u16);
            format!("{} ${:04X}", name, target)
        }
    };

    (text, instruction.mode.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::FlatMemory;

    #[test]
    fn test_official_opcode_count() {
        let official = OPCODES.iter().filter(|i| !i.is_illegal()).count();
        assert_eq!(official, 151);
    }

    #[test]
    fn test_page_penalty_only_on_indexed_reads() {
        for (opcode, instruction) in OPCODES.iter().enumerate() {
            if instruction.page_penalty {
                assert!(
                    instruction.mode.can_cross_page(),
                    "opcode {:02X} has a page penalty on a non-indexed mode",
                    opcode
                );
                assert!(!instruction.mnemonic.is_store());
            }
        }
    }

    #[test]
    fn test_decode_known_entries() {
        let adc = decode(0x65);
        assert_eq!(adc.mnemonic, Mnemonic::Adc);
        assert_eq!(adc.mode, AddressingMode::ZeroPage);
        assert_eq!(adc.cycles, 3);

        let jmp = decode(0x6C);
        assert_eq!(jmp.mode, AddressingMode::Indirect);
        assert_eq!(jmp.cycles, 5);

        assert!(decode(0x02).is_illegal());
        assert!(decode(0xFF).is_illegal());
    }

    #[test]
    fn test_disassemble() {
        let mut mem = FlatMemory::new();
        mem.load(0x8000, &[0xA9, 0x10, 0xBD, 0x34, 0x12, 0xD0, 0xFE, 0x6C, 0x00, 0x02, 0x02]);

        assert_eq!(disassemble(&mut mem, 0x8000), ("LDA #$10".to_string(), 2));
        assert_eq!(disassemble(&mut mem, 0x8002), ("LDA $1234,X".to_string(), 3));
        assert_eq!(disassemble(&mut mem, 0x8005), ("BNE $8005".to_string(), 2));
        assert_eq!(disassemble(&mut mem, 0x8007), ("JMP ($0200)".to_string(), 3));
        assert_eq!(disassemble(&mut mem, 0x800A), (".DB $02".to_string(), 1));
    }
}
