//! Interactive line monitor
//!
//! Commands (numbers in hex, `$` or `0x` prefix optional):
//!
//! ```text
//! h                 help
//! s                 step one instruction
//! q, e              quit
//! p<start>,<end>    dump memory
//! w<value>,<addr>   write a byte
//! r                 registers
//! pc<addr>          set PC
//! d                 disassemble at PC
//! ```

use std::io::{self, BufRead, Write};

use nes_core::bus::{FlatMemory, Memory};
use nes_core::cpu::Cpu;
use nes_core::system::NesSystem;

const HELP: &str = "\
h               help
s               step one instruction
q, e            quit
p<start>,<end>  dump memory
w<value>,<addr> write a byte
r               registers
pc<addr>        set PC
d               disassemble at PC";

/// Machine under the monitor
pub enum Machine {
    /// Bare CPU over 64 KiB of RAM
    Flat { cpu: Cpu, mem: FlatMemory },
    /// Full console; stepping also runs the PPU
    Nes(Box<NesSystem>),
}

impl Machine {
    pub fn flat() -> Self {
        let mut mem = FlatMemory::new();
        let mut cpu = Cpu::new();
        cpu.reset(&mut mem);
        Machine::Flat { cpu, mem }
    }

    fn cpu(&self) -> &Cpu {
        match self {
            Machine::Flat { cpu, .. } => cpu,
            Machine::Nes(system) => system.cpu(),
        }
    }

    fn cpu_mut(&mut self) -> &mut Cpu {
        match self {
            Machine::Flat { cpu, .. } => cpu,
            Machine::Nes(system) => system.cpu_mut(),
        }
    }

    fn read(&mut self, address: u16) -> u8 {
        match self {
            Machine::Flat { mem, .. } => mem.read8(address),
            Machine::Nes(system) => system.read_memory(address),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        match self {
            Machine::Flat { mem, .. } => mem.write8(address, value),
            Machine::Nes(system) => system.write_memory(address, value),
        }
    }

    fn step(&mut self) -> String {
        let result = match self {
            Machine::Flat { cpu, mem } => cpu.step(mem),
            Machine::Nes(system) => system.step_instruction(),
        };
        match result {
            Ok(cycles) => format!("{} cycles", cycles),
            Err(e) => e.to_string(),
        }
    }

    fn disassemble(&mut self) -> String {
        let (text, _) = match self {
            Machine::Flat { cpu, mem } => cpu.disassemble(mem),
            Machine::Nes(system) => system.disassemble(),
        };
        format!("{:04X}  {}", self.cpu().registers().pc, text)
    }
}

/// One parsed monitor command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Step,
    Quit,
    Dump { start: u16, end: u16 },
    Write { value: u8, address: u16 },
    Registers,
    SetPc(u16),
    Disassemble,
}

fn parse_hex(text: &str) -> Result<u16, String> {
    let text = text.trim();
    let digits = text
        .strip_prefix('$')
        .or_else(|| text.strip_prefix("0x"))
        .unwrap_or(text);
    u16::from_str_radix(digits, 16).map_err(|_| format!("bad number: {}", text))
}

fn parse_pair(text: &str) -> Result<(u16, u16), String> {
    let (a, b) = text
        .split_once(',')
        .ok_or_else(|| "expected two numbers separated by ','".to_string())?;
    Ok((parse_hex(a)?, parse_hex(b)?))
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        let line = line.trim();
        match line {
            "h" => return Ok(Command::Help),
            "s" => return Ok(Command::Step),
            "q" | "e" => return Ok(Command::Quit),
            "r" => return Ok(Command::Registers),
            "d" => return Ok(Command::Disassemble),
            _ => {}
        }

        if let Some(rest) = line.strip_prefix("pc") {
            return Ok(Command::SetPc(parse_hex(rest)?));
        }
        if let Some(rest) = line.strip_prefix('p') {
            let (start, end) = parse_pair(rest)?;
            if end < start {
                return Err("end is before start".to_string());
            }
            return Ok(Command::Dump { start, end });
        }
        if let Some(rest) = line.strip_prefix('w') {
            let (value, address) = parse_pair(rest)?;
            let value = u8::try_from(value).map_err(|_| "value does not fit in a byte".to_string())?;
            return Ok(Command::Write { value, address });
        }
        Err(format!("unknown command '{}', h for help", line))
    }
}

fn dump<W: Write>(machine: &mut Machine, out: &mut W, start: u16, end: u16) -> io::Result<()> {
    let mut row = start & 0xFFF0;
    loop {
        write!(out, "{:04X}:", row)?;
        for offset in 0..16u16 {
            let address = row + offset;
            if address < start || address > end {
                write!(out, "   ")?;
            } else {
                write!(out, " {:02X}", machine.read(address))?;
            }
        }
        writeln!(out)?;
        match row.checked_add(16) {
            Some(next) if next <= end => row = next,
            _ => return Ok(()),
        }
    }
}

fn registers<W: Write>(machine: &Machine, out: &mut W) -> io::Result<()> {
    let cpu = machine.cpu();
    let regs = cpu.registers();
    writeln!(
        out,
        "PC:{:04X} A:{:02X} X:{:02X} Y:{:02X} SP:{:02X} P:{:02X} [{}]",
        regs.pc,
        regs.a,
        regs.x,
        regs.y,
        regs.sp,
        cpu.status().bits(),
        cpu.status()
    )
}

/// Read commands from `input` until quit or end of input
pub fn run<R: BufRead, W: Write>(machine: &mut Machine, input: R, out: &mut W) -> io::Result<()> {
    write!(out, "> ")?;
    out.flush()?;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            write!(out, "> ")?;
            out.flush()?;
            continue;
        }

        match Command::parse(&line) {
            Ok(Command::Quit) => return Ok(()),
            Ok(Command::Help) => writeln!(out, "{}", HELP)?,
            Ok(Command::Step) => {
                let text = machine.disassemble();
                let result = machine.step();
                writeln!(out, "{}  ({})", text, result)?;
            }
            Ok(Command::Dump { start, end }) => dump(machine, out, start, end)?,
            Ok(Command::Write { value, address }) => machine.write(address, value),
            Ok(Command::Registers) => registers(machine, out)?,
            Ok(Command::SetPc(address)) => machine.cpu_mut().registers_mut().pc = address,
            Ok(Command::Disassemble) => {
                let text = machine.disassemble();
                writeln!(out, "{}", text)?;
            }
            Err(message) => writeln!(out, "{}", message)?,
        }
        write!(out, "> ")?;
        out.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("h"), Ok(Command::Help));
        assert_eq!(Command::parse(" e "), Ok(Command::Quit));
        assert_eq!(Command::parse("pc8000"), Ok(Command::SetPc(0x8000)));
        assert_eq!(Command::parse("pc$C000"), Ok(Command::SetPc(0xC000)));
        assert_eq!(
            Command::parse("p0,1f"),
            Ok(Command::Dump { start: 0, end: 0x1F })
        );
        assert_eq!(
            Command::parse("wA9,0x8000"),
            Ok(Command::Write {
                value: 0xA9,
                address: 0x8000
            })
        );
        assert!(Command::parse("w100,0").is_err());
        assert!(Command::parse("p10,0").is_err());
        assert!(Command::parse("x").is_err());
    }

    #[test]
    fn test_session() {
        let mut machine = Machine::flat();
        let script = "wA9,8000\nw42,8001\npc8000\nd\ns\nr\np8000,8001\nq\ns\n";
        let mut out = Vec::new();
        run(&mut machine, script.as_bytes(), &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("8000  LDA #$42"));
        assert!(out.contains("(2 cycles)"));
        assert!(out.contains("PC:8002 A:42"));
        assert!(out.contains("8000: A9 42"));
        // Nothing runs after quit
        assert_eq!(out.matches("cycles").count(), 1);
    }
}
