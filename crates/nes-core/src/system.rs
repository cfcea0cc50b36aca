//! NES System Integration
//!
//! Drives the CPU and PPU in turns: roughly 114 CPU cycles, then one PPU
//! scanline, 262 times per frame. Cycles a scanline's last instruction runs
//! past the budget are carried into the next scanline.

use std::collections::HashSet;

use tracing::warn;

use crate::bus::{Bus, Memory};
use crate::cartridge::Cartridge;
use crate::controller::Button;
use crate::cpu::{Cpu, CpuError};
use crate::ppu::Ppu;

/// CPU cycles per PPU scanline (341 dots / 3, rounded down)
pub const CPU_CYCLES_PER_SCANLINE: u32 = 114;

/// What to do when the CPU fetches an illegal opcode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HaltPolicy {
    /// Treat it as a 1-byte, 2-cycle no-op
    #[default]
    Skip,
    /// Stop and hand the error to the caller
    Halt,
}

/// NES System - integrates all components
#[derive(Debug)]
pub struct NesSystem {
    cpu: Cpu,
    bus: Bus,
    halt_policy: HaltPolicy,
    /// Addresses already reported for illegal opcodes
    illegal_seen: HashSet<u16>,
    total_cycles: u64,
}

impl NesSystem {
    /// Build a machine around a cartridge and reset it
    pub fn new(cartridge: Cartridge) -> Self {
        let mut system = Self {
            cpu: Cpu::new(),
            bus: Bus::new(cartridge),
            halt_policy: HaltPolicy::default(),
            illegal_seen: HashSet::new(),
            total_cycles: 0,
        };
        system.reset();
        system
    }

    pub fn with_halt_policy(mut self, policy: HaltPolicy) -> Self {
        self.halt_policy = policy;
        self
    }

    pub fn set_halt_policy(&mut self, policy: HaltPolicy) {
        self.halt_policy = policy;
    }

    pub fn halt_policy(&self) -> HaltPolicy {
        self.halt_policy
    }

    /// Reset the NES system
    pub fn reset(&mut self) {
        self.bus.reset();
        self.cpu.reset(&mut self.bus);
        self.illegal_seen.clear();
        self.total_cycles = 0;
    }

    /// Execute one instruction (or NMI entry). Returns the cycles spent,
    /// including any OAM DMA stall it triggered.
    pub fn step_instruction(&mut self) -> Result<u32, CpuError> {
        let cycles = match self.cpu.step(&mut self.bus) {
            Ok(cycles) => cycles,
            Err(err @ CpuError::IllegalOpcode { opcode, pc }) => {
                if self.illegal_seen.insert(pc) {
                    warn!("illegal opcode {:02X} at {:04X}", opcode, pc);
                }
                if self.halt_policy == HaltPolicy::Halt {
                    return Err(err);
                }
                // The CPU already stepped past it and charged the cycles
                2
            }
        };

        let stall = self.bus.take_dma_stall();
        if stall > 0 {
            self.cpu.add_cycles(stall);
        }
        let cycles = cycles + stall;
        self.total_cycles += cycles as u64;
        Ok(cycles)
    }

    /// Run the CPU for one scanline's budget, then let the PPU finish the line
    pub fn run_scanline(&mut self) -> Result<(), CpuError> {
        while self.cpu.cycles() < CPU_CYCLES_PER_SCANLINE {
            self.step_instruction()?;
        }
        self.cpu.consume_cycles(CPU_CYCLES_PER_SCANLINE);

        if self.bus.finish_scanline() {
            self.cpu.trigger_nmi();
        }
        Ok(())
    }

    /// Run until the PPU wraps to the next frame
    pub fn run_frame(&mut self) -> Result<(), CpuError> {
        let frame = self.bus.ppu().frame();
        while self.bus.ppu().frame() == frame {
            self.run_scanline()?;
        }
        Ok(())
    }

    /// Run for N frames
    pub fn run_frames(&mut self, frames: u64) -> Result<(), CpuError> {
        for _ in 0..frames {
            self.run_frame()?;
        }
        Ok(())
    }

    /// Last rendered picture, 256x240 pixels of 0x00RRGGBB
    pub fn frame_buffer(&self) -> &[u32] {
        self.bus.ppu().frame_buffer()
    }

    pub fn set_button(&mut self, port: usize, button: Button, pressed: bool) {
        self.bus.set_button(port, button, pressed);
    }

    /// Get CPU reference
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Get mutable CPU reference
    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// Get PPU reference
    pub fn ppu(&self) -> &Ppu {
        self.bus.ppu()
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    /// Completed frames
    pub fn frame_count(&self) -> u64 {
        self.bus.ppu().frame()
    }

    /// CPU cycles since reset
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Read a byte from memory via the bus
    pub fn read_memory(&mut self, address: u16) -> u8 {
        self.bus.read8(address)
    }

    /// Write a byte to memory via the bus
    pub fn write_memory(&mut self, address: u16, value: u8) {
        self.bus.write8(address, value);
    }

    /// Disassemble the instruction at PC
    pub fn disassemble(&mut self) -> (String, u16) {
        self.cpu.disassemble(&mut self.bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Mirroring;

    /// NROM cartridge with `program` at $8000 and an NMI handler at $9000
    fn system(program: &[u8], nmi_handler: &[u8]) -> NesSystem {
        let mut prg = vec![0xEA; 0x4000];
        prg[..program.len()].copy_from_slice(program);
        prg[0x1000..0x1000 + nmi_handler.len()].copy_from_slice(nmi_handler);
        prg[0x3FFA..].copy_from_slice(&[0x00, 0x90, 0x00, 0x80, 0x00, 0x80]);
        NesSystem::new(Cartridge::from_parts(0, prg, vec![], Mirroring::Horizontal).unwrap())
    }

    #[test]
    fn test_system_reset() {
        let system = system(&[0x4C, 0x00, 0x80], &[0x40]);
        // After reset, PC comes from the reset vector
        assert_eq!(system.cpu().registers().pc, 0x8000);
        assert_eq!(system.frame_count(), 0);
    }

    #[test]
    fn test_run_frame_wraps_scanlines() {
        let mut system = system(&[0x4C, 0x00, 0x80], &[0x40]);
        system.run_frame().unwrap();
        assert_eq!(system.frame_count(), 1);
        assert_eq!(system.ppu().scanline(), 0);
        // JMP takes 3 cycles, so each scanline overshoots by at most 2
        assert!(system.cpu().cycles() < 3);
        assert!(system.total_cycles() >= 262 * CPU_CYCLES_PER_SCANLINE as u64);
    }

    #[test]
    fn test_nmi_reaches_handler() {
        // LDA #$80; STA $2000; JMP *
        let program = [0xA9, 0x80, 0x8D, 0x00, 0x20, 0x4C, 0x05, 0x80];
        // INC $10; RTI
        let handler = [0xE6, 0x10, 0x40];
        let mut system = system(&program, &handler);
        system.run_frames(2).unwrap();
        assert_eq!(system.read_memory(0x0010), 2);
    }

    #[test]
    fn test_no_nmi_when_disabled() {
        let handler = [0xE6, 0x10, 0x40];
        let mut system = system(&[0x4C, 0x00, 0x80], &handler);
        system.run_frame().unwrap();
        assert_eq!(system.read_memory(0x0010), 0);
        // Set at line 240, cleared again by the prerender line
        assert!(!system.ppu().status().vblank());
    }

    #[test]
    fn test_illegal_opcode_skipped() {
        let mut system = system(&[0x02, 0x4C, 0x01, 0x80], &[0x40]);
        assert_eq!(system.step_instruction(), Ok(2));
        assert_eq!(system.cpu().registers().pc, 0x8001);
        system.run_frame().unwrap();
    }

    #[test]
    fn test_illegal_opcode_halts() {
        let mut system = system(&[0x02], &[0x40]).with_halt_policy(HaltPolicy::Halt);
        assert_eq!(
            system.run_frame(),
            Err(CpuError::IllegalOpcode { opcode: 0x02, pc: 0x8000 })
        );
    }

    #[test]
    fn test_oam_dma_stall_is_charged() {
        // LDA #$02; STA $4014
        let mut system = system(&[0xA9, 0x02, 0x8D, 0x14, 0x40], &[0x40]);
        assert_eq!(system.step_instruction(), Ok(2));
        assert_eq!(system.step_instruction(), Ok(4 + 513));
        assert_eq!(system.cpu().cycles(), 2 + 4 + 513);
    }

    #[test]
    fn test_buttons_reach_controller_port() {
        let mut system = system(&[0x4C, 0x00, 0x80], &[0x40]);
        system.set_button(0, Button::A, true);
        system.write_memory(0x4016, 1);
        system.write_memory(0x4016, 0);
        assert_eq!(system.read_memory(0x4016) & 1, 1);
    }

    #[test]
    fn test_reset_clears_frame_count() {
        let mut system = system(&[0x4C, 0x00, 0x80], &[0x40]);
        system.run_frame().unwrap();
        system.reset();
        assert_eq!(system.frame_count(), 0);
        assert_eq!(system.cpu().registers().pc, 0x8000);
    }
}
