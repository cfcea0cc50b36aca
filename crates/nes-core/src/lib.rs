//! NES Core - Pure Rust NES emulator library
//!
//! This crate provides the core emulation logic for a Nintendo Entertainment System (NES):
//! the 2A03 CPU engine, the 2C02 PPU scanline renderer, and the memory bus and
//! cartridge mappers they talk through. It contains no windowing or web dependencies.

#![forbid(unsafe_code)]

/// Bit helpers shared by the CPU, PPU and peripherals
pub mod bits;
/// CPU module containing the 2A03 (6502 variant) implementation
pub mod cpu;
/// Opcode dispatch table and disassembler
pub mod opcode;
/// PPU (Picture Processing Unit) implementation
pub mod ppu;
/// Loopy scroll/address register
pub mod vram_addr;
/// NES master palette (64 colors to RGB)
pub mod palette;
/// Memory bus and mapping
pub mod bus;
/// Cartridge board implementations
pub mod mapper;
/// iNES loading
pub mod cartridge;
/// Standard joypad shift register
pub mod controller;
/// Integration module for complete NES system
pub mod system;
/// Single-step JSON conformance harness
pub mod conformance;

pub use bus::{Bus, FlatMemory, Memory, VideoMemory};
pub use cartridge::{Cartridge, CartridgeError, Mirroring};
pub use controller::{Button, Controller};
pub use cpu::{Cpu, CpuError};
pub use ppu::Ppu;
pub use system::{HaltPolicy, NesSystem};
