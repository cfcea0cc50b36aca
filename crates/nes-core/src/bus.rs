//! Memory bus and mapping
//!
//! The NES memory map:
//! $0000-$07FF - 2KB Internal RAM
//! $0800-$1FFF - RAM mirroring (repeats every $0800 bytes)
//! $2000-$2007 - PPU registers
//! $2008-$3FFF - PPU registers (mirrored every $08 bytes)
//! $4000-$4017 - APU and I/O registers
//! $4020-$5FFF - Cartridge expansion
//! $6000-$7FFF - Cartridge PRG RAM
//! $8000-$FFFF - Cartridge PRG ROM
//!
//! The PPU has its own 14-bit space:
//! $0000-$1FFF - Pattern tables (cartridge CHR)
//! $2000-$2FFF - Nametables, folded onto 2 KiB by the cartridge's mirroring
//! $3000-$3EFF - Mirror of $2000-$2EFF
//! $3F00-$3FFF - Palette RAM (inside the PPU)

use tracing::trace;

use crate::cartridge::Cartridge;
use crate::controller::{Button, Controller};
use crate::ppu::{Ppu, PRERENDER_SCANLINE, SCREEN_HEIGHT, VBLANK_SCANLINE};

/// RAM size in bytes
pub const RAM_SIZE: usize = 2048; // 2KB

/// Nametable RAM, room for four-screen boards
pub const NAMETABLE_SIZE: usize = 0x1000;

/// CPU cycles the CPU is stalled for by an OAM DMA
pub const OAM_DMA_CYCLES: u32 = 513;

/// CPU address space
pub trait Memory {
    fn read8(&mut self, address: u16) -> u8;
    fn write8(&mut self, address: u16, value: u8);

    /// Clear peripheral latches. Called by [`crate::cpu::Cpu::reset`].
    fn reset_peripherals(&mut self) {}
}

/// PPU address space ($0000-$3FFF)
pub trait VideoMemory {
    fn ppu_read8(&mut self, address: u16) -> u8;
    fn ppu_write8(&mut self, address: u16, value: u8);
}

/// Plain 64 KiB CPU space plus 16 KiB video space with no mapping.
///
/// Used by the conformance harness, the monitor, and tests.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    cpu: Box<[u8]>,
    video: Box<[u8]>,
}

impl FlatMemory {
    pub fn new() -> Self {
        Self {
            cpu: vec![0; 0x10000].into_boxed_slice(),
            video: vec![0; 0x4000].into_boxed_slice(),
        }
    }

    /// Copy `bytes` into CPU space at `address`, wrapping at $FFFF
    pub fn load(&mut self, address: u16, bytes: &[u8]) {
        for (i, &byte) in bytes.iter().enumerate() {
            self.cpu[address.wrapping_add(i as u16) as usize] = byte;
        }
    }

    pub fn clear(&mut self) {
        self.cpu.fill(0);
        self.video.fill(0);
    }
}

impl Default for FlatMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory for FlatMemory {
    fn read8(&mut self, address: u16) -> u8 {
        self.cpu[address as usize]
    }

    fn write8(&mut self, address: u16, value: u8) {
        self.cpu[address as usize] = value;
    }
}

impl VideoMemory for FlatMemory {
    fn ppu_read8(&mut self, address: u16) -> u8 {
        self.video[(address & 0x3FFF) as usize]
    }

    fn ppu_write8(&mut self, address: u16, value: u8) {
        self.video[(address & 0x3FFF) as usize] = value;
    }
}

/// What the PPU sees: cartridge CHR and nametable RAM
#[derive(Debug)]
pub struct VideoBus {
    nametables: [u8; NAMETABLE_SIZE],
    cartridge: Cartridge,
}

impl VideoBus {
    pub fn new(cartridge: Cartridge) -> Self {
        Self {
            nametables: [0; NAMETABLE_SIZE],
            cartridge,
        }
    }

    pub fn cartridge(&self) -> &Cartridge {
        &self.cartridge
    }

    pub fn cartridge_mut(&mut self) -> &mut Cartridge {
        &mut self.cartridge
    }

    fn nametable_index(&self, address: u16) -> usize {
        let offset = (address as usize - 0x2000) & 0x0FFF;
        let page = self.cartridge.mirroring().pages()[offset / 0x400];
        page * 0x400 + (offset & 0x03FF)
    }
}

impl VideoMemory for VideoBus {
    fn ppu_read8(&mut self, address: u16) -> u8 {
        match address & 0x3FFF {
            a @ 0x0000..=0x1FFF => self.cartridge.ppu_read(a),
            a @ 0x2000..=0x3EFF => self.nametables[self.nametable_index(a)],
            // Palette lives in the PPU
            _ => 0,
        }
    }

    fn ppu_write8(&mut self, address: u16, value: u8) {
        match address & 0x3FFF {
            a @ 0x0000..=0x1FFF => self.cartridge.ppu_write(a, value),
            a @ 0x2000..=0x3EFF => {
                let index = self.nametable_index(a);
                self.nametables[index] = value;
            }
            _ => {}
        }
    }
}

/// Memory bus structure
#[derive(Debug)]
pub struct Bus {
    /// 2KB internal RAM (with mirroring)
    ram: [u8; RAM_SIZE],
    ppu: Ppu,
    video: VideoBus,
    controllers: [Controller; 2],
    /// Stall cycles owed to the CPU by OAM DMA
    dma_stall: u32,
}

impl Bus {
    /// Create a bus around a loaded cartridge
    pub fn new(cartridge: Cartridge) -> Self {
        Self {
            ram: [0; RAM_SIZE],
            ppu: Ppu::new(),
            video: VideoBus::new(cartridge),
            controllers: [Controller::new(); 2],
            dma_stall: 0,
        }
    }

    /// Power-cycle RAM and the PPU. The cartridge keeps its state.
    pub fn reset(&mut self) {
        self.ram = [0; RAM_SIZE];
        self.ppu.reset();
        self.dma_stall = 0;
        for pad in &mut self.controllers {
            pad.reset();
        }
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn ppu_mut(&mut self) -> &mut Ppu {
        &mut self.ppu
    }

    pub fn video(&self) -> &VideoBus {
        &self.video
    }

    pub fn cartridge(&self) -> &Cartridge {
        self.video.cartridge()
    }

    /// Controller on `port` (0 or 1)
    pub fn controller(&self, port: usize) -> &Controller {
        &self.controllers[port & 1]
    }

    pub fn set_button(&mut self, port: usize, button: Button, pressed: bool) {
        self.controllers[port & 1].set_button(button, pressed);
    }

    /// Drain the stall cycles left by OAM DMA
    pub fn take_dma_stall(&mut self) -> u32 {
        std::mem::take(&mut self.dma_stall)
    }

    /// Finish the PPU's current scanline and move to the next one.
    ///
    /// Visible lines are rendered, the prerender line reloads scroll, and
    /// entering line 240 starts vblank. Returns true when the NMI line must
    /// be raised.
    pub fn finish_scanline(&mut self) -> bool {
        let line = self.ppu.scanline();
        if (line as usize) < SCREEN_HEIGHT {
            self.ppu.render_scanline(&mut self.video);
        } else if line == PRERENDER_SCANLINE {
            self.ppu.prerender(&mut self.video);
        }

        self.ppu.advance_scanline();
        if self.ppu.scanline() == VBLANK_SCANLINE {
            return self.ppu.vblank_start();
        }
        false
    }

    /// Copy page `page` into OAM through ordinary reads
    fn oam_dma(&mut self, page: u8) {
        let base = (page as u16) << 8;
        for i in 0..256u16 {
            let value = self.read8(base | i);
            self.ppu.write_oam_dma(value);
        }
        self.dma_stall += OAM_DMA_CYCLES;
    }
}

impl Memory for Bus {
    /// Read a byte from the given address
    fn read8(&mut self, address: u16) -> u8 {
        match address {
            // $0000-$1FFF - Internal RAM and its mirrors
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize],
            // $2000-$3FFF - PPU registers, mirrored every 8 bytes
            0x2000..=0x3FFF => self.ppu.read_register(address, &mut self.video),
            // $4016/$4017 - Controllers; upper bits float high
            0x4016 => 0x40 | self.controllers[0].read(),
            0x4017 => 0x40 | self.controllers[1].read(),
            // $4000-$401F - APU and test registers, not emulated
            0x4000..=0x401F => 0,
            // $4020-$FFFF - Cartridge
            _ => self.video.cartridge.cpu_read(address),
        }
    }

    /// Write a byte to the given address
    fn write8(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize] = value,
            0x2000..=0x3FFF => self.ppu.write_register(address, value, &mut self.video),
            // $4014 - OAM DMA
            0x4014 => self.oam_dma(value),
            // $4016 - Controller strobe, shared by both ports
            0x4016 => {
                for pad in &mut self.controllers {
                    pad.write_strobe(value);
                }
            }
            0x4000..=0x401F => trace!(address, value, "APU write ignored"),
            _ => self.video.cartridge.cpu_write(address, value),
        }
    }

    fn reset_peripherals(&mut self) {
        for pad in &mut self.controllers {
            pad.reset();
        }
    }
}

impl VideoMemory for Bus {
    fn ppu_read8(&mut self, address: u16) -> u8 {
        self.video.ppu_read8(address)
    }

    fn ppu_write8(&mut self, address: u16, value: u8) {
        self.video.ppu_write8(address, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Mirroring;

    fn bus(mirroring: Mirroring) -> Bus {
        let prg = (0..0x4000).map(|i| i as u8).collect();
        Bus::new(Cartridge::from_parts(0, prg, vec![], mirroring).unwrap())
    }

    #[test]
    fn test_bus_read_write() {
        let mut bus = bus(Mirroring::Horizontal);

        // Write to RAM
        bus.write8(0x0000, 0x42);
        assert_eq!(bus.read8(0x0000), 0x42);

        // Test RAM mirroring
        bus.write8(0x0001, 0x43);
        assert_eq!(bus.read8(0x0801), 0x43);
        assert_eq!(bus.read8(0x1801), 0x43);
    }

    #[test]
    fn test_cartridge_space() {
        let mut bus = bus(Mirroring::Horizontal);
        assert_eq!(bus.read8(0x8001), 0x01);
        assert_eq!(bus.read8(0xC0FF), 0xFF);
        bus.write8(0x6000, 0x77);
        assert_eq!(bus.read8(0x6000), 0x77);
    }

    #[test]
    fn test_unmapped_reads_are_zero() {
        let mut bus = bus(Mirroring::Horizontal);
        assert_eq!(bus.read8(0x4000), 0);
        assert_eq!(bus.read8(0x4015), 0);
        assert_eq!(bus.read8(0x5000), 0);
    }

    #[test]
    fn test_ppu_data_through_register_mirror() {
        let mut bus = bus(Mirroring::Horizontal);
        bus.write8(0x2006, 0x21);
        bus.write8(0x200E, 0x00);
        bus.write8(0x3FFF, 0x5A);
        assert_eq!(bus.ppu_read8(0x2100), 0x5A);
    }

    #[test]
    fn test_horizontal_mirroring() {
        let mut bus = bus(Mirroring::Horizontal);
        bus.ppu_write8(0x2000, 1);
        bus.ppu_write8(0x2800, 2);
        assert_eq!(bus.ppu_read8(0x2400), 1);
        assert_eq!(bus.ppu_read8(0x2C00), 2);
        // $3000-$3EFF mirrors the nametables
        assert_eq!(bus.ppu_read8(0x3000), 1);
    }

    #[test]
    fn test_vertical_mirroring() {
        let mut bus = bus(Mirroring::Vertical);
        bus.ppu_write8(0x2000, 1);
        bus.ppu_write8(0x2400, 2);
        assert_eq!(bus.ppu_read8(0x2800), 1);
        assert_eq!(bus.ppu_read8(0x2C00), 2);
    }

    #[test]
    fn test_chr_ram_through_video_bus() {
        let mut bus = bus(Mirroring::Vertical);
        bus.ppu_write8(0x0123, 0x99);
        assert_eq!(bus.ppu_read8(0x0123), 0x99);
    }

    #[test]
    fn test_oam_dma() {
        let mut bus = bus(Mirroring::Horizontal);
        for i in 0..256u16 {
            bus.write8(0x0200 + i, i as u8);
        }
        bus.write8(0x2003, 0x10);
        bus.write8(0x4014, 0x02);

        let oam = bus.ppu().oam();
        assert_eq!(oam[0x10], 0x00);
        assert_eq!(oam[0x11], 0x01);
        // OAM address wraps while copying
        assert_eq!(oam[0x0F], 0xFF);
        assert_eq!(bus.take_dma_stall(), OAM_DMA_CYCLES);
        assert_eq!(bus.take_dma_stall(), 0);
    }

    #[test]
    fn test_controller_port() {
        let mut bus = bus(Mirroring::Horizontal);
        bus.set_button(0, Button::B, true);
        bus.set_button(1, Button::A, true);
        bus.write8(0x4016, 1);
        bus.write8(0x4016, 0);
        assert_eq!(bus.read8(0x4016), 0x40);
        assert_eq!(bus.read8(0x4016), 0x41);
        assert_eq!(bus.read8(0x4017), 0x41);
    }

    #[test]
    fn test_finish_scanline_raises_nmi_at_240() {
        let mut bus = bus(Mirroring::Horizontal);
        bus.write8(0x2000, 0x80);
        for _ in 0..239 {
            assert!(!bus.finish_scanline());
        }
        assert!(bus.finish_scanline());
        assert_eq!(bus.ppu().scanline(), VBLANK_SCANLINE);
        assert!(bus.ppu().status().vblank());
    }
}
