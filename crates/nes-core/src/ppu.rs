//! PPU (Picture Processing Unit) implementation
//!
//! The PPU renders one scanline per call. Background pixels come out of a
//! pair of 16-bit pattern shift registers (plus two attribute registers)
//! holding the current and the prefetched tile; sprites are evaluated one
//! line ahead of the line they are drawn on.
//!
//! Key facts:
//! - 262 scanlines per frame: 0-239 visible, 240 starts vblank, 261 is prerender
//! - 256x240 visible pixels
//! - Up to 8 sprites per scanline, 8x8 or 8x16
//! - Palette RAM: 32 bytes, backdrop entries shared between background and sprites

use tracing::debug;

use crate::bits::Bits;
use crate::bus::VideoMemory;
use crate::palette;
use crate::vram_addr::VramAddr;

/// Visible width in pixels
pub const SCREEN_WIDTH: usize = 256;
/// Visible height in pixels
pub const SCREEN_HEIGHT: usize = 240;
/// Frame buffer rows, including two slack rows below the picture
pub const FRAME_ROWS: usize = 242;

pub const OAM_SIZE: usize = 256;
pub const PALETTE_SIZE: usize = 32;

/// First scanline of vertical blank
pub const VBLANK_SCANLINE: u16 = 240;
/// Prerender scanline
pub const PRERENDER_SCANLINE: u16 = 261;
pub const SCANLINES_PER_FRAME: u16 = 262;

/// Sprites drawn per scanline
pub const MAX_SPRITES_PER_LINE: usize = 8;

/// PPU control flags ($2000)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpuCtrl(u8);

impl PpuCtrl {
    pub const NMI_ENABLE: u8 = 0b10000000;
    pub const MASTER_SLAVE: u8 = 0b01000000;
    pub const SPRITE_SIZE: u8 = 0b00100000;
    pub const BG_PATTERN_TABLE: u8 = 0b00010000;
    pub const SPR_PATTERN_TABLE: u8 = 0b00001000;
    pub const VRAM_INC: u8 = 0b00000100;
    pub const NAMETABLE: u8 = 0b00000011;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn nmi_enable(&self) -> bool {
        (self.0 & Self::NMI_ENABLE) != 0
    }

    /// Sprite height in rows: 8 or 16
    pub fn sprite_height(&self) -> u8 {
        if (self.0 & Self::SPRITE_SIZE) != 0 {
            16
        } else {
            8
        }
    }

    pub fn background_table(&self) -> u16 {
        if (self.0 & Self::BG_PATTERN_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        }
    }

    /// Sprite pattern table for 8x8 sprites
    pub fn sprite_table(&self) -> u16 {
        if (self.0 & Self::SPR_PATTERN_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        }
    }

    /// PPUDATA address step
    pub fn vram_increment(&self) -> u16 {
        if (self.0 & Self::VRAM_INC) != 0 {
            32
        } else {
            1
        }
    }

    pub fn nametable(&self) -> u8 {
        self.0 & Self::NAMETABLE
    }
}

/// PPU status flags ($2002)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpuStatus(u8);

impl PpuStatus {
    pub const VBLANK: u8 = 0b10000000;
    pub const SPRITE_ZERO_HIT: u8 = 0b01000000;
    pub const SPRITE_OVERFLOW: u8 = 0b00100000;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn vblank(&self) -> bool {
        self.0.bit(7)
    }

    pub fn sprite_zero_hit(&self) -> bool {
        self.0.bit(6)
    }

    pub fn sprite_overflow(&self) -> bool {
        self.0.bit(5)
    }

    pub fn set_vblank(&mut self, on: bool) {
        self.0 = self.0.with_bit(7, on);
    }

    pub fn set_sprite_zero_hit(&mut self, on: bool) {
        self.0 = self.0.with_bit(6, on);
    }

    pub fn set_sprite_overflow(&mut self, on: bool) {
        self.0 = self.0.with_bit(5, on);
    }
}

/// PPU render mask flags ($2001)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpuMask(u8);

impl PpuMask {
    pub const GRAYSCALE: u8 = 0b00000001;
    pub const RENDER_BG_LEFT: u8 = 0b00000010; // Bit 1 - background in left 8px
    pub const RENDER_SPR_LEFT: u8 = 0b00000100; // Bit 2 - sprites in left 8px
    pub const RENDER_BG: u8 = 0b00001000; // Bit 3 - render background
    pub const RENDER_SPR: u8 = 0b00010000; // Bit 4 - render sprites
    pub const EMPHASIZE_RED: u8 = 0b00100000;
    pub const EMPHASIZE_GREEN: u8 = 0b01000000;
    pub const EMPHASIZE_BLUE: u8 = 0b10000000;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn grayscale(&self) -> bool {
        (self.0 & Self::GRAYSCALE) != 0
    }

    pub fn render_background(&self) -> bool {
        (self.0 & Self::RENDER_BG) != 0
    }

    pub fn render_sprites(&self) -> bool {
        (self.0 & Self::RENDER_SPR) != 0
    }

    /// Either layer enabled. Fetches and scroll updates only happen while true.
    pub fn rendering(&self) -> bool {
        (self.0 & (Self::RENDER_BG | Self::RENDER_SPR)) != 0
    }

    fn background_at(&self, x: usize) -> bool {
        self.render_background() && (x >= 8 || (self.0 & Self::RENDER_BG_LEFT) != 0)
    }

    fn sprites_at(&self, x: usize) -> bool {
        self.render_sprites() && (x >= 8 || (self.0 & Self::RENDER_SPR_LEFT) != 0)
    }
}

/// A sprite selected by evaluation for the next line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpriteSlot {
    /// OAM index (0-63)
    pub index: u8,
    pub tile: u8,
    pub attributes: u8,
    pub x: u8,
    /// Row within the sprite, before vertical flip
    pub row: u8,
}

impl SpriteSlot {
    pub fn palette(&self) -> u8 {
        self.attributes & 0x03
    }

    pub fn behind_background(&self) -> bool {
        self.attributes.bit(5)
    }

    pub fn flip_horizontal(&self) -> bool {
        self.attributes.bit(6)
    }

    pub fn flip_vertical(&self) -> bool {
        self.attributes.bit(7)
    }
}

/// PPU internal state
#[derive(Debug, Clone)]
pub struct Ppu {
    ctrl: PpuCtrl,
    mask: PpuMask,
    status: PpuStatus,
    oam_addr: u8,

    /// Current VRAM address
    v: VramAddr,
    /// Temporary VRAM address (top-left of the screen)
    t: VramAddr,
    /// Fine X scroll (0-7)
    fine_x: u8,
    /// Write toggle for PPUSCROLL and PPUADDR
    write_latch: bool,
    /// PPUDATA read buffer
    read_buffer: u8,
    /// Last value driven on the register data bus
    io_latch: u8,

    // Background shift registers: high byte is the tile being drawn
    pattern_lo: u16,
    pattern_hi: u16,
    attr_lo: u16,
    attr_hi: u16,

    oam: [u8; OAM_SIZE],
    palette: [u8; PALETTE_SIZE],

    scanline: u16,
    /// Line sprite evaluation runs against, one behind `scanline`
    sprite_scanline: u16,
    frame: u64,

    sprites: [SpriteSlot; MAX_SPRITES_PER_LINE],
    sprite_count: usize,

    frame_buffer: Box<[u32]>,
}

impl Ppu {
    /// Create a new PPU instance
    pub fn new() -> Self {
        Self {
            ctrl: PpuCtrl::default(),
            mask: PpuMask::default(),
            status: PpuStatus::default(),
            oam_addr: 0,
            v: VramAddr::default(),
            t: VramAddr::default(),
            fine_x: 0,
            write_latch: false,
            read_buffer: 0,
            io_latch: 0,
            pattern_lo: 0,
            pattern_hi: 0,
            attr_lo: 0,
            attr_hi: 0,
            oam: [0; OAM_SIZE],
            palette: [0; PALETTE_SIZE],
            scanline: 0,
            sprite_scanline: PRERENDER_SCANLINE,
            frame: 0,
            sprites: [SpriteSlot::default(); MAX_SPRITES_PER_LINE],
            sprite_count: 0,
            frame_buffer: vec![0; SCREEN_WIDTH * FRAME_ROWS].into_boxed_slice(),
        }
    }

    /// Reset the PPU. The frame buffer is cleared in place.
    pub fn reset(&mut self) {
        self.ctrl = PpuCtrl::default();
        self.mask = PpuMask::default();
        self.status = PpuStatus::default();
        self.oam_addr = 0;
        self.v = VramAddr::default();
        self.t = VramAddr::default();
        self.fine_x = 0;
        self.write_latch = false;
        self.read_buffer = 0;
        self.io_latch = 0;
        self.pattern_lo = 0;
        self.pattern_hi = 0;
        self.attr_lo = 0;
        self.attr_hi = 0;
        self.oam = [0; OAM_SIZE];
        self.palette = [0; PALETTE_SIZE];
        self.scanline = 0;
        self.sprite_scanline = PRERENDER_SCANLINE;
        self.frame = 0;
        self.sprite_count = 0;
        self.frame_buffer.fill(0);
    }

    // Accessors

    pub fn ctrl(&self) -> PpuCtrl {
        self.ctrl
    }

    pub fn mask(&self) -> PpuMask {
        self.mask
    }

    pub fn status(&self) -> PpuStatus {
        self.status
    }

    pub fn oam_addr(&self) -> u8 {
        self.oam_addr
    }

    pub fn vram_addr(&self) -> VramAddr {
        self.v
    }

    pub fn temp_addr(&self) -> VramAddr {
        self.t
    }

    pub fn fine_x(&self) -> u8 {
        self.fine_x
    }

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    pub fn sprite_scanline(&self) -> u16 {
        self.sprite_scanline
    }

    /// Completed frames
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn oam(&self) -> &[u8; OAM_SIZE] {
        &self.oam
    }

    pub fn palette_ram(&self) -> &[u8; PALETTE_SIZE] {
        &self.palette
    }

    /// Sprites selected for the line being rendered
    pub fn sprites(&self) -> &[SpriteSlot] {
        &self.sprites[..self.sprite_count]
    }

    /// Visible 256x240 picture, 0x00RRGGBB per pixel
    pub fn frame_buffer(&self) -> &[u32] {
        &self.frame_buffer[..SCREEN_WIDTH * SCREEN_HEIGHT]
    }

    // Palette RAM

    fn palette_index(address: u16) -> usize {
        (address & 0x1F) as usize
    }

    pub fn read_palette(&self, address: u16) -> u8 {
        self.palette[Self::palette_index(address)]
    }

    /// Backdrop slots (every fourth entry) are shared between the two halves
    pub fn write_palette(&mut self, address: u16, value: u8) {
        let i = Self::palette_index(address);
        self.palette[i] = value;
        if i & 0x03 == 0 {
            self.palette[i ^ 0x10] = value;
        }
    }

    // CPU-facing registers

    /// Read a PPU register. `address` is any mirror of $2000-$2007.
    pub fn read_register<V: VideoMemory + ?Sized>(&mut self, address: u16, video: &mut V) -> u8 {
        let value = match address & 0x0007 {
            // $2002 - PPUSTATUS
            2 => {
                let value = (self.status.bits() & 0xE0) | (self.io_latch & 0x1F);
                self.status.set_vblank(false);
                self.write_latch = false;
                value
            }
            // $2004 - OAMDATA
            4 => self.oam[self.oam_addr as usize],
            // $2007 - PPUDATA
            7 => {
                let address = self.v.address();
                let value = if address >= 0x3F00 {
                    // Palette reads are immediate; the buffer picks up the nametable underneath
                    self.read_buffer = video.ppu_read8(address - 0x1000);
                    self.read_palette(address)
                } else {
                    let buffered = self.read_buffer;
                    self.read_buffer = video.ppu_read8(address);
                    buffered
                };
                self.v.increment(self.ctrl.vram_increment());
                value
            }
            // Write-only registers return whatever was last on the bus
            _ => self.io_latch,
        };
        self.io_latch = value;
        value
    }

    /// Write a PPU register. `address` is any mirror of $2000-$2007.
    pub fn write_register<V: VideoMemory + ?Sized>(&mut self, address: u16, value: u8, video: &mut V) {
        self.io_latch = value;
        match address & 0x0007 {
            // $2000 - PPUCTRL
            0 => {
                self.ctrl = PpuCtrl::new(value);
                self.t.set_nametable(value & PpuCtrl::NAMETABLE);
            }
            // $2001 - PPUMASK
            1 => self.mask = PpuMask::new(value),
            // $2002 - PPUSTATUS is read-only
            2 => {}
            // $2003 - OAMADDR
            3 => self.oam_addr = value,
            // $2004 - OAMDATA
            4 => self.write_oam_dma(value),
            // $2005 - PPUSCROLL
            5 => {
                if !self.write_latch {
                    self.t.set_coarse_x(value >> 3);
                    self.fine_x = value & 0x07;
                } else {
                    self.t.set_fine_y(value & 0x07);
                    self.t.set_coarse_y(value >> 3);
                }
                self.write_latch = !self.write_latch;
            }
            // $2006 - PPUADDR
            6 => {
                if !self.write_latch {
                    self.t.set_high(value);
                } else {
                    self.t.set_low(value);
                    self.v = self.t;
                }
                self.write_latch = !self.write_latch;
            }
            // $2007 - PPUDATA
            _ => {
                let address = self.v.address();
                if address >= 0x3F00 {
                    self.write_palette(address, value);
                } else {
                    video.ppu_write8(address, value);
                }
                self.v.increment(self.ctrl.vram_increment());
            }
        }
    }

    /// Store one OAM byte at OAMADDR and advance it. Used by $2004 and OAM DMA.
    pub fn write_oam_dma(&mut self, value: u8) {
        self.oam[self.oam_addr as usize] = value;
        self.oam_addr = self.oam_addr.wrapping_add(1);
    }

    // Scanline hooks

    /// Enter vertical blank. Returns true when the NMI line must be raised.
    pub fn vblank_start(&mut self) -> bool {
        self.status.set_vblank(true);
        debug!(frame = self.frame, "vblank");
        self.ctrl.nmi_enable()
    }

    /// Prerender line: clear the status flags and load the scroll for the next frame
    pub fn prerender<V: VideoMemory + ?Sized>(&mut self, video: &mut V) {
        self.status = PpuStatus::default();
        self.v.copy_horizontal(self.t);
        if self.mask.rendering() {
            self.v.copy_vertical(self.t);
            self.prime_tiles(video);
        }
    }

    /// Move to the next scanline, wrapping after the prerender line
    pub fn advance_scanline(&mut self) {
        self.sprite_scanline = self.scanline;
        self.scanline += 1;
        if self.scanline == SCANLINES_PER_FRAME {
            self.scanline = 0;
            self.frame += 1;
        }
    }

    /// Select up to eight sprites that cover `sprite_scanline`.
    ///
    /// A ninth match sets the overflow flag. Nothing is selected while the
    /// evaluation line is off screen, so line 0 never shows sprites.
    pub fn evaluate_sprites(&mut self) {
        self.sprite_count = 0;
        let line = self.sprite_scanline;
        if line >= VBLANK_SCANLINE {
            return;
        }

        let height = self.ctrl.sprite_height() as u16;
        for (index, entry) in self.oam.chunks_exact(4).enumerate() {
            let y = entry[0] as u16;
            if line < y || line - y >= height {
                continue;
            }
            if self.sprite_count == MAX_SPRITES_PER_LINE {
                self.status.set_sprite_overflow(true);
                break;
            }
            self.sprites[self.sprite_count] = SpriteSlot {
                index: index as u8,
                tile: entry[1],
                attributes: entry[2],
                x: entry[3],
                row: (line - y) as u8,
            };
            self.sprite_count += 1;
        }
    }

    /// Render the current scanline into the frame buffer.
    ///
    /// Lines outside 0-239 are left to the vblank and prerender hooks.
    pub fn render_scanline<V: VideoMemory + ?Sized>(&mut self, video: &mut V) {
        let line = self.scanline as usize;
        if line >= SCREEN_HEIGHT {
            return;
        }

        let rendering = self.mask.rendering();
        if rendering {
            self.evaluate_sprites();
        } else {
            self.sprite_count = 0;
        }

        let mut sprite_rows = [(0u8, 0u8); MAX_SPRITES_PER_LINE];
        for (i, slot) in self.sprites[..self.sprite_count].iter().enumerate() {
            sprite_rows[i] = self.sprite_pattern(slot, video);
        }

        let grayscale = if self.mask.grayscale() { 0x30 } else { 0x3F };
        let row = line * SCREEN_WIDTH;

        for x in 0..SCREEN_WIDTH {
            let (bg_pixel, bg_palette) = if self.mask.background_at(x) {
                self.background_pixel()
            } else {
                (0, 0)
            };

            let mut color = if bg_pixel != 0 {
                self.palette[(bg_palette * 4 + bg_pixel) as usize]
            } else {
                self.palette[0]
            };

            if self.mask.sprites_at(x) {
                for (slot, &(lo, hi)) in self.sprites[..self.sprite_count].iter().zip(&sprite_rows) {
                    let column = x as i32 - slot.x as i32;
                    if !(0..8).contains(&column) {
                        continue;
                    }
                    let column = column as u32;
                    let pixel = lo.bit_from_left(column) | (hi.bit_from_left(column) << 1);
                    if pixel == 0 {
                        continue;
                    }

                    if slot.index == 0 && bg_pixel != 0 && x != SCREEN_WIDTH - 1 {
                        self.status.set_sprite_zero_hit(true);
                    }
                    if !(slot.behind_background() && bg_pixel != 0) {
                        color = self.palette[(0x10 + slot.palette() * 4 + pixel) as usize];
                    }
                    // First opaque sprite in OAM order wins
                    break;
                }
            }

            self.frame_buffer[row + x] = palette::rgb(color & grayscale);

            if rendering {
                self.shift();
                if x % 8 == 7 {
                    self.load_tile(video);
                    self.v.increment_coarse_x();
                }
            }
        }

        if rendering {
            self.v.increment_fine_y();
            self.v.copy_horizontal(self.t);
            self.prime_tiles(video);
        }
    }

    // Background pipeline

    /// Pixel value and palette group under fine X
    fn background_pixel(&self) -> (u8, u8) {
        let bit = 15 - self.fine_x as u32;
        let pixel = self.pattern_lo.bit(bit) as u8 | ((self.pattern_hi.bit(bit) as u8) << 1);
        let group = self.attr_lo.bit(bit) as u8 | ((self.attr_hi.bit(bit) as u8) << 1);
        (pixel, group)
    }

    fn shift(&mut self) {
        self.pattern_lo <<= 1;
        self.pattern_hi <<= 1;
        self.attr_lo <<= 1;
        self.attr_hi <<= 1;
    }

    /// Fetch the tile under `v` into the low byte of the shift registers
    fn load_tile<V: VideoMemory + ?Sized>(&mut self, video: &mut V) {
        let tile = video.ppu_read8(self.v.tile_address()) as u16;
        let attribute = video.ppu_read8(self.v.attribute_address());
        let group = (attribute >> self.v.attribute_shift()) & 0x03;

        let address = self.ctrl.background_table() + tile * 16 + self.v.fine_y() as u16;
        let lo = video.ppu_read8(address);
        let hi = video.ppu_read8(address + 8);

        self.pattern_lo = (self.pattern_lo & 0xFF00) | lo as u16;
        self.pattern_hi = (self.pattern_hi & 0xFF00) | hi as u16;
        self.attr_lo = (self.attr_lo & 0xFF00) | if group.bit(0) { 0xFF } else { 0x00 };
        self.attr_hi = (self.attr_hi & 0xFF00) | if group.bit(1) { 0xFF } else { 0x00 };
    }

    /// Load the first two tiles of a line
    fn prime_tiles<V: VideoMemory + ?Sized>(&mut self, video: &mut V) {
        for _ in 0..2 {
            self.pattern_lo <<= 8;
            self.pattern_hi <<= 8;
            self.attr_lo <<= 8;
            self.attr_hi <<= 8;
            self.load_tile(video);
            self.v.increment_coarse_x();
        }
    }

    // Sprites

    /// Both bitplanes of a sprite's row, already flipped horizontally if needed
    fn sprite_pattern<V: VideoMemory + ?Sized>(&self, slot: &SpriteSlot, video: &mut V) -> (u8, u8) {
        let height = self.ctrl.sprite_height();
        let mut row = slot.row;
        if slot.flip_vertical() {
            row = height - 1 - row;
        }

        let address = if height == 16 {
            let table = if slot.tile.bit(0) { 0x1000 } else { 0x0000 };
            let mut tile = (slot.tile & 0xFE) as u16;
            if row >= 8 {
                tile += 1;
                row -= 8;
            }
            table + tile * 16 + row as u16
        } else {
            self.ctrl.sprite_table() + slot.tile as u16 * 16 + row as u16
        };

        let mut lo = video.ppu_read8(address);
        let mut hi = video.ppu_read8(address + 8);
        if slot.flip_horizontal() {
            lo = lo.reverse_bits();
            hi = hi.reverse_bits();
        }
        (lo, hi)
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}
