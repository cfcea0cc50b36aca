//! Cartridge boards
//!
//! A mapper sits between the cartridge ROM chips and the two buses. It sees
//! CPU accesses to $4020-$FFFF and PPU accesses to $0000-$1FFF, and decides
//! which bank answers. Boards supported:
//!
//! | Number | Board | PRG | CHR |
//! |--------|-------|-----|-----|
//! | 0 | NROM  | 16/32 KiB fixed | 8 KiB fixed |
//! | 1 | MMC1  | 16/32 KiB switched via serial port | 4/8 KiB switched |
//! | 2 | UxROM | 16 KiB switched at $8000, last bank fixed at $C000 | 8 KiB RAM |
//! | 3 | CNROM | fixed | 8 KiB switched |
//! | 7 | AxROM | 32 KiB switched | 8 KiB RAM, single-screen mirroring |

use std::fmt;

use tracing::debug;

use crate::cartridge::{CartridgeError, Mirroring};

pub const PRG_BANK_SIZE: usize = 0x4000;
pub const CHR_BANK_SIZE: usize = 0x2000;
pub const PRG_RAM_SIZE: usize = 0x2000;

/// Cartridge board interface used by the bus
pub trait Mapper: Send + fmt::Debug {
    /// Board name for logs and the CLI
    fn name(&self) -> &'static str;

    /// CPU read in $4020-$FFFF
    fn cpu_read(&mut self, address: u16) -> u8;

    /// CPU write in $4020-$FFFF. Writes to ROM space drive the bank registers.
    fn cpu_write(&mut self, address: u16, value: u8);

    /// PPU read in $0000-$1FFF
    fn ppu_read(&mut self, address: u16) -> u8;

    /// PPU write in $0000-$1FFF. Ignored unless the board carries CHR RAM.
    fn ppu_write(&mut self, address: u16, value: u8);

    /// Current nametable mirroring
    fn mirroring(&self) -> Mirroring;
}

/// Build the board for an iNES mapper number
pub fn create(
    number: u8,
    prg: Vec<u8>,
    chr: Vec<u8>,
    mirroring: Mirroring,
) -> Result<Box<dyn Mapper>, CartridgeError> {
    if prg.is_empty() {
        return Err(CartridgeError::InvalidHeader("no PRG ROM"));
    }
    let banks = Banks::new(prg, chr);
    let mapper: Box<dyn Mapper> = match number {
        0 => Box::new(Nrom { banks, mirroring }),
        1 => Box::new(Mmc1::new(banks)),
        2 => Box::new(Uxrom { banks, mirroring, bank: 0 }),
        3 => Box::new(Cnrom { banks, mirroring, bank: 0 }),
        7 => Box::new(Axrom { banks, bank: 0, upper: false }),
        n => return Err(CartridgeError::UnsupportedMapper(n)),
    };
    Ok(mapper)
}

/// ROM, CHR and PRG RAM storage shared by every board
struct Banks {
    prg: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    prg_ram: Box<[u8]>,
}

impl Banks {
    fn new(prg: Vec<u8>, chr: Vec<u8>) -> Self {
        let chr_is_ram = chr.is_empty();
        let chr = if chr_is_ram { vec![0; CHR_BANK_SIZE] } else { chr };
        Self {
            prg,
            chr,
            chr_is_ram,
            prg_ram: vec![0; PRG_RAM_SIZE].into_boxed_slice(),
        }
    }

    fn prg_banks(&self, size: usize) -> usize {
        (self.prg.len() / size).max(1)
    }

    /// Byte `offset` of PRG bank `bank` of `size` bytes. Bank numbers wrap.
    fn prg_byte(&self, bank: usize, size: usize, offset: usize) -> u8 {
        let bank = bank % self.prg_banks(size);
        self.prg[(bank * size + offset) % self.prg.len()]
    }

    fn last_prg_bank(&self, size: usize) -> usize {
        self.prg_banks(size) - 1
    }

    fn chr_index(&self, bank: usize, size: usize, offset: usize) -> usize {
        let count = (self.chr.len() / size).max(1);
        ((bank % count) * size + offset) % self.chr.len()
    }

    fn chr_read(&self, bank: usize, size: usize, offset: usize) -> u8 {
        self.chr[self.chr_index(bank, size, offset)]
    }

    fn chr_write(&mut self, bank: usize, size: usize, offset: usize, value: u8) {
        if self.chr_is_ram {
            let index = self.chr_index(bank, size, offset);
            self.chr[index] = value;
        }
    }

    /// $4020-$7FFF: PRG RAM at $6000, nothing below it
    fn low_read(&self, address: u16) -> u8 {
        match address {
            0x6000..=0x7FFF => self.prg_ram[(address - 0x6000) as usize],
            _ => 0,
        }
    }

    fn low_write(&mut self, address: u16, value: u8) {
        if let 0x6000..=0x7FFF = address {
            self.prg_ram[(address - 0x6000) as usize] = value;
        }
    }
}

impl fmt::Debug for Banks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Banks")
            .field("prg", &self.prg.len())
            .field("chr", &self.chr.len())
            .field("chr_is_ram", &self.chr_is_ram)
            .finish()
    }
}

/// Mapper 0
#[derive(Debug)]
pub struct Nrom {
    banks: Banks,
    mirroring: Mirroring,
}

impl Mapper for Nrom {
    fn name(&self) -> &'static str {
        "NROM"
    }

    fn cpu_read(&mut self, address: u16) -> u8 {
        match address {
            // 16 KiB images appear twice
            0x8000..=0xFFFF => self.banks.prg_byte(0, 0x8000, (address - 0x8000) as usize),
            _ => self.banks.low_read(address),
        }
    }

    fn cpu_write(&mut self, address: u16, value: u8) {
        self.banks.low_write(address, value);
    }

    fn ppu_read(&mut self, address: u16) -> u8 {
        self.banks.chr_read(0, CHR_BANK_SIZE, address as usize & 0x1FFF)
    }

    fn ppu_write(&mut self, address: u16, value: u8) {
        self.banks.chr_write(0, CHR_BANK_SIZE, address as usize & 0x1FFF, value);
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }
}

/// Mapper 2
#[derive(Debug)]
pub struct Uxrom {
    banks: Banks,
    mirroring: Mirroring,
    bank: u8,
}

impl Mapper for Uxrom {
    fn name(&self) -> &'static str {
        "UxROM"
    }

    fn cpu_read(&mut self, address: u16) -> u8 {
        match address {
            0x8000..=0xBFFF => {
                self.banks
                    .prg_byte(self.bank as usize, PRG_BANK_SIZE, (address - 0x8000) as usize)
            }
            0xC000..=0xFFFF => {
                let last = self.banks.last_prg_bank(PRG_BANK_SIZE);
                self.banks.prg_byte(last, PRG_BANK_SIZE, (address - 0xC000) as usize)
            }
            _ => self.banks.low_read(address),
        }
    }

    fn cpu_write(&mut self, address: u16, value: u8) {
        if address >= 0x8000 {
            self.bank = value & 0x0F;
            debug!(bank = self.bank, "UxROM PRG bank");
        } else {
            self.banks.low_write(address, value);
        }
    }

    fn ppu_read(&mut self, address: u16) -> u8 {
        self.banks.chr_read(0, CHR_BANK_SIZE, address as usize & 0x1FFF)
    }

    fn ppu_write(&mut self, address: u16, value: u8) {
        self.banks.chr_write(0, CHR_BANK_SIZE, address as usize & 0x1FFF, value);
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }
}

/// Mapper 3
#[derive(Debug)]
pub struct Cnrom {
    banks: Banks,
    mirroring: Mirroring,
    bank: u8,
}

impl Mapper for Cnrom {
    fn name(&self) -> &'static str {
        "CNROM"
    }

    fn cpu_read(&mut self, address: u16) -> u8 {
        match address {
            0x8000..=0xFFFF => self.banks.prg_byte(0, 0x8000, (address - 0x8000) as usize),
            _ => self.banks.low_read(address),
        }
    }

    fn cpu_write(&mut self, address: u16, value: u8) {
        if address >= 0x8000 {
            self.bank = value & 0x03;
            debug!(bank = self.bank, "CNROM CHR bank");
        } else {
            self.banks.low_write(address, value);
        }
    }

    fn ppu_read(&mut self, address: u16) -> u8 {
        self.banks
            .chr_read(self.bank as usize, CHR_BANK_SIZE, address as usize & 0x1FFF)
    }

    fn ppu_write(&mut self, address: u16, value: u8) {
        self.banks
            .chr_write(self.bank as usize, CHR_BANK_SIZE, address as usize & 0x1FFF, value);
    }

    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }
}

/// Mapper 7
#[derive(Debug)]
pub struct Axrom {
    banks: Banks,
    bank: u8,
    /// Single-screen page select
    upper: bool,
}

impl Mapper for Axrom {
    fn name(&self) -> &'static str {
        "AxROM"
    }

    fn cpu_read(&mut self, address: u16) -> u8 {
        match address {
            0x8000..=0xFFFF => {
                self.banks
                    .prg_byte(self.bank as usize, 0x8000, (address - 0x8000) as usize)
            }
            _ => self.banks.low_read(address),
        }
    }

    fn cpu_write(&mut self, address: u16, value: u8) {
        if address >= 0x8000 {
            self.bank = value & 0x07;
            self.upper = value & 0x10 != 0;
            debug!(bank = self.bank, upper = self.upper, "AxROM bank");
        } else {
            self.banks.low_write(address, value);
        }
    }

    fn ppu_read(&mut self, address: u16) -> u8 {
        self.banks.chr_read(0, CHR_BANK_SIZE, address as usize & 0x1FFF)
    }

    fn ppu_write(&mut self, address: u16, value: u8) {
        self.banks.chr_write(0, CHR_BANK_SIZE, address as usize & 0x1FFF, value);
    }

    fn mirroring(&self) -> Mirroring {
        if self.upper {
            Mirroring::SingleUpper
        } else {
            Mirroring::SingleLower
        }
    }
}

/// Mapper 1.
///
/// Registers are loaded one bit at a time through a 5-bit shift register.
/// A write with bit 7 set clears the shift register and forces PRG mode 3.
#[derive(Debug)]
pub struct Mmc1 {
    banks: Banks,
    shift: u8,
    shift_count: u8,
    // 4bit0
    // -----
    // CPPMM
    // |||++- Mirroring (0: one-screen lower, 1: one-screen upper, 2: vertical, 3: horizontal)
    // |++--- PRG mode (0, 1: 32 KiB; 2: fix first bank; 3: fix last bank)
    // +----- CHR mode (0: 8 KiB; 1: two 4 KiB banks)
    control: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    prg_bank: u8,
}

impl Mmc1 {
    fn new(banks: Banks) -> Self {
        Self {
            banks,
            shift: 0,
            shift_count: 0,
            control: 0x0C,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_bank: 0,
        }
    }

    fn write_register(&mut self, address: u16, value: u8) {
        match address {
            0x8000..=0x9FFF => self.control = value,
            0xA000..=0xBFFF => self.chr_bank0 = value,
            0xC000..=0xDFFF => self.chr_bank1 = value,
            _ => self.prg_bank = value & 0x0F,
        }
        debug!(
            control = self.control,
            chr0 = self.chr_bank0,
            chr1 = self.chr_bank1,
            prg = self.prg_bank,
            "MMC1 registers"
        );
    }

    fn prg_mode(&self) -> u8 {
        (self.control >> 2) & 0x03
    }

    /// CHR bank and offset for a pattern table address
    fn chr_location(&self, address: u16) -> (usize, usize, usize) {
        let address = address as usize & 0x1FFF;
        if self.control & 0x10 == 0 {
            ((self.chr_bank0 >> 1) as usize, CHR_BANK_SIZE, address)
        } else if address < 0x1000 {
            (self.chr_bank0 as usize, 0x1000, address)
        } else {
            (self.chr_bank1 as usize, 0x1000, address - 0x1000)
        }
    }
}

impl Mapper for Mmc1 {
    fn name(&self) -> &'static str {
        "MMC1"
    }

    fn cpu_read(&mut self, address: u16) -> u8 {
        match address {
            0x8000..=0xFFFF => {
                let offset = (address - 0x8000) as usize;
                match self.prg_mode() {
                    0 | 1 => self.banks.prg_byte((self.prg_bank >> 1) as usize, 0x8000, offset),
                    2 if offset < PRG_BANK_SIZE => self.banks.prg_byte(0, PRG_BANK_SIZE, offset),
                    2 => self.banks.prg_byte(
                        self.prg_bank as usize,
                        PRG_BANK_SIZE,
                        offset - PRG_BANK_SIZE,
                    ),
                    _ if offset < PRG_BANK_SIZE => {
                        self.banks.prg_byte(self.prg_bank as usize, PRG_BANK_SIZE, offset)
                    }
                    _ => {
                        let last = self.banks.last_prg_bank(PRG_BANK_SIZE);
                        self.banks.prg_byte(last, PRG_BANK_SIZE, offset - PRG_BANK_SIZE)
                    }
                }
            }
            _ => self.banks.low_read(address),
        }
    }

    fn cpu_write(&mut self, address: u16, value: u8) {
        if address < 0x8000 {
            self.banks.low_write(address, value);
            return;
        }

        if value & 0x80 != 0 {
            self.shift = 0;
            self.shift_count = 0;
            self.control |= 0x0C;
            return;
        }

        self.shift |= (value & 0x01) << self.shift_count;
        self.shift_count += 1;
        if self.shift_count == 5 {
            let data = self.shift;
            self.shift = 0;
            self.shift_count = 0;
            self.write_register(address, data);
        }
    }

    fn ppu_read(&mut self, address: u16) -> u8 {
        let (bank, size, offset) = self.chr_location(address);
        self.banks.chr_read(bank, size, offset)
    }

    fn ppu_write(&mut self, address: u16, value: u8) {
        let (bank, size, offset) = self.chr_location(address);
        self.banks.chr_write(bank, size, offset, value);
    }

    fn mirroring(&self) -> Mirroring {
        match self.control & 0x03 {
            0 => Mirroring::SingleLower,
            1 => Mirroring::SingleUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// PRG image whose every byte holds its 16 KiB bank number
    fn banked_prg(banks: usize) -> Vec<u8> {
        (0..banks).flat_map(|b| vec![b as u8; PRG_BANK_SIZE]).collect()
    }

    fn mmc1_write(mapper: &mut dyn Mapper, address: u16, value: u8) {
        for i in 0..5 {
            mapper.cpu_write(address, (value >> i) & 0x01);
        }
    }

    #[test]
    fn test_nrom_mirrors_16k() {
        let mut mapper = create(0, banked_prg(1), vec![0; CHR_BANK_SIZE], Mirroring::Vertical).unwrap();
        mapper.cpu_write(0x8000, 0x55);
        assert_eq!(mapper.cpu_read(0x8000), 0);
        assert_eq!(mapper.cpu_read(0xC000), 0);
        assert_eq!(mapper.mirroring(), Mirroring::Vertical);
        assert_eq!(mapper.name(), "NROM");
    }

    #[test]
    fn test_prg_ram() {
        let mut mapper = create(0, banked_prg(2), vec![], Mirroring::Horizontal).unwrap();
        mapper.cpu_write(0x6123, 0x42);
        assert_eq!(mapper.cpu_read(0x6123), 0x42);
        assert_eq!(mapper.cpu_read(0x5000), 0);
    }

    #[test]
    fn test_chr_rom_is_read_only() {
        let mut mapper = create(0, banked_prg(1), vec![0x11; CHR_BANK_SIZE], Mirroring::Horizontal).unwrap();
        mapper.ppu_write(0x0010, 0x99);
        assert_eq!(mapper.ppu_read(0x0010), 0x11);
    }

    #[test]
    fn test_chr_ram_when_no_chr_rom() {
        let mut mapper = create(2, banked_prg(4), vec![], Mirroring::Horizontal).unwrap();
        mapper.ppu_write(0x1FFF, 0x99);
        assert_eq!(mapper.ppu_read(0x1FFF), 0x99);
    }

    #[test]
    fn test_uxrom_switching() {
        let mut mapper = create(2, banked_prg(8), vec![], Mirroring::Vertical).unwrap();
        assert_eq!(mapper.cpu_read(0x8000), 0);
        assert_eq!(mapper.cpu_read(0xC000), 7);
        mapper.cpu_write(0x8000, 3);
        assert_eq!(mapper.cpu_read(0xBFFF), 3);
        assert_eq!(mapper.cpu_read(0xFFFF), 7);
    }

    #[test]
    fn test_cnrom_chr_switching() {
        let chr: Vec<u8> = (0..4).flat_map(|b| vec![b as u8; CHR_BANK_SIZE]).collect();
        let mut mapper = create(3, banked_prg(2), chr, Mirroring::Horizontal).unwrap();
        assert_eq!(mapper.ppu_read(0x0000), 0);
        mapper.cpu_write(0x8000, 2);
        assert_eq!(mapper.ppu_read(0x0000), 2);
        assert_eq!(mapper.ppu_read(0x1FFF), 2);
    }

    #[test]
    fn test_axrom_bank_and_mirroring() {
        let mut mapper = create(7, banked_prg(8), vec![], Mirroring::Horizontal).unwrap();
        assert_eq!(mapper.mirroring(), Mirroring::SingleLower);
        mapper.cpu_write(0x8000, 0x12);
        assert_eq!(mapper.mirroring(), Mirroring::SingleUpper);
        // 32 KiB bank 2 is 16 KiB banks 4 and 5
        assert_eq!(mapper.cpu_read(0x8000), 4);
        assert_eq!(mapper.cpu_read(0xC000), 5);
    }

    #[test]
    fn test_mmc1_power_on_fixes_last_bank() {
        let mut mapper = create(1, banked_prg(8), vec![], Mirroring::Horizontal).unwrap();
        assert_eq!(mapper.cpu_read(0x8000), 0);
        assert_eq!(mapper.cpu_read(0xC000), 7);
    }

    #[test]
    fn test_mmc1_serial_writes() {
        let mut mapper = create(1, banked_prg(8), vec![], Mirroring::Horizontal).unwrap();
        mmc1_write(mapper.as_mut(), 0xE000, 5);
        assert_eq!(mapper.cpu_read(0x8000), 5);
        assert_eq!(mapper.cpu_read(0xC000), 7);

        // Control: vertical mirroring, PRG mode 2
        mmc1_write(mapper.as_mut(), 0x8000, 0b01010);
        assert_eq!(mapper.mirroring(), Mirroring::Vertical);
        assert_eq!(mapper.cpu_read(0x8000), 0);
        assert_eq!(mapper.cpu_read(0xC000), 5);
    }

    #[test]
    fn test_mmc1_reset_bit() {
        let mut mapper = create(1, banked_prg(8), vec![], Mirroring::Horizontal).unwrap();
        mmc1_write(mapper.as_mut(), 0x8000, 0b00000);
        mapper.cpu_write(0xE000, 1);
        mapper.cpu_write(0xE000, 0x80);
        // Shift register was cleared, so five more writes are needed
        mmc1_write(mapper.as_mut(), 0xE000, 3);
        assert_eq!(mapper.cpu_read(0x8000), 3);
        assert_eq!(mapper.cpu_read(0xC000), 7);
    }

    #[test]
    fn test_mmc1_chr_4k_banks() {
        let chr: Vec<u8> = (0..8).flat_map(|b| vec![b as u8; 0x1000]).collect();
        let mut mapper = create(1, banked_prg(2), chr, Mirroring::Horizontal).unwrap();
        mmc1_write(mapper.as_mut(), 0x8000, 0b11100);
        mmc1_write(mapper.as_mut(), 0xA000, 3);
        mmc1_write(mapper.as_mut(), 0xC000, 6);
        assert_eq!(mapper.ppu_read(0x0000), 3);
        assert_eq!(mapper.ppu_read(0x1000), 6);
    }

    #[test]
    fn test_unsupported_mapper() {
        let err = create(4, banked_prg(2), vec![], Mirroring::Horizontal).unwrap_err();
        assert!(matches!(err, CartridgeError::UnsupportedMapper(4)));
    }
}
