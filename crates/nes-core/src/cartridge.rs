//! Cartridge loading
//!
//! Parses iNES images and builds the board behind them. Everything is
//! validated before a [`Cartridge`] exists, so the bus never sees a partial
//! image.

use std::fmt;
use std::io;
use std::path::Path;

use tracing::info;

use crate::mapper::{self, Mapper};

/// iNES header size
pub const HEADER_SIZE: usize = 16;
/// Trainer size, when present
pub const TRAINER_SIZE: usize = 512;

const MAGIC: [u8; 4] = *b"NES\x1A";

/// Nametable arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    /// $2000 = $2400, $2800 = $2C00
    Horizontal,
    /// $2000 = $2800, $2400 = $2C00
    Vertical,
    /// All four tables show the first page
    SingleLower,
    /// All four tables show the second page
    SingleUpper,
    /// Four distinct tables
    FourScreen,
}

impl Mirroring {
    /// Physical 1 KiB page behind each logical nametable
    pub fn pages(self) -> [usize; 4] {
        match self {
            Mirroring::Horizontal => [0, 0, 1, 1],
            Mirroring::Vertical => [0, 1, 0, 1],
            Mirroring::SingleLower => [0, 0, 0, 0],
            Mirroring::SingleUpper => [1, 1, 1, 1],
            Mirroring::FourScreen => [0, 1, 2, 3],
        }
    }
}

/// iNES header structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InesHeader {
    /// PRG ROM size in 16KB units
    pub prg_rom_banks: u8,
    /// CHR ROM size in 8KB units (0 means the board has CHR RAM)
    pub chr_rom_banks: u8,
    pub mapper: u8,
    pub mirroring: Mirroring,
    /// Battery-backed PRG RAM
    pub battery: bool,
    pub trainer: bool,
    pub nes2: bool,
}

impl InesHeader {
    /// Parse an iNES header from bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, CartridgeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CartridgeError::InvalidHeader("shorter than 16 bytes"));
        }
        if bytes[0..4] != MAGIC {
            return Err(CartridgeError::InvalidHeader("missing NES<EOF> magic"));
        }

        let flags6 = bytes[6];
        let nes2 = bytes[7] & 0x0C == 0x08;
        // Old dumpers wrote signatures into bytes 7-15; only trust byte 7 and 9 on clean headers
        let clean = nes2 || bytes[12..16].iter().all(|&b| b == 0);
        let (flags7, flags9) = if clean { (bytes[7], bytes[9]) } else { (0, 0) };

        if flags9 & 0x01 != 0 && !nes2 {
            return Err(CartridgeError::PalUnsupported);
        }
        if nes2 && bytes[12] & 0x03 == 0x01 {
            return Err(CartridgeError::PalUnsupported);
        }

        let mirroring = if flags6 & 0x08 != 0 {
            Mirroring::FourScreen
        } else if flags6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };

        Ok(Self {
            prg_rom_banks: bytes[4],
            chr_rom_banks: bytes[5],
            mapper: (flags6 >> 4) | (flags7 & 0xF0),
            mirroring,
            battery: flags6 & 0x02 != 0,
            trainer: flags6 & 0x04 != 0,
            nes2,
        })
    }

    pub fn prg_rom_size(&self) -> usize {
        self.prg_rom_banks as usize * mapper::PRG_BANK_SIZE
    }

    pub fn chr_rom_size(&self) -> usize {
        self.chr_rom_banks as usize * mapper::CHR_BANK_SIZE
    }

    /// Total image size this header describes
    pub fn image_size(&self) -> usize {
        let trainer = if self.trainer { TRAINER_SIZE } else { 0 };
        HEADER_SIZE + trainer + self.prg_rom_size() + self.chr_rom_size()
    }
}

/// A validated cartridge: header plus the board that serves its ROM
#[derive(Debug)]
pub struct Cartridge {
    header: InesHeader,
    mapper: Box<dyn Mapper>,
}

impl Cartridge {
    /// Parse an iNES image
    pub fn from_ines(data: &[u8]) -> Result<Self, CartridgeError> {
        let header = InesHeader::parse(data)?;
        if header.prg_rom_banks == 0 {
            return Err(CartridgeError::InvalidHeader("no PRG ROM"));
        }

        let expected = header.image_size();
        if data.len() < expected {
            return Err(CartridgeError::Truncated {
                expected,
                actual: data.len(),
            });
        }

        let mut offset = HEADER_SIZE;
        if header.trainer {
            offset += TRAINER_SIZE;
        }
        let prg = data[offset..offset + header.prg_rom_size()].to_vec();
        offset += header.prg_rom_size();
        let chr = data[offset..offset + header.chr_rom_size()].to_vec();

        let mapper = mapper::create(header.mapper, prg, chr, header.mirroring)?;
        info!(
            mapper = mapper.name(),
            prg_kib = header.prg_rom_size() / 1024,
            chr_kib = header.chr_rom_size() / 1024,
            mirroring = ?header.mirroring,
            "cartridge loaded"
        );
        Ok(Self { header, mapper })
    }

    /// Read and parse an iNES file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CartridgeError> {
        let data = std::fs::read(path)?;
        Self::from_ines(&data)
    }

    /// Build a cartridge from raw ROM data, bypassing the file format
    pub fn from_parts(
        mapper_number: u8,
        prg: Vec<u8>,
        chr: Vec<u8>,
        mirroring: Mirroring,
    ) -> Result<Self, CartridgeError> {
        let header = InesHeader {
            prg_rom_banks: (prg.len() / mapper::PRG_BANK_SIZE) as u8,
            chr_rom_banks: (chr.len() / mapper::CHR_BANK_SIZE) as u8,
            mapper: mapper_number,
            mirroring,
            battery: false,
            trainer: false,
            nes2: false,
        };
        let mapper = mapper::create(mapper_number, prg, chr, mirroring)?;
        Ok(Self { header, mapper })
    }

    /// Get the iNES header
    pub fn header(&self) -> &InesHeader {
        &self.header
    }

    pub fn mapper_name(&self) -> &'static str {
        self.mapper.name()
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mapper.mirroring()
    }

    pub fn cpu_read(&mut self, address: u16) -> u8 {
        self.mapper.cpu_read(address)
    }

    pub fn cpu_write(&mut self, address: u16, value: u8) {
        self.mapper.cpu_write(address, value);
    }

    pub fn ppu_read(&mut self, address: u16) -> u8 {
        self.mapper.ppu_read(address)
    }

    pub fn ppu_write(&mut self, address: u16, value: u8) {
        self.mapper.ppu_write(address, value);
    }
}

/// Cartridge error types
#[derive(Debug)]
pub enum CartridgeError {
    InvalidHeader(&'static str),
    Truncated { expected: usize, actual: usize },
    UnsupportedMapper(u8),
    PalUnsupported,
    Io(io::Error),
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CartridgeError::InvalidHeader(msg) => write!(f, "Invalid iNES header: {}", msg),
            CartridgeError::Truncated { expected, actual } => write!(
                f,
                "Truncated ROM image: expected {} bytes, found {}",
                expected, actual
            ),
            CartridgeError::UnsupportedMapper(n) => write!(f, "Unsupported mapper {}", n),
            CartridgeError::PalUnsupported => write!(f, "PAL images are not supported"),
            CartridgeError::Io(err) => write!(f, "Failed to read ROM: {}", err),
        }
    }
}

impl std::error::Error for CartridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CartridgeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CartridgeError {
    fn from(err: io::Error) -> Self {
        CartridgeError::Io(err)
    }
}
