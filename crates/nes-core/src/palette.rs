//! NES master palette
//!
//! 64 colors as 0x00RRGGBB. Columns $E and $F are black in every row.

/// Master palette indexed by the 6-bit value stored in palette RAM
pub const NES_PALETTE: [u32; 64] = [
    0x7C7C7C, 0x0000FC, 0x0000BC, 0x4428BC, 0x940084, 0xA80020, 0xA81000, 0x881400,
    0x503000, 0x007800, 0x006800, 0x005800, 0x004058, 0x000000, 0x000000, 0x000000,
    0xBCBCBC, 0x0078F8, 0x0058F8, 0x6844FC, 0xD800CC, 0xE40058, 0xF83800, 0xE45C10,
    0xAC7C00, 0x00B800, 0x00A800, 0x00A844, 0x008888, 0x000000, 0x000000, 0x000000,
    0xF8F8F8, 0x3CBCFC, 0x6888FC, 0x9878F8, 0xF878F8, 0xF85898, 0xF87858, 0xFCA044,
    0xF8B800, 0xB8F818, 0x58D854, 0x58F898, 0x00E8D8, 0x787878, 0x000000, 0x000000,
    0xFCFCFC, 0xA4E4FC, 0xB8B8F8, 0xD8B8F8, 0xF8B8F8, 0xF8A4C0, 0xF0D0B0, 0xFCE0A8,
    0xF8D878, 0xD8F878, 0xB8F8B8, 0xB8F8D8, 0x00FCFC, 0xF8D8F8, 0x000000, 0x000000,
];

/// Look up a palette RAM value, ignoring the two unused high bits
#[inline]
pub fn rgb(index: u8) -> u32 {
    NES_PALETTE[(index & 0x3F) as usize]
}

/// Split a 0x00RRGGBB color into its channels
#[inline]
pub fn channels(color: u32) -> [u8; 3] {
    [(color >> 16) as u8, (color >> 8) as u8, color as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_masks_high_bits() {
        assert_eq!(rgb(0x00), 0x7C7C7C);
        assert_eq!(rgb(0x40), 0x7C7C7C);
        assert_eq!(rgb(0x30), 0xFCFCFC);
    }

    #[test]
    fn test_channels() {
        assert_eq!(channels(0xF83800), [0xF8, 0x38, 0x00]);
    }
}
