//! PPU scroll/address register (`v` and `t`)
//!
//! ```text
//! yyy NN YYYYY XXXXX
//! ||| || ||||| +++++-- coarse X (0-31)
//! ||| || +++++-------- coarse Y (0-31)
//! ||| ++-------------- nametable select
//! +++----------------- fine Y (0-7)
//! ```

const COARSE_X: u16 = 0x001F;
const COARSE_Y: u16 = 0x03E0;
const NAMETABLE: u16 = 0x0C00;
const NAMETABLE_X: u16 = 0x0400;
const NAMETABLE_Y: u16 = 0x0800;
const FINE_Y: u16 = 0x7000;

/// Horizontal components: coarse X and nametable X
const HORIZONTAL: u16 = COARSE_X | NAMETABLE_X;
/// Vertical components: coarse Y, nametable Y and fine Y
const VERTICAL: u16 = COARSE_Y | NAMETABLE_Y | FINE_Y;

/// 15-bit VRAM address with structured scroll accessors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VramAddr(u16);

impl VramAddr {
    pub fn new(value: u16) -> Self {
        Self(value & 0x7FFF)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// 14-bit address presented on the video bus
    pub fn address(self) -> u16 {
        self.0 & 0x3FFF
    }

    pub fn coarse_x(self) -> u8 {
        (self.0 & COARSE_X) as u8
    }

    pub fn coarse_y(self) -> u8 {
        ((self.0 & COARSE_Y) >> 5) as u8
    }

    pub fn nametable(self) -> u8 {
        ((self.0 & NAMETABLE) >> 10) as u8
    }

    pub fn fine_y(self) -> u8 {
        ((self.0 & FINE_Y) >> 12) as u8
    }

    pub fn set_coarse_x(&mut self, value: u8) {
        self.0 = (self.0 & !COARSE_X) | (value as u16 & 0x1F);
    }

    pub fn set_coarse_y(&mut self, value: u8) {
        self.0 = (self.0 & !COARSE_Y) | ((value as u16 & 0x1F) << 5);
    }

    pub fn set_nametable(&mut self, value: u8) {
        self.0 = (self.0 & !NAMETABLE) | ((value as u16 & 0x03) << 10);
    }

    pub fn set_fine_y(&mut self, value: u8) {
        self.0 = (self.0 & !FINE_Y) | ((value as u16 & 0x07) << 12);
    }

    pub fn set_high(&mut self, value: u8) {
        self.0 = (self.0 & 0x00FF) | ((value as u16 & 0x3F) << 8);
    }

    pub fn set_low(&mut self, value: u8) {
        self.0 = (self.0 & 0xFF00) | value as u16;
    }

    /// PPUDATA auto-increment
    pub fn increment(&mut self, step: u16) {
        self.0 = self.0.wrapping_add(step) & 0x7FFF;
    }

    /// Move to the next tile column, wrapping into the neighboring horizontal nametable
    pub fn increment_coarse_x(&mut self) {
        if self.coarse_x() == 31 {
            self.0 &= !COARSE_X;
            self.0 ^= NAMETABLE_X;
        } else {
            self.0 += 1;
        }
    }

    /// Move down one pixel row.
    ///
    /// Coarse Y wraps at 29 into the neighboring vertical nametable. Rows 30
    /// and 31 hold attribute data; scrolling into them wraps at 31 without
    /// switching nametables.
    pub fn increment_fine_y(&mut self) {
        let fine_y = self.fine_y();
        if fine_y < 7 {
            self.set_fine_y(fine_y + 1);
            return;
        }

        self.set_fine_y(0);
        match self.coarse_y() {
            29 => {
                self.set_coarse_y(0);
                self.0 ^= NAMETABLE_Y;
            }
            31 => self.set_coarse_y(0),
            y => self.set_coarse_y(y + 1),
        }
    }

    /// Copy coarse X and nametable X from `t`
    pub fn copy_horizontal(&mut self, t: VramAddr) {
        self.0 = (self.0 & !HORIZONTAL) | (t.0 & HORIZONTAL);
    }

    /// Copy coarse Y, nametable Y and fine Y from `t`
    pub fn copy_vertical(&mut self, t: VramAddr) {
        self.0 = (self.0 & !VERTICAL) | (t.0 & VERTICAL);
    }

    /// Nametable byte for the tile under this address
    pub fn tile_address(self) -> u16 {
        0x2000 | (self.0 & 0x0FFF)
    }

    /// Attribute byte covering the tile under this address
    pub fn attribute_address(self) -> u16 {
        0x23C0 | (self.0 & NAMETABLE) | ((self.0 >> 4) & 0x38) | ((self.0 >> 2) & 0x07)
    }

    /// Bit shift selecting this tile's quadrant inside its attribute byte
    pub fn attribute_shift(self) -> u8 {
        let x = self.coarse_x() as u16;
        let y = self.coarse_y() as u16;
        (((y & 0x02) << 1) | (x & 0x02)) as u8
    }
}

impl From<u16> for VramAddr {
    fn from(value: u16) -> Self {
        Self::new(value)
    }
}

impl From<VramAddr> for u16 {
    fn from(addr: VramAddr) -> Self {
        addr.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_layout() {
        let mut addr = VramAddr::default();
        addr.set_coarse_x(0x1F);
        addr.set_coarse_y(0x1D);
        addr.set_nametable(2);
        addr.set_fine_y(5);
        assert_eq!(addr.get(), 0x5BBF);
        assert_eq!(addr.coarse_x(), 31);
        assert_eq!(addr.coarse_y(), 29);
        assert_eq!(addr.nametable(), 2);
        assert_eq!(addr.fine_y(), 5);
        assert_eq!(u16::from(VramAddr::from(0xFFFF)), 0x7FFF);
    }

    #[test]
    fn test_coarse_x_toggles_once_per_32_steps() {
        let mut addr = VramAddr::default();
        let mut toggles = 0;
        let mut last = addr.nametable();
        for _ in 0..64 {
            addr.increment_coarse_x();
            if addr.nametable() != last {
                toggles += 1;
                last = addr.nametable();
            }
        }
        assert_eq!(toggles, 2);
        assert_eq!(addr.coarse_x(), 0);
        assert_eq!(addr.nametable(), 0);
    }

    #[test]
    fn test_fine_y_wraps_at_29_with_toggle() {
        let mut addr = VramAddr::default();
        addr.set_coarse_y(29);
        addr.set_fine_y(7);
        addr.increment_fine_y();
        assert_eq!(addr.coarse_y(), 0);
        assert_eq!(addr.fine_y(), 0);
        assert_eq!(addr.nametable(), 2);
    }

    #[test]
    fn test_fine_y_wraps_at_31_without_toggle() {
        let mut addr = VramAddr::default();
        addr.set_coarse_y(31);
        addr.set_fine_y(7);
        addr.increment_fine_y();
        assert_eq!(addr.coarse_y(), 0);
        assert_eq!(addr.nametable(), 0);
    }

    #[test]
    fn test_fine_y_steps_within_tile() {
        let mut addr = VramAddr::default();
        addr.set_coarse_y(3);
        addr.increment_fine_y();
        assert_eq!(addr.fine_y(), 1);
        assert_eq!(addr.coarse_y(), 3);
    }

    #[test]
    fn test_copy_horizontal_and_vertical() {
        let t = VramAddr::new(0x7FFF);
        let mut v = VramAddr::default();
        v.copy_horizontal(t);
        assert_eq!(v.get(), 0x041F);
        v.copy_vertical(t);
        assert_eq!(v.get(), 0x7FFF);
    }

    #[test]
    fn test_attribute_address() {
        let mut addr = VramAddr::default();
        addr.set_coarse_x(6);
        addr.set_coarse_y(10);
        addr.set_nametable(1);
        assert_eq!(addr.attribute_address(), 0x27D1);
        assert_eq!(addr.attribute_shift(), 6);
    }
}
