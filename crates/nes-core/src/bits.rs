//! Bit helpers
//!
//! Small get/set/clear/find operations on 8- and 16-bit hardware words.
//! Bit 0 is the least significant bit throughout.

/// Bit operations on fixed-width hardware words
pub trait Bits: Copy {
    /// Width of the word in bits
    const WIDTH: u32;

    /// Returns true if bit `n` is set
    fn bit(self, n: u32) -> bool;

    /// Returns the word with bit `n` set
    fn set_bit(self, n: u32) -> Self;

    /// Returns the word with bit `n` cleared
    fn clear_bit(self, n: u32) -> Self;

    /// Returns the word with bit `n` set or cleared according to `on`
    fn with_bit(self, n: u32, on: bool) -> Self {
        if on {
            self.set_bit(n)
        } else {
            self.clear_bit(n)
        }
    }

    /// Value (0 or 1) of the bit `n` positions from the most significant end
    fn bit_from_left(self, n: u32) -> u8 {
        self.bit(Self::WIDTH - 1 - n) as u8
    }

    /// Index of the lowest set bit, if any
    fn find_bit(self) -> Option<u32>;
}

macro_rules! impl_bits {
    ($($t:ty),*) => {$(
        impl Bits for $t {
            const WIDTH: u32 = <$t>::BITS;

            #[inline]
            fn bit(self, n: u32) -> bool {
                (self >> n) & 1 != 0
            }

            #[inline]
            fn set_bit(self, n: u32) -> Self {
                self | (1 << n)
            }

            #[inline]
            fn clear_bit(self, n: u32) -> Self {
                self & !(1 << n)
            }

            #[inline]
            fn find_bit(self) -> Option<u32> {
                if self == 0 {
                    None
                } else {
                    Some(self.trailing_zeros())
                }
            }
        }
    )*};
}

impl_bits!(u8, u16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_clear() {
        let value: u8 = 0b0000_0100;
        assert!(value.bit(2));
        assert!(!value.bit(3));
        assert_eq!(value.set_bit(7), 0b1000_0100);
        assert_eq!(value.clear_bit(2), 0);
        assert_eq!(0x8000u16.clear_bit(15), 0);
        assert_eq!(0u8.with_bit(0, true), 1);
        assert_eq!(0xFFu8.with_bit(0, false), 0xFE);
    }

    #[test]
    fn test_bit_from_left() {
        let plane: u8 = 0b1000_0001;
        assert_eq!(plane.bit_from_left(0), 1);
        assert_eq!(plane.bit_from_left(1), 0);
        assert_eq!(plane.bit_from_left(7), 1);
        assert_eq!(0x8000u16.bit_from_left(0), 1);
    }

    #[test]
    fn test_find_bit() {
        assert_eq!(0u8.find_bit(), None);
        assert_eq!(0b0010_1000u8.find_bit(), Some(3));
        assert_eq!(0x0400u16.find_bit(), Some(10));
    }
}
