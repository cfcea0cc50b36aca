//! Standard joypad
//!
//! A strobe write of 1 then 0 to $4016 copies the live button state into an
//! 8-bit shift register. Each read returns the next button in bit 0, in the
//! order of [`Button`].

use crate::bits::Bits;

/// Joypad buttons, in shift order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    A = 0,
    B = 1,
    Select = 2,
    Start = 3,
    Up = 4,
    Down = 5,
    Left = 6,
    Right = 7,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
    ];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Controller {
    /// Live button state, bit n = `Button` n
    buttons: u8,
    /// Snapshot taken on the strobe's falling edge
    latched: u8,
    strobe: bool,
    /// Reads since the last latch (0-7)
    index: u8,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.buttons = self.buttons.with_bit(button as u32, pressed);
    }

    pub fn buttons(&self) -> u8 {
        self.buttons
    }

    /// $4016 write
    pub fn write_strobe(&mut self, value: u8) {
        let strobe = value.bit(0);
        if self.strobe && !strobe {
            self.latched = self.buttons;
            self.index = 0;
        }
        self.strobe = strobe;
    }

    /// Next button bit (0 or 1)
    pub fn read(&mut self) -> u8 {
        if self.strobe {
            return self.buttons.bit(0) as u8;
        }
        let bit = self.latched.bit(self.index as u32) as u8;
        self.index = (self.index + 1) % 8;
        bit
    }

    /// Clear the latch and the read counter. Held buttons stay held.
    pub fn reset(&mut self) {
        self.latched = 0;
        self.strobe = false;
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latch(pad: &mut Controller) {
        pad.write_strobe(1);
        pad.write_strobe(0);
    }

    #[test]
    fn test_read_order() {
        let mut pad = Controller::new();
        pad.set_button(Button::A, true);
        pad.set_button(Button::Start, true);
        pad.set_button(Button::Right, true);
        latch(&mut pad);
        let bits: Vec<u8> = (0..8).map(|_| pad.read()).collect();
        assert_eq!(bits, vec![1, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_counter_wraps_after_eight() {
        let mut pad = Controller::new();
        pad.set_button(Button::A, true);
        latch(&mut pad);
        for _ in 0..8 {
            pad.read();
        }
        assert_eq!(pad.read(), 1);
    }

    #[test]
    fn test_strobe_high_returns_a() {
        let mut pad = Controller::new();
        pad.write_strobe(1);
        assert_eq!(pad.read(), 0);
        pad.set_button(Button::A, true);
        assert_eq!(pad.read(), 1);
        assert_eq!(pad.read(), 1);
    }

    #[test]
    fn test_latch_is_a_snapshot() {
        let mut pad = Controller::new();
        pad.set_button(Button::B, true);
        latch(&mut pad);
        pad.set_button(Button::B, false);
        assert_eq!(pad.read(), 0);
        assert_eq!(pad.read(), 1);
    }

    #[test]
    fn test_write_zero_alone_does_not_latch() {
        let mut pad = Controller::new();
        pad.set_button(Button::A, true);
        pad.write_strobe(0);
        assert_eq!(pad.read(), 0);
    }

    #[test]
    fn test_reset_keeps_buttons() {
        let mut pad = Controller::new();
        pad.set_button(Button::Up, true);
        latch(&mut pad);
        pad.read();
        pad.reset();
        assert_eq!(pad.read(), 0);
        assert_eq!(pad.buttons(), 0x10);
    }
}
