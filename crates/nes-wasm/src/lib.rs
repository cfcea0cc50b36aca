//! NES WASM - WASM wrapper for NES emulator
//!
//! The page owns the animation loop: call `run_frame` once per
//! `requestAnimationFrame` and copy `frame_rgba` into an `ImageData`.

use js_sys::Uint8ClampedArray;
use wasm_bindgen::prelude::wasm_bindgen;
use wasm_bindgen::JsError;

use nes_core::cartridge::Cartridge;
use nes_core::controller::Button;
use nes_core::palette;
use nes_core::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use nes_core::system::NesSystem;

/// Expand 0x00RRGGBB pixels into opaque RGBA bytes
fn expand_rgba(frame: &[u32], out: &mut Vec<u8>) {
    out.clear();
    for &color in frame {
        out.extend_from_slice(&palette::channels(color));
        out.push(0xFF);
    }
}

/// Button by its controller bit index (A = 0 ... Right = 7)
fn button_at(index: u8) -> Option<Button> {
    Button::ALL.get(index as usize).copied()
}

/// NES Emulator wrapper for WASM
#[wasm_bindgen]
pub struct NesEmulator {
    system: Option<NesSystem>,
    rgba: Vec<u8>,
}

impl Default for NesEmulator {
    fn default() -> Self {
        Self::new()
    }
}

#[wasm_bindgen]
impl NesEmulator {
    /// Create an emulator with no cartridge inserted
    #[wasm_bindgen(constructor)]
    pub fn new() -> NesEmulator {
        Self {
            system: None,
            rgba: Vec::with_capacity(SCREEN_WIDTH * SCREEN_HEIGHT * 4),
        }
    }

    /// Load an iNES image and power on
    pub fn load_rom(&mut self, rom_data: &[u8]) -> Result<(), JsError> {
        let cartridge = Cartridge::from_ines(rom_data).map_err(|e| JsError::new(&e.to_string()))?;
        self.system = Some(NesSystem::new(cartridge));
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.system.is_some()
    }

    /// Reset the emulator
    pub fn reset(&mut self) {
        if let Some(system) = self.system.as_mut() {
            system.reset();
        }
    }

    /// Run one video frame
    pub fn run_frame(&mut self) -> Result<(), JsError> {
        match self.system.as_mut() {
            Some(system) => system.run_frame().map_err(|e| JsError::new(&e.to_string())),
            None => Err(JsError::new("no ROM loaded")),
        }
    }

    /// Press or release a player 1 button by bit index
    pub fn set_button(&mut self, index: u8, pressed: bool) {
        if let (Some(system), Some(button)) = (self.system.as_mut(), button_at(index)) {
            system.set_button(0, button, pressed);
        }
    }

    /// Get the current frame count
    pub fn frame_count(&self) -> u32 {
        self.system.as_ref().map_or(0, |s| s.frame_count() as u32)
    }

    /// Visible frame as RGBA bytes (256 * 240 * 4)
    pub fn frame_rgba(&mut self) -> Uint8ClampedArray {
        match self.system.as_ref() {
            Some(system) => expand_rgba(system.frame_buffer(), &mut self.rgba),
            None => {
                self.rgba.clear();
                self.rgba.resize(SCREEN_WIDTH * SCREEN_HEIGHT * 4, 0);
            }
        }
        Uint8ClampedArray::from(self.rgba.as_slice())
    }

    pub fn width(&self) -> u32 {
        SCREEN_WIDTH as u32
    }

    pub fn height(&self) -> u32 {
        SCREEN_HEIGHT as u32
    }
}

#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
