//! NES Desktop - Desktop NES emulator with minifb rendering
//!
//! Keys: X = A, Z = B, either Shift = Select, Enter = Start, arrows = D-pad,
//! Escape quits.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use minifb::{Key, Scale, Window, WindowOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nes_core::cartridge::Cartridge;
use nes_core::controller::Button;
use nes_core::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use nes_core::system::NesSystem;

const KEY_MAP: [(Key, Button); 7] = [
    (Key::X, Button::A),
    (Key::Z, Button::B),
    (Key::Enter, Button::Start),
    (Key::Up, Button::Up),
    (Key::Down, Button::Down),
    (Key::Left, Button::Left),
    (Key::Right, Button::Right),
];

/// NES Emulator Desktop App
#[derive(Parser, Debug)]
#[command(name = "nes-desktop")]
#[command(about = "A NES emulator desktop app", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Screen scale factor (1, 2, 4 or 8)
    #[arg(short, long, default_value = "2", value_parser = parse_scale)]
    scale: u8,
}

/// Scale factors minifb can open a window with
fn window_scale(scale: u8) -> Option<Scale> {
    match scale {
        1 => Some(Scale::X1),
        2 => Some(Scale::X2),
        4 => Some(Scale::X4),
        8 => Some(Scale::X8),
        _ => None,
    }
}

fn parse_scale(arg: &str) -> Result<u8, String> {
    let scale: u8 = arg.parse().map_err(|e| format!("{}: {}", arg, e))?;
    match window_scale(scale) {
        Some(_) => Ok(scale),
        None => Err(format!("{} is not one of 1, 2, 4, 8", scale)),
    }
}

/// Player 1 button states, Select on either Shift key
fn button_states(is_down: impl Fn(Key) -> bool) -> impl Iterator<Item = (Button, bool)> {
    let select = is_down(Key::LeftShift) || is_down(Key::RightShift);
    KEY_MAP
        .into_iter()
        .map(move |(key, button)| (button, is_down(key)))
        .chain(std::iter::once((Button::Select, select)))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let cartridge = match Cartridge::load(&args.rom) {
        Ok(cart) => cart,
        Err(e) => {
            eprintln!("Failed to load cartridge: {}", e);
            process::exit(1);
        }
    };
    let mut system = NesSystem::new(cartridge);
    let Some(scale) = window_scale(args.scale) else {
        eprintln!("Unsupported scale: {}", args.scale);
        process::exit(1);
    };

    let mut window = match Window::new(
        "NES Emulator",
        SCREEN_WIDTH,
        SCREEN_HEIGHT,
        WindowOptions {
            resize: false,
            scale,
            ..WindowOptions::default()
        },
    ) {
        Ok(window) => window,
        Err(e) => {
            eprintln!("Failed to create window: {}", e);
            process::exit(1);
        }
    };
    window.set_target_fps(60);

    info!(rom = %args.rom.display(), "starting emulation");

    while window.is_open() && !window.is_key_down(Key::Escape) {
        for (button, pressed) in button_states(|key| window.is_key_down(key)) {
            system.set_button(0, button, pressed);
        }

        if let Err(e) = system.run_frame() {
            error!("{}", e);
            break;
        }

        // Frame buffer is already 0x00RRGGBB, which minifb expects
        if let Err(e) = window.update_with_buffer(system.frame_buffer(), SCREEN_WIDTH, SCREEN_HEIGHT) {
            error!("failed to update window: {}", e);
            break;
        }
    }

    info!(frames = system.frame_count(), "emulator closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_rejects_unsupported_factors() {
        assert_eq!(parse_scale("1"), Ok(1));
        assert_eq!(parse_scale("8"), Ok(8));
        for bad in ["0", "3", "5", "6", "7", "9", "x"] {
            assert!(parse_scale(bad).is_err(), "{} accepted", bad);
        }
        assert!(matches!(window_scale(4), Some(Scale::X4)));
        assert!(window_scale(3).is_none());
    }

    #[test]
    fn test_either_shift_is_select() {
        for shift in [Key::LeftShift, Key::RightShift] {
            let states: Vec<_> = button_states(|key| key == shift).collect();
            assert!(states.contains(&(Button::Select, true)));
            assert_eq!(states.iter().filter(|(_, pressed)| *pressed).count(), 1);
        }
        let states: Vec<_> = button_states(|key| key == Key::X).collect();
        assert!(states.contains(&(Button::A, true)));
        assert!(states.contains(&(Button::Select, false)));
    }
}
