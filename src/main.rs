//! NES Emulator - Desktop Application using egui
//!
//! Keys: X = A, Z = B, either Shift = Select, Enter = Start, arrows = D-pad.

use std::path::Path;
use std::time::Instant;

use eframe::egui;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nes_core::cartridge::Cartridge;
use nes_core::controller::Button;
use nes_core::palette;
use nes_core::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use nes_core::system::NesSystem;

const SCALE: f32 = 3.0;

const KEY_MAP: [(egui::Key, Button); 7] = [
    (egui::Key::X, Button::A),
    (egui::Key::Z, Button::B),
    (egui::Key::Enter, Button::Start),
    (egui::Key::ArrowUp, Button::Up),
    (egui::Key::ArrowDown, Button::Down),
    (egui::Key::ArrowLeft, Button::Left),
    (egui::Key::ArrowRight, Button::Right),
];

/// Player 1 button states, Select on either Shift key
fn button_states(input: &egui::InputState) -> impl Iterator<Item = (Button, bool)> + '_ {
    KEY_MAP
        .into_iter()
        .map(|(key, button)| (button, input.key_down(key)))
        .chain(std::iter::once((Button::Select, input.modifiers.shift)))
}

/// App state for the egui application
struct NesApp {
    system: Option<NesSystem>,
    texture: Option<egui::TextureHandle>,
    rgba: Vec<u8>,
    status: String,
    last_frame_time: Instant,
    fps: f64,
}

impl NesApp {
    fn new() -> Self {
        Self {
            system: None,
            texture: None,
            rgba: Vec::with_capacity(SCREEN_WIDTH * SCREEN_HEIGHT * 4),
            status: "No ROM loaded. Please select a .nes file.".to_string(),
            last_frame_time: Instant::now(),
            fps: 0.0,
        }
    }

    fn load_rom(&mut self, path: &Path) {
        match Cartridge::load(path) {
            Ok(cartridge) => {
                info!(path = %path.display(), mapper = cartridge.mapper_name(), "ROM loaded");
                self.system = Some(NesSystem::new(cartridge));
                self.status.clear();
            }
            Err(e) => {
                error!("failed to load ROM: {}", e);
                self.status = format!("Failed to load ROM: {}", e);
            }
        }
    }

    fn handle_input(&mut self, ctx: &egui::Context) {
        let Some(system) = self.system.as_mut() else {
            return;
        };
        ctx.input(|i| {
            for (button, pressed) in button_states(i) {
                system.set_button(0, button, pressed);
            }
        });
    }

    fn run_frame(&mut self) {
        let Some(system) = self.system.as_mut() else {
            return;
        };
        if let Err(e) = system.run_frame() {
            error!("{}", e);
            self.status = e.to_string();
            self.system = None;
            return;
        }

        self.rgba.clear();
        for &color in system.frame_buffer() {
            self.rgba.extend_from_slice(&palette::channels(color));
            self.rgba.push(0xFF);
        }
    }
}

impl eframe::App for NesApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_input(ctx);

        // Calculate FPS
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f64();
        self.fps = 1.0 / dt.max(0.001);
        self.last_frame_time = now;

        self.run_frame();

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                if ui.button("Open ROM").clicked() {
                    if let Some(path) = rfd::FileDialog::new().add_filter("iNES", &["nes"]).pick_file() {
                        self.load_rom(&path);
                    }
                }
                if ui.button("Reset").clicked() {
                    if let Some(system) = self.system.as_mut() {
                        system.reset();
                    }
                }

                ui.label(format!("FPS: {:.1}", self.fps));
                if let Some(system) = &self.system {
                    ui.label(format!("Frames: {}", system.frame_count()));
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.system.is_none() {
                ui.label(&self.status);
                return;
            }

            let image = egui::ColorImage::from_rgba_unmultiplied([SCREEN_WIDTH, SCREEN_HEIGHT], &self.rgba);
            match &mut self.texture {
                Some(texture) => texture.set(image, egui::TextureOptions::NEAREST),
                None => {
                    self.texture = Some(ctx.load_texture("nes_frame", image, egui::TextureOptions::NEAREST));
                }
            }
            if let Some(texture) = &self.texture {
                let size = egui::vec2(SCREEN_WIDTH as f32 * SCALE, SCREEN_HEIGHT as f32 * SCALE);
                ui.add(egui::Image::from_texture(texture).fit_to_exact_size(size));
            }
        });

        ctx.request_repaint();
    }
}

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let viewport = egui::ViewportBuilder::default().with_inner_size(egui::Vec2::new(
        SCREEN_WIDTH as f32 * SCALE + 16.0,
        SCREEN_HEIGHT as f32 * SCALE + 48.0,
    ));

    let native_options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };

    // Optional ROM path as the first argument
    let rom_path = std::env::args_os().nth(1);

    eframe::run_native(
        "NES Emulator",
        native_options,
        Box::new(move |_| {
            let mut app = NesApp::new();
            if let Some(path) = rom_path {
                app.load_rom(Path::new(&path));
            }
            Ok(Box::new(app))
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_is_select() {
        let mut input = egui::InputState::default();
        input.modifiers.shift = true;
        input.keys_down.insert(egui::Key::X);
        let states: Vec<_> = button_states(&input).collect();
        assert!(states.contains(&(Button::Select, true)));
        assert!(states.contains(&(Button::A, true)));
        assert_eq!(states.iter().filter(|(_, pressed)| *pressed).count(), 2);
    }
}
