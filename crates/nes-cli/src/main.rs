//! NES CLI - Command line interface for NES emulator

mod monitor;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use nes_core::cartridge::Cartridge;
use nes_core::conformance::{self, FileReport};
use nes_core::system::{HaltPolicy, NesSystem};

use crate::monitor::Machine;

/// Mismatches printed per failing file
const SHOWN_FAILURES: usize = 3;

/// NES Emulator CLI
#[derive(Parser, Debug)]
#[command(name = "nes-cli")]
#[command(about = "A NES emulator CLI", long_about = None)]
struct Args {
    /// Log filter, e.g. `info` or `nes_core=trace` (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a ROM headless for a number of frames
    Run {
        /// Path to the iNES ROM file
        #[arg(short, long)]
        rom: PathBuf,

        /// Number of frames to run
        #[arg(short, long, default_value = "60")]
        frames: u64,

        /// Dump CPU state after execution
        #[arg(short = 'c', long)]
        dump_cpu: bool,

        /// Dump PPU state after execution
        #[arg(short = 'p', long)]
        dump_ppu: bool,

        /// Stop at the first illegal opcode instead of skipping it
        #[arg(long)]
        halt_on_illegal: bool,
    },
    /// Run single-step JSON test vectors from a file or a directory
    Json {
        path: PathBuf,

        /// Stop after the first file with a failing case
        #[arg(long)]
        stop_on_fail: bool,
    },
    /// Interactive memory/CPU monitor
    Monitor {
        /// Monitor a loaded console instead of bare RAM
        #[arg(short, long)]
        rom: Option<PathBuf>,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    let result = match args.command {
        Command::Run {
            rom,
            frames,
            dump_cpu,
            dump_ppu,
            halt_on_illegal,
        } => run(&rom, frames, dump_cpu, dump_ppu, halt_on_illegal),
        Command::Json { path, stop_on_fail } => json(&path, stop_on_fail),
        Command::Monitor { rom } => monitor(rom.as_deref()),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<bool, Box<dyn std::error::Error>>;

fn run(rom: &Path, frames: u64, dump_cpu: bool, dump_ppu: bool, halt_on_illegal: bool) -> CliResult {
    let cartridge = Cartridge::load(rom)?;
    let header = cartridge.header().clone();

    println!("Loaded cartridge:");
    println!("  PRG ROM: {} bytes", header.prg_rom_size());
    println!("  CHR ROM: {} bytes", header.chr_rom_size());
    println!("  Mapper: {} ({})", header.mapper, cartridge.mapper_name());
    println!("  Mirroring: {:?}", header.mirroring);

    let policy = if halt_on_illegal {
        HaltPolicy::Halt
    } else {
        HaltPolicy::Skip
    };
    let mut system = NesSystem::new(cartridge).with_halt_policy(policy);

    println!("\nRunning {} frames...", frames);
    let outcome = system.run_frames(frames);
    println!("Completed {} frames.", system.frame_count());

    // Dump state if requested
    if dump_cpu {
        dump_cpu_state(&system);
    }

    if dump_ppu {
        dump_ppu_state(&system);
    }

    outcome?;
    Ok(true)
}

fn dump_cpu_state(system: &NesSystem) {
    let cpu = system.cpu();
    let regs = cpu.registers();
    let status = cpu.status();

    println!("\nCPU State:");
    println!("  A:    ${:02X}", regs.a);
    println!("  X:    ${:02X}", regs.x);
    println!("  Y:    ${:02X}", regs.y);
    println!("  PC:   ${:04X}", regs.pc);
    println!("  SP:   ${:02X}", regs.sp);
    println!("  P:    ${:02X} ({})", status.bits(), status);
    println!("  Cycles: {}", system.total_cycles());
}

fn dump_ppu_state(system: &NesSystem) {
    let ppu = system.ppu();

    println!("\nPPU State:");
    println!("  Scanline: {}", ppu.scanline());
    println!("  Frame: {}", ppu.frame());
    println!("  CTRL: ${:02X}  MASK: ${:02X}  STATUS: ${:02X}", ppu.ctrl().bits(), ppu.mask().bits(), ppu.status().bits());
    println!("  VBLANK: {}", ppu.status().vblank());
    println!("  v: ${:04X}  t: ${:04X}  fine X: {}", ppu.vram_addr().get(), ppu.temp_addr().get(), ppu.fine_x());
}

fn print_report(report: &FileReport) {
    let name = report
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    println!("{:<12} {:>6}/{:<6}", name, report.passed, report.total);
    for failure in report.failures.iter().take(SHOWN_FAILURES) {
        println!("  {}", failure.name);
        for mismatch in &failure.mismatches {
            println!("    {}", mismatch);
        }
    }
}

fn json(path: &Path, stop_on_fail: bool) -> CliResult {
    let reports = if path.is_dir() {
        conformance::run_dir(path)?
    } else {
        vec![conformance::run_file(path)?]
    };

    let mut all_passed = true;
    let (mut passed, mut total) = (0, 0);
    for report in &reports {
        print_report(report);
        passed += report.passed;
        total += report.total;
        if !report.all_passed() {
            all_passed = false;
            if stop_on_fail {
                break;
            }
        }
    }
    info!(passed, total, files = reports.len(), "conformance run finished");
    println!("\n{} of {} cases passed", passed, total);
    Ok(all_passed)
}

fn monitor(rom: Option<&Path>) -> CliResult {
    let mut machine = match rom {
        Some(path) => Machine::Nes(Box::new(NesSystem::new(Cartridge::load(path)?))),
        None => Machine::flat(),
    };
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    monitor::run(&mut machine, stdin.lock(), &mut stdout)?;
    Ok(true)
}
