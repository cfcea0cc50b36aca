//! CPU and frame throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use nes_core::bus::FlatMemory;
use nes_core::cartridge::{Cartridge, Mirroring};
use nes_core::cpu::{Cpu, RESET_VECTOR};
use nes_core::system::NesSystem;

/// Count X down from 255 in a loop: LDX #$FF; DEX; BNE -3; JMP $8000
const LOOP: [u8; 7] = [0xA2, 0xFF, 0xCA, 0xD0, 0xFD, 0x4C, 0x00];

fn bench_cpu_step(c: &mut Criterion) {
    let mut mem = FlatMemory::new();
    mem.load(0x8000, &LOOP);
    mem.load(0x8007, &[0x80]);
    mem.load(RESET_VECTOR, &[0x00, 0x80]);
    let mut cpu = Cpu::new();
    cpu.reset(&mut mem);

    c.bench_function("cpu_step_1000", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                let _ = black_box(cpu.step(&mut mem));
            }
            cpu.reset_cycles();
        })
    });
}

fn bench_frame(c: &mut Criterion) {
    let mut prg = vec![0xEA; 0x4000];
    prg[..LOOP.len()].copy_from_slice(&LOOP);
    prg[LOOP.len()] = 0x80;
    prg[0x3FFC] = 0x00;
    prg[0x3FFD] = 0x80;
    let cartridge = match Cartridge::from_parts(0, prg, vec![], Mirroring::Horizontal) {
        Ok(cartridge) => cartridge,
        Err(e) => panic!("bench cartridge: {}", e),
    };
    let mut system = NesSystem::new(cartridge);
    // Background and sprites on
    system.write_memory(0x2001, 0x1E);

    c.bench_function("run_frame", |b| {
        b.iter(|| black_box(system.run_frame()))
    });
}

criterion_group!(benches, bench_cpu_step, bench_frame);
criterion_main!(benches);
