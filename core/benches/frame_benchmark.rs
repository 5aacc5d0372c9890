use criterion::{criterion_group, criterion_main, Criterion};
use rustyboi_advance_core::emulator::Emulator;
use rustyboi_advance_core::EmulatorOptionsBuilder;

/// A small synthetic ROM: a counting loop, enough to exercise the fetch and
/// execute paths the way a busy-wait in a real game would.
fn bench_rom() -> Vec<u8> {
    let code: [u32; 4] = [
        0xE3A0_1000, // mov r1, #0
        0xE281_1001, // add r1, r1, #1
        0xE1A0_0001, // mov r0, r1
        0xEAFF_FFFD, // b -3 (back to the add)
    ];
    let mut rom = vec![0u8; 0x1000];
    for (i, word) in code.iter().enumerate() {
        rom[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    rom
}

fn emulator_benchmark(c: &mut Criterion) {
    let options = EmulatorOptionsBuilder::new().boot_bios(false).build();
    let mut emulator = Emulator::new(&bench_rom(), options).unwrap();

    c.bench_function("Emulate Cycle", |b| b.iter(|| emulator.emulate_cycle()));
    c.bench_function("Emulate Frame", |b| b.iter(|| emulator.run_frame()));
}

criterion_group!(benches, emulator_benchmark);

criterion_main!(benches);
