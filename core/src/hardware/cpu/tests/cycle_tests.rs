use super::*;
use crate::hardware::cpu::Cpu;
use crate::hardware::mmu::Memory;

/// Write the opcodes to IWRAM and jump there without executing anything yet.
fn prepare_arm(cpu: &mut Cpu, bus: &mut Memory, opcodes: &[u32]) {
    for (i, &opcode) in opcodes.iter().enumerate() {
        bus.write_word(CODE_BASE + i as u32 * 4, opcode);
    }
    cpu.branch_to(bus, CODE_BASE);
}

fn step_cycles(cpu: &mut Cpu, bus: &mut Memory) -> u64 {
    let before = bus.scheduler.current_time;
    cpu.step_instruction(bus);
    bus.scheduler.current_time - before
}

#[test]
fn test_data_processing_is_single_cycle_in_iwram() {
    let (mut cpu, mut bus) = test_setup();
    prepare_arm(&mut cpu, &mut bus, &[0xE1A0_0000]); // mov r0, r0
    assert_eq!(step_cycles(&mut cpu, &mut bus), 1);
}

#[test]
fn test_register_shift_adds_internal_cycle() {
    let (mut cpu, mut bus) = test_setup();
    // mov r2, r0, lsl r1
    prepare_arm(&mut cpu, &mut bus, &[0xE1A0_2110]);
    assert_eq!(step_cycles(&mut cpu, &mut bus), 2);
}

#[test]
fn test_multiply_booth_cycles() {
    let (mut cpu, mut bus) = test_setup();

    // One significant byte in the multiplier: 1 internal cycle.
    cpu.registers.write(0, 5);
    cpu.registers.write(1, 0xFF);
    prepare_arm(&mut cpu, &mut bus, &[0xE003_0190]); // mul r3, r0, r1
    assert_eq!(step_cycles(&mut cpu, &mut bus), 2);

    // Four significant bytes: 4 internal cycles (positive, so no early
    // sign-extension termination).
    cpu.registers.write(1, 0x7FFF_FFFF);
    prepare_arm(&mut cpu, &mut bus, &[0xE003_0190]);
    assert_eq!(step_cycles(&mut cpu, &mut bus), 5);
}

#[test]
fn test_load_pays_memory_and_internal_cycle() {
    let (mut cpu, mut bus) = test_setup();
    cpu.registers.write(1, DATA_BASE);
    // ldr r2, [r1]: 1 data access + 1 internal + 1 fetch.
    prepare_arm(&mut cpu, &mut bus, &[0xE591_2000]);
    assert_eq!(step_cycles(&mut cpu, &mut bus), 3);

    // str r2, [r1]: 1 data access + 1 fetch.
    prepare_arm(&mut cpu, &mut bus, &[0xE581_2000]);
    assert_eq!(step_cycles(&mut cpu, &mut bus), 2);
}

#[test]
fn test_branch_refills_pipeline() {
    let (mut cpu, mut bus) = test_setup();
    prepare_arm(&mut cpu, &mut bus, &[0xEA00_0010]); // b +
    // Two pipeline refill fetches from IWRAM, no trailing fetch.
    assert_eq!(step_cycles(&mut cpu, &mut bus), 2);
}

#[test]
fn test_failed_condition_still_fetches() {
    let (mut cpu, mut bus) = test_setup();
    // Z clear, so `moveq` does not execute but the pipeline still advances.
    prepare_arm(&mut cpu, &mut bus, &[0x03A0_0001]);
    assert_eq!(step_cycles(&mut cpu, &mut bus), 1);
}

#[test]
fn test_ewram_data_access_costs_wait_states() {
    let (mut cpu, mut bus) = test_setup();
    cpu.registers.write(1, 0x0200_0000);
    // ldr from EWRAM: 6 (word over a 16 bit bus with 2 waits) + 1 + 1.
    prepare_arm(&mut cpu, &mut bus, &[0xE591_2000]);
    assert_eq!(step_cycles(&mut cpu, &mut bus), 8);
}

#[test]
fn test_accumulate_adds_a_cycle() {
    let (mut cpu, mut bus) = test_setup();
    cpu.registers.write(0, 5);
    cpu.registers.write(1, 0xFF);
    cpu.registers.write(2, 1);
    // mla r3, r0, r1, r2: booth (1) + accumulate (1) + fetch.
    prepare_arm(&mut cpu, &mut bus, &[0xE023_2190]);
    assert_eq!(step_cycles(&mut cpu, &mut bus), 3);
}
