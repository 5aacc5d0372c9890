use crate::hardware::cartridge::Cartridge;
use crate::hardware::cpu::registers::{Mode, State};
use crate::hardware::cpu::Cpu;
use crate::hardware::mmu::Memory;
use crate::io::interrupts::InterruptFlags;
use crate::EmulatorOptionsBuilder;

mod cycle_tests;
mod instruction_tests;

/// Scratch space in IWRAM where the tests place their code.
pub const CODE_BASE: u32 = 0x0300_0000;
/// Scratch data area, far enough from the code not to collide.
pub const DATA_BASE: u32 = 0x0300_1000;

pub fn test_setup() -> (Cpu, Memory) {
    let rom = vec![0u8; 0x4000];
    let cartridge = Cartridge::new(&rom, None).unwrap();
    let options = EmulatorOptionsBuilder::new().boot_bios(false).build();
    let mut bus = Memory::new(cartridge, &options).unwrap();
    let cpu = Cpu::new(false, &mut bus);
    (cpu, bus)
}

/// Write the given ARM opcodes to IWRAM, jump there, and execute exactly
/// one step per opcode.
pub fn execute_arm(cpu: &mut Cpu, bus: &mut Memory, opcodes: &[u32]) {
    for (i, &opcode) in opcodes.iter().enumerate() {
        bus.write_word(CODE_BASE + i as u32 * 4, opcode);
    }
    cpu.branch_to(bus, CODE_BASE);
    for _ in opcodes {
        cpu.step_instruction(bus);
    }
}

/// Same, for Thumb opcodes. Leaves the CPU in Thumb state.
pub fn execute_thumb(cpu: &mut Cpu, bus: &mut Memory, opcodes: &[u16]) {
    for (i, &opcode) in opcodes.iter().enumerate() {
        bus.write_hword(CODE_BASE + i as u32 * 2, opcode);
    }
    cpu.registers.cpsr.set_state(State::Thumb);
    cpu.branch_to(bus, CODE_BASE);
    for _ in opcodes {
        cpu.step_instruction(bus);
    }
}

#[test]
fn test_irq_entry_invariants() {
    let (mut cpu, mut bus) = test_setup();
    // Park the pipeline somewhere recognisable.
    execute_arm(&mut cpu, &mut bus, &[0xE1A0_0000]); // mov r0, r0

    bus.interrupts.write_ime(1);
    bus.interrupts.write_ie(InterruptFlags::VBLANK.bits());
    bus.interrupts.raise(InterruptFlags::VBLANK);

    let return_pc = cpu.registers.pc() - 8;
    cpu.step_instruction(&mut bus);

    // After servicing: LR_irq = return address + 4, IRQ mode, ARM state,
    // interrupts masked.
    assert_eq!(cpu.registers.cpsr.mode(), Mode::Irq);
    assert_eq!(cpu.registers.read(14), return_pc + 4);
    assert_eq!(cpu.registers.state(), State::Arm);
    assert!(cpu.registers.cpsr.irq_disable());
    // And the old CPSR is waiting in SPSR_irq.
    assert_eq!(cpu.registers.spsr().bits() & 0x1F, 0x1F);
}

#[test]
fn test_irq_not_taken_with_i_flag_set() {
    let (mut cpu, mut bus) = test_setup();
    cpu.registers.cpsr.set_irq_disable(true);

    bus.interrupts.write_ime(1);
    bus.interrupts.write_ie(InterruptFlags::TIMER0.bits());
    bus.interrupts.raise(InterruptFlags::TIMER0);

    execute_arm(&mut cpu, &mut bus, &[0xE1A0_0000]);
    assert_ne!(cpu.registers.cpsr.mode(), Mode::Irq);
}

#[test]
fn test_swi_enters_supervisor() {
    let (mut cpu, mut bus) = test_setup();
    execute_arm(&mut cpu, &mut bus, &[0xEF00_0042]); // swi 0x42

    assert_eq!(cpu.registers.cpsr.mode(), Mode::Supervisor);
    assert!(cpu.registers.cpsr.irq_disable());
    // LR_svc points at the instruction after the SWI.
    assert_eq!(cpu.registers.read(14), CODE_BASE + 4);
    // Executing from the vector now.
    assert_eq!(cpu.registers.pc(), 0x08 + 8);
}

#[test]
fn test_undefined_instruction_vectors() {
    let (mut cpu, mut bus) = test_setup();
    // A coprocessor data operation, which the GBA treats as undefined.
    execute_arm(&mut cpu, &mut bus, &[0xEE00_0000]);

    assert_eq!(cpu.registers.cpsr.mode(), Mode::Undefined);
    assert_eq!(cpu.registers.pc(), 0x04 + 8);
}

#[test]
fn test_condition_codes_gate_execution() {
    let (mut cpu, mut bus) = test_setup();
    execute_arm(
        &mut cpu,
        &mut bus,
        &[
            0xE3A0_0001, // mov r0, #1
            0xE350_0001, // cmp r0, #1
            0x03A0_1055, // moveq r1, #0x55
            0x13A0_10AA, // movne r1, #0xAA
        ],
    );
    assert_eq!(cpu.registers.read(1), 0x55);
}
