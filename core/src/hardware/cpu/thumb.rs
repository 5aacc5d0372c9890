//! The Thumb (16 bit) instruction core. Every format maps onto the same ALU
//! and memory semantics as its ARM counterpart.

use crate::hardware::cpu::alu;
use crate::hardware::cpu::registers::{State, LINK_REG, PC_REG, SP_REG};
use crate::hardware::cpu::{Cpu, Exception, ThumbHandler};
use crate::hardware::mmu::Memory;

pub(super) fn decode(index: usize) -> ThumbHandler {
    match index >> 5 {
        0b000 => {
            if (index >> 3) & 0x3 == 0x3 {
                thumb_add_sub
            } else {
                thumb_move_shifted
            }
        }
        0b001 => thumb_immediate_ops,
        0b010 => {
            if index >> 2 == 0b010000 {
                thumb_alu_ops
            } else if index >> 2 == 0b010001 {
                thumb_hi_register_ops
            } else if index >> 3 == 0b01001 {
                thumb_pc_relative_load
            } else if index & 0b10 == 0 {
                thumb_load_store_reg_offset
            } else {
                thumb_load_store_sign_extended
            }
        }
        0b011 => thumb_load_store_imm_offset,
        0b100 => {
            if index & 0x10 == 0 {
                thumb_load_store_half
            } else {
                thumb_sp_relative_load_store
            }
        }
        0b101 => {
            if index & 0x10 == 0 {
                thumb_load_address
            } else if index == 0b1011_0000 {
                thumb_adjust_sp
            } else if index & 0b1111_0110 == 0b1011_0100 {
                thumb_push_pop
            } else {
                thumb_undefined
            }
        }
        0b110 => {
            if index & 0x10 == 0 {
                thumb_load_store_multiple
            } else {
                match index & 0xF {
                    0xF => thumb_swi,
                    0xE => thumb_undefined,
                    _ => thumb_conditional_branch,
                }
            }
        }
        _ => {
            if index >> 3 == 0b11100 {
                thumb_unconditional_branch
            } else if index >> 3 == 0b11110 {
                thumb_long_branch_setup
            } else if index >> 3 == 0b11111 {
                thumb_long_branch_complete
            } else {
                thumb_undefined
            }
        }
    }
}

fn thumb_move_shifted(cpu: &mut Cpu, _bus: &mut Memory, instr: u16) {
    let op = ((instr >> 11) & 0x3) as u32;
    let amount = ((instr >> 6) & 0x1F) as u32;
    let rs = ((instr >> 3) & 0x7) as usize;
    let rd = (instr & 0x7) as usize;

    let carry_in = cpu.registers.cpsr.carry();
    let (result, carry) = alu::shift_by_immediate(op, cpu.registers.read(rs), amount, carry_in);
    cpu.registers.write(rd, result);
    cpu.set_nz(result);
    cpu.registers.cpsr.set_carry(carry);
}

fn thumb_add_sub(cpu: &mut Cpu, _bus: &mut Memory, instr: u16) {
    let immediate = instr & (1 << 10) != 0;
    let subtract = instr & (1 << 9) != 0;
    let rs = ((instr >> 3) & 0x7) as usize;
    let rd = (instr & 0x7) as usize;

    let field = ((instr >> 6) & 0x7) as u32;
    let operand = if immediate {
        field
    } else {
        cpu.registers.read(field as usize)
    };

    let source = cpu.registers.read(rs);
    let result = if subtract {
        cpu.add_with_flags(source, !operand, true)
    } else {
        cpu.add_with_flags(source, operand, false)
    };
    cpu.registers.write(rd, result);
}

fn thumb_immediate_ops(cpu: &mut Cpu, _bus: &mut Memory, instr: u16) {
    let op = (instr >> 11) & 0x3;
    let rd = ((instr >> 8) & 0x7) as usize;
    let imm = (instr & 0xFF) as u32;
    let current = cpu.registers.read(rd);

    match op {
        0 => {
            cpu.registers.write(rd, imm);
            cpu.set_nz(imm);
        }
        1 => {
            cpu.add_with_flags(current, !imm, true);
        }
        2 => {
            let result = cpu.add_with_flags(current, imm, false);
            cpu.registers.write(rd, result);
        }
        _ => {
            let result = cpu.add_with_flags(current, !imm, true);
            cpu.registers.write(rd, result);
        }
    }
}

fn thumb_alu_ops(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let op = (instr >> 6) & 0xF;
    let rs = ((instr >> 3) & 0x7) as usize;
    let rd = (instr & 0x7) as usize;
    let source = cpu.registers.read(rs);
    let current = cpu.registers.read(rd);
    let carry_in = cpu.registers.cpsr.carry();

    let logical = |cpu: &mut Cpu, result: u32| {
        cpu.set_nz(result);
        result
    };
    let shift = |cpu: &mut Cpu, bus: &mut Memory, shift_type: u32| {
        bus.idle();
        let (result, carry) =
            alu::shift_by_register(shift_type, current, source & 0xFF, carry_in);
        cpu.set_nz(result);
        cpu.registers.cpsr.set_carry(carry);
        result
    };

    let result = match op {
        0x0 => logical(cpu, current & source),
        0x1 => logical(cpu, current ^ source),
        0x2 => shift(cpu, bus, 0),
        0x3 => shift(cpu, bus, 1),
        0x4 => shift(cpu, bus, 2),
        0x5 => cpu.add_with_flags(current, source, carry_in),
        0x6 => cpu.add_with_flags(current, !source, carry_in),
        0x7 => shift(cpu, bus, 3),
        0x8 => {
            logical(cpu, current & source);
            return;
        }
        0x9 => cpu.add_with_flags(0, !source, true),
        0xA => {
            cpu.add_with_flags(current, !source, true);
            return;
        }
        0xB => {
            cpu.add_with_flags(current, source, false);
            return;
        }
        0xC => logical(cpu, current | source),
        0xD => {
            for _ in 0..alu::multiply_cycles(current, true) {
                bus.idle();
            }
            logical(cpu, current.wrapping_mul(source))
        }
        0xE => logical(cpu, current & !source),
        _ => logical(cpu, !source),
    };
    cpu.registers.write(rd, result);
}

fn thumb_hi_register_ops(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let op = (instr >> 8) & 0x3;
    let rs = ((instr >> 3) & 0xF) as usize;
    let rd = ((instr & 0x7) | ((instr >> 4) & 0x8)) as usize;
    let source = cpu.registers.read(rs);

    match op {
        0 => {
            let result = cpu.registers.read(rd).wrapping_add(source);
            if rd == PC_REG {
                cpu.branch_to(bus, result);
            } else {
                cpu.registers.write(rd, result);
            }
        }
        1 => {
            let current = cpu.registers.read(rd);
            cpu.add_with_flags(current, !source, true);
        }
        2 => {
            if rd == PC_REG {
                cpu.branch_to(bus, source);
            } else {
                cpu.registers.write(rd, source);
            }
        }
        _ => {
            // BX: bit 0 of the target picks the state.
            if source & 1 == 0 {
                cpu.registers.cpsr.set_state(State::Arm);
            }
            cpu.branch_to(bus, source);
        }
    }
}

fn thumb_pc_relative_load(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let rd = ((instr >> 8) & 0x7) as usize;
    let offset = ((instr & 0xFF) as u32) * 4;
    let address = (cpu.registers.pc() & !2).wrapping_add(offset);

    let value = bus.read_word_rotated(address);
    bus.idle();
    cpu.registers.write(rd, value);
}

fn thumb_load_store_reg_offset(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let op = (instr >> 10) & 0x3;
    let ro = ((instr >> 6) & 0x7) as usize;
    let rb = ((instr >> 3) & 0x7) as usize;
    let rd = (instr & 0x7) as usize;
    let address = cpu.registers.read(rb).wrapping_add(cpu.registers.read(ro));

    match op {
        0 => bus.write_word(address, cpu.registers.read(rd)),
        1 => bus.write_byte(address, cpu.registers.read(rd) as u8),
        2 => {
            let value = bus.read_word_rotated(address);
            bus.idle();
            cpu.registers.write(rd, value);
        }
        _ => {
            let value = bus.read_byte(address) as u32;
            bus.idle();
            cpu.registers.write(rd, value);
        }
    }
}

fn thumb_load_store_sign_extended(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let op = (instr >> 10) & 0x3;
    let ro = ((instr >> 6) & 0x7) as usize;
    let rb = ((instr >> 3) & 0x7) as usize;
    let rd = (instr & 0x7) as usize;
    let address = cpu.registers.read(rb).wrapping_add(cpu.registers.read(ro));

    match op {
        0 => bus.write_hword(address, cpu.registers.read(rd) as u16),
        1 => {
            let value = bus.read_byte(address) as i8 as i32 as u32;
            bus.idle();
            cpu.registers.write(rd, value);
        }
        2 => {
            let value = bus.read_hword_rotated(address);
            bus.idle();
            cpu.registers.write(rd, value);
        }
        _ => {
            // Misaligned signed halfword loads degrade to a signed byte.
            let value = if address & 1 != 0 {
                bus.read_byte(address) as i8 as i32 as u32
            } else {
                bus.read_hword(address) as i16 as i32 as u32
            };
            bus.idle();
            cpu.registers.write(rd, value);
        }
    }
}

fn thumb_load_store_imm_offset(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let byte = instr & (1 << 12) != 0;
    let load = instr & (1 << 11) != 0;
    let offset = ((instr >> 6) & 0x1F) as u32;
    let rb = ((instr >> 3) & 0x7) as usize;
    let rd = (instr & 0x7) as usize;

    let address = cpu
        .registers
        .read(rb)
        .wrapping_add(if byte { offset } else { offset * 4 });

    match (load, byte) {
        (false, false) => bus.write_word(address, cpu.registers.read(rd)),
        (false, true) => bus.write_byte(address, cpu.registers.read(rd) as u8),
        (true, false) => {
            let value = bus.read_word_rotated(address);
            bus.idle();
            cpu.registers.write(rd, value);
        }
        (true, true) => {
            let value = bus.read_byte(address) as u32;
            bus.idle();
            cpu.registers.write(rd, value);
        }
    }
}

fn thumb_load_store_half(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let load = instr & (1 << 11) != 0;
    let offset = (((instr >> 6) & 0x1F) as u32) * 2;
    let rb = ((instr >> 3) & 0x7) as usize;
    let rd = (instr & 0x7) as usize;
    let address = cpu.registers.read(rb).wrapping_add(offset);

    if load {
        let value = bus.read_hword_rotated(address);
        bus.idle();
        cpu.registers.write(rd, value);
    } else {
        bus.write_hword(address, cpu.registers.read(rd) as u16);
    }
}

fn thumb_sp_relative_load_store(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let load = instr & (1 << 11) != 0;
    let rd = ((instr >> 8) & 0x7) as usize;
    let offset = ((instr & 0xFF) as u32) * 4;
    let address = cpu.registers.read(SP_REG).wrapping_add(offset);

    if load {
        let value = bus.read_word_rotated(address);
        bus.idle();
        cpu.registers.write(rd, value);
    } else {
        bus.write_word(address, cpu.registers.read(rd));
    }
}

fn thumb_load_address(cpu: &mut Cpu, _bus: &mut Memory, instr: u16) {
    let from_sp = instr & (1 << 11) != 0;
    let rd = ((instr >> 8) & 0x7) as usize;
    let offset = ((instr & 0xFF) as u32) * 4;

    let base = if from_sp {
        cpu.registers.read(SP_REG)
    } else {
        cpu.registers.pc() & !2
    };
    cpu.registers.write(rd, base.wrapping_add(offset));
}

fn thumb_adjust_sp(cpu: &mut Cpu, _bus: &mut Memory, instr: u16) {
    let offset = ((instr & 0x7F) as u32) * 4;
    let sp = cpu.registers.read(SP_REG);
    let new_sp = if instr & (1 << 7) != 0 {
        sp.wrapping_sub(offset)
    } else {
        sp.wrapping_add(offset)
    };
    cpu.registers.write(SP_REG, new_sp);
}

fn thumb_push_pop(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let pop = instr & (1 << 11) != 0;
    let with_link = instr & (1 << 8) != 0;
    let rlist = instr & 0xFF;
    let count = rlist.count_ones() + with_link as u32;

    if pop {
        let mut address = cpu.registers.read(SP_REG);
        cpu.registers.write(SP_REG, address.wrapping_add(4 * count));
        for reg in 0..8 {
            if rlist & (1 << reg) != 0 {
                let value = bus.read_word(address);
                cpu.registers.write(reg, value);
                address = address.wrapping_add(4);
            }
        }
        bus.idle();
        if with_link {
            let target = bus.read_word(address);
            cpu.branch_to(bus, target);
        }
    } else {
        let mut address = cpu.registers.read(SP_REG).wrapping_sub(4 * count);
        cpu.registers.write(SP_REG, address);
        for reg in 0..8 {
            if rlist & (1 << reg) != 0 {
                bus.write_word(address, cpu.registers.read(reg));
                address = address.wrapping_add(4);
            }
        }
        if with_link {
            bus.write_word(address, cpu.registers.read(LINK_REG));
        }
    }
}

fn thumb_load_store_multiple(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let load = instr & (1 << 11) != 0;
    let rb = ((instr >> 8) & 0x7) as usize;
    let rlist = instr & 0xFF;

    // An empty list transfers r15 and moves the base by 0x40.
    if rlist == 0 {
        let base = cpu.registers.read(rb);
        if load {
            let target = bus.read_word(base);
            bus.idle();
            cpu.registers.write(rb, base.wrapping_add(0x40));
            cpu.branch_to(bus, target);
        } else {
            bus.write_word(base, cpu.registers.pc().wrapping_add(2));
            cpu.registers.write(rb, base.wrapping_add(0x40));
        }
        return;
    }

    let mut address = cpu.registers.read(rb);
    let final_base = address.wrapping_add(4 * rlist.count_ones());
    let first_reg = rlist.trailing_zeros() as usize;

    for reg in 0..8 {
        if rlist & (1 << reg) == 0 {
            continue;
        }
        if load {
            let value = bus.read_word(address);
            cpu.registers.write(reg, value);
        } else {
            let value = if reg == rb && reg != first_reg {
                final_base
            } else {
                cpu.registers.read(reg)
            };
            bus.write_word(address, value);
        }
        address = address.wrapping_add(4);
    }

    if load {
        bus.idle();
    }
    // On a load the written-back base loses to a loaded value.
    if !(load && rlist & (1 << rb) != 0) {
        cpu.registers.write(rb, final_base);
    }
}

fn thumb_conditional_branch(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let condition = ((instr >> 8) & 0xF) as u32;
    if !cpu.condition_passed(condition) {
        return;
    }
    let offset = ((instr & 0xFF) as i8 as i32) << 1;
    let target = cpu.registers.pc().wrapping_add(offset as u32);
    cpu.branch_to(bus, target);
}

fn thumb_unconditional_branch(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let offset = (((instr & 0x7FF) << 5) as i16 as i32) >> 4;
    let target = cpu.registers.pc().wrapping_add(offset as u32);
    cpu.branch_to(bus, target);
}

/// First half of `BL`: stage the high part of the target in LR.
fn thumb_long_branch_setup(cpu: &mut Cpu, _bus: &mut Memory, instr: u16) {
    let offset = ((((instr & 0x7FF) << 5) as i16 as i32) >> 5) << 12;
    let value = cpu.registers.pc().wrapping_add(offset as u32);
    cpu.registers.write(LINK_REG, value);
}

/// Second half of `BL`: finish the target, leave the return address (with
/// the Thumb bit set) in LR.
fn thumb_long_branch_complete(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    let offset = ((instr & 0x7FF) as u32) << 1;
    let target = cpu.registers.read(LINK_REG).wrapping_add(offset);
    let return_addr = cpu.registers.pc().wrapping_sub(2) | 1;
    cpu.registers.write(LINK_REG, return_addr);
    cpu.branch_to(bus, target);
}

fn thumb_swi(cpu: &mut Cpu, bus: &mut Memory, _instr: u16) {
    cpu.raise_exception(bus, Exception::SoftwareInterrupt);
}

fn thumb_undefined(cpu: &mut Cpu, bus: &mut Memory, instr: u16) {
    log::debug!("Undefined Thumb instruction: {:04X}", instr);
    cpu.raise_exception(bus, Exception::Undefined);
}
