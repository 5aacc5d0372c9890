use anyhow::Context;
use gumdrop::Options;
use log::LevelFilter;
use simplelog::{Config, TermLogger, TerminalMode};

use rustyboi_advance::actions::{create_emulator, load_bios, save_rom};
use rustyboi_advance_core::emulator::Emulator;
use rustyboi_advance_core::hardware::cpu::registers::State;
use rustyboi_advance_core::EmulatorOptionsBuilder;

use std::io::{self, BufRead, Write};

const HELP: &str = "Debugger commands:
c -- continue emulation (one frame)
n -- next instruction
i -- cpu state info
rb <addr> -- read byte
rh <addr> -- read halfword
rw <addr> -- read word
r -- reset
q -- quit debugger
h -- help";

#[derive(Debug, Options)]
struct DebuggerOptions {
    #[options(help = "print this help message")]
    help: bool,
    #[options(free, help = "path to the ROM to run")]
    rom_path: Option<String>,
    #[options(help = "path to the 16 KB GBA BIOS image")]
    bios: Option<String>,
    #[options(help = "skip the BIOS boot animation")]
    skip_bios: bool,
}

fn main() -> anyhow::Result<()> {
    TermLogger::init(LevelFilter::Warn, Config::default(), TerminalMode::Mixed)
        .context("Failed to initialise the logger")?;

    let options: DebuggerOptions = DebuggerOptions::parse_args_default_or_exit();
    let rom_path = options
        .rom_path
        .clone()
        .context("No ROM provided, pass one as the first argument")?;

    let bios = match &options.bios {
        Some(path) => Some(load_bios(path)?),
        None => None,
    };
    let make_options = || {
        EmulatorOptionsBuilder::new()
            .bios(bios.clone())
            .boot_bios(bios.is_some() && !options.skip_bios)
            .build()
    };
    let mut emulator = create_emulator(&rom_path, make_options())?;

    println!("Rustyboi Advance debugger");
    print_cpu_state(&emulator);
    print_current_instr(&mut emulator);

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let mut parts = line.split_whitespace();
        let command = match parts.next() {
            Some(command) => command,
            None => continue,
        };

        match command {
            "q" => break,
            "h" => println!("{}", HELP),
            "c" => {
                emulator.run_frame();
                print_current_instr(&mut emulator);
            }
            "n" => {
                emulator.emulate_cycle();
                print_current_instr(&mut emulator);
            }
            "i" => print_cpu_state(&emulator),
            "rb" | "rh" | "rw" => match parts.next().and_then(read_num) {
                Some(address) => match command {
                    "rb" => println!("[{:08X}] = {:02X}", address, emulator.bus.debug_read_byte(address)),
                    "rh" => println!("[{:08X}] = {:04X}", address, emulator.bus.debug_read_hword(address)),
                    _ => println!("[{:08X}] = {:08X}", address, emulator.bus.debug_read_word(address)),
                },
                None => println!("Invalid address"),
            },
            "r" => {
                emulator.reset();
                println!("Reset.");
                print_cpu_state(&emulator);
            }
            _ => println!("Invalid command"),
        }
    }

    save_rom(&emulator);
    Ok(())
}

fn read_num(input: &str) -> Option<u32> {
    if let Some(hex) = input.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).ok()
    } else {
        input.parse().ok()
    }
}

fn print_cpu_state(emulator: &Emulator) {
    let registers = &emulator.cpu.registers;
    for reg in 0..16 {
        print!("r{:<2}={:08X} ", reg, registers.read(reg));
        if reg % 4 == 3 {
            println!();
        }
    }
    println!(
        "cpsr={:08X} mode={:?} state={:?}",
        registers.cpsr.bits(),
        registers.cpsr.mode(),
        registers.state()
    );
}

fn print_current_instr(emulator: &mut Emulator) {
    let registers = &emulator.cpu.registers;
    let state = registers.state();
    match state {
        State::Arm => {
            let address = registers.pc().wrapping_sub(8);
            let opcode = emulator.bus.debug_read_word(address);
            println!("{:08X}: {:08X}", address, opcode);
        }
        State::Thumb => {
            let address = registers.pc().wrapping_sub(4);
            let opcode = emulator.bus.debug_read_hword(address);
            println!("{:08X}: {:04X}", address, opcode);
        }
    }
}
