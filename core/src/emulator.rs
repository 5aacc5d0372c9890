use crate::hardware::cartridge::Cartridge;
use crate::hardware::cpu::Cpu;
use crate::hardware::mmu::{HaltState, Memory};
use crate::hardware::ppu;
use crate::io::keypad::InputKey;
use crate::{EmulatorOptions, LoadError};
use log::*;
use nanoserde::{DeBinErr, SerBin};

/// The assembled machine: the CPU plus the bus that owns every other
/// component. The host drives it one instruction or one frame at a time;
/// nothing in here ever blocks.
pub struct Emulator {
    pub cpu: Cpu,
    pub bus: Memory,
    boot_bios: bool,
    sample_rate: u32,
    color_filter: bool,
}

impl Emulator {
    pub fn new(rom: &[u8], options: EmulatorOptions) -> Result<Self, LoadError> {
        let cartridge = Cartridge::new(rom, options.saved_ram.clone())?;
        let mut bus = Memory::new(cartridge, &options)?;
        let cpu = Cpu::new(options.boot_bios, &mut bus);
        info!(
            "Emulator assembled, {} the BIOS boot sequence",
            if options.boot_bios { "running" } else { "skipping" }
        );
        Ok(Emulator {
            cpu,
            bus,
            boot_bios: options.boot_bios,
            sample_rate: options.sample_rate,
            color_filter: options.color_filter,
        })
    }

    /// Power-cycle the machine in place. The loaded ROM, BIOS and battery
    /// memory survive, everything else returns to its boot state.
    pub fn reset(&mut self) {
        self.bus.reset(self.boot_bios, self.sample_rate);
        self.cpu = Cpu::new(self.boot_bios, &mut self.bus);
        info!("Emulator reset");
    }

    /// Advance the machine by one instruction (or, while halted, to the next
    /// scheduled event) and dispatch everything that came due.
    ///
    /// Returns `true` when a frame finished on this cycle.
    pub fn emulate_cycle(&mut self) -> bool {
        match self.bus.halt_state {
            HaltState::Running => self.cpu.step_instruction(&mut self.bus),
            HaltState::Halted => {
                // A halted CPU burns no cycles: time leaps to the next event.
                if self.bus.interrupts.halt_wake() {
                    self.bus.resume();
                } else {
                    self.bus.scheduler.skip_to_next_event();
                }
            }
            HaltState::Stopped => return true,
        }
        self.bus.tick_events();

        if self.bus.ppu.frame_complete {
            self.bus.ppu.frame_complete = false;
            true
        } else {
            false
        }
    }

    /// Run until the PPU completes the current frame (or the CPU enters
    /// stop mode).
    pub fn run_frame(&mut self) {
        while !self.emulate_cycle() {}
    }

    pub fn is_stopped(&self) -> bool {
        self.bus.halt_state == HaltState::Stopped
    }

    pub fn handle_input(&mut self, key: InputKey, pressed: bool) {
        self.bus.handle_input(key, pressed);
    }

    /// The 240x160 BGR555 screen as produced by the PPU.
    pub fn frame_buffer(&self) -> &[u16] {
        &self.bus.ppu.screen
    }

    /// Convert the current frame into XRGB8888 for the host.
    pub fn convert_screen(&self, output: &mut [u32]) {
        ppu::convert_screen(&self.bus.ppu.screen, output, self.color_filter);
    }

    /// Interleaved stereo samples accumulated since the last clear.
    pub fn audio_buffer(&self) -> &[f32] {
        self.bus.apu.get_audio_buffer()
    }

    pub fn clear_audio_buffer(&mut self) {
        self.bus.apu.clear_audio_buffer();
    }

    pub fn game_title(&self) -> &str {
        &self.bus.cartridge.header.title
    }

    /// Battery-backed memory in save-file order, if this cartridge has any.
    pub fn save_data(&self) -> Option<Vec<u8>> {
        self.bus.cartridge.save_data()
    }

    pub fn save_dirty(&mut self) -> bool {
        let dirty = self.bus.cartridge.save.dirty;
        self.bus.cartridge.save.dirty = false;
        dirty
    }

    /// Serialise the entire mutable machine state as one opaque blob. The
    /// ROM and BIOS images are deliberately absent; a restore re-attaches
    /// whatever is currently loaded. Not portable across builds.
    pub fn save_state(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(0x80000);
        self.cpu.ser_bin(&mut output);
        self.bus.ser_state(&mut output);
        output
    }

    pub fn load_state(&mut self, state: &[u8]) -> Result<(), DeBinErr> {
        let mut offset = 0;
        self.cpu = nanoserde::DeBin::de_bin(&mut offset, state)?;
        self.bus.de_state(&mut offset, state)?;
        info!("Save state restored ({} bytes)", state.len());
        Ok(())
    }
}
