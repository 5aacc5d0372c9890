use thiserror::Error;

pub mod emulator;
pub mod hardware;
pub mod io;
pub mod scheduler;

pub use crate::hardware::ppu::{DISPLAY_HEIGHT, DISPLAY_WIDTH, FRAMEBUFFER_SIZE};
pub use crate::io::keypad::InputKey;

/// Errors surfaced while assembling an emulator. Once the machine runs,
/// nothing fails any more: bad accesses become open bus and illegal opcodes
/// take the Undefined vector, the same way the hardware keeps going.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("file not found: {0}")]
    MissingFile(String),
    #[error("invalid or empty ROM image")]
    InvalidRom,
    #[error("invalid BIOS image, expected exactly 16 KB")]
    InvalidBios,
}

/// Struct for wrapping all the various options for the `Emulator`.
#[derive(Debug)]
pub struct EmulatorOptions {
    pub bios: Option<Vec<u8>>,
    pub saved_ram: Option<Vec<u8>>,
    /// Boot through the BIOS intro, or skip straight to the cartridge entry.
    pub boot_bios: bool,
    pub sample_rate: u32,
    pub color_filter: bool,
}

#[derive(Debug)]
pub struct EmulatorOptionsBuilder {
    bios: Option<Vec<u8>>,
    saved_ram: Option<Vec<u8>>,
    boot_bios: bool,
    sample_rate: u32,
    color_filter: bool,
}

impl EmulatorOptionsBuilder {
    pub fn new() -> Self {
        EmulatorOptionsBuilder {
            bios: None,
            saved_ram: None,
            boot_bios: true,
            sample_rate: 44_100,
            color_filter: false,
        }
    }

    pub fn bios(mut self, bios: Option<Vec<u8>>) -> Self {
        self.bios = bios;
        self
    }

    pub fn saved_ram(mut self, saved_ram: Option<Vec<u8>>) -> Self {
        self.saved_ram = saved_ram;
        self
    }

    pub fn boot_bios(mut self, boot_bios: bool) -> Self {
        self.boot_bios = boot_bios;
        self
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn color_filter(mut self, color_filter: bool) -> Self {
        self.color_filter = color_filter;
        self
    }

    pub fn build(self) -> EmulatorOptions {
        EmulatorOptions {
            bios: self.bios,
            saved_ram: self.saved_ram,
            boot_bios: self.boot_bios,
            sample_rate: self.sample_rate,
            color_filter: self.color_filter,
        }
    }
}

impl From<EmulatorOptions> for EmulatorOptionsBuilder {
    fn from(from: EmulatorOptions) -> Self {
        EmulatorOptionsBuilder {
            bios: from.bios,
            saved_ram: from.saved_ram,
            boot_bios: from.boot_bios,
            sample_rate: from.sample_rate,
            color_filter: from.color_filter,
        }
    }
}
