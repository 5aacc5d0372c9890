use log::*;
use nanoserde::{DeBin, DeBinErr, SerBin};

pub const FLASH_64K_SIZE: usize = 0x1_0000;
pub const FLASH_128K_SIZE: usize = 0x2_0000;

/// All commands are issued at this address after the unlock handshake.
const COMMAND_PORT: u32 = 0x5555;
const HANDSHAKE_PORT: u32 = 0x2AAA;

/// Panasonic, reported by 64 KB chips.
const ID_64K: [u8; 2] = [0x32, 0x1B];
/// Sanyo, reported by the banked 128 KB chips.
const ID_128K: [u8; 2] = [0x62, 0x13];

#[derive(Debug, Copy, Clone, PartialEq)]
enum FlashPhase {
    Ready,
    Handshake,
    Command,
    WriteByte,
    SelectBank,
}

impl FlashPhase {
    fn from_u8(value: u8) -> FlashPhase {
        match value {
            0 => FlashPhase::Ready,
            1 => FlashPhase::Handshake,
            2 => FlashPhase::Command,
            3 => FlashPhase::WriteByte,
            _ => FlashPhase::SelectBank,
        }
    }
}

/// The flash command state machine. The backing save bytes live in
/// [`super::SaveMedia`], this struct only tracks protocol state.
#[derive(Debug, Clone)]
pub struct Flash {
    phase: FlashPhase,
    chip_id_mode: bool,
    erase_requested: bool,
    bank: usize,
    banked: bool,
}

impl Flash {
    pub fn new(banked: bool) -> Self {
        Flash {
            phase: FlashPhase::Ready,
            chip_id_mode: false,
            erase_requested: false,
            bank: 0,
            banked,
        }
    }

    pub fn read(&self, data: &[u8], address: u32) -> u8 {
        let offset = (address & 0xFFFF) as usize;
        if self.chip_id_mode && offset <= 1 {
            let id = if self.banked { ID_128K } else { ID_64K };
            return id[offset];
        }
        data[self.bank * FLASH_64K_SIZE + offset]
    }

    /// Feed one byte write into the state machine. Returns `true` when the
    /// backing data was modified.
    pub fn write(&mut self, data: &mut [u8], address: u32, value: u8) -> bool {
        let address = address & 0xFFFF;
        match self.phase {
            FlashPhase::Ready => {
                if address == COMMAND_PORT && value == 0xAA {
                    self.phase = FlashPhase::Handshake;
                }
            }
            FlashPhase::Handshake => {
                self.phase = if address == HANDSHAKE_PORT && value == 0x55 {
                    FlashPhase::Command
                } else {
                    FlashPhase::Ready
                };
            }
            FlashPhase::Command => return self.handle_command(data, address, value),
            FlashPhase::WriteByte => {
                // Programming can only pull bits low; erase first to go back up.
                data[self.bank * FLASH_64K_SIZE + address as usize] &= value;
                self.phase = FlashPhase::Ready;
                return true;
            }
            FlashPhase::SelectBank => {
                if address == 0 {
                    self.bank = (value & 0x1) as usize;
                }
                self.phase = FlashPhase::Ready;
            }
        }
        false
    }

    fn handle_command(&mut self, data: &mut [u8], address: u32, value: u8) -> bool {
        self.phase = FlashPhase::Ready;
        match value {
            0x90 if address == COMMAND_PORT => self.chip_id_mode = true,
            0xF0 if address == COMMAND_PORT => self.chip_id_mode = false,
            0x80 if address == COMMAND_PORT => self.erase_requested = true,
            0x10 if address == COMMAND_PORT && self.erase_requested => {
                self.erase_requested = false;
                for byte in data.iter_mut() {
                    *byte = 0xFF;
                }
                return true;
            }
            0x30 if self.erase_requested => {
                self.erase_requested = false;
                let sector = self.bank * FLASH_64K_SIZE + (address & 0xF000) as usize;
                for byte in &mut data[sector..sector + 0x1000] {
                    *byte = 0xFF;
                }
                return true;
            }
            0xA0 if address == COMMAND_PORT => self.phase = FlashPhase::WriteByte,
            0xB0 if address == COMMAND_PORT && self.banked => self.phase = FlashPhase::SelectBank,
            _ => warn!("Unknown flash command {:02X} at {:04X}", value, address),
        }
        false
    }
}

impl SerBin for Flash {
    fn ser_bin(&self, output: &mut Vec<u8>) {
        (self.phase as u8).ser_bin(output);
        self.chip_id_mode.ser_bin(output);
        self.erase_requested.ser_bin(output);
        (self.bank as u8).ser_bin(output);
        self.banked.ser_bin(output);
    }
}

impl DeBin for Flash {
    fn de_bin(offset: &mut usize, bytes: &[u8]) -> Result<Self, DeBinErr> {
        Ok(Flash {
            phase: FlashPhase::from_u8(u8::de_bin(offset, bytes)?),
            chip_id_mode: bool::de_bin(offset, bytes)?,
            erase_requested: bool::de_bin(offset, bytes)?,
            bank: u8::de_bin(offset, bytes)? as usize,
            banked: bool::de_bin(offset, bytes)?,
        })
    }
}
