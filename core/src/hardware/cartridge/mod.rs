use crate::hardware::bytes;
use crate::hardware::cartridge::eeprom::{Eeprom, EEPROM_512_SIZE, EEPROM_8K_SIZE};
use crate::hardware::cartridge::flash::{Flash, FLASH_128K_SIZE, FLASH_64K_SIZE};
use crate::hardware::cartridge::header::CartridgeHeader;
use crate::LoadError;
use log::*;
use nanoserde::{DeBin, DeBinErr, SerBin};

pub mod eeprom;
pub mod flash;
pub mod header;

pub const SRAM_SIZE: usize = 0x8000;
/// Game pak ROM can be up to 32 MB, mirrored three times in the address space.
pub const ROM_ADDR_MASK: u32 = 0x01FF_FFFF;

/// The save memory a game pak carries, detected by scanning the ROM for the
/// canonical library marker strings.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SaveType {
    None,
    Sram,
    Flash64,
    Flash128,
    Eeprom512,
    Eeprom8k,
}

impl SaveType {
    pub fn is_eeprom(self) -> bool {
        matches!(self, SaveType::Eeprom512 | SaveType::Eeprom8k)
    }

    pub fn is_flash(self) -> bool {
        matches!(self, SaveType::Flash64 | SaveType::Flash128)
    }

    /// Size of the save file in bytes.
    pub fn size(self) -> usize {
        match self {
            SaveType::None => 0,
            SaveType::Sram => SRAM_SIZE,
            SaveType::Flash64 => FLASH_64K_SIZE,
            SaveType::Flash128 => FLASH_128K_SIZE,
            SaveType::Eeprom512 => EEPROM_512_SIZE,
            SaveType::Eeprom8k => EEPROM_8K_SIZE,
        }
    }
}

/// Look for the marker strings the save libraries embed in ROM.
///
/// The exact strings matter, they are what existing ROMs actually contain.
pub fn detect_save_type(rom: &[u8]) -> SaveType {
    const MARKERS: [(&[u8], SaveType); 5] = [
        (b"EEPROM_V", SaveType::Eeprom8k),
        (b"FLASH1M_V", SaveType::Flash128),
        (b"FLASH512_V", SaveType::Flash64),
        (b"FLASH_V", SaveType::Flash64),
        (b"SRAM_V", SaveType::Sram),
    ];

    for (marker, save_type) in MARKERS.iter() {
        if rom.windows(marker.len()).any(|window| window == *marker) {
            return *save_type;
        }
    }
    SaveType::None
}

/// Save memory plus the protocol state machines that sit in front of it.
#[derive(Debug, Clone)]
pub struct SaveMedia {
    pub save_type: SaveType,
    pub data: Vec<u8>,
    flash: Flash,
    eeprom: Eeprom,
    /// Set on every mutation, cleared by the frontend once it has flushed
    /// the save file.
    pub dirty: bool,
}

impl SaveMedia {
    fn new(save_type: SaveType) -> Self {
        SaveMedia {
            save_type,
            data: vec![0xFF; save_type.size()],
            flash: Flash::new(save_type == SaveType::Flash128),
            eeprom: Eeprom::new(if save_type == SaveType::Eeprom512 { 6 } else { 14 }),
            dirty: false,
        }
    }
}

pub struct Cartridge {
    rom: Vec<u8>,
    pub header: CartridgeHeader,
    pub save: SaveMedia,
}

impl Cartridge {
    /// Create a cartridge from a raw ROM image, padding it up to a word
    /// multiple, and attach previously saved battery memory if provided.
    pub fn new(rom_bytes: &[u8], saved_ram: Option<Vec<u8>>) -> Result<Self, LoadError> {
        if rom_bytes.len() < header::HEADER_END + 1 {
            return Err(LoadError::InvalidRom);
        }
        let mut rom = rom_bytes.to_vec();
        rom.resize((rom.len() + 3) & !3, 0);

        let header = CartridgeHeader::new(&rom);
        if !header.checksum_valid {
            warn!("ROM header checksum mismatch for '{}'", header.title);
        }

        let save_type = detect_save_type(&rom);
        info!(
            "Loaded ROM '{}' ({}), {} KB, save type {:?}",
            header.title,
            header.game_code,
            rom.len() / 1024,
            save_type
        );

        let mut cartridge = Cartridge {
            rom,
            header,
            save: SaveMedia::new(save_type),
        };
        if let Some(saved) = saved_ram {
            cartridge.attach_save_data(&saved);
        }
        Ok(cartridge)
    }

    pub fn rom_len(&self) -> usize {
        self.rom.len()
    }

    pub fn read_rom(&self, address: u32) -> u8 {
        let offset = (address & ROM_ADDR_MASK) as usize;
        if offset < self.rom.len() {
            self.rom[offset]
        } else {
            // Past the end of ROM the bus floats to the address pattern.
            ((offset >> 1) >> ((offset & 1) * 8)) as u8
        }
    }

    pub fn read_rom_hword(&self, address: u32) -> u16 {
        let offset = (address & ROM_ADDR_MASK & !1) as usize;
        if offset + 2 <= self.rom.len() {
            bytes::read_hword(&self.rom, offset)
        } else {
            (offset >> 1) as u16
        }
    }

    pub fn read_rom_word(&self, address: u32) -> u32 {
        let low = self.read_rom_hword(address & !3) as u32;
        let high = self.read_rom_hword((address & !3) | 2) as u32;
        (high << 16) | low
    }

    /// Whether the given region 0xD address is routed to the EEPROM chip
    /// rather than ROM. Small carts map it across the whole mirror, 32 MB
    /// carts only in the topmost 256 bytes.
    pub fn is_eeprom_access(&self, address: u32) -> bool {
        self.save.save_type.is_eeprom()
            && (address >> 24) & 0xF == 0xD
            && (self.rom.len() <= 0x0100_0000 || (address & ROM_ADDR_MASK) >= 0x01FF_FF00)
    }

    /// A DMA 3 burst to the EEPROM reveals the chip's address width.
    pub fn observe_eeprom_burst(&mut self, count: u32) {
        self.save.eeprom.observe_burst_length(count);
        let size = self.save.eeprom.implied_size();
        if self.save.data.len() != size {
            self.save.data.resize(size, 0xFF);
            self.save.save_type = if size == EEPROM_512_SIZE {
                SaveType::Eeprom512
            } else {
                SaveType::Eeprom8k
            };
        }
    }

    pub fn read_eeprom(&mut self) -> u16 {
        self.save.eeprom.read_bit()
    }

    pub fn write_eeprom(&mut self, value: u16) {
        if self.save.eeprom.write_bit(&mut self.save.data, value) {
            self.save.dirty = true;
        }
    }

    pub fn read_sram(&self, address: u32) -> u8 {
        match self.save.save_type {
            SaveType::Sram => self.save.data[(address as usize) & (SRAM_SIZE - 1)],
            SaveType::Flash64 | SaveType::Flash128 => self.save.flash.read(&self.save.data, address),
            _ => 0xFF,
        }
    }

    pub fn write_sram(&mut self, address: u32, value: u8) {
        match self.save.save_type {
            SaveType::Sram => {
                self.save.data[(address as usize) & (SRAM_SIZE - 1)] = value;
                self.save.dirty = true;
            }
            SaveType::Flash64 | SaveType::Flash128 => {
                if self.save.flash.write(&mut self.save.data, address, value) {
                    self.save.dirty = true;
                }
            }
            _ => {}
        }
    }

    /// Battery memory in save-file order: EEPROM dwords are byte-reversed on
    /// disk so that the chip's bit order reads naturally.
    pub fn save_data(&self) -> Option<Vec<u8>> {
        if self.save.save_type == SaveType::None {
            return None;
        }
        let mut data = self.save.data.clone();
        if self.save.save_type.is_eeprom() {
            reverse_eeprom_words(&mut data);
        }
        Some(data)
    }

    /// Attach battery memory read from a save file, undoing the EEPROM
    /// byte-reversal.
    pub fn attach_save_data(&mut self, saved: &[u8]) {
        if self.save.save_type == SaveType::None {
            return;
        }
        let mut data = saved.to_vec();
        data.resize(self.save.save_type.size(), 0xFF);
        if self.save.save_type.is_eeprom() {
            reverse_eeprom_words(&mut data);
        }
        self.save.data = data;
    }
}

fn reverse_eeprom_words(data: &mut [u8]) {
    for dword in data.chunks_exact_mut(8) {
        dword.reverse();
    }
}

impl SerBin for SaveMedia {
    fn ser_bin(&self, output: &mut Vec<u8>) {
        let save_type: u8 = match self.save_type {
            SaveType::None => 0,
            SaveType::Sram => 1,
            SaveType::Flash64 => 2,
            SaveType::Flash128 => 3,
            SaveType::Eeprom512 => 4,
            SaveType::Eeprom8k => 5,
        };
        save_type.ser_bin(output);
        self.data.ser_bin(output);
        self.flash.ser_bin(output);
        self.eeprom.ser_bin(output);
        self.dirty.ser_bin(output);
    }
}

impl DeBin for SaveMedia {
    fn de_bin(offset: &mut usize, bytes: &[u8]) -> Result<Self, DeBinErr> {
        let save_type = match u8::de_bin(offset, bytes)? {
            0 => SaveType::None,
            1 => SaveType::Sram,
            2 => SaveType::Flash64,
            3 => SaveType::Flash128,
            4 => SaveType::Eeprom512,
            _ => SaveType::Eeprom8k,
        };
        Ok(SaveMedia {
            save_type,
            data: Vec::de_bin(offset, bytes)?,
            flash: Flash::de_bin(offset, bytes)?,
            eeprom: Eeprom::de_bin(offset, bytes)?,
            dirty: bool::de_bin(offset, bytes)?,
        })
    }
}
