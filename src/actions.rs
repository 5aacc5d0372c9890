use anyhow::{anyhow, Context};
use directories::ProjectDirs;
use memmap2::Mmap;
use rustyboi_advance_core::emulator::Emulator;
use rustyboi_advance_core::hardware::cartridge::header::CartridgeHeader;
use rustyboi_advance_core::hardware::mmu::BIOS_SIZE;
use rustyboi_advance_core::{EmulatorOptions, EmulatorOptionsBuilder, LoadError};

use std::fs::{create_dir_all, read, File};
use std::io::Write;
use std::path::{Path, PathBuf};

fn project_dirs() -> ProjectDirs {
    ProjectDirs::from("", "RustyboiAdvance", "RustyboiAdvance")
        .expect("Could not retrieve the project directories!")
}

fn saves_dir() -> PathBuf {
    let dir = project_dirs().data_dir().join("saves");
    let _ = create_dir_all(&dir);
    dir
}

/// Read and sanity check a 16 KB GBA BIOS image.
pub fn load_bios(bios_path: impl AsRef<Path>) -> anyhow::Result<Vec<u8>> {
    let path = bios_path.as_ref();
    let bios = read(path).map_err(|_| LoadError::MissingFile(path.display().to_string()))?;
    if bios.len() != BIOS_SIZE {
        return Err(anyhow!(LoadError::InvalidBios)).context(format!("{:?}", path));
    }
    Ok(bios)
}

/// Create an emulator for the ROM provided by `rom_path`.
///
/// Any saved battery memory for this game is mapped in automatically, and
/// the cartridge module undoes the EEPROM byte-reversal where relevant.
pub fn create_emulator(rom_path: impl AsRef<Path>, options: EmulatorOptions) -> anyhow::Result<Emulator> {
    let path = rom_path.as_ref();
    let rom = read(path).map_err(|_| LoadError::MissingFile(path.display().to_string()))?;
    let saved_ram = find_saved_ram(find_rom_name(&rom));

    log::info!(
        "Created emulator for path {:?} with saved data: {}",
        path,
        saved_ram.is_some()
    );

    let emu_options = EmulatorOptionsBuilder::from(options).saved_ram(saved_ram).build();

    Emulator::new(&rom, emu_options).context("Failed to assemble the emulator")
}

/// Flush battery memory (in case the cartridge has any) to disk.
pub fn save_rom(emulator: &Emulator) {
    if let Some(ram) = emulator.save_data() {
        let title = emulator.game_title().trim().to_owned();
        let mut save_file = match File::create(saves_dir().join(format!("{}.sav", title))) {
            Ok(file) => file,
            Err(e) => {
                log::error!("Could not create the save file: {}", e);
                return;
            }
        };
        if let Err(e) = save_file.write_all(&ram) {
            log::error!("Could not write the save file: {}", e);
        }

        log::debug!("Finished saving battery memory, {} bytes", ram.len());
    }
}

/// Look for a `.sav` next to previous sessions of the same game. The file is
/// memory mapped rather than read since flash saves run to 128 KB and most
/// of it is usually untouched 0xFF filler.
pub fn find_saved_ram(name: impl AsRef<str>) -> Option<Vec<u8>> {
    let path = saves_dir().join(format!("{}.sav", name.as_ref()));
    let file = File::open(path).ok()?;
    // Safety: the save file is private to this application; concurrent
    // mutation would at worst corrupt this one save.
    let map = unsafe { Mmap::map(&file).ok()? };
    Some(map.to_vec())
}

pub fn find_rom_name(rom: &[u8]) -> String {
    if rom.len() < 0xC0 {
        // Too small to carry a game pak header; the load will fail anyway.
        return String::new();
    }
    CartridgeHeader::new(rom).title.trim().to_owned()
}

/// Write a save-state blob for the given game slot.
pub fn save_state_path(game_title: &str, slot: u8) -> PathBuf {
    saves_dir().join(format!("{}.state{}", game_title.trim(), slot))
}
