use crate::hardware::apu::Apu;
use crate::hardware::bytes;
use crate::hardware::cartridge::Cartridge;
use crate::hardware::dma::{DmaController, StartTiming};
use crate::hardware::mmu::waitcnt::WaitControl;
use crate::hardware::mmu::wram::WorkRam;
use crate::hardware::ppu::{self, Ppu};
use crate::hardware::timers::Timers;
use crate::io::interrupts::{InterruptFlags, Interrupts};
use crate::io::keypad::{InputKey, Keypad};
use crate::scheduler::{EventType, Scheduler};
use crate::{EmulatorOptions, LoadError};
use log::*;
use nanoserde::{DeBin, DeBinErr, SerBin};

pub mod waitcnt;
pub mod wram;

pub const BIOS_SIZE: usize = 0x4000;
/// The memory mapped register file covers `0x0400_0000..0x0400_0400`.
pub const IO_SIZE: usize = 0x400;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum HaltState {
    Running,
    /// `HALTCNT` bit 7 clear: wait for any enabled interrupt line.
    Halted,
    /// `HALTCNT` bit 7 set: dead until the host intervenes.
    Stopped,
}

/// The 16 KB boot ROM. Data reads are only honoured while the CPU is
/// actually executing inside of it; otherwise the bus hands back the last
/// value it fetched from there (zero before any such fetch).
#[derive(Debug)]
pub struct Bios {
    rom: Vec<u8>,
    last_read: u32,
}

impl Bios {
    pub fn new(rom: Vec<u8>) -> Result<Self, LoadError> {
        if rom.len() != BIOS_SIZE {
            return Err(LoadError::InvalidBios);
        }
        Ok(Bios { rom, last_read: 0 })
    }

    /// A zero filled stand-in for running without a BIOS image.
    pub fn stub() -> Self {
        Bios {
            rom: vec![0; BIOS_SIZE],
            last_read: 0,
        }
    }
}

/// The system bus and everything hanging off it.
///
/// All sibling devices live here so that scheduler event handlers and I/O
/// register writes can reach whatever they need through a single `&mut self`.
pub struct Memory {
    pub bios: Bios,
    pub wram: WorkRam,
    pub ppu: Ppu,
    pub apu: Apu,
    pub dma: DmaController,
    pub timers: Timers,
    pub interrupts: Interrupts,
    pub keypad: Keypad,
    pub waitcnt: WaitControl,
    pub cartridge: Cartridge,
    pub scheduler: Scheduler,
    pub halt_state: HaltState,
    post_boot: u8,
    /// Backing store for registers nothing implements: they read back as
    /// last written, which is what most serial-block probing expects.
    io_generic: Vec<u8>,
    /// The ROM address a sequential access would hit next; used to price
    /// accesses as sequential vs non-sequential.
    next_rom_addr: u32,
    /// Most recently fetched opcode, which is what floats on the open bus.
    open_bus: u32,
    /// Whether the most recent opcode fetch came from the BIOS region.
    in_bios: bool,
}

impl Memory {
    pub fn new(cartridge: Cartridge, options: &EmulatorOptions) -> Result<Self, LoadError> {
        let bios = match &options.bios {
            Some(image) => Bios::new(image.clone())?,
            None => Bios::stub(),
        };

        let mut result = Memory {
            bios,
            wram: WorkRam::new(),
            ppu: Ppu::new(),
            apu: Apu::new(options.sample_rate),
            dma: DmaController::new(),
            timers: Timers::new(),
            interrupts: Interrupts::default(),
            keypad: Keypad::default(),
            waitcnt: WaitControl::default(),
            cartridge,
            scheduler: Scheduler::new(),
            halt_state: HaltState::Running,
            post_boot: (!options.boot_bios) as u8,
            io_generic: vec![0; IO_SIZE],
            next_rom_addr: 0,
            open_bus: 0,
            in_bios: options.boot_bios,
        };

        let sample_period = result.apu.cycles_per_sample();
        result.scheduler.push_event(EventType::HBlankStart, ppu::HDRAW_CYCLES);
        result.scheduler.push_event(EventType::ScanlineEnd, ppu::SCANLINE_CYCLES);
        result.scheduler.push_event(EventType::ApuSample, sample_period);
        Ok(result)
    }

    /// Re-initialise in place: every device goes back to its power-on state
    /// while the ROM, BIOS image and battery memory stay attached.
    pub fn reset(&mut self, boot_bios: bool, sample_rate: u32) {
        self.wram = WorkRam::new();
        self.ppu = Ppu::new();
        self.apu = Apu::new(sample_rate);
        self.dma = DmaController::new();
        self.timers = Timers::new();
        self.interrupts = Interrupts::default();
        self.keypad = Keypad::default();
        self.waitcnt = WaitControl::default();
        self.scheduler = Scheduler::new();
        self.halt_state = HaltState::Running;
        self.post_boot = (!boot_bios) as u8;
        self.io_generic.iter_mut().for_each(|b| *b = 0);
        self.next_rom_addr = 0;
        self.open_bus = 0;
        self.in_bios = boot_bios;
        self.bios.last_read = 0;

        let sample_period = self.apu.cycles_per_sample();
        self.scheduler.push_event(EventType::HBlankStart, ppu::HDRAW_CYCLES);
        self.scheduler.push_event(EventType::ScanlineEnd, ppu::SCANLINE_CYCLES);
        self.scheduler.push_event(EventType::ApuSample, sample_period);
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.halt_state == HaltState::Running
    }

    pub fn resume(&mut self) {
        self.halt_state = HaltState::Running;
    }

    /// Feed a host key change through `KEYINPUT`, evaluating the `KEYCNT`
    /// interrupt condition on every edge.
    pub fn handle_input(&mut self, key: InputKey, pressed: bool) {
        if self.keypad.handle_input(key, pressed) && self.keypad.raises_irq() {
            self.interrupts.raise(InterruptFlags::KEYPAD);
        }
    }

    /*
        Timed bus accesses. Every access advances the scheduler clock by the
        region's wait-states; 16 bit regions pay for two sub-accesses on
        word-wide transfers.
    */

    /// One internal cycle in which the bus is idle.
    #[inline]
    pub fn idle(&mut self) {
        self.scheduler.add_cycles(1);
    }

    pub fn read_word(&mut self, address: u32) -> u32 {
        self.add_wait(address, true);
        self.load_word(address & !3)
    }

    pub fn read_hword(&mut self, address: u32) -> u16 {
        self.add_wait(address, false);
        self.load_hword(address & !1)
    }

    pub fn read_byte(&mut self, address: u32) -> u8 {
        self.add_wait(address, false);
        self.load_byte(address)
    }

    /// Word read with the unaligned-access rotation the CPU observes:
    /// the aligned word rotated right by `8 * (address & 3)`.
    pub fn read_word_rotated(&mut self, address: u32) -> u32 {
        self.read_word(address).rotate_right((address & 3) * 8)
    }

    /// Halfword read with unaligned rotation, widened the way `LDRH` sees it.
    pub fn read_hword_rotated(&mut self, address: u32) -> u32 {
        (self.read_hword(address) as u32).rotate_right((address & 1) * 8)
    }

    pub fn write_word(&mut self, address: u32, value: u32) {
        self.add_wait(address, true);
        self.store_word(address & !3, value);
    }

    pub fn write_hword(&mut self, address: u32, value: u16) {
        self.add_wait(address, false);
        self.store_hword(address & !1, value);
    }

    pub fn write_byte(&mut self, address: u32, value: u8) {
        self.add_wait(address, false);
        self.store_byte(address, value);
    }

    /// Opcode fetch in ARM state. Updates the open bus latch.
    pub fn fetch_word(&mut self, address: u32) -> u32 {
        self.in_bios = address < BIOS_SIZE as u32;
        let value = self.read_word(address);
        self.open_bus = value;
        value
    }

    /// Opcode fetch in Thumb state. The 16 bit opcode occupies both halves
    /// of the open bus latch.
    pub fn fetch_hword(&mut self, address: u32) -> u16 {
        self.in_bios = address < BIOS_SIZE as u32;
        let value = self.read_hword(address);
        self.open_bus = (value as u32) * 0x0001_0001;
        value
    }

    /*
        Untimed reads for inspection tooling. These bypass the wait-state
        accounting entirely so a debugger peek never advances the clock.
    */

    pub fn debug_read_byte(&mut self, address: u32) -> u8 {
        self.load_byte(address)
    }

    pub fn debug_read_hword(&mut self, address: u32) -> u16 {
        self.load_hword(address & !1)
    }

    pub fn debug_read_word(&mut self, address: u32) -> u32 {
        self.load_word(address & !3)
    }

    fn add_wait(&mut self, address: u32, word: bool) {
        let cycles = match address >> 24 {
            // EWRAM: 2 wait-states on a 16 bit bus.
            0x02 => if word { 6 } else { 3 },
            // Palette RAM and VRAM: 16 bit bus, no wait-states.
            0x05 | 0x06 => if word { 2 } else { 1 },
            0x08..=0x0D => self.rom_wait(address, word),
            0x0E | 0x0F => 1 + self.waitcnt.sram_wait(),
            // BIOS, IWRAM, I/O, OAM: single cycle at any width.
            _ => 1,
        };
        self.scheduler.add_cycles(cycles);
    }

    fn rom_wait(&mut self, address: u32, word: bool) -> u64 {
        let region = (((address >> 24) - 8) / 2) as usize;
        let address = address & !1;
        let sequential = address == self.next_rom_addr;

        let mut cycles = 1 + if sequential {
            self.waitcnt.rom_sequential_wait(region)
        } else {
            self.waitcnt.rom_first_wait(region)
        };
        if word {
            // Second half of a 32 bit access is always sequential.
            cycles += 1 + self.waitcnt.rom_sequential_wait(region);
        }
        self.next_rom_addr = address + if word { 4 } else { 2 };
        cycles
    }

    /*
        Untimed loads/stores: pure region dispatch on the top address byte.
    */

    fn load_word(&mut self, address: u32) -> u32 {
        match address >> 24 {
            0x00 => self.read_bios(address, 4) as u32,
            0x02 => self.wram.read_board_word(address),
            0x03 => self.wram.read_chip_word(address),
            0x04 => {
                let low = self.read_io_hword(address);
                let high = self.read_io_hword(address + 2);
                (high as u32) << 16 | low as u32
            }
            0x05 => {
                (self.ppu.read_pram_hword(address + 2) as u32) << 16
                    | self.ppu.read_pram_hword(address) as u32
            }
            0x06 => {
                (self.ppu.read_vram_hword(address + 2) as u32) << 16
                    | self.ppu.read_vram_hword(address) as u32
            }
            0x07 => {
                (self.ppu.read_oam_hword(address + 2) as u32) << 16
                    | self.ppu.read_oam_hword(address) as u32
            }
            0x08..=0x0D => {
                if self.cartridge.is_eeprom_access(address) {
                    self.cartridge.read_eeprom() as u32
                } else {
                    self.cartridge.read_rom_word(address)
                }
            }
            0x0E | 0x0F => self.cartridge.read_sram(address) as u32 * 0x0101_0101,
            _ => self.open_bus(address),
        }
    }

    fn load_hword(&mut self, address: u32) -> u16 {
        match address >> 24 {
            0x00 => self.read_bios(address, 2) as u16,
            0x02 => self.wram.read_board_hword(address),
            0x03 => self.wram.read_chip_hword(address),
            0x04 => self.read_io_hword(address),
            0x05 => self.ppu.read_pram_hword(address),
            0x06 => self.ppu.read_vram_hword(address),
            0x07 => self.ppu.read_oam_hword(address),
            0x08..=0x0D => {
                if self.cartridge.is_eeprom_access(address) {
                    self.cartridge.read_eeprom()
                } else {
                    self.cartridge.read_rom_hword(address)
                }
            }
            0x0E | 0x0F => self.cartridge.read_sram(address) as u16 * 0x0101,
            _ => (self.open_bus(address) >> ((address & 2) * 8)) as u16,
        }
    }

    fn load_byte(&mut self, address: u32) -> u8 {
        match address >> 24 {
            0x00 => self.read_bios(address, 1) as u8,
            0x02 => self.wram.read_board(address),
            0x03 => self.wram.read_chip(address),
            0x04 => {
                let hword = self.read_io_hword(address & !1);
                (hword >> ((address & 1) * 8)) as u8
            }
            0x05 => self.ppu.read_pram(address),
            0x06 => self.ppu.read_vram(address),
            0x07 => self.ppu.read_oam(address),
            0x08..=0x0D => self.cartridge.read_rom(address),
            0x0E | 0x0F => self.cartridge.read_sram(address),
            _ => (self.open_bus(address) >> ((address & 3) * 8)) as u8,
        }
    }

    fn store_word(&mut self, address: u32, value: u32) {
        match address >> 24 {
            0x02 => self.wram.write_board_word(address, value),
            0x03 => self.wram.write_chip_word(address, value),
            0x04 => {
                self.write_io_hword(address, value as u16);
                self.write_io_hword(address + 2, (value >> 16) as u16);
            }
            0x05 => {
                self.ppu.write_pram_hword(address, value as u16);
                self.ppu.write_pram_hword(address + 2, (value >> 16) as u16);
            }
            0x06 => {
                self.ppu.write_vram_hword(address, value as u16);
                self.ppu.write_vram_hword(address + 2, (value >> 16) as u16);
            }
            0x07 => {
                self.ppu.write_oam_hword(address, value as u16);
                self.ppu.write_oam_hword(address + 2, (value >> 16) as u16);
            }
            0x08..=0x0D => self.store_rom_region_hword(address, value as u16),
            0x0E | 0x0F => self.cartridge.write_sram(address, value as u8),
            _ => trace!("Word write to unmapped memory: {:08X}", address),
        }
    }

    fn store_hword(&mut self, address: u32, value: u16) {
        match address >> 24 {
            0x02 => self.wram.write_board_hword(address, value),
            0x03 => self.wram.write_chip_hword(address, value),
            0x04 => self.write_io_hword(address, value),
            0x05 => self.ppu.write_pram_hword(address, value),
            0x06 => self.ppu.write_vram_hword(address, value),
            0x07 => self.ppu.write_oam_hword(address, value),
            0x08..=0x0D => self.store_rom_region_hword(address, value),
            0x0E | 0x0F => self.cartridge.write_sram(address, value as u8),
            _ => trace!("Halfword write to unmapped memory: {:08X}", address),
        }
    }

    fn store_byte(&mut self, address: u32, value: u8) {
        match address >> 24 {
            0x02 => self.wram.write_board(address, value),
            0x03 => self.wram.write_chip(address, value),
            0x04 => self.write_io_byte(address, value),
            0x05 => self.ppu.write_pram_byte(address, value),
            0x06 => self.ppu.write_vram_byte(address, value),
            // Byte writes to OAM are dropped.
            0x07 => {}
            0x08..=0x0D => {}
            0x0E | 0x0F => self.cartridge.write_sram(address, value),
            _ => trace!("Byte write to unmapped memory: {:08X}", address),
        }
    }

    fn store_rom_region_hword(&mut self, address: u32, value: u16) {
        if self.cartridge.is_eeprom_access(address) {
            self.cartridge.write_eeprom(value);
        }
    }

    fn read_bios(&mut self, address: u32, width: u32) -> u32 {
        if address as usize + width as usize > BIOS_SIZE {
            return self.open_bus(address);
        }
        if self.in_bios {
            let value = match width {
                1 => self.bios.rom[address as usize] as u32,
                2 => bytes::read_hword(&self.bios.rom, address as usize) as u32,
                _ => bytes::read_word(&self.bios.rom, address as usize),
            };
            self.bios.last_read = value;
            value
        } else {
            self.bios.last_read
        }
    }

    fn open_bus(&self, address: u32) -> u32 {
        trace!("Open bus read at {:08X}", address);
        self.open_bus
    }

    /*
        I/O register file
    */

    fn read_io_hword(&mut self, address: u32) -> u16 {
        let offset = address & 0x00FF_FFFE;
        if offset >= IO_SIZE as u32 {
            return (self.open_bus(address) >> ((address & 2) * 8)) as u16;
        }
        match offset {
            0x000 => self.ppu.dispcnt,
            0x004 => self.ppu.read_dispstat(),
            0x006 => self.ppu.vcount,
            0x082 => self.apu.read_soundcnt_h(),
            0x084 => self.apu.read_soundcnt_x(),
            0x088 => self.apu.read_soundbias(),
            0x0B0..=0x0DE => self.dma.read_register(offset - 0x0B0),
            0x100 | 0x104 | 0x108 | 0x10C => {
                let id = ((offset - 0x100) / 4) as usize;
                self.timers.read_counter(id, &self.scheduler)
            }
            0x102 | 0x106 | 0x10A | 0x10E => {
                let id = ((offset - 0x100) / 4) as usize;
                self.timers.read_control(id)
            }
            0x130 => self.keypad.keyinput(),
            0x132 => self.keypad.control,
            0x200 => self.interrupts.enable.bits(),
            0x202 => self.interrupts.flags.bits(),
            0x204 => self.waitcnt.bits(),
            0x208 => self.interrupts.master_enable as u16,
            0x300 => self.post_boot as u16,
            // Everything else reads back whatever was last written.
            _ => bytes::read_hword(&self.io_generic, offset as usize),
        }
    }

    fn write_io_hword(&mut self, address: u32, value: u16) {
        let offset = address & 0x00FF_FFFE;
        if offset >= IO_SIZE as u32 {
            return;
        }
        match offset {
            0x000 => self.ppu.dispcnt = value,
            0x004 => self.ppu.write_dispstat(value),
            // VCOUNT is read-only.
            0x006 => {}
            0x082 => self.apu.write_soundcnt_h(value),
            0x084 => self.apu.write_soundcnt_x(value),
            0x088 => self.apu.write_soundbias(value),
            0x0A0 | 0x0A2 => self.apu.push_fifo(false, &value.to_le_bytes()),
            0x0A4 | 0x0A6 => self.apu.push_fifo(true, &value.to_le_bytes()),
            0x0B0..=0x0DE => self.dma.write_register(offset - 0x0B0, value, &mut self.scheduler),
            0x100 | 0x104 | 0x108 | 0x10C => {
                let id = ((offset - 0x100) / 4) as usize;
                self.timers.write_reload(id, value);
            }
            0x102 | 0x106 | 0x10A | 0x10E => {
                let id = ((offset - 0x100) / 4) as usize;
                self.timers.write_control(id, value, &mut self.scheduler);
            }
            // KEYINPUT is read-only.
            0x130 => {}
            0x132 => {
                self.keypad.write_control(value);
                if self.keypad.raises_irq() {
                    self.interrupts.raise(InterruptFlags::KEYPAD);
                }
            }
            0x200 => self.interrupts.write_ie(value),
            0x202 => self.interrupts.write_if(value),
            0x204 => self.waitcnt.write(value),
            0x208 => self.interrupts.write_ime(value),
            0x300 => {
                self.post_boot = (value & 1) as u8;
                self.write_haltcnt((value >> 8) as u8);
            }
            _ => bytes::write_hword(&mut self.io_generic, offset as usize, value),
        }
    }

    fn write_io_byte(&mut self, address: u32, value: u8) {
        let offset = address & 0x00FF_FFFF;
        match offset {
            // IF is write-one-to-clear; a read-modify-write would wipe
            // unrelated pending bits, so handle the bytes directly.
            0x202 => self.interrupts.write_if(value as u16),
            0x203 => self.interrupts.write_if((value as u16) << 8),
            0x0A0..=0x0A3 => self.apu.push_fifo(false, &[value]),
            0x0A4..=0x0A7 => self.apu.push_fifo(true, &[value]),
            // Timer reload registers: a read-modify-write cycle would mix in
            // the live counter value, so patch the reload directly.
            0x100 | 0x101 | 0x104 | 0x105 | 0x108 | 0x109 | 0x10C | 0x10D => {
                let id = ((offset - 0x100) / 4) as usize;
                let current = self.timers.reload(id);
                let new_value = if offset & 1 == 0 {
                    (current & 0xFF00) | value as u16
                } else {
                    (current & 0x00FF) | ((value as u16) << 8)
                };
                self.timers.write_reload(id, new_value);
            }
            0x300 => self.post_boot = value & 1,
            0x301 => self.write_haltcnt(value),
            _ => {
                let current = self.read_io_hword(address & !1);
                let new_value = if address & 1 == 0 {
                    (current & 0xFF00) | value as u16
                } else {
                    (current & 0x00FF) | ((value as u16) << 8)
                };
                self.write_io_hword(address & !1, new_value);
            }
        }
    }

    fn write_haltcnt(&mut self, value: u8) {
        self.halt_state = if value & 0x80 != 0 {
            info!("CPU entered stop mode");
            HaltState::Stopped
        } else {
            HaltState::Halted
        };
    }

    /*
        Event dispatch
    */

    /// Fire every event that has come due. The clock is rewound to each
    /// event's own timestamp before its handler runs, so handlers observe
    /// consistent timing regardless of how far the CPU overshot.
    pub fn tick_events(&mut self) {
        let mut horizon = self.scheduler.current_time;
        while let Some(event) = self.scheduler.pop_due(horizon) {
            self.scheduler.current_time = event.timestamp;
            match event.event_type {
                EventType::HBlankStart => {
                    let line = self.ppu.vcount;
                    self.ppu.hblank_start(&mut self.interrupts);
                    if line < ppu::VBLANK_LINE {
                        self.dma.trigger(StartTiming::HBlank);
                    }
                    // Video capture runs on lines 2..=161.
                    if (2..162).contains(&line) {
                        self.dma.trigger_video_capture();
                    }
                    self.scheduler.push_relative(EventType::HBlankStart, ppu::SCANLINE_CYCLES);
                }
                EventType::ScanlineEnd => {
                    if self.ppu.scanline_end(&mut self.interrupts) {
                        self.dma.trigger(StartTiming::VBlank);
                    }
                    self.scheduler.push_relative(EventType::ScanlineEnd, ppu::SCANLINE_CYCLES);
                }
                EventType::ApuSample => {
                    self.apu.sample();
                    let period = self.apu.cycles_per_sample();
                    self.scheduler.push_relative(EventType::ApuSample, period);
                }
                EventType::Timer0Overflow => self.handle_timer_overflow(0),
                EventType::Timer1Overflow => self.handle_timer_overflow(1),
                EventType::Timer2Overflow => self.handle_timer_overflow(2),
                EventType::Timer3Overflow => self.handle_timer_overflow(3),
                EventType::Dma0Activate => self.dma.channels[0].pending = true,
                EventType::Dma1Activate => self.dma.channels[1].pending = true,
                EventType::Dma2Activate => self.dma.channels[2].pending = true,
                EventType::Dma3Activate => self.dma.channels[3].pending = true,
            }
            // Transfers run here, between events and with the CPU stalled.
            self.service_dma();
            horizon = horizon.max(self.scheduler.current_time);
        }
        self.scheduler.current_time = horizon;
    }

    fn handle_timer_overflow(&mut self, id: usize) {
        let overflowed = self
            .timers
            .handle_overflow(id, &mut self.scheduler, &mut self.interrupts);

        for &timer in overflowed.iter() {
            let timer = timer as usize;
            if self.apu.timer_source_a() == timer && self.apu.timer_overflowed(false) {
                self.dma.trigger_fifo(1);
            }
            if self.apu.timer_source_b() == timer && self.apu.timer_overflowed(true) {
                self.dma.trigger_fifo(2);
            }
        }
    }

    /// Run every armed DMA channel to completion, highest priority first.
    /// A transfer that arms a higher priority channel yields to it before
    /// its next trigger, never mid-flight.
    fn service_dma(&mut self) {
        while let Some(channel) = self.dma.highest_pending() {
            self.perform_dma(channel);
        }
    }

    fn perform_dma(&mut self, channel: usize) {
        let ch = self.dma.channels[channel];
        let fifo = ch.fifo_mode;
        let word = ch.word_transfer() || fifo;
        let count = if fifo { 4 } else { ch.internal_count() };
        let mut src = ch.internal_src();
        let mut dst = ch.internal_dst();

        let unit: u32 = if word { 4 } else { 2 };
        let src_step = address_step(ch.src_mode(), unit);
        let dst_step = if fifo { 0 } else { address_step(ch.dst_mode(), unit) };

        // An EEPROM-bound burst tells us the chip's address width.
        if self.cartridge.is_eeprom_access(dst) {
            self.cartridge.observe_eeprom_burst(count);
        }

        trace!(
            "DMA{}: {:08X} -> {:08X}, {} x {} bytes",
            channel, src, dst, count, unit
        );

        self.idle();
        self.idle();
        for _ in 0..count {
            if word {
                let value = self.read_word(src & !3);
                self.write_word(dst & !3, value);
            } else {
                let value = self.read_hword(src & !1);
                self.write_hword(dst & !1, value);
            }
            src = src.wrapping_add(src_step);
            dst = dst.wrapping_add(dst_step);
        }

        if self.dma.complete(channel, src, dst) {
            self.interrupts.raise(InterruptFlags::dma(channel));
        }
    }

    /*
        Save states: everything mutable is serialised, the ROM and BIOS
        images are not and stay attached across a restore.
    */

    pub(crate) fn ser_state(&self, output: &mut Vec<u8>) {
        self.wram.ser_bin(output);
        self.ppu.ser_bin(output);
        self.apu.ser_bin(output);
        self.dma.ser_bin(output);
        self.timers.ser_bin(output);
        self.interrupts.ser_bin(output);
        self.keypad.ser_bin(output);
        self.waitcnt.ser_bin(output);
        self.cartridge.save.ser_bin(output);
        self.scheduler.ser_bin(output);
        (self.halt_state == HaltState::Halted).ser_bin(output);
        (self.halt_state == HaltState::Stopped).ser_bin(output);
        self.post_boot.ser_bin(output);
        self.io_generic.ser_bin(output);
        self.next_rom_addr.ser_bin(output);
        self.open_bus.ser_bin(output);
        self.in_bios.ser_bin(output);
        self.bios.last_read.ser_bin(output);
    }

    pub(crate) fn de_state(&mut self, offset: &mut usize, bytes: &[u8]) -> Result<(), DeBinErr> {
        self.wram = DeBin::de_bin(offset, bytes)?;
        self.ppu = DeBin::de_bin(offset, bytes)?;
        self.apu = DeBin::de_bin(offset, bytes)?;
        self.dma = DeBin::de_bin(offset, bytes)?;
        self.timers = DeBin::de_bin(offset, bytes)?;
        self.interrupts = DeBin::de_bin(offset, bytes)?;
        self.keypad = DeBin::de_bin(offset, bytes)?;
        self.waitcnt = DeBin::de_bin(offset, bytes)?;
        self.cartridge.save = DeBin::de_bin(offset, bytes)?;
        self.scheduler = DeBin::de_bin(offset, bytes)?;
        let halted = bool::de_bin(offset, bytes)?;
        let stopped = bool::de_bin(offset, bytes)?;
        self.halt_state = match (halted, stopped) {
            (_, true) => HaltState::Stopped,
            (true, _) => HaltState::Halted,
            _ => HaltState::Running,
        };
        self.post_boot = DeBin::de_bin(offset, bytes)?;
        self.io_generic = DeBin::de_bin(offset, bytes)?;
        self.next_rom_addr = DeBin::de_bin(offset, bytes)?;
        self.open_bus = DeBin::de_bin(offset, bytes)?;
        self.in_bios = DeBin::de_bin(offset, bytes)?;
        self.bios.last_read = DeBin::de_bin(offset, bytes)?;
        Ok(())
    }
}

fn address_step(mode: u16, unit: u32) -> u32 {
    match mode {
        1 => unit.wrapping_neg(),
        2 => 0,
        // Increment, and increment-reload for destinations.
        _ => unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmulatorOptionsBuilder;

    pub fn test_memory() -> Memory {
        let mut rom = vec![0u8; 0x8000];
        // A recognisable halfword pattern across the first KB of ROM.
        for i in 0..0x200 {
            bytes::write_hword(&mut rom, i * 2, 0xC000 | i as u16);
        }
        rom[0x200..0x209].copy_from_slice(b"SRAM_V113");
        let cartridge = Cartridge::new(&rom, None).unwrap();
        let options = EmulatorOptionsBuilder::new().boot_bios(false).build();
        Memory::new(cartridge, &options).unwrap()
    }

    #[test]
    fn test_aligned_round_trips() {
        let mut memory = test_memory();
        memory.write_word(0x0200_0010, 0xDEAD_BEEF);
        assert_eq!(memory.read_word(0x0200_0010), 0xDEAD_BEEF);

        memory.write_hword(0x0300_0020, 0xCAFE);
        assert_eq!(memory.read_hword(0x0300_0020), 0xCAFE);

        memory.write_byte(0x0300_0031, 0x42);
        assert_eq!(memory.read_byte(0x0300_0031), 0x42);
    }

    #[test]
    fn test_unaligned_reads_rotate() {
        let mut memory = test_memory();
        memory.write_word(0x0300_0000, 0x1122_3344);

        assert_eq!(memory.read_word_rotated(0x0300_0001), 0x4411_2233);
        assert_eq!(memory.read_word_rotated(0x0300_0002), 0x3344_1122);
        // LDRH semantics: the aligned halfword 0x3344 rotated right by 8.
        assert_eq!(memory.read_hword_rotated(0x0300_0001), 0x4400_0033);
    }

    #[test]
    fn test_unaligned_writes_round_down() {
        let mut memory = test_memory();
        memory.write_word(0x0300_0042, 0x5566_7788);
        assert_eq!(memory.read_word(0x0300_0040), 0x5566_7788);
    }

    #[test]
    fn test_sram_has_a_byte_wide_bus() {
        let mut memory = test_memory();
        memory.write_byte(0x0E00_0000, 0x5A);
        assert_eq!(memory.read_hword(0x0E00_0000), 0x5A5A);
        assert_eq!(memory.read_word(0x0E00_0000), 0x5A5A_5A5A);
    }

    #[test]
    fn test_open_bus_returns_last_fetch() {
        let mut memory = test_memory();
        let opcode = memory.fetch_word(0x0800_0000);
        assert_eq!(memory.read_word(0x1000_0000), opcode);

        // Thumb fetches duplicate into both halves.
        let opcode = memory.fetch_hword(0x0800_0010) as u32;
        assert_eq!(memory.read_word(0x1000_0000), opcode << 16 | opcode);
    }

    #[test]
    fn test_bios_reads_blocked_from_outside() {
        let mut memory = test_memory();
        // Executing from ROM: BIOS data reads return the last BIOS fetch (0 initially).
        memory.fetch_word(0x0800_0000);
        assert_eq!(memory.read_word(0x0000_0000), 0);
    }

    #[test]
    fn test_unmapped_io_reads_last_written() {
        let mut memory = test_memory();
        // SIODATA8, nothing implements it.
        memory.write_hword(0x0400_012A, 0xBEEF);
        assert_eq!(memory.read_hword(0x0400_012A), 0xBEEF);
    }

    #[test]
    fn test_ewram_wait_states() {
        let mut memory = test_memory();
        let start = memory.scheduler.current_time;
        memory.read_hword(0x0200_0000);
        assert_eq!(memory.scheduler.current_time - start, 3);

        let start = memory.scheduler.current_time;
        memory.read_word(0x0200_0000);
        assert_eq!(memory.scheduler.current_time - start, 6);
    }

    #[test]
    fn test_rom_sequential_accounting() {
        let mut memory = test_memory();
        // Default WS0: 4 first, 2 sequential.
        let start = memory.scheduler.current_time;
        memory.read_hword(0x0800_0000);
        assert_eq!(memory.scheduler.current_time - start, 5);

        // The follow-up halfword is sequential.
        let start = memory.scheduler.current_time;
        memory.read_hword(0x0800_0002);
        assert_eq!(memory.scheduler.current_time - start, 3);

        // A jump elsewhere is non-sequential again.
        let start = memory.scheduler.current_time;
        memory.read_hword(0x0800_0100);
        assert_eq!(memory.scheduler.current_time - start, 5);
    }

    #[test]
    fn test_oam_byte_writes_ignored() {
        let mut memory = test_memory();
        memory.write_hword(0x0700_0000, 0x1234);
        memory.write_byte(0x0700_0000, 0xFF);
        assert_eq!(memory.read_hword(0x0700_0000), 0x1234);
    }

    #[test]
    fn test_immediate_dma_copies_and_disables() {
        let mut memory = test_memory();
        for i in 0..0x100u32 {
            memory.write_word(0x0200_0000 + i * 4, 0xA000_0000 | i);
        }

        // DMA0: 0x02000000 -> 0x03000000, 0x100 words, immediate, IRQ.
        memory.interrupts.write_ie(InterruptFlags::DMA0.bits());
        memory.write_hword(0x0400_00B0, 0x0000);
        memory.write_hword(0x0400_00B2, 0x0200);
        memory.write_hword(0x0400_00B4, 0x0000);
        memory.write_hword(0x0400_00B6, 0x0300);
        memory.write_hword(0x0400_00B8, 0x0100);
        memory.write_hword(0x0400_00BA, 0xC400);

        // The transfer starts a couple of cycles later, between instructions.
        memory.idle();
        memory.idle();
        memory.tick_events();

        for i in 0..0x100u32 {
            assert_eq!(memory.read_word(0x0300_0000 + i * 4), 0xA000_0000 | i);
        }
        // Enable bit cleared, completion IRQ raised.
        assert_eq!(memory.read_hword(0x0400_00BA) & 0x8000, 0);
        assert!(memory.interrupts.flags.contains(InterruptFlags::DMA0));
    }

    #[test]
    fn test_timer_overflow_drives_fifo_refill() {
        let mut memory = test_memory();
        // Direct sound A fed by timer 0, both sides enabled.
        memory.write_hword(0x0400_0082, 0x0300);
        // 17 bytes in the FIFO: the next pop reaches the refill threshold.
        for _ in 0..4 {
            memory.write_word(0x0400_00A0, 0x0102_0304);
        }
        memory.write_byte(0x0400_00A0, 0x05);
        assert_eq!(memory.apu.fifo_len(false), 17);

        // DMA1 armed for special timing: fixed destination FIFO_A.
        memory.write_hword(0x0400_00BC, 0x0000);
        memory.write_hword(0x0400_00BE, 0x0200);
        memory.write_hword(0x0400_00C0, 0x00A0);
        memory.write_hword(0x0400_00C2, 0x0400);
        memory.write_hword(0x0400_00C6, 0xB600);

        // Timer 0 overflows 16 prescaler ticks after enabling.
        memory.write_hword(0x0400_0100, 0xFFF0);
        memory.write_hword(0x0400_0102, 0x0080);

        while memory.scheduler.current_time < 64 {
            memory.idle();
        }
        memory.tick_events();

        // One sample popped, then the DMA refilled four words.
        assert_eq!(memory.apu.fifo_len(false), 32);
    }

    #[test]
    fn test_if_byte_write_does_not_clobber_other_half() {
        let mut memory = test_memory();
        memory.interrupts.raise(InterruptFlags::VBLANK | InterruptFlags::KEYPAD);

        // Acknowledge only VBLANK via a byte write to the low half of IF.
        memory.write_byte(0x0400_0202, 0x01);
        assert_eq!(memory.interrupts.flags, InterruptFlags::KEYPAD);
    }
}
