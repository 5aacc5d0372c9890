use crate::hardware::bytes;
use crate::io::interrupts::{InterruptFlags, Interrupts};
use nanoserde::{DeBin, SerBin};
use once_cell::sync::Lazy;

pub const DISPLAY_WIDTH: usize = 240;
pub const DISPLAY_HEIGHT: usize = 160;
pub const FRAMEBUFFER_SIZE: usize = DISPLAY_WIDTH * DISPLAY_HEIGHT;

pub const PRAM_SIZE: usize = 0x400;
pub const VRAM_SIZE: usize = 0x1_8000;
pub const OAM_SIZE: usize = 0x400;

/// Cycle layout of a scanline: 960 visible, 272 blanking, 1232 total.
pub const HDRAW_CYCLES: u64 = 960;
pub const HBLANK_CYCLES: u64 = 272;
pub const SCANLINE_CYCLES: u64 = HDRAW_CYCLES + HBLANK_CYCLES;
/// 160 visible lines followed by 68 blanking lines.
pub const VBLANK_LINE: u16 = 160;
pub const LINES_PER_FRAME: u16 = 228;

/// `DISPSTAT` flag bits (the rest of the register is writable state).
const STAT_VBLANK: u16 = 0x0001;
const STAT_HBLANK: u16 = 0x0002;
const STAT_VCOUNT: u16 = 0x0004;
const STAT_VBLANK_IRQ: u16 = 0x0008;
const STAT_HBLANK_IRQ: u16 = 0x0010;
const STAT_VCOUNT_IRQ: u16 = 0x0020;

/// BGR555 to opaque XRGB8888, built once and shared by every emulator instance.
static COLOR_LUT: Lazy<Vec<u32>> = Lazy::new(|| {
    (0u32..0x8000)
        .map(|bgr| {
            let expand = |c: u32| (c << 3) | (c >> 2);
            let r = expand(bgr & 0x1F);
            let g = expand((bgr >> 5) & 0x1F);
            let b = expand((bgr >> 10) & 0x1F);
            0xFF00_0000 | (r << 16) | (g << 8) | b
        })
        .collect()
});

/// The pixel processing unit, at the level the rest of the machine observes
/// it: exact line/frame timing, `DISPSTAT`/`VCOUNT` semantics, the three
/// video interrupt sources, and a BGR555 screen surface. Rendering itself
/// covers the bitmap modes; the tile modes fall back to the backdrop colour.
#[derive(Debug, Clone, SerBin, DeBin)]
pub struct Ppu {
    pub dispcnt: u16,
    dispstat: u16,
    pub vcount: u16,
    pram: Vec<u8>,
    vram: Vec<u8>,
    oam: Vec<u8>,
    /// 240x160 BGR555 pixels, row major.
    pub screen: Vec<u16>,
    pub frame_complete: bool,
}

impl Ppu {
    pub fn new() -> Self {
        Ppu {
            dispcnt: 0x0080,
            dispstat: 0,
            vcount: 0,
            pram: vec![0; PRAM_SIZE],
            vram: vec![0; VRAM_SIZE],
            oam: vec![0; OAM_SIZE],
            screen: vec![0; FRAMEBUFFER_SIZE],
            frame_complete: false,
        }
    }

    /*
        Register interface
    */

    pub fn read_dispstat(&self) -> u16 {
        self.dispstat
    }

    pub fn write_dispstat(&mut self, value: u16) {
        // The three status flags in the low bits are owned by the PPU.
        self.dispstat = (self.dispstat & 0x0007) | (value & 0xFF38);
    }

    fn vcount_setting(&self) -> u16 {
        self.dispstat >> 8
    }

    fn forced_blank(&self) -> bool {
        self.dispcnt & 0x0080 != 0
    }

    /*
        Scanline state machine, driven by the scheduler through `Memory`.
    */

    /// Cycle 960 of a line: the visible part is done.
    pub fn hblank_start(&mut self, interrupts: &mut Interrupts) {
        if self.vcount < VBLANK_LINE {
            self.render_scanline();
        }
        self.dispstat |= STAT_HBLANK;
        if self.dispstat & STAT_HBLANK_IRQ != 0 {
            interrupts.raise(InterruptFlags::HBLANK);
        }
    }

    /// Cycle 1232: step to the next line. Returns `true` when this
    /// transition enters the vertical blank.
    pub fn scanline_end(&mut self, interrupts: &mut Interrupts) -> bool {
        self.dispstat &= !STAT_HBLANK;
        self.vcount += 1;
        if self.vcount == LINES_PER_FRAME {
            self.vcount = 0;
        }

        let mut vblank_started = false;
        match self.vcount {
            VBLANK_LINE => {
                self.dispstat |= STAT_VBLANK;
                self.frame_complete = true;
                vblank_started = true;
                if self.dispstat & STAT_VBLANK_IRQ != 0 {
                    interrupts.raise(InterruptFlags::VBLANK);
                }
            }
            // The flag drops one line before the frame wraps.
            227 => self.dispstat &= !STAT_VBLANK,
            _ => {}
        }

        if self.vcount == self.vcount_setting() {
            self.dispstat |= STAT_VCOUNT;
            if self.dispstat & STAT_VCOUNT_IRQ != 0 {
                interrupts.raise(InterruptFlags::VCOUNT);
            }
        } else {
            self.dispstat &= !STAT_VCOUNT;
        }

        vblank_started
    }

    /*
        Rendering
    */

    fn backdrop(&self) -> u16 {
        bytes::read_hword(&self.pram, 0) & 0x7FFF
    }

    fn render_scanline(&mut self) {
        let line = self.vcount as usize;
        let start = line * DISPLAY_WIDTH;

        if self.forced_blank() {
            for pixel in &mut self.screen[start..start + DISPLAY_WIDTH] {
                *pixel = 0x7FFF;
            }
            return;
        }

        let mode = self.dispcnt & 0x7;
        let bg2_enabled = self.dispcnt & 0x0400 != 0;
        let frame_base = if self.dispcnt & 0x0010 != 0 { 0xA000 } else { 0 };
        let backdrop = self.backdrop();

        for x in 0..DISPLAY_WIDTH {
            let pixel = match mode {
                3 if bg2_enabled => {
                    bytes::read_hword(&self.vram, (start + x) * 2) & 0x7FFF
                }
                4 if bg2_enabled => {
                    let index = self.vram[frame_base + start + x] as usize;
                    bytes::read_hword(&self.pram, index * 2) & 0x7FFF
                }
                5 if bg2_enabled && x < 160 && line < 128 => {
                    bytes::read_hword(&self.vram, frame_base + (line * 160 + x) * 2) & 0x7FFF
                }
                // Tile modes render the backdrop only; outside the core contract.
                _ => backdrop,
            };
            self.screen[start + x] = pixel;
        }
    }

    /*
        Memory regions owned by the PPU
    */

    /// VRAM is 96 KB mirrored into a 128 KB slot: the upper 32 KB window maps
    /// back onto the object tile area.
    fn vram_offset(address: u32) -> usize {
        let offset = (address as usize) & 0x1_FFFF;
        if offset >= VRAM_SIZE {
            offset - 0x8000
        } else {
            offset
        }
    }

    pub fn read_pram(&self, address: u32) -> u8 {
        self.pram[address as usize & (PRAM_SIZE - 1)]
    }

    pub fn read_pram_hword(&self, address: u32) -> u16 {
        bytes::read_hword(&self.pram, address as usize & (PRAM_SIZE - 2))
    }

    /// Byte writes to palette RAM land as the byte duplicated onto both
    /// halves of the containing halfword.
    pub fn write_pram_byte(&mut self, address: u32, value: u8) {
        self.write_pram_hword(address, value as u16 * 0x0101);
    }

    pub fn write_pram_hword(&mut self, address: u32, value: u16) {
        bytes::write_hword(&mut self.pram, address as usize & (PRAM_SIZE - 2), value);
    }

    pub fn read_vram(&self, address: u32) -> u8 {
        self.vram[Self::vram_offset(address)]
    }

    pub fn read_vram_hword(&self, address: u32) -> u16 {
        bytes::read_hword(&self.vram, Self::vram_offset(address & !1))
    }

    /// Byte writes to the background area duplicate like palette RAM; byte
    /// writes to the object tile area are dropped entirely.
    pub fn write_vram_byte(&mut self, address: u32, value: u8) {
        let offset = Self::vram_offset(address & !1);
        if offset < 0x1_0000 {
            bytes::write_hword(&mut self.vram, offset, value as u16 * 0x0101);
        }
    }

    pub fn write_vram_hword(&mut self, address: u32, value: u16) {
        bytes::write_hword(&mut self.vram, Self::vram_offset(address & !1), value);
    }

    pub fn read_oam(&self, address: u32) -> u8 {
        self.oam[address as usize & (OAM_SIZE - 1)]
    }

    pub fn read_oam_hword(&self, address: u32) -> u16 {
        bytes::read_hword(&self.oam, address as usize & (OAM_SIZE - 2))
    }

    pub fn write_oam_hword(&mut self, address: u32, value: u16) {
        bytes::write_hword(&mut self.oam, address as usize & (OAM_SIZE - 2), value);
    }
}

/// Convert the BGR555 screen into XRGB8888 for the host, optionally running
/// the mild desaturating colour filter that mimics the original LCD.
pub fn convert_screen(screen: &[u16], output: &mut [u32], color_filter: bool) {
    if !color_filter {
        for (out, &pixel) in output.iter_mut().zip(screen) {
            *out = COLOR_LUT[(pixel & 0x7FFF) as usize];
        }
        return;
    }

    for (out, &pixel) in output.iter_mut().zip(screen) {
        let raw = COLOR_LUT[(pixel & 0x7FFF) as usize];
        let (r, g, b) = ((raw >> 16) & 0xFF, (raw >> 8) & 0xFF, raw & 0xFF);
        // Bleed a quarter of the other channels in and darken slightly.
        let filtered_r = (r * 3 + g) / 4;
        let filtered_g = (g * 3 + b) / 4;
        let filtered_b = (b * 3 + r) / 4;
        *out = 0xFF00_0000 | (filtered_r << 16) | (filtered_g << 8) | filtered_b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vram_mirror_wraps_object_area() {
        assert_eq!(Ppu::vram_offset(0x0601_8000), 0x1_0000);
        assert_eq!(Ppu::vram_offset(0x0601_FFFF), 0x1_7FFF);
        assert_eq!(Ppu::vram_offset(0x0602_0000), 0x0);
    }

    #[test]
    fn test_pram_byte_write_duplicates() {
        let mut ppu = Ppu::new();
        ppu.write_pram_byte(0x0500_0001, 0x3C);
        assert_eq!(ppu.read_pram_hword(0x0500_0000), 0x3C3C);
    }

    #[test]
    fn test_vram_object_byte_write_ignored() {
        let mut ppu = Ppu::new();
        ppu.write_vram_byte(0x0601_2000, 0xAA);
        assert_eq!(ppu.read_vram_hword(0x0601_2000), 0);

        ppu.write_vram_byte(0x0600_0100, 0xAA);
        assert_eq!(ppu.read_vram_hword(0x0600_0100), 0xAAAA);
    }

    #[test]
    fn test_vblank_transition_raises_irq() {
        let mut ppu = Ppu::new();
        let mut interrupts = Interrupts::default();
        ppu.write_dispstat(STAT_VBLANK_IRQ);
        ppu.vcount = 159;

        assert!(ppu.scanline_end(&mut interrupts));
        assert_eq!(ppu.vcount, 160);
        assert_ne!(ppu.read_dispstat() & STAT_VBLANK, 0);
        assert!(interrupts.flags.contains(InterruptFlags::VBLANK));
        assert!(ppu.frame_complete);
    }

    #[test]
    fn test_vcount_match() {
        let mut ppu = Ppu::new();
        let mut interrupts = Interrupts::default();
        ppu.write_dispstat(STAT_VCOUNT_IRQ | (42 << 8));
        ppu.vcount = 41;

        ppu.scanline_end(&mut interrupts);
        assert_ne!(ppu.read_dispstat() & STAT_VCOUNT, 0);
        assert!(interrupts.flags.contains(InterruptFlags::VCOUNT));

        ppu.scanline_end(&mut interrupts);
        assert_eq!(ppu.read_dispstat() & STAT_VCOUNT, 0);
    }

    #[test]
    fn test_mode3_scanline() {
        let mut ppu = Ppu::new();
        // Mode 3, BG2 on, no forced blank.
        ppu.dispcnt = 0x0403;
        ppu.vcount = 0;
        ppu.write_vram_hword(0x0600_0000, 0x7C1F);

        ppu.render_scanline();
        assert_eq!(ppu.screen[0], 0x7C1F);
    }
}
