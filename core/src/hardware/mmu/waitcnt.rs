use nanoserde::{DeBin, SerBin};

/// First-access wait-states selectable for SRAM and the three ROM mirrors.
const FIRST_ACCESS: [u64; 4] = [4, 3, 2, 8];
/// Sequential-access wait-states per ROM wait-state region.
const SEQUENTIAL_ACCESS: [[u64; 2]; 3] = [[2, 1], [4, 1], [8, 1]];

/// The `WAITCNT` register: a plain backing integer with named accessors,
/// the wire layout stays exactly as the hardware defines it.
#[derive(Debug, Default, Clone, Copy, SerBin, DeBin)]
pub struct WaitControl {
    raw: u16,
}

impl WaitControl {
    pub fn bits(self) -> u16 {
        self.raw
    }

    pub fn write(&mut self, value: u16) {
        // Bit 15 (game pak type) is read-only.
        self.raw = value & 0x5FFF;
    }

    /// Wait-states for an SRAM access.
    pub fn sram_wait(self) -> u64 {
        FIRST_ACCESS[(self.raw & 0x3) as usize]
    }

    /// Wait-states for a non-sequential 16 bit access to ROM mirror `region` (0..3).
    pub fn rom_first_wait(self, region: usize) -> u64 {
        let select = (self.raw >> (2 + region * 3)) & 0x3;
        FIRST_ACCESS[select as usize]
    }

    /// Wait-states for a sequential 16 bit access to ROM mirror `region` (0..3).
    pub fn rom_sequential_wait(self, region: usize) -> u64 {
        let select = (self.raw >> (4 + region * 3)) & 0x1;
        SEQUENTIAL_ACCESS[region][select as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_wait_states() {
        let waitcnt = WaitControl::default();
        assert_eq!(waitcnt.sram_wait(), 4);
        assert_eq!(waitcnt.rom_first_wait(0), 4);
        assert_eq!(waitcnt.rom_sequential_wait(0), 2);
        assert_eq!(waitcnt.rom_sequential_wait(1), 4);
        assert_eq!(waitcnt.rom_sequential_wait(2), 8);
    }

    #[test]
    fn test_common_game_setting() {
        // 0x4317 is the configuration most commercial games program:
        // SRAM 8 waits, WS0 3/1, WS1 4/4, WS2 8/8 with prefetch on.
        let mut waitcnt = WaitControl::default();
        waitcnt.write(0x4317);

        assert_eq!(waitcnt.sram_wait(), 8);
        assert_eq!(waitcnt.rom_first_wait(0), 3);
        assert_eq!(waitcnt.rom_sequential_wait(0), 1);
    }
}
