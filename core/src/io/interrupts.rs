use bitflags::*;
use nanoserde::{DeBin, DeBinErr, SerBin};

bitflags! {
    #[derive(Default)]
    pub struct InterruptFlags: u16 {
        /// V-Blank
        const VBLANK  = 0b0000_0000_0000_0001;
        /// H-Blank
        const HBLANK  = 0b0000_0000_0000_0010;
        /// V-Counter match
        const VCOUNT  = 0b0000_0000_0000_0100;
        /// Timer 0 overflow
        const TIMER0  = 0b0000_0000_0000_1000;
        /// Timer 1 overflow
        const TIMER1  = 0b0000_0000_0001_0000;
        /// Timer 2 overflow
        const TIMER2  = 0b0000_0000_0010_0000;
        /// Timer 3 overflow
        const TIMER3  = 0b0000_0000_0100_0000;
        /// Serial communication
        const SERIAL  = 0b0000_0000_1000_0000;
        /// DMA 0
        const DMA0    = 0b0000_0001_0000_0000;
        /// DMA 1
        const DMA1    = 0b0000_0010_0000_0000;
        /// DMA 2
        const DMA2    = 0b0000_0100_0000_0000;
        /// DMA 3
        const DMA3    = 0b0000_1000_0000_0000;
        /// Keypad
        const KEYPAD  = 0b0001_0000_0000_0000;
        /// Game Pak (external IRQ line)
        const GAMEPAK = 0b0010_0000_0000_0000;
    }
}

impl InterruptFlags {
    pub fn timer(id: usize) -> InterruptFlags {
        InterruptFlags::from_bits_truncate(InterruptFlags::TIMER0.bits() << id)
    }

    pub fn dma(channel: usize) -> InterruptFlags {
        InterruptFlags::from_bits_truncate(InterruptFlags::DMA0.bits() << channel)
    }
}

/// The `IE`/`IF`/`IME` register block.
///
/// `IF` bits are sticky: once a device raises one it stays set until the CPU
/// acknowledges it by writing a `1` to that bit.
#[derive(Debug, Default, Clone)]
pub struct Interrupts {
    pub master_enable: bool,
    pub enable: InterruptFlags,
    pub flags: InterruptFlags,
}

impl Interrupts {
    /// Raise the given interrupt line(s) in `IF`.
    pub fn raise(&mut self, interrupt: InterruptFlags) {
        self.flags.insert(interrupt);
    }

    pub fn write_ie(&mut self, value: u16) {
        self.enable = InterruptFlags::from_bits_truncate(value);
    }

    /// `IF` writes acknowledge: every set bit in `value` is cleared.
    pub fn write_if(&mut self, value: u16) {
        self.flags.remove(InterruptFlags::from_bits_truncate(value));
    }

    pub fn write_ime(&mut self, value: u16) {
        self.master_enable = value & 0x1 != 0;
    }

    /// Whether the CPU should take an IRQ, assuming its own I flag allows it.
    #[inline]
    pub fn pending(&self) -> bool {
        self.master_enable && !(self.enable & self.flags).is_empty()
    }

    /// Whether a halted CPU should wake up. Note that `IME` is irrelevant here.
    #[inline]
    pub fn halt_wake(&self) -> bool {
        !(self.enable & self.flags).is_empty()
    }
}

impl SerBin for Interrupts {
    fn ser_bin(&self, output: &mut Vec<u8>) {
        self.master_enable.ser_bin(output);
        self.enable.bits().ser_bin(output);
        self.flags.bits().ser_bin(output);
    }
}

impl DeBin for Interrupts {
    fn de_bin(offset: &mut usize, bytes: &[u8]) -> Result<Self, DeBinErr> {
        Ok(Interrupts {
            master_enable: bool::de_bin(offset, bytes)?,
            enable: InterruptFlags::from_bits_truncate(u16::de_bin(offset, bytes)?),
            flags: InterruptFlags::from_bits_truncate(u16::de_bin(offset, bytes)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_if_is_write_one_to_clear() {
        let mut interrupts = Interrupts::default();
        interrupts.raise(InterruptFlags::VBLANK | InterruptFlags::TIMER2);

        // Writing an unrelated bit leaves the pending ones alone.
        interrupts.write_if(InterruptFlags::HBLANK.bits());
        assert_eq!(interrupts.flags, InterruptFlags::VBLANK | InterruptFlags::TIMER2);

        interrupts.write_if(InterruptFlags::VBLANK.bits());
        assert_eq!(interrupts.flags, InterruptFlags::TIMER2);
    }

    #[test]
    fn test_pending_requires_master_enable() {
        let mut interrupts = Interrupts::default();
        interrupts.write_ie(InterruptFlags::VBLANK.bits());
        interrupts.raise(InterruptFlags::VBLANK);

        assert!(!interrupts.pending());
        // Halt wake-up ignores IME entirely.
        assert!(interrupts.halt_wake());

        interrupts.write_ime(1);
        assert!(interrupts.pending());
    }
}
