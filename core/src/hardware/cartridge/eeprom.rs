use log::*;
use nanoserde::{DeBin, DeBinErr, SerBin};

pub const EEPROM_512_SIZE: usize = 0x200;
pub const EEPROM_8K_SIZE: usize = 0x2000;

#[derive(Debug, Copy, Clone, PartialEq)]
enum EepromPhase {
    Idle,
    /// Got the start bit, waiting for the read/write bit.
    Command,
    Address {
        read: bool,
    },
    /// Receiving the 64 data bits of a write request.
    WriteData,
    /// Waiting for the trailing zero bit that commits a write.
    WriteTerminator,
    /// Waiting for the trailing zero bit that arms a read.
    ReadTerminator,
}

/// The bit-serial EEPROM protocol. The chip is wired to the top of the ROM
/// address space and games talk to it exclusively through DMA 3 halfword
/// bursts, one bit per transfer.
#[derive(Debug, Clone)]
pub struct Eeprom {
    phase: EepromPhase,
    /// 6 for the 512 byte chip, 14 for the 8 KB one. The width is locked in
    /// once the first DMA burst reveals it.
    addr_bits: u8,
    address: u32,
    received_bits: u8,
    shift: u64,
    /// Read-out state: 4 dummy bits followed by 64 data bits, MSB first.
    read_shift: u64,
    read_remaining: u8,
}

impl Eeprom {
    pub fn new(addr_bits: u8) -> Self {
        Eeprom {
            phase: EepromPhase::Idle,
            addr_bits,
            address: 0,
            received_bits: 0,
            shift: 0,
            read_shift: 0,
            read_remaining: 0,
        }
    }

    pub fn addr_bits(&self) -> u8 {
        self.addr_bits
    }

    /// The size in bytes implied by the current bus width.
    pub fn implied_size(&self) -> usize {
        if self.addr_bits <= 6 {
            EEPROM_512_SIZE
        } else {
            EEPROM_8K_SIZE
        }
    }

    /// A DMA burst of `count` halfwords to the chip pins down the address
    /// width: read setups are `2 + n + 1` bits, writes `2 + n + 64 + 1`.
    pub fn observe_burst_length(&mut self, count: u32) {
        let bits = match count {
            9 | 73 => 6,
            17 | 81 => 14,
            _ => return,
        };
        if bits != self.addr_bits {
            debug!("EEPROM bus width set to {} address bits", bits);
            self.addr_bits = bits;
        }
    }

    /// Clock one bit into the chip. Returns `true` when a write was committed
    /// to the backing data.
    pub fn write_bit(&mut self, data: &mut [u8], bit: u16) -> bool {
        let bit = (bit & 1) as u64;
        match self.phase {
            EepromPhase::Idle => {
                if bit == 1 {
                    self.phase = EepromPhase::Command;
                }
            }
            EepromPhase::Command => {
                self.phase = EepromPhase::Address { read: bit == 1 };
                self.address = 0;
                self.received_bits = 0;
            }
            EepromPhase::Address { read } => {
                self.address = (self.address << 1) | bit as u32;
                self.received_bits += 1;
                if self.received_bits == self.addr_bits {
                    self.phase = if read {
                        EepromPhase::ReadTerminator
                    } else {
                        self.shift = 0;
                        self.received_bits = 0;
                        EepromPhase::WriteData
                    };
                }
            }
            EepromPhase::WriteData => {
                self.shift = (self.shift << 1) | bit;
                self.received_bits += 1;
                if self.received_bits == 64 {
                    self.phase = EepromPhase::WriteTerminator;
                }
            }
            EepromPhase::WriteTerminator => {
                let base = self.data_offset(data);
                for i in 0..8 {
                    data[base + i] = (self.shift >> (56 - i * 8)) as u8;
                }
                self.phase = EepromPhase::Idle;
                return true;
            }
            EepromPhase::ReadTerminator => {
                let base = self.data_offset(data);
                self.read_shift = data[base..base + 8]
                    .iter()
                    .fold(0u64, |acc, &b| (acc << 8) | b as u64);
                self.read_remaining = 68;
                self.phase = EepromPhase::Idle;
            }
        }
        false
    }

    /// Clock one bit out of the chip. Idle reads return 1.
    pub fn read_bit(&mut self) -> u16 {
        if self.read_remaining == 0 {
            return 1;
        }
        self.read_remaining -= 1;
        if self.read_remaining < 64 {
            ((self.read_shift >> self.read_remaining) & 1) as u16
        } else {
            // The first four bits of a read-out are dummies.
            0
        }
    }

    fn data_offset(&self, data: &[u8]) -> usize {
        let dwords = (data.len() / 8).max(1);
        (self.address as usize & (dwords - 1)) * 8
    }
}

impl SerBin for Eeprom {
    fn ser_bin(&self, output: &mut Vec<u8>) {
        let phase: u8 = match self.phase {
            EepromPhase::Idle => 0,
            EepromPhase::Command => 1,
            EepromPhase::Address { read: false } => 2,
            EepromPhase::Address { read: true } => 3,
            EepromPhase::WriteData => 4,
            EepromPhase::WriteTerminator => 5,
            EepromPhase::ReadTerminator => 6,
        };
        phase.ser_bin(output);
        self.addr_bits.ser_bin(output);
        self.address.ser_bin(output);
        self.received_bits.ser_bin(output);
        self.shift.ser_bin(output);
        self.read_shift.ser_bin(output);
        self.read_remaining.ser_bin(output);
    }
}

impl DeBin for Eeprom {
    fn de_bin(offset: &mut usize, bytes: &[u8]) -> Result<Self, DeBinErr> {
        let phase = match u8::de_bin(offset, bytes)? {
            0 => EepromPhase::Idle,
            1 => EepromPhase::Command,
            2 => EepromPhase::Address { read: false },
            3 => EepromPhase::Address { read: true },
            4 => EepromPhase::WriteData,
            5 => EepromPhase::WriteTerminator,
            _ => EepromPhase::ReadTerminator,
        };
        Ok(Eeprom {
            phase,
            addr_bits: u8::de_bin(offset, bytes)?,
            address: u32::de_bin(offset, bytes)?,
            received_bits: u8::de_bin(offset, bytes)?,
            shift: u64::de_bin(offset, bytes)?,
            read_shift: u64::de_bin(offset, bytes)?,
            read_remaining: u8::de_bin(offset, bytes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_dword(eeprom: &mut Eeprom, data: &mut [u8], address: u32, value: u64) {
        eeprom.write_bit(data, 1);
        eeprom.write_bit(data, 0);
        for i in (0..eeprom.addr_bits()).rev() {
            eeprom.write_bit(data, ((address >> i) & 1) as u16);
        }
        for i in (0..64).rev() {
            eeprom.write_bit(data, ((value >> i) & 1) as u16);
        }
        eeprom.write_bit(data, 0);
    }

    fn read_dword(eeprom: &mut Eeprom, data: &mut [u8], address: u32) -> u64 {
        eeprom.write_bit(data, 1);
        eeprom.write_bit(data, 1);
        for i in (0..eeprom.addr_bits()).rev() {
            eeprom.write_bit(data, ((address >> i) & 1) as u16);
        }
        eeprom.write_bit(data, 0);

        let mut result = 0u64;
        for _ in 0..4 {
            eeprom.read_bit();
        }
        for _ in 0..64 {
            result = (result << 1) | eeprom.read_bit() as u64;
        }
        result
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let mut eeprom = Eeprom::new(6);
        let mut data = vec![0xFF; EEPROM_512_SIZE];

        write_dword(&mut eeprom, &mut data, 5, 0x0123_4567_89AB_CDEF);

        assert_eq!(data[5 * 8], 0x01);
        assert_eq!(data[5 * 8 + 7], 0xEF);
        assert_eq!(read_dword(&mut eeprom, &mut data, 5), 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn test_burst_length_sets_width() {
        let mut eeprom = Eeprom::new(6);
        eeprom.observe_burst_length(81);
        assert_eq!(eeprom.addr_bits(), 14);
        assert_eq!(eeprom.implied_size(), EEPROM_8K_SIZE);

        // Unrelated burst lengths leave the width alone.
        eeprom.observe_burst_length(256);
        assert_eq!(eeprom.addr_bits(), 14);
    }

    #[test]
    fn test_idle_reads_are_high() {
        let mut eeprom = Eeprom::new(6);
        assert_eq!(eeprom.read_bit(), 1);
    }
}
