use std::str::from_utf8;

pub const HEADER_START: usize = 0x00;
pub const HEADER_END: usize = 0xBF;

/// The 192 byte game pak header, located at the very start of ROM.
#[derive(Debug, Default, Clone)]
pub struct CartridgeHeader {
    /// Upper case ASCII, 12 characters, zero filled if less than that.
    pub title: String,
    /// Four character code in the `UTTD` layout (unique code, short title,
    /// destination/language).
    pub game_code: String,
    /// Two character ASCII licensee identifier, `01` for first party titles.
    pub maker_code: String,
    /// Version number of the game, usually zero.
    pub version: u8,
    /// Header checksum over bytes `0xA0..=0xBC`; the BIOS refuses to boot
    /// carts where this does not match.
    pub checksum: u8,
    /// Whether the checksum field matches the computed one.
    pub checksum_valid: bool,
}

impl CartridgeHeader {
    pub fn new(rom: &[u8]) -> Self {
        let checksum = rom[0xBD];
        CartridgeHeader {
            title: read_ascii(rom, 0xA0, 12),
            game_code: read_ascii(rom, 0xAC, 4),
            maker_code: read_ascii(rom, 0xB0, 2),
            version: rom[0xBC],
            checksum,
            checksum_valid: compute_checksum(rom) == checksum,
        }
    }
}

fn read_ascii(rom: &[u8], start: usize, len: usize) -> String {
    from_utf8(&rom[start..start + len])
        .unwrap_or("")
        .trim_matches(char::from(0))
        .to_owned()
}

/// `chk = 0: FOR i=0A0h TO 0BCh: chk = chk - MEM[i]: NEXT: chk = (chk - 19h) AND FFh`
fn compute_checksum(rom: &[u8]) -> u8 {
    rom[0xA0..=0xBC]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_sub(b))
        .wrapping_sub(0x19)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x200];
        rom[0xA0..0xA0 + 9].copy_from_slice(b"TESTTITLE");
        rom[0xAC..0xAC + 4].copy_from_slice(b"ATSE");
        rom[0xB0..0xB0 + 2].copy_from_slice(b"01");
        rom[0xBC] = 1;
        rom[0xBD] = compute_checksum(&rom);
        rom
    }

    #[test]
    fn test_read_header() {
        let header = CartridgeHeader::new(&test_rom());

        assert_eq!(header.title, "TESTTITLE");
        assert_eq!(header.game_code, "ATSE");
        assert_eq!(header.maker_code, "01");
        assert_eq!(header.version, 1);
        assert!(header.checksum_valid);
    }

    #[test]
    fn test_bad_checksum_is_flagged() {
        let mut rom = test_rom();
        rom[0xBD] ^= 0xFF;

        assert!(!CartridgeHeader::new(&rom).checksum_valid);
    }
}
