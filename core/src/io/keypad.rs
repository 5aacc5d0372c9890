use bitflags::*;
use nanoserde::{DeBin, DeBinErr, SerBin};

bitflags! {
    #[derive(Default)]
    pub struct Keys: u16 {
        const A      = 0b00_0000_0001;
        const B      = 0b00_0000_0010;
        const SELECT = 0b00_0000_0100;
        const START  = 0b00_0000_1000;
        const RIGHT  = 0b00_0001_0000;
        const LEFT   = 0b00_0010_0000;
        const UP     = 0b00_0100_0000;
        const DOWN   = 0b00_1000_0000;
        const R      = 0b01_0000_0000;
        const L      = 0b10_0000_0000;
    }
}

/// The key identifiers exposed to frontends.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum InputKey {
    A,
    B,
    Select,
    Start,
    Right,
    Left,
    Up,
    Down,
    R,
    L,
}

impl InputKey {
    fn to_flag(self) -> Keys {
        match self {
            InputKey::A => Keys::A,
            InputKey::B => Keys::B,
            InputKey::Select => Keys::SELECT,
            InputKey::Start => Keys::START,
            InputKey::Right => Keys::RIGHT,
            InputKey::Left => Keys::LEFT,
            InputKey::Up => Keys::UP,
            InputKey::Down => Keys::DOWN,
            InputKey::R => Keys::R,
            InputKey::L => Keys::L,
        }
    }
}

/// `KEYINPUT`/`KEYCNT`. We track pressed keys active-high internally and
/// invert on register reads, since that is by far the less confusing way around.
#[derive(Debug, Default, Clone)]
pub struct Keypad {
    pressed: Keys,
    pub control: u16,
}

impl Keypad {
    /// The `KEYINPUT` register value: ten bits, active low.
    pub fn keyinput(&self) -> u16 {
        !self.pressed.bits() & 0x03FF
    }

    /// Returns `true` if the key state actually changed.
    pub fn handle_input(&mut self, key: InputKey, pressed: bool) -> bool {
        let flag = key.to_flag();
        let changed = self.pressed.contains(flag) != pressed;
        self.pressed.set(flag, pressed);
        changed
    }

    pub fn write_control(&mut self, value: u16) {
        self.control = value & 0xC3FF;
    }

    /// Evaluate the `KEYCNT` interrupt condition against the current key state.
    ///
    /// Bit 14 is the master switch, bit 15 selects AND (all selected keys down)
    /// versus OR (any selected key down) logic.
    pub fn raises_irq(&self) -> bool {
        if self.control & 0x4000 == 0 {
            return false;
        }
        let mask = Keys::from_bits_truncate(self.control & 0x03FF);
        if mask.is_empty() {
            return false;
        }
        if self.control & 0x8000 != 0 {
            self.pressed.contains(mask)
        } else {
            !(self.pressed & mask).is_empty()
        }
    }
}

impl SerBin for Keypad {
    fn ser_bin(&self, output: &mut Vec<u8>) {
        self.pressed.bits().ser_bin(output);
        self.control.ser_bin(output);
    }
}

impl DeBin for Keypad {
    fn de_bin(offset: &mut usize, bytes: &[u8]) -> Result<Self, DeBinErr> {
        Ok(Keypad {
            pressed: Keys::from_bits_truncate(u16::de_bin(offset, bytes)?),
            control: u16::de_bin(offset, bytes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyinput_is_active_low() {
        let mut keypad = Keypad::default();
        assert_eq!(keypad.keyinput(), 0x03FF);

        keypad.handle_input(InputKey::A, true);
        keypad.handle_input(InputKey::Start, true);
        assert_eq!(keypad.keyinput(), 0x03FF & !0b1001);
    }

    #[test]
    fn test_keycnt_or_logic() {
        let mut keypad = Keypad::default();
        keypad.write_control(0x4000 | Keys::A.bits() | Keys::B.bits());

        assert!(!keypad.raises_irq());
        keypad.handle_input(InputKey::B, true);
        assert!(keypad.raises_irq());
    }

    #[test]
    fn test_keycnt_and_logic() {
        let mut keypad = Keypad::default();
        keypad.write_control(0xC000 | Keys::A.bits() | Keys::B.bits());

        keypad.handle_input(InputKey::A, true);
        assert!(!keypad.raises_irq());
        keypad.handle_input(InputKey::B, true);
        assert!(keypad.raises_irq());
    }
}
