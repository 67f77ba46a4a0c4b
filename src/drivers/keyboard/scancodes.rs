use crate::drivers::tty::TerminalId;

/// What a keystroke means to the terminal layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Char(u8),
    Enter,
    Backspace,
    Tab,
    /// Ctrl+L
    ClearScreen,
    /// Alt+F1..F3
    SwitchTerminal(TerminalId),
}

/// Scan code set 1 decoder with modifier tracking.
pub struct KeyboardState {
    shift_pressed: bool,
    ctrl_pressed: bool,
    alt_pressed: bool,
    caps_lock: bool,
    extended_scancode: bool,
}

impl KeyboardState {
    pub const fn new() -> Self {
        Self {
            shift_pressed: false,
            ctrl_pressed: false,
            alt_pressed: false,
            caps_lock: false,
            extended_scancode: false,
        }
    }

    pub fn process_scancode(&mut self, scancode: u8) -> Option<KeyEvent> {
        if scancode == 0xE0 {
            self.extended_scancode = true;
            return None;
        }

        let is_extended = self.extended_scancode;
        self.extended_scancode = false;

        if is_extended {
            // right-hand Ctrl and Alt share the left-hand codes
            match scancode {
                0x1D => self.ctrl_pressed = true,
                0x9D => self.ctrl_pressed = false,
                0x38 => self.alt_pressed = true,
                0xB8 => self.alt_pressed = false,
                _ => {}
            }
            return None;
        }

        match scancode {
            0x2A | 0x36 => { self.shift_pressed = true; None }
            0xAA | 0xB6 => { self.shift_pressed = false; None }
            0x1D => { self.ctrl_pressed = true; None }
            0x9D => { self.ctrl_pressed = false; None }
            0x38 => { self.alt_pressed = true; None }
            0xB8 => { self.alt_pressed = false; None }
            0x3A => { self.caps_lock = !self.caps_lock; None }

            0x1C => Some(KeyEvent::Enter),
            0x0E => Some(KeyEvent::Backspace),
            0x0F => Some(KeyEvent::Tab),
            0x39 => Some(KeyEvent::Char(b' ')),

            0x3B..=0x3D if self.alt_pressed => {
                TerminalId::new((scancode - 0x3B) as usize).map(KeyEvent::SwitchTerminal)
            }
            0x26 if self.ctrl_pressed => Some(KeyEvent::ClearScreen),

            code => {
                let (lower, upper) = printable(code)?;
                if self.ctrl_pressed || self.alt_pressed {
                    return None;
                }
                Some(KeyEvent::Char(self.char_with_shift(lower, upper)))
            }
        }
    }

    fn char_with_shift(&self, lower: u8, upper: u8) -> u8 {
        let is_letter = lower.is_ascii_lowercase();

        let shift_active = if is_letter && self.caps_lock {
            !self.shift_pressed
        } else {
            self.shift_pressed
        };

        if shift_active { upper } else { lower }
    }
}

/// Unshifted and shifted byte for a printable make code.
fn printable(scancode: u8) -> Option<(u8, u8)> {
    let pair = match scancode {
        0x02 => (b'1', b'!'),
        0x03 => (b'2', b'@'),
        0x04 => (b'3', b'#'),
        0x05 => (b'4', b'$'),
        0x06 => (b'5', b'%'),
        0x07 => (b'6', b'^'),
        0x08 => (b'7', b'&'),
        0x09 => (b'8', b'*'),
        0x0A => (b'9', b'('),
        0x0B => (b'0', b')'),
        0x0C => (b'-', b'_'),
        0x0D => (b'=', b'+'),

        0x10 => (b'q', b'Q'),
        0x11 => (b'w', b'W'),
        0x12 => (b'e', b'E'),
        0x13 => (b'r', b'R'),
        0x14 => (b't', b'T'),
        0x15 => (b'y', b'Y'),
        0x16 => (b'u', b'U'),
        0x17 => (b'i', b'I'),
        0x18 => (b'o', b'O'),
        0x19 => (b'p', b'P'),
        0x1A => (b'[', b'{'),
        0x1B => (b']', b'}'),

        0x1E => (b'a', b'A'),
        0x1F => (b's', b'S'),
        0x20 => (b'd', b'D'),
        0x21 => (b'f', b'F'),
        0x22 => (b'g', b'G'),
        0x23 => (b'h', b'H'),
        0x24 => (b'j', b'J'),
        0x25 => (b'k', b'K'),
        0x26 => (b'l', b'L'),
        0x27 => (b';', b':'),
        0x28 => (b'\'', b'"'),
        0x29 => (b'`', b'~'),
        0x2B => (b'\\', b'|'),

        0x2C => (b'z', b'Z'),
        0x2D => (b'x', b'X'),
        0x2E => (b'c', b'C'),
        0x2F => (b'v', b'V'),
        0x30 => (b'b', b'B'),
        0x31 => (b'n', b'N'),
        0x32 => (b'm', b'M'),
        0x33 => (b',', b'<'),
        0x34 => (b'.', b'>'),
        0x35 => (b'/', b'?'),
        _ => return None,
    };
    Some(pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(state: &mut KeyboardState, codes: &[u8]) -> Vec<KeyEvent> {
        codes.iter().filter_map(|&c| state.process_scancode(c)).collect()
    }

    #[test]
    fn shift_and_caps_select_case() {
        let mut kb = KeyboardState::new();
        assert_eq!(feed(&mut kb, &[0x1E]), [KeyEvent::Char(b'a')]);
        assert_eq!(feed(&mut kb, &[0x2A, 0x1E, 0x02, 0xAA]), [KeyEvent::Char(b'A'), KeyEvent::Char(b'!')]);
        assert_eq!(feed(&mut kb, &[0x3A, 0x1E, 0x02]), [KeyEvent::Char(b'A'), KeyEvent::Char(b'1')]);
        assert_eq!(feed(&mut kb, &[0x36, 0x1E]), [KeyEvent::Char(b'a')]);
    }

    #[test]
    fn alt_function_keys_switch_terminals() {
        let mut kb = KeyboardState::new();
        assert!(feed(&mut kb, &[0x3C]).is_empty());
        let events = feed(&mut kb, &[0x38, 0x3C, 0xB8]);
        assert_eq!(events, [KeyEvent::SwitchTerminal(TerminalId::new(1).unwrap())]);
        let events = feed(&mut kb, &[0xE0, 0x38, 0x3D]);
        assert_eq!(events, [KeyEvent::SwitchTerminal(TerminalId::new(2).unwrap())]);
    }

    #[test]
    fn ctrl_l_clears_and_suppresses_letters() {
        let mut kb = KeyboardState::new();
        assert_eq!(feed(&mut kb, &[0x1D, 0x26, 0x1E, 0x9D]), [KeyEvent::ClearScreen]);
        assert_eq!(feed(&mut kb, &[0x26]), [KeyEvent::Char(b'l')]);
    }

    #[test]
    fn control_keys() {
        let mut kb = KeyboardState::new();
        assert_eq!(
            feed(&mut kb, &[0x1C, 0x0E, 0x0F, 0x39, 0x9C]),
            [KeyEvent::Enter, KeyEvent::Backspace, KeyEvent::Tab, KeyEvent::Char(b' ')]
        );
    }
}
