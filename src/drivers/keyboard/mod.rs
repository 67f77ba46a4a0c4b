pub mod scancodes;

use lazy_static::lazy_static;
use spin::Mutex;

pub use scancodes::{KeyEvent, KeyboardState};

lazy_static! {
    pub static ref KEYBOARD_STATE: Mutex<KeyboardState> = Mutex::new(KeyboardState::new());
}

/// Decodes one byte from the controller; modifiers and releases yield nothing.
pub fn translate(scancode: u8) -> Option<KeyEvent> {
    KEYBOARD_STATE.lock().process_scancode(scancode)
}

#[cfg(all(target_arch = "x86_64", not(test)))]
pub fn init() {
    use x86_64::instructions::port::Port;

    let mut port: Port<u8> = Port::new(0x60);
    // drain whatever the 8042 latched before we were listening
    let _ = unsafe { port.read() };
    crate::log_info!("PS/2 Keyboard driver initialized.");
}

#[cfg(all(target_arch = "x86_64", not(test)))]
pub fn read_scancode() -> u8 {
    use x86_64::instructions::port::Port;

    let mut port: Port<u8> = Port::new(0x60);
    unsafe { port.read() }
}
