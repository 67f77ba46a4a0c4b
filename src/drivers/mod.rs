pub mod keyboard;
pub mod rtc;
pub mod tty;
pub mod vga;

#[cfg(all(target_arch = "x86_64", not(test)))]
pub fn init() {
    keyboard::init();
    crate::log_info!("Drivers subsystem initialized.");
}
