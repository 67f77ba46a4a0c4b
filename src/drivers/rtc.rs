//! Periodic interrupt source of the CMOS real-time clock.

pub trait Rtc {
    /// `hz` is a power of two in 2..=1024.
    fn set_frequency(&mut self, hz: u32);
    /// True once for each periodic interrupt since the previous call.
    fn take_tick(&mut self) -> bool;
}

/// Register A rate selector for `hz`: the chip runs at `32768 >> (rate - 1)`.
pub fn rate_for(hz: u32) -> Option<u8> {
    if !hz.is_power_of_two() || !(2..=1024).contains(&hz) {
        return None;
    }
    Some(16 - hz.trailing_zeros() as u8)
}

#[cfg(all(target_arch = "x86_64", not(test)))]
pub use hw::{on_interrupt, Cmos};

#[cfg(all(target_arch = "x86_64", not(test)))]
mod hw {
    use core::sync::atomic::{AtomicBool, Ordering};
    use x86_64::instructions::port::Port;

    use super::{rate_for, Rtc};

    const REG_A: u8 = 0x8A;
    const REG_B: u8 = 0x8B;
    const REG_C: u8 = 0x0C;

    static TICK: AtomicBool = AtomicBool::new(false);

    /// Called from IRQ 8. Register C must be read or the chip stops interrupting.
    pub fn on_interrupt() {
        let mut index: Port<u8> = Port::new(0x70);
        let mut data: Port<u8> = Port::new(0x71);
        unsafe {
            index.write(REG_C);
            let _ = data.read();
        }
        TICK.store(true, Ordering::Release);
    }

    pub struct Cmos {
        index: Port<u8>,
        data: Port<u8>,
    }

    impl Cmos {
        pub const fn new() -> Self {
            Cmos { index: Port::new(0x70), data: Port::new(0x71) }
        }

        /// Turns on the periodic interrupt (register B bit 6).
        pub fn init(&mut self) {
            unsafe {
                self.index.write(REG_B);
                let prev = self.data.read();
                self.index.write(REG_B);
                self.data.write(prev | 0x40);
            }
            self.set_frequency(2);
            crate::log_info!("RTC periodic interrupt enabled.");
        }
    }

    impl Rtc for Cmos {
        fn set_frequency(&mut self, hz: u32) {
            let Some(rate) = rate_for(hz) else {
                crate::log_warn!("rtc: ignoring invalid rate {} Hz", hz);
                return;
            };
            unsafe {
                self.index.write(REG_A);
                let prev = self.data.read();
                self.index.write(REG_A);
                self.data.write((prev & 0xF0) | rate);
            }
        }

        fn take_tick(&mut self) -> bool {
            TICK.swap(false, Ordering::AcqRel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_selector_matches_frequency() {
        assert_eq!(rate_for(2), Some(15));
        assert_eq!(rate_for(1024), Some(6));
        for hz in [2u32, 4, 8, 16, 32, 64, 128, 256, 512, 1024] {
            let rate = rate_for(hz).unwrap();
            assert_eq!(32768 >> (rate - 1), hz);
        }
    }

    #[test]
    fn rejects_out_of_range() {
        assert_eq!(rate_for(0), None);
        assert_eq!(rate_for(1), None);
        assert_eq!(rate_for(6), None);
        assert_eq!(rate_for(2048), None);
    }
}
