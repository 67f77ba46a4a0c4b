//! COM1 log sink and the `log_*!` macros. Test builds print to stderr instead.

#[cfg(all(target_arch = "x86_64", not(test)))]
pub use port::{SerialPort, COM1};

#[cfg(all(target_arch = "x86_64", not(test)))]
mod port {
    use lazy_static::lazy_static;
    use spin::Mutex;
    use x86_64::instructions::port::Port;

    const COM1_BASE: u16 = 0x3F8;
    const LINE_STATUS_THR_EMPTY: u8 = 0x20;

    /// A 16550 UART driven by polling.
    pub struct SerialPort {
        data: Port<u8>,
        irq_enable: Port<u8>,
        fifo: Port<u8>,
        line_control: Port<u8>,
        modem_control: Port<u8>,
        line_status: Port<u8>,
    }

    impl SerialPort {
        /// # Safety
        /// `base` must be the I/O base of a real UART nobody else drives.
        pub const unsafe fn new(base: u16) -> SerialPort {
            SerialPort {
                data: Port::new(base),
                irq_enable: Port::new(base + 1),
                fifo: Port::new(base + 2),
                line_control: Port::new(base + 3),
                modem_control: Port::new(base + 4),
                line_status: Port::new(base + 5),
            }
        }

        /// 38400 baud, 8N1, FIFOs on, no interrupts: the kernel only ever writes.
        pub fn init(&mut self) {
            unsafe {
                self.irq_enable.write(0x00);
                self.line_control.write(0x80);
                self.data.write(0x03);
                self.irq_enable.write(0x00);
                self.line_control.write(0x03);
                self.fifo.write(0xC7);
                self.modem_control.write(0x0B);
            }
        }

        pub fn send(&mut self, byte: u8) {
            unsafe {
                while self.line_status.read() & LINE_STATUS_THR_EMPTY == 0 {
                    core::hint::spin_loop();
                }
                self.data.write(byte);
            }
        }
    }

    impl core::fmt::Write for SerialPort {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            s.bytes().for_each(|byte| self.send(byte));
            Ok(())
        }
    }

    lazy_static! {
        pub static ref COM1: Mutex<SerialPort> = {
            let mut port = unsafe { SerialPort::new(COM1_BASE) };
            port.init();
            Mutex::new(port)
        };
    }
}

#[doc(hidden)]
#[cfg(all(target_arch = "x86_64", not(test)))]
pub fn _print(args: core::fmt::Arguments) {
    use core::fmt::Write;
    // Interrupt handlers log too; holding the lock across one would deadlock.
    x86_64::instructions::interrupts::without_interrupts(|| {
        let _ = COM1.lock().write_fmt(args);
    });
}

#[doc(hidden)]
#[cfg(test)]
pub fn _print(args: core::fmt::Arguments) {
    std::eprint!("{}", args);
}

#[doc(hidden)]
#[cfg(all(not(target_arch = "x86_64"), not(test)))]
pub fn _print(_args: core::fmt::Arguments) {}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::serial::_print(format_args!("[INFO] {}\n", format_args!($($arg)*)));
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::serial::_print(format_args!("[WARN] {}\n", format_args!($($arg)*)));
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::serial::_print(format_args!("[ERROR] {}\n", format_args!($($arg)*)));
    }};
}

/// Compiled in only with the `log_debug` feature; the arguments are still type checked.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        if cfg!(feature = "log_debug") {
            $crate::serial::_print(format_args!("[DEBUG] {}\n", format_args!($($arg)*)));
        }
    }};
}

#[cfg(all(target_arch = "x86_64", not(test)))]
pub fn init() {
    let _ = COM1.lock();
}
