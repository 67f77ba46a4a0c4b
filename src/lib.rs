#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod drivers;
pub mod fs;
#[cfg(all(target_arch = "x86_64", not(test)))]
pub mod interrupts;
pub mod kernel;
#[cfg(all(target_arch = "x86_64", not(test)))]
pub mod machine;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod serial;
pub mod syscalls;
#[cfg(test)]
pub mod testing;

#[cfg(all(target_arch = "x86_64", not(test)))]
mod boot {
    use core::panic::PanicInfo;

    use crate::config::KernelConfig;
    use crate::fs::BootImage;
    use crate::kernel::{with_kernel, Kernel, KERNEL};
    use crate::machine::Machine;
    use crate::scheduler::context::SavedContext;
    use crate::{drivers, interrupts, log_error, log_info, serial};

    /// Where the boot path parks itself under the first shell. Nothing resumes it.
    static mut BOOT_CONTEXT: SavedContext = SavedContext::empty();

    #[no_mangle]
    pub extern "C" fn _start(multiboot_info_addr: usize) -> ! {
        serial::init();
        log_info!("TermixOS kernel started.");

        let config = KernelConfig::default();
        interrupts::init(config.timer_hz);

        let info = match unsafe {
            multiboot2::BootInformation::load(multiboot_info_addr as *const multiboot2::BootInformationHeader)
        } {
            Ok(info) => info,
            Err(err) => panic!("Failed to load Multiboot2 info: {:?}", err),
        };
        let Some(module) = info.module_tags().next() else {
            panic!("No boot image module supplied by the bootloader");
        };
        let image = match unsafe { BootImage::from_module(module.start_address(), module.end_address()) } {
            Ok(image) => image,
            Err(err) => panic!("Boot image unreadable: {}", err),
        };
        log_info!("Boot image: {} entries.", image.entry_count());

        let mut machine = Machine::new();
        machine.init();
        *KERNEL.lock() = Some(Kernel::new(image, machine, config));
        drivers::init();

        let launch = match with_kernel(|k| k.boot()) {
            Ok(launch) => launch,
            Err(err) => panic!("Cannot start the first shell: {}", err),
        };
        log_info!("TermixOS is running.");
        unsafe { interrupts::usermode::launch(&raw mut BOOT_CONTEXT, launch) };

        loop {
            x86_64::instructions::hlt();
        }
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        x86_64::instructions::interrupts::disable();
        log_error!("{}", info);
        loop {
            x86_64::instructions::hlt();
        }
    }
}
