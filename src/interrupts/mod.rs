pub mod gdt;
pub mod idt;
pub mod usermode;

/// Unmasks the timer, keyboard, cascade and RTC lines only.
const PIC1_MASK: u8 = !0b0000_0111;
const PIC2_MASK: u8 = !0b0000_0001;

pub fn init(timer_hz: u32) {
    gdt::init();
    idt::init();
    unsafe {
        let mut pics = idt::PICS.lock();
        pics.initialize();
        pics.write_masks(PIC1_MASK, PIC2_MASK);
    }
    idt::init_timer(timer_hz);
}
