//! The real machine behind the kernel's hardware traits.

use crate::drivers::rtc::{Cmos, Rtc};
use crate::drivers::vga::{Console, Cursor, ScreenChar, VgaText, VideoPage};
use crate::memory::shadow::ShadowMmu;
use crate::memory::Mmu;

pub struct Machine {
    mmu: ShadowMmu,
    vga: VgaText,
    rtc: Cmos,
}

impl Machine {
    pub const fn new() -> Self {
        Machine { mmu: ShadowMmu::new(), vga: VgaText::new(), rtc: Cmos::new() }
    }

    pub fn init(&mut self) {
        self.rtc.init();
    }
}

impl Mmu for Machine {
    fn load_page_directory(&mut self, phys: u32) {
        self.mmu.load_page_directory(phys);
    }

    fn flush_tlb(&mut self) {
        self.mmu.flush_tlb();
    }

    fn set_kernel_stack(&mut self, top: u32) {
        self.mmu.set_kernel_stack(top);
    }

    fn user_frame(&mut self, frame: u32) -> &mut [u8] {
        self.mmu.user_frame(frame)
    }
}

impl Console for Machine {
    fn cell(&self, page: VideoPage, index: usize) -> ScreenChar {
        self.vga.cell(page, index)
    }

    fn set_cell(&mut self, page: VideoPage, index: usize, ch: ScreenChar) {
        self.vga.set_cell(page, index, ch);
    }

    fn set_cursor(&mut self, cursor: Cursor) {
        self.vga.set_cursor(cursor);
    }
}

impl Rtc for Machine {
    fn set_frequency(&mut self, hz: u32) {
        self.rtc.set_frequency(hz);
    }

    fn take_tick(&mut self) -> bool {
        self.rtc.take_tick()
    }
}
