//! Flat long-mode segments for both rings, plus the TSS whose RSP0 tracks the
//! running process's kernel stack.

use lazy_static::lazy_static;
use x86_64::instructions::segmentation::{Segment, CS, DS, ES, SS};
use x86_64::instructions::tables::load_tss;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::{PrivilegeLevel, VirtAddr};

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

#[repr(C, align(16))]
struct Stack<const N: usize>([u8; N]);

/// Ring 0 stack for interrupts taken before the first process exists.
static mut BOOT_STACK: Stack<{ 4096 * 2 }> = Stack([0; 4096 * 2]);
static mut DOUBLE_FAULT_STACK: Stack<{ 4096 * 5 }> = Stack([0; 4096 * 5]);

static mut TSS: TaskStateSegment = TaskStateSegment::new();

fn stack_top<const N: usize>(stack: *const Stack<N>) -> VirtAddr {
    VirtAddr::from_ptr(stack) + N as u64
}

pub struct Selectors {
    kernel_code: SegmentSelector,
    kernel_data: SegmentSelector,
    user_code: SegmentSelector,
    user_data: SegmentSelector,
    tss: SegmentSelector,
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let tss = unsafe {
            let tss = &mut *(&raw mut TSS);
            tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] =
                stack_top(&raw const DOUBLE_FAULT_STACK);
            tss.privilege_stack_table[0] = stack_top(&raw const BOOT_STACK);
            &*(&raw const TSS)
        };
        let mut gdt = GlobalDescriptorTable::new();
        let selectors = Selectors {
            kernel_code: gdt.append(Descriptor::kernel_code_segment()),
            kernel_data: gdt.append(Descriptor::kernel_data_segment()),
            user_data: gdt.append(Descriptor::user_data_segment()),
            user_code: gdt.append(Descriptor::user_code_segment()),
            tss: gdt.append(Descriptor::tss_segment(tss)),
        };
        (gdt, selectors)
    };
}

pub fn init() {
    GDT.0.load();
    let selectors = &GDT.1;
    unsafe {
        CS::set_reg(selectors.kernel_code);
        DS::set_reg(selectors.kernel_data);
        ES::set_reg(selectors.kernel_data);
        SS::set_reg(selectors.kernel_data);
        load_tss(selectors.tss);
    }
}

/// User code selector with RPL 3, as iretq expects it.
pub fn user_code_selector() -> SegmentSelector {
    SegmentSelector::new(GDT.1.user_code.index(), PrivilegeLevel::Ring3)
}

pub fn user_data_selector() -> SegmentSelector {
    SegmentSelector::new(GDT.1.user_data.index(), PrivilegeLevel::Ring3)
}

/// Kernel stack the CPU loads on the next ring 3 -> ring 0 transition.
/// Only called with interrupts off.
pub fn set_kernel_stack(top: u64) {
    unsafe {
        (*(&raw mut TSS)).privilege_stack_table[0] = VirtAddr::new(top & !0xF);
    }
}
