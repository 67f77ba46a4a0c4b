use core::arch::naked_asm;

use lazy_static::lazy_static;
use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::instructions::port::Port;
use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::{PrivilegeLevel, VirtAddr};

use super::{gdt, usermode};
use crate::config::FAULT_HALT_STATUS;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;
pub const SYSCALL_VECTOR: u8 = 0x80;

const PIT_BASE_HZ: u32 = 1_193_182;

pub static PICS: Mutex<ChainedPics> = Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard = PIC_1_OFFSET + 1,
    Rtc = PIC_2_OFFSET,
}

impl InterruptIndex {
    fn as_u8(self) -> u8 {
        self as u8
    }
}

/// What the fault stubs leave on the stack, lowest address first.
#[repr(C)]
pub struct FaultFrame {
    vector: u64,
    error_code: u64,
    rip: u64,
    cs: u64,
    rflags: u64,
    rsp: u64,
    ss: u64,
}

/// Saves the scratch registers around a call to an `extern "C" fn()`.
macro_rules! irq_stub {
    ($name:ident, $handler:path) => {
        #[unsafe(naked)]
        extern "C" fn $name() {
            naked_asm!(
                "push rax",
                "push rcx",
                "push rdx",
                "push rsi",
                "push rdi",
                "push r8",
                "push r9",
                "push r10",
                "push r11",
                "call {handler}",
                "pop r11",
                "pop r10",
                "pop r9",
                "pop r8",
                "pop rdi",
                "pop rsi",
                "pop rdx",
                "pop rcx",
                "pop rax",
                "iretq",
                handler = sym $handler,
            );
        }
    };
}

/// Pushes a dummy error code where the CPU does not, then the vector.
macro_rules! fault_stub {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        extern "C" fn $name() {
            naked_asm!(
                "push 0",
                "push {vector}",
                "mov rdi, rsp",
                "sub rsp, 8",
                "call {handler}",
                "ud2",
                vector = const $vector,
                handler = sym fault_entry,
            );
        }
    };
    ($name:ident, $vector:expr, error_code) => {
        #[unsafe(naked)]
        extern "C" fn $name() {
            naked_asm!(
                "push {vector}",
                "mov rdi, rsp",
                "sub rsp, 8",
                "call {handler}",
                "ud2",
                vector = const $vector,
                handler = sym fault_entry,
            );
        }
    };
}

irq_stub!(timer_stub, timer_interrupt);
irq_stub!(keyboard_stub, keyboard_interrupt);
irq_stub!(rtc_stub, rtc_interrupt);

fault_stub!(divide_error_stub, 0);
fault_stub!(debug_stub, 1);
fault_stub!(breakpoint_stub, 3);
fault_stub!(overflow_stub, 4);
fault_stub!(bound_range_stub, 5);
fault_stub!(invalid_opcode_stub, 6);
fault_stub!(device_not_available_stub, 7);
fault_stub!(double_fault_stub, 8, error_code);
fault_stub!(invalid_tss_stub, 10, error_code);
fault_stub!(segment_not_present_stub, 11, error_code);
fault_stub!(stack_segment_stub, 12, error_code);
fault_stub!(general_protection_stub, 13, error_code);
fault_stub!(page_fault_stub, 14, error_code);
fault_stub!(x87_floating_point_stub, 16);
fault_stub!(alignment_check_stub, 17, error_code);
fault_stub!(simd_floating_point_stub, 19);

fn addr(stub: extern "C" fn()) -> VirtAddr {
    VirtAddr::new(stub as usize as u64)
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        unsafe {
            idt.divide_error.set_handler_addr(addr(divide_error_stub));
            idt.debug.set_handler_addr(addr(debug_stub));
            idt.breakpoint.set_handler_addr(addr(breakpoint_stub));
            idt.overflow.set_handler_addr(addr(overflow_stub));
            idt.bound_range_exceeded.set_handler_addr(addr(bound_range_stub));
            idt.invalid_opcode.set_handler_addr(addr(invalid_opcode_stub));
            idt.device_not_available.set_handler_addr(addr(device_not_available_stub));
            idt.double_fault
                .set_handler_addr(addr(double_fault_stub))
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
            idt.invalid_tss.set_handler_addr(addr(invalid_tss_stub));
            idt.segment_not_present.set_handler_addr(addr(segment_not_present_stub));
            idt.stack_segment_fault.set_handler_addr(addr(stack_segment_stub));
            idt.general_protection_fault.set_handler_addr(addr(general_protection_stub));
            idt.page_fault.set_handler_addr(addr(page_fault_stub));
            idt.x87_floating_point.set_handler_addr(addr(x87_floating_point_stub));
            idt.alignment_check.set_handler_addr(addr(alignment_check_stub));
            idt.simd_floating_point.set_handler_addr(addr(simd_floating_point_stub));

            idt[InterruptIndex::Timer.as_u8()].set_handler_addr(addr(timer_stub));
            idt[InterruptIndex::Keyboard.as_u8()].set_handler_addr(addr(keyboard_stub));
            idt[InterruptIndex::Rtc.as_u8()].set_handler_addr(addr(rtc_stub));
            idt[SYSCALL_VECTOR]
                .set_handler_addr(addr(usermode::syscall_handler_asm))
                .set_privilege_level(PrivilegeLevel::Ring3);
        }
        idt
    };
}

pub fn init() {
    IDT.load();
}

/// Programs PIT channel 0 as a rate generator at `hz`.
pub fn init_timer(hz: u32) {
    let divisor = (PIT_BASE_HZ / hz.max(19)) as u16;
    let mut command: Port<u8> = Port::new(0x43);
    let mut channel0: Port<u8> = Port::new(0x40);
    unsafe {
        command.write(0x36);
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }
    crate::log_info!("PIT running at {} Hz.", hz);
}

fn end_of_interrupt(index: InterruptIndex) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(index.as_u8());
    }
}

extern "C" fn timer_interrupt() {
    end_of_interrupt(InterruptIndex::Timer);
    crate::scheduler::preempt();
}

extern "C" fn keyboard_interrupt() {
    let scancode = crate::drivers::keyboard::read_scancode();
    let outcome = crate::drivers::keyboard::translate(scancode)
        .map(|event| crate::kernel::with_kernel(|k| k.key_pressed(event)));
    end_of_interrupt(InterruptIndex::Keyboard);
    if let Some(outcome) = outcome {
        crate::scheduler::complete_terminal_switch(outcome);
    }
}

extern "C" fn rtc_interrupt() {
    crate::drivers::rtc::on_interrupt();
    end_of_interrupt(InterruptIndex::Rtc);
}

fn exception_name(vector: u64) -> &'static str {
    match vector {
        0 => "Divide Error",
        1 => "Debug",
        3 => "Breakpoint",
        4 => "Overflow",
        5 => "Bound Range Exceeded",
        6 => "Invalid Opcode",
        7 => "Device Not Available",
        8 => "Double Fault",
        10 => "Invalid TSS",
        11 => "Segment Not Present",
        12 => "Stack-Segment Fault",
        13 => "General Protection Fault",
        14 => "Page Fault",
        16 => "x87 Floating-Point Exception",
        17 => "Alignment Check",
        19 => "SIMD Floating-Point Exception",
        _ => "Unknown Exception",
    }
}

/// A fault in ring 3 kills only the faulting program; one in ring 0 is fatal.
extern "C" fn fault_entry(frame: *const FaultFrame) -> ! {
    let frame = unsafe { &*frame };
    let name = exception_name(frame.vector);
    if frame.vector == 14 {
        use x86_64::registers::control::Cr2;
        crate::log_error!("Accessed Address: {:?}", Cr2::read());
    }

    if frame.cs & 3 == 3 && frame.vector != 8 {
        crate::log_warn!(
            "EXCEPTION: {} in user mode at {:#x} (error {:#x}), halting process",
            name, frame.rip, frame.error_code
        );
        crate::kernel::with_kernel(|k| k.report_fault(name));
        crate::syscalls::halt_current(FAULT_HALT_STATUS);
    }

    panic!(
        "EXCEPTION: {}\nError Code: {:#x}\nrip={:#x} rsp={:#x} rflags={:#x} ss={:#x}",
        name, frame.error_code, frame.rip, frame.rsp, frame.rflags, frame.ss
    );
}
