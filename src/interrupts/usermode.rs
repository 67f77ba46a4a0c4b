//! Ring 3 boundary: the int 0x80 entry stub and the first drop into a program.

use core::arch::naked_asm;

use super::gdt;
use crate::process::Launch;
use crate::scheduler::context::{enter_user, SavedContext};

/// The int 0x80 handler. Saves user registers, calls
/// [`dispatch`](crate::syscalls::dispatch) and returns its result in rax.
///
/// Convention: rax = number, rdi/rsi/rdx = arguments.
#[unsafe(naked)]
pub extern "C" fn syscall_handler_asm() {
    naked_asm!(
        "push r15",
        "push r14",
        "push r13",
        "push r12",
        "push r11",
        "push r10",
        "push r9",
        "push r8",
        "push rbp",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbx",
        "push rcx",
        // 5 CPU words + 14 pushes leave rsp 8 bytes off 16
        "sub rsp, 8",

        "mov rcx, rdx",
        "mov rdx, rsi",
        "mov rsi, rdi",
        "mov rdi, rax",
        "call {dispatch}",

        "add rsp, 8",
        "pop rcx",
        "pop rbx",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rbp",
        "pop r8",
        "pop r9",
        "pop r10",
        "pop r11",
        "pop r12",
        "pop r13",
        "pop r14",
        "pop r15",
        "iretq",
        dispatch = sym crate::syscalls::dispatch,
    );
}

/// Enters `launch` in ring 3, saving the caller into `save_into`. Returns the
/// status a later halt resumes `save_into` with.
///
/// # Safety
/// `launch` must come from a successful exec whose mappings are installed,
/// and `save_into` must point into the static kernel state.
pub unsafe fn launch(save_into: *mut SavedContext, launch: Launch) -> i64 {
    enter_user(
        save_into,
        launch.entry as u64,
        launch.user_stack as u64,
        launch.kernel_stack as u64,
        gdt::user_code_selector().0 as u64,
        gdt::user_data_selector().0 as u64,
    )
}
