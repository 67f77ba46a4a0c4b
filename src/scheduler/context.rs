#[cfg(all(target_arch = "x86_64", not(test)))]
use core::arch::naked_asm;

/// Callee-saved registers plus resume address, captured at a kernel-side
/// suspension point. Only the scheduler and exec/halt produce or consume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SavedContext {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rip: u64,
}

impl SavedContext {
    pub const fn empty() -> Self {
        SavedContext { rsp: 0, rbp: 0, rbx: 0, r12: 0, r13: 0, r14: 0, r15: 0, rip: 0 }
    }

    /// Nothing has been captured into this slot yet.
    pub fn is_empty(&self) -> bool {
        self.rip == 0
    }
}

/// Saves the current kernel context into `old` and continues from `new`.
/// Returns when something later switches back to `old`.
///
/// # Safety
/// `new` must hold a context captured by this function or by `enter_user`,
/// whose stack is still intact.
#[cfg(all(target_arch = "x86_64", not(test)))]
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(old: *mut SavedContext, new: *const SavedContext) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x38], rax",

        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        "jmp [rsi + 0x38]",

        "2:",
        "ret",
    );
}

/// Captures the caller's context into `save_into`, moves onto a fresh kernel
/// stack and drops to ring 3 at `entry`. Returns only when some halt calls
/// [`resume`] on `save_into`, with the value it passed.
///
/// Args: rdi = save_into, rsi = entry, rdx = user stack, rcx = kernel stack,
/// r8 = user code selector, r9 = user data selector.
///
/// # Safety
/// The user window must already hold the program, and `kernel_stack` must not
/// overlap any live stack.
#[cfg(all(target_arch = "x86_64", not(test)))]
#[unsafe(naked)]
pub unsafe extern "C" fn enter_user(
    save_into: *mut SavedContext,
    entry: u64,
    user_stack: u64,
    kernel_stack: u64,
    user_cs: u64,
    user_ss: u64,
) -> i64 {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x38], rax",

        "mov rsp, rcx",
        "and rsp, -16",
        "push r9",
        "push rdx",
        "pushfq",
        "pop rax",
        "or rax, 0x200",
        "push rax",
        "push r8",
        "push rsi",
        "xor eax, eax",
        "xor ebx, ebx",
        "xor ebp, ebp",
        "iretq",

        // rax carries the status handed to resume()
        "2:",
        "ret",
    );
}

/// Continues a context captured by [`enter_user`], making that call return
/// `status`. A context parked by [`switch_context`] resumes the same way and
/// ignores `status`.
///
/// # Safety
/// `ctx` must have been captured on a stack that is still intact.
#[cfg(all(target_arch = "x86_64", not(test)))]
#[unsafe(naked)]
pub unsafe extern "C" fn resume(ctx: *const SavedContext, status: i64) -> ! {
    naked_asm!(
        "mov rax, rsi",
        "mov rsp, [rdi + 0x00]",
        "mov rbp, [rdi + 0x08]",
        "mov rbx, [rdi + 0x10]",
        "mov r12, [rdi + 0x18]",
        "mov r13, [rdi + 0x20]",
        "mov r14, [rdi + 0x28]",
        "mov r15, [rdi + 0x30]",
        "jmp [rdi + 0x38]",
    );
}
