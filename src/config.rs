//! Fixed physical/virtual layout and run-time policy knobs.

/// Number of process slots. A pid indexes both the kernel-stack region and
/// the user-frame region, so this also bounds physical memory use.
pub const MAX_PROCESSES: usize = 6;
/// Per-process file descriptor table size.
pub const MAX_FILES: usize = 8;
/// Virtual terminals reachable with Alt+F1..F3.
pub const NUM_TERMINALS: usize = 3;

/// Top of the kernel 4MB page; kernel stacks (and their PCBs) grow down from here.
pub const KERNEL_TOP: u32 = 0x0080_0000;
/// One kernel stack per pid, PCB at its lowest address.
pub const KERNEL_STACK_SIZE: u32 = 0x2000;
/// Gap kept between a kernel stack top and the next PCB.
pub const KERNEL_STACK_PADDING: u32 = 4;

/// Physical frame of pid 0's user window; pid `n` lives at `+ n * 4MB`.
pub const USER_FRAME_BASE: u32 = 0x0080_0000;
pub const USER_WINDOW_VIRT: u32 = 0x0800_0000;
pub const USER_WINDOW_SIZE: u32 = 0x0040_0000;
pub const USER_WINDOW_END: u32 = USER_WINDOW_VIRT + USER_WINDOW_SIZE;
/// Executables are copied here, whole, byte for byte.
pub const USER_LOAD_ADDR: u32 = 0x0804_8000;
pub const USER_STACK_TOP: u32 = USER_WINDOW_END - 4;
/// Where `vidmap` exposes the terminal's video page.
pub const USER_VIDEO_VIRT: u32 = 0x0880_0000;

pub const PAGE_SIZE: u32 = 0x1000;
pub const LARGE_PAGE_SIZE: u32 = 0x0040_0000;
/// Physical text-mode video page.
pub const VIDEO_PHYS: u32 = 0x000B_8000;
/// Backing pages for hidden terminals sit right after the live page.
pub const TERMINAL_BACKING_PHYS: u32 = VIDEO_PHYS + PAGE_SIZE;

/// Longest program name the boot image can hold.
pub const MAX_NAME_LEN: usize = 32;
/// Argument tail and terminal line buffers share this size.
pub const LINE_BUFFER_SIZE: usize = 128;
/// Characters a user may type before the line is forced closed.
pub const MAX_LINE_CHARS: usize = LINE_BUFFER_SIZE - 1;

/// Status passed to halt by exception handlers.
pub const FAULT_HALT_STATUS: u8 = 255;
/// What the parent's exec sees when its child died from an exception.
pub const FAULT_EXIT_STATUS: i32 = 256;

/// What the timer does when only one terminal has a live process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoneProcess {
    /// Leave the running process alone; the tick is a no-op.
    Idle,
    /// Reinstall the running process's mappings and flush the TLB every quantum.
    Reload,
}

/// Run-time policy, fixed at boot.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Whether the PIT tick rotates between terminals at all.
    pub preemption: bool,
    pub lone_process: LoneProcess,
    /// Program launched on first use of a terminal and when a root halts.
    pub shell: &'static [u8],
    pub timer_hz: u32,
}

impl KernelConfig {
    pub const DEFAULT: KernelConfig = KernelConfig {
        preemption: true,
        lone_process: LoneProcess::Idle,
        shell: b"shell",
        timer_hz: 100,
    };
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
