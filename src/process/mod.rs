//! Fixed-capacity process table. A pid fixes where its kernel stack and PCB
//! live and which 4MB frame backs its user window.

pub mod exec;

use core::fmt;

use crate::config::{KERNEL_STACK_PADDING, KERNEL_STACK_SIZE, KERNEL_TOP, LINE_BUFFER_SIZE, MAX_LINE_CHARS, MAX_PROCESSES};
use crate::drivers::tty::TerminalId;
use crate::fs::fd::FileTable;
use crate::scheduler::context::SavedContext;

pub use exec::{ExecError, HaltError, HaltOutcome, Launch};

/// Always in `0..MAX_PROCESSES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessId(u8);

impl ProcessId {
    pub fn new(index: usize) -> Option<Self> {
        (index < MAX_PROCESSES).then(|| ProcessId(index as u8))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = ProcessId> {
        (0..MAX_PROCESSES as u8).map(ProcessId)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lowest address of `pid`'s 8KB kernel stack region, where its PCB sits.
pub fn address_of(pid: ProcessId) -> u32 {
    KERNEL_TOP - (pid.index() as u32 + 1) * KERNEL_STACK_SIZE
}

/// Which process owns the kernel stack region containing `addr`.
pub fn pid_of_address(addr: u32) -> Option<ProcessId> {
    if addr >= KERNEL_TOP {
        return None;
    }
    ProcessId::new(((KERNEL_TOP - addr - 1) / KERNEL_STACK_SIZE) as usize)
}

/// Initial kernel stack pointer for ring transitions out of `pid`.
pub fn kernel_stack_top(pid: ProcessId) -> u32 {
    address_of(pid) + KERNEL_STACK_SIZE - KERNEL_STACK_PADDING
}

/// Command tail handed to a program, readable through `getargs`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Arguments {
    bytes: [u8; LINE_BUFFER_SIZE],
    len: usize,
}

impl Arguments {
    pub const EMPTY: Arguments = Arguments { bytes: [0; LINE_BUFFER_SIZE], len: 0 };

    /// Keeps at most 127 bytes.
    pub fn new(tail: &[u8]) -> Self {
        let len = tail.len().min(MAX_LINE_CHARS);
        let mut bytes = [0u8; LINE_BUFFER_SIZE];
        bytes[..len].copy_from_slice(&tail[..len]);
        Arguments { bytes, len }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// The tail followed by its NUL terminator.
    pub fn with_terminator(&self) -> &[u8] {
        &self.bytes[..self.len + 1]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", core::str::from_utf8(self.as_bytes()).unwrap_or("<binary>"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessControlBlock {
    pub pid: ProcessId,
    /// `None` for the root of a terminal's chain.
    pub parent: Option<ProcessId>,
    pub terminal: TerminalId,
    /// The parent's kernel context from the moment it launched this process;
    /// halt resumes it.
    pub exec_context: SavedContext,
    /// Where the timer and terminal switches park this process.
    pub switch_context: SavedContext,
    pub files: FileTable,
    pub arguments: Arguments,
    pub active: bool,
    /// The user video page is mapped for this process.
    pub vidmap: bool,
}

impl ProcessControlBlock {
    const fn at_rest(pid: ProcessId) -> Self {
        ProcessControlBlock {
            pid,
            parent: None,
            terminal: TerminalId::FIRST,
            exec_context: SavedContext::empty(),
            switch_context: SavedContext::empty(),
            files: FileTable::CLOSED,
            arguments: Arguments::EMPTY,
            active: false,
            vidmap: false,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

pub struct PcbStore {
    slots: [ProcessControlBlock; MAX_PROCESSES],
}

impl PcbStore {
    pub const fn new() -> Self {
        let mut slots = [ProcessControlBlock::at_rest(ProcessId(0)); MAX_PROCESSES];
        let mut i = 0;
        while i < MAX_PROCESSES {
            slots[i].pid = ProcessId(i as u8);
            i += 1;
        }
        PcbStore { slots }
    }

    /// First slot whose PCB is not active.
    pub fn find_free_slot(&self) -> Option<ProcessId> {
        self.slots.iter().find(|pcb| !pcb.active).map(|pcb| pcb.pid)
    }

    pub fn get(&self, pid: ProcessId) -> &ProcessControlBlock {
        &self.slots[pid.index()]
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> &mut ProcessControlBlock {
        &mut self.slots[pid.index()]
    }

    /// The PCB only if it belongs to a live process.
    pub fn active(&self, pid: ProcessId) -> Option<&ProcessControlBlock> {
        Some(self.get(pid)).filter(|pcb| pcb.active)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|pcb| pcb.active).count()
    }

    /// Stable for the lifetime of the store; the context switch code writes through it
    /// after the kernel lock is released.
    pub fn exec_context_ptr(&mut self, pid: ProcessId) -> *mut SavedContext {
        &mut self.slots[pid.index()].exec_context
    }

    pub fn switch_context_ptr(&mut self, pid: ProcessId) -> *mut SavedContext {
        &mut self.slots[pid.index()].switch_context
    }
}

impl Default for PcbStore {
    fn default() -> Self {
        Self::new()
    }
}
