//! The process core: every PCB, the shared page directory, the terminals and
//! the hardware seams, behind one interrupt-safe lock.

use crate::config::{KernelConfig, USER_VIDEO_VIRT};
use crate::drivers::keyboard::KeyEvent;
use crate::drivers::rtc::Rtc;
use crate::drivers::tty::{Multiplexer, TerminalId};
use crate::drivers::vga::Console;
use crate::fs::fd::{Devices, FileError};
use crate::fs::Storage;
use crate::memory::{AddressSpace, Mmu};
use crate::process::{kernel_stack_top, ExecError, Launch, PcbStore, ProcessId};
use crate::scheduler::TerminalSwitch;
use crate::syscalls::SyscallError;

/// Everything the core needs from the machine.
pub trait Hardware: Mmu + Console + Rtc {}

impl<T: Mmu + Console + Rtc> Hardware for T {}

pub struct Kernel<S: Storage, H: Hardware> {
    pub(crate) pcbs: PcbStore,
    pub(crate) paging: AddressSpace,
    pub(crate) terminals: Multiplexer,
    /// Whose window is mapped and whose kernel stack the TSS names.
    pub(crate) running: Option<ProcessId>,
    pub(crate) storage: S,
    pub(crate) hw: H,
    pub(crate) config: KernelConfig,
}

impl<S: Storage, H: Hardware> Kernel<S, H> {
    pub fn new(storage: S, hw: H, config: KernelConfig) -> Self {
        Kernel {
            pcbs: PcbStore::new(),
            paging: AddressSpace::new(),
            terminals: Multiplexer::new(),
            running: None,
            storage,
            hw,
            config,
        }
    }

    /// Enables paging and loads the first shell on terminal 0. The kernel must
    /// be at its final address: the page directory points into itself.
    pub fn boot(&mut self) -> Result<Launch, ExecError> {
        self.paging.init(&mut self.hw);
        self.terminals.clear_all(&mut self.hw);
        self.terminals.get_mut(TerminalId::FIRST).launched = true;
        let shell = self.config.shell;
        self.exec(TerminalId::FIRST, shell)
    }

    pub fn running(&self) -> Option<ProcessId> {
        self.running
    }

    pub fn pcbs(&self) -> &PcbStore {
        &self.pcbs
    }

    pub fn terminals(&self) -> &Multiplexer {
        &self.terminals
    }

    pub fn paging(&self) -> &AddressSpace {
        &self.paging
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// Points the user window, the video page and the TSS at `pid`, flushes,
    /// and records it as running.
    pub(crate) fn install(&mut self, pid: ProcessId) {
        self.paging.map_user_window(pid);
        self.sync_video(pid);
        self.hw.set_kernel_stack(kernel_stack_top(pid));
        self.paging.commit(&mut self.hw);
        self.running = Some(pid);
    }

    /// Re-points `pid`'s video mapping at its terminal's current page. Needs a commit.
    pub(crate) fn sync_video(&mut self, pid: ProcessId) {
        let pcb = self.pcbs.get(pid);
        if pcb.vidmap {
            let frame = self.terminals.video_frame(pcb.terminal);
            self.paging.map_user_video_page(USER_VIDEO_VIRT, frame);
        } else {
            self.paging.unmap_user_video_page();
        }
    }

    fn current(&self) -> Result<ProcessId, SyscallError> {
        self.running.ok_or(SyscallError::NoProcess)
    }

    /// The terminal the running process belongs to.
    pub fn current_terminal(&self) -> Result<TerminalId, SyscallError> {
        Ok(self.pcbs.get(self.current()?).terminal)
    }

    pub fn open(&mut self, name: &[u8]) -> Result<usize, SyscallError> {
        let pid = self.current()?;
        let name = &name[..name.iter().position(|&b| b == 0).unwrap_or(name.len())];
        let pcb = self.pcbs.get_mut(pid);
        let mut io = ProcessIo {
            storage: &self.storage,
            hw: &mut self.hw,
            terminals: &mut self.terminals,
            terminal: pcb.terminal,
        };
        Ok(pcb.files.open(&mut io, name)?)
    }

    pub fn close(&mut self, fd: usize) -> Result<(), SyscallError> {
        let pid = self.current()?;
        Ok(self.pcbs.get_mut(pid).files.close(fd)?)
    }

    /// `Err(File(WouldBlock))` means try again after the next interrupt.
    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> Result<usize, SyscallError> {
        let pid = self.current()?;
        let pcb = self.pcbs.get_mut(pid);
        let mut io = ProcessIo {
            storage: &self.storage,
            hw: &mut self.hw,
            terminals: &mut self.terminals,
            terminal: pcb.terminal,
        };
        Ok(pcb.files.read(fd, &mut io, buf)?)
    }

    pub fn write(&mut self, fd: usize, buf: &[u8]) -> Result<usize, SyscallError> {
        let pid = self.current()?;
        let pcb = self.pcbs.get_mut(pid);
        let mut io = ProcessIo {
            storage: &self.storage,
            hw: &mut self.hw,
            terminals: &mut self.terminals,
            terminal: pcb.terminal,
        };
        Ok(pcb.files.write(fd, &mut io, buf)?)
    }

    /// Copies the argument tail and its terminator, cut to `buf`.
    pub fn getargs(&self, buf: &mut [u8]) -> Result<(), SyscallError> {
        let args = &self.pcbs.get(self.current()?).arguments;
        if args.is_empty() {
            return Err(SyscallError::NoArguments);
        }
        if buf.is_empty() {
            return Err(SyscallError::File(FileError::InvalidArgument));
        }
        let src = args.with_terminator();
        let n = src.len().min(buf.len());
        buf[..n].copy_from_slice(&src[..n]);
        Ok(())
    }

    /// Maps the caller's terminal video page at its fixed user address.
    pub fn vidmap(&mut self) -> Result<u32, SyscallError> {
        let pid = self.current()?;
        self.pcbs.get_mut(pid).vidmap = true;
        self.sync_video(pid);
        self.paging.commit(&mut self.hw);
        Ok(USER_VIDEO_VIRT)
    }

    /// Tells the faulting program's terminal why it is being halted.
    pub fn report_fault(&mut self, name: &str) {
        if let Ok(terminal) = self.current_terminal() {
            self.terminals.write(&mut self.hw, terminal, b"\nException: ");
            self.terminals.write(&mut self.hw, terminal, name.as_bytes());
            self.terminals.write(&mut self.hw, terminal, b"\n");
        }
    }

    pub fn key_pressed(&mut self, event: KeyEvent) -> TerminalSwitch {
        match self.terminals.handle_key(&mut self.hw, event) {
            Some(target) => self.switch_terminal(target),
            None => TerminalSwitch::Unchanged,
        }
    }
}

/// A process's view of the devices its descriptors reach.
struct ProcessIo<'k, S, H> {
    storage: &'k S,
    hw: &'k mut H,
    terminals: &'k mut Multiplexer,
    terminal: TerminalId,
}

impl<S: Storage, H: Hardware> Devices for ProcessIo<'_, S, H> {
    type Storage = S;

    fn storage(&self) -> &S {
        self.storage
    }

    fn rtc_set_frequency(&mut self, hz: u32) {
        self.hw.set_frequency(hz);
    }

    fn rtc_take_tick(&mut self) -> bool {
        self.hw.take_tick()
    }

    fn read_line(&mut self, buf: &mut [u8]) -> Option<usize> {
        self.terminals.take_line(self.terminal, buf)
    }

    fn write_screen(&mut self, bytes: &[u8]) {
        self.terminals.write(&mut *self.hw, self.terminal, bytes);
    }
}

#[cfg(all(target_arch = "x86_64", not(test)))]
pub use global::{with_kernel, KernelState, KERNEL};

#[cfg(all(target_arch = "x86_64", not(test)))]
mod global {
    use spin::Mutex;

    use super::Kernel;
    use crate::fs::BootImage;
    use crate::machine::Machine;

    pub type KernelState = Kernel<BootImage<'static>, Machine>;

    pub static KERNEL: Mutex<Option<KernelState>> = Mutex::new(None);

    /// Runs `f` on the kernel state with interrupts off.
    pub fn with_kernel<R>(f: impl FnOnce(&mut KernelState) -> R) -> R {
        x86_64::instructions::interrupts::without_interrupts(|| {
            let mut guard = KERNEL.lock();
            match guard.as_mut() {
                Some(kernel) => f(kernel),
                None => panic!("kernel state used before boot"),
            }
        })
    }
}
