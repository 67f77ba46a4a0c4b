//! Starting a program in a fresh slot and unwinding back to its parent.

use core::fmt;

use super::{kernel_stack_top, Arguments, ProcessControlBlock, ProcessId};
use crate::config::{
    FAULT_EXIT_STATUS, FAULT_HALT_STATUS, MAX_NAME_LEN, USER_LOAD_ADDR, USER_STACK_TOP,
    USER_WINDOW_END, USER_WINDOW_VIRT,
};
use crate::drivers::tty::TerminalId;
use crate::fs::fd::FileTable;
use crate::fs::{FileType, Storage};
use crate::kernel::{Hardware, Kernel};
use crate::memory::paging::user_frame;
use crate::scheduler::context::SavedContext;

// ══════════════════════════════════════════════════════════════
//  Executable header
// ══════════════════════════════════════════════════════════════

const EXEC_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
/// Little-endian entry point, relative to the start of the file.
const ENTRY_OFFSET: usize = 24;
const HEADER_LEN: usize = ENTRY_OFFSET + 4;

/// Offset of the load address inside the 4MB user frame.
const LOAD_OFFSET: usize = (USER_LOAD_ADDR - USER_WINDOW_VIRT) as usize;
const MAX_IMAGE_LEN: usize = (USER_WINDOW_END - USER_LOAD_ADDR) as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    EmptyCommand,
    NotFound,
    NotExecutable,
    NoCapacity,
    LoadFailure,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::EmptyCommand  => write!(f, "Empty command"),
            ExecError::NotFound      => write!(f, "Program not found"),
            ExecError::NotExecutable => write!(f, "Not an executable"),
            ExecError::NoCapacity    => write!(f, "No free process slot"),
            ExecError::LoadFailure   => write!(f, "Program image could not be loaded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltError {
    /// Nothing is running.
    NoProcess,
    /// A terminal root halted and its replacement shell could not start.
    ShellUnavailable,
}

impl fmt::Display for HaltError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HaltError::NoProcess        => write!(f, "No running process"),
            HaltError::ShellUnavailable => write!(f, "Shell could not be restarted"),
        }
    }
}

/// A loaded program, mapped and ready for its first ring 3 entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launch {
    pub pid: ProcessId,
    pub entry: u32,
    pub user_stack: u32,
    pub kernel_stack: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltOutcome {
    /// Continue the parent's pending exec, which returns `status`.
    ResumeParent { parent: ProcessId, context: SavedContext, status: i32 },
    /// A terminal root halted; a fresh shell took its place.
    Relaunch(Launch),
}

/// Splits at the first space into the program name and the argument tail,
/// skipping leading spaces before each. The command ends at the first NUL.
pub fn parse_command(command: &[u8]) -> Result<(&[u8], &[u8]), ExecError> {
    let end = command.iter().position(|&b| b == 0).unwrap_or(command.len());
    let command = trim_leading_spaces(&command[..end]);
    if command.is_empty() {
        return Err(ExecError::EmptyCommand);
    }
    let split = command.iter().position(|&b| b == b' ').unwrap_or(command.len());
    let (name, rest) = command.split_at(split);
    Ok((name, trim_leading_spaces(rest)))
}

fn trim_leading_spaces(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != b' ').unwrap_or(bytes.len());
    &bytes[start..]
}

/// Checks the program file and returns its inode, length and entry point.
fn validate<S: Storage>(storage: &S, name: &[u8]) -> Result<(u32, usize, u32), ExecError> {
    if name.len() > MAX_NAME_LEN {
        return Err(ExecError::NotFound);
    }
    let entry = storage.lookup_by_name(name).map_err(|_| ExecError::NotFound)?;
    if entry.file_type != FileType::File {
        return Err(ExecError::NotExecutable);
    }
    let mut header = [0u8; HEADER_LEN];
    let n = storage
        .read_bytes(entry.inode, 0, &mut header)
        .map_err(|_| ExecError::NotExecutable)?;
    if n < HEADER_LEN || header[..4] != EXEC_MAGIC {
        return Err(ExecError::NotExecutable);
    }
    let length = storage.file_length(entry.inode).map_err(|_| ExecError::LoadFailure)? as usize;
    let start = u32::from_le_bytes([header[24], header[25], header[26], header[27]]);
    Ok((entry.inode, length, start))
}

impl<S: Storage, H: Hardware> Kernel<S, H> {
    /// Loads `command` as the new foreground of `terminal`. Its parent is the
    /// terminal's current foreground. On error no PCB changes state and no
    /// foreground moves.
    pub fn exec(&mut self, terminal: TerminalId, command: &[u8]) -> Result<Launch, ExecError> {
        let (name, tail) = parse_command(command)?;
        let (inode, length, entry) = validate(&self.storage, name)?;
        let pid = self.pcbs.find_free_slot().ok_or(ExecError::NoCapacity)?;

        self.paging.map_user_window(pid);
        self.paging.commit(&mut self.hw);
        if let Err(err) = self.load_image(pid, inode, length) {
            self.paging.unmap_user_window(pid);
            if let Some(previous) = self.running {
                self.paging.map_user_window(previous);
            }
            self.paging.commit(&mut self.hw);
            crate::log_warn!("exec: loading into slot {} failed: {}", pid, err);
            return Err(err);
        }

        let parent = self.terminals.get(terminal).foreground;
        *self.pcbs.get_mut(pid) = ProcessControlBlock {
            pid,
            parent,
            terminal,
            exec_context: SavedContext::empty(),
            switch_context: SavedContext::empty(),
            files: FileTable::with_stdio(),
            arguments: Arguments::new(tail),
            active: true,
            vidmap: false,
        };
        let term = self.terminals.get_mut(terminal);
        term.foreground = Some(pid);
        term.process_count += 1;
        self.install(pid);

        crate::log_info!(
            "exec: pid {} on {} (parent {:?}, entry {:#x})",
            pid, terminal, parent, entry
        );
        Ok(Launch { pid, entry, user_stack: USER_STACK_TOP, kernel_stack: kernel_stack_top(pid) })
    }

    fn load_image(&mut self, pid: ProcessId, inode: u32, length: usize) -> Result<(), ExecError> {
        if length > MAX_IMAGE_LEN {
            return Err(ExecError::LoadFailure);
        }
        let frame = self.hw.user_frame(user_frame(pid));
        let dest = frame
            .get_mut(LOAD_OFFSET..LOAD_OFFSET + length)
            .ok_or(ExecError::LoadFailure)?;
        match self.storage.read_bytes(inode, 0, dest) {
            Ok(n) if n == length => Ok(()),
            _ => Err(ExecError::LoadFailure),
        }
    }

    /// Ends the running process. Status 255 (exceptions) is reported as 256.
    pub fn halt(&mut self, status: u8) -> Result<HaltOutcome, HaltError> {
        let pid = self.running.ok_or(HaltError::NoProcess)?;
        let status = if status == FAULT_HALT_STATUS { FAULT_EXIT_STATUS } else { status as i32 };

        let pcb = self.pcbs.get_mut(pid);
        pcb.files.close_all();
        pcb.active = false;
        let (parent, terminal, context, had_vidmap) =
            (pcb.parent, pcb.terminal, pcb.exec_context, pcb.vidmap);
        pcb.vidmap = false;

        if had_vidmap {
            self.paging.unmap_user_video_page();
        }
        self.paging.unmap_user_window(pid);
        let term = self.terminals.get_mut(terminal);
        term.process_count -= 1;

        let Some(parent) = parent else {
            term.foreground = None;
            self.running = None;
            self.paging.commit(&mut self.hw);
            crate::log_info!("halt: root pid {} of {} exited ({}), restarting shell", pid, terminal, status);
            let shell = self.config.shell;
            return match self.exec(terminal, shell) {
                Ok(launch) => Ok(HaltOutcome::Relaunch(launch)),
                Err(err) => {
                    // the next visit to this terminal tries again
                    self.terminals.get_mut(terminal).launched = false;
                    crate::log_error!("halt: cannot restart shell on {}: {}", terminal, err);
                    Err(HaltError::ShellUnavailable)
                }
            };
        };

        term.foreground = Some(parent);
        self.pcbs.get_mut(parent).active = true;
        self.install(parent);
        crate::log_info!("halt: pid {} exited ({}), back to pid {}", pid, status, parent);
        Ok(HaltOutcome::ResumeParent { parent, context, status })
    }
}
