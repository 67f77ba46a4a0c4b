//! int 0x80 system calls: number in rax, arguments in rdi, rsi, rdx.
//! Every failure reaches user code as -1.

use core::fmt;

use crate::config::{USER_WINDOW_END, USER_WINDOW_VIRT};
use crate::fs::fd::FileError;
use crate::process::{ExecError, HaltError};

pub const SYS_HALT: u64 = 1;
pub const SYS_EXEC: u64 = 2;
pub const SYS_READ: u64 = 3;
pub const SYS_WRITE: u64 = 4;
pub const SYS_OPEN: u64 = 5;
pub const SYS_CLOSE: u64 = 6;
pub const SYS_GETARGS: u64 = 7;
pub const SYS_VIDMAP: u64 = 8;
pub const SYS_SET_HANDLER: u64 = 9;
pub const SYS_SIGRETURN: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    Exec(ExecError),
    Halt(HaltError),
    File(FileError),
    /// A user pointer outside the caller's 4MB window.
    BadAddress,
    NoProcess,
    NoArguments,
    Unsupported,
}

impl SyscallError {
    /// The value user code sees in rax.
    pub fn code(self) -> i64 {
        -1
    }
}

impl From<ExecError> for SyscallError {
    fn from(err: ExecError) -> Self {
        SyscallError::Exec(err)
    }
}

impl From<HaltError> for SyscallError {
    fn from(err: HaltError) -> Self {
        SyscallError::Halt(err)
    }
}

impl From<FileError> for SyscallError {
    fn from(err: FileError) -> Self {
        SyscallError::File(err)
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyscallError::Exec(err) => write!(f, "exec: {}", err),
            SyscallError::Halt(err) => write!(f, "halt: {}", err),
            SyscallError::File(err) => write!(f, "{}", err),
            SyscallError::BadAddress => write!(f, "Bad address"),
            SyscallError::NoProcess => write!(f, "No running process"),
            SyscallError::NoArguments => write!(f, "No arguments"),
            SyscallError::Unsupported => write!(f, "Unsupported system call"),
        }
    }
}

/// `[ptr, ptr + len)` must sit inside the user window.
pub fn check_user_range(ptr: u64, len: u64) -> Result<(), SyscallError> {
    let end = ptr.checked_add(len).ok_or(SyscallError::BadAddress)?;
    if ptr < USER_WINDOW_VIRT as u64 || ptr >= USER_WINDOW_END as u64 || end > USER_WINDOW_END as u64 {
        return Err(SyscallError::BadAddress);
    }
    Ok(())
}

/// Byte count argument as passed in a 32-bit register; negative is invalid.
pub fn byte_count(raw: u64) -> Result<usize, SyscallError> {
    let n = raw as u32 as i32;
    if n < 0 {
        return Err(SyscallError::File(FileError::InvalidArgument));
    }
    Ok(n as usize)
}

#[cfg(all(target_arch = "x86_64", not(test)))]
pub use hw::{dispatch, halt_current};

#[cfg(all(target_arch = "x86_64", not(test)))]
mod hw {
    use x86_64::instructions::interrupts;

    use super::*;
    use crate::config::{LINE_BUFFER_SIZE, MAX_NAME_LEN, USER_WINDOW_END};
    use crate::interrupts::usermode;
    use crate::kernel::with_kernel;
    use crate::process::HaltOutcome;
    use crate::scheduler::context::resume;

    const MAX_COMMAND: usize = MAX_NAME_LEN + 1 + LINE_BUFFER_SIZE;

    /// Called from the int 0x80 stub with interrupts off.
    pub extern "C" fn dispatch(number: u64, arg0: u64, arg1: u64, arg2: u64) -> i64 {
        let result = match number {
            SYS_HALT => halt_current(arg0 as u8),
            SYS_EXEC => sys_exec(arg0),
            SYS_READ => sys_read(arg0, arg1, arg2),
            SYS_WRITE => sys_write(arg0, arg1, arg2),
            SYS_OPEN => sys_open(arg0),
            SYS_CLOSE => with_kernel(|k| k.close(arg0 as usize)).map(|_| 0),
            SYS_GETARGS => sys_getargs(arg0, arg1),
            SYS_VIDMAP => sys_vidmap(arg0),
            SYS_SET_HANDLER | SYS_SIGRETURN => Err(SyscallError::Unsupported),
            _ => {
                crate::log_warn!("syscall: unknown number {}", number);
                Err(SyscallError::Unsupported)
            }
        };
        match result {
            Ok(value) => value,
            Err(err) => {
                crate::log_debug!("syscall {} failed: {}", number, err);
                err.code()
            }
        }
    }

    /// # Safety
    /// The range must have passed `check_user_range` for the running process.
    unsafe fn user_slice<'a>(ptr: u64, len: usize) -> &'a mut [u8] {
        core::slice::from_raw_parts_mut(ptr as usize as *mut u8, len)
    }

    /// Repeats `op` with interrupts briefly enabled until it stops reporting `WouldBlock`.
    fn blocking<T>(mut op: impl FnMut() -> Result<T, SyscallError>) -> Result<T, SyscallError> {
        loop {
            match op() {
                Err(SyscallError::File(FileError::WouldBlock)) => {
                    interrupts::enable_and_hlt();
                    interrupts::disable();
                }
                other => return other,
            }
        }
    }

    /// Ends the running process; exception handlers pass 255.
    pub fn halt_current(status: u8) -> ! {
        match with_kernel(|k| k.halt(status)) {
            Ok(HaltOutcome::ResumeParent { context, status, .. }) => unsafe {
                resume(&context, status as i64)
            },
            Ok(HaltOutcome::Relaunch(launch)) => {
                let slot = with_kernel(|k| k.pcbs.exec_context_ptr(launch.pid));
                unsafe { usermode::launch(slot, launch) };
            }
            Err(err) => crate::log_error!("halt: {}", err),
        }
        loop {
            interrupts::enable_and_hlt();
        }
    }

    fn sys_exec(ptr: u64) -> Result<i64, SyscallError> {
        check_user_range(ptr, 1)?;
        let len = MAX_COMMAND.min((USER_WINDOW_END as u64 - ptr) as usize);
        let mut command = [0u8; MAX_COMMAND];
        command[..len].copy_from_slice(unsafe { user_slice(ptr, len) });

        let (launch, slot) = with_kernel(|k| {
            let terminal = k.current_terminal()?;
            let launch = k.exec(terminal, &command[..len])?;
            Ok::<_, SyscallError>((launch, k.pcbs.exec_context_ptr(launch.pid)))
        })?;
        Ok(unsafe { usermode::launch(slot, launch) })
    }

    fn sys_read(fd: u64, buf: u64, n: u64) -> Result<i64, SyscallError> {
        let n = byte_count(n)?;
        check_user_range(buf, n as u64)?;
        let buf = unsafe { user_slice(buf, n) };
        blocking(|| with_kernel(|k| k.read(fd as usize, buf))).map(|n| n as i64)
    }

    fn sys_write(fd: u64, buf: u64, n: u64) -> Result<i64, SyscallError> {
        let n = byte_count(n)?;
        check_user_range(buf, n as u64)?;
        let buf = unsafe { user_slice(buf, n) };
        with_kernel(|k| k.write(fd as usize, buf)).map(|n| n as i64)
    }

    fn sys_open(ptr: u64) -> Result<i64, SyscallError> {
        check_user_range(ptr, 1)?;
        let len = (MAX_NAME_LEN + 1).min((USER_WINDOW_END as u64 - ptr) as usize);
        let name = unsafe { user_slice(ptr, len) };
        with_kernel(|k| k.open(name)).map(|fd| fd as i64)
    }

    fn sys_getargs(buf: u64, n: u64) -> Result<i64, SyscallError> {
        let n = byte_count(n)?;
        check_user_range(buf, n as u64)?;
        let buf = unsafe { user_slice(buf, n) };
        with_kernel(|k| k.getargs(buf)).map(|_| 0)
    }

    fn sys_vidmap(ptr: u64) -> Result<i64, SyscallError> {
        check_user_range(ptr, core::mem::size_of::<u64>() as u64)?;
        let addr = with_kernel(|k| k.vidmap())?;
        unsafe { (ptr as usize as *mut u64).write_unaligned(addr as u64) };
        Ok(addr as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ranges_must_stay_in_window() {
        assert!(check_user_range(0x0804_8000, 16).is_ok());
        assert!(check_user_range(0x083F_FFF0, 16).is_ok());
        assert_eq!(check_user_range(0x083F_FFF8, 16), Err(SyscallError::BadAddress));
        assert_eq!(check_user_range(0x07FF_FFFF, 1), Err(SyscallError::BadAddress));
        assert_eq!(check_user_range(0x0840_0000, 0), Err(SyscallError::BadAddress));
        assert_eq!(check_user_range(0, 4), Err(SyscallError::BadAddress));
        assert_eq!(check_user_range(u64::MAX, 2), Err(SyscallError::BadAddress));
    }

    #[test]
    fn negative_counts_are_invalid() {
        assert_eq!(byte_count(5), Ok(5));
        assert_eq!(byte_count(0), Ok(0));
        assert!(byte_count(-1i32 as u32 as u64).is_err());
    }

    #[test]
    fn every_error_is_minus_one() {
        assert_eq!(SyscallError::from(ExecError::NoCapacity).code(), -1);
        assert_eq!(SyscallError::Unsupported.code(), -1);
    }
}
