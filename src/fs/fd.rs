//! Per-process descriptor table and the five file classes it dispatches to.

use core::fmt;

use super::dentry::{DirEntry, FileType};
use super::error::FsError;
use super::Storage;
use crate::config::MAX_FILES;

/// Lowest descriptor user code may open or close.
pub const FIRST_USER_FD: usize = 2;
pub const STDIN: usize = 0;
pub const STDOUT: usize = 1;

const RTC_DEFAULT_HZ: u32 = 2;
const RTC_MAX_HZ: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    /// The class does not implement this operation.
    NotSupported,
    BadDescriptor,
    /// No free descriptor in 2..8.
    TableFull,
    /// Nothing to return yet; the caller waits for an interrupt and retries.
    WouldBlock,
    InvalidArgument,
    Storage(FsError),
}

impl From<FsError> for FileError {
    fn from(err: FsError) -> Self {
        FileError::Storage(err)
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::NotSupported => write!(f, "Operation not supported"),
            FileError::BadDescriptor => write!(f, "Bad file descriptor"),
            FileError::TableFull => write!(f, "Too many open files"),
            FileError::WouldBlock => write!(f, "Operation would block"),
            FileError::InvalidArgument => write!(f, "Invalid argument"),
            FileError::Storage(err) => write!(f, "{}", err),
        }
    }
}

pub type FileResult<T> = Result<T, FileError>;

/// Everything a file operation can reach outside the descriptor itself.
pub trait Devices {
    type Storage: Storage;

    fn storage(&self) -> &Self::Storage;
    fn rtc_set_frequency(&mut self, hz: u32);
    /// True once per periodic interrupt since the previous call.
    fn rtc_take_tick(&mut self) -> bool;
    /// Hands over the caller's terminal's completed input line, if any.
    fn read_line(&mut self, buf: &mut [u8]) -> Option<usize>;
    /// Renders on the caller's terminal.
    fn write_screen(&mut self, bytes: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    Stdin,
    Stdout,
    Rtc,
    File,
    Directory,
}

impl FileClass {
    pub fn for_type(file_type: FileType) -> Self {
        match file_type {
            FileType::Rtc => FileClass::Rtc,
            FileType::Directory => FileClass::Directory,
            FileType::File => FileClass::File,
        }
    }

    pub fn open<D: Devices>(self, dev: &mut D) -> FileResult<()> {
        match self {
            FileClass::Stdin | FileClass::Stdout => Err(FileError::NotSupported),
            FileClass::Rtc => {
                dev.rtc_set_frequency(RTC_DEFAULT_HZ);
                Ok(())
            }
            FileClass::File | FileClass::Directory => Ok(()),
        }
    }

    pub fn read<D: Devices>(
        self,
        desc: &mut FileDescriptor,
        dev: &mut D,
        buf: &mut [u8],
    ) -> FileResult<usize> {
        match self {
            FileClass::Stdout => Err(FileError::NotSupported),
            FileClass::Stdin => dev.read_line(buf).ok_or(FileError::WouldBlock),
            // position 0: idle, 1: waiting for the tick that follows the first call
            FileClass::Rtc => {
                if desc.position == 0 {
                    dev.rtc_take_tick();
                    desc.position = 1;
                    return Err(FileError::WouldBlock);
                }
                if dev.rtc_take_tick() {
                    desc.position = 0;
                    Ok(0)
                } else {
                    Err(FileError::WouldBlock)
                }
            }
            FileClass::File => {
                let n = dev.storage().read_bytes(desc.inode, desc.position, buf)?;
                desc.position += n as u32;
                Ok(n)
            }
            FileClass::Directory => {
                let entry = match dev.storage().lookup_by_index(desc.position) {
                    Ok(entry) => entry,
                    Err(FsError::NotFound) => return Ok(0),
                    Err(err) => return Err(err.into()),
                };
                let name = entry.name();
                let n = name.len().min(buf.len());
                buf[..n].copy_from_slice(&name[..n]);
                desc.position += 1;
                Ok(n)
            }
        }
    }

    pub fn write<D: Devices>(self, dev: &mut D, buf: &[u8]) -> FileResult<usize> {
        match self {
            FileClass::Stdin => Err(FileError::NotSupported),
            FileClass::Stdout => {
                dev.write_screen(buf);
                Ok(buf.len())
            }
            FileClass::Rtc => {
                let bytes: [u8; 4] = buf.try_into().map_err(|_| FileError::InvalidArgument)?;
                let hz = u32::from_le_bytes(bytes);
                if !hz.is_power_of_two() || !(RTC_DEFAULT_HZ..=RTC_MAX_HZ).contains(&hz) {
                    return Err(FileError::InvalidArgument);
                }
                dev.rtc_set_frequency(hz);
                Ok(buf.len())
            }
            FileClass::File | FileClass::Directory => Err(FileError::Storage(FsError::ReadOnly)),
        }
    }

    pub fn close(self) -> FileResult<()> {
        match self {
            FileClass::Stdin | FileClass::Stdout => Err(FileError::NotSupported),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    pub class: FileClass,
    pub inode: u32,
    /// Byte offset for files, entry index for directories.
    pub position: u32,
    pub in_use: bool,
}

impl FileDescriptor {
    pub const CLOSED: FileDescriptor =
        FileDescriptor { class: FileClass::File, inode: 0, position: 0, in_use: false };

    fn opened(class: FileClass, entry: &DirEntry) -> Self {
        let inode = if class == FileClass::File { entry.inode } else { 0 };
        FileDescriptor { class, inode, position: 0, in_use: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTable {
    entries: [FileDescriptor; MAX_FILES],
}

impl FileTable {
    pub const CLOSED: FileTable = FileTable { entries: [FileDescriptor::CLOSED; MAX_FILES] };

    /// Descriptors 0 and 1 wired to the terminal, the rest closed.
    pub fn with_stdio() -> Self {
        let mut entries = Self::CLOSED.entries;
        entries[STDIN] = FileDescriptor { class: FileClass::Stdin, inode: 0, position: 0, in_use: true };
        entries[STDOUT] = FileDescriptor { class: FileClass::Stdout, inode: 0, position: 0, in_use: true };
        FileTable { entries }
    }

    pub fn get(&self, fd: usize) -> Option<&FileDescriptor> {
        self.entries.get(fd).filter(|d| d.in_use)
    }

    pub fn open_count(&self) -> usize {
        self.entries.iter().filter(|d| d.in_use).count()
    }

    pub fn open<D: Devices>(&mut self, dev: &mut D, name: &[u8]) -> FileResult<usize> {
        let entry = dev.storage().lookup_by_name(name)?;
        let fd = (FIRST_USER_FD..MAX_FILES)
            .find(|&fd| !self.entries[fd].in_use)
            .ok_or(FileError::TableFull)?;
        let class = FileClass::for_type(entry.file_type);
        class.open(dev)?;
        self.entries[fd] = FileDescriptor::opened(class, &entry);
        Ok(fd)
    }

    pub fn read<D: Devices>(&mut self, fd: usize, dev: &mut D, buf: &mut [u8]) -> FileResult<usize> {
        let desc = self.entry_mut(fd)?;
        let class = desc.class;
        class.read(desc, dev, buf)
    }

    pub fn write<D: Devices>(&mut self, fd: usize, dev: &mut D, buf: &[u8]) -> FileResult<usize> {
        let desc = self.entry_mut(fd)?;
        desc.class.write(dev, buf)
    }

    /// Only descriptors 2..8 can be closed.
    pub fn close(&mut self, fd: usize) -> FileResult<()> {
        if !(FIRST_USER_FD..MAX_FILES).contains(&fd) {
            return Err(FileError::BadDescriptor);
        }
        let desc = self.entry_mut(fd)?;
        desc.class.close()?;
        *desc = FileDescriptor::CLOSED;
        Ok(())
    }

    /// Releases descriptors 2..8. Stdin and stdout stay wired.
    pub fn close_all(&mut self) {
        self.entries[FIRST_USER_FD..].fill(FileDescriptor::CLOSED);
    }

    fn entry_mut(&mut self, fd: usize) -> FileResult<&mut FileDescriptor> {
        self.entries
            .get_mut(fd)
            .filter(|d| d.in_use)
            .ok_or(FileError::BadDescriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::BootImage;
    use crate::testing::ImageBuilder;

    struct Bench<'a> {
        image: BootImage<'a>,
        rate: Option<u32>,
        ticks: u32,
        line: Option<&'static [u8]>,
        screen: Vec<u8>,
    }

    impl<'a> Bench<'a> {
        fn new(data: &'a [u8]) -> Self {
            Bench { image: BootImage::new(data).unwrap(), rate: None, ticks: 0, line: None, screen: Vec::new() }
        }
    }

    impl<'a> Devices for Bench<'a> {
        type Storage = BootImage<'a>;

        fn storage(&self) -> &BootImage<'a> {
            &self.image
        }

        fn rtc_set_frequency(&mut self, hz: u32) {
            self.rate = Some(hz);
        }

        fn rtc_take_tick(&mut self) -> bool {
            if self.ticks > 0 {
                self.ticks -= 1;
                true
            } else {
                false
            }
        }

        fn read_line(&mut self, buf: &mut [u8]) -> Option<usize> {
            let line = self.line.take()?;
            let n = line.len().min(buf.len());
            buf[..n].copy_from_slice(&line[..n]);
            Some(n)
        }

        fn write_screen(&mut self, bytes: &[u8]) {
            self.screen.extend_from_slice(bytes);
        }
    }

    fn image() -> Vec<u8> {
        ImageBuilder::new()
            .directory(".")
            .rtc("rtc")
            .file("frame0.txt", b"hello, world")
            .build()
    }

    #[test]
    fn stdio_cannot_be_opened_or_closed() {
        let data = image();
        let mut dev = Bench::new(&data);
        assert_eq!(FileClass::Stdin.open(&mut dev), Err(FileError::NotSupported));
        assert_eq!(FileClass::Stdout.open(&mut dev), Err(FileError::NotSupported));
        let mut table = FileTable::with_stdio();
        assert_eq!(table.close(STDIN), Err(FileError::BadDescriptor));
        assert_eq!(table.close(STDOUT), Err(FileError::BadDescriptor));
        assert_eq!(table.open_count(), 2);
    }

    #[test]
    fn stdio_directions_are_enforced() {
        let data = image();
        let mut dev = Bench::new(&data);
        let mut table = FileTable::with_stdio();
        let mut buf = [0u8; 8];
        assert_eq!(table.read(STDOUT, &mut dev, &mut buf), Err(FileError::NotSupported));
        assert_eq!(table.write(STDIN, &mut dev, b"x"), Err(FileError::NotSupported));
        assert_eq!(table.write(STDOUT, &mut dev, b"hi\n"), Ok(3));
        assert_eq!(dev.screen, b"hi\n");
    }

    #[test]
    fn stdin_blocks_until_a_line_is_ready() {
        let data = image();
        let mut dev = Bench::new(&data);
        let mut table = FileTable::with_stdio();
        let mut buf = [0u8; 16];
        assert_eq!(table.read(STDIN, &mut dev, &mut buf), Err(FileError::WouldBlock));
        dev.line = Some(b"ls\n");
        assert_eq!(table.read(STDIN, &mut dev, &mut buf), Ok(3));
        assert_eq!(&buf[..3], b"ls\n");
    }

    #[test]
    fn six_opens_fill_the_table() {
        let data = image();
        let mut dev = Bench::new(&data);
        let mut table = FileTable::with_stdio();
        for expected in 2..8 {
            assert_eq!(table.open(&mut dev, b"frame0.txt"), Ok(expected));
        }
        assert_eq!(table.open(&mut dev, b"frame0.txt"), Err(FileError::TableFull));
        table.close(4).unwrap();
        assert_eq!(table.open(&mut dev, b"."), Ok(4));
    }

    #[test]
    fn missing_names_do_not_take_a_slot() {
        let data = image();
        let mut dev = Bench::new(&data);
        let mut table = FileTable::with_stdio();
        assert_eq!(
            table.open(&mut dev, b"nope"),
            Err(FileError::Storage(FsError::NotFound))
        );
        assert_eq!(table.open_count(), 2);
    }

    #[test]
    fn file_reads_advance_and_reach_end() {
        let data = image();
        let mut dev = Bench::new(&data);
        let mut table = FileTable::with_stdio();
        let fd = table.open(&mut dev, b"frame0.txt").unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(table.read(fd, &mut dev, &mut buf), Ok(5));
        assert_eq!(&buf, b"hello");
        assert_eq!(table.read(fd, &mut dev, &mut buf), Ok(5));
        assert_eq!(&buf, b", wor");
        assert_eq!(table.read(fd, &mut dev, &mut buf), Ok(2));
        assert_eq!(table.read(fd, &mut dev, &mut buf), Ok(0));
        assert_eq!(
            table.write(fd, &mut dev, b"x"),
            Err(FileError::Storage(FsError::ReadOnly))
        );
    }

    #[test]
    fn directory_reads_list_one_name_per_call() {
        let data = image();
        let mut dev = Bench::new(&data);
        let mut table = FileTable::with_stdio();
        let fd = table.open(&mut dev, b".").unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(table.read(fd, &mut dev, &mut buf), Ok(1));
        assert_eq!(table.read(fd, &mut dev, &mut buf), Ok(3));
        assert_eq!(&buf[..3], b"rtc");
        let mut short = [0u8; 4];
        assert_eq!(table.read(fd, &mut dev, &mut short), Ok(4));
        assert_eq!(&short, b"fram");
        assert_eq!(table.read(fd, &mut dev, &mut buf), Ok(0));
    }

    #[test]
    fn rtc_open_resets_rate_and_write_validates() {
        let data = image();
        let mut dev = Bench::new(&data);
        let mut table = FileTable::with_stdio();
        let fd = table.open(&mut dev, b"rtc").unwrap();
        assert_eq!(dev.rate, Some(2));
        assert_eq!(table.write(fd, &mut dev, &64u32.to_le_bytes()), Ok(4));
        assert_eq!(dev.rate, Some(64));
        for bad in [0u32, 1, 3, 2048] {
            assert_eq!(
                table.write(fd, &mut dev, &bad.to_le_bytes()),
                Err(FileError::InvalidArgument)
            );
        }
        assert_eq!(table.write(fd, &mut dev, b"ab"), Err(FileError::InvalidArgument));
        assert_eq!(dev.rate, Some(64));
    }

    #[test]
    fn rtc_read_waits_for_a_fresh_tick() {
        let data = image();
        let mut dev = Bench::new(&data);
        let mut table = FileTable::with_stdio();
        let fd = table.open(&mut dev, b"rtc").unwrap();
        let mut buf = [0u8; 4];
        dev.ticks = 1;
        // the stale tick is discarded
        assert_eq!(table.read(fd, &mut dev, &mut buf), Err(FileError::WouldBlock));
        assert_eq!(table.read(fd, &mut dev, &mut buf), Err(FileError::WouldBlock));
        dev.ticks = 1;
        assert_eq!(table.read(fd, &mut dev, &mut buf), Ok(0));
    }

    #[test]
    fn close_rejects_unopened_and_out_of_range() {
        let mut table = FileTable::with_stdio();
        assert_eq!(table.close(5), Err(FileError::BadDescriptor));
        assert_eq!(table.close(8), Err(FileError::BadDescriptor));
        let data = image();
        let mut dev = Bench::new(&data);
        let fd = table.open(&mut dev, b"rtc").unwrap();
        table.close_all();
        assert!(table.get(fd).is_none());
        assert!(table.get(STDOUT).is_some());
    }

    #[test]
    fn close_all_frees_every_user_slot() {
        let data = image();
        let mut dev = Bench::new(&data);
        let mut table = FileTable::with_stdio();
        for fd in FIRST_USER_FD..MAX_FILES {
            assert_eq!(table.open(&mut dev, b"frame0.txt"), Ok(fd));
        }
        table.close_all();
        assert_eq!(table.open_count(), 2);
        assert_eq!(table.get(STDIN).map(|d| d.class), Some(FileClass::Stdin));
        assert_eq!(table.get(STDOUT).map(|d| d.class), Some(FileClass::Stdout));
        assert_eq!(table.open(&mut dev, b"rtc"), Ok(FIRST_USER_FD));
    }
}
