pub mod bootimg;
pub mod dentry;
pub mod error;
pub mod fd;

pub use bootimg::BootImage;
pub use dentry::{DirEntry, FileType};
pub use error::{FsError, FsResult};

/// The read-only boot-time storage layer as seen by the process core.
pub trait Storage {
    /// Names longer than 32 bytes never match.
    fn lookup_by_name(&self, name: &[u8]) -> FsResult<DirEntry>;
    fn lookup_by_index(&self, index: u32) -> FsResult<DirEntry>;
    /// Copies up to `buf.len()` bytes starting at `offset`; fewer at end of file.
    fn read_bytes(&self, inode: u32, offset: u32, buf: &mut [u8]) -> FsResult<usize>;
    fn file_length(&self, inode: u32) -> FsResult<u32>;
    fn entry_count(&self) -> u32;
}
