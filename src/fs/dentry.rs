use crate::config::MAX_NAME_LEN;

/// Type tag stored in a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Rtc,
    Directory,
    File,
}

impl FileType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(FileType::Rtc),
            1 => Some(FileType::Directory),
            2 => Some(FileType::File),
            _ => None,
        }
    }
}

/// A directory entry: a name of at most 32 bytes (not NUL terminated when
/// it uses all 32), its type and its inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; MAX_NAME_LEN],
    pub file_type: FileType,
    pub inode: u32,
}

impl DirEntry {
    pub fn new(name: &[u8], file_type: FileType, inode: u32) -> Self {
        let mut raw = [0u8; MAX_NAME_LEN];
        let len = name.len().min(MAX_NAME_LEN);
        raw[..len].copy_from_slice(&name[..len]);
        DirEntry { name: raw, file_type, inode }
    }

    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        &self.name[..len]
    }
}
