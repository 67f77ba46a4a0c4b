use core::fmt;

/// Boot-image and file-operation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    NameTooLong,
    InvalidInode,
    /// A block index or length points outside the image.
    Corrupt,
    ReadOnly,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "No such file or directory"),
            FsError::NameTooLong => write!(f, "File name too long"),
            FsError::InvalidInode => write!(f, "Inode out of range"),
            FsError::Corrupt => write!(f, "Boot image is corrupt"),
            FsError::ReadOnly => write!(f, "Read-only file system"),
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
