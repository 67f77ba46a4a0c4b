//! Read-only file system image loaded by the bootloader as a multiboot module.
//!
//! Layout, in 4KB blocks: a boot block (counts plus up to 63 directory
//! entries), one block per inode (length plus data block indices), then the
//! data blocks.

use super::dentry::{DirEntry, FileType};
use super::error::{FsError, FsResult};
use super::Storage;
use crate::config::MAX_NAME_LEN;

pub const BLOCK_SIZE: usize = 4096;
pub const MAX_DIR_ENTRIES: usize = 63;
pub const DIR_ENTRY_SIZE: usize = 64;
const DIR_ENTRIES_OFFSET: usize = 64;
const BLOCKS_PER_INODE: usize = BLOCK_SIZE / 4 - 1;

fn read_u32(data: &[u8], offset: usize) -> FsResult<u32> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(FsError::Corrupt)
}

#[derive(Clone, Copy)]
pub struct BootImage<'a> {
    data: &'a [u8],
    dir_count: u32,
    inode_count: u32,
    data_count: u32,
}

impl<'a> BootImage<'a> {
    pub fn new(data: &'a [u8]) -> FsResult<Self> {
        let dir_count = read_u32(data, 0)?;
        let inode_count = read_u32(data, 4)?;
        let data_count = read_u32(data, 8)?;
        let blocks = 1 + inode_count as usize + data_count as usize;
        if dir_count as usize > MAX_DIR_ENTRIES || data.len() < blocks * BLOCK_SIZE {
            return Err(FsError::Corrupt);
        }
        Ok(BootImage { data, dir_count, inode_count, data_count })
    }

    /// # Safety
    /// `start..end` must be a readable module that lives for the rest of the kernel's life.
    pub unsafe fn from_module(start: u32, end: u32) -> FsResult<BootImage<'static>> {
        let len = end.saturating_sub(start) as usize;
        let data = core::slice::from_raw_parts(start as usize as *const u8, len);
        BootImage::new(data)
    }

    pub fn entry_count(&self) -> u32 {
        self.dir_count
    }

    fn entry_at(&self, index: u32) -> FsResult<DirEntry> {
        let base = DIR_ENTRIES_OFFSET + index as usize * DIR_ENTRY_SIZE;
        let name = self.data.get(base..base + MAX_NAME_LEN).ok_or(FsError::Corrupt)?;
        let file_type = FileType::from_raw(read_u32(self.data, base + 32)?).ok_or(FsError::Corrupt)?;
        let inode = read_u32(self.data, base + 36)?;
        Ok(DirEntry::new(name, file_type, inode))
    }

    fn inode_offset(&self, inode: u32) -> FsResult<usize> {
        if inode >= self.inode_count {
            return Err(FsError::InvalidInode);
        }
        Ok((inode as usize + 1) * BLOCK_SIZE)
    }

    fn data_block(&self, inode_base: usize, slot: usize) -> FsResult<&'a [u8]> {
        if slot >= BLOCKS_PER_INODE {
            return Err(FsError::Corrupt);
        }
        let index = read_u32(self.data, inode_base + 4 + slot * 4)?;
        if index >= self.data_count {
            return Err(FsError::Corrupt);
        }
        let start = (1 + self.inode_count as usize + index as usize) * BLOCK_SIZE;
        Ok(&self.data[start..start + BLOCK_SIZE])
    }
}

impl Storage for BootImage<'_> {
    fn lookup_by_name(&self, name: &[u8]) -> FsResult<DirEntry> {
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        if name.is_empty() {
            return Err(FsError::NotFound);
        }
        for index in 0..self.dir_count {
            let entry = self.entry_at(index)?;
            if entry.name() == name {
                return Ok(entry);
            }
        }
        Err(FsError::NotFound)
    }

    fn lookup_by_index(&self, index: u32) -> FsResult<DirEntry> {
        if index >= self.dir_count {
            return Err(FsError::NotFound);
        }
        self.entry_at(index)
    }

    fn read_bytes(&self, inode: u32, offset: u32, buf: &mut [u8]) -> FsResult<usize> {
        let inode_base = self.inode_offset(inode)?;
        let length = read_u32(self.data, inode_base)? as usize;
        let offset = offset as usize;
        if offset >= length {
            return Ok(0);
        }
        let wanted = buf.len().min(length - offset);
        let mut copied = 0;
        while copied < wanted {
            let pos = offset + copied;
            let block = self.data_block(inode_base, pos / BLOCK_SIZE)?;
            let start = pos % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - start).min(wanted - copied);
            buf[copied..copied + chunk].copy_from_slice(&block[start..start + chunk]);
            copied += chunk;
        }
        Ok(copied)
    }

    fn file_length(&self, inode: u32) -> FsResult<u32> {
        read_u32(self.data, self.inode_offset(inode)?)
    }

    fn entry_count(&self) -> u32 {
        self.dir_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ImageBuilder;

    fn sample() -> Vec<u8> {
        let big: Vec<u8> = (0..9000u32).map(|i| (i % 251) as u8).collect();
        ImageBuilder::new()
            .directory(".")
            .rtc("rtc")
            .file("frame0.txt", b"fish")
            .file("big", &big)
            .file("verylargetextwithverylongname.tx", b"long name")
            .build()
    }

    #[test]
    fn finds_entries_by_name_and_index() {
        let data = sample();
        let image = BootImage::new(&data).unwrap();
        assert_eq!(image.entry_count(), 5);
        let rtc = image.lookup_by_name(b"rtc").unwrap();
        assert_eq!(rtc.file_type, FileType::Rtc);
        let dot = image.lookup_by_index(0).unwrap();
        assert_eq!(dot.name(), b".");
        assert_eq!(dot.file_type, FileType::Directory);
        assert_eq!(image.lookup_by_index(5), Err(FsError::NotFound));
    }

    #[test]
    fn full_length_names_match_without_terminator() {
        let data = sample();
        let image = BootImage::new(&data).unwrap();
        let entry = image.lookup_by_name(b"verylargetextwithverylongname.tx").unwrap();
        assert_eq!(entry.name().len(), 32);
        assert_eq!(
            image.lookup_by_name(b"verylargetextwithverylongname.txt"),
            Err(FsError::NameTooLong)
        );
        assert_eq!(image.lookup_by_name(b"verylarge"), Err(FsError::NotFound));
    }

    #[test]
    fn reads_across_block_boundaries() {
        let data = sample();
        let image = BootImage::new(&data).unwrap();
        let big = image.lookup_by_name(b"big").unwrap();
        assert_eq!(image.file_length(big.inode).unwrap(), 9000);
        let mut buf = [0u8; 200];
        let n = image.read_bytes(big.inode, 4000, &mut buf).unwrap();
        assert_eq!(n, 200);
        for (i, b) in buf.iter().enumerate() {
            assert_eq!(*b, ((4000 + i) % 251) as u8);
        }
    }

    #[test]
    fn short_read_at_end_of_file() {
        let data = sample();
        let image = BootImage::new(&data).unwrap();
        let f = image.lookup_by_name(b"frame0.txt").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(image.read_bytes(f.inode, 1, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"ish");
        assert_eq!(image.read_bytes(f.inode, 4, &mut buf).unwrap(), 0);
        assert_eq!(image.read_bytes(99, 0, &mut buf), Err(FsError::InvalidInode));
    }

    #[test]
    fn rejects_truncated_image() {
        let data = sample();
        assert_eq!(BootImage::new(&data[..BLOCK_SIZE]).err(), Some(FsError::Corrupt));
        assert_eq!(BootImage::new(&[0u8; 4]).err(), Some(FsError::Corrupt));
    }
}
