//! Host stand-ins for the machine and the boot image, shared by unit tests.

use std::collections::HashMap;

use crate::config::{LARGE_PAGE_SIZE, MAX_NAME_LEN, NUM_TERMINALS};
use crate::drivers::rtc::Rtc;
use crate::drivers::vga::{Console, Cursor, ScreenChar, VideoPage, CELLS, WIDTH};
use crate::fs::bootimg::{BLOCK_SIZE, DIR_ENTRY_SIZE};
use crate::memory::Mmu;

/// Records what the kernel asked of the MMU, the RTC and the screen.
pub struct MockHardware {
    pub flushes: usize,
    pub directory: Option<u32>,
    /// Every kernel stack top handed to the TSS, oldest first.
    pub kernel_stacks: Vec<u32>,
    pub cursor: Cursor,
    pub rate: Option<u32>,
    /// Periodic interrupts waiting to be observed.
    pub ticks: u32,
    /// Live page first, then one backing page per terminal.
    pages: Vec<[ScreenChar; CELLS]>,
    frames: HashMap<u32, Vec<u8>>,
}

impl MockHardware {
    pub fn new() -> Self {
        MockHardware {
            flushes: 0,
            directory: None,
            kernel_stacks: Vec::new(),
            cursor: Cursor::default(),
            rate: None,
            ticks: 0,
            pages: vec![[ScreenChar::BLANK; CELLS]; NUM_TERMINALS + 1],
            frames: HashMap::new(),
        }
    }

    fn page_index(page: VideoPage) -> usize {
        match page {
            VideoPage::Live => 0,
            VideoPage::Backing(id) => id.index() + 1,
        }
    }

    /// The text of one screen row, trailing blanks included.
    pub fn row(&self, page: VideoPage, row: usize) -> String {
        (0..WIDTH).map(|col| self.cell(page, row * WIDTH + col).ascii as char).collect()
    }

    /// Contents of a 4MB user frame, if anything was ever loaded into it.
    pub fn frame(&self, frame: u32) -> Option<&[u8]> {
        self.frames.get(&frame).map(Vec::as_slice)
    }
}

impl Mmu for MockHardware {
    fn load_page_directory(&mut self, phys: u32) {
        self.directory = Some(phys);
    }

    fn flush_tlb(&mut self) {
        self.flushes += 1;
    }

    fn set_kernel_stack(&mut self, top: u32) {
        self.kernel_stacks.push(top);
    }

    fn user_frame(&mut self, frame: u32) -> &mut [u8] {
        self.frames.entry(frame).or_insert_with(|| vec![0; LARGE_PAGE_SIZE as usize])
    }
}

impl Console for MockHardware {
    fn cell(&self, page: VideoPage, index: usize) -> ScreenChar {
        self.pages[Self::page_index(page)][index]
    }

    fn set_cell(&mut self, page: VideoPage, index: usize, ch: ScreenChar) {
        self.pages[Self::page_index(page)][index] = ch;
    }

    fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }
}

impl Rtc for MockHardware {
    fn set_frequency(&mut self, hz: u32) {
        self.rate = Some(hz);
    }

    fn take_tick(&mut self) -> bool {
        if self.ticks == 0 {
            return false;
        }
        self.ticks -= 1;
        true
    }
}

enum Item {
    Directory(String),
    Rtc(String),
    File { name: String, data: Vec<u8>, truncated: bool },
}

/// Assembles a boot image the way the build tooling lays one out.
pub struct ImageBuilder {
    items: Vec<Item>,
}

/// Header of an executable entering at `entry`, padded out to `len` bytes.
pub fn program_bytes(entry: u32, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len.max(28)];
    bytes[..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
    bytes[24..28].copy_from_slice(&entry.to_le_bytes());
    bytes
}

impl ImageBuilder {
    pub fn new() -> Self {
        ImageBuilder { items: Vec::new() }
    }

    pub fn directory(mut self, name: &str) -> Self {
        self.items.push(Item::Directory(name.into()));
        self
    }

    pub fn rtc(mut self, name: &str) -> Self {
        self.items.push(Item::Rtc(name.into()));
        self
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.items.push(Item::File { name: name.into(), data: data.to_vec(), truncated: false });
        self
    }

    /// A small executable with a recognisable body.
    pub fn program(self, name: &str, entry: u32) -> Self {
        let mut bytes = program_bytes(entry, 64);
        bytes[32..32 + name.len().min(32)].copy_from_slice(&name.as_bytes()[..name.len().min(32)]);
        self.file(name, &bytes)
    }

    /// An executable whose header reads fine but whose last data block
    /// points outside the image.
    pub fn truncated_program(mut self, name: &str, entry: u32) -> Self {
        let data = program_bytes(entry, BLOCK_SIZE + 100);
        self.items.push(Item::File { name: name.into(), data, truncated: true });
        self
    }

    pub fn build(self) -> Vec<u8> {
        let files: Vec<_> = self
            .items
            .iter()
            .filter_map(|item| match item {
                Item::File { data, truncated, .. } => Some((data, *truncated)),
                _ => None,
            })
            .collect();
        let inode_count = files.len();
        let data_count: usize = files.iter().map(|(data, _)| data.len().div_ceil(BLOCK_SIZE)).sum();
        let mut image = vec![0u8; (1 + inode_count + data_count) * BLOCK_SIZE];

        put_u32(&mut image, 0, self.items.len() as u32);
        put_u32(&mut image, 4, inode_count as u32);
        put_u32(&mut image, 8, data_count as u32);

        let mut next_inode = 0u32;
        for (index, item) in self.items.iter().enumerate() {
            let base = 64 + index * DIR_ENTRY_SIZE;
            let (name, file_type, inode) = match item {
                Item::Rtc(name) => (name, 0, 0),
                Item::Directory(name) => (name, 1, 0),
                Item::File { name, .. } => {
                    next_inode += 1;
                    (name, 2, next_inode - 1)
                }
            };
            assert!(name.len() <= MAX_NAME_LEN);
            image[base..base + name.len()].copy_from_slice(name.as_bytes());
            put_u32(&mut image, base + 32, file_type);
            put_u32(&mut image, base + 36, inode);
        }

        let mut next_block = 0usize;
        for (inode, (data, truncated)) in files.iter().enumerate() {
            let inode_base = (1 + inode) * BLOCK_SIZE;
            put_u32(&mut image, inode_base, data.len() as u32);
            for (slot, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
                let last = slot + 1 == data.len().div_ceil(BLOCK_SIZE);
                let index = if *truncated && last { u32::MAX } else { next_block as u32 };
                put_u32(&mut image, inode_base + 4 + slot * 4, index);
                let start = (1 + inode_count + next_block) * BLOCK_SIZE;
                image[start..start + chunk.len()].copy_from_slice(chunk);
                next_block += 1;
            }
        }
        image
    }
}

fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
