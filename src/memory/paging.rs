use bit_field::BitField;
use bitflags::bitflags;

use crate::config::{
    LARGE_PAGE_SIZE, NUM_TERMINALS, PAGE_SIZE, TERMINAL_BACKING_PHYS, USER_FRAME_BASE,
    USER_VIDEO_VIRT, USER_WINDOW_VIRT, VIDEO_PHYS, KERNEL_TOP,
};
use crate::process::ProcessId;
use super::Mmu;

const ENTRIES: usize = 1024;

bitflags! {
    /// Low 12 bits shared by directory and table entries (32-bit, non-PAE).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const CACHE_DISABLE = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        /// Directory entries only: maps a 4MB page instead of a table.
        const LARGE         = 1 << 7;
        const GLOBAL        = 1 << 8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Entry(u32);

impl Entry {
    pub const EMPTY: Entry = Entry(0);

    pub fn new(addr: u32, flags: EntryFlags) -> Self {
        let mut raw = 0u32;
        raw.set_bits(12..32, addr.get_bits(12..32));
        raw.set_bits(0..12, flags.bits());
        Entry(raw)
    }

    pub fn addr(self) -> u32 {
        self.0.get_bits(12..32) << 12
    }

    pub fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0.get_bits(0..12))
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(EntryFlags::PRESENT)
    }

    fn set_present(&mut self, present: bool) {
        self.0.set_bit(0, present);
    }
}

#[repr(C, align(4096))]
pub struct PageTable {
    entries: [Entry; ENTRIES],
}

impl PageTable {
    pub const fn new() -> Self {
        PageTable { entries: [Entry::EMPTY; ENTRIES] }
    }

    pub fn entry(&self, index: usize) -> Entry {
        self.entries[index]
    }
}

pub fn directory_index(virt: u32) -> usize {
    virt.get_bits(22..32) as usize
}

pub fn table_index(virt: u32) -> usize {
    virt.get_bits(12..22) as usize
}

/// Physical address of a kernel static. The low 8MB are identity mapped.
fn phys_of<T>(value: &T) -> u32 {
    value as *const T as usize as u32
}

/// Physical 4MB frame backing `pid`'s user window.
pub fn user_frame(pid: ProcessId) -> u32 {
    USER_FRAME_BASE + pid.index() as u32 * LARGE_PAGE_SIZE
}

/// The single page directory shared by every process. Only two entries ever
/// change after boot: the user window and the user video page.
pub struct AddressSpace {
    directory: PageTable,
    /// Maps the first 4MB in 4KB pages, for video memory and terminal backing pages.
    low_table: PageTable,
    /// Holds the one page `vidmap` hands out.
    video_table: PageTable,
    dirty: bool,
}

impl AddressSpace {
    pub const fn new() -> Self {
        AddressSpace {
            directory: PageTable::new(),
            low_table: PageTable::new(),
            video_table: PageTable::new(),
            dirty: false,
        }
    }

    /// Builds the kernel mappings and loads the directory. Must run after the
    /// structure has reached its final (static) address.
    pub fn init(&mut self, mmu: &mut impl Mmu) {
        let kernel_rw = EntryFlags::PRESENT | EntryFlags::WRITABLE;
        for page in 0..=NUM_TERMINALS as u32 {
            let frame = VIDEO_PHYS + page * PAGE_SIZE;
            self.low_table.entries[table_index(frame)] = Entry::new(frame, kernel_rw);
        }
        self.directory.entries[0] = Entry::new(phys_of(&self.low_table), kernel_rw);

        let kernel_base = KERNEL_TOP - LARGE_PAGE_SIZE;
        self.directory.entries[directory_index(kernel_base)] =
            Entry::new(kernel_base, kernel_rw | EntryFlags::LARGE | EntryFlags::GLOBAL);

        self.directory.entries[directory_index(USER_VIDEO_VIRT)] =
            Entry::new(phys_of(&self.video_table), kernel_rw | EntryFlags::USER);

        mmu.load_page_directory(phys_of(&self.directory));
        self.dirty = false;
        crate::log_info!("Paging enabled, directory at {:#x}.", phys_of(&self.directory));
    }

    pub fn map_user_window(&mut self, pid: ProcessId) {
        let flags = EntryFlags::PRESENT
            | EntryFlags::WRITABLE
            | EntryFlags::USER
            | EntryFlags::LARGE
            | EntryFlags::CACHE_DISABLE;
        self.directory.entries[directory_index(USER_WINDOW_VIRT)] = Entry::new(user_frame(pid), flags);
        self.dirty = true;
    }

    /// Clears the present bit only; the frame keeps its contents until the
    /// slot is reused by a fresh load.
    pub fn unmap_user_window(&mut self, pid: ProcessId) {
        let entry = &mut self.directory.entries[directory_index(USER_WINDOW_VIRT)];
        if entry.addr() == user_frame(pid) {
            entry.set_present(false);
            self.dirty = true;
        }
    }

    /// Points the user video page at `frame` (the live page or a terminal's backing page).
    pub fn map_user_video_page(&mut self, virt: u32, frame: u32) {
        let flags = EntryFlags::PRESENT | EntryFlags::WRITABLE | EntryFlags::USER;
        self.video_table.entries[table_index(virt)] = Entry::new(frame, flags);
        self.dirty = true;
    }

    pub fn unmap_user_video_page(&mut self) {
        let entry = &mut self.video_table.entries[table_index(USER_VIDEO_VIRT)];
        if entry.is_present() {
            entry.set_present(false);
            self.dirty = true;
        }
    }

    /// Publishes pending edits. Nothing may run against the new mappings before this.
    pub fn commit(&mut self, mmu: &mut impl Mmu) {
        if self.dirty {
            mmu.flush_tlb();
            self.dirty = false;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Frame currently behind the user window, if mapped.
    pub fn user_window(&self) -> Option<u32> {
        let entry = self.directory.entries[directory_index(USER_WINDOW_VIRT)];
        entry.is_present().then(|| entry.addr())
    }

    /// Walks the directory the way the MMU would.
    pub fn translate(&self, virt: u32) -> Option<(u32, EntryFlags)> {
        let dir = self.directory.entries[directory_index(virt)];
        if !dir.is_present() {
            return None;
        }
        if dir.flags().contains(EntryFlags::LARGE) {
            return Some((dir.addr() + virt.get_bits(0..22), dir.flags()));
        }
        let table = if dir.addr() == phys_of(&self.low_table) {
            &self.low_table
        } else if dir.addr() == phys_of(&self.video_table) {
            &self.video_table
        } else {
            return None;
        };
        let page = table.entries[table_index(virt)];
        page.is_present().then(|| (page.addr() + virt.get_bits(0..12), page.flags()))
    }
}

/// Frame of the backing page that holds terminal `index` while it is hidden.
pub fn backing_frame(index: usize) -> u32 {
    TERMINAL_BACKING_PHYS + index as u32 * PAGE_SIZE
}
