//! The CPU runs in long mode, so the two-level directory kept by
//! [`AddressSpace`](super::AddressSpace) is mirrored into four-level tables
//! whenever it is loaded or flushed. Only the first 1GB is mirrored; it holds
//! every address the kernel hands out. Anything the model leaves unmapped
//! stays identity mapped for the kernel, so user frames and boot data remain
//! reachable.

use bit_field::BitField;
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::PhysFrame;
use x86_64::PhysAddr;

use super::paging::EntryFlags;
use super::Mmu;

const TABLE_ENTRIES: usize = 512;
const HUGE_PAGE: u64 = 0x20_0000;
const MIRRORED_ENTRIES: usize = 256;
/// Page-table-backed model entries we can mirror (two long-mode tables each).
const SPLIT_TABLES: usize = 4;

const PRESENT: u64 = 1 << 0;
const WRITABLE: u64 = 1 << 1;
const HUGE: u64 = 1 << 7;

#[repr(C, align(4096))]
struct Table([u64; TABLE_ENTRIES]);

static mut PML4: Table = Table([0; TABLE_ENTRIES]);
static mut PDPT: Table = Table([0; TABLE_ENTRIES]);
static mut PD: Table = Table([0; TABLE_ENTRIES]);
static mut SPLIT: [Table; SPLIT_TABLES] = [const { Table([0; TABLE_ENTRIES]) }; SPLIT_TABLES];

fn phys_of(table: *const Table) -> u64 {
    table as usize as u64
}

/// P, R/W, U/S, PWT, PCD and G keep their bit positions across the two formats.
fn carry_flags(flags: EntryFlags) -> u64 {
    let kept = EntryFlags::PRESENT
        | EntryFlags::WRITABLE
        | EntryFlags::USER
        | EntryFlags::WRITE_THROUGH
        | EntryFlags::CACHE_DISABLE
        | EntryFlags::GLOBAL;
    (flags & kept).bits() as u64
}

fn decode(raw: u32) -> (u32, EntryFlags) {
    (raw & 0xFFFF_F000, EntryFlags::from_bits_truncate(raw.get_bits(0..12)))
}

pub struct ShadowMmu {
    directory: u32,
}

impl ShadowMmu {
    pub const fn new() -> Self {
        ShadowMmu { directory: 0 }
    }

    fn mirror(&mut self) {
        // the model and its tables sit in identity-mapped kernel memory
        let model = unsafe { &*(self.directory as usize as *const [u32; 1024]) };
        let (pml4, pdpt, pd, split) = unsafe {
            (&mut *(&raw mut PML4), &mut *(&raw mut PDPT), &mut *(&raw mut PD), &mut *(&raw mut SPLIT))
        };
        pml4.0[0] = phys_of(pdpt) | PRESENT | WRITABLE | EntryFlags::USER.bits() as u64;
        pdpt.0[0] = phys_of(pd) | PRESENT | WRITABLE | EntryFlags::USER.bits() as u64;

        let mut next_split = 0;
        for (index, &raw) in model.iter().take(MIRRORED_ENTRIES).enumerate() {
            let (addr, flags) = decode(raw);
            for half in 0..2 {
                let slot = 2 * index + half;
                pd.0[slot] = if !flags.contains(EntryFlags::PRESENT) {
                    slot as u64 * HUGE_PAGE | PRESENT | WRITABLE | HUGE
                } else if flags.contains(EntryFlags::LARGE) {
                    (addr as u64 + half as u64 * HUGE_PAGE) | carry_flags(flags) | HUGE
                } else if next_split < SPLIT_TABLES {
                    let table = &mut split[next_split];
                    next_split += 1;
                    let source = unsafe { &*(addr as usize as *const [u32; 1024]) };
                    let base = slot as u64 * HUGE_PAGE;
                    let entries = source[half * TABLE_ENTRIES..].iter();
                    for (page, (dst, &pte)) in table.0.iter_mut().zip(entries).enumerate() {
                        let (frame, pte_flags) = decode(pte);
                        *dst = if pte_flags.contains(EntryFlags::PRESENT) {
                            frame as u64 | carry_flags(pte_flags)
                        } else {
                            (base + page as u64 * 0x1000) | PRESENT | WRITABLE
                        };
                    }
                    phys_of(table) | carry_flags(flags - EntryFlags::GLOBAL)
                } else {
                    crate::log_error!("paging: directory entry {} has no spare table", index);
                    0
                };
            }
        }
    }

    fn reload() {
        let (_, flags) = Cr3::read();
        let root = PhysFrame::containing_address(PhysAddr::new(phys_of(&raw const PML4)));
        unsafe { Cr3::write(root, flags) };
    }
}

impl Mmu for ShadowMmu {
    fn load_page_directory(&mut self, phys: u32) {
        self.directory = phys;
        self.mirror();
        Self::reload();
    }

    fn flush_tlb(&mut self) {
        self.mirror();
        Self::reload();
    }

    fn set_kernel_stack(&mut self, top: u32) {
        crate::interrupts::gdt::set_kernel_stack(top as u64);
    }

    fn user_frame(&mut self, frame: u32) -> &mut [u8] {
        unsafe {
            core::slice::from_raw_parts_mut(frame as usize as *mut u8, crate::config::LARGE_PAGE_SIZE as usize)
        }
    }
}
