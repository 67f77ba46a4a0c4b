pub mod paging;
#[cfg(all(target_arch = "x86_64", not(test)))]
pub mod shadow;

pub use paging::AddressSpace;

/// What the address-space manager and the exec path need from the CPU.
pub trait Mmu {
    /// Installs the page directory (CR3) and enables paging.
    fn load_page_directory(&mut self, phys: u32);
    /// Reloads the page-directory base register.
    fn flush_tlb(&mut self);
    /// Kernel stack the CPU switches to on the next ring 3 -> ring 0 transition.
    fn set_kernel_stack(&mut self, top: u32);
    /// The 4MB user frame at physical `frame`. Only valid while that frame is
    /// mapped for the process being loaded.
    fn user_frame(&mut self, frame: u32) -> &mut [u8];
}
