//! Kernel-side virtual memory manager.
//!
//! Records the kernel page-table root (built by the boot stub), creates
//! per-process address spaces that share its upper half, and maps MMIO
//! regions into kernel space.

use core::sync::atomic::{AtomicU64, Ordering};

use sable_core::addr::{PhysAddr, VirtAddr};
use sable_core::structures::PageTableFlags;
use sable_mm::address_space::AddressSpace;
use sable_mm::mapper::PageTableMapper;
use sable_mm::{PAGE_SIZE, VmmError};

use super::{hhdm, pmm};
use crate::arch::x86_64::instructions;

/// Physical address of the kernel PML4 (0 = not yet recorded).
static KERNEL_ROOT: AtomicU64 = AtomicU64::new(0);

/// Records the kernel page-table root, read from CR3 at kernel entry.
///
/// # Panics
///
/// Panics on double initialization.
pub fn init() {
    let root = instructions::read_cr3();
    let prev = KERNEL_ROOT.compare_exchange(0, root.as_u64(), Ordering::Release, Ordering::Relaxed);
    assert!(prev.is_ok(), "VMM already initialized");
}

/// Returns the kernel page-table root.
///
/// # Panics
///
/// Panics if called before [`init`].
#[must_use]
pub fn kernel_root() -> PhysAddr {
    let root = KERNEL_ROOT.load(Ordering::Acquire);
    assert!(root != 0, "VMM not initialized");
    PhysAddr::new(root)
}

/// Creates a fresh user address space sharing the kernel upper half.
///
/// # Errors
///
/// Returns [`VmmError::OutOfMemory`] under frame pressure.
pub fn create_address_space() -> Result<AddressSpace, VmmError> {
    // SAFETY: kernel_root() is the live kernel PML4 and the HHDM offset is
    // the one every table is reachable through.
    unsafe { AddressSpace::new_user(kernel_root(), hhdm::offset(), &mut pmm::GlobalFrameAlloc) }
}

/// Switches CR3 to `root` (the kernel root or a process root).
///
/// # Safety
///
/// `root` must be a valid PML4 whose upper half maps the running kernel.
pub unsafe fn switch_to(root: PhysAddr) {
    // SAFETY: Forwarded to the caller.
    unsafe { instructions::write_cr3(root) };
}

/// Maps `size` bytes of MMIO at `phys` into kernel space as uncached
/// memory, at its HHDM address. Returns the virtual base.
///
/// # Errors
///
/// Returns [`VmmError::OutOfMemory`] when page-table frames run out.
pub fn map_mmio(phys: PhysAddr, size: u64) -> Result<VirtAddr, VmmError> {
    let mapper = PageTableMapper::new(hhdm::offset());
    let root = kernel_root();

    let flags = PageTableFlags::PRESENT
        | PageTableFlags::WRITABLE
        | PageTableFlags::WRITE_THROUGH
        | PageTableFlags::CACHE_DISABLE;

    let base = phys.align_down(PAGE_SIZE as u64);
    let end = (phys + size).align_up(PAGE_SIZE as u64);
    let pages = (end - base) / PAGE_SIZE as u64;

    for i in 0..pages {
        let pa = base + i * PAGE_SIZE as u64;
        let va = hhdm::phys_to_virt(pa);
        // SAFETY: The kernel root is valid; MMIO pages are not otherwise
        // mapped as cached memory in this range.
        unsafe { mapper.map_4k(root, va, pa, flags, &mut pmm::GlobalFrameAlloc)? };
        instructions::invlpg(va);
    }

    Ok(hhdm::phys_to_virt(phys))
}
