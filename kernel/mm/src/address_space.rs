//! User address space management.
//!
//! Each user process owns an [`AddressSpace`] holding a per-process PML4.
//! The upper half (entries 256–511) is copied from the kernel root at
//! creation time, so the same PDPT pages are shared by every address space;
//! the lower half (entries 0–255) is process-private.

use sable_core::addr::{PhysAddr, VirtAddr};
use sable_core::paging::{PhysFrame, Size4KiB};
use sable_core::structures::{PageTable, PageTableFlags};

use crate::mapper::PageTableMapper;
use crate::{FrameAllocator, FrameDeallocator, VmmError};

/// Number of PML4 entries in each half of the address space.
const HALF_PML4_ENTRIES: usize = 256;

/// A user-mode address space backed by its own PML4.
pub struct AddressSpace {
    /// Physical address of this address space's PML4 frame.
    root_phys: PhysAddr,
    /// Page table walker (knows the HHDM offset).
    mapper: PageTableMapper,
}

impl AddressSpace {
    /// Creates a new user address space.
    ///
    /// Allocates a fresh PML4 frame, zeroes the lower half and copies the
    /// kernel upper half (entries 256–511) from `kernel_root`.
    ///
    /// # Errors
    ///
    /// Returns [`VmmError::OutOfMemory`] if the PML4 frame cannot be
    /// allocated.
    ///
    /// # Safety
    ///
    /// `kernel_root` must point to the valid kernel PML4, and `hhdm_offset`
    /// must be the offset both tables are reachable through.
    pub unsafe fn new_user(
        kernel_root: PhysAddr,
        hhdm_offset: u64,
        alloc: &mut impl FrameAllocator<Size4KiB>,
    ) -> Result<Self, VmmError> {
        let frame = alloc.allocate_frame().ok_or(VmmError::OutOfMemory)?;
        let root_phys = frame.start_address();

        // SAFETY: Both frames are reachable via the HHDM; the new frame was
        // just allocated and is not aliased.
        unsafe {
            let new_pml4 = (hhdm_offset + root_phys.as_u64()) as *mut u64;
            let kernel_pml4 = (hhdm_offset + kernel_root.as_u64()) as *const u64;

            core::ptr::write_bytes(new_pml4, 0, HALF_PML4_ENTRIES);
            core::ptr::copy_nonoverlapping(
                kernel_pml4.add(HALF_PML4_ENTRIES),
                new_pml4.add(HALF_PML4_ENTRIES),
                HALF_PML4_ENTRIES,
            );
        }

        Ok(Self {
            root_phys,
            mapper: PageTableMapper::new(hhdm_offset),
        })
    }

    /// Returns the physical address of the PML4 (the CR3 value).
    #[must_use]
    pub const fn root_phys(&self) -> PhysAddr {
        self.root_phys
    }

    /// Maps a single 4 KiB page.
    ///
    /// Intermediate tables are allocated and zeroed as needed; the leaf
    /// entry takes exactly `flags`.
    ///
    /// # Errors
    ///
    /// Returns [`VmmError::OutOfMemory`] if a table frame cannot be
    /// allocated.
    pub fn map_page(
        &self,
        va: VirtAddr,
        pa: PhysAddr,
        flags: PageTableFlags,
        alloc: &mut impl FrameAllocator<Size4KiB>,
    ) -> Result<(), VmmError> {
        // SAFETY: `root_phys` is this address space's valid PML4.
        unsafe { self.mapper.map_4k(self.root_phys, va, pa, flags, alloc) }
    }

    /// Unmaps a 4 KiB page, returning the frame that was mapped.
    ///
    /// Intermediate tables are not freed.
    ///
    /// # Errors
    ///
    /// Returns [`VmmError::NotMapped`] if nothing is mapped at `va`.
    pub fn unmap_page(&self, va: VirtAddr) -> Result<PhysFrame<Size4KiB>, VmmError> {
        // SAFETY: `root_phys` is this address space's valid PML4.
        unsafe { self.mapper.unmap_4k(self.root_phys, va) }
    }

    /// Translates a virtual address with a read-only walk.
    ///
    /// Returns the physical base of the mapped frame, or `None`.
    #[must_use]
    pub fn translate(&self, va: VirtAddr) -> Option<PhysAddr> {
        // SAFETY: `root_phys` is this address space's valid PML4.
        unsafe { self.mapper.translate(self.root_phys, va) }
    }

    /// Calls `f(va, pa)` for every mapped 4 KiB leaf in the lower half.
    ///
    /// Used by the process destructor to return leaf frames to the PMM
    /// (minus device-reserved ranges) before the tables themselves are
    /// freed.
    pub fn for_each_lower_leaf(&self, mut f: impl FnMut(VirtAddr, PhysAddr)) {
        let hhdm = self.mapper.hhdm_offset();
        let table_at =
            |phys: PhysAddr| -> &PageTable {
                // SAFETY: Present entries in a valid hierarchy point at
                // valid table frames reachable through the HHDM.
                unsafe { &*((hhdm + phys.as_u64()) as *const PageTable) }
            };

        let pml4 = table_at(self.root_phys);
        for pml4_idx in 0..HALF_PML4_ENTRIES {
            let pml4e = pml4.entries[pml4_idx];
            if !pml4e.is_present() {
                continue;
            }
            let pdpt = table_at(pml4e.address());
            for pdpt_idx in 0..512 {
                let pdpte = pdpt.entries[pdpt_idx];
                if !pdpte.is_present() || pdpte.flags().contains(PageTableFlags::HUGE_PAGE) {
                    continue;
                }
                let pd = table_at(pdpte.address());
                for pd_idx in 0..512 {
                    let pde = pd.entries[pd_idx];
                    if !pde.is_present() || pde.flags().contains(PageTableFlags::HUGE_PAGE) {
                        continue;
                    }
                    let pt = table_at(pde.address());
                    for pt_idx in 0..512 {
                        let pte = pt.entries[pt_idx];
                        if !pte.is_present() {
                            continue;
                        }
                        let va =
                            VirtAddr::from_table_indices(pml4_idx, pdpt_idx, pd_idx, pt_idx);
                        f(va, pte.address());
                    }
                }
            }
        }
    }

    /// Frees every intermediate table frame in the lower half, then the
    /// PML4 frame itself, consuming the address space.
    ///
    /// Leaf frames are NOT freed here; the caller walks them first via
    /// [`for_each_lower_leaf`](Self::for_each_lower_leaf). The shared
    /// kernel upper half is never touched.
    pub fn destroy(self, dealloc: &mut impl FrameDeallocator<Size4KiB>) {
        let hhdm = self.mapper.hhdm_offset();
        let table_at = |phys: PhysAddr| -> &PageTable {
            // SAFETY: Present entries point at valid table frames.
            unsafe { &*((hhdm + phys.as_u64()) as *const PageTable) }
        };
        let mut free =
            |phys: PhysAddr| {
                // SAFETY: The frame is an intermediate table owned solely by
                // this address space; nothing references it after destroy.
                unsafe { dealloc.deallocate_frame(PhysFrame::containing_address(phys)) };
            };

        let pml4 = table_at(self.root_phys);
        for pml4_idx in 0..HALF_PML4_ENTRIES {
            let pml4e = pml4.entries[pml4_idx];
            if !pml4e.is_present() {
                continue;
            }
            let pdpt = table_at(pml4e.address());
            for pdpt_idx in 0..512 {
                let pdpte = pdpt.entries[pdpt_idx];
                if !pdpte.is_present() || pdpte.flags().contains(PageTableFlags::HUGE_PAGE) {
                    continue;
                }
                let pd = table_at(pdpte.address());
                for pd_idx in 0..512 {
                    let pde = pd.entries[pd_idx];
                    if !pde.is_present() || pde.flags().contains(PageTableFlags::HUGE_PAGE) {
                        continue;
                    }
                    free(pde.address());
                }
                free(pdpte.address());
            }
            free(pml4e.address());
        }
        free(self.root_phys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::tests::FakePhys;

    fn user_flags() -> PageTableFlags {
        PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER
    }

    /// Builds a fake kernel root with one upper-half entry populated.
    fn make_kernel_root(phys: &mut FakePhys) -> PhysAddr {
        let mapper = PageTableMapper::new(phys.hhdm_offset);
        let root = phys.allocate_frame().unwrap().start_address();
        unsafe {
            mapper
                .map_2mib(
                    root,
                    VirtAddr::new(0xFFFF_8000_0000_0000u64),
                    PhysAddr::new(0),
                    PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
                    phys,
                )
                .unwrap();
        }
        root
    }

    #[test]
    fn upper_half_is_shared() {
        let mut phys = FakePhys::new(64);
        let kernel_root = make_kernel_root(&mut phys);
        let aspace =
            unsafe { AddressSpace::new_user(kernel_root, phys.hhdm_offset, &mut phys) }.unwrap();

        // Entry 256 of both PML4s must point at the same PDPT frame.
        let read_entry = |root: PhysAddr, idx: usize| -> u64 {
            unsafe { *(((phys.hhdm_offset + root.as_u64()) as *const u64).add(idx)) }
        };
        assert_eq!(
            read_entry(kernel_root, 256),
            read_entry(aspace.root_phys(), 256)
        );
        assert_ne!(read_entry(aspace.root_phys(), 256), 0);
        // Lower half starts empty.
        assert_eq!(read_entry(aspace.root_phys(), 0), 0);
    }

    #[test]
    fn map_translate_unmap() {
        let mut phys = FakePhys::new(64);
        let kernel_root = make_kernel_root(&mut phys);
        let aspace =
            unsafe { AddressSpace::new_user(kernel_root, phys.hhdm_offset, &mut phys) }.unwrap();

        let va = VirtAddr::new(0x0000_0000_0040_0000);
        let pa = PhysAddr::new(0x7000);
        aspace.map_page(va, pa, user_flags(), &mut phys).unwrap();
        assert_eq!(aspace.translate(va), Some(pa));

        let frame = aspace.unmap_page(va).unwrap();
        assert_eq!(frame.start_address(), pa);
        assert_eq!(aspace.translate(va), None);
    }

    #[test]
    fn leaf_walk_covers_all_mappings() {
        let mut phys = FakePhys::new(64);
        let kernel_root = make_kernel_root(&mut phys);
        let aspace =
            unsafe { AddressSpace::new_user(kernel_root, phys.hhdm_offset, &mut phys) }.unwrap();

        let pairs = [
            (0x40_0000u64, 0x1000u64),
            (0x40_1000, 0x2000),
            (0x7FFF_FFFF_F000 - 0x1000, 0x3000),
        ];
        for (va, pa) in pairs {
            aspace
                .map_page(VirtAddr::new(va), PhysAddr::new(pa), user_flags(), &mut phys)
                .unwrap();
        }

        let mut seen = Vec::new();
        aspace.for_each_lower_leaf(|va, pa| seen.push((va.as_u64(), pa.as_u64())));
        seen.sort_unstable();
        assert_eq!(seen, pairs.to_vec());
    }

    #[test]
    fn destroy_frees_lower_tables_only() {
        let mut phys = FakePhys::new(64);
        let kernel_root = make_kernel_root(&mut phys);
        let aspace =
            unsafe { AddressSpace::new_user(kernel_root, phys.hhdm_offset, &mut phys) }.unwrap();

        aspace
            .map_page(
                VirtAddr::new(0x40_0000),
                PhysAddr::new(0x1000),
                user_flags(),
                &mut phys,
            )
            .unwrap();

        struct CountingDealloc(Vec<u64>);
        unsafe impl FrameDeallocator<Size4KiB> for CountingDealloc {
            unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
                self.0.push(frame.start_address().as_u64());
            }
        }

        let mut dealloc = CountingDealloc(Vec::new());
        aspace.destroy(&mut dealloc);
        // One mapping in a fresh space: PDPT + PD + PT + the PML4 itself.
        assert_eq!(dealloc.0.len(), 4);
    }
}
