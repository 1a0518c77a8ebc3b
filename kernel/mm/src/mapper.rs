//! Page table mapper: walks and builds x86-64 page tables via the HHDM.
//!
//! All physical addresses are accessed through `hhdm_offset + phys_addr`,
//! so the same code runs against real page tables in the kernel and against
//! a heap-backed buffer in host tests.

use sable_core::addr::{PhysAddr, VirtAddr};
use sable_core::structures::{PageTable, PageTableEntry, PageTableFlags};

use crate::{FrameAllocator, PAGE_SIZE, VmmError};
use sable_core::paging::{PhysFrame, Size4KiB};

/// Flags for intermediate page-table entries.
///
/// Intermediates are always traversable regardless of caller: the leaf entry
/// alone decides user accessibility and writability.
const INTERMEDIATE_FLAGS: PageTableFlags = PageTableFlags::PRESENT
    .union(PageTableFlags::WRITABLE)
    .union(PageTableFlags::USER);

/// Utility for walking and building page tables via the HHDM.
pub struct PageTableMapper {
    hhdm_offset: u64,
}

impl PageTableMapper {
    /// Creates a new mapper with the given HHDM offset.
    #[must_use]
    pub const fn new(hhdm_offset: u64) -> Self {
        Self { hhdm_offset }
    }

    /// Returns the HHDM offset this mapper was built with.
    #[must_use]
    pub const fn hhdm_offset(&self) -> u64 {
        self.hhdm_offset
    }

    /// Converts a physical address to its HHDM virtual address.
    fn phys_to_virt(&self, phys: PhysAddr) -> *mut u8 {
        (self.hhdm_offset + phys.as_u64()) as *mut u8
    }

    /// Returns a mutable reference to the [`PageTable`] at `phys`.
    ///
    /// # Safety
    ///
    /// `phys` must point to a valid, 4 KiB-aligned page-table frame that is
    /// accessible through the HHDM.
    unsafe fn table_at(&self, phys: PhysAddr) -> &mut PageTable {
        // SAFETY: Caller guarantees `phys` is a valid table frame.
        unsafe { &mut *self.phys_to_virt(phys).cast::<PageTable>() }
    }

    /// Ensures the entry at `table[index]` points to a valid next-level
    /// table, allocating one if it is not present. Returns the physical
    /// address of the next-level table.
    ///
    /// Newly allocated frames are zeroed before use so that no stale data is
    /// misinterpreted as present page table entries.
    ///
    /// # Safety
    ///
    /// `table_phys` must be valid and accessible through the HHDM.
    unsafe fn ensure_table(
        &self,
        table_phys: PhysAddr,
        index: usize,
        alloc: &mut impl FrameAllocator<Size4KiB>,
    ) -> Result<PhysAddr, VmmError> {
        // SAFETY: Forwarded from caller.
        let table = unsafe { self.table_at(table_phys) };
        let entry = table.entries[index];
        if entry.is_present() {
            Ok(entry.address())
        } else {
            let new_frame = alloc
                .allocate_frame()
                .ok_or(VmmError::OutOfMemory)?
                .start_address();
            // SAFETY: The frame was just allocated and is reachable via HHDM.
            // Zeroing ensures no stale PTEs appear present.
            unsafe {
                core::ptr::write_bytes(self.phys_to_virt(new_frame), 0, PAGE_SIZE);
            }
            table.entries[index] = PageTableEntry::new(new_frame, INTERMEDIATE_FLAGS);
            Ok(new_frame)
        }
    }

    /// Maps a 4 KiB page.
    ///
    /// Walks PML4 -> PDPT -> PD -> PT, allocating intermediate tables as
    /// needed. The leaf entry takes exactly `flags`.
    ///
    /// # Errors
    ///
    /// Returns [`VmmError::OutOfMemory`] if an intermediate table cannot be
    /// allocated.
    ///
    /// # Safety
    ///
    /// - `pml4_phys` must point to a valid PML4 table.
    /// - The caller must ensure the mapping does not conflict with existing
    ///   mappings and must flush the TLB where required.
    pub unsafe fn map_4k(
        &self,
        pml4_phys: PhysAddr,
        virt_addr: VirtAddr,
        phys_addr: PhysAddr,
        flags: PageTableFlags,
        alloc: &mut impl FrameAllocator<Size4KiB>,
    ) -> Result<(), VmmError> {
        // SAFETY: Forwarded from caller.
        let pdpt = unsafe { self.ensure_table(pml4_phys, virt_addr.pml4_index(), alloc)? };
        // SAFETY: `pdpt` was just ensured valid.
        let pd = unsafe { self.ensure_table(pdpt, virt_addr.pdpt_index(), alloc)? };
        // SAFETY: `pd` was just ensured valid.
        let pt = unsafe { self.ensure_table(pd, virt_addr.pd_index(), alloc)? };

        // SAFETY: `pt` was just ensured valid.
        let table = unsafe { self.table_at(pt) };
        table.entries[virt_addr.pt_index()] = PageTableEntry::new(phys_addr, flags);
        Ok(())
    }

    /// Maps a 2 MiB huge page (PML4 -> PDPT -> PD leaf).
    ///
    /// Used by the boot stub to build the HHDM cheaply; user mappings are
    /// always 4 KiB.
    ///
    /// # Errors
    ///
    /// Returns [`VmmError::OutOfMemory`] if an intermediate table cannot be
    /// allocated.
    ///
    /// # Safety
    ///
    /// Same contract as [`map_4k`](Self::map_4k); `phys_addr` must be
    /// 2 MiB aligned.
    pub unsafe fn map_2mib(
        &self,
        pml4_phys: PhysAddr,
        virt_addr: VirtAddr,
        phys_addr: PhysAddr,
        flags: PageTableFlags,
        alloc: &mut impl FrameAllocator<Size4KiB>,
    ) -> Result<(), VmmError> {
        // SAFETY: Forwarded from caller.
        let pdpt = unsafe { self.ensure_table(pml4_phys, virt_addr.pml4_index(), alloc)? };
        // SAFETY: `pdpt` was just ensured valid.
        let pd = unsafe { self.ensure_table(pdpt, virt_addr.pdpt_index(), alloc)? };

        // SAFETY: `pd` was just ensured valid.
        let table = unsafe { self.table_at(pd) };
        table.entries[virt_addr.pd_index()] =
            PageTableEntry::new(phys_addr, flags | PageTableFlags::HUGE_PAGE);
        Ok(())
    }

    /// Unmaps a 4 KiB page and returns the physical frame that was mapped.
    ///
    /// Intermediate tables are left in place. Does NOT flush the TLB; the
    /// caller must do that.
    ///
    /// # Errors
    ///
    /// Returns [`VmmError::NotMapped`] if no 4 KiB leaf is present at
    /// `virt_addr` (huge-page mappings are not split).
    ///
    /// # Safety
    ///
    /// `pml4_phys` must point to a valid PML4 table.
    pub unsafe fn unmap_4k(
        &self,
        pml4_phys: PhysAddr,
        virt_addr: VirtAddr,
    ) -> Result<PhysFrame<Size4KiB>, VmmError> {
        // SAFETY: Forwarded from caller.
        let pml4 = unsafe { self.table_at(pml4_phys) };
        let pml4e = pml4.entries[virt_addr.pml4_index()];
        if !pml4e.is_present() {
            return Err(VmmError::NotMapped);
        }

        // SAFETY: Present entries point at valid tables.
        let pdpt = unsafe { self.table_at(pml4e.address()) };
        let pdpte = pdpt.entries[virt_addr.pdpt_index()];
        if !pdpte.is_present() || pdpte.flags().contains(PageTableFlags::HUGE_PAGE) {
            return Err(VmmError::NotMapped);
        }

        // SAFETY: Present entries point at valid tables.
        let pd = unsafe { self.table_at(pdpte.address()) };
        let pde = pd.entries[virt_addr.pd_index()];
        if !pde.is_present() || pde.flags().contains(PageTableFlags::HUGE_PAGE) {
            return Err(VmmError::NotMapped);
        }

        // SAFETY: Present entries point at valid tables.
        let pt = unsafe { self.table_at(pde.address()) };
        let pte = pt.entries[virt_addr.pt_index()];
        if !pte.is_present() {
            return Err(VmmError::NotMapped);
        }

        let frame = PhysFrame::containing_address(pte.address());
        pt.entries[virt_addr.pt_index()] = PageTableEntry::empty();
        Ok(frame)
    }

    /// Translates a virtual address with a read-only walk.
    ///
    /// Returns the physical base address of the mapped 4 KiB frame (or of
    /// the containing 2 MiB page), or `None` if the address is not mapped.
    ///
    /// # Safety
    ///
    /// `pml4_phys` must point to a valid PML4 table.
    pub unsafe fn translate(&self, pml4_phys: PhysAddr, virt_addr: VirtAddr) -> Option<PhysAddr> {
        // SAFETY: Forwarded from caller.
        let pml4 = unsafe { self.table_at(pml4_phys) };
        let pml4e = pml4.entries[virt_addr.pml4_index()];
        if !pml4e.is_present() {
            return None;
        }

        // SAFETY: Present entries point at valid tables.
        let pdpt = unsafe { self.table_at(pml4e.address()) };
        let pdpte = pdpt.entries[virt_addr.pdpt_index()];
        if !pdpte.is_present() {
            return None;
        }

        // SAFETY: Present entries point at valid tables.
        let pd = unsafe { self.table_at(pdpte.address()) };
        let pde = pd.entries[virt_addr.pd_index()];
        if !pde.is_present() {
            return None;
        }
        if pde.flags().contains(PageTableFlags::HUGE_PAGE) {
            return Some(pde.address());
        }

        // SAFETY: Present entries point at valid tables.
        let pt = unsafe { self.table_at(pde.address()) };
        let pte = pt.entries[virt_addr.pt_index()];
        if !pte.is_present() {
            return None;
        }
        Some(pte.address())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A bump allocator over a leaked, page-aligned host buffer acting as
    /// physical memory. "Physical address" 0 is the aligned buffer base, so
    /// `hhdm_offset == aligned base`.
    pub(crate) struct FakePhys {
        pub hhdm_offset: u64,
        next: u64,
        limit: u64,
    }

    impl FakePhys {
        pub(crate) fn new(frames: usize) -> Self {
            let bytes = (frames + 1) * PAGE_SIZE;
            let buf = vec![0u8; bytes].leak();
            let base = buf.as_mut_ptr() as u64;
            let aligned = (base + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
            Self {
                hhdm_offset: aligned,
                next: 0,
                limit: frames as u64 * PAGE_SIZE as u64,
            }
        }
    }

    unsafe impl FrameAllocator<Size4KiB> for FakePhys {
        fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
            if self.next >= self.limit {
                return None;
            }
            let phys = PhysAddr::new(self.next);
            self.next += PAGE_SIZE as u64;
            Some(PhysFrame::containing_address(phys))
        }
    }

    fn user_flags() -> PageTableFlags {
        PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER
    }

    #[test]
    fn map_then_translate_roundtrip() {
        let mut phys = FakePhys::new(32);
        let mapper = PageTableMapper::new(phys.hhdm_offset);
        let root = phys.allocate_frame().unwrap().start_address();

        let va = VirtAddr::new(0x0000_7F00_1234_5000);
        let pa = PhysAddr::new(0x0001_2000);
        unsafe {
            mapper.map_4k(root, va, pa, user_flags(), &mut phys).unwrap();
            assert_eq!(mapper.translate(root, va), Some(pa));
        }
    }

    #[test]
    fn translate_unmapped_is_none() {
        let mut phys = FakePhys::new(8);
        let mapper = PageTableMapper::new(phys.hhdm_offset);
        let root = phys.allocate_frame().unwrap().start_address();
        unsafe {
            assert_eq!(mapper.translate(root, VirtAddr::new(0x1000)), None);
        }
    }

    #[test]
    fn unmap_returns_frame_and_clears_leaf() {
        let mut phys = FakePhys::new(32);
        let mapper = PageTableMapper::new(phys.hhdm_offset);
        let root = phys.allocate_frame().unwrap().start_address();

        let va = VirtAddr::new(0x4000_0000);
        let pa = PhysAddr::new(0x8000);
        unsafe {
            mapper.map_4k(root, va, pa, user_flags(), &mut phys).unwrap();
            let frame = mapper.unmap_4k(root, va).unwrap();
            assert_eq!(frame.start_address(), pa);
            assert_eq!(mapper.translate(root, va), None);
            // Unmapping again reports NotMapped.
            assert_eq!(mapper.unmap_4k(root, va), Err(VmmError::NotMapped));
        }
    }

    #[test]
    fn intermediates_are_user_traversable() {
        let mut phys = FakePhys::new(32);
        let mapper = PageTableMapper::new(phys.hhdm_offset);
        let root = phys.allocate_frame().unwrap().start_address();

        let va = VirtAddr::new(0x2000_0000);
        unsafe {
            mapper
                .map_4k(root, va, PhysAddr::new(0x3000), PageTableFlags::PRESENT, &mut phys)
                .unwrap();
            let pml4 = mapper.table_at(root);
            let pml4e = pml4.entries[va.pml4_index()];
            assert!(pml4e.flags().contains(PageTableFlags::USER));
            assert!(pml4e.flags().contains(PageTableFlags::WRITABLE));
        }
    }

    #[test]
    fn neighboring_pages_share_tables() {
        let mut phys = FakePhys::new(32);
        let mapper = PageTableMapper::new(phys.hhdm_offset);
        let root = phys.allocate_frame().unwrap().start_address();

        let used_before = phys.next;
        unsafe {
            mapper
                .map_4k(root, VirtAddr::new(0x1000), PhysAddr::new(0x1000), user_flags(), &mut phys)
                .unwrap();
        }
        let after_first = phys.next;
        unsafe {
            mapper
                .map_4k(root, VirtAddr::new(0x2000), PhysAddr::new(0x2000), user_flags(), &mut phys)
                .unwrap();
        }
        // First mapping allocates PDPT+PD+PT; the second reuses them.
        assert_eq!(after_first - used_before, 3 * PAGE_SIZE as u64);
        assert_eq!(phys.next, after_first);
    }

    #[test]
    fn huge_page_translate_returns_base() {
        let mut phys = FakePhys::new(32);
        let mapper = PageTableMapper::new(phys.hhdm_offset);
        let root = phys.allocate_frame().unwrap().start_address();

        let va = VirtAddr::new(0xFFFF_8000_0000_0000u64);
        let pa = PhysAddr::new(0x20_0000);
        unsafe {
            mapper
                .map_2mib(root, va, pa, PageTableFlags::PRESENT | PageTableFlags::WRITABLE, &mut phys)
                .unwrap();
            assert_eq!(mapper.translate(root, va), Some(pa));
            assert_eq!(mapper.translate(root, va + 0x1000), Some(pa));
        }
    }

    #[test]
    fn allocation_failure_propagates() {
        let mut phys = FakePhys::new(2); // root + one table, then dry
        let mapper = PageTableMapper::new(phys.hhdm_offset);
        let root = phys.allocate_frame().unwrap().start_address();
        unsafe {
            let err = mapper
                .map_4k(root, VirtAddr::new(0x1000), PhysAddr::new(0x1000), user_flags(), &mut phys)
                .unwrap_err();
            assert_eq!(err, VmmError::OutOfMemory);
        }
    }
}
