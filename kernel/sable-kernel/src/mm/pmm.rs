//! Global physical memory manager.
//!
//! Wraps the bitmap allocator from `sable-mm` in a `SpinLock<Option<…>>`
//! singleton and converts the boot memory map into its region descriptors.

use sable_core::addr::PhysAddr;
use sable_core::paging::{PhysFrame, Size4KiB};
use sable_core::sync::SpinLock;
use sable_mm::pmm::{BitmapAllocator, FrameStats};
use sable_mm::{FrameAllocator, FrameDeallocator, PhysMemoryRegion};

use crate::boot::{BootInfo, MemoryRegionKind};

/// Global physical memory manager.
static PMM: SpinLock<Option<BitmapAllocator>> = SpinLock::new(None);

/// Initializes the PMM from boot info.
///
/// # Panics
///
/// Panics on double initialization or when no usable memory exists.
pub fn init(boot_info: &BootInfo) {
    let hhdm_offset = boot_info.hhdm_offset;

    // Stack buffer: the heap does not exist yet.
    let mut regions = [PhysMemoryRegion {
        start: PhysAddr::zero(),
        size: 0,
        usable: false,
    }; 128];
    let mut count = 0;

    for region in boot_info.memory_map() {
        if count >= regions.len() {
            break;
        }
        regions[count] = PhysMemoryRegion {
            start: region.start,
            size: region.size,
            usable: region.kind == MemoryRegionKind::Usable,
        };
        count += 1;
    }

    // SAFETY: The loader-provided memory map describes physical memory, and
    // this runs exactly once during boot.
    let allocator = unsafe {
        BitmapAllocator::new(&regions[..count], hhdm_offset).expect("failed to initialize PMM")
    };

    let mut pmm = PMM.lock();
    assert!(pmm.is_none(), "PMM already initialized");
    *pmm = Some(allocator);
}

/// Executes a closure with the global PMM.
///
/// # Panics
///
/// Panics if the PMM has not been initialized.
pub fn with_pmm<R>(f: impl FnOnce(&mut BitmapAllocator) -> R) -> R {
    let mut pmm = PMM.lock();
    f(pmm.as_mut().expect("PMM not initialized"))
}

/// Allocates a single frame.
#[must_use]
pub fn alloc_frame() -> Option<PhysFrame<Size4KiB>> {
    with_pmm(BitmapAllocator::allocate_frame)
}

/// Allocates `count` contiguous frames.
#[must_use]
pub fn alloc_frames(count: usize) -> Option<PhysFrame<Size4KiB>> {
    with_pmm(|pmm| pmm.allocate_frames(count))
}

/// Frees a single frame (idempotent).
pub fn free_frame(frame: PhysFrame<Size4KiB>) {
    // SAFETY: Callers hand back frames they own; double frees are no-ops.
    with_pmm(|pmm| unsafe { pmm.deallocate_frame(frame) });
}

/// Frees `count` contiguous frames (idempotent).
pub fn free_frames(frame: PhysFrame<Size4KiB>, count: usize) {
    // SAFETY: Callers hand back frames they own; double frees are no-ops.
    with_pmm(|pmm| unsafe { pmm.deallocate_frames(frame, count) });
}

/// Returns the current frame statistics.
#[must_use]
pub fn stats() -> FrameStats {
    with_pmm(|pmm| pmm.stats())
}

/// A [`FrameAllocator`] handle drawing from the global PMM.
///
/// Each call takes the PMM lock, so this must not be used while the lock is
/// already held (use the closure inside [`with_pmm`] instead).
pub struct GlobalFrameAlloc;

unsafe impl FrameAllocator<Size4KiB> for GlobalFrameAlloc {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        alloc_frame()
    }
}

unsafe impl FrameDeallocator<Size4KiB> for GlobalFrameAlloc {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        free_frame(frame);
    }
}
