//! Kernel heap: global allocator over the implicit free list.
//!
//! The free-list allocator from `sable-mm` serves all kernel allocations
//! (`Box`, `Vec`, `String`, ...). When it runs dry it is grown with whole
//! page runs from the PMM, addressed through the HHDM; grown extents are
//! never returned.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use sable_core::sync::SpinLock;
use sable_mm::heap::{HeapStats, ListAllocator};
use sable_mm::PAGE_SIZE;

use super::{hhdm, pmm};

/// Initial heap size in pages.
const INITIAL_HEAP_PAGES: usize = 4;

/// Alignment served directly by the free list.
const NATIVE_ALIGN: usize = 16;

static HEAP: SpinLock<ListAllocator> = SpinLock::new(ListAllocator::new());

/// Initializes the kernel heap with its first extent.
///
/// # Panics
///
/// Panics when the initial pages cannot be allocated.
pub fn init() {
    let frame = pmm::alloc_frames(INITIAL_HEAP_PAGES).expect("heap: no initial pages");
    let virt = hhdm::phys_to_virt(frame.start_address());
    // SAFETY: The page run was just allocated for the heap and is mapped
    // through the HHDM.
    unsafe {
        HEAP.lock()
            .add_region(virt.as_mut_ptr(), INITIAL_HEAP_PAGES * PAGE_SIZE);
    }
}

/// Allocates from the free list, growing the heap once on failure.
fn alloc_inner(size: usize) -> Option<NonNull<u8>> {
    let mut heap = HEAP.lock();
    if let Some(ptr) = heap.alloc(size) {
        return Some(ptr);
    }

    // Grow by whole pages so the retry is guaranteed to fit.
    let pages = ListAllocator::grow_pages_for(size);
    let frame = pmm::alloc_frames(pages)?;
    let virt = hhdm::phys_to_virt(frame.start_address());
    // SAFETY: A fresh page run, HHDM-addressed, exclusively the heap's.
    unsafe { heap.add_region(virt.as_mut_ptr(), pages * PAGE_SIZE) };
    heap.alloc(size)
}

/// Returns the current heap statistics.
#[must_use]
pub fn stats() -> HeapStats {
    HEAP.lock().stats()
}

/// The kernel's global allocator.
///
/// The free list serves 16-byte alignment natively. Larger alignments are
/// handled by over-allocating and stashing the original pointer one word
/// below the aligned address.
pub struct KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= NATIVE_ALIGN {
            return alloc_inner(layout.size()).map_or(core::ptr::null_mut(), NonNull::as_ptr);
        }

        // Over-aligned: allocate padding plus a slot for the back-pointer.
        let total = layout.size() + layout.align() + core::mem::size_of::<usize>();
        let Some(raw) = alloc_inner(total) else {
            return core::ptr::null_mut();
        };

        let raw_addr = raw.as_ptr() as usize;
        let aligned = (raw_addr + core::mem::size_of::<usize>() + layout.align() - 1)
            & !(layout.align() - 1);
        // SAFETY: `aligned - 8` lies within the allocation, past the header.
        unsafe { ((aligned - core::mem::size_of::<usize>()) as *mut usize).write(raw_addr) };
        aligned as *mut u8
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else { return };

        let raw = if layout.align() <= NATIVE_ALIGN {
            ptr
        } else {
            // SAFETY: alloc() stored the original pointer one word below.
            let raw_addr =
                unsafe { ptr.as_ptr().sub(core::mem::size_of::<usize>()).cast::<usize>().read() };
            // SAFETY: The stored address came from alloc_inner, never null.
            unsafe { NonNull::new_unchecked(raw_addr as *mut u8) }
        };

        // SAFETY: `raw` came from this allocator.
        unsafe { HEAP.lock().free(raw) };
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > NATIVE_ALIGN {
            // Rare path: fall back to alloc + copy + dealloc.
            // SAFETY: Default-style realloc over our own alloc/dealloc.
            unsafe {
                let new_layout = Layout::from_size_align_unchecked(new_size, layout.align());
                let new_ptr = self.alloc(new_layout);
                if !new_ptr.is_null() {
                    core::ptr::copy_nonoverlapping(ptr, new_ptr, layout.size().min(new_size));
                    self.dealloc(ptr, layout);
                }
                return new_ptr;
            }
        }

        let Some(ptr) = NonNull::new(ptr) else {
            return core::ptr::null_mut();
        };

        let mut heap = HEAP.lock();
        // SAFETY: `ptr` is a live allocation from this allocator.
        if let Some(new_ptr) = unsafe { heap.realloc(ptr, new_size) } {
            return new_ptr.as_ptr();
        }
        drop(heap);

        // The free list is full: grow, then move the allocation by hand.
        let Some(new_ptr) = alloc_inner(new_size) else {
            return core::ptr::null_mut();
        };
        // SAFETY: Both allocations are live; sizes are bounded by each.
        unsafe {
            let old_size = HEAP.lock().size_of(ptr);
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
            HEAP.lock().free(ptr);
        }
        new_ptr.as_ptr()
    }
}

/// Install the kernel allocator as the global allocator.
#[global_allocator]
static GLOBAL_ALLOCATOR: KernelAllocator = KernelAllocator;
