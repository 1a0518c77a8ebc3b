//! Higher Half Direct Map (HHDM) global offset and address conversion.
//!
//! The HHDM maps all physical memory at a fixed virtual offset provided by
//! the bootloader. This module stores that offset globally so any code can
//! convert between physical and virtual addresses without threading the
//! offset through every call site.

use core::sync::atomic::{AtomicU64, Ordering};

use sable_core::addr::{PhysAddr, VirtAddr};

/// Sentinel value indicating the HHDM offset has not been initialized.
const HHDM_UNINIT: u64 = u64::MAX;

/// Global HHDM offset, set once during early boot.
static HHDM_OFFSET: AtomicU64 = AtomicU64::new(HHDM_UNINIT);

/// Initializes the global HHDM offset. Must be called exactly once, early
/// in boot.
///
/// # Panics
///
/// Panics if called more than once.
pub fn init(offset: u64) {
    let prev =
        HHDM_OFFSET.compare_exchange(HHDM_UNINIT, offset, Ordering::Release, Ordering::Relaxed);
    assert!(prev.is_ok(), "HHDM: already initialized");
}

/// Returns the HHDM offset.
///
/// # Panics
///
/// Panics if called before [`init`].
#[inline]
#[must_use]
pub fn offset() -> u64 {
    let value = HHDM_OFFSET.load(Ordering::Acquire);
    assert!(value != HHDM_UNINIT, "HHDM: accessed before initialization");
    value
}

/// Converts a physical address to its HHDM virtual address.
#[inline]
#[must_use]
pub fn phys_to_virt(phys: PhysAddr) -> VirtAddr {
    VirtAddr::new_truncate(phys.as_u64() + offset())
}

/// Converts an HHDM virtual address back to a physical address.
///
/// Only valid for kernel addresses inside the direct map.
#[inline]
#[must_use]
pub fn virt_to_phys(virt: VirtAddr) -> PhysAddr {
    PhysAddr::new_truncate(virt.as_u64() - offset())
}
