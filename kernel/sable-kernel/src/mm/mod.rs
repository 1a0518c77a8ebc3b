//! Kernel-side memory management glue.
//!
//! The algorithms live in `sable-mm`; this module owns the global
//! singletons (frame allocator, kernel page-table root, heap) and the
//! fixed boot-time initialization order: HHDM, PMM, VMM, heap.

pub mod heap;
pub mod hhdm;
pub mod pmm;
pub mod vmm;

pub use sable_mm::PAGE_SIZE;
