//! Kernel services exposed to drivers.
//!
//! Drivers cannot depend on the kernel crate directly, so the kernel hands
//! them a [`KernelServices`] reference at probe time for the few things only
//! it can do: DMA-capable frame allocation, HHDM translation, and MMIO
//! mapping.

use crate::block::IoError;

/// Services the kernel provides to hardware drivers.
pub trait KernelServices: Send + Sync {
    /// Allocates `count` physically contiguous, page-aligned 4 KiB frames
    /// suitable for DMA. Returns the physical base address.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::DmaError`] under memory pressure.
    fn alloc_dma_frames(&self, count: usize) -> Result<u64, IoError>;

    /// Frees frames previously returned by
    /// [`alloc_dma_frames`](Self::alloc_dma_frames).
    ///
    /// # Safety
    ///
    /// The hardware must no longer reference the frames.
    unsafe fn free_dma_frames(&self, phys: u64, count: usize);

    /// Translates a physical address to its kernel-visible HHDM address.
    fn phys_to_virt(&self, phys: u64) -> u64;

    /// Maps `size` bytes of MMIO at physical `phys` as uncached kernel
    /// memory and returns the virtual base address.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::DmaError`] if the mapping cannot be built.
    fn map_mmio(&self, phys: u64, size: u64) -> Result<u64, IoError>;
}
