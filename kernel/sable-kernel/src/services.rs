//! [`KernelServices`] implementation handed to hardware drivers.

use sable_core::addr::PhysAddr;
use sable_core::paging::PhysFrame;
use sable_driver_api::{IoError, KernelServices};

use crate::mm::{hhdm, pmm, vmm};

struct Services;

static SERVICES: Services = Services;

impl KernelServices for Services {
    fn alloc_dma_frames(&self, count: usize) -> Result<u64, IoError> {
        pmm::alloc_frames(count)
            .map(|frame| frame.start_address().as_u64())
            .ok_or(IoError::DmaError)
    }

    unsafe fn free_dma_frames(&self, phys: u64, count: usize) {
        pmm::free_frames(
            PhysFrame::containing_address(PhysAddr::new_truncate(phys)),
            count,
        );
    }

    fn phys_to_virt(&self, phys: u64) -> u64 {
        hhdm::phys_to_virt(PhysAddr::new_truncate(phys)).as_u64()
    }

    fn map_mmio(&self, phys: u64, size: u64) -> Result<u64, IoError> {
        vmm::map_mmio(PhysAddr::new_truncate(phys), size)
            .map(|virt| virt.as_u64())
            .map_err(|_| IoError::DmaError)
    }
}

/// Returns the kernel services singleton.
#[must_use]
pub fn services() -> &'static dyn KernelServices {
    &SERVICES
}
