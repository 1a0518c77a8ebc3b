//! Limine boot stub for the Sable kernel.
//!
//! The Limine-specific entry point: declares the protocol requests, brings
//! up COM1 for early logging, converts the bootloader responses into the
//! kernel's [`BootInfo`](sable_kernel::boot::BootInfo) types, and calls
//! [`kernel_init`](sable_kernel::kernel_init) on the loader-provided page
//! tables (whose upper half every process later shares).

#![no_std]
#![no_main]

mod requests;

use planck_noalloc::vec::ArrayVec;
use requests::REQUESTS;

use limine::memmap::MemMapEntryType;
use sable_core::addr::PhysAddr;
use sable_core::{kinfo, kwarn};
use sable_drivers::uart16550::{BaudRate, COM1, Uart16550};
use sable_kernel::boot::{
    BootInfo, MAX_MEMORY_REGIONS, MAX_MODULES, MemoryRegion, MemoryRegionKind, ModuleInfo,
};
use sable_kernel::fb::FramebufferRecord;

/// Limine entry point.
///
/// Called by the bootloader after it has populated the `REQUESTS` block.
#[unsafe(no_mangle)]
extern "C" fn _start() -> ! {
    let serial = Uart16550::new(COM1);
    // SAFETY: COM1 is the standard PC serial port; reprogramming it during
    // boot is the whole point.
    let _ = unsafe { serial.init(BaudRate::Baud115200) };
    sable_kernel::log::init_early_serial();

    assert!(
        REQUESTS.base_revision.is_supported(),
        "bootloader does not support the requested Limine revision"
    );

    kinfo!("Sable booting via Limine...");

    let hhdm_offset = REQUESTS
        .hhdm
        .response()
        .expect("no HHDM response")
        .hhdm_base;

    let memmap_response = REQUESTS.memmap.response().expect("no memory map response");

    let mut memory_map: ArrayVec<MemoryRegion, MAX_MEMORY_REGIONS> = ArrayVec::new();
    for entry in memmap_response.entries() {
        let kind = match entry.type_ {
            MemMapEntryType::Usable => MemoryRegionKind::Usable,
            MemMapEntryType::Reserved => MemoryRegionKind::Reserved,
            MemMapEntryType::AcpiReclaimable | MemMapEntryType::AcpiTables => {
                MemoryRegionKind::AcpiReclaimable
            }
            MemMapEntryType::AcpiNvs => MemoryRegionKind::AcpiNvs,
            MemMapEntryType::BadMemory => MemoryRegionKind::BadMemory,
            MemMapEntryType::BootloaderReclaimable => MemoryRegionKind::BootloaderReclaimable,
            MemMapEntryType::KernelAndModules => MemoryRegionKind::KernelAndModules,
            MemMapEntryType::Framebuffer => MemoryRegionKind::Framebuffer,
        };
        if memory_map
            .try_push(MemoryRegion {
                start: PhysAddr::new_truncate(entry.base),
                size: entry.length,
                kind,
            })
            .is_err()
        {
            kwarn!("boot: memory map truncated to {} entries", MAX_MEMORY_REGIONS);
            break;
        }
    }

    // The framebuffer address is an HHDM virtual address; the kernel wants
    // the physical base so it can map it into user processes.
    let framebuffer = REQUESTS.framebuffer.response().and_then(|response| {
        response.framebuffers().next().map(|raw| FramebufferRecord {
            phys_base: raw.address.as_ptr() as u64 - hhdm_offset,
            width: raw.width,
            height: raw.height,
            pitch: raw.pitch,
            bpp: raw.bpp,
        })
    });

    let mut modules: ArrayVec<ModuleInfo, MAX_MODULES> = ArrayVec::new();
    if let Some(response) = REQUESTS.modules.response() {
        for file in response.modules() {
            let info = ModuleInfo {
                phys_addr: PhysAddr::new_truncate(file.address.as_ptr() as u64 - hhdm_offset),
                size: file.size,
                name: file.name(),
            };
            if modules.try_push(info).is_err() {
                kwarn!("boot: module list truncated to {} entries", MAX_MODULES);
                break;
            }
        }
    }

    let rsdp_addr = REQUESTS.rsdp.response().map(|response| response.address);

    let boot_info = BootInfo {
        memory_map,
        hhdm_offset,
        framebuffer,
        modules,
        rsdp_addr,
    };

    sable_kernel::kernel_init(&boot_info)
}
