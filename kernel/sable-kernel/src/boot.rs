//! Boot information types and the kernel entry point.
//!
//! The loader stub (Limine) converts its protocol responses into
//! [`BootInfo`] and calls [`kernel_init`], which brings the subsystems up
//! in a fixed order: GDT/TSS → HHDM → PMM → VMM → heap → full logger →
//! process-0 (idle) → IDT/PIC → timer → ACPI facts → block stack + ext2 →
//! first user process → idle loop.

use planck_noalloc::vec::ArrayVec;
use sable_core::addr::PhysAddr;
use sable_core::{kerr, kinfo};

use crate::arch::x86_64::{gdt, instructions, interrupts};
use crate::config::{INIT_PATH, TIMER_HZ};
use crate::fb::FramebufferRecord;
use crate::{exec, fb, fs, log, mm, power, proc};

/// The kind of a physical memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    /// Normal usable RAM.
    Usable,
    /// Reserved by firmware or hardware.
    Reserved,
    /// ACPI tables that can be reclaimed after parsing.
    AcpiReclaimable,
    /// ACPI Non-Volatile Storage -- must not be used.
    AcpiNvs,
    /// Defective physical memory.
    BadMemory,
    /// Memory used by the bootloader, reclaimable after boot.
    BootloaderReclaimable,
    /// Memory occupied by the kernel image and loaded modules.
    KernelAndModules,
    /// Memory-mapped framebuffer region.
    Framebuffer,
}

/// A contiguous physical memory region.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    /// Physical start address.
    pub start: PhysAddr,
    /// Size in bytes.
    pub size: u64,
    /// Kind of memory region.
    pub kind: MemoryRegionKind,
}

/// A boot module loaded alongside the kernel.
#[derive(Debug, Clone, Copy)]
pub struct ModuleInfo {
    /// Physical address of the module contents.
    pub phys_addr: PhysAddr,
    /// Size in bytes.
    pub size: u64,
    /// Module name from the loader config.
    pub name: &'static str,
}

/// Maximum number of memory regions the kernel stores.
pub const MAX_MEMORY_REGIONS: usize = 128;

/// Maximum number of boot modules the kernel stores.
pub const MAX_MODULES: usize = 8;

/// Loader-provided boot information, already converted into kernel types.
pub struct BootInfo {
    /// Physical memory map.
    pub memory_map: ArrayVec<MemoryRegion, MAX_MEMORY_REGIONS>,
    /// HHDM offset: `virtual = physical + hhdm_offset`.
    pub hhdm_offset: u64,
    /// Primary framebuffer, when the loader set one up.
    pub framebuffer: Option<FramebufferRecord>,
    /// Boot modules.
    pub modules: ArrayVec<ModuleInfo, MAX_MODULES>,
    /// Physical address of the ACPI RSDP, if reported.
    pub rsdp_addr: Option<u64>,
}

impl BootInfo {
    /// Returns the memory map as a slice.
    #[must_use]
    pub fn memory_map(&self) -> &[MemoryRegion] {
        self.memory_map.as_slice()
    }
}

/// Kernel entry point, called by the loader stub on its own page tables.
///
/// Never returns: ends as the idle loop of process 0.
pub fn kernel_init(boot_info: &BootInfo) -> ! {
    // SAFETY: Single boot CPU, interrupts still disabled.
    unsafe { gdt::init() };

    mm::hhdm::init(boot_info.hhdm_offset);
    mm::pmm::init(boot_info);
    mm::vmm::init();
    mm::heap::init();

    // Heap is live: switch from early serial to the sink-based logger.
    log::init_logger();
    let stats = mm::pmm::stats();
    kinfo!(
        "mm: {} MiB total, {} MiB free",
        stats.total * mm::PAGE_SIZE / (1024 * 1024),
        stats.free * mm::PAGE_SIZE / (1024 * 1024)
    );

    if let Some(record) = boot_info.framebuffer {
        kinfo!(
            "fb: {}x{} {}bpp at {:#x}",
            record.width,
            record.height,
            record.bpp,
            record.phys_base
        );
        fb::init(record);
    }

    proc::init();

    // SAFETY: GDT is live; boot CPU; interrupts still masked.
    unsafe { interrupts::init() };
    // SAFETY: Single PIT user, before interrupts are enabled.
    unsafe { sable_drivers::pit::init(TIMER_HZ as u32) };

    power::init(boot_info.rsdp_addr);

    // Block stack and root volume need working interrupts for nothing --
    // all disk I/O is polled -- so they come up before sti.
    fs::init();

    start_init_process(boot_info);

    kinfo!("boot complete; entering idle loop");
    loop {
        instructions::sti();
        instructions::hlt();
    }
}

/// Loads the first user program: `INIT_PATH` from the root volume, falling
/// back to a boot module named `init`.
fn start_init_process(boot_info: &BootInfo) {
    let cwd = fs::current_cwd();
    let from_volume = fs::with_root_fs(|fs| fs.read_entire_file(&cwd, INIT_PATH));

    if let Ok(Ok(image)) = from_volume {
        match exec::spawn(INIT_PATH, &image, &[]) {
            Ok(_) => return,
            Err(err) => kerr!("boot: loading {} failed: {:?}", INIT_PATH, err),
        }
    } else {
        kerr!("boot: no {} on the root volume", INIT_PATH);
    }

    for module in boot_info.modules.iter() {
        if module.name == "init" {
            let virt = mm::hhdm::phys_to_virt(module.phys_addr);
            // SAFETY: The loader mapped the module into the HHDM.
            let image = unsafe {
                core::slice::from_raw_parts(virt.as_ptr::<u8>(), module.size as usize)
            };
            match exec::spawn("init", image, &[]) {
                Ok(_) => return,
                Err(err) => kerr!("boot: loading init module failed: {:?}", err),
            }
        }
    }

    kerr!("boot: no init program; staying in the idle loop");
}
