//! Privileged and miscellaneous x86-64 instructions.

use sable_core::addr::{PhysAddr, VirtAddr};

/// Halts the CPU until the next interrupt.
#[inline]
pub fn hlt() {
    // SAFETY: `hlt` only pauses the CPU.
    unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) };
}

/// Disables maskable interrupts.
#[inline]
pub fn cli() {
    // SAFETY: Masking interrupts has no memory effects.
    unsafe { core::arch::asm!("cli", options(nomem, nostack)) };
}

/// Enables maskable interrupts.
#[inline]
pub fn sti() {
    // SAFETY: Unmasking interrupts has no memory effects.
    unsafe { core::arch::asm!("sti", options(nomem, nostack)) };
}

/// Halts forever with interrupts off.
pub fn halt_loop() -> ! {
    cli();
    loop {
        hlt();
    }
}

/// Reads CR2 (the faulting address after a page fault).
#[must_use]
pub fn read_cr2() -> VirtAddr {
    let value: u64;
    // SAFETY: Reading CR2 has no side effects.
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    VirtAddr::new_truncate(value)
}

/// Reads CR3 (the current page-table root).
#[must_use]
pub fn read_cr3() -> PhysAddr {
    let value: u64;
    // SAFETY: Reading CR3 has no side effects.
    unsafe {
        core::arch::asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    PhysAddr::new_truncate(value & 0x000F_FFFF_FFFF_F000)
}

/// Writes CR3, switching the address space and flushing the TLB.
///
/// # Safety
///
/// `root` must be the physical address of a valid PML4 whose upper half
/// maps the currently executing kernel.
pub unsafe fn write_cr3(root: PhysAddr) {
    // SAFETY: Forwarded to the caller.
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) root.as_u64(), options(nostack, preserves_flags));
    }
}

/// Invalidates the TLB entry for one page.
#[inline]
pub fn invlpg(addr: VirtAddr) {
    // SAFETY: `invlpg` only drops a TLB entry.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) addr.as_u64(), options(nostack, preserves_flags));
    }
}
