//! AHCI HBA (Host Bus Adapter) controller.
//!
//! Safe volatile MMIO access to the generic host control registers, AHCI
//! enable, and the best-effort BIOS/OS handoff.

use core::ptr;

use super::regs::{self, HbaBohc, HbaCap, HbaCap2, HbaGhc};

/// Bounded iterations while waiting for the BIOS to release the HBA.
const HANDOFF_SPIN_LIMIT: u32 = 1_000_000;

/// AHCI HBA controller state.
pub struct AhciHba {
    /// Virtual base address of the HBA MMIO region (ABAR).
    base: u64,
    /// Number of command slots per port (1-32).
    pub num_cmd_slots: u8,
    /// Whether the HBA supports 64-bit addressing.
    pub supports_64bit: bool,
}

impl AhciHba {
    /// Creates a new HBA handle by reading capabilities from MMIO registers.
    ///
    /// # Safety
    ///
    /// `base` must point to a valid, mapped AHCI ABAR region.
    pub unsafe fn new(base: u64) -> Self {
        // SAFETY: Caller guarantees the ABAR mapping.
        let cap = HbaCap::from_bits_retain(unsafe { read32_at(base, regs::HBA_CAP) });

        Self {
            base,
            num_cmd_slots: cap.num_cmd_slots(),
            supports_64bit: cap.contains(HbaCap::S64A),
        }
    }

    /// Performs the BIOS/OS handoff if CAP2 advertises it.
    ///
    /// Sets the OS-owned semaphore and waits (bounded) for the BIOS to drop
    /// its own; a BIOS that never answers is ignored.
    pub fn bios_handoff(&self) {
        let cap2 = HbaCap2::from_bits_retain(self.read32(regs::HBA_CAP2));
        if !cap2.contains(HbaCap2::BOH) {
            return;
        }

        let bohc = self.read32(regs::HBA_BOHC);
        self.write32(regs::HBA_BOHC, bohc | HbaBohc::OOS.bits());

        for _ in 0..HANDOFF_SPIN_LIMIT {
            let bohc = HbaBohc::from_bits_retain(self.read32(regs::HBA_BOHC));
            if !bohc.contains(HbaBohc::BOS) && !bohc.contains(HbaBohc::BB) {
                break;
            }
            core::hint::spin_loop();
        }
    }

    /// Enables AHCI mode (GHC.AE).
    pub fn enable(&self) {
        let ghc = self.read32(regs::HBA_GHC);
        self.write32(regs::HBA_GHC, ghc | HbaGhc::AE.bits());
    }

    /// Returns the Ports Implemented bitmask.
    #[must_use]
    pub fn ports_implemented(&self) -> u32 {
        self.read32(regs::HBA_PI)
    }

    /// Returns the AHCI version as (major, minor).
    #[must_use]
    pub fn version(&self) -> (u16, u16) {
        let vs = self.read32(regs::HBA_VS);
        ((vs >> 16) as u16, vs as u16)
    }

    /// Returns the virtual base address of a port's register block.
    #[must_use]
    pub fn port_base(&self, port: u8) -> u64 {
        self.base + regs::PORT_BASE + u64::from(port) * regs::PORT_REG_SIZE
    }

    /// Reads a 32-bit MMIO register at the given offset from the HBA base.
    #[must_use]
    pub fn read32(&self, offset: u64) -> u32 {
        // SAFETY: base is a valid mapped MMIO region, offset within HBA space.
        unsafe { read32_at(self.base, offset) }
    }

    /// Writes a 32-bit MMIO register at the given offset from the HBA base.
    pub fn write32(&self, offset: u64, value: u32) {
        // SAFETY: base is a valid mapped MMIO region.
        unsafe { ptr::write_volatile((self.base + offset) as *mut u32, value) };
    }
}

/// Volatile read helper.
pub(crate) unsafe fn read32_at(base: u64, offset: u64) -> u32 {
    // SAFETY: Caller guarantees the mapping.
    unsafe { ptr::read_volatile((base + offset) as *const u32) }
}

/// Volatile write helper.
pub(crate) unsafe fn write32_at(base: u64, offset: u64, value: u32) {
    // SAFETY: Caller guarantees the mapping.
    unsafe { ptr::write_volatile((base + offset) as *mut u32, value) };
}
