//! AHCI HBA register offsets and bitflags.
//!
//! Memory-mapped register layout of an AHCI Host Bus Adapter: generic host
//! control registers and per-port register blocks.

use bitflags::bitflags;

// ---------------------------------------------------------------------------
// Generic Host Control register offsets
// ---------------------------------------------------------------------------

/// Host Capabilities register offset.
pub const HBA_CAP: u64 = 0x00;
/// Global Host Control register offset.
pub const HBA_GHC: u64 = 0x04;
/// Interrupt Status register offset.
pub const HBA_IS: u64 = 0x08;
/// Ports Implemented register offset.
pub const HBA_PI: u64 = 0x0C;
/// AHCI Version register offset.
pub const HBA_VS: u64 = 0x10;
/// Host Capabilities Extended register offset.
pub const HBA_CAP2: u64 = 0x24;
/// BIOS/OS Handoff Control and Status register offset.
pub const HBA_BOHC: u64 = 0x28;

// ---------------------------------------------------------------------------
// Per-port register offsets (base = 0x100 + port * 0x80)
// ---------------------------------------------------------------------------

/// Port register block size.
pub const PORT_REG_SIZE: u64 = 0x80;
/// Base offset for port 0.
pub const PORT_BASE: u64 = 0x100;

/// Command List Base Address (low 32 bits).
pub const PORT_CLB: u64 = 0x00;
/// Command List Base Address (high 32 bits).
pub const PORT_CLBU: u64 = 0x04;
/// FIS Base Address (low 32 bits).
pub const PORT_FB: u64 = 0x08;
/// FIS Base Address (high 32 bits).
pub const PORT_FBU: u64 = 0x0C;
/// Interrupt Status.
pub const PORT_IS: u64 = 0x10;
/// Interrupt Enable.
pub const PORT_IE: u64 = 0x14;
/// Command and Status.
pub const PORT_CMD: u64 = 0x18;
/// Task File Data.
pub const PORT_TFD: u64 = 0x20;
/// Signature.
pub const PORT_SIG: u64 = 0x24;
/// SATA Status (SCR0: SStatus).
pub const PORT_SSTS: u64 = 0x28;
/// SATA Control (SCR2: SControl).
pub const PORT_SCTL: u64 = 0x2C;
/// SATA Error (SCR1: SError).
pub const PORT_SERR: u64 = 0x30;
/// Command Issue.
pub const PORT_CI: u64 = 0x38;

// ---------------------------------------------------------------------------
// Bitflags
// ---------------------------------------------------------------------------

bitflags! {
    /// HBA Capabilities (CAP) register flags.
    #[derive(Debug, Clone, Copy)]
    pub struct HbaCap: u32 {
        /// Supports 64-bit addressing (S64A).
        const S64A = 1 << 31;
        /// Remaining bits carry counts, accessed via helpers.
        const _ = !0;
    }
}

impl HbaCap {
    /// Returns the number of command slots (1-32).
    #[must_use]
    pub const fn num_cmd_slots(self) -> u8 {
        (((self.bits() >> 8) & 0x1F) + 1) as u8
    }
}

bitflags! {
    /// HBA Capabilities Extended (CAP2) register flags.
    #[derive(Debug, Clone, Copy)]
    pub struct HbaCap2: u32 {
        /// BIOS/OS Handoff supported (BOH).
        const BOH = 1 << 0;
    }
}

bitflags! {
    /// BIOS/OS Handoff Control and Status (BOHC) register flags.
    #[derive(Debug, Clone, Copy)]
    pub struct HbaBohc: u32 {
        /// BIOS Owned Semaphore.
        const BOS = 1 << 0;
        /// OS Owned Semaphore.
        const OOS = 1 << 1;
        /// BIOS Busy.
        const BB = 1 << 4;
    }
}

bitflags! {
    /// Global Host Control (GHC) register flags.
    #[derive(Debug, Clone, Copy)]
    pub struct HbaGhc: u32 {
        /// AHCI Enable (AE).
        const AE = 1 << 31;
        /// Interrupt Enable (IE).
        const IE = 1 << 1;
        /// HBA Reset (HR).
        const HR = 1 << 0;
    }
}

bitflags! {
    /// Port Command and Status (PxCMD) register flags.
    #[derive(Debug, Clone, Copy)]
    pub struct PortCmd: u32 {
        /// Start (ST) -- enables command processing.
        const ST = 1 << 0;
        /// Spin-Up Device (SUD).
        const SUD = 1 << 1;
        /// Power On Device (POD).
        const POD = 1 << 2;
        /// FIS Receive Enable (FRE).
        const FRE = 1 << 4;
        /// FIS Receive Running (FR).
        const FR = 1 << 14;
        /// Command List Running (CR).
        const CR = 1 << 15;
    }
}

bitflags! {
    /// Port Interrupt Status (PxIS) register flags.
    #[derive(Debug, Clone, Copy)]
    pub struct PortIs: u32 {
        /// Device to Host Register FIS Interrupt (DHRS).
        const DHRS = 1 << 0;
        /// Task File Error Status (TFES).
        const TFES = 1 << 30;
    }
}

// ---------------------------------------------------------------------------
// SControl / SStatus helpers
// ---------------------------------------------------------------------------

/// PxSCTL DET field mask (bits 3:0).
pub const SCTL_DET_MASK: u32 = 0x0F;
/// PxSCTL DET value starting COMRESET.
pub const SCTL_DET_INIT: u32 = 0x01;
/// PxSCTL DET value releasing the interface.
pub const SCTL_DET_NONE: u32 = 0x00;

/// Extracts DET (Device Detection) field from SStatus (bits 3:0).
#[must_use]
pub const fn ssts_det(ssts: u32) -> u8 {
    (ssts & 0x0F) as u8
}

/// Extracts IPM (Interface Power Management) field from SStatus (bits 11:8).
#[must_use]
pub const fn ssts_ipm(ssts: u32) -> u8 {
    ((ssts >> 8) & 0x0F) as u8
}

/// DET value: device present but no Phy communication.
pub const SSTS_DET_PRESENT_NO_PHY: u8 = 1;
/// DET value: device present and Phy communication established.
pub const SSTS_DET_PRESENT: u8 = 3;
/// IPM value: interface in active state.
pub const SSTS_IPM_ACTIVE: u8 = 1;

// ---------------------------------------------------------------------------
// ATA constants
// ---------------------------------------------------------------------------

/// ATA IDENTIFY DEVICE command.
pub const ATA_CMD_IDENTIFY: u8 = 0xEC;
/// ATA READ DMA EXT command (48-bit LBA).
pub const ATA_CMD_READ_DMA_EXT: u8 = 0x25;
/// ATA WRITE DMA EXT command (48-bit LBA).
pub const ATA_CMD_WRITE_DMA_EXT: u8 = 0x35;

/// FIS type: Register -- Host to Device.
pub const FIS_TYPE_REG_H2D: u8 = 0x27;
