//! AHCI per-port state and polled command execution.
//!
//! Each port represents one SATA device connection. Bring-up stops the
//! command engines, installs a one-page command list + received-FIS area,
//! powers the device up (with at most one short COMRESET when the link is
//! down but a device is electrically present), restarts the engines, and
//! runs IDENTIFY DEVICE. Data commands are `READ/WRITE DMA EXT` through a
//! physically contiguous bounce buffer, polled to completion on `PxCI`.

use core::ptr;
use core::sync::atomic::{Ordering, fence};

use sable_driver_api::{IoError, KernelServices, SECTOR_SIZE};

use super::command::{
    CMD_FIS_LEN_DWORDS, CMD_FIS_OFFSET, CMD_HDR_WRITE, CommandHeader, FisRegH2d, PRDT_OFFSET,
    PrdtEntry,
};
use super::hba::{AhciHba, read32_at, write32_at};
use super::regs::{
    self, ATA_CMD_IDENTIFY, ATA_CMD_READ_DMA_EXT, ATA_CMD_WRITE_DMA_EXT, FIS_TYPE_REG_H2D,
    PortCmd, PortIs, SCTL_DET_INIT, SCTL_DET_MASK, SCTL_DET_NONE, SSTS_DET_PRESENT,
    SSTS_DET_PRESENT_NO_PHY, SSTS_IPM_ACTIVE, ssts_det, ssts_ipm,
};

/// Page size for DMA allocations.
const PAGE_SIZE: u64 = 4096;

/// Size of the command list (32 headers * 32 bytes).
const CMD_LIST_SIZE: u64 = 32 * 32;

/// Bounded iterations when waiting for engine state bits.
const ENGINE_SPIN_LIMIT: u32 = 1_000_000;

/// Bounded iterations when polling command completion.
const COMPLETION_SPIN_LIMIT: u32 = 10_000_000;

/// Short delay loop used around COMRESET sequencing.
fn spin_delay(iters: u32) {
    for _ in 0..iters {
        core::hint::spin_loop();
    }
}

/// Parsed IDENTIFY DEVICE data.
pub struct DeviceIdentity {
    /// Total addressable sectors (48-bit LBA).
    pub sector_count: u64,
    /// Model string (40 bytes, ATA byte-swapped already fixed up).
    pub model: [u8; 40],
}

/// Per-port AHCI state.
///
/// The embedding disk wraps this in a `SpinLock`, so commands always run on
/// slot 0 with exclusive access.
pub struct AhciPort {
    /// Virtual base address of this port's register block.
    port_base: u64,
    /// Port number (0-31).
    pub port_num: u8,
    /// Physical address of the CLB+FB DMA page.
    #[allow(dead_code, reason = "kept for port teardown")]
    clb_fb_phys: u64,
    /// Virtual address of the CLB+FB DMA page.
    clb_fb_virt: u64,
    /// Command table for slot 0, allocated lazily on first use.
    cmd_table_phys: u64,
    cmd_table_virt: u64,
    /// Kernel services for DMA allocation and HHDM translation.
    services: &'static dyn KernelServices,
    /// Parsed device identity, populated after IDENTIFY.
    pub identity: Option<DeviceIdentity>,
}

impl AhciPort {
    fn read_reg(&self, offset: u64) -> u32 {
        // SAFETY: The port register block was mapped with the ABAR.
        unsafe { read32_at(self.port_base, offset) }
    }

    fn write_reg(&self, offset: u64, value: u32) {
        // SAFETY: The port register block was mapped with the ABAR.
        unsafe { write32_at(self.port_base, offset, value) };
    }

    /// Initializes a port: device presence check (with one bounded
    /// COMRESET if needed), DMA structures, engine start, IDENTIFY.
    ///
    /// Returns `None` if no device is attached.
    pub fn init(
        hba: &AhciHba,
        port_num: u8,
        services: &'static dyn KernelServices,
    ) -> Option<Self> {
        let port_base = hba.port_base(port_num);

        let mut port = Self {
            port_base,
            port_num,
            clb_fb_phys: 0,
            clb_fb_virt: 0,
            cmd_table_phys: 0,
            cmd_table_virt: 0,
            services,
            identity: None,
        };

        if !port.ensure_link_up() {
            return None;
        }

        port.stop_engines();

        // One page holds the command list (1 KiB) plus the received FIS
        // area (256 bytes).
        let clb_fb_phys = services.alloc_dma_frames(1).ok()?;
        let clb_fb_virt = services.phys_to_virt(clb_fb_phys);
        // SAFETY: Freshly allocated, HHDM-mapped page.
        unsafe { ptr::write_bytes(clb_fb_virt as *mut u8, 0, PAGE_SIZE as usize) };
        port.clb_fb_phys = clb_fb_phys;
        port.clb_fb_virt = clb_fb_virt;

        port.write_reg(regs::PORT_CLB, clb_fb_phys as u32);
        port.write_reg(regs::PORT_CLBU, (clb_fb_phys >> 32) as u32);
        let fb_phys = clb_fb_phys + CMD_LIST_SIZE;
        port.write_reg(regs::PORT_FB, fb_phys as u32);
        port.write_reg(regs::PORT_FBU, (fb_phys >> 32) as u32);

        // Power up and clear stale error/interrupt state.
        let cmd = port.read_reg(regs::PORT_CMD);
        port.write_reg(
            regs::PORT_CMD,
            cmd | PortCmd::POD.bits() | PortCmd::SUD.bits(),
        );
        port.write_reg(regs::PORT_SERR, 0xFFFF_FFFF);
        port.write_reg(regs::PORT_IS, 0xFFFF_FFFF);

        port.start_engines();

        match port.identify() {
            Ok(identity) => {
                sable_core::kinfo!(
                    "ahci: port {} -- {} sectors",
                    port_num,
                    identity.sector_count
                );
                port.identity = Some(identity);
                Some(port)
            }
            Err(_) => {
                sable_core::kwarn!("ahci: port {}: IDENTIFY failed", port_num);
                None
            }
        }
    }

    /// Checks SStatus; performs at most one short COMRESET when a device is
    /// electrically present but the link is down. Returns `true` when a
    /// device with an active Phy is attached.
    fn ensure_link_up(&self) -> bool {
        let ssts = self.read_reg(regs::PORT_SSTS);
        if ssts_det(ssts) == SSTS_DET_PRESENT && ssts_ipm(ssts) == SSTS_IPM_ACTIVE {
            return true;
        }
        if ssts_det(ssts) != SSTS_DET_PRESENT_NO_PHY {
            return false;
        }

        let sctl = self.read_reg(regs::PORT_SCTL);
        self.write_reg(regs::PORT_SCTL, (sctl & !SCTL_DET_MASK) | SCTL_DET_INIT);
        spin_delay(2000);
        self.write_reg(regs::PORT_SCTL, (sctl & !SCTL_DET_MASK) | SCTL_DET_NONE);
        spin_delay(2000);

        let ssts = self.read_reg(regs::PORT_SSTS);
        ssts_det(ssts) == SSTS_DET_PRESENT && ssts_ipm(ssts) == SSTS_IPM_ACTIVE
    }

    /// Stops the command-list and FIS-receive engines, bounded.
    fn stop_engines(&self) {
        let cmd = self.read_reg(regs::PORT_CMD);
        self.write_reg(regs::PORT_CMD, cmd & !PortCmd::ST.bits());
        for _ in 0..ENGINE_SPIN_LIMIT {
            if self.read_reg(regs::PORT_CMD) & PortCmd::CR.bits() == 0 {
                break;
            }
            core::hint::spin_loop();
        }

        let cmd = self.read_reg(regs::PORT_CMD);
        self.write_reg(regs::PORT_CMD, cmd & !PortCmd::FRE.bits());
        for _ in 0..ENGINE_SPIN_LIMIT {
            if self.read_reg(regs::PORT_CMD) & PortCmd::FR.bits() == 0 {
                break;
            }
            core::hint::spin_loop();
        }
    }

    /// Starts FIS receive, then the command engine (that order).
    fn start_engines(&self) {
        let cmd = self.read_reg(regs::PORT_CMD);
        self.write_reg(regs::PORT_CMD, cmd | PortCmd::FRE.bits());
        let cmd = self.read_reg(regs::PORT_CMD);
        self.write_reg(regs::PORT_CMD, cmd | PortCmd::ST.bits());
    }

    /// Lazily allocates the slot-0 command table (one page: FIS + PRDT).
    fn ensure_cmd_table(&mut self) -> Result<(), IoError> {
        if self.cmd_table_phys != 0 {
            return Ok(());
        }
        let phys = self.services.alloc_dma_frames(1)?;
        let virt = self.services.phys_to_virt(phys);
        // SAFETY: Freshly allocated, HHDM-mapped page.
        unsafe { ptr::write_bytes(virt as *mut u8, 0, PAGE_SIZE as usize) };
        self.cmd_table_phys = phys;
        self.cmd_table_virt = virt;
        Ok(())
    }

    /// Builds the slot-0 command header, FIS, and PRDT for a transfer of
    /// `count` sectors at `lba` using the bounce buffer at `buf_phys`.
    fn setup_command(&mut self, ata_cmd: u8, lba: u64, count: u16, buf_phys: u64, write: bool)
    -> Result<(), IoError> {
        self.ensure_cmd_table()?;

        let byte_len = u64::from(count) * SECTOR_SIZE as u64;
        let prdt_entries = byte_len.div_ceil(PAGE_SIZE) as usize;

        // Command header (slot 0 of the command list).
        let header_ptr = self.clb_fb_virt as *mut CommandHeader;
        let mut flags = CMD_FIS_LEN_DWORDS;
        if write {
            flags |= CMD_HDR_WRITE;
        }
        let header = CommandHeader {
            flags,
            prdtl: prdt_entries as u16,
            prdbc: 0,
            ctba: self.cmd_table_phys as u32,
            ctbau: (self.cmd_table_phys >> 32) as u32,
            _reserved: [0; 4],
        };
        // SAFETY: The command list page is ours and HHDM-mapped.
        unsafe { ptr::write_volatile(header_ptr, header) };

        // Register FIS with LBA48 addressing.
        let mut fis = FisRegH2d::zeroed();
        fis.fis_type = FIS_TYPE_REG_H2D;
        fis.pm_and_c = 1 << 7; // command
        fis.command = ata_cmd;
        fis.device = 1 << 6; // LBA mode
        fis.lba0 = lba as u8;
        fis.lba1 = (lba >> 8) as u8;
        fis.lba2 = (lba >> 16) as u8;
        fis.lba3 = (lba >> 24) as u8;
        fis.lba4 = (lba >> 32) as u8;
        fis.lba5 = (lba >> 40) as u8;
        fis.count_lo = count as u8;
        fis.count_hi = (count >> 8) as u8;
        let fis_ptr = (self.cmd_table_virt + CMD_FIS_OFFSET as u64) as *mut FisRegH2d;
        // SAFETY: The command table page is ours and HHDM-mapped.
        unsafe { ptr::write_volatile(fis_ptr, fis) };

        // One PRDT entry per 4 KiB page of the bounce buffer.
        let prdt_base = (self.cmd_table_virt + PRDT_OFFSET as u64) as *mut PrdtEntry;
        let mut remaining = byte_len;
        for i in 0..prdt_entries {
            let chunk_phys = buf_phys + i as u64 * PAGE_SIZE;
            let chunk_len = remaining.min(PAGE_SIZE);
            let entry = PrdtEntry {
                dba: chunk_phys as u32,
                dbau: (chunk_phys >> 32) as u32,
                _reserved: 0,
                dbc: (chunk_len - 1) as u32,
            };
            // SAFETY: PRDT slots live inside our command table page.
            unsafe { ptr::write_volatile(prdt_base.add(i), entry) };
            remaining -= chunk_len;
        }
        Ok(())
    }

    /// Issues the slot-0 command and polls `PxCI` for completion.
    ///
    /// The DMA structures must be globally visible before the hardware sees
    /// the kick, hence the full fence right before the `PxCI` write.
    fn issue_and_wait(&self) -> Result<(), IoError> {
        self.write_reg(regs::PORT_IS, 0xFFFF_FFFF);

        fence(Ordering::SeqCst);
        self.write_reg(regs::PORT_CI, 1);

        for _ in 0..COMPLETION_SPIN_LIMIT {
            let is = PortIs::from_bits_retain(self.read_reg(regs::PORT_IS));
            if is.contains(PortIs::TFES) {
                return Err(IoError::DeviceError);
            }
            if self.read_reg(regs::PORT_CI) & 1 == 0 {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(IoError::Timeout)
    }

    /// Runs IDENTIFY DEVICE and parses the response.
    fn identify(&mut self) -> Result<DeviceIdentity, IoError> {
        let buf_phys = self.services.alloc_dma_frames(1)?;
        let buf_virt = self.services.phys_to_virt(buf_phys);
        // SAFETY: Freshly allocated, HHDM-mapped page.
        unsafe { ptr::write_bytes(buf_virt as *mut u8, 0, PAGE_SIZE as usize) };

        self.setup_command(ATA_CMD_IDENTIFY, 0, 1, buf_phys, false)?;
        let result = self.issue_and_wait();

        let identity = result.map(|()| {
            // SAFETY: The device filled the buffer with 256 identify words.
            let words =
                unsafe { core::slice::from_raw_parts(buf_virt as *const u16, 256) };

            // Words 100..103: LBA48 sector count; fall back to LBA28.
            let mut sector_count = u64::from(words[100])
                | (u64::from(words[101]) << 16)
                | (u64::from(words[102]) << 32)
                | (u64::from(words[103]) << 48);
            if sector_count == 0 {
                sector_count = u64::from(words[60]) | (u64::from(words[61]) << 16);
            }

            // Words 27..46: model, bytes swapped within each word.
            let mut model = [0u8; 40];
            for i in 0..20 {
                let word = words[27 + i];
                model[i * 2] = (word >> 8) as u8;
                model[i * 2 + 1] = word as u8;
            }

            DeviceIdentity {
                sector_count,
                model,
            }
        });

        // SAFETY: The command completed (or failed); the buffer is idle.
        unsafe { self.services.free_dma_frames(buf_phys, 1) };
        identity
    }

    /// Reads `count` sectors at `lba` into `out` through a bounce buffer.
    /// `count` must fit the PRDT of a one-page command table.
    pub fn read(&mut self, lba: u64, count: u16, out: &mut [u8]) -> Result<(), IoError> {
        let byte_len = usize::from(count) * SECTOR_SIZE;
        let pages = byte_len.div_ceil(PAGE_SIZE as usize);

        let buf_phys = self.services.alloc_dma_frames(pages)?;
        let buf_virt = self.services.phys_to_virt(buf_phys);

        let result = self
            .setup_command(ATA_CMD_READ_DMA_EXT, lba, count, buf_phys, false)
            .and_then(|()| self.issue_and_wait());

        if result.is_ok() {
            // SAFETY: The device finished filling the bounce pages.
            unsafe {
                ptr::copy_nonoverlapping(buf_virt as *const u8, out.as_mut_ptr(), byte_len);
            }
        }

        // SAFETY: The command is complete; the hardware no longer references
        // the bounce buffer.
        unsafe { self.services.free_dma_frames(buf_phys, pages) };
        result
    }

    /// Writes `count` sectors at `lba` from `src` through a bounce buffer.
    /// The source bytes are copied into the bounce buffer before the
    /// command is issued.
    pub fn write(&mut self, lba: u64, count: u16, src: &[u8]) -> Result<(), IoError> {
        let byte_len = usize::from(count) * SECTOR_SIZE;
        let pages = byte_len.div_ceil(PAGE_SIZE as usize);

        let buf_phys = self.services.alloc_dma_frames(pages)?;
        let buf_virt = self.services.phys_to_virt(buf_phys);

        // SAFETY: The bounce pages were just allocated for us.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), buf_virt as *mut u8, byte_len);
        }

        let result = self
            .setup_command(ATA_CMD_WRITE_DMA_EXT, lba, count, buf_phys, true)
            .and_then(|()| self.issue_and_wait());

        // SAFETY: The command is complete; the hardware no longer references
        // the bounce buffer.
        unsafe { self.services.free_dma_frames(buf_phys, pages) };
        result
    }
}
