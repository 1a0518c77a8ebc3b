//! AHCI (Advanced Host Controller Interface) SATA driver.
//!
//! Finds AHCI controllers by PCI class (0x01 storage / 0x06 SATA /
//! prog-if 0x01), maps the ABAR, performs the BIOS/OS handoff, enables AHCI
//! mode, and brings up every implemented port with an attached device.
//! Each working port is exposed as a [`AhciDisk`] implementing
//! [`BlockDevice`].

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use sable_core::sync::SpinLock;
use sable_core::{kinfo, kwarn};
use sable_driver_api::{BlockDevice, IoError, KernelServices, SECTOR_SIZE};

pub mod command;
pub mod hba;
pub mod port;
pub mod regs;

use hba::AhciHba;
use port::AhciPort;

use crate::pci;

/// PCI class code for mass storage.
const PCI_CLASS_STORAGE: u8 = 0x01;
/// PCI subclass code for SATA.
const PCI_SUBCLASS_SATA: u8 = 0x06;
/// PCI programming interface for AHCI 1.0.
const PCI_PROGIF_AHCI: u8 = 0x01;

/// ABAR mapping size: generic host control plus all 32 port register
/// blocks (0x100 + 32 * 0x80), rounded up to whole pages.
const ABAR_MAP_SIZE: u64 = 8192;

/// Sectors transferred per command (keeps the bounce buffer at 64 KiB).
const MAX_SECTORS_PER_CMD: u32 = 128;

/// A SATA disk backed by an AHCI port.
///
/// The port is behind a `SpinLock`: commands run one at a time on slot 0.
pub struct AhciDisk {
    port: SpinLock<AhciPort>,
    sector_count: u64,
}

impl AhciDisk {
    fn chunked<F>(&self, lba: u64, count: u32, mut f: F) -> Result<(), IoError>
    where
        F: FnMut(&mut AhciPort, u64, u16, usize) -> Result<(), IoError>,
    {
        if lba + u64::from(count) > self.sector_count {
            return Err(IoError::OutOfRange);
        }

        let mut port = self.port.lock();
        let mut done = 0u32;
        while done < count {
            let chunk = (count - done).min(MAX_SECTORS_PER_CMD);
            let offset = done as usize * SECTOR_SIZE;
            f(&mut port, lba + u64::from(done), chunk as u16, offset)?;
            done += chunk;
        }
        drop(port);
        Ok(())
    }
}

impl BlockDevice for AhciDisk {
    fn read_sectors(&self, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), IoError> {
        if buf.len() < count as usize * SECTOR_SIZE {
            return Err(IoError::InvalidBuffer);
        }
        self.chunked(lba, count, |port, lba, chunk, offset| {
            let bytes = usize::from(chunk) * SECTOR_SIZE;
            port.read(lba, chunk, &mut buf[offset..offset + bytes])
        })
    }

    fn write_sectors(&self, lba: u64, count: u32, buf: &[u8]) -> Result<(), IoError> {
        if buf.len() < count as usize * SECTOR_SIZE {
            return Err(IoError::InvalidBuffer);
        }
        self.chunked(lba, count, |port, lba, chunk, offset| {
            let bytes = usize::from(chunk) * SECTOR_SIZE;
            port.write(lba, chunk, &buf[offset..offset + bytes])
        })
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }
}

/// Probes all AHCI controllers and returns one disk per attached device.
///
/// Disks come back in (controller, port) order; the caller registers them
/// as `ahci0`, `ahci1`, ...
pub fn probe(services: &'static dyn KernelServices) -> Vec<Arc<AhciDisk>> {
    let mut disks = Vec::new();

    for info in pci::enumerate() {
        if info.class != PCI_CLASS_STORAGE
            || info.subclass != PCI_SUBCLASS_SATA
            || info.prog_if != PCI_PROGIF_AHCI
        {
            continue;
        }

        kinfo!(
            "ahci: controller {:04x}:{:04x} at {}",
            info.vendor_id,
            info.device_id,
            info.address
        );

        // BAR5 = ABAR (AHCI Base Memory Register).
        let abar_phys = pci::memory_bar_base(info.address, 5);
        if abar_phys == 0 {
            kwarn!("ahci: {}: BAR5 is not a memory BAR", info.address);
            continue;
        }

        pci::enable_device(info.address);

        let Ok(abar_virt) = services.map_mmio(abar_phys, ABAR_MAP_SIZE) else {
            kwarn!("ahci: {}: failed to map ABAR", info.address);
            continue;
        };

        // SAFETY: map_mmio just produced a valid uncached mapping of the ABAR.
        let hba = unsafe { AhciHba::new(abar_virt) };
        hba.bios_handoff();
        hba.enable();

        let (major, minor) = hba.version();
        kinfo!("ahci: version {}.{}", major, minor);

        let pi = hba.ports_implemented();
        for port_num in 0..32u8 {
            if pi & (1 << port_num) == 0 {
                continue;
            }
            if let Some(port) = AhciPort::init(&hba, port_num, services) {
                let sector_count = port
                    .identity
                    .as_ref()
                    .map_or(0, |identity| identity.sector_count);
                disks.push(Arc::new(AhciDisk {
                    port: SpinLock::new(port),
                    sector_count,
                }));
            }
        }
    }

    if disks.is_empty() {
        kwarn!("ahci: no devices found");
    } else {
        kinfo!("ahci: {} disk(s) found", disks.len());
    }
    disks
}
