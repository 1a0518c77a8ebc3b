//! Kernel filesystem glue: block-device registry, root volume, per-process
//! working directories.
//!
//! Bring-up order: probe AHCI (preferred), fall back to legacy ATA,
//! register every disk, open the first MBR partition of the root disk as a
//! child device, and mount ext2 on it (or on the whole disk when no MBR is
//! present).

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;

use sable_core::sync::SpinLock;
use sable_core::{kerr, kinfo, kwarn};
use sable_driver_api::BlockDevice;
use sable_fs::FsError;
use sable_fs::block::BlockRegistry;
use sable_fs::ext2::Ext2Fs;
use sable_fs::part;

use crate::{proc, services, time};

static REGISTRY: SpinLock<BlockRegistry> = SpinLock::new(BlockRegistry::new());

static ROOT_FS: SpinLock<Option<Ext2Fs>> = SpinLock::new(None);

/// Working directory used before any process exists.
static KERNEL_CWD: SpinLock<Option<String>> = SpinLock::new(None);

/// Executes a closure with the mounted root filesystem.
///
/// Returns `Err(FsError::NotFound)` when no volume is mounted.
pub fn with_root_fs<R>(f: impl FnOnce(&mut Ext2Fs) -> R) -> Result<R, FsError> {
    let mut fs = ROOT_FS.lock();
    match fs.as_mut() {
        Some(fs) => Ok(f(fs)),
        None => Err(FsError::NotFound),
    }
}

/// Returns the working directory of the current process, or the kernel
/// fallback during early boot.
#[must_use]
pub fn current_cwd() -> String {
    proc::try_current_cwd()
        .or_else(|| KERNEL_CWD.lock().clone())
        .unwrap_or_else(|| String::from("/"))
}

/// Probes the block stack and mounts the root volume.
///
/// A missing disk or volume is logged but not fatal; the kernel can still
/// run the fallback init module.
pub fn init() {
    let services = services::services();

    // AHCI preferred; legacy ATA PIO as fallback.
    let ahci_disks = sable_drivers::ahci::probe(services);
    if ahci_disks.is_empty() {
        let ata_disks = sable_drivers::ata::probe();
        let mut registry = REGISTRY.lock();
        for (unit, disk) in ata_disks.into_iter().enumerate() {
            registry.register(format!("ata{unit}"), unit as u32, Arc::new(disk));
        }
    } else {
        let mut registry = REGISTRY.lock();
        for (unit, disk) in ahci_disks.into_iter().enumerate() {
            registry.register(format!("ahci{unit}"), unit as u32, disk);
        }
    }

    let Some((root_name, root_dev)) = ({
        let registry = REGISTRY.lock();
        registry
            .root()
            .map(|dev| (dev.name.clone(), dev.device.clone()))
    }) else {
        kwarn!("fs: no block devices; running without a root volume");
        return;
    };

    // Open the first MBR partition as a child device, if the disk has one.
    let volume: Arc<dyn BlockDevice> = match part::open_first_partition(&root_dev) {
        Ok(Some((info, partition))) => {
            let name = format!("{}p{}", root_name, info.index + 1);
            kinfo!(
                "fs: partition {} (type {:#04x}) at lba {} ({} sectors)",
                name,
                info.part_type,
                info.first_lba,
                info.sector_count
            );
            let device: Arc<dyn BlockDevice> = Arc::new(partition);
            REGISTRY
                .lock()
                .register(name.clone(), info.index as u32, device.clone());
            REGISTRY.lock().set_root(&name);
            device
        }
        Ok(None) => {
            kinfo!("fs: {} carries no MBR; mounting whole disk", root_name);
            root_dev
        }
        Err(err) => {
            kerr!("fs: reading MBR failed: {}", err);
            return;
        }
    };

    match Ext2Fs::mount(volume) {
        Ok(mut fs) => {
            fs.set_clock(time::seconds);
            kinfo!(
                "fs: ext2 mounted ({} KiB blocks, {} groups)",
                fs.block_size() / 1024,
                fs.group_count()
            );
            *ROOT_FS.lock() = Some(fs);
            *KERNEL_CWD.lock() = Some(String::from("/"));
        }
        Err(err) => {
            kerr!("fs: ext2 mount failed: {}", err);
        }
    }
}
