//! Block-device registry and byte-granular I/O helpers.
//!
//! Devices are listed in registration order; the first registered device is
//! the implicit root (the volume the kernel mounts) until changed. Names
//! follow the `<driver><unit>` convention (`ahci0`, `ata0`, `ahci0p1`).

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use sable_driver_api::{BlockDevice, IoError, SECTOR_SIZE};

/// A named entry in the block-device registry.
pub struct RegisteredDevice {
    /// Device name, e.g. `ahci0` or `ahci0p1`.
    pub name: String,
    /// Driver-defined unit index.
    pub unit: u32,
    /// The device handle.
    pub device: Arc<dyn BlockDevice>,
}

/// The block-device registry.
///
/// The kernel wraps one of these in a global `SpinLock`; host tests use it
/// directly.
pub struct BlockRegistry {
    devices: Vec<RegisteredDevice>,
    root: Option<usize>,
}

impl BlockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            devices: Vec::new(),
            root: None,
        }
    }

    /// Registers a device. The first registered device becomes the root.
    pub fn register(&mut self, name: String, unit: u32, device: Arc<dyn BlockDevice>) {
        self.devices.push(RegisteredDevice { name, unit, device });
        if self.root.is_none() {
            self.root = Some(self.devices.len() - 1);
        }
    }

    /// Returns the root device, if any.
    #[must_use]
    pub fn root(&self) -> Option<&RegisteredDevice> {
        self.root.and_then(|i| self.devices.get(i))
    }

    /// Makes the named device the root.
    ///
    /// Returns `false` if no device has that name.
    pub fn set_root(&mut self, name: &str) -> bool {
        match self.devices.iter().position(|d| d.name == name) {
            Some(i) => {
                self.root = Some(i);
                true
            }
            None => false,
        }
    }

    /// Looks up a device by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&RegisteredDevice> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Iterates over all registered devices in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredDevice> {
        self.devices.iter()
    }

    /// Returns the number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` if no devices are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads `buf.len()` bytes at absolute byte `offset` on the device.
///
/// Sector-unaligned heads and tails go through a bounce sector; aligned
/// middles are read in chunks of up to 128 sectors.
///
/// # Errors
///
/// Returns [`IoError`] if any underlying sector read fails.
pub fn read_bytes(dev: &dyn BlockDevice, offset: u64, buf: &mut [u8]) -> Result<(), IoError> {
    let mut lba = offset / SECTOR_SIZE as u64;
    let head = (offset % SECTOR_SIZE as u64) as usize;
    let mut done = 0usize;

    let mut tmp = [0u8; SECTOR_SIZE];
    if head != 0 {
        dev.read_sectors(lba, 1, &mut tmp)?;
        let take = (SECTOR_SIZE - head).min(buf.len());
        buf[..take].copy_from_slice(&tmp[head..head + take]);
        done += take;
        lba += 1;
    }

    while buf.len() - done >= SECTOR_SIZE {
        let sectors = ((buf.len() - done) / SECTOR_SIZE).min(128) as u32;
        let bytes = sectors as usize * SECTOR_SIZE;
        dev.read_sectors(lba, sectors, &mut buf[done..done + bytes])?;
        lba += u64::from(sectors);
        done += bytes;
    }

    if done < buf.len() {
        dev.read_sectors(lba, 1, &mut tmp)?;
        let rest = buf.len() - done;
        buf[done..].copy_from_slice(&tmp[..rest]);
    }
    Ok(())
}

/// Writes `buf.len()` bytes at absolute byte `offset` on the device.
///
/// Performs read-modify-write on sector-unaligned heads and tails.
///
/// # Errors
///
/// Returns [`IoError`] if any underlying sector access fails.
pub fn write_bytes(dev: &dyn BlockDevice, offset: u64, buf: &[u8]) -> Result<(), IoError> {
    let mut lba = offset / SECTOR_SIZE as u64;
    let head = (offset % SECTOR_SIZE as u64) as usize;
    let mut done = 0usize;

    let mut tmp = [0u8; SECTOR_SIZE];
    if head != 0 {
        dev.read_sectors(lba, 1, &mut tmp)?;
        let take = (SECTOR_SIZE - head).min(buf.len());
        tmp[head..head + take].copy_from_slice(&buf[..take]);
        dev.write_sectors(lba, 1, &tmp)?;
        done += take;
        lba += 1;
    }

    while buf.len() - done >= SECTOR_SIZE {
        let sectors = ((buf.len() - done) / SECTOR_SIZE).min(128) as u32;
        let bytes = sectors as usize * SECTOR_SIZE;
        dev.write_sectors(lba, sectors, &buf[done..done + bytes])?;
        lba += u64::from(sectors);
        done += bytes;
    }

    if done < buf.len() {
        dev.read_sectors(lba, 1, &mut tmp)?;
        let rest = buf.len() - done;
        tmp[..rest].copy_from_slice(&buf[done..]);
        dev.write_sectors(lba, 1, &tmp)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sable_core::sync::SpinLock;

    /// An in-memory disk for host tests.
    pub(crate) struct RamDisk {
        data: SpinLock<Vec<u8>>,
    }

    impl RamDisk {
        pub(crate) fn new(sectors: usize) -> Self {
            Self {
                data: SpinLock::new(vec![0u8; sectors * SECTOR_SIZE]),
            }
        }

        pub(crate) fn from_image(image: Vec<u8>) -> Self {
            assert_eq!(image.len() % SECTOR_SIZE, 0);
            Self {
                data: SpinLock::new(image),
            }
        }

        pub(crate) fn snapshot(&self) -> Vec<u8> {
            self.data.lock().clone()
        }
    }

    impl BlockDevice for RamDisk {
        fn read_sectors(&self, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), IoError> {
            let data = self.data.lock();
            let start = lba as usize * SECTOR_SIZE;
            let len = count as usize * SECTOR_SIZE;
            if start + len > data.len() {
                return Err(IoError::OutOfRange);
            }
            if buf.len() < len {
                return Err(IoError::InvalidBuffer);
            }
            buf[..len].copy_from_slice(&data[start..start + len]);
            Ok(())
        }

        fn write_sectors(&self, lba: u64, count: u32, buf: &[u8]) -> Result<(), IoError> {
            let mut data = self.data.lock();
            let start = lba as usize * SECTOR_SIZE;
            let len = count as usize * SECTOR_SIZE;
            if start + len > data.len() {
                return Err(IoError::OutOfRange);
            }
            if buf.len() < len {
                return Err(IoError::InvalidBuffer);
            }
            data[start..start + len].copy_from_slice(&buf[..len]);
            Ok(())
        }

        fn sector_count(&self) -> u64 {
            (self.data.lock().len() / SECTOR_SIZE) as u64
        }
    }

    #[test]
    fn first_registered_is_root() {
        let mut reg = BlockRegistry::new();
        reg.register("ata0".into(), 0, Arc::new(RamDisk::new(8)));
        reg.register("ahci0".into(), 0, Arc::new(RamDisk::new(8)));
        assert_eq!(reg.root().unwrap().name, "ata0");
        assert!(reg.set_root("ahci0"));
        assert_eq!(reg.root().unwrap().name, "ahci0");
        assert!(!reg.set_root("nvme0"));
    }

    #[test]
    fn unaligned_byte_roundtrip() {
        let disk = RamDisk::new(8);
        let payload: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        write_bytes(&disk, 300, &payload).unwrap();

        let mut back = vec![0u8; payload.len()];
        read_bytes(&disk, 300, &mut back).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn rmw_preserves_neighbors() {
        let disk = RamDisk::new(4);
        let base: Vec<u8> = vec![0xEE; 4 * SECTOR_SIZE];
        write_bytes(&disk, 0, &base).unwrap();

        write_bytes(&disk, 700, &[0x11; 100]).unwrap();

        let mut all = vec![0u8; 4 * SECTOR_SIZE];
        read_bytes(&disk, 0, &mut all).unwrap();
        assert_eq!(all[699], 0xEE);
        assert_eq!(all[700], 0x11);
        assert_eq!(all[799], 0x11);
        assert_eq!(all[800], 0xEE);
    }

    #[test]
    fn out_of_range_read_fails() {
        let disk = RamDisk::new(2);
        let mut buf = [0u8; SECTOR_SIZE];
        assert!(read_bytes(&disk, 2 * SECTOR_SIZE as u64, &mut buf).is_err());
    }
}
