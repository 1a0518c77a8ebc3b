//! MBR partition table reader.
//!
//! Opens the first usable partition of a disk as a child block device that
//! shares the parent's driver and adds the partition's base LBA to every
//! request. GPT protective entries (type `0xEE`) are skipped; a Linux
//! partition (type `0x83`) is preferred over whatever comes first.

extern crate alloc;

use alloc::sync::Arc;

use sable_driver_api::{BlockDevice, IoError, SECTOR_SIZE};

/// Byte offset of the partition table within the MBR sector.
const PART_TABLE_OFFSET: usize = 446;

/// Size of one partition table entry.
const PART_ENTRY_SIZE: usize = 16;

/// Byte offset of the boot signature.
const SIGNATURE_OFFSET: usize = 510;

/// MBR partition type for GPT protective entries.
const PART_TYPE_GPT_PROTECTIVE: u8 = 0xEE;

/// MBR partition type for Linux filesystems.
const PART_TYPE_LINUX: u8 = 0x83;

/// A selected primary partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbrPartition {
    /// Zero-based index in the partition table (0..4).
    pub index: usize,
    /// Partition type byte.
    pub part_type: u8,
    /// First absolute LBA of the partition.
    pub first_lba: u32,
    /// Number of sectors in the partition.
    pub sector_count: u32,
}

/// Parses an MBR sector and picks the first usable partition.
///
/// Returns `None` if the boot signature is missing or no non-empty,
/// non-protective partition exists. Among candidates, the first Linux
/// (`0x83`) partition wins; otherwise the first non-empty one.
#[must_use]
pub fn parse_mbr(sector: &[u8; SECTOR_SIZE]) -> Option<MbrPartition> {
    let signature = u16::from_le_bytes([sector[SIGNATURE_OFFSET], sector[SIGNATURE_OFFSET + 1]]);
    if signature != 0xAA55 {
        return None;
    }

    let mut chosen: Option<MbrPartition> = None;
    for index in 0..4 {
        let off = PART_TABLE_OFFSET + index * PART_ENTRY_SIZE;
        let part_type = sector[off + 4];
        if part_type == 0 || part_type == PART_TYPE_GPT_PROTECTIVE {
            continue;
        }

        let entry = MbrPartition {
            index,
            part_type,
            first_lba: u32::from_le_bytes([
                sector[off + 8],
                sector[off + 9],
                sector[off + 10],
                sector[off + 11],
            ]),
            sector_count: u32::from_le_bytes([
                sector[off + 12],
                sector[off + 13],
                sector[off + 14],
                sector[off + 15],
            ]),
        };

        if part_type == PART_TYPE_LINUX {
            return Some(entry);
        }
        if chosen.is_none() {
            chosen = Some(entry);
        }
    }
    chosen
}

/// A child block device windowing a partition of its parent.
pub struct PartitionDevice {
    parent: Arc<dyn BlockDevice>,
    base_lba: u64,
    sector_count: u64,
}

impl PartitionDevice {
    /// Creates a partition device over `parent`.
    #[must_use]
    pub fn new(parent: Arc<dyn BlockDevice>, base_lba: u64, sector_count: u64) -> Self {
        Self {
            parent,
            base_lba,
            sector_count,
        }
    }

    /// Returns the partition's base LBA on the parent device.
    #[must_use]
    pub const fn base_lba(&self) -> u64 {
        self.base_lba
    }
}

impl BlockDevice for PartitionDevice {
    fn read_sectors(&self, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), IoError> {
        if lba + u64::from(count) > self.sector_count {
            return Err(IoError::OutOfRange);
        }
        self.parent.read_sectors(self.base_lba + lba, count, buf)
    }

    fn write_sectors(&self, lba: u64, count: u32, buf: &[u8]) -> Result<(), IoError> {
        if lba + u64::from(count) > self.sector_count {
            return Err(IoError::OutOfRange);
        }
        self.parent.write_sectors(self.base_lba + lba, count, buf)
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }
}

/// Reads the MBR of `parent` and opens its first usable partition.
///
/// Returns the partition metadata together with the child device, or `None`
/// if the disk carries no valid MBR.
///
/// # Errors
///
/// Propagates [`IoError`] from reading sector 0.
pub fn open_first_partition(
    parent: &Arc<dyn BlockDevice>,
) -> Result<Option<(MbrPartition, PartitionDevice)>, IoError> {
    let mut sector = [0u8; SECTOR_SIZE];
    parent.read_sectors(0, 1, &mut sector)?;

    Ok(parse_mbr(&sector).map(|part| {
        let device = PartitionDevice::new(
            parent.clone(),
            u64::from(part.first_lba),
            u64::from(part.sector_count),
        );
        (part, device)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::tests::RamDisk;

    fn empty_mbr() -> [u8; SECTOR_SIZE] {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[SIGNATURE_OFFSET] = 0x55;
        sector[SIGNATURE_OFFSET + 1] = 0xAA;
        sector
    }

    fn set_entry(sector: &mut [u8; SECTOR_SIZE], index: usize, ptype: u8, lba: u32, count: u32) {
        let off = PART_TABLE_OFFSET + index * PART_ENTRY_SIZE;
        sector[off + 4] = ptype;
        sector[off + 8..off + 12].copy_from_slice(&lba.to_le_bytes());
        sector[off + 12..off + 16].copy_from_slice(&count.to_le_bytes());
    }

    #[test]
    fn missing_signature_rejected() {
        let sector = [0u8; SECTOR_SIZE];
        assert_eq!(parse_mbr(&sector), None);
    }

    #[test]
    fn empty_table_rejected() {
        assert_eq!(parse_mbr(&empty_mbr()), None);
    }

    #[test]
    fn linux_partition_preferred() {
        let mut sector = empty_mbr();
        set_entry(&mut sector, 0, 0x0C, 64, 1000); // FAT32
        set_entry(&mut sector, 1, PART_TYPE_LINUX, 2048, 8192);
        let part = parse_mbr(&sector).expect("partition");
        assert_eq!(part.index, 1);
        assert_eq!(part.first_lba, 2048);
        assert_eq!(part.sector_count, 8192);
    }

    #[test]
    fn first_nonempty_when_no_linux() {
        let mut sector = empty_mbr();
        set_entry(&mut sector, 2, 0x07, 128, 500);
        let part = parse_mbr(&sector).expect("partition");
        assert_eq!(part.index, 2);
        assert_eq!(part.part_type, 0x07);
    }

    #[test]
    fn gpt_protective_skipped() {
        let mut sector = empty_mbr();
        set_entry(&mut sector, 0, PART_TYPE_GPT_PROTECTIVE, 1, 0xFFFF_FFFF);
        assert_eq!(parse_mbr(&sector), None);
    }

    #[test]
    fn partition_device_offsets_and_bounds() {
        let disk = Arc::new(RamDisk::new(64));
        // Stamp sector 10 so we can see it through the partition window.
        let mut stamp = [0u8; SECTOR_SIZE];
        stamp[0] = 0xAB;
        disk.write_sectors(10, 1, &stamp).unwrap();

        let part = PartitionDevice::new(disk, 10, 4);
        let mut buf = [0u8; SECTOR_SIZE];
        part.read_sectors(0, 1, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAB);
        assert_eq!(part.sector_count(), 4);
        assert!(part.read_sectors(4, 1, &mut buf).is_err());
    }

    #[test]
    fn open_first_partition_end_to_end() {
        let disk = Arc::new(RamDisk::new(128));
        let mut mbr = empty_mbr();
        set_entry(&mut mbr, 0, PART_TYPE_LINUX, 32, 64);
        disk.write_sectors(0, 1, &mbr).unwrap();

        let parent: Arc<dyn BlockDevice> = disk;
        let (part, device) = open_first_partition(&parent)
            .expect("io")
            .expect("partition");
        assert_eq!(part.first_lba, 32);
        assert_eq!(device.base_lba(), 32);
        assert_eq!(device.sector_count(), 64);
    }

    #[test]
    fn no_mbr_yields_none() {
        let disk: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(8));
        assert!(open_first_partition(&disk).expect("io").is_none());
    }
}
