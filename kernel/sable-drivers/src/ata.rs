//! Legacy ATA PIO driver (LBA28).
//!
//! Fallback for machines without an AHCI controller. Drives the classic
//! command-block registers of the primary and secondary channels with
//! polled PIO transfers; no DMA, no IRQs.

extern crate alloc;

use alloc::vec::Vec;

use sable_core::kinfo;
use sable_core::port::Port;
use sable_driver_api::{BlockDevice, IoError, SECTOR_SIZE};

/// Status register: busy.
const SR_BSY: u8 = 0x80;
/// Status register: drive ready.
const SR_DRDY: u8 = 0x40;
/// Status register: data request.
const SR_DRQ: u8 = 0x08;
/// Status register: error.
const SR_ERR: u8 = 0x01;

/// READ SECTORS (LBA28, PIO).
const CMD_READ_SECTORS: u8 = 0x20;
/// WRITE SECTORS (LBA28, PIO).
const CMD_WRITE_SECTORS: u8 = 0x30;
/// IDENTIFY DEVICE.
const CMD_IDENTIFY: u8 = 0xEC;

/// Bounded iterations while polling status bits.
const POLL_LIMIT: u32 = 100_000;

/// Highest LBA addressable with 28 bits.
const LBA28_MAX: u64 = 0x0FFF_FFFF;

/// An ATA channel: command-block base plus control base.
#[derive(Debug, Clone, Copy)]
struct Channel {
    io: u16,
    ctrl: u16,
    slave: bool,
}

/// The two standard legacy channels (master drives only).
const CHANNELS: [Channel; 2] = [
    Channel {
        io: 0x1F0,
        ctrl: 0x3F6,
        slave: false,
    },
    Channel {
        io: 0x170,
        ctrl: 0x376,
        slave: false,
    },
];

impl Channel {
    fn read_reg(&self, offset: u16) -> u8 {
        // SAFETY: The command-block registers are side-effect-understood.
        unsafe { Port::<u8>::new(self.io + offset).read() }
    }

    fn write_reg(&self, offset: u16, value: u8) {
        // SAFETY: See read_reg.
        unsafe { Port::<u8>::new(self.io + offset).write(value) }
    }

    fn read_data(&self) -> u16 {
        // SAFETY: Data-register reads pop the drive's sector buffer.
        unsafe { Port::<u16>::new(self.io).read() }
    }

    fn write_data(&self, value: u16) {
        // SAFETY: Data-register writes push into the drive's sector buffer.
        unsafe { Port::<u16>::new(self.io).write(value) }
    }

    /// ~400 ns settle delay: four alternate-status reads.
    fn settle(&self) {
        // SAFETY: Alternate-status reads have no side effects.
        unsafe {
            let alt = Port::<u8>::new(self.ctrl);
            for _ in 0..4 {
                let _ = alt.read();
            }
        }
    }

    fn wait_not_busy(&self) -> Result<(), IoError> {
        for _ in 0..POLL_LIMIT {
            if self.read_reg(7) & SR_BSY == 0 {
                return Ok(());
            }
        }
        Err(IoError::Timeout)
    }

    fn wait_drq(&self) -> Result<(), IoError> {
        for _ in 0..POLL_LIMIT {
            let status = self.read_reg(7);
            if status & SR_ERR != 0 {
                return Err(IoError::DeviceError);
            }
            if status & SR_DRQ != 0 {
                return Ok(());
            }
        }
        Err(IoError::Timeout)
    }

    /// Selects the drive and programs an LBA28 address + sector count.
    fn setup_lba28(&self, lba: u64, count: u8) {
        let select = 0xE0
            | (u8::from(self.slave) << 4)
            | (((lba >> 24) & 0x0F) as u8);
        self.write_reg(6, select);
        self.settle();
        self.write_reg(2, count);
        self.write_reg(3, lba as u8);
        self.write_reg(4, (lba >> 8) as u8);
        self.write_reg(5, (lba >> 16) as u8);
    }
}

/// A disk on a legacy ATA channel.
pub struct AtaDisk {
    channel: Channel,
    total_sectors: u64,
}

impl AtaDisk {
    /// Runs IDENTIFY DEVICE on `channel`; `None` when nothing answers.
    fn identify(channel: Channel) -> Option<Self> {
        channel.write_reg(6, 0xA0 | (u8::from(channel.slave) << 4));
        channel.settle();

        channel.write_reg(2, 0);
        channel.write_reg(3, 0);
        channel.write_reg(4, 0);
        channel.write_reg(5, 0);
        channel.write_reg(7, CMD_IDENTIFY);

        if channel.read_reg(7) == 0 {
            return None; // floating bus
        }
        channel.wait_not_busy().ok()?;
        channel.wait_drq().ok()?;

        let mut identity = [0u16; 256];
        for word in &mut identity {
            *word = channel.read_data();
        }

        // Words 60..61: total addressable LBA28 sectors.
        let total_sectors =
            u64::from(identity[60]) | (u64::from(identity[61]) << 16);
        if total_sectors == 0 {
            return None;
        }

        Some(Self {
            channel,
            total_sectors,
        })
    }

    fn rw_common(&self, lba: u64, count: u32) -> Result<(), IoError> {
        if count == 0 || count > 255 {
            return Err(IoError::InvalidBuffer);
        }
        if lba + u64::from(count) > self.total_sectors || lba > LBA28_MAX {
            return Err(IoError::OutOfRange);
        }
        self.channel.wait_not_busy()?;
        self.channel.setup_lba28(lba, count as u8);
        Ok(())
    }
}

impl BlockDevice for AtaDisk {
    fn read_sectors(&self, lba: u64, count: u32, buf: &mut [u8]) -> Result<(), IoError> {
        if buf.len() < count as usize * SECTOR_SIZE {
            return Err(IoError::InvalidBuffer);
        }
        self.rw_common(lba, count)?;
        self.channel.write_reg(7, CMD_READ_SECTORS);

        for sector in 0..count as usize {
            self.channel.wait_drq()?;
            let base = sector * SECTOR_SIZE;
            for word in 0..SECTOR_SIZE / 2 {
                let value = self.channel.read_data();
                buf[base + word * 2] = value as u8;
                buf[base + word * 2 + 1] = (value >> 8) as u8;
            }
        }
        Ok(())
    }

    fn write_sectors(&self, lba: u64, count: u32, buf: &[u8]) -> Result<(), IoError> {
        if buf.len() < count as usize * SECTOR_SIZE {
            return Err(IoError::InvalidBuffer);
        }
        self.rw_common(lba, count)?;
        self.channel.write_reg(7, CMD_WRITE_SECTORS);

        for sector in 0..count as usize {
            self.channel.wait_drq()?;
            let base = sector * SECTOR_SIZE;
            for word in 0..SECTOR_SIZE / 2 {
                let value = u16::from(buf[base + word * 2])
                    | (u16::from(buf[base + word * 2 + 1]) << 8);
                self.channel.write_data(value);
            }
        }
        self.channel.wait_not_busy()
    }

    fn sector_count(&self) -> u64 {
        self.total_sectors
    }
}

/// Probes the legacy channels and returns every responding master drive.
#[must_use]
pub fn probe() -> Vec<AtaDisk> {
    let mut disks = Vec::new();
    for channel in CHANNELS {
        if let Some(disk) = AtaDisk::identify(channel) {
            kinfo!(
                "ata: drive at {:#x}, {} sectors",
                channel.io,
                disk.total_sectors
            );
            disks.push(disk);
        }
    }
    disks
}
