//! PCI configuration-space access and enumeration.
//!
//! Uses the legacy `0xCF8`/`0xCFC` configuration mechanism. Only the fields
//! the storage drivers need are decoded.

extern crate alloc;

use alloc::vec::Vec;

use sable_core::port::Port;

/// Configuration address port.
const CONFIG_ADDRESS: u16 = 0xCF8;
/// Configuration data port.
const CONFIG_DATA: u16 = 0xCFC;

/// PCI command register: I/O space enable.
pub const COMMAND_IO_SPACE: u16 = 1 << 0;
/// PCI command register: memory space enable.
pub const COMMAND_MEMORY_SPACE: u16 = 1 << 1;
/// PCI command register: bus master enable.
pub const COMMAND_BUS_MASTER: u16 = 1 << 2;

/// Location of a PCI function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciAddress {
    /// Bus number.
    pub bus: u8,
    /// Device number (0..32).
    pub device: u8,
    /// Function number (0..8).
    pub function: u8,
}

impl core::fmt::Display for PciAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:02x}:{:02x}.{}", self.bus, self.device, self.function)
    }
}

/// A discovered PCI function.
#[derive(Debug, Clone, Copy)]
pub struct PciDeviceInfo {
    /// Bus/device/function location.
    pub address: PciAddress,
    /// Vendor ID.
    pub vendor_id: u16,
    /// Device ID.
    pub device_id: u16,
    /// Class code.
    pub class: u8,
    /// Subclass code.
    pub subclass: u8,
    /// Programming interface.
    pub prog_if: u8,
    /// Legacy interrupt line.
    pub interrupt_line: u8,
}

fn config_address(addr: PciAddress, offset: u8) -> u32 {
    0x8000_0000
        | (u32::from(addr.bus) << 16)
        | (u32::from(addr.device) << 11)
        | (u32::from(addr.function) << 8)
        | u32::from(offset & 0xFC)
}

/// Reads a 32-bit dword from configuration space.
#[must_use]
pub fn config_read32(addr: PciAddress, offset: u8) -> u32 {
    // SAFETY: The config mechanism ports are architecturally defined; reads
    // have no side effects beyond selecting the config window.
    unsafe {
        Port::<u32>::new(CONFIG_ADDRESS).write(config_address(addr, offset));
        Port::<u32>::new(CONFIG_DATA).read()
    }
}

/// Writes a 32-bit dword into configuration space.
pub fn config_write32(addr: PciAddress, offset: u8, value: u32) {
    // SAFETY: The caller names a valid function and register offset.
    unsafe {
        Port::<u32>::new(CONFIG_ADDRESS).write(config_address(addr, offset));
        Port::<u32>::new(CONFIG_DATA).write(value);
    }
}

fn read_info(addr: PciAddress) -> Option<PciDeviceInfo> {
    let id = config_read32(addr, 0x00);
    let vendor_id = id as u16;
    if vendor_id == 0xFFFF {
        return None;
    }

    let class_reg = config_read32(addr, 0x08);
    let irq_reg = config_read32(addr, 0x3C);

    Some(PciDeviceInfo {
        address: addr,
        vendor_id,
        device_id: (id >> 16) as u16,
        class: (class_reg >> 24) as u8,
        subclass: (class_reg >> 16) as u8,
        prog_if: (class_reg >> 8) as u8,
        interrupt_line: irq_reg as u8,
    })
}

/// Brute-force scans buses 0..256 and returns every present function.
#[must_use]
pub fn enumerate() -> Vec<PciDeviceInfo> {
    let mut devices = Vec::new();
    for bus in 0..=255u8 {
        for device in 0..32u8 {
            let addr = PciAddress {
                bus,
                device,
                function: 0,
            };
            let Some(info) = read_info(addr) else {
                continue;
            };
            devices.push(info);

            // Multi-function devices advertise it in the header type.
            let header = (config_read32(addr, 0x0C) >> 16) as u8;
            if header & 0x80 != 0 {
                for function in 1..8u8 {
                    let addr = PciAddress {
                        bus,
                        device,
                        function,
                    };
                    if let Some(info) = read_info(addr) {
                        devices.push(info);
                    }
                }
            }
        }
    }
    devices
}

/// Reads BAR `index` (0..6) raw.
#[must_use]
pub fn read_bar(addr: PciAddress, index: u8) -> u32 {
    config_read32(addr, 0x10 + index * 4)
}

/// Returns the physical base of a memory BAR (masking the type bits),
/// combining the upper half for 64-bit BARs.
#[must_use]
pub fn memory_bar_base(addr: PciAddress, index: u8) -> u64 {
    let low = read_bar(addr, index);
    if low & 0x1 != 0 {
        return 0; // I/O BAR
    }
    let mut base = u64::from(low & 0xFFFF_FFF0);
    if (low >> 1) & 0x3 == 0x2 {
        base |= u64::from(read_bar(addr, index + 1)) << 32;
    }
    base
}

/// Sets the command-register bits for MMIO decoding and bus mastering.
pub fn enable_device(addr: PciAddress) {
    let mut cmd_status = config_read32(addr, 0x04);
    cmd_status |= u32::from(COMMAND_MEMORY_SPACE | COMMAND_BUS_MASTER);
    config_write32(addr, 0x04, cmd_status);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_address_encoding() {
        let addr = PciAddress {
            bus: 0x12,
            device: 0x1F,
            function: 0x7,
        };
        let encoded = config_address(addr, 0x3E);
        assert_eq!(encoded & 0x8000_0000, 0x8000_0000);
        assert_eq!((encoded >> 16) & 0xFF, 0x12);
        assert_eq!((encoded >> 11) & 0x1F, 0x1F);
        assert_eq!((encoded >> 8) & 0x7, 0x7);
        // Offsets are dword-aligned.
        assert_eq!(encoded & 0xFF, 0x3C);
    }

    #[test]
    fn display_format() {
        let addr = PciAddress {
            bus: 0,
            device: 0x1F,
            function: 2,
        };
        assert_eq!(format!("{addr}"), "00:1f.2");
    }
}
