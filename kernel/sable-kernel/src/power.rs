//! ACPI reset and S5 power-off.
//!
//! Just enough ACPI to satisfy the reboot/shutdown syscalls: walk RSDP to
//! the RSDT/XSDT, pick the FADT for the reset register and the PM1 control
//! blocks, and scan the DSDT bytecode for the `_S5_` package's sleep type
//! values. Everything is parsed once at boot through the HHDM.

use sable_core::addr::PhysAddr;
use sable_core::port::Port;
use sable_core::sync::SpinLock;
use sable_core::{kinfo, kwarn};

use crate::arch::x86_64::instructions;
use crate::mm::hhdm;
use crate::syscall::SyscallOutcome;

/// SLP_EN bit in PM1 control registers.
const PM1_SLP_EN: u16 = 1 << 13;

/// What the FADT/DSDT walk yielded.
#[derive(Default, Clone, Copy)]
struct AcpiFacts {
    /// I/O-space reset register port and value, when advertised.
    reset_port: Option<(u16, u8)>,
    /// PM1a/PM1b control block ports.
    pm1a_cnt: u16,
    pm1b_cnt: u16,
    /// `_S5_` sleep type values for PM1a/PM1b.
    s5: Option<(u16, u16)>,
}

static FACTS: SpinLock<AcpiFacts> = SpinLock::new(AcpiFacts {
    reset_port: None,
    pm1a_cnt: 0,
    pm1b_cnt: 0,
    s5: None,
});

fn read_u32(phys: u64, offset: usize) -> u32 {
    let virt = hhdm::phys_to_virt(PhysAddr::new_truncate(phys + offset as u64));
    // SAFETY: ACPI tables live in loader-mapped physical memory.
    unsafe { virt.as_ptr::<u32>().read_unaligned() }
}

fn read_u64(phys: u64, offset: usize) -> u64 {
    let virt = hhdm::phys_to_virt(PhysAddr::new_truncate(phys + offset as u64));
    // SAFETY: ACPI tables live in loader-mapped physical memory.
    unsafe { virt.as_ptr::<u64>().read_unaligned() }
}

fn read_u8(phys: u64, offset: usize) -> u8 {
    let virt = hhdm::phys_to_virt(PhysAddr::new_truncate(phys + offset as u64));
    // SAFETY: ACPI tables live in loader-mapped physical memory.
    unsafe { virt.as_ptr::<u8>().read() }
}

fn signature(phys: u64) -> [u8; 4] {
    [
        read_u8(phys, 0),
        read_u8(phys, 1),
        read_u8(phys, 2),
        read_u8(phys, 3),
    ]
}

/// Scans the DSDT's AML byte stream for the `_S5_` package and pulls the
/// first two sleep-type values (PM1a, PM1b).
fn parse_s5(dsdt_phys: u64) -> Option<(u16, u16)> {
    if &signature(dsdt_phys) != b"DSDT" {
        return None;
    }
    let length = read_u32(dsdt_phys, 4) as usize;

    let mut i = 36usize; // past the SDT header
    while i + 4 < length {
        if read_u8(dsdt_phys, i) == b'_'
            && read_u8(dsdt_phys, i + 1) == b'S'
            && read_u8(dsdt_phys, i + 2) == b'5'
            && read_u8(dsdt_phys, i + 3) == b'_'
        {
            // Expect: NameOp "_S5_" PackageOp pkg-length num-elements then
            // the SLP_TYP bytes, each optionally behind a 0x0A byte prefix.
            let mut cursor = i + 4;
            if read_u8(dsdt_phys, cursor) != 0x12 {
                i += 1;
                continue;
            }
            cursor += 1; // PackageOp
            cursor += 1; // PkgLength (single-byte for the tiny _S5_ package)
            cursor += 1; // NumElements

            let value = |cursor: &mut usize| -> u16 {
                if read_u8(dsdt_phys, *cursor) == 0x0A {
                    *cursor += 1; // BytePrefix
                }
                let v = u16::from(read_u8(dsdt_phys, *cursor));
                *cursor += 1;
                v
            };
            let typ_a = value(&mut cursor);
            let typ_b = value(&mut cursor);
            return Some((typ_a, typ_b));
        }
        i += 1;
    }
    None
}

/// Walks RSDP → RSDT/XSDT → FADT → DSDT and caches the power facts.
///
/// Missing tables only disable the corresponding syscall; boot continues.
pub fn init(rsdp_addr: Option<u64>) {
    let Some(rsdp_phys) = rsdp_addr else {
        kwarn!("acpi: no RSDP from loader; reboot/shutdown unavailable");
        return;
    };

    // RSDP: revision at 15, RsdtAddress at 16, XsdtAddress at 24.
    let revision = read_u8(rsdp_phys, 15);
    let (use_xsdt, sdt_phys) = if revision >= 2 {
        (true, read_u64(rsdp_phys, 24))
    } else {
        (false, u64::from(read_u32(rsdp_phys, 16)))
    };

    if &signature(sdt_phys) != if use_xsdt { b"XSDT" } else { b"RSDT" } {
        kwarn!("acpi: bad RSDT/XSDT signature");
        return;
    }

    let length = read_u32(sdt_phys, 4) as usize;
    let entry_size = if use_xsdt { 8 } else { 4 };
    let entries = (length - 36) / entry_size;

    for index in 0..entries {
        let entry_phys = if use_xsdt {
            read_u64(sdt_phys, 36 + index * 8)
        } else {
            u64::from(read_u32(sdt_phys, 36 + index * 4))
        };
        if &signature(entry_phys) != b"FACP" {
            continue;
        }

        let mut facts = AcpiFacts::default();

        // FADT reset register: GAS at offset 116 (space id, width, ...,
        // address at +4), reset value at 128. Only SystemIO is driven.
        let reset_space = read_u8(entry_phys, 116);
        let reset_addr = read_u64(entry_phys, 116 + 4);
        if reset_space == 1 && reset_addr != 0 {
            facts.reset_port = Some((reset_addr as u16, read_u8(entry_phys, 128)));
        }

        // PM1 control blocks (legacy 32-bit fields at 64/68).
        facts.pm1a_cnt = read_u32(entry_phys, 64) as u16;
        facts.pm1b_cnt = read_u32(entry_phys, 68) as u16;

        // DSDT (legacy pointer at 40).
        let dsdt_phys = u64::from(read_u32(entry_phys, 40));
        if dsdt_phys != 0 {
            facts.s5 = parse_s5(dsdt_phys);
        }

        kinfo!(
            "acpi: reset={} s5={}",
            facts.reset_port.is_some(),
            facts.s5.is_some()
        );
        *FACTS.lock() = facts;
        return;
    }

    kwarn!("acpi: no FADT found");
}

/// Reboots the machine: ACPI reset register, then the keyboard controller
/// pulse as a fallback. Does not return.
pub fn reboot() -> SyscallOutcome {
    let facts = *FACTS.lock();

    if let Some((port, value)) = facts.reset_port {
        // SAFETY: The FADT names this port as the reset register.
        unsafe { Port::<u8>::new(port).write(value) };
    }

    // Fallback: pulse the CPU reset line via the i8042.
    // SAFETY: Command 0xFE is the architectural reset pulse.
    unsafe { Port::<u8>::new(0x64).write(0xFE) };

    instructions::halt_loop();
}

/// Powers the machine off via ACPI S5. Does not return.
pub fn shutdown() -> SyscallOutcome {
    let facts = *FACTS.lock();

    if let (Some((typ_a, typ_b)), true) = (facts.s5, facts.pm1a_cnt != 0) {
        // SAFETY: PM1 control writes with SLP_TYP|SLP_EN request S5.
        unsafe {
            Port::<u16>::new(facts.pm1a_cnt).write((typ_a << 10) | PM1_SLP_EN);
            if facts.pm1b_cnt != 0 {
                Port::<u16>::new(facts.pm1b_cnt).write((typ_b << 10) | PM1_SLP_EN);
            }
        }
    }

    // Sleep request ignored (or unsupported): halt in place.
    instructions::halt_loop();
}
