//! Framebuffer syscalls: geometry query, per-process mapping, flip.

use sable_core::addr::{PhysAddr, VirtAddr};
use sable_core::structures::PageTableFlags;

use super::SyscallOutcome::{self, Value};
use super::fail;
use super::userptr::copy_to_user;
use crate::config::{FB_MAP_BASE, PAGE_SIZE};
use crate::errno::Errno;
use crate::fb;
use crate::proc::{self, FbReservation};

/// The geometry struct copied out by `fb_info`.
#[repr(C, packed)]
struct FbInfoOut {
    address: u64,
    width: u64,
    height: u64,
    pitch: u64,
    bpp: u16,
}

/// `fb_info(ptr)`: copy framebuffer geometry into the caller's struct.
pub fn sys_fb_info(ptr: u64) -> SyscallOutcome {
    let Some(record) = fb::primary() else {
        return Value(u64::MAX);
    };

    let out = FbInfoOut {
        address: record.phys_base,
        width: record.width,
        height: record.height,
        pitch: record.pitch,
        bpp: record.bpp,
    };
    // SAFETY: FbInfoOut is repr(C, packed) plain data.
    let bytes = unsafe {
        core::slice::from_raw_parts(
            core::ptr::from_ref(&out).cast::<u8>(),
            core::mem::size_of::<FbInfoOut>(),
        )
    };

    let copied = proc::with_current(|p| copy_to_user(p, ptr, bytes));
    match copied {
        Some(()) => Value(0),
        None => fail(Errno::Fault),
    }
}

/// `fb_map()`: map the framebuffer into the caller once, record the
/// reserved physical range so teardown never frees the pixels, and return
/// the user virtual base. Repeated calls return the existing mapping.
pub fn sys_fb_map(_addr_hint: u64) -> SyscallOutcome {
    let Some(record) = fb::primary() else {
        return Value(u64::MAX);
    };

    proc::with_current(|p| {
        if p.address_space.is_none() {
            return fail_errno(p, Errno::Inval);
        }
        if let Some(existing) = p.fb_reservation {
            return Value(existing.virt_base);
        }

        let fb_size = record.pitch * record.height;
        let pages = fb_size.div_ceil(PAGE_SIZE as u64);
        let virt_base = FB_MAP_BASE;

        let flags =
            PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER;

        let mapped_all = {
            let aspace = p.address_space.as_ref().expect("checked above");
            let mut failed_at = None;
            for i in 0..pages {
                let va = VirtAddr::new_truncate(virt_base + i * PAGE_SIZE as u64);
                let pa = PhysAddr::new_truncate(record.phys_base + i * PAGE_SIZE as u64);
                if aspace
                    .map_page(va, pa, flags, &mut crate::mm::pmm::GlobalFrameAlloc)
                    .is_err()
                {
                    failed_at = Some(i);
                    break;
                }
            }
            if let Some(failed) = failed_at {
                // Unwind the partial mapping; the pixels are not ours to free.
                for j in 0..failed {
                    let va = VirtAddr::new_truncate(virt_base + j * PAGE_SIZE as u64);
                    let _ = aspace.unmap_page(va);
                }
                false
            } else {
                true
            }
        };
        if !mapped_all {
            return fail_errno(p, Errno::Nomem);
        }

        p.fb_reservation = Some(FbReservation {
            phys_base: record.phys_base,
            size: pages * PAGE_SIZE as u64,
            virt_base,
        });
        Value(virt_base)
    })
}

fn fail_errno(p: &mut crate::proc::Process, errno: Errno) -> SyscallOutcome {
    p.last_errno = errno.as_i32();
    Value(u64::MAX)
}
