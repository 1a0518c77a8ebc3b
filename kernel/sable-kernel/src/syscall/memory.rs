//! Memory-management syscalls: mmap, munmap, brk.
//!
//! All mapped pages are backed immediately; there is no demand paging.
//! Frames are zeroed (or file-initialized) through the HHDM before they
//! become visible to the process.

use sable_core::addr::VirtAddr;
use sable_core::structures::PageTableFlags;

use super::SyscallOutcome::{self, Value};
use super::userptr::user_range_ok;
use super::{MAP_ANONYMOUS, MAP_FIXED, MAP_PRIVATE, MAP_SHARED, PROT_WRITE};
use crate::arch::x86_64::frame::InterruptFrame;
use crate::config::{MMAP_SEARCH_BASE, PAGE_SIZE, USER_HEAP_MAX};
use crate::errno::Errno;
use crate::mm::{hhdm, pmm};
use crate::proc::{self, Process};

fn page_align_up(addr: u64) -> u64 {
    (addr + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1)
}

fn page_align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

fn user_leaf_flags(writable: bool) -> PageTableFlags {
    let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER;
    if writable {
        flags |= PageTableFlags::WRITABLE;
    }
    flags
}

/// Returns `true` when no page of `[base, base + pages * 4K)` is mapped.
fn range_is_free(proc: &Process, base: u64, pages: u64) -> bool {
    let Some(aspace) = proc.address_space.as_ref() else {
        return false;
    };
    (0..pages).all(|i| {
        aspace
            .translate(VirtAddr::new_truncate(base + i * PAGE_SIZE as u64))
            .is_none()
    })
}

/// First free range of `pages` pages at or above `start`.
fn find_free_range(proc: &Process, start: u64, pages: u64) -> Option<u64> {
    let length = pages.checked_mul(PAGE_SIZE as u64)?;
    if length == 0 {
        return None;
    }

    let limit = super::userptr::USER_ADDR_MAX;
    let mut cursor = start;
    while cursor.checked_add(length)? <= limit {
        if range_is_free(proc, cursor, pages) {
            return Some(cursor);
        }
        cursor += PAGE_SIZE as u64;
    }
    None
}

/// Maps one zeroed (or file-initialized) frame at `va`. Returns `false`
/// and frees the frame on failure.
fn map_fresh_page(proc: &mut Process, va: u64, flags: PageTableFlags, init: Option<&[u8]>) -> bool {
    let Some(frame) = pmm::alloc_frame() else {
        return false;
    };
    let aspace = proc.address_space.as_ref().expect("user process");
    if aspace
        .map_page(
            VirtAddr::new_truncate(va),
            frame.start_address(),
            flags,
            &mut pmm::GlobalFrameAlloc,
        )
        .is_err()
    {
        pmm::free_frame(frame);
        return false;
    }

    // Populate through the HHDM: zero, then splice in file bytes.
    let dst = hhdm::phys_to_virt(frame.start_address()).as_mut_ptr::<u8>();
    // SAFETY: A fresh frame, exclusively owned, mapped through the HHDM.
    unsafe {
        core::ptr::write_bytes(dst, 0, PAGE_SIZE);
        if let Some(bytes) = init {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len().min(PAGE_SIZE));
        }
    }
    true
}

/// Unmaps `[base, base + pages * 4K)`, freeing frames unless they belong
/// to the framebuffer reservation.
fn unmap_range(proc: &mut Process, base: u64, pages: u64) {
    let reservation = proc.fb_reservation;
    let Some(aspace) = proc.address_space.as_ref() else {
        return;
    };
    for i in 0..pages {
        let va = VirtAddr::new_truncate(base + i * PAGE_SIZE as u64);
        if let Ok(frame) = aspace.unmap_page(va) {
            let reserved =
                reservation.is_some_and(|r| r.contains(frame.start_address().as_u64()));
            if !reserved {
                pmm::free_frame(frame);
            }
        }
    }
}

/// `brk(new_end)`: query (0) or move the user heap end.
///
/// Growth allocates, maps, and zeroes every new page all-or-nothing;
/// shrinking unmaps and frees. The heap may not cross
/// [`USER_HEAP_MAX`](crate::config::USER_HEAP_MAX).
pub fn sys_brk(new_end: u64) -> SyscallOutcome {
    proc::with_current(|p| {
        if p.address_space.is_none() {
            return fail_in(p, Errno::Inval);
        }
        if new_end == 0 {
            return Value(p.heap_end);
        }
        if new_end < p.heap_start || new_end > USER_HEAP_MAX {
            let errno = if new_end < p.heap_start {
                Errno::Inval
            } else {
                Errno::Nomem
            };
            return fail_in(p, errno);
        }

        let old_page_end = page_align_up(p.heap_end);
        let new_page_end = page_align_up(new_end);

        if new_page_end > old_page_end {
            let pages = (new_page_end - old_page_end) / PAGE_SIZE as u64;
            for i in 0..pages {
                let va = old_page_end + i * PAGE_SIZE as u64;
                if !map_fresh_page(p, va, user_leaf_flags(true), None) {
                    // All-or-nothing: roll the partial growth back.
                    unmap_range(p, old_page_end, i);
                    return fail_in(p, Errno::Nomem);
                }
            }
        } else if new_page_end < old_page_end {
            let pages = (old_page_end - new_page_end) / PAGE_SIZE as u64;
            unmap_range(p, new_page_end, pages);
        }

        p.heap_end = new_end;
        Value(0)
    })
}

fn fail_in(p: &mut Process, errno: Errno) -> SyscallOutcome {
    p.last_errno = errno.as_i32();
    Value(u64::MAX)
}

/// `mmap(addr, len, prot, ...)`: flags come from the saved RSI slot, the
/// file descriptor from RDI, and the file offset from R8.
pub fn sys_mmap(addr: u64, len: u64, prot: u64, frame: &InterruptFrame) -> SyscallOutcome {
    let flags = frame.regs.rsi;
    let fd = frame.regs.rdi as i64;
    let offset = frame.regs.r8;

    proc::with_current(|p| {
        if p.address_space.is_none() || len == 0 {
            return fail_in(p, Errno::Inval);
        }

        let shared = flags & MAP_SHARED != 0;
        let private = flags & MAP_PRIVATE != 0;
        let fixed = flags & MAP_FIXED != 0;
        let anonymous = flags & MAP_ANONYMOUS != 0;

        // Exactly one of SHARED and PRIVATE.
        if shared == private {
            return fail_in(p, Errno::Inval);
        }

        let pages = len.div_ceil(PAGE_SIZE as u64);
        let aligned_len = pages * PAGE_SIZE as u64;

        let mut target = page_align_down(addr);
        if fixed && (target == 0 || target != addr) {
            return fail_in(p, Errno::Inval);
        }

        let search_base = page_align_up(p.heap_end).max(MMAP_SEARCH_BASE);
        if fixed {
            if !range_is_free(p, target, pages) {
                return fail_in(p, Errno::Inval);
            }
        } else {
            if target != 0 && !range_is_free(p, target, pages) {
                target = find_free_range(p, target + PAGE_SIZE as u64, pages).unwrap_or(0);
            }
            if target == 0 || !range_is_free(p, target, pages) {
                match find_free_range(p, search_base, pages) {
                    Some(found) => target = found,
                    None => return fail_in(p, Errno::Nomem),
                }
            }
        }

        if !user_range_ok(target, aligned_len) {
            return fail_in(p, Errno::Fault);
        }

        // File-backed maps copy their initial contents at map time. The fd
        // snapshot is taken first so no borrow of the process outlives it.
        enum FdSnapshot {
            Missing,
            BadOffset,
            Data(Option<alloc::vec::Vec<u8>>),
        }
        let snapshot = if anonymous {
            FdSnapshot::Data(None)
        } else {
            match usize::try_from(fd)
                .ok()
                .filter(|&i| i < crate::config::MAX_FDS)
                .and_then(|i| p.fds[i].as_ref())
            {
                None => FdSnapshot::Missing,
                Some(entry) if offset > entry.data.len() as u64 => FdSnapshot::BadOffset,
                Some(entry) => FdSnapshot::Data(
                    (offset < entry.data.len() as u64)
                        .then(|| entry.data[offset as usize..].to_vec()),
                ),
            }
        };
        let file = match snapshot {
            FdSnapshot::Missing => return fail_in(p, Errno::Badf),
            FdSnapshot::BadOffset => return fail_in(p, Errno::Inval),
            FdSnapshot::Data(data) => data,
        };

        let flags = user_leaf_flags(prot & PROT_WRITE != 0);
        for i in 0..pages {
            let va = target + i * PAGE_SIZE as u64;
            let init = file.as_ref().and_then(|bytes| {
                let start = (i * PAGE_SIZE as u64) as usize;
                (start < bytes.len()).then(|| &bytes[start..])
            });
            if !map_fresh_page(p, va, flags, init) {
                unmap_range(p, target, i);
                return fail_in(p, Errno::Nomem);
            }
        }

        Value(target)
    })
}

/// `munmap(addr, len)`: unmap the page-aligned range; backing frames are
/// freed unless they lie in the framebuffer-reserved range.
pub fn sys_munmap(addr: u64, len: u64) -> SyscallOutcome {
    proc::with_current(|p| {
        if p.address_space.is_none() || len == 0 {
            return fail_in(p, Errno::Inval);
        }
        if !user_range_ok(addr, len) {
            return fail_in(p, Errno::Fault);
        }

        let base = page_align_down(addr);
        let pages = len.div_ceil(PAGE_SIZE as u64);
        unmap_range(p, base, pages);
        Value(0)
    })
}
