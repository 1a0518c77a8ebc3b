//! User-space pointer validation and copy helpers.
//!
//! Pointers handed in by user code are only addresses: every one is bounded
//! to the canonical lower half before use, and all accesses go through the
//! process's own page table via the HHDM, so an unmapped page turns into
//! `EFAULT` instead of a ring-0 page fault.

/// Exclusive upper bound of user-space addresses (start of the
/// non-canonical hole; the kernel half lies far above).
pub const USER_ADDR_MAX: u64 = 0x0000_8000_0000_0000;

/// Longest string a syscall will walk looking for the terminating NUL.
pub const MAX_USER_STRING: usize = 4096;

/// Validates that `[ptr, ptr + len)` lies entirely in user space.
///
/// Rejects wraparound (`ptr + len < ptr`) and any byte at or above
/// [`USER_ADDR_MAX`]. A zero-length range only needs a user-space base.
#[must_use]
pub fn user_range_ok(ptr: u64, len: u64) -> bool {
    if ptr >= USER_ADDR_MAX {
        return false;
    }
    match ptr.checked_add(len) {
        Some(end) => end <= USER_ADDR_MAX,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_low_ranges() {
        assert!(user_range_ok(0, 0));
        assert!(user_range_ok(0x1000, 4096));
        assert!(user_range_ok(USER_ADDR_MAX - 1, 1));
    }

    #[test]
    fn rejects_kernel_half() {
        assert!(!user_range_ok(USER_ADDR_MAX, 0));
        assert!(!user_range_ok(USER_ADDR_MAX, 1));
        assert!(!user_range_ok(0xFFFF_8000_0000_0000, 8));
    }

    #[test]
    fn rejects_crossing_the_boundary() {
        assert!(!user_range_ok(USER_ADDR_MAX - 8, 16));
    }

    #[test]
    fn rejects_wraparound() {
        assert!(!user_range_ok(u64::MAX, 1));
        assert!(!user_range_ok(0x1000, u64::MAX));
        // For every va and length with va + len < va, validation fails.
        assert!(!user_range_ok(0x7FFF_FFFF_0000, u64::MAX - 0x1000));
    }
}

// ── Kernel-side copy helpers (need the live address space) ───────────────

#[cfg(target_os = "none")]
mod copy {
    extern crate alloc;

    use alloc::string::String;
    use alloc::vec::Vec;

    use sable_core::addr::{PhysAddr, VirtAddr};

    use super::{MAX_USER_STRING, user_range_ok};
    use crate::mm::hhdm;
    use crate::proc::Process;

    /// Translates one user byte address through the process's page table
    /// into an HHDM pointer.
    fn user_byte_ptr(proc: &Process, va: u64) -> Option<*mut u8> {
        let aspace = proc.address_space.as_ref()?;
        let page = VirtAddr::new_truncate(va).align_down(4096);
        let phys = aspace.translate(page)?;
        let byte_phys = PhysAddr::new_truncate(phys.as_u64() + (va & 0xFFF));
        Some(hhdm::phys_to_virt(byte_phys).as_mut_ptr())
    }

    /// Reads a NUL-terminated user string, walking at most
    /// [`MAX_USER_STRING`] bytes. `None` on bad pointers, unmapped pages,
    /// or a missing NUL.
    pub fn read_user_string(proc: &Process, ptr: u64) -> Option<String> {
        if ptr == 0 || !user_range_ok(ptr, 1) {
            return None;
        }

        let mut bytes = Vec::new();
        for i in 0..MAX_USER_STRING as u64 {
            if !user_range_ok(ptr + i, 1) {
                return None;
            }
            let src = user_byte_ptr(proc, ptr + i)?;
            // SAFETY: The page is mapped in the process and reachable
            // through the HHDM.
            let byte = unsafe { src.read_volatile() };
            if byte == 0 {
                return Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.push(byte);
        }
        None
    }

    /// Copies `len` bytes out of user space.
    pub fn copy_from_user(proc: &Process, ptr: u64, len: usize) -> Option<Vec<u8>> {
        if !user_range_ok(ptr, len as u64) {
            return None;
        }

        let mut out = Vec::with_capacity(len);
        let mut copied = 0usize;
        while copied < len {
            let va = ptr + copied as u64;
            let src = user_byte_ptr(proc, va)?;
            let in_page = (4096 - (va & 0xFFF) as usize).min(len - copied);
            // SAFETY: The whole run stays within one mapped user page.
            unsafe {
                out.extend_from_slice(core::slice::from_raw_parts(src, in_page));
            }
            copied += in_page;
        }
        Some(out)
    }

    /// Copies `bytes` into user space.
    pub fn copy_to_user(proc: &Process, ptr: u64, bytes: &[u8]) -> Option<()> {
        if !user_range_ok(ptr, bytes.len() as u64) {
            return None;
        }

        let mut copied = 0usize;
        while copied < bytes.len() {
            let va = ptr + copied as u64;
            let dst = user_byte_ptr(proc, va)?;
            let in_page = (4096 - (va & 0xFFF) as usize).min(bytes.len() - copied);
            // SAFETY: The whole run stays within one mapped user page.
            unsafe {
                core::ptr::copy_nonoverlapping(bytes[copied..].as_ptr(), dst, in_page);
            }
            copied += in_page;
        }
        Some(())
    }
}

#[cfg(target_os = "none")]
pub use copy::{copy_from_user, copy_to_user, read_user_string};
