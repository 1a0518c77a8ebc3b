//! Response structures for the Limine boot protocol.
//!
//! The bootloader fills these in before handing control to the kernel.
//! Responses are reached through `.response()` on the request statics and
//! are read-only from then on.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::file::{File, FileIter};
use crate::framebuffer::{FramebufferIter, RawFramebuffer};
use crate::memmap::{MemMapEntry, MemMapIter};

/// A wrapper around a response pointer that may be null.
///
/// Used internally to safely handle optional responses from the bootloader.
#[repr(transparent)]
pub(crate) struct Response<T> {
    inner: UnsafeCell<Option<NonNull<T>>>,
}

// SAFETY: Responses are written by the bootloader before the kernel starts
// and are only read (never written) afterward.
unsafe impl<T> Sync for Response<T> {}

impl<T> Response<T> {
    /// Creates an empty response.
    pub(crate) const fn empty() -> Self {
        Self {
            inner: UnsafeCell::new(None),
        }
    }

    /// Gets a reference to the response data, if present.
    pub(crate) fn get(&self) -> Option<&T> {
        // SAFETY: The bootloader writes to this cell before control is passed
        // to the kernel; afterwards it is only read.
        let inner = unsafe { &*self.inner.get() };
        // SAFETY: The pointer, if present, was set by the bootloader and
        // points to a response structure that lives for the kernel's lifetime.
        inner.as_ref().map(|ptr| unsafe { ptr.as_ref() })
    }
}

/// Response for the HHDM request.
#[repr(C)]
pub struct HhdmResponse {
    /// The revision of this response structure.
    pub revision: u64,
    /// The virtual offset of the Higher Half Direct Map:
    /// `virtual = physical + hhdm_base`.
    pub hhdm_base: u64,
}

/// Response for the memory map request.
#[repr(C)]
pub struct MemMapResponse {
    /// The revision of this response structure.
    pub revision: u64,
    /// Number of entries in the memory map.
    pub entry_count: u64,
    entries: NonNull<NonNull<MemMapEntry>>,
}

// SAFETY: Bootloader-provided pointers, read-only after boot.
unsafe impl Sync for MemMapResponse {}

impl MemMapResponse {
    /// Returns an iterator over the memory map entries.
    #[must_use]
    pub fn entries(&self) -> MemMapIter<'static> {
        MemMapIter::new(self.entry_count as usize, self.entries)
    }
}

/// Response for the framebuffer request.
#[repr(C)]
pub struct FramebufferResponse {
    /// The revision of this response structure.
    pub revision: u64,
    /// Number of framebuffers available.
    pub framebuffer_count: u64,
    framebuffers: NonNull<NonNull<RawFramebuffer>>,
}

// SAFETY: Bootloader-provided pointers, read-only after boot.
unsafe impl Sync for FramebufferResponse {}

impl FramebufferResponse {
    /// Returns an iterator over the available framebuffers.
    #[must_use]
    pub fn framebuffers(&self) -> FramebufferIter<'static> {
        FramebufferIter::new(self.framebuffer_count as usize, self.framebuffers)
    }
}

/// Response for the module request.
#[repr(C)]
pub struct ModuleResponse {
    /// The revision of this response structure.
    pub revision: u64,
    /// Number of modules loaded.
    pub module_count: u64,
    modules: NonNull<NonNull<File>>,
}

// SAFETY: Bootloader-provided pointers, read-only after boot.
unsafe impl Sync for ModuleResponse {}

impl ModuleResponse {
    /// Returns an iterator over the loaded boot modules.
    #[must_use]
    pub fn modules(&self) -> FileIter<'static> {
        FileIter::new(self.module_count as usize, self.modules)
    }
}

/// Response for the RSDP request.
///
/// With base revision 3 the address is physical; earlier revisions hand out
/// an HHDM virtual address instead.
#[repr(C)]
pub struct RsdpResponse {
    /// The revision of this response structure.
    pub revision: u64,
    /// Address of the ACPI RSDP structure.
    pub address: u64,
}
