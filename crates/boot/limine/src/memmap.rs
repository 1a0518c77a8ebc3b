//! Memory map entry definitions and iterator.
//!
//! The memory map describes all physical memory regions and their types.
//! It drives the kernel's physical frame allocator: only
//! [`MemMapEntryType::Usable`] regions may be handed out as frames.

use core::ptr::NonNull;

/// The type of a memory map entry.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemMapEntryType {
    /// Usable RAM.
    Usable = 0,
    /// Reserved memory.
    Reserved = 1,
    /// ACPI Reclaimable memory.
    AcpiReclaimable = 2,
    /// ACPI NVS memory.
    AcpiNvs = 3,
    /// Bad memory.
    BadMemory = 4,
    /// Bootloader Reclaimable memory.
    BootloaderReclaimable = 5,
    /// Kernel and modules memory.
    KernelAndModules = 6,
    /// Framebuffer memory.
    Framebuffer = 7,
    /// ACPI Tables memory.
    AcpiTables = 8,
}

/// A single entry in the memory map.
#[repr(C)]
pub struct MemMapEntry {
    /// The starting physical address of the memory region.
    pub base: u64,
    /// The length of the memory region in bytes.
    pub length: u64,
    /// The type of the memory region.
    pub type_: MemMapEntryType,
}

/// An iterator over memory map entries.
pub struct MemMapIter<'a> {
    entries: &'a [NonNull<MemMapEntry>],
    index: usize,
}

impl MemMapIter<'_> {
    /// Creates a new memory map iterator.
    pub(crate) fn new(
        entry_count: usize,
        entries: NonNull<NonNull<MemMapEntry>>,
    ) -> MemMapIter<'static> {
        // SAFETY: The bootloader provides a valid pointer to an array of
        // `entry_count` NonNull<MemMapEntry> pointers.
        let entries_slice = unsafe { core::slice::from_raw_parts(entries.as_ptr(), entry_count) };
        MemMapIter {
            entries: entries_slice,
            index: 0,
        }
    }
}

impl Iterator for MemMapIter<'_> {
    type Item = &'static MemMapEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.entries.len() {
            return None;
        }
        let entry_ptr = self.entries[self.index];
        self.index += 1;
        // SAFETY: Each pointer in the slice was provided by the bootloader and
        // points to a MemMapEntry that lives for the kernel's lifetime.
        Some(unsafe { entry_ptr.as_ref() })
    }
}
