//! Boot module file representation.
//!
//! Modules are files loaded by the bootloader alongside the kernel, named by
//! their config-file command line.

use core::ffi::{CStr, c_char, c_void};
use core::ptr::NonNull;

/// A file loaded by the bootloader.
#[repr(C)]
pub struct File {
    /// The revision of this file structure.
    pub revision: u64,
    /// Virtual (HHDM) address of the file contents.
    pub address: NonNull<c_void>,
    /// Size of the file in bytes.
    pub size: u64,
    path: *const c_char,
    cmdline: *const c_char,
    /// Media type the file was loaded from.
    pub media_type: u32,
    _unused: u32,
    /// TFTP server IP (network boots only).
    pub tftp_ip: u32,
    /// TFTP server port (network boots only).
    pub tftp_port: u32,
    /// 1-based partition index, or 0 if irrelevant.
    pub partition_index: u32,
    /// MBR disk ID of the volume the file was loaded from.
    pub mbr_disk_id: u32,
    /// GPT disk UUID of the volume the file was loaded from.
    pub gpt_disk_uuid: [u8; 16],
    /// GPT partition UUID of the volume the file was loaded from.
    pub gpt_part_uuid: [u8; 16],
    /// Filesystem UUID of the volume the file was loaded from.
    pub part_uuid: [u8; 16],
}

impl File {
    /// Returns the file's path on the boot volume, or `""` if absent.
    #[must_use]
    pub fn path(&self) -> &str {
        cstr_or_empty(self.path)
    }

    /// Returns the file's command line (its module name), or `""` if absent.
    #[must_use]
    pub fn name(&self) -> &str {
        cstr_or_empty(self.cmdline)
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        // SAFETY: The bootloader maps `size` bytes at `address` and the
        // mapping lives for the kernel's lifetime.
        unsafe { core::slice::from_raw_parts(self.address.as_ptr().cast::<u8>(), self.size as usize) }
    }
}

fn cstr_or_empty(ptr: *const c_char) -> &'static str {
    if ptr.is_null() {
        return "";
    }
    // SAFETY: The bootloader provides valid NUL-terminated strings.
    let c_str = unsafe { CStr::from_ptr(ptr) };
    c_str.to_str().unwrap_or("")
}

/// An iterator over the boot modules.
pub struct FileIter<'a> {
    files: &'a [NonNull<File>],
    index: usize,
}

impl FileIter<'_> {
    /// Creates a new file iterator.
    pub(crate) fn new(count: usize, files: NonNull<NonNull<File>>) -> FileIter<'static> {
        // SAFETY: The bootloader provides a valid pointer to an array of
        // `count` NonNull<File> pointers.
        let slice = unsafe { core::slice::from_raw_parts(files.as_ptr(), count) };
        FileIter {
            files: slice,
            index: 0,
        }
    }
}

impl Iterator for FileIter<'_> {
    type Item = &'static File;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.files.len() {
            return None;
        }
        let ptr = self.files[self.index];
        self.index += 1;
        // SAFETY: Bootloader-provided pointer, valid for the kernel's lifetime.
        Some(unsafe { ptr.as_ref() })
    }
}
