//! Framebuffer structures and iterator.
//!
//! Describes the linear framebuffers set up by the bootloader. Sable only
//! consumes the revision-0 fields (geometry and pixel masks); video-mode
//! lists and EDID data are ignored.

use core::ffi::c_void;
use core::ptr::NonNull;

/// Memory model of the framebuffer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryModel {
    /// RGB pixel format with separate red, green, and blue channels.
    RGB = 1,
}

/// Raw framebuffer structure (revision 0 fields).
#[repr(C)]
pub struct RawFramebuffer {
    /// Base address of the framebuffer memory region (HHDM-mapped).
    pub address: NonNull<c_void>,
    /// Width in pixels.
    pub width: u64,
    /// Height in pixels.
    pub height: u64,
    /// Number of bytes per scanline.
    pub pitch: u64,
    /// Bits per pixel.
    pub bpp: u16,
    /// Memory model describing the pixel format.
    pub memory_model: MemoryModel,
    /// Red mask size (in bits).
    pub red_mask_size: u8,
    /// Red mask shift (from LSB).
    pub red_mask_shift: u8,
    /// Green mask size (in bits).
    pub green_mask_size: u8,
    /// Green mask shift (from LSB).
    pub green_mask_shift: u8,
    /// Blue mask size (in bits).
    pub blue_mask_size: u8,
    /// Blue mask shift (from LSB).
    pub blue_mask_shift: u8,
    _unused: [u8; 7],
    /// Size of the EDID data in bytes.
    pub edid_size: u64,
    /// Pointer to the EDID data, or null if not available.
    pub edid: *const c_void,
}

/// An iterator over the framebuffers provided by the bootloader.
pub struct FramebufferIter<'a> {
    framebuffers: &'a [NonNull<RawFramebuffer>],
    index: usize,
}

impl FramebufferIter<'_> {
    /// Creates a new framebuffer iterator.
    pub(crate) fn new(
        count: usize,
        framebuffers: NonNull<NonNull<RawFramebuffer>>,
    ) -> FramebufferIter<'static> {
        // SAFETY: The bootloader provides a valid pointer to an array of
        // `count` NonNull<RawFramebuffer> pointers.
        let slice = unsafe { core::slice::from_raw_parts(framebuffers.as_ptr(), count) };
        FramebufferIter {
            framebuffers: slice,
            index: 0,
        }
    }
}

impl Iterator for FramebufferIter<'_> {
    type Item = &'static RawFramebuffer;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.framebuffers.len() {
            return None;
        }
        let ptr = self.framebuffers[self.index];
        self.index += 1;
        // SAFETY: Bootloader-provided pointer, valid for the kernel's lifetime.
        Some(unsafe { ptr.as_ref() })
    }
}
