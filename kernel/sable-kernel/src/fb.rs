//! Framebuffer geometry record.
//!
//! The loader maps the framebuffer into the HHDM; the kernel only needs its
//! physical base and geometry so `fb_info`/`fb_map` can hand it to user
//! processes. Rendering text onto it is the console device's business.

use sable_core::sync::SpinLock;

/// Geometry of a linear framebuffer.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferRecord {
    /// Physical base address of the pixel memory.
    pub phys_base: u64,
    /// Width in pixels.
    pub width: u64,
    /// Height in pixels.
    pub height: u64,
    /// Bytes per scanline.
    pub pitch: u64,
    /// Bits per pixel.
    pub bpp: u16,
}

static PRIMARY: SpinLock<Option<FramebufferRecord>> = SpinLock::new(None);

/// Records the primary framebuffer during boot.
pub fn init(record: FramebufferRecord) {
    *PRIMARY.lock() = Some(record);
}

/// Returns the primary framebuffer, if the loader provided one.
#[must_use]
pub fn primary() -> Option<FramebufferRecord> {
    *PRIMARY.lock()
}
