//! Limine request declarations.
//!
//! One static struct in the `.requests` section carries every request the
//! kernel makes, bracketed by the start/end markers the bootloader scans
//! for.

use limine::{
    BaseRevision, FramebufferRequest, HhdmRequest, MemMapRequest, ModuleRequest,
    RequestsEndMarker, RequestsStartMarker, RsdpRequest,
};

/// All Limine requests, in one fixed-layout block.
#[repr(C, align(8))]
pub struct LimineRequests {
    _start_marker: RequestsStartMarker,
    /// Protocol base revision tag.
    pub base_revision: BaseRevision,
    /// Physical memory map.
    pub memmap: MemMapRequest,
    /// Higher-half direct map offset.
    pub hhdm: HhdmRequest,
    /// Framebuffer list.
    pub framebuffer: FramebufferRequest,
    /// Boot modules.
    pub modules: ModuleRequest,
    /// ACPI RSDP address.
    pub rsdp: RsdpRequest,
    _end_marker: RequestsEndMarker,
}

impl LimineRequests {
    const fn new() -> Self {
        Self {
            _start_marker: RequestsStartMarker::new(),
            base_revision: BaseRevision::new(),
            memmap: MemMapRequest::new(),
            hhdm: HhdmRequest::new(),
            framebuffer: FramebufferRequest::new(),
            modules: ModuleRequest::new(),
            rsdp: RsdpRequest::new(),
            _end_marker: RequestsEndMarker::new(),
        }
    }
}

/// The request block the bootloader fills in before `_start` runs.
#[used]
#[unsafe(link_section = ".requests")]
pub static REQUESTS: LimineRequests = LimineRequests::new();
