//! Rust bindings with safe abstractions for the Limine bootloader protocol.
//!
//! The Limine protocol works through a request-response mechanism:
//! 1. The kernel declares static request structures in the `.requests` section
//! 2. The bootloader fills in the corresponding response structures before
//!    passing control to the kernel
//! 3. The kernel queries the responses to learn about the system
//!
//! Only the requests Sable consumes are bound here: base revision, HHDM
//! offset, memory map, framebuffers, boot modules, and the RSDP address.
//!
//! # Usage
//!
//! ```ignore
//! #[used]
//! #[link_section = ".requests"]
//! static MEMMAP_REQUEST: MemMapRequest = MemMapRequest::new();
//!
//! fn early_boot() {
//!     let response = MEMMAP_REQUEST.response().expect("no memory map");
//!     for entry in response.entries() {
//!         // ...
//!     }
//! }
//! ```

#![no_std]
#![warn(missing_docs)]

pub mod file;
pub mod framebuffer;
pub mod memmap;
pub mod request;
pub mod response;

pub use file::File;
pub use framebuffer::RawFramebuffer;
pub use memmap::{MemMapEntry, MemMapEntryType};
pub use request::{
    BaseRevision, FramebufferRequest, HhdmRequest, MemMapRequest, ModuleRequest, RsdpRequest,
    RequestsEndMarker, RequestsStartMarker,
};
pub use response::{
    FramebufferResponse, HhdmResponse, MemMapResponse, ModuleResponse, RsdpResponse,
};
