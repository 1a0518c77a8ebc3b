//! Request structures for the Limine boot protocol.
//!
//! Each request carries a unique 4-word ID (common magic plus a
//! request-specific pair) that the bootloader scans for in the `.requests`
//! section. After boot, `.response()` returns the filled-in response, or
//! `None` if the bootloader did not recognize or could not satisfy the
//! request.

use core::cell::UnsafeCell;

use crate::response::{
    FramebufferResponse, HhdmResponse, MemMapResponse, ModuleResponse, Response, RsdpResponse,
};

/// Macro to generate Limine request IDs.
///
/// Each request type has a unique 4-part ID consisting of the common magic
/// pair and a request-specific pair.
macro_rules! limine_id {
    ($part1:expr, $part2:expr) => {
        [
            0xc7b1_dd30_df4c_8b88u64,
            0x0a82_e883_a194_f07bu64,
            $part1,
            $part2,
        ]
    };
}

/// Marker placed at the start of the requests section.
///
/// Used by the bootloader to speed up searching for requests. If a start
/// marker is used, an end marker must also be used.
#[repr(C, align(8))]
pub struct RequestsStartMarker([u64; 4]);

impl RequestsStartMarker {
    /// The Limine ID for the Requests Start Marker.
    pub const ID: [u64; 4] = [
        0xf6b8_f4b3_9de7_d1ae,
        0xfab9_1a69_40fc_b9cf,
        0x785c_6ed0_15d3_e316,
        0x181e_920a_7852_b9d9,
    ];

    /// Creates a new `RequestsStartMarker`.
    #[must_use]
    pub const fn new() -> Self {
        Self(Self::ID)
    }
}

impl Default for RequestsStartMarker {
    fn default() -> Self {
        Self::new()
    }
}

/// Marker placed at the end of the requests section.
#[repr(C, align(8))]
pub struct RequestsEndMarker([u64; 2]);

impl RequestsEndMarker {
    /// The Limine ID for the Requests End Marker.
    pub const ID: [u64; 2] = [0xadc0_e053_1bb1_0d03, 0x9572_709f_3176_4c62];

    /// Creates a new `RequestsEndMarker`.
    #[must_use]
    pub const fn new() -> Self {
        Self(Self::ID)
    }
}

impl Default for RequestsEndMarker {
    fn default() -> Self {
        Self::new()
    }
}

/// Structure declaring the base revision of the Limine protocol the kernel
/// expects. The bootloader zeroes the third word when the revision is
/// supported.
#[repr(C, align(8))]
pub struct BaseRevision(UnsafeCell<[u64; 3]>);

// SAFETY: The bootloader writes the revision word before the kernel starts;
// afterwards the cell is only read.
unsafe impl Sync for BaseRevision {}

impl BaseRevision {
    /// The Limine magic pair for the base revision tag.
    pub const MAGIC: [u64; 2] = [0xf956_2b2d_5c95_a6c8, 0x6a7b_3849_4453_6bdc];

    /// The protocol base revision this kernel is written against.
    pub const REVISION: u64 = 3;

    /// Creates a new `BaseRevision` tag.
    #[must_use]
    pub const fn new() -> Self {
        Self(UnsafeCell::new([
            Self::MAGIC[0],
            Self::MAGIC[1],
            Self::REVISION,
        ]))
    }

    /// Returns `true` if the bootloader supports the requested revision.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        // SAFETY: Written by the bootloader before entry, read-only afterwards.
        let words = unsafe { &*self.0.get() };
        words[2] == 0
    }
}

impl Default for BaseRevision {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares a Limine request type: the ID constant, the repr(C) layout
/// (id, revision, response pointer), a `const fn new()`, and a `response()`
/// accessor returning the typed response.
macro_rules! limine_request {
    ($(#[$doc:meta])* $name:ident, $response:ty, $id1:expr, $id2:expr) => {
        $(#[$doc])*
        #[repr(C, align(8))]
        pub struct $name {
            id: [u64; 4],
            revision: u64,
            response: Response<$response>,
        }

        impl $name {
            /// The Limine ID of this request.
            pub const ID: [u64; 4] = limine_id!($id1, $id2);

            /// Creates a new request with an empty response slot.
            #[must_use]
            pub const fn new() -> Self {
                Self {
                    id: Self::ID,
                    revision: 0,
                    response: Response::empty(),
                }
            }

            /// Returns the bootloader's response, if one was provided.
            #[must_use]
            pub fn response(&self) -> Option<&$response> {
                self.response.get()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

limine_request!(
    /// Requests the Higher Half Direct Map offset.
    HhdmRequest,
    HhdmResponse,
    0x48dc_f1cb_8ad2_b852,
    0x6398_4e95_9a98_244b
);

limine_request!(
    /// Requests the physical memory map.
    MemMapRequest,
    MemMapResponse,
    0x67cf_3d9d_378a_806f,
    0xe304_acdf_c50c_3c62
);

limine_request!(
    /// Requests the list of framebuffers.
    FramebufferRequest,
    FramebufferResponse,
    0x9d58_27dc_d881_dd75,
    0xa314_8604_f6fa_b11b
);

limine_request!(
    /// Requests the boot modules loaded alongside the kernel.
    ModuleRequest,
    ModuleResponse,
    0x3e7e_2797_02be_32af,
    0xca1c_4f3b_d128_0cee
);

limine_request!(
    /// Requests the address of the ACPI RSDP structure.
    RsdpRequest,
    RsdpResponse,
    0xc5e7_7b6b_397e_7b43,
    0x2763_7845_accd_cf3c
);
