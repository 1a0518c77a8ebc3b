//! Filesystem stack for the Sable kernel.
//!
//! Three layers, lowest first:
//!
//! - [`block`] — the block-device registry and byte-granular I/O helpers
//!   over [`BlockDevice`](sable_driver_api::BlockDevice) objects
//! - [`part`] — the MBR partition opener, producing child block devices
//! - [`ext2`] — a writable ext2 driver (mount, read, list, chdir, create,
//!   append, truncate)
//!
//! Everything here is pure logic over the `BlockDevice` trait, so the whole
//! crate builds and tests on the host against in-memory disk images.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod block;
pub mod ext2;
pub mod part;

use core::fmt;

/// Errors surfaced by the filesystem stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// The underlying block device failed.
    Io,
    /// No filesystem (or no valid structure) was found where one was
    /// expected.
    Corrupt,
    /// The path does not resolve to an inode.
    NotFound,
    /// The operation needs a directory but found something else.
    NotADirectory,
    /// The operation needs a regular file but found something else.
    NotAFile,
    /// No free inode or data block is available.
    NoSpace,
    /// The operation is not supported (e.g. growing a directory).
    Unsupported,
    /// Out of kernel memory.
    OutOfMemory,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => f.write_str("block device error"),
            Self::Corrupt => f.write_str("corrupt filesystem structure"),
            Self::NotFound => f.write_str("no such file or directory"),
            Self::NotADirectory => f.write_str("not a directory"),
            Self::NotAFile => f.write_str("not a regular file"),
            Self::NoSpace => f.write_str("no space left on device"),
            Self::Unsupported => f.write_str("operation not supported"),
            Self::OutOfMemory => f.write_str("out of memory"),
        }
    }
}
