//! Compile-time kernel configuration.
//!
//! Every tunable constant lives here so layout decisions are visible in one
//! place.

/// Page size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Timer tick frequency in Hz. Canonical source for ms-to-tick math.
pub const TIMER_HZ: u64 = 100;

/// Kernel stack size per process, in pages.
pub const KERNEL_STACK_PAGES: usize = 2;

/// User stack size per process, in pages.
pub const USER_STACK_PAGES: usize = 4;

/// Top of the user stack, just below the canonical lower-half boundary.
///
/// `0x0000_8000_0000_0000` itself is non-canonical under 4-level paging;
/// the stack stays a page short of it.
pub const USER_STACK_TOP: u64 = 0x0000_7FFF_FFFF_F000;

/// Lowest address the mmap search considers.
pub const MMAP_SEARCH_BASE: u64 = 0x400_0000_0000;

/// Ceiling for the user heap (`brk`); keeps it clear of the mmap region
/// and the user stack.
pub const USER_HEAP_MAX: u64 = 0x5000_0000_0000;

/// Fixed virtual address where the framebuffer is mapped into a process.
pub const FB_MAP_BASE: u64 = 0x6000_0000_0000;

/// Per-process file descriptor table capacity.
pub const MAX_FDS: usize = 32;

/// Maximum process name length in bytes.
pub const MAX_PROC_NAME: usize = 63;

/// Path of the first user program, loaded from the root volume.
pub const INIT_PATH: &str = "/bin/shell";

/// Pid of the first user process (kernel threads count up from 1).
pub const FIRST_USER_PID: u32 = 100;
