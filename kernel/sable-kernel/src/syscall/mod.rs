//! System-call interface.
//!
//! User code raises software interrupt `0x80` with the call number in RAX
//! and up to three arguments in RBX, RCX, RDX; further arguments are read
//! from the saved RSI/RDI/R8 slots. The return value is written into the
//! saved RAX cell unless the handler replaced the whole frame (exit and
//! the sleep family may hand the CPU to another process mid-call).
//!
//! Unknown numbers return −1.

pub mod userptr;

#[cfg(target_os = "none")]
mod fbcalls;
#[cfg(target_os = "none")]
mod io;
#[cfg(target_os = "none")]
mod memory;
#[cfg(target_os = "none")]
mod process;

// ── Call numbers ─────────────────────────────────────────────────────────

/// Terminate the calling process.
pub const SYS_EXIT: u64 = 0;
/// Write a NUL-terminated string to the console.
pub const SYS_PRINT: u64 = 1;
/// Return the caller's pid.
pub const SYS_GETPID: u64 = 2;
/// Return the tick count (alias of `SYS_GETTICKS`).
pub const SYS_GETTIME: u64 = 3;
/// Sleep for a number of milliseconds.
pub const SYS_SLEEP: u64 = 4;
/// Give up the remainder of the time slice (no-op; the timer rotates).
pub const SYS_YIELD: u64 = 5;
/// Map anonymous or file-initialized memory.
pub const SYS_MMAP: u64 = 20;
/// Unmap a page-aligned range.
pub const SYS_MUNMAP: u64 = 21;
/// Query or move the user heap end.
pub const SYS_BRK: u64 = 22;
/// Block until console input is available; return the byte.
pub const SYS_GETCHAR: u64 = 30;
/// Return 1 when console input is available.
pub const SYS_POLL: u64 = 31;
/// Return the next console byte or −1.
pub const SYS_GETCHAR_NONBLOCKING: u64 = 32;
/// Copy framebuffer geometry into a caller-provided struct.
pub const SYS_FB_INFO: u64 = 40;
/// Map the framebuffer into the caller's address space.
pub const SYS_FB_MAP: u64 = 41;
/// Present the framebuffer (no-op in single-buffered mode).
pub const SYS_FB_FLIP: u64 = 42;
/// Return the monotonic tick count.
pub const SYS_GETTICKS: u64 = 50;
/// Sleep for a number of milliseconds.
pub const SYS_SLEEP_MS: u64 = 51;
/// Sleep for a number of ticks.
pub const SYS_SLEEP_TICKS: u64 = 52;
/// Return ticks elapsed since process start.
pub const SYS_GETTICKS_DELTA: u64 = 53;
/// Return a pseudo-random 32-bit value.
pub const SYS_RAND: u64 = 60;
/// Reboot via the ACPI reset path.
pub const SYS_REBOOT: u64 = 61;
/// Power off via the ACPI S5 path.
pub const SYS_SHUTDOWN: u64 = 62;
/// Enqueue interleaved PCM frames into the audio ring.
pub const SYS_AUDIO_WRITE_PCM: u64 = 70;

// ── mmap protection and flag bits ────────────────────────────────────────

/// Pages may be read.
pub const PROT_READ: u64 = 0x1;
/// Pages may be written.
pub const PROT_WRITE: u64 = 0x2;

/// Mapping is shared.
pub const MAP_SHARED: u64 = 0x01;
/// Mapping is private.
pub const MAP_PRIVATE: u64 = 0x02;
/// Map at exactly the given address.
pub const MAP_FIXED: u64 = 0x10;
/// No backing file; zero-filled.
pub const MAP_ANONYMOUS: u64 = 0x20;

// ── Dispatch ─────────────────────────────────────────────────────────────

/// What a syscall handler did with the saved frame.
#[cfg(target_os = "none")]
pub enum SyscallOutcome {
    /// Write this value into the saved RAX slot.
    Value(u64),
    /// The handler replaced the frame (switched processes); leave it alone.
    FrameReplaced,
}

/// Shorthand: a −1 return with the caller's errno set.
#[cfg(target_os = "none")]
pub(crate) fn fail(errno: crate::errno::Errno) -> SyscallOutcome {
    crate::proc::with_current(|p| p.last_errno = errno.as_i32());
    SyscallOutcome::Value(u64::MAX)
}

/// Syscall dispatch entry point, called from the interrupt stub.
///
/// `frame` is the live saved frame on the kernel stack: argument source
/// for RSI/RDI/R8-borne parameters and the return-value cell.
#[cfg(target_os = "none")]
pub extern "C" fn dispatch(
    nr: u64,
    arg1: u64,
    arg2: u64,
    arg3: u64,
    frame: *mut crate::arch::x86_64::frame::InterruptFrame,
) {
    use SyscallOutcome::Value;

    // SAFETY: The stub passes a pointer into the live interrupt stack
    // frame, exclusively ours for the duration of the call.
    let frame = unsafe { &mut *frame };

    let outcome = match nr {
        SYS_EXIT => process::sys_exit(arg1, frame),
        SYS_PRINT => io::sys_print(arg1),
        SYS_GETPID => Value(u64::from(crate::proc::current_pid())),
        SYS_GETTIME | SYS_GETTICKS => Value(crate::time::ticks()),
        SYS_SLEEP | SYS_SLEEP_MS => process::sys_sleep_ms(arg1, frame),
        SYS_SLEEP_TICKS => process::sys_sleep_ticks(arg1, frame),
        SYS_YIELD => Value(0),
        SYS_MMAP => memory::sys_mmap(arg1, arg2, arg3, frame),
        SYS_MUNMAP => memory::sys_munmap(arg1, arg2),
        SYS_BRK => memory::sys_brk(arg1),
        SYS_GETCHAR => io::sys_getchar(),
        SYS_POLL => io::sys_poll(),
        SYS_GETCHAR_NONBLOCKING => io::sys_getchar_nonblocking(),
        SYS_FB_INFO => fbcalls::sys_fb_info(arg1),
        SYS_FB_MAP => fbcalls::sys_fb_map(arg1),
        SYS_FB_FLIP => Value(0),
        SYS_GETTICKS_DELTA => process::sys_getticks_delta(),
        SYS_RAND => Value(u64::from(crate::rand::next())),
        SYS_REBOOT => crate::power::reboot(),
        SYS_SHUTDOWN => crate::power::shutdown(),
        SYS_AUDIO_WRITE_PCM => io::sys_audio_write_pcm(arg1, arg2),
        _ => {
            sable_core::kwarn!("syscall: unknown number {}", nr);
            Value(u64::MAX)
        }
    };

    if let Value(value) = outcome {
        frame.regs.rax = value;
    }
}
