//! Console and audio syscalls.

use alloc::vec::Vec;

use sable_core::kprint;

use super::SyscallOutcome::{self, Value};
use super::fail;
use super::userptr::{copy_from_user, read_user_string};
use crate::arch::x86_64::instructions;
use crate::errno::Errno;
use crate::{audio, console, proc};

/// `print(ptr)`: validate the NUL-terminated string and write it to the
/// console; returns its length.
pub fn sys_print(ptr: u64) -> SyscallOutcome {
    let text = proc::with_current(|p| read_user_string(p, ptr));
    match text {
        Some(text) => {
            kprint!("{}", text);
            Value(text.len() as u64)
        }
        None => fail(Errno::Fault),
    }
}

/// `getchar()`: block until a console byte is available.
///
/// Interrupts are enabled while waiting so the keyboard (and the timer)
/// keep running; the scheduler never preempts ring 0, so the wait loop
/// simply halts between interrupts. The queue is checked with interrupts
/// masked so the keyboard handler can never interrupt the queue holder.
pub fn sys_getchar() -> SyscallOutcome {
    loop {
        instructions::cli();
        if let Some(byte) = console::pop_input() {
            instructions::sti();
            return Value(u64::from(byte));
        }
        instructions::sti();
        instructions::hlt();
    }
}

/// `getchar_nonblocking()`: next console byte, or −1.
pub fn sys_getchar_nonblocking() -> SyscallOutcome {
    match console::pop_input() {
        Some(byte) => Value(u64::from(byte)),
        None => Value(u64::MAX),
    }
}

/// `poll()`: 1 when console input is pending, else 0.
pub fn sys_poll() -> SyscallOutcome {
    let pending = console::input_available() || sable_drivers::i8042::input_pending();
    Value(u64::from(pending))
}

/// `audio_write_pcm(ptr, frames)`: copy interleaved PCM samples into the
/// kernel audio ring; returns the number of frames accepted.
pub fn sys_audio_write_pcm(ptr: u64, frames: u64) -> SyscallOutcome {
    let channels = audio::output_channels() as u64;
    let Some(total_bytes) = frames
        .checked_mul(channels)
        .and_then(|samples| samples.checked_mul(2))
    else {
        return fail(Errno::Inval);
    };
    if frames == 0 || total_bytes == 0 {
        return Value(0);
    }

    let copied: Option<Vec<u8>> =
        proc::with_current(|p| copy_from_user(p, ptr, total_bytes as usize));
    match copied {
        Some(bytes) => Value(audio::enqueue_pcm(bytes, frames)),
        None => fail(Errno::Fault),
    }
}
