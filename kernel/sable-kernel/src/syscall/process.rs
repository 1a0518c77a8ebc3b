//! Process-lifecycle syscalls: exit, sleeping, timing.

use sable_core::kinfo;

use super::SyscallOutcome::{self, FrameReplaced, Value};
use super::fail;
use crate::arch::x86_64::frame::InterruptFrame;
use crate::errno::Errno;
use crate::{proc, sched, time};

/// `exit(status)`: terminate the caller and hand the CPU to the next READY
/// user process (or back to idle when none remains).
pub fn sys_exit(status: u64, frame: &mut InterruptFrame) -> SyscallOutcome {
    proc::with_current(|p| {
        kinfo!("process {} ({}) exited with code {}", p.pid, p.name, status);
        // Drop all open files with the process.
        p.fds = [const { None }; crate::config::MAX_FDS];
        p.state = proc::ProcState::Terminated;
    });

    sched::reschedule_into(&mut frame.regs, &mut frame.iret);
    FrameReplaced
}

/// `sleep_ms(ms)`: block for at least `ceil(ms * freq / 1000)` ticks.
pub fn sys_sleep_ms(ms: u64, frame: &mut InterruptFrame) -> SyscallOutcome {
    let Some(ticks) = time::ms_to_ticks(ms) else {
        return fail(Errno::Inval);
    };
    sleep_for(ticks, frame)
}

/// `sleep_ticks(n)`: block for `n` timer ticks.
pub fn sys_sleep_ticks(ticks: u64, frame: &mut InterruptFrame) -> SyscallOutcome {
    sleep_for(ticks, frame)
}

fn sleep_for(ticks: u64, frame: &mut InterruptFrame) -> SyscallOutcome {
    let Some(target) = time::ticks().checked_add(ticks) else {
        return fail(Errno::Inval);
    };

    if sched::sleep_current_until(target, &mut frame.regs, &mut frame.iret) {
        FrameReplaced
    } else {
        // No other user process to run; the sleep degenerates to a return.
        Value(0)
    }
}

/// `getticks_delta()`: ticks elapsed since the caller was created.
pub fn sys_getticks_delta() -> SyscallOutcome {
    let start = proc::with_current(|p| p.start_ticks);
    Value(time::ticks().saturating_sub(start))
}
