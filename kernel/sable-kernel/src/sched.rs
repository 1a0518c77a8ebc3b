//! Preemptive round-robin scheduler.
//!
//! Driven by the timer interrupt. Preemption happens only when the
//! interrupted code was in ring 3: a tick that lands while the kernel runs
//! (e.g. inside a syscall) is counted but never switches, so the saved
//! frame on the kernel stack is never corrupted. The `IN_SCHEDULER` latch
//! keeps the scheduler non-reentrant.
//!
//! Every decision follows the same order: wake expired sleepers, reap
//! terminated processes, then (ring 3 only) rotate to the next READY user
//! process by persisting the interrupted frame and installing the
//! successor's.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::x86_64::frame::{GeneralRegisters, IretFrame};
use crate::arch::x86_64::gdt;
use crate::arch::x86_64::gdt::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};
use crate::mm::vmm;
use crate::proc::{self, ProcState, Process, ProcessTable};
use crate::time;

/// Re-entry latch: ticks that arrive while a decision is in flight return
/// early.
static IN_SCHEDULER: AtomicBool = AtomicBool::new(false);

/// Copies the interrupted frame into the process record.
fn save_frame(proc: &mut Process, regs: &GeneralRegisters, iret: &IretFrame) {
    proc.frame.regs = *regs;
    proc.frame.iret = *iret;
    proc.has_been_interrupted = true;
}

/// Installs the process's saved frame into the live interrupt frame and
/// switches the CPU onto its world (CR3, TSS RSP0).
fn load_frame(proc: &mut Process, regs: &mut GeneralRegisters, iret: &mut IretFrame) {
    *regs = proc.frame.regs;
    *iret = proc.frame.iret;
    proc.state = ProcState::Running;
    proc.has_been_interrupted = true;

    gdt::set_kernel_stack(proc.kernel_stack_top.as_u64());
    let root = proc.page_root();
    // SAFETY: Every user page table shares the kernel upper half.
    unsafe { vmm::switch_to(root) };
}

/// Wakes every sleeper whose deadline has passed.
fn wake_sleepers(table: &mut ProcessTable) {
    let now = time::ticks();
    for p in table.iter_mut() {
        if p.state == ProcState::Sleeping && now >= p.sleep_until {
            p.state = ProcState::Ready;
        }
    }
}

/// Timer-tick entry point.
///
/// `regs`/`iret` are the live frame on the interrupt stack; replacing them
/// makes the trailing `iretq` resume a different process.
pub fn on_tick(regs: &mut GeneralRegisters, iret: &mut IretFrame) {
    if IN_SCHEDULER.swap(true, Ordering::Acquire) {
        return;
    }

    // Never spin here: if the tick interrupted kernel code that holds the
    // table (only possible in ring 0, where no switch happens anyway), the
    // decision is simply skipped until the next tick.
    let _ = proc::try_with_table(|table| {
        // Sleepers wake even when the tick lands in ring 0; otherwise an
        // idle kernel would never make them READY again.
        wake_sleepers(table);
        table.cleanup_terminated();

        // Only a ring-3 interrupt has a frame that is safe to swap.
        if !iret.from_user() {
            return;
        }

        let current = table.current_pid();
        let Some(next) = table.next_ready_user(current) else {
            return;
        };

        let cur = table.current_mut();
        save_frame(cur, regs, iret);
        if cur.state == ProcState::Running {
            cur.state = ProcState::Ready;
        }

        let next_proc = table.get_mut(next).expect("picked pid exists");
        load_frame(next_proc, regs, iret);
        table.set_current(next);
    });

    IN_SCHEDULER.store(false, Ordering::Release);
}

/// Hands the live frame to the next READY user process, used by the exit
/// syscall and the ring-3 fault path after the current process died.
///
/// When no user process remains, falls back to the idle process by
/// synthesizing a kernel-mode iret frame from idle's saved voluntary
/// context: execution resumes right after idle's last `switch_context`.
pub fn reschedule_into(regs: &mut GeneralRegisters, iret: &mut IretFrame) {
    proc::with_table(|table| {
        table.cleanup_terminated();

        let current = table.current_pid();
        if let Some(next) = table.next_ready_user(current) {
            let next_proc = table.get_mut(next).expect("picked pid exists");
            load_frame(next_proc, regs, iret);
            table.set_current(next);
            return;
        }

        // Fall back to idle (pid 0).
        let idle = table.get_mut(0).expect("idle process exists");
        let ctx = idle.context;
        if ctx.rsp == 0 {
            // Idle never switched away; nothing to return to.
            crate::arch::x86_64::instructions::halt_loop();
        }

        // The word at the saved RSP is the return address pushed by the
        // `call switch_context` inside idle.
        // SAFETY: The saved stack belongs to the live boot stack.
        let return_addr = unsafe { *(ctx.rsp as *const u64) };

        iret.rip = return_addr;
        iret.cs = u64::from(KERNEL_CODE_SELECTOR);
        iret.ss = u64::from(KERNEL_DATA_SELECTOR);
        iret.rflags = ctx.rflags;
        iret.rsp = ctx.rsp + 8;

        *regs = GeneralRegisters {
            rbp: ctx.rbp,
            rbx: ctx.rbx,
            r12: ctx.r12,
            r13: ctx.r13,
            r14: ctx.r14,
            r15: ctx.r15,
            ..GeneralRegisters::default()
        };

        idle.state = ProcState::Running;
        if idle.kernel_stack_top.as_u64() != 0 {
            gdt::set_kernel_stack(idle.kernel_stack_top.as_u64());
        }
        // SAFETY: The kernel root is always valid.
        unsafe { vmm::switch_to(vmm::kernel_root()) };
        table.set_current(0);
    });
}

/// Puts the current process to sleep until `target_tick` and hands the
/// frame to the next READY user process.
///
/// Returns `false` (leaving the process RUNNING and the frame untouched)
/// when no other user process exists; the caller then returns 0
/// immediately, exactly as if the sleep expired.
pub fn sleep_current_until(
    target_tick: u64,
    regs: &mut GeneralRegisters,
    iret: &mut IretFrame,
) -> bool {
    proc::with_table(|table| {
        {
            let cur = table.current_mut();
            cur.sleep_until = target_tick;
            cur.state = ProcState::Sleeping;
            cur.sleep_interrupted = false;
            save_frame(cur, regs, iret);
            // The sleep returns 0 whenever the process resumes.
            cur.frame.regs.rax = 0;
        }

        let current = table.current_pid();
        if let Some(next) = table.next_ready_user(current) {
            let next_proc = table.get_mut(next).expect("picked pid exists");
            load_frame(next_proc, regs, iret);
            table.set_current(next);
            true
        } else {
            table.current_mut().state = ProcState::Running;
            false
        }
    })
}
