//! Voluntary context switching and first entry into user mode.
//!
//! [`Context`] holds the callee-saved registers plus RFLAGS; a voluntary
//! switch saves the current values into the outgoing process's record and
//! loads the incoming one's, resuming it right after its own last
//! `switch_context` call. New processes fake that state: their kernel stack
//! carries a trampoline return address and `r12` carries the entry point.

use super::frame::InterruptFrame;

/// Callee-saved register context for voluntary switches.
///
/// Field order is fixed: the assembly below addresses fields by offset.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Context {
    /// Saved stack pointer (top of the saved kernel stack).
    pub rsp: u64,
    /// RBP.
    pub rbp: u64,
    /// RBX.
    pub rbx: u64,
    /// R12 (entry-point slot for new threads).
    pub r12: u64,
    /// R13.
    pub r13: u64,
    /// R14.
    pub r14: u64,
    /// R15.
    pub r15: u64,
    /// RFLAGS.
    pub rflags: u64,
}

/// Saves the callee-saved registers into `old` and loads `new`.
///
/// Returns on the stack recorded in `new`; for a fresh process that is the
/// trampoline address pushed at creation time.
///
/// # Safety
///
/// - Both pointers must reference valid, exclusively borrowed [`Context`]
///   records.
/// - The target context's stack must be valid, and the caller must already
///   have installed the target's CR3 and TSS RSP0.
/// - No locks may be held across the call.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(old: *mut Context, new: *const Context) {
    core::arch::naked_asm!(
        // Save outgoing callee-saved state.
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "pushfq",
        "pop rax",
        "mov [rdi + 0x38], rax",
        // Load incoming state.
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        "mov rax, [rsi + 0x38]",
        "push rax",
        "popfq",
        "ret",
    );
}

/// Kernel-thread trampoline.
///
/// `switch_context` "returns" here for a fresh kernel thread. `r12` holds
/// the thread's entry function; when it returns the thread terminates and
/// hands the CPU to any READY successor.
#[unsafe(naked)]
pub unsafe extern "C" fn kernel_thread_entry() -> ! {
    core::arch::naked_asm!(
        "mov rdi, r12",
        "call {main}",
        main = sym crate::proc::kernel_thread_main,
    );
}

/// User-process trampoline.
///
/// `switch_context` "returns" here for a fresh user process; the process's
/// pre-seeded [`InterruptFrame`] (entry point, user stack, argv registers)
/// is fetched and entered via `iretq`.
#[unsafe(naked)]
pub unsafe extern "C" fn user_process_entry() -> ! {
    core::arch::naked_asm!(
        "call {fetch}",
        "mov rdi, rax",
        "jmp {enter}",
        fetch = sym crate::proc::current_initial_frame,
        enter = sym enter_user_frame,
    );
}

/// Drops to ring 3 by restoring a full saved frame and executing `iretq`.
///
/// # Safety
///
/// - `frame` must point to a valid [`InterruptFrame`] whose iret half
///   carries user selectors and a mapped RIP/RSP.
/// - CR3 must already be the target process's page table and TSS RSP0 its
///   kernel stack top.
#[unsafe(naked)]
pub unsafe extern "C" fn enter_user_frame(frame: *const InterruptFrame) -> ! {
    core::arch::naked_asm!(
        // Build the iret frame from the record (fields at 15*8 onward).
        "push [rdi + 0x98]", // ss
        "push [rdi + 0x90]", // rsp
        "push [rdi + 0x88]", // rflags
        "push [rdi + 0x80]", // cs
        "push [rdi + 0x78]", // rip
        // Restore GPRs, rdi last.
        "mov r15, [rdi + 0x00]",
        "mov r14, [rdi + 0x08]",
        "mov r13, [rdi + 0x10]",
        "mov r12, [rdi + 0x18]",
        "mov r11, [rdi + 0x20]",
        "mov r10, [rdi + 0x28]",
        "mov r9,  [rdi + 0x30]",
        "mov r8,  [rdi + 0x38]",
        "mov rbp, [rdi + 0x40]",
        "mov rsi, [rdi + 0x50]",
        "mov rdx, [rdi + 0x58]",
        "mov rcx, [rdi + 0x60]",
        "mov rbx, [rdi + 0x68]",
        "mov rax, [rdi + 0x70]",
        "mov rdi, [rdi + 0x48]",
        "iretq",
    );
}
