//! IDT setup, exception handling, and the interrupt entry stubs.
//!
//! Three kinds of entry points share one register-frame layout:
//!
//! - exception stubs (vectors 0-31) push a dummy error code where the CPU
//!   did not, the vector number, and all GPRs, then call
//!   [`exception_common`]
//! - the timer stub (vector 0x20) pushes all GPRs and hands the frame to
//!   the scheduler, which may replace it wholesale before `iretq`
//! - the syscall stub (vector 0x80, DPL 3) pushes all GPRs and calls the
//!   dispatcher with the number, three register arguments, and the frame
//!
//! Ring discrimination happens on the saved CS: faults from ring 0 are
//! kernel panics, faults from ring 3 terminate the offending process.

use sable_core::structures::PageFaultErrorCode;
use sable_core::sync::SpinLock;
use sable_core::{kerr, kfatal};

use super::frame::{EXCEPTION_NAMES, ExceptionFrame, InterruptFrame};
use super::idt::{Idt, InterruptStackFrame};
use super::{instructions, pic};
use crate::{console, proc, sched, syscall, time};

/// Vector of the timer interrupt (IRQ 0 after remap).
pub const TIMER_VECTOR: u8 = pic::IRQ_BASE;
/// Vector of the keyboard interrupt (IRQ 1 after remap).
pub const KEYBOARD_VECTOR: u8 = pic::IRQ_BASE + 1;
/// Vector of the system-call software interrupt.
pub const SYSCALL_VECTOR: u8 = 0x80;

static IDT: SpinLock<Idt> = SpinLock::new(Idt::new());

/// Defines a naked exception stub. Vectors where the CPU pushes an error
/// code skip the dummy push. Every stub pushes the 15 GPRs in the order
/// [`GeneralRegisters`](super::frame::GeneralRegisters) mirrors (rax first,
/// so r15 lands at the lowest address).
macro_rules! exception_stub {
    ($name:ident, $vector:literal, has_error_code) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() -> ! {
            core::arch::naked_asm!(
                concat!("push ", $vector),
                "push rax", "push rbx", "push rcx", "push rdx", "push rsi",
                "push rdi", "push rbp", "push r8", "push r9", "push r10",
                "push r11", "push r12", "push r13", "push r14", "push r15",
                "mov rdi, rsp",
                "call {common}",
                "pop r15", "pop r14", "pop r13", "pop r12", "pop r11",
                "pop r10", "pop r9", "pop r8", "pop rbp", "pop rdi",
                "pop rsi", "pop rdx", "pop rcx", "pop rbx", "pop rax",
                "add rsp, 16", // vector + error code
                "iretq",
                common = sym exception_common,
            );
        }
    };
    ($name:ident, $vector:literal) => {
        #[unsafe(naked)]
        unsafe extern "C" fn $name() -> ! {
            core::arch::naked_asm!(
                "push 0",
                concat!("push ", $vector),
                "push rax", "push rbx", "push rcx", "push rdx", "push rsi",
                "push rdi", "push rbp", "push r8", "push r9", "push r10",
                "push r11", "push r12", "push r13", "push r14", "push r15",
                "mov rdi, rsp",
                "call {common}",
                "pop r15", "pop r14", "pop r13", "pop r12", "pop r11",
                "pop r10", "pop r9", "pop r8", "pop rbp", "pop rdi",
                "pop rsi", "pop rdx", "pop rcx", "pop rbx", "pop rax",
                "add rsp, 16", // vector + dummy error code
                "iretq",
                common = sym exception_common,
            );
        }
    };
}

exception_stub!(vec0, 0);
exception_stub!(vec1, 1);
exception_stub!(vec2, 2);
exception_stub!(vec3, 3);
exception_stub!(vec4, 4);
exception_stub!(vec5, 5);
exception_stub!(vec6, 6);
exception_stub!(vec7, 7);
exception_stub!(vec8, 8, has_error_code);
exception_stub!(vec9, 9);
exception_stub!(vec10, 10, has_error_code);
exception_stub!(vec11, 11, has_error_code);
exception_stub!(vec12, 12, has_error_code);
exception_stub!(vec13, 13, has_error_code);
exception_stub!(vec14, 14, has_error_code);
exception_stub!(vec16, 16);
exception_stub!(vec17, 17, has_error_code);
exception_stub!(vec18, 18);
exception_stub!(vec19, 19);

/// Timer interrupt stub: full frame, tick, possible frame swap, EOI.
#[unsafe(naked)]
unsafe extern "C" fn timer_stub() -> ! {
    core::arch::naked_asm!(
        "push rax", "push rbx", "push rcx", "push rdx", "push rsi",
        "push rdi", "push rbp", "push r8", "push r9", "push r10",
        "push r11", "push r12", "push r13", "push r14", "push r15",
        "mov rdi, rsp",
        "call {handler}",
        "pop r15", "pop r14", "pop r13", "pop r12", "pop r11",
        "pop r10", "pop r9", "pop r8", "pop rbp", "pop rdi",
        "pop rsi", "pop rdx", "pop rcx", "pop rbx", "pop rax",
        "iretq",
        handler = sym timer_interrupt,
    );
}

/// Keyboard interrupt stub: full frame (no swap), byte intake, EOI.
#[unsafe(naked)]
unsafe extern "C" fn keyboard_stub() -> ! {
    core::arch::naked_asm!(
        "push rax", "push rbx", "push rcx", "push rdx", "push rsi",
        "push rdi", "push rbp", "push r8", "push r9", "push r10",
        "push r11", "push r12", "push r13", "push r14", "push r15",
        "call {handler}",
        "pop r15", "pop r14", "pop r13", "pop r12", "pop r11",
        "pop r10", "pop r9", "pop r8", "pop rbp", "pop rdi",
        "pop rsi", "pop rdx", "pop rcx", "pop rbx", "pop rax",
        "iretq",
        handler = sym keyboard_interrupt,
    );
}

/// Syscall stub: number in RAX, arguments in RBX/RCX/RDX; further arguments
/// and the return-value cell live in the saved frame.
#[unsafe(naked)]
unsafe extern "C" fn syscall_stub() -> ! {
    core::arch::naked_asm!(
        "push rax", "push rbx", "push rcx", "push rdx", "push rsi",
        "push rdi", "push rbp", "push r8", "push r9", "push r10",
        "push r11", "push r12", "push r13", "push r14", "push r15",
        "mov rdi, [rsp + 0x70]", // saved rax: syscall number
        "mov rsi, [rsp + 0x68]", // saved rbx: arg1
        "mov rdx, [rsp + 0x60]", // saved rcx: arg2
        "mov rcx, [rsp + 0x58]", // saved rdx: arg3
        "mov r8, rsp",           // the whole frame
        "call {dispatch}",
        "pop r15", "pop r14", "pop r13", "pop r12", "pop r11",
        "pop r10", "pop r9", "pop r8", "pop rbp", "pop rdi",
        "pop rsi", "pop rdx", "pop rcx", "pop rbx", "pop rax",
        "iretq",
        dispatch = sym syscall::dispatch,
    );
}

/// Common exception handler.
///
/// Ring-3 faults terminate the process and schedule a survivor into the
/// frame; ring-0 faults are fatal.
extern "C" fn exception_common(frame: &mut ExceptionFrame) {
    let vector = frame.vector as usize;
    let name = EXCEPTION_NAMES.get(vector).copied().unwrap_or("unknown");

    if frame.iret.from_user() {
        let pname = proc::current_name();
        kerr!(
            "{}: {} at rip={:#x} (err={:#x})",
            pname.as_str(),
            name,
            frame.iret.rip,
            frame.error_code
        );
        if vector == 14 {
            let code = PageFaultErrorCode::from_bits_truncate(frame.error_code);
            kerr!("  faulting address: {} ({:?})", instructions::read_cr2(), code);
        }
        proc::terminate_current();
        sched::reschedule_into(&mut frame.regs, &mut frame.iret);
        return;
    }

    // Ring-0 fault: dump state and halt.
    kfatal!("KERNEL FAULT: {} (vector {}, err={:#x})", name, vector, frame.error_code);
    kfatal!(
        "  rip={:#x} rsp={:#x} rflags={:#x}",
        frame.iret.rip,
        frame.iret.rsp,
        frame.iret.rflags
    );
    kfatal!(
        "  rax={:#x} rbx={:#x} rcx={:#x} rdx={:#x}",
        frame.regs.rax,
        frame.regs.rbx,
        frame.regs.rcx,
        frame.regs.rdx
    );
    kfatal!(
        "  rsi={:#x} rdi={:#x} rbp={:#x}",
        frame.regs.rsi,
        frame.regs.rdi,
        frame.regs.rbp
    );
    if vector == 14 {
        kfatal!("  cr2={}", instructions::read_cr2());
    }
    instructions::halt_loop();
}

/// Timer interrupt handler: advance time, run the scheduler, EOI.
extern "C" fn timer_interrupt(frame: &mut InterruptFrame) {
    time::on_tick();
    sched::on_tick(&mut frame.regs, &mut frame.iret);
    pic::end_of_interrupt(0);
}

/// Keyboard interrupt handler: drain the controller into the console queue.
extern "C" fn keyboard_interrupt() {
    sable_drivers::i8042::handle_irq(console::push_input);
    pic::end_of_interrupt(1);
}

/// Spurious/unhandled hardware interrupt: acknowledge and continue.
extern "x86-interrupt" fn spurious_interrupt(_frame: InterruptStackFrame) {
    pic::end_of_interrupt(7);
}

/// Builds the IDT, remaps the PIC, and loads everything.
///
/// # Safety
///
/// Must be called once during boot, after the GDT is live and before
/// interrupts are enabled.
pub unsafe fn init() {
    {
        let mut idt = IDT.lock();

        let stubs: [(usize, unsafe extern "C" fn() -> !); 19] = [
            (0, vec0),
            (1, vec1),
            (2, vec2),
            (3, vec3),
            (4, vec4),
            (5, vec5),
            (6, vec6),
            (7, vec7),
            (8, vec8),
            (9, vec9),
            (10, vec10),
            (11, vec11),
            (12, vec12),
            (13, vec13),
            (14, vec14),
            (16, vec16),
            (17, vec17),
            (18, vec18),
            (19, vec19),
        ];
        for (vector, stub) in stubs {
            idt.entries[vector].set_handler_addr(stub as usize as u64);
        }

        idt.entries[TIMER_VECTOR as usize].set_handler_addr(timer_stub as usize as u64);
        idt.entries[KEYBOARD_VECTOR as usize].set_handler_addr(keyboard_stub as usize as u64);

        // Remaining PIC lines get a harmless acknowledger.
        for vector in pic::IRQ_BASE..pic::IRQ_BASE + 16 {
            let v = vector as usize;
            if v != TIMER_VECTOR as usize && v != KEYBOARD_VECTOR as usize {
                idt.entries[v].set_handler(spurious_interrupt);
            }
        }

        // Software interrupt 0x80, reachable from ring 3.
        idt.entries[SYSCALL_VECTOR as usize]
            .set_handler_addr(syscall_stub as usize as u64)
            .set_dpl(3);

        // SAFETY: The IDT lives in a static.
        unsafe { idt.load() };
    }

    // SAFETY: Single boot-time call with interrupts still disabled.
    unsafe { pic::init() };
}
