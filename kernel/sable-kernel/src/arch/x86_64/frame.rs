//! Saved register frames for interrupts and exceptions.
//!
//! The assembly stubs in [`interrupts`](super::interrupts) push all fifteen
//! general-purpose registers on top of the CPU's iret frame; the resulting
//! memory layout is mirrored here so Rust handlers can read and replace the
//! interrupted context. The scheduler and the exit/sleep syscalls swap whole
//! frames to hand the CPU to a different process.

/// The fifteen general-purpose registers, in stub push order (memory order
/// low to high: r15 first, rax last).
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct GeneralRegisters {
    /// R15.
    pub r15: u64,
    /// R14.
    pub r14: u64,
    /// R13.
    pub r13: u64,
    /// R12.
    pub r12: u64,
    /// R11.
    pub r11: u64,
    /// R10.
    pub r10: u64,
    /// R9.
    pub r9: u64,
    /// R8.
    pub r8: u64,
    /// RBP.
    pub rbp: u64,
    /// RDI (first SysV argument register).
    pub rdi: u64,
    /// RSI (second SysV argument register).
    pub rsi: u64,
    /// RDX.
    pub rdx: u64,
    /// RCX.
    pub rcx: u64,
    /// RBX.
    pub rbx: u64,
    /// RAX (syscall number in, return value out).
    pub rax: u64,
}

/// The frame the CPU pushes on a ring transition.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct IretFrame {
    /// Return instruction pointer.
    pub rip: u64,
    /// Code segment selector.
    pub cs: u64,
    /// RFLAGS.
    pub rflags: u64,
    /// Return stack pointer.
    pub rsp: u64,
    /// Stack segment selector.
    pub ss: u64,
}

impl IretFrame {
    /// Returns `true` when the interrupted code was running in ring 3.
    #[must_use]
    pub const fn from_user(&self) -> bool {
        self.cs & 0x3 == 0x3
    }
}

/// Full interrupted context: GPRs as pushed by the stub, then the CPU iret
/// frame. This is both the in-memory stack layout during interrupt handling
/// and the per-process record used for preemptive switches.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct InterruptFrame {
    /// General-purpose registers.
    pub regs: GeneralRegisters,
    /// CPU-pushed interrupt frame.
    pub iret: IretFrame,
}

/// Exception-stub layout: GPRs, then the vector number and error code the
/// stub pushed, then the CPU iret frame.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ExceptionFrame {
    /// General-purpose registers.
    pub regs: GeneralRegisters,
    /// Exception vector (0-31).
    pub vector: u64,
    /// CPU error code, or 0 for vectors without one.
    pub error_code: u64,
    /// CPU-pushed interrupt frame.
    pub iret: IretFrame,
}

/// Human-readable exception mnemonics, indexed by vector.
pub const EXCEPTION_NAMES: [&str; 32] = [
    "#DE divide error",
    "#DB debug",
    "NMI",
    "#BP breakpoint",
    "#OF overflow",
    "#BR bound range",
    "#UD invalid opcode",
    "#NM device not available",
    "#DF double fault",
    "coprocessor segment overrun",
    "#TS invalid TSS",
    "#NP segment not present",
    "#SS stack fault",
    "#GP general protection",
    "#PF page fault",
    "reserved",
    "#MF x87 floating point",
    "#AC alignment check",
    "#MC machine check",
    "#XM SIMD floating point",
    "#VE virtualization",
    "#CP control protection",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "#HV hypervisor injection",
    "#VC VMM communication",
    "#SX security",
    "reserved",
];
