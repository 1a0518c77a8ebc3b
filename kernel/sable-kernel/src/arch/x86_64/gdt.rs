//! Global Descriptor Table and Task State Segment.
//!
//! Fixed layout: null, kernel code `0x08`, kernel data `0x10`, user data
//! `0x18`, user code `0x20`, TSS at `0x28`. Ring transitions load the
//! kernel stack from `TSS.RSP0`, which the scheduler updates on every
//! process switch.

use core::mem::size_of;

use sable_core::sync::SpinLock;

/// Kernel code segment selector.
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
/// Kernel data segment selector.
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
/// User data segment selector with RPL 3.
pub const USER_DATA_SELECTOR: u16 = 0x18 | 3;
/// User code segment selector with RPL 3.
pub const USER_CODE_SELECTOR: u16 = 0x20 | 3;
/// TSS selector.
pub const TSS_SELECTOR: u16 = 0x28;

/// 64-bit Task State Segment.
#[repr(C, packed)]
struct TaskStateSegment {
    _reserved0: u32,
    /// Stack pointers loaded on ring transitions to rings 0-2.
    rsp: [u64; 3],
    _reserved1: u64,
    /// Interrupt stack table (unused).
    ist: [u64; 7],
    _reserved2: u64,
    _reserved3: u16,
    /// I/O permission bitmap offset.
    iopb: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            _reserved0: 0,
            rsp: [0; 3],
            _reserved1: 0,
            ist: [0; 7],
            _reserved2: 0,
            _reserved3: 0,
            iopb: size_of::<TaskStateSegment>() as u16,
        }
    }
}

/// GDT storage: 5 code/data descriptors plus a 16-byte TSS descriptor.
#[repr(C, align(16))]
struct Gdt {
    entries: [u64; 7],
}

/// Pointer structure for `lgdt`.
#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u64,
}

static TSS: SpinLock<TaskStateSegment> = SpinLock::new(TaskStateSegment::new());

static GDT: SpinLock<Gdt> = SpinLock::new(Gdt { entries: [0; 7] });

// Segment descriptor bit patterns for 64-bit flat segments.
const KERNEL_CODE_DESC: u64 = 0x00AF_9A00_0000_FFFF;
const KERNEL_DATA_DESC: u64 = 0x00CF_9200_0000_FFFF;
const USER_DATA_DESC: u64 = 0x00CF_F200_0000_FFFF;
const USER_CODE_DESC: u64 = 0x00AF_FA00_0000_FFFF;

/// Builds and loads the GDT and TSS.
///
/// # Safety
///
/// Must be called once during boot, before interrupts are enabled.
pub unsafe fn init() {
    let tss_base = {
        let tss = TSS.lock();
        core::ptr::from_ref::<TaskStateSegment>(&*tss) as u64
    };
    let tss_limit = (size_of::<TaskStateSegment>() - 1) as u64;

    // 16-byte TSS system descriptor (type 0x9 = available 64-bit TSS).
    let tss_low = tss_limit
        | ((tss_base & 0xFF_FFFF) << 16)
        | (0x89u64 << 40)
        | (((tss_base >> 24) & 0xFF) << 56);
    let tss_high = tss_base >> 32;

    let gdt_base;
    {
        let mut gdt = GDT.lock();
        gdt.entries = [
            0,
            KERNEL_CODE_DESC,
            KERNEL_DATA_DESC,
            USER_DATA_DESC,
            USER_CODE_DESC,
            tss_low,
            tss_high,
        ];
        gdt_base = gdt.entries.as_ptr() as u64;
    }

    let pointer = DescriptorTablePointer {
        limit: (size_of::<[u64; 7]>() - 1) as u16,
        base: gdt_base,
    };

    // SAFETY: The GDT is static and correctly formed; reloading segments
    // with the matching selectors is the defined way to activate it.
    unsafe {
        core::arch::asm!(
            "lgdt [{ptr}]",
            // Reload CS via far return.
            "push {kcode}",
            "lea {tmp}, [rip + 2f]",
            "push {tmp}",
            "retfq",
            "2:",
            // Reload data segments.
            "mov ds, {kdata:x}",
            "mov es, {kdata:x}",
            "mov ss, {kdata:x}",
            "xor {tmp}, {tmp}",
            "mov fs, {tmp:x}",
            "mov gs, {tmp:x}",
            // Load the task register.
            "ltr {tss:x}",
            ptr = in(reg) &pointer,
            kcode = in(reg) u64::from(KERNEL_CODE_SELECTOR),
            kdata = in(reg) u32::from(KERNEL_DATA_SELECTOR),
            tss = in(reg) u32::from(TSS_SELECTOR),
            tmp = out(reg) _,
        );
    }
}

/// Points `TSS.RSP0` at `stack_top`, the kernel stack used on the next
/// ring-3 to ring-0 transition.
pub fn set_kernel_stack(stack_top: u64) {
    TSS.lock().rsp = [stack_top, 0, 0];
}
