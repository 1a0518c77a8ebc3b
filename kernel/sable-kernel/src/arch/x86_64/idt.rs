//! Interrupt Descriptor Table structures.

use core::mem::size_of;

use super::gdt::KERNEL_CODE_SELECTOR;
use sable_core::addr::VirtAddr;

/// Handler function for interrupts without an error code.
pub type HandlerFunc = extern "x86-interrupt" fn(InterruptStackFrame);

/// The stack frame pushed by the CPU when an interrupt occurs.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct InterruptStackFrame {
    /// Instruction pointer at the time of the interrupt.
    pub instruction_pointer: VirtAddr,
    /// Code segment selector.
    pub code_segment: u64,
    /// CPU flags (RFLAGS).
    pub cpu_flags: u64,
    /// Stack pointer at the time of the interrupt.
    pub stack_pointer: VirtAddr,
    /// Stack segment selector.
    pub stack_segment: u64,
}

/// Options for an IDT entry (bits 32..47 of the entry).
#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
pub struct EntryOptions(u16);

impl EntryOptions {
    /// Interrupt gate, not present, DPL=0, IST=0.
    const fn minimal() -> Self {
        Self(0x0E00)
    }

    fn present() -> Self {
        let mut opts = Self::minimal();
        opts.set_present(true);
        opts
    }

    /// Sets the descriptor privilege level (0-3).
    pub fn set_dpl(&mut self, dpl: u8) -> &mut Self {
        debug_assert!(dpl < 4, "DPL must be 0-3");
        self.0 = (self.0 & !0x6000) | ((u16::from(dpl) & 0x03) << 13);
        self
    }

    /// Sets the present bit.
    pub fn set_present(&mut self, present: bool) -> &mut Self {
        if present {
            self.0 |= 1 << 15;
        } else {
            self.0 &= !(1 << 15);
        }
        self
    }
}

/// A single IDT entry (16 bytes).
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct IdtEntry {
    offset_low: u16,
    segment_selector: u16,
    options: EntryOptions,
    offset_mid: u16,
    offset_high: u32,
    _reserved: u32,
}

impl IdtEntry {
    /// Creates a not-present IDT entry.
    pub const fn missing() -> Self {
        Self {
            offset_low: 0,
            segment_selector: 0,
            options: EntryOptions::minimal(),
            offset_mid: 0,
            offset_high: 0,
            _reserved: 0,
        }
    }

    /// Sets a handler function (no error code).
    pub fn set_handler(&mut self, handler: HandlerFunc) -> &mut EntryOptions {
        self.set_handler_addr(handler as usize as u64)
    }

    /// Sets a raw handler address (used for the naked assembly stubs).
    pub fn set_handler_addr(&mut self, addr: u64) -> &mut EntryOptions {
        self.offset_low = addr as u16;
        self.offset_mid = (addr >> 16) as u16;
        self.offset_high = (addr >> 32) as u32;
        self.segment_selector = KERNEL_CODE_SELECTOR;
        self.options = EntryOptions::present();
        &mut self.options
    }
}

/// The Interrupt Descriptor Table.
#[repr(C, align(16))]
pub struct Idt {
    /// All 256 vectors.
    pub entries: [IdtEntry; 256],
}

/// Pointer structure for `lidt`.
#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u64,
}

impl Idt {
    /// Creates an IDT with every entry missing.
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::missing(); 256],
        }
    }

    /// Loads this IDT.
    ///
    /// # Safety
    ///
    /// `self` must live for the rest of the kernel's lifetime (a static).
    pub unsafe fn load(&self) {
        let pointer = DescriptorTablePointer {
            limit: (size_of::<Self>() - 1) as u16,
            base: core::ptr::from_ref::<Self>(self) as u64,
        };
        // SAFETY: The pointer describes a valid, 'static IDT.
        unsafe {
            core::arch::asm!("lidt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
        }
    }
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}
