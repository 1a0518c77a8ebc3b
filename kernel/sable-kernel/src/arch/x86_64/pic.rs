//! Legacy 8259 PIC pair.
//!
//! Remaps IRQs 0-15 to vectors 0x20-0x2F and masks everything except the
//! timer and keyboard lines. Sable is single-CPU and does not use the APIC.

use sable_core::port::Port;

const MASTER_CMD: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_CMD: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;

/// First vector of the master PIC after remapping.
pub const IRQ_BASE: u8 = 0x20;

/// End-of-interrupt command.
const EOI: u8 = 0x20;

/// io_wait: a write to an unused port gives the PIC time to settle.
fn io_wait() {
    // SAFETY: Port 0x80 is the POST diagnostic port; writes are harmless.
    unsafe { Port::<u8>::new(0x80).write(0) };
}

/// Remaps both PICs and unmasks only IRQ 0 (timer) and IRQ 1 (keyboard).
///
/// # Safety
///
/// Must run once during boot with interrupts disabled.
pub unsafe fn init() {
    let master_cmd = Port::<u8>::new(MASTER_CMD);
    let master_data = Port::<u8>::new(MASTER_DATA);
    let slave_cmd = Port::<u8>::new(SLAVE_CMD);
    let slave_data = Port::<u8>::new(SLAVE_DATA);

    // SAFETY: Standard 8259 initialization sequence (ICW1-ICW4).
    unsafe {
        master_cmd.write(0x11); // ICW1: init + ICW4
        io_wait();
        slave_cmd.write(0x11);
        io_wait();
        master_data.write(IRQ_BASE); // ICW2: vector offsets
        io_wait();
        slave_data.write(IRQ_BASE + 8);
        io_wait();
        master_data.write(0x04); // ICW3: slave on line 2
        io_wait();
        slave_data.write(0x02);
        io_wait();
        master_data.write(0x01); // ICW4: 8086 mode
        io_wait();
        slave_data.write(0x01);
        io_wait();

        // Mask everything except IRQ 0 (timer) and IRQ 1 (keyboard).
        master_data.write(!0b0000_0011);
        slave_data.write(0xFF);
    }
}

/// Signals end-of-interrupt for `irq` (0-15).
pub fn end_of_interrupt(irq: u8) {
    // SAFETY: EOI writes are the defined completion protocol.
    unsafe {
        if irq >= 8 {
            Port::<u8>::new(SLAVE_CMD).write(EOI);
        }
        Port::<u8>::new(MASTER_CMD).write(EOI);
    }
}
