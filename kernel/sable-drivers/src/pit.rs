//! 8254 PIT (Programmable Interval Timer) driver.
//!
//! Channel 0 runs in rate-generator mode and fires IRQ 0 at the configured
//! frequency; the scheduler hangs off that tick.

use sable_core::port::Port;

/// PIT oscillator frequency: 1,193,182 Hz.
const PIT_FREQUENCY: u32 = 1_193_182;

const CHANNEL0_DATA: u16 = 0x40;
const PIT_CMD: u16 = 0x43;

/// Programs channel 0 as a periodic rate generator at `hz`.
///
/// # Safety
///
/// Reprograms the system timer; call once during boot before interrupts are
/// enabled.
pub unsafe fn init(hz: u32) {
    let divisor = (PIT_FREQUENCY / hz).clamp(1, 0xFFFF) as u16;

    let cmd = Port::<u8>::new(PIT_CMD);
    let channel0 = Port::<u8>::new(CHANNEL0_DATA);

    // SAFETY: Well-known PIT registers; the caller serializes against other
    // PIT users.
    unsafe {
        // Channel 0, lobyte/hibyte, rate generator (mode 2), binary.
        cmd.write(0b0011_0100);
        channel0.write(divisor as u8);
        channel0.write((divisor >> 8) as u8);
    }
}
