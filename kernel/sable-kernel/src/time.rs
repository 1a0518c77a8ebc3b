//! Monotonic tick counter and tick arithmetic.
//!
//! The PIT fires at [`TIMER_HZ`](crate::config::TIMER_HZ); every interrupt
//! bumps the global counter. All timeouts in the kernel are measured in
//! ticks of that clock.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::TIMER_HZ;

/// Ticks since boot.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Called from the timer interrupt: advances the tick counter.
pub fn on_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Returns the monotonic tick count.
#[must_use]
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Returns the configured timer frequency in Hz.
#[must_use]
pub const fn frequency() -> u64 {
    TIMER_HZ
}

/// Returns whole seconds since boot (tick count over frequency).
#[must_use]
pub fn seconds() -> u32 {
    (ticks() / TIMER_HZ) as u32
}

/// Converts milliseconds to ticks: `ms * freq / 1000`, rejecting overflow
/// of the intermediate product.
#[must_use]
pub fn ms_to_ticks(ms: u64) -> Option<u64> {
    ms.checked_mul(TIMER_HZ).map(|product| product / 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_at_100hz() {
        assert_eq!(ms_to_ticks(0), Some(0));
        assert_eq!(ms_to_ticks(10), Some(1));
        assert_eq!(ms_to_ticks(1000), Some(100));
        // Sub-tick sleeps round down.
        assert_eq!(ms_to_ticks(9), Some(0));
    }

    #[test]
    fn conversion_rejects_overflow() {
        assert_eq!(ms_to_ticks(u64::MAX), None);
        assert_eq!(ms_to_ticks(u64::MAX / TIMER_HZ + 1), None);
    }

    #[test]
    fn tick_counter_is_monotonic() {
        let before = ticks();
        on_tick();
        on_tick();
        assert!(ticks() >= before + 2);
    }
}
