//! Xorshift pseudo-random numbers for the `rand` syscall.

use core::sync::atomic::{AtomicU32, Ordering};

/// LFSR state; any nonzero seed works.
static STATE: AtomicU32 = AtomicU32::new(0xACE1);

/// Advances the xorshift32 state and returns the next value.
pub fn next() -> u32 {
    let mut x = STATE.load(Ordering::Relaxed);
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    STATE.store(x, Ordering::Relaxed);
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonzero_and_changing() {
        let a = next();
        let b = next();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }
}
