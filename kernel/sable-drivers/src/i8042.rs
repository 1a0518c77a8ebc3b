//! PS/2 keyboard byte intake.
//!
//! Reads scancodes from the i8042 controller on IRQ 1 and translates
//! scancode set 1 to ASCII for the console input queue. Only the keys a
//! shell needs are mapped; everything else is dropped.

use core::sync::atomic::{AtomicBool, Ordering};

use sable_core::port::Port;

/// i8042 data port.
const DATA_PORT: u16 = 0x60;
/// i8042 status/command port.
const STATUS_PORT: u16 = 0x64;

/// Status bit: output buffer full (a byte is waiting in the data port).
const STATUS_OUTPUT_FULL: u8 = 1 << 0;

/// Left/right shift state, updated from make/break codes.
static SHIFT_HELD: AtomicBool = AtomicBool::new(false);

/// Scancode set 1, unshifted layer (index = scancode, 0 = unmapped).
static LAYER_BASE: [u8; 64] = [
    0, 0x1B, b'1', b'2', b'3', b'4', b'5', b'6', // 0x00
    b'7', b'8', b'9', b'0', b'-', b'=', 0x08, b'\t', // 0x08
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', // 0x10
    b'o', b'p', b'[', b']', b'\n', 0, b'a', b's', // 0x18
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', // 0x20
    b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v', // 0x28
    b'b', b'n', b'm', b',', b'.', b'/', 0, b'*', // 0x30
    0, b' ', 0, 0, 0, 0, 0, 0, // 0x38
];

/// Scancode set 1, shifted layer.
static LAYER_SHIFT: [u8; 64] = [
    0, 0x1B, b'!', b'@', b'#', b'$', b'%', b'^', // 0x00
    b'&', b'*', b'(', b')', b'_', b'+', 0x08, b'\t', // 0x08
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', // 0x10
    b'O', b'P', b'{', b'}', b'\n', 0, b'A', b'S', // 0x18
    b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', // 0x20
    b'"', b'~', 0, b'|', b'Z', b'X', b'C', b'V', // 0x28
    b'B', b'N', b'M', b'<', b'>', b'?', 0, b'*', // 0x30
    0, b' ', 0, 0, 0, 0, 0, 0, // 0x38
];

const SCANCODE_LSHIFT: u8 = 0x2A;
const SCANCODE_RSHIFT: u8 = 0x36;
const BREAK_BIT: u8 = 0x80;

/// Reads one raw byte from the controller if the output buffer is full.
#[must_use]
pub fn poll_byte() -> Option<u8> {
    // SAFETY: Status reads are side-effect free; the data read consumes the
    // pending byte, which is exactly what the caller asks for.
    unsafe {
        let status = Port::<u8>::new(STATUS_PORT).read();
        if status & STATUS_OUTPUT_FULL == 0 {
            return None;
        }
        Some(Port::<u8>::new(DATA_PORT).read())
    }
}

/// Translates one set-1 scancode, tracking shift state.
///
/// Returns the ASCII byte for a mapped make code, `None` for break codes,
/// modifiers and unmapped keys.
#[must_use]
pub fn translate(scancode: u8) -> Option<u8> {
    let code = scancode & !BREAK_BIT;
    let released = scancode & BREAK_BIT != 0;

    if code == SCANCODE_LSHIFT || code == SCANCODE_RSHIFT {
        SHIFT_HELD.store(!released, Ordering::Relaxed);
        return None;
    }
    if released || code as usize >= LAYER_BASE.len() {
        return None;
    }

    let layer = if SHIFT_HELD.load(Ordering::Relaxed) {
        &LAYER_SHIFT
    } else {
        &LAYER_BASE
    };
    match layer[code as usize] {
        0 => None,
        ch => Some(ch),
    }
}

/// IRQ 1 handler body: drains the controller and feeds translated bytes to
/// `push` (the console input queue).
pub fn handle_irq(mut push: impl FnMut(u8)) {
    while let Some(scancode) = poll_byte() {
        if let Some(ch) = translate(scancode) {
            push(ch);
        }
    }
}

/// Returns `true` if a byte is waiting in the controller's output buffer.
#[must_use]
pub fn input_pending() -> bool {
    // SAFETY: Status reads are side-effect free.
    unsafe { Port::<u8>::new(STATUS_PORT).read() & STATUS_OUTPUT_FULL != 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_letters_and_shift() {
        assert_eq!(translate(0x10), Some(b'q'));
        assert_eq!(translate(SCANCODE_LSHIFT), None); // shift down
        assert_eq!(translate(0x10), Some(b'Q'));
        assert_eq!(translate(SCANCODE_LSHIFT | BREAK_BIT), None); // shift up
        assert_eq!(translate(0x10), Some(b'q'));
    }

    #[test]
    fn translate_ignores_break_codes() {
        assert_eq!(translate(0x10 | BREAK_BIT), None);
    }

    #[test]
    fn translate_enter_and_backspace() {
        assert_eq!(translate(0x1C), Some(b'\n'));
        assert_eq!(translate(0x0E), Some(0x08));
    }
}
