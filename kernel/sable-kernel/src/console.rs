//! Console input queue.
//!
//! The keyboard interrupt pushes translated bytes; the getchar syscalls pop
//! them. Output goes through the logger's raw print path — the text
//! renderer itself is a device concern, not the kernel's.

use sable_core::sync::SpinLock;

/// Capacity of the input ring.
const QUEUE_SIZE: usize = 256;

struct InputQueue {
    buf: [u8; QUEUE_SIZE],
    head: usize,
    tail: usize,
}

impl InputQueue {
    const fn new() -> Self {
        Self {
            buf: [0; QUEUE_SIZE],
            head: 0,
            tail: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        let next = (self.head + 1) % QUEUE_SIZE;
        if next == self.tail {
            // Full: drop the oldest byte.
            self.tail = (self.tail + 1) % QUEUE_SIZE;
        }
        self.buf[self.head] = byte;
        self.head = next;
    }

    fn pop(&mut self) -> Option<u8> {
        if self.head == self.tail {
            return None;
        }
        let byte = self.buf[self.tail];
        self.tail = (self.tail + 1) % QUEUE_SIZE;
        Some(byte)
    }

    fn is_empty(&self) -> bool {
        self.head == self.tail
    }
}

static INPUT: SpinLock<InputQueue> = SpinLock::new(InputQueue::new());

/// Pushes one input byte (called from the keyboard interrupt).
pub fn push_input(byte: u8) {
    INPUT.lock().push(byte);
}

/// Pops the next input byte, if any.
#[must_use]
pub fn pop_input() -> Option<u8> {
    INPUT.lock().pop()
}

/// Returns `true` when input is queued.
#[must_use]
pub fn input_available() -> bool {
    !INPUT.lock().is_empty()
}
