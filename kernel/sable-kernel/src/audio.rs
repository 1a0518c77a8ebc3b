//! Kernel audio ring.
//!
//! `audio_write_pcm` copies user PCM buffers into kernel memory and
//! enqueues them here; an output driver drains the ring. Without one the
//! ring simply caps and drops the oldest buffers — the syscall contract
//! (copy + enqueue, return accepted frames) holds either way.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use sable_core::sync::SpinLock;

/// Number of interleaved output channels.
const OUTPUT_CHANNELS: usize = 2;

/// Maximum queued buffers before the oldest is dropped.
const MAX_QUEUED: usize = 32;

static RING: SpinLock<VecDeque<Vec<u8>>> = SpinLock::new(VecDeque::new());

/// Returns the number of interleaved output channels.
#[must_use]
pub fn output_channels() -> usize {
    OUTPUT_CHANNELS
}

/// Enqueues one interleaved PCM buffer; returns the frames accepted.
pub fn enqueue_pcm(bytes: Vec<u8>, frames: u64) -> u64 {
    let mut ring = RING.lock();
    if ring.len() >= MAX_QUEUED {
        ring.pop_front();
    }
    ring.push_back(bytes);
    frames
}

/// Pops the next queued PCM buffer (for an output driver).
#[must_use]
pub fn dequeue_pcm() -> Option<Vec<u8>> {
    RING.lock().pop_front()
}
