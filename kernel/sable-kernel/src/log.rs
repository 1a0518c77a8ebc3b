//! Kernel logging infrastructure.
//!
//! Two phases:
//!
//! **Early serial (pre-heap):** [`init_early_serial`] registers lightweight
//! print/log functions that write directly to COM1 with no locks and no
//! allocation. All output during GDT, PMM, VMM, and heap init goes through
//! this path.
//!
//! **Full logger (post-heap):** [`init_logger`] creates a [`Logger`] with a
//! `Vec<Box<dyn LogSink>>` and replaces the early functions. Additional
//! sinks are registered via [`add_sink`].

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt::{self, Write as _};

use sable_core::log::LogLevel;
use sable_core::sync::SpinLock;
use sable_drivers::uart16550::{COM1, Uart16550};

// ---------------------------------------------------------------------------
// LogSink trait
// ---------------------------------------------------------------------------

/// A dyn-compatible output sink for the kernel logger.
pub trait LogSink: Send + Sync {
    /// Write a string fragment to this sink.
    fn write_str(&self, s: &str);
    /// Maximum level accepted (messages with `level <= max_level` pass).
    fn max_level(&self) -> LogLevel;
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;
}

/// A [`LogSink`] that writes to a 16550 UART serial port.
pub struct SerialSink {
    uart: Uart16550,
    max_level: LogLevel,
}

impl SerialSink {
    /// Creates a new serial sink.
    #[must_use]
    pub fn new(uart: Uart16550, max_level: LogLevel) -> Self {
        Self { uart, max_level }
    }
}

impl LogSink for SerialSink {
    fn write_str(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.uart.write_byte(b'\r');
            }
            self.uart.write_byte(byte);
        }
    }

    fn max_level(&self) -> LogLevel {
        self.max_level
    }

    fn name(&self) -> &str {
        "serial"
    }
}

// ---------------------------------------------------------------------------
// Early serial phase
// ---------------------------------------------------------------------------

fn early_print(args: fmt::Arguments<'_>) {
    let mut uart = Uart16550::new(COM1);
    let _ = uart.write_fmt(args);
}

fn early_log(level: LogLevel, args: fmt::Arguments<'_>) {
    let mut uart = Uart16550::new(COM1);
    let _ = write!(uart, "[{}] ", level.name());
    let _ = uart.write_fmt(args);
    let _ = uart.write_str("\n");
}

/// Registers the lock-free early serial print/log functions.
///
/// Safe to call before anything else is initialized; the boot stub calls it
/// right after bringing up COM1.
pub fn init_early_serial() {
    // SAFETY: The early functions only touch UART ports.
    unsafe {
        sable_core::log::set_print_fn(early_print);
        sable_core::log::set_log_fn(early_log);
    }
}

// ---------------------------------------------------------------------------
// Full logger phase
// ---------------------------------------------------------------------------

/// The multi-sink kernel logger.
pub struct Logger {
    sinks: Vec<Box<dyn LogSink>>,
}

static LOGGER: SpinLock<Option<Logger>> = SpinLock::new(None);

fn logger_print(args: fmt::Arguments<'_>) {
    let mut buf = FmtBuffer::new();
    let _ = buf.write_fmt(args);

    if let Some(logger) = LOGGER.lock().as_ref() {
        for sink in &logger.sinks {
            sink.write_str(buf.as_str());
        }
    }
}

fn logger_log(level: LogLevel, args: fmt::Arguments<'_>) {
    let mut buf = FmtBuffer::new();
    let _ = write!(buf, "[{:>5}.{:03}] [{}] ", crate::time::ticks() / crate::config::TIMER_HZ,
        (crate::time::ticks() % crate::config::TIMER_HZ) * 1000 / crate::config::TIMER_HZ,
        level.name());
    let _ = buf.write_fmt(args);
    let _ = buf.write_str("\n");

    if let Some(logger) = LOGGER.lock().as_ref() {
        for sink in &logger.sinks {
            if level <= sink.max_level() {
                sink.write_str(buf.as_str());
            }
        }
    }
}

/// Replaces the early serial functions with the sink-based logger.
///
/// Requires a working heap.
pub fn init_logger() {
    {
        let mut logger = LOGGER.lock();
        if logger.is_none() {
            *logger = Some(Logger { sinks: Vec::new() });
        }
    }
    add_sink(Box::new(SerialSink::new(
        Uart16550::new(COM1),
        LogLevel::Debug,
    )));

    // SAFETY: The logger functions are valid for the kernel's lifetime.
    unsafe {
        sable_core::log::set_print_fn(logger_print);
        sable_core::log::set_log_fn(logger_log);
    }
}

/// Adds an output sink to the full logger.
pub fn add_sink(sink: Box<dyn LogSink>) {
    if let Some(logger) = LOGGER.lock().as_mut() {
        logger.sinks.push(sink);
    }
}

// ---------------------------------------------------------------------------
// Bounded format buffer (log lines are clipped, never allocated per call)
// ---------------------------------------------------------------------------

struct FmtBuffer {
    buf: [u8; 512],
    len: usize,
}

impl FmtBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; 512],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("<bad utf8>")
    }
}

impl fmt::Write for FmtBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.len;
        let take = s.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}
