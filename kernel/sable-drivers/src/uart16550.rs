//! UART 16550 serial port driver.
//!
//! Provides a [`Uart16550`] type that implements [`core::fmt::Write`] for
//! formatted text output over a serial port. Initialization runs a loopback
//! self-test so a missing UART is detected instead of silently dropping the
//! boot log.

use core::fmt;

use bitflags::bitflags;
use sable_core::port::Port;

/// I/O base of the first PC-compatible serial port.
pub const COM1: u16 = 0x3F8;

/// Register offsets from the UART base address.
mod reg {
    /// Transmit Holding Register (write, DLAB=0).
    pub const THR: u16 = 0;
    /// Receive Buffer Register (read, DLAB=0).
    pub const RBR: u16 = 0;
    /// Divisor Latch Low byte (DLAB=1).
    pub const DLL: u16 = 0;
    /// Interrupt Enable Register (DLAB=0).
    pub const IER: u16 = 1;
    /// Divisor Latch High byte (DLAB=1).
    pub const DLM: u16 = 1;
    /// FIFO Control Register (write).
    pub const FCR: u16 = 2;
    /// Line Control Register.
    pub const LCR: u16 = 3;
    /// Modem Control Register.
    pub const MCR: u16 = 4;
    /// Line Status Register.
    pub const LSR: u16 = 5;
}

bitflags! {
    /// Line Status Register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Lsr: u8 {
        /// Data ready to read.
        const DATA_READY = 1 << 0;
        /// Transmit holding register empty.
        const THR_EMPTY  = 1 << 5;
    }
}

/// Baud rates the driver can program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum BaudRate {
    /// 115200 baud (divisor 1).
    Baud115200 = 1,
    /// 57600 baud (divisor 2).
    Baud57600 = 2,
    /// 38400 baud (divisor 3).
    Baud38400 = 3,
    /// 9600 baud (divisor 12).
    Baud9600 = 12,
}

/// Error from UART initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackFailed;

/// A 16550-compatible UART at a fixed I/O base.
#[derive(Clone, Copy)]
pub struct Uart16550 {
    base: u16,
}

impl Uart16550 {
    /// Creates a handle for the UART at `base`.
    #[must_use]
    pub const fn new(base: u16) -> Self {
        Self { base }
    }

    fn port(&self, offset: u16) -> Port<u8> {
        Port::new(self.base + offset)
    }

    /// Initializes the UART: 8N1, FIFOs on, given baud rate.
    ///
    /// # Errors
    ///
    /// Returns [`LoopbackFailed`] when the loopback self-test byte does not
    /// come back (no UART present).
    ///
    /// # Safety
    ///
    /// `base` must be a real UART; the writes reconfigure the device.
    pub unsafe fn init(&self, baud: BaudRate) -> Result<(), LoopbackFailed> {
        // SAFETY: All accesses target the UART register block at `base`.
        unsafe {
            self.port(reg::IER).write(0x00); // interrupts off
            self.port(reg::LCR).write(0x80); // DLAB on
            self.port(reg::DLL).write(baud as u16 as u8);
            self.port(reg::DLM).write(((baud as u16) >> 8) as u8);
            self.port(reg::LCR).write(0x03); // 8N1, DLAB off
            self.port(reg::FCR).write(0xC7); // FIFO on, clear, 14-byte trigger
            self.port(reg::MCR).write(0x1E); // loopback + OUT1/OUT2 + RTS

            self.port(reg::THR).write(0xAE);
            if self.port(reg::RBR).read() != 0xAE {
                return Err(LoopbackFailed);
            }

            self.port(reg::MCR).write(0x0F); // normal operation
        }
        Ok(())
    }

    /// Writes one byte, spinning until the transmitter has room.
    pub fn write_byte(&self, byte: u8) {
        // SAFETY: LSR reads and THR writes are side-effect-safe on a UART.
        unsafe {
            while !Lsr::from_bits_truncate(self.port(reg::LSR).read()).contains(Lsr::THR_EMPTY) {
                core::hint::spin_loop();
            }
            self.port(reg::THR).write(byte);
        }
    }

    /// Reads one byte if the receiver holds one.
    #[must_use]
    pub fn try_read_byte(&self) -> Option<u8> {
        // SAFETY: LSR/RBR reads are side-effect-safe on a UART.
        unsafe {
            if Lsr::from_bits_truncate(self.port(reg::LSR).read()).contains(Lsr::DATA_READY) {
                Some(self.port(reg::RBR).read())
            } else {
                None
            }
        }
    }
}

impl fmt::Write for Uart16550 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}
