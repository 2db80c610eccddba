//! Serial transport seam between the driver and the coprocessor UART.
//!
//! The driver never blocks on the wire: it reads single bytes through
//! [SerialLink::read_byte] and treats [nb::Error::WouldBlock] as "no byte
//! pending", leaving deadline bookkeeping to the caller's timer.
use core::fmt::Debug;
use embedded_io::{Read, ReadReady, Write};

/// Byte-oriented serial channel to the AT coprocessor
pub trait SerialLink {
    type Error: Debug;

    /// Writes the complete buffer, preserving byte order
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Reads a single byte, returning `WouldBlock` if none is pending
    fn read_byte(&mut self) -> nb::Result<u8, Self::Error>;
}

/// Bridges any [embedded_io] serial port implementing [ReadReady] to [SerialLink]
pub struct IoLink<S> {
    serial: S,
}

impl<S> IoLink<S> {
    pub fn new(serial: S) -> Self {
        Self { serial }
    }

    /// Releases the wrapped serial port
    pub fn release(self) -> S {
        self.serial
    }
}

impl<S: Read + ReadReady + Write> SerialLink for IoLink<S> {
    type Error = S::Error;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.serial.write_all(bytes)?;
        self.serial.flush()
    }

    fn read_byte(&mut self) -> nb::Result<u8, Self::Error> {
        if !self.serial.read_ready().map_err(nb::Error::Other)? {
            return Err(nb::Error::WouldBlock);
        }

        let mut byte = [0x0; 1];
        match self.serial.read(&mut byte).map_err(nb::Error::Other)? {
            0 => Err(nb::Error::WouldBlock),
            _ => Ok(byte[0]),
        }
    }
}
