//! Transport abstraction
//!
//! The driver never touches a serial port directly. It asks a [`Transport`]
//! for a [`SerialLink`] at a given speed and drops the link to close it.

use std::io;
use std::time::Duration;

use super::ProtocolError;

/// An open byte stream to the camera
pub trait SerialLink: Send {
    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns `ErrorKind::TimedOut` when nothing arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Write all of `data`, waiting at most `timeout`
    fn write_all(&mut self, data: &[u8], timeout: Duration) -> io::Result<()>;

    /// Discard anything buffered on the receive side
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Something that can open links to the camera at a given speed
pub trait Transport: Send {
    /// Open a fresh link; 8 data bits, no parity, one stop bit
    fn open(&mut self, baud_rate: u32) -> Result<Box<dyn SerialLink>, ProtocolError>;

    /// Human readable name of the underlying port
    fn name(&self) -> &str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, baud_rate: u32) -> Result<Box<dyn SerialLink>, ProtocolError> {
        (**self).open(baud_rate)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
