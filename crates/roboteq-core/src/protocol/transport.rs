use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single transport operation
#[derive(Error, Debug)]
pub enum TransportError {
    /// Nothing arrived before the deadline
    #[error("read timed out")]
    Timeout,

    /// The underlying channel failed
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Abstraction for the half-duplex byte channel to the controller
///
/// Implementations only move bytes; the dispatcher owns sequencing,
/// framing and retry.
pub trait Transport: Send {
    /// Write one complete command line
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read one line, up to and including the carriage return.
    ///
    /// Returns [`TransportError::Timeout`] when nothing arrived within
    /// `timeout`. When only part of a line arrived, the partial bytes are
    /// returned without terminator so the codec can report a framing error.
    fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Drop any input already buffered; the dispatcher calls this before
    /// every write
    fn clear_input(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write(bytes)
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).read_line(timeout)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        (**self).clear_input()
    }
}
