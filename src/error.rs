//! Our error types for the PLxx serial link.

use thiserror::Error;

use crate::protocol::FrameError;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Failure of a single transaction with the controller.
///
/// Every variant leaves the serial handle closed; the next call reopens it.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Serial communication error: {0:?}")]
    SerialError(I),
    #[error("Unable to open serial device: {0}")]
    Open(String),
    #[error("Serial device is locked by another process: {0}")]
    Locked(String),
    #[error("Communication timeout")]
    Timeout,
    #[error("Short write: {0} bytes")]
    ShortWrite(usize),
    #[error("Invalid response received: {0}")]
    InvalidResponse(FrameError),
    #[error("No conversion known for register address {0}")]
    UnknownRegister(u16),
    #[error("Invalid range")]
    InvalidRange,
}

impl<I: embedded_io::Error> From<FrameError> for Error<I> {
    fn from(err: FrameError) -> Self {
        Error::InvalidResponse(err)
    }
}
