//! Serial device access on top of `serialport`.
//!
//! The controller link runs at 8N1 with no flow control. Every open takes an exclusive
//! advisory lock (`flock`) on the device so that two bridges cannot interleave frames on the
//! same line. The lock is released when the handle closes.

use std::os::fd::AsRawFd;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits, TTYPort};
use tracing::warn;

use crate::{error::Error, transport::Connector};

/// How long a read waits for the controller.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Baud rates the controller can be configured for.
pub const SUPPORTED_BAUD_RATES: [u32; 4] = [300, 1200, 2400, 9600];

/// An open, locked serial device.
pub struct PortWrapper(TTYPort);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            // serialport reports an expired poll as WouldBlock on some platforms.
            std::io::ErrorKind::WouldBlock => embedded_io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            std::io::ErrorKind::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

/// Opens the configured serial device.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    device: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device: device.into(),
            baud_rate,
        }
    }
}

impl Connector for SerialConnector {
    type Port = PortWrapper;

    fn open(&mut self) -> Result<PortWrapper, Error<IoError>> {
        let port = serialport::new(&self.device, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open_native()
            .map_err(|e| Error::Open(format!("{}: {e}", self.device)))?;

        lock_exclusive(&port).map_err(|e| {
            if e.raw_os_error() == Some(libc::EWOULDBLOCK) {
                Error::Locked(self.device.clone())
            } else {
                Error::Open(format!("{}: flock: {e}", self.device))
            }
        })?;

        // Drop anything left over from an aborted transaction.
        if let Err(e) = port.clear(ClearBuffer::Input) {
            warn!(device = %self.device, "unable to flush input buffer: {e}");
        }

        Ok(PortWrapper(port))
    }

    fn discard_input(&mut self, port: &mut PortWrapper) -> Result<(), Error<IoError>> {
        port.0
            .clear(ClearBuffer::Input)
            .map_err(|e| Error::SerialError(IoError(e.into())))
    }

    fn describe(&self) -> &str {
        &self.device
    }
}

/// Non-blocking exclusive lock. Contention is reported as `EWOULDBLOCK`.
fn lock_exclusive(port: &TTYPort) -> std::io::Result<()> {
    // SAFETY: the descriptor is owned by `port` and stays valid for the duration of the call.
    let rc = unsafe { libc::flock(port.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
