//! We use this mocking module in unit tests to emulate the controller's serial port.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use thiserror::Error;

use crate::{error, transport::Connector};

/// Shared record of every byte written, surviving the port being dropped on close.
type WriteLog = Rc<RefCell<Vec<u8>>>;

/// Our mock type used to emulate a serial port.
pub struct MockSerial {
    /// Bytes written to the mock serial port
    write_log: WriteLog,
    /// Buffer containing pre-configured response data to be read
    read_buffer: heapless::Vec<u8, 256>,
    /// Replies released into the read buffer, one per flushed request
    replies: VecDeque<Vec<u8>>,
    /// Current position in the read buffer
    read_position: usize,
    /// Flag to simulate write errors
    should_error_on_write: bool,
    /// Flag to simulate read errors
    should_error_on_read: bool,
}

#[derive(Error, Debug)]
pub enum MockSerialError {
    /// Simulated timeout, also returned once the scripted data runs out
    #[error("Mock read timed out")]
    Timeout,
    /// Simulated buffer overflow
    #[error("Mock read buffer overflow")]
    BufferOverflow,
    /// Generic simulated error for testing
    #[error("Simulated serial error")]
    SimulatedError,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::Timeout => embedded_io::ErrorKind::TimedOut,
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        self.write_log.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    /// A flushed request makes the controller's next reply readable.
    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        if let Some(reply) = self.replies.pop_front() {
            self.read_buffer
                .extend_from_slice(&reply)
                .map_err(|_| MockSerialError::BufferOverflow)?;
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }

        // A real port blocks until its read timeout expires.
        if self.read_position >= self.read_buffer.len() {
            return Err(MockSerialError::Timeout);
        }

        let available_bytes = self.read_buffer.len() - self.read_position;
        let bytes_to_read = core::cmp::min(buf.len(), available_bytes);

        buf[..bytes_to_read].copy_from_slice(
            &self.read_buffer[self.read_position..self.read_position + bytes_to_read],
        );

        self.read_position += bytes_to_read;
        Ok(bytes_to_read)
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with empty buffers
    pub fn new() -> Self {
        Self {
            write_log: WriteLog::default(),
            read_buffer: heapless::Vec::new(),
            replies: VecDeque::new(),
            read_position: 0,
            should_error_on_write: false,
            should_error_on_read: false,
        }
    }

    /// Set the data that will be returned when read() is called
    pub fn set_read_data(&mut self, data: &[u8]) -> Result<(), MockSerialError> {
        self.read_buffer.clear();
        self.read_position = 0;
        self.read_buffer
            .extend_from_slice(data)
            .map_err(|_| MockSerialError::BufferOverflow)
    }

    /// Queue the reply to the next request that is flushed
    pub fn queue_reply(&mut self, reply: &[u8]) {
        self.replies.push_back(reply.to_vec());
    }

    /// Drop everything readable that has not been read yet
    pub fn discard_unread(&mut self) {
        self.read_buffer.clear();
        self.read_position = 0;
    }

    /// Get a copy of the data that was written to this mock serial port
    pub fn written_data(&self) -> Vec<u8> {
        self.write_log.borrow().clone()
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }
}

/// Hands out scripted [`MockSerial`] ports, one per open.
pub struct MockConnector {
    ports: VecDeque<MockSerial>,
    opened: Vec<WriteLog>,
    locked: bool,
}

impl MockConnector {
    pub fn with_ports(ports: impl IntoIterator<Item = MockSerial>) -> Self {
        Self {
            ports: ports.into_iter().collect(),
            opened: Vec::new(),
            locked: false,
        }
    }

    /// Simulate another process holding the device lock.
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// How many times the transport opened the device.
    pub fn opens(&self) -> usize {
        self.opened.len()
    }

    /// Everything written to the most recently opened port.
    pub fn last_written(&self) -> Option<Vec<u8>> {
        self.opened.last().map(|log| log.borrow().clone())
    }
}

impl Connector for MockConnector {
    type Port = MockSerial;

    fn open(&mut self) -> error::Result<MockSerial, MockSerialError> {
        if self.locked {
            return Err(error::Error::Locked(self.describe().to_string()));
        }
        let port = self
            .ports
            .pop_front()
            .ok_or_else(|| error::Error::Open("no scripted port left".to_string()))?;
        self.opened.push(Rc::clone(&port.write_log));
        Ok(port)
    }

    fn discard_input(&mut self, port: &mut MockSerial) -> error::Result<(), MockSerialError> {
        port.discard_unread();
        Ok(())
    }

    fn describe(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error as _, Read, Write};

    #[test]
    fn test_write_multiple_times() {
        let mut mock = MockSerial::new();
        mock.write(&[20, 50]).unwrap();
        mock.write(&[0, 235]).unwrap();
        assert_eq!(mock.written_data(), [20, 50, 0, 235]);
    }

    #[test]
    fn test_read_partial_data() {
        let mut mock = MockSerial::new();
        mock.set_read_data(&[200, 1, 200, 2]).unwrap();

        let mut buffer = [0u8; 2];
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert_eq!(buffer, [200, 1]);
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert_eq!(buffer, [200, 2]);
    }

    #[test]
    fn test_read_timeout_after_data_exhausted() {
        let mut mock = MockSerial::new();
        mock.set_read_data(&[200]).unwrap();

        let mut buffer = [0u8; 10];
        // First read should succeed
        assert_eq!(mock.read(&mut buffer).unwrap(), 1);

        // Second read should time out
        let result = mock.read(&mut buffer);
        assert!(matches!(result, Err(MockSerialError::Timeout)));
    }

    #[test]
    fn test_error_simulation() {
        let mut mock = MockSerial::new();
        mock.set_read_data(&[200, 1]).unwrap();
        mock.set_write_error(true);
        mock.set_read_error(true);

        assert!(matches!(mock.write(b"test"), Err(MockSerialError::SimulatedError)));
        assert!(matches!(mock.flush(), Err(MockSerialError::SimulatedError)));
        assert!(mock.written_data().is_empty()); // Nothing should be written

        let mut buffer = [0u8; 2];
        assert!(matches!(mock.read(&mut buffer), Err(MockSerialError::SimulatedError)));
    }

    #[test]
    fn test_error_kinds() {
        assert!(matches!(MockSerialError::Timeout.kind(), embedded_io::ErrorKind::TimedOut));
        assert!(matches!(MockSerialError::BufferOverflow.kind(), embedded_io::ErrorKind::OutOfMemory));
        assert!(matches!(MockSerialError::SimulatedError.kind(), embedded_io::ErrorKind::Other));
    }

    #[test]
    fn test_set_read_data_buffer_overflow() {
        let mut mock = MockSerial::new();
        let result = mock.set_read_data(&[0u8; 300]); // Larger than 256 byte capacity
        assert!(matches!(result, Err(MockSerialError::BufferOverflow)));
    }

    #[test]
    fn test_connector_hands_out_ports_in_order() {
        let mut first = MockSerial::new();
        first.set_read_data(&[1]).unwrap();
        let mut connector = MockConnector::with_ports([first, MockSerial::new()]);

        let mut port = connector.open().unwrap();
        let mut buffer = [0u8; 1];
        assert_eq!(port.read(&mut buffer).unwrap(), 1);
        assert_eq!(buffer, [1]);

        let mut port = connector.open().unwrap();
        port.write(&[9]).unwrap();
        assert_eq!(connector.opens(), 2);
        assert_eq!(connector.last_written().unwrap(), [9]);

        // The script is exhausted.
        assert!(matches!(connector.open(), Err(error::Error::Open(_))));
    }

    #[test]
    fn test_reply_released_on_flush() {
        let mut mock = MockSerial::new();
        mock.queue_reply(&[200, 5]);

        let mut buffer = [0u8; 2];
        assert!(matches!(mock.read(&mut buffer), Err(MockSerialError::Timeout)));

        mock.write(&[20, 50, 0, 235]).unwrap();
        mock.flush().unwrap();
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert_eq!(buffer, [200, 5]);
    }

    #[test]
    fn test_discard_unread() {
        let mut mock = MockSerial::new();
        mock.set_read_data(&[99, 98]).unwrap();
        mock.discard_unread();

        let mut buffer = [0u8; 2];
        assert!(matches!(mock.read(&mut buffer), Err(MockSerialError::Timeout)));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(MockSerialError::Timeout.to_string(), "Mock read timed out");
    }
}
