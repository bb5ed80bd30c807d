//! Wire format of the PLxx serial protocol.
//!
//! Every transaction starts with a fixed 4-byte request frame:
//!
//! | byte | content                      |
//! |------|------------------------------|
//! | 0    | command                      |
//! | 1    | RAM / EEPROM address         |
//! | 2    | value (write commands only)  |
//! | 3    | `255 - command`              |
//!
//! The trailing checksum is the one's complement of the command byte only. Address and value
//! are not covered, so a corrupted address byte goes undetected by the controller. This is a
//! property of the vendor protocol, not a full-frame CRC.
//!
//! Read commands are answered with at least two bytes: the acknowledgement byte [`ACK`]
//! followed by the register value. Write commands are not answered.

use strum_macros::{EnumIter, FromRepr};
use thiserror::Error;

/// Leading byte of every valid response.
pub const ACK: u8 = 200;

/// Length of a request frame.
pub const REQUEST_LEN: usize = 4;

/// Minimum length of a read response (`[ACK, value]`).
pub const RESPONSE_LEN: usize = 2;

/// Commands understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, FromRepr)]
#[repr(u8)]
pub enum Command {
    /// Read one byte from processor RAM.
    ReadRam = 20,
    /// Read one byte from EEPROM.
    ReadEeprom = 72,
    /// Write one byte to processor RAM. Not acknowledged.
    WriteRam = 152,
    /// Write one byte to EEPROM. Not acknowledged.
    WriteEeprom = 202,
    /// Emulate a short or long push of the front panel button.
    Push = 87,
}

impl Command {
    /// Whether the controller replies to this command.
    pub const fn expects_reply(self) -> bool {
        matches!(self, Command::ReadRam | Command::ReadEeprom)
    }

    /// Checksum byte that terminates a frame carrying this command.
    pub const fn checksum(self) -> u8 {
        255 - self as u8
    }
}

impl From<Command> for u8 {
    fn from(value: Command) -> Self {
        value as u8
    }
}

/// Problems found while decoding a frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {0} bytes")]
    Short(usize),
    #[error("Unexpected leading byte: expected {expected}, received {received}")]
    BadLeadingByte { expected: u8, received: u8 },
    #[error("Checksum mismatch: command {command} checksum {checksum}")]
    BadChecksum { command: u8, checksum: u8 },
    #[error("Unknown command {0}")]
    UnknownCommand(u8),
}

/// One request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub address: u8,
    pub value: u8,
}

impl Request {
    /// Request reading `address` from RAM.
    pub const fn read_ram(address: u8) -> Self {
        Self {
            command: Command::ReadRam,
            address,
            value: 0,
        }
    }

    /// Request reading `address` from EEPROM.
    pub const fn read_eeprom(address: u8) -> Self {
        Self {
            command: Command::ReadEeprom,
            address,
            value: 0,
        }
    }

    /// Request writing `value` to RAM at `address`.
    pub const fn write_ram(address: u8, value: u8) -> Self {
        Self {
            command: Command::WriteRam,
            address,
            value,
        }
    }

    /// Serialise the frame.
    pub const fn encode(&self) -> [u8; REQUEST_LEN] {
        [
            self.command as u8,
            self.address,
            self.value,
            self.command.checksum(),
        ]
    }

    /// Parse a captured request frame, recovering the command from its checksum.
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() < REQUEST_LEN {
            return Err(FrameError::Short(frame.len()));
        }
        let checksum = frame[3];
        let command = 255 - checksum;
        if frame[0] != command {
            return Err(FrameError::BadChecksum {
                command: frame[0],
                checksum,
            });
        }
        let command = Command::from_repr(command).ok_or(FrameError::UnknownCommand(command))?;
        Ok(Self {
            command,
            address: frame[1],
            value: frame[2],
        })
    }
}

/// Extract the register value from a read response.
///
/// Bytes past the value are ignored.
pub fn decode_response(frame: &[u8]) -> Result<u8, FrameError> {
    match frame {
        [ACK, value, ..] => Ok(*value),
        [received, _, ..] => Err(FrameError::BadLeadingByte {
            expected: ACK,
            received: *received,
        }),
        _ => Err(FrameError::Short(frame.len())),
    }
}
