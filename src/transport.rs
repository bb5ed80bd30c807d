use embedded_io::Write as _;
use tracing::{debug, trace, warn};

use crate::{
    error::{Error, Result},
    protocol::{self, FrameError, REQUEST_LEN, RESPONSE_LEN, Request},
    register::{self, PackedAddress, PlRegister},
};

/// Error type produced by the ports of a [`Connector`].
pub type PortError<C> = <<C as Connector>::Port as embedded_io::ErrorType>::Error;

/// Opens the serial interface on demand.
///
/// The transport calls [`Connector::open`] on first use and again after any failed
/// transaction, so an implementation must be able to open the device repeatedly.
pub trait Connector {
    type Port: embedded_io::Read + embedded_io::Write;

    /// Open and lock the device.
    fn open(&mut self) -> Result<Self::Port, PortError<Self>>;

    /// Drop any input left over on an open port. Runs before every request.
    fn discard_input(&mut self, port: &mut Self::Port) -> Result<(), PortError<Self>>;

    /// Human readable name of the device, for log lines.
    fn describe(&self) -> &str;
}

/// Request/response transport for one PLxx controller.
///
/// We generally use the nomenclature that "read" means fetching a register value and "write"
/// means storing one. There is no retry in here: a failed transaction closes the handle and
/// returns the error, retry policy belongs to the caller.
pub struct PlTransport<C: Connector> {
    connector: C,
    port: Option<C::Port>,
}

impl<C: Connector> PlTransport<C> {
    /// Create a new transport. Nothing is opened until the first transaction.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            port: None,
        }
    }

    /// Whether the serial handle is currently open.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Release the serial handle (and with it the device lock).
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(device = self.connector.describe(), "serial device closed");
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Read a single byte from controller RAM.
    ///
    /// The wire frame carries no device address; `device_id` only identifies the controller
    /// in log lines.
    pub fn read_register(&mut self, device_id: u8, address: u8) -> Result<u8, PortError<C>> {
        match PlRegister::from_repr(address) {
            Some(register) => trace!(device_id, ?register, "read RAM"),
            None => trace!(device_id, address, "read RAM"),
        }
        self.read(Request::read_ram(address))
    }

    /// Read a single byte from controller EEPROM.
    pub fn read_eeprom(&mut self, address: u8) -> Result<u8, PortError<C>> {
        self.read(Request::read_eeprom(address))
    }

    /// Read the LSB and then the MSB of a two-byte quantity.
    ///
    /// __Note:__ these are two independent transactions. The controller may update the value
    /// between them, so the pair can be inconsistent. Reading stops at the first failure.
    pub fn read_register_pair(
        &mut self,
        lsb_addr: u8,
        msb_addr: u8,
    ) -> Result<(u8, u8), PortError<C>> {
        let lsb = self.read(Request::read_ram(lsb_addr))?;
        let msb = self.read(Request::read_ram(msb_addr))?;
        Ok((lsb, msb))
    }

    /// Read and combine a two-byte quantity addressed by a packed tag address.
    pub fn read_packed(&mut self, device_id: u8, address: u16) -> Result<f64, PortError<C>> {
        let entry = register::lookup_packed(address).ok_or(Error::UnknownRegister(address))?;
        trace!(device_id, address, name = entry.name, "read register pair");
        let PackedAddress { lsb, msb } = entry.address;
        let (lsb, msb) = self.read_register_pair(lsb, msb)?;
        Ok(entry.class.combine(lsb, msb))
    }

    /// Read the raw value behind a tag address, single byte or packed pair.
    pub fn read_value(&mut self, device_id: u8, address: u16) -> Result<f64, PortError<C>> {
        match u8::try_from(address) {
            Ok(address) => self.read_register(device_id, address).map(f64::from),
            Err(_) => self.read_packed(device_id, address),
        }
    }

    /// Write a single byte to controller RAM.
    ///
    /// The controller does not acknowledge writes, success only means the frame went out.
    pub fn write_register(&mut self, address: u8, value: u8) -> Result<(), PortError<C>> {
        self.transaction(Request::write_ram(address, value))
            .map(|_| ())
    }

    fn read(&mut self, request: Request) -> Result<u8, PortError<C>> {
        debug_assert!(request.command.expects_reply());
        self.transaction(request)?.ok_or(Error::InvalidRange)
    }

    /// Run one request, closing the handle if anything goes wrong.
    fn transaction(&mut self, request: Request) -> Result<Option<u8>, PortError<C>> {
        let result = self.exchange(request);
        if let Err(err) = &result {
            debug!(
                device = self.connector.describe(),
                command = ?request.command,
                address = request.address,
                "transaction failed: {err}"
            );
            self.close();
        }
        result
    }

    fn exchange(&mut self, request: Request) -> Result<Option<u8>, PortError<C>> {
        let port = match self.port {
            Some(ref mut port) => port,
            None => {
                let port = self.connector.open().inspect_err(|e| {
                    warn!(device = self.connector.describe(), "unable to open serial device: {e}")
                })?;
                debug!(device = self.connector.describe(), "serial device opened");
                self.port.insert(port)
            }
        };

        // A late or oversized reply must not be taken for the answer to this request.
        self.connector.discard_input(port)?;

        let frame = request.encode();
        let written = port.write(&frame).map_err(Error::SerialError)?;
        if written != REQUEST_LEN {
            return Err(Error::ShortWrite(written));
        }
        port.flush().map_err(Error::SerialError)?;

        if !request.command.expects_reply() {
            return Ok(None);
        }
        read_reply(port).map(Some)
    }
}

/// Wait for a `[ACK, value]` reply. The port's read timeout bounds every wait.
fn read_reply<P: embedded_io::Read>(port: &mut P) -> Result<u8, P::Error> {
    use embedded_io::Error as _;

    let mut buff: heapless::Vec<u8, RESPONSE_LEN> = heapless::Vec::new();
    let mut temp_buf = [0u8; RESPONSE_LEN];
    while buff.len() < RESPONSE_LEN {
        let wanted = RESPONSE_LEN - buff.len();
        match port.read(&mut temp_buf[..wanted]) {
            // Nothing arrived before the port gave up waiting.
            Ok(0) => return Err(Error::Timeout),
            Ok(bytes_read) => {
                if buff.extend_from_slice(&temp_buf[..bytes_read]).is_err() {
                    return Err(Error::InvalidRange);
                }
                // Fail fast on a bad leading byte rather than waiting for the value.
                if buff[0] != protocol::ACK {
                    return Err(FrameError::BadLeadingByte {
                        expected: protocol::ACK,
                        received: buff[0],
                    }
                    .into());
                }
            }
            Err(e) if e.kind() == embedded_io::ErrorKind::TimedOut => {
                return Err(Error::Timeout);
            }
            Err(e) => return Err(Error::SerialError(e)),
        }
    }
    Ok(protocol::decode_response(&buff)?)
}
