use fgen_proto::ScpiCommand;
use log::{debug, error, info};

use crate::error::{ConnectionError, TransportError};
use crate::resource::Device;
use crate::transport::{ResourceManager, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Failed,
}

/// An open line to one instrument.
///
/// Owns the resource manager it was created with and, while open, the
/// transport handle for its device. Both are released on [`close`] or drop,
/// whichever comes first.
///
/// [`close`]: InstrumentConnection::close
pub struct InstrumentConnection {
    device: Device,
    manager: Option<Box<dyn ResourceManager>>,
    transport: Option<Box<dyn Transport>>,
    state: ConnectionState,
    identification: Option<String>,
}

impl InstrumentConnection {
    pub fn new(device: Device, manager: Box<dyn ResourceManager>) -> Self {
        Self {
            device,
            manager: Some(manager),
            transport: None,
            state: ConnectionState::Closed,
            identification: None,
        }
    }

    /// Creates a connection and opens it
    pub fn connect(
        device: Device,
        manager: Box<dyn ResourceManager>,
    ) -> Result<Self, ConnectionError> {
        let mut connection = Self::new(device, manager);
        connection.open()?;

        Ok(connection)
    }

    /// Acquires the transport and checks the instrument answers `*IDN?`.
    ///
    /// On failure any handle acquired along the way is released before the
    /// error is returned.
    pub fn open(&mut self) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Open {
            return Ok(());
        }

        let resource = self.device.resource().to_owned();

        if let Some(e) = self.device.parse_error() {
            self.state = ConnectionState::Failed;
            return Err(ConnectionError::InvalidDevice {
                resource,
                source: e.clone(),
            });
        }

        let Some(manager) = self.manager.as_mut() else {
            self.state = ConnectionState::Failed;
            return Err(ConnectionError::Released(resource));
        };

        info!("Connecting to {}...", resource);
        self.state = ConnectionState::Opening;

        let mut transport = match manager.open_resource(&resource) {
            Ok(transport) => transport,
            Err(e) => {
                error!("Error communicating with the instrument: {}", e);
                self.state = ConnectionState::Failed;
                return Err(ConnectionError::Open {
                    resource,
                    source: e,
                });
            }
        };

        info!("Successfully connected to: {}", transport.resource_name());

        let command = ScpiCommand::Identify.to_string();
        match transport.query(&command) {
            Ok(identification) => {
                let identification = identification.trim_end().to_owned();
                info!("Instrument identification: {}", identification);

                self.identification = Some(identification);
                self.transport = Some(transport);
                self.state = ConnectionState::Open;

                Ok(())
            }
            Err(e) => {
                error!("Error communicating with the instrument: {}", e);

                if let Err(close_error) = transport.close() {
                    error!("Error during cleanup: {}", close_error);
                }

                self.state = ConnectionState::Failed;
                Err(ConnectionError::Open {
                    resource,
                    source: e,
                })
            }
        }
    }

    /// Sends `command` verbatim
    pub fn write(&mut self, command: &str) -> Result<(), ConnectionError> {
        let transport = self.transport()?;

        debug!("Sending \"{}\"", command);

        transport
            .write(command)
            .map_err(|e| Self::communication_error(&**transport, e))
    }

    /// Sends `command` and returns the response line with trailing whitespace removed
    pub fn query(&mut self, command: &str) -> Result<String, ConnectionError> {
        let transport = self.transport()?;

        debug!("Sending \"{}\"", command);

        let answer = transport
            .query(command)
            .map_err(|e| Self::communication_error(&**transport, e))?;
        let answer = answer.trim_end().to_owned();

        debug!("Answer: \"{}\"", answer);

        Ok(answer)
    }

    pub fn send(&mut self, command: ScpiCommand) -> Result<(), ConnectionError> {
        self.write(&command.to_string())
    }

    pub fn request(&mut self, command: ScpiCommand) -> Result<String, ConnectionError> {
        self.query(&command.to_string())
    }

    /// Releases the transport, then the resource manager beneath it.
    ///
    /// Release failures are logged and otherwise ignored.
    pub fn close(&mut self) {
        let had_transport = self.transport.is_some();

        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                error!("Error during cleanup: {}", e);
            }
        }

        if let Some(mut manager) = self.manager.take() {
            if let Err(e) = manager.close() {
                error!("Error during cleanup: {}", e);
            }
        }

        if had_transport {
            info!("Instrument connection closed.");
        }

        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Closed;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The `*IDN?` response received when the connection was opened
    pub fn identification(&self) -> Option<&str> {
        self.identification.as_deref()
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>, ConnectionError> {
        match self.state {
            ConnectionState::Open => self.transport.as_mut().ok_or(ConnectionError::NotConnected),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    fn communication_error(transport: &dyn Transport, source: TransportError) -> ConnectionError {
        ConnectionError::Communication {
            resource: transport.resource_name().to_owned(),
            source,
        }
    }
}

impl Drop for InstrumentConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens a connection to `device`, runs `f` against it, and closes it again
/// on every way out of `f`.
pub fn with_connection<T, E, F>(device: Device, manager: Box<dyn ResourceManager>, f: F) -> Result<T, E>
where
    F: FnOnce(&mut InstrumentConnection) -> Result<T, E>,
    E: From<ConnectionError>,
{
    let mut connection = InstrumentConnection::connect(device, manager)?;
    let result = f(&mut connection);
    connection.close();

    result
}
