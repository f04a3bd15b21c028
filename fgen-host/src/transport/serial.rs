use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::debug;
use serialport::SerialPort;

use crate::error::TransportError;
use crate::transport::Transport;

/// Prefix of serial (`ASRL`) resource strings
pub const SERIAL_PREFIX: &str = "ASRL";

/// SCPI over a serial line, newline terminated in both directions
pub struct SerialTransport {
    resource: String,
    port: Option<Box<dyn SerialPort>>,
    timeout: Duration,
}

impl SerialTransport {
    pub fn new(resource: impl Into<String>, port: Box<dyn SerialPort>, timeout: Duration) -> Self {
        Self {
            resource: resource.into(),
            port: Some(port),
            timeout,
        }
    }

    pub fn open(resource: &str, baud_rate: u32, timeout: Duration) -> Result<Self, TransportError> {
        let path = port_path(resource)
            .ok_or_else(|| TransportError::Unsupported(resource.to_owned()))?;

        debug!("Opening serial port {} at {} baud", path, baud_rate);

        let port = serialport::new(path, baud_rate).timeout(timeout).open()?;

        Ok(Self::new(resource, port, timeout))
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "serial port has been closed",
            ))
        })
    }
}

impl Transport for SerialTransport {
    fn resource_name(&self) -> &str {
        &self.resource
    }

    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let port = self.port()?;

        port.write_all(command.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;

        Ok(())
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let timeout = self.timeout;
        let resource = self.resource.clone();
        let port = self.port()?;

        let start_time = Instant::now();
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            if start_time.elapsed() > timeout {
                return Err(TransportError::Timeout(resource));
            }

            if port.bytes_to_read()? == 0 {
                continue;
            }

            if port.read(&mut byte)? == 0 {
                continue;
            }

            match byte[0] {
                b'\n' => break,
                b => line.push(b),
            }
        }

        String::from_utf8(line).map_err(|e| TransportError::MalformedResponse {
            resource,
            reason: e.to_string(),
        })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the handle closes the port
        self.port.take();
        Ok(())
    }
}

/// Maps `ASRL<port>::INSTR` onto the operating system's port name.
///
/// A numeric board (`ASRL3`) is a `COM` port on Windows; anything else is used
/// as a device path verbatim (`ASRL/dev/ttyUSB0`).
pub fn port_path(resource: &str) -> Option<String> {
    let head = resource.split("::").next()?;

    let prefix = head.get(..SERIAL_PREFIX.len())?;

    if head.len() == SERIAL_PREFIX.len() || !prefix.eq_ignore_ascii_case(SERIAL_PREFIX) {
        return None;
    }

    let port = &head[SERIAL_PREFIX.len()..];

    if cfg!(windows) && port.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("COM{}", port));
    }

    Some(port.to_owned())
}

/// Builds the resource string for an operating system port name
pub fn resource_for_port(port_name: &str) -> String {
    format!("{}{}::INSTR", SERIAL_PREFIX, port_name)
}
