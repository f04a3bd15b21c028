use std::time::Duration;

use log::debug;

use crate::error::TransportError;
use crate::resource::ResourceIdentifier;
use crate::transport::serial::{self, SerialTransport};
use crate::transport::tcp::TcpTransport;
use crate::transport::{matches_filter, ResourceManager, Transport};

/// Resource manager backed by the buses this machine actually has
pub struct SystemResourceManager {
    baud_rate: u32,
    timeout: Duration,
}

impl SystemResourceManager {
    pub fn new(baud_rate: u32, timeout: Duration) -> Self {
        Self { baud_rate, timeout }
    }
}

impl ResourceManager for SystemResourceManager {
    fn list_resources(&mut self, filter: &str) -> Result<Vec<String>, TransportError> {
        let mut resources = Vec::new();

        #[cfg(feature = "usbtmc")]
        resources.extend(super::usbtmc::list_resources()?);

        for port in serialport::available_ports()? {
            resources.push(serial::resource_for_port(&port.port_name));
        }

        resources.retain(|resource| matches_filter(resource, filter));

        Ok(resources)
    }

    fn open_resource(&mut self, resource: &str) -> Result<Box<dyn Transport>, TransportError> {
        let identifier = ResourceIdentifier::new(resource);
        let protocol = identifier.protocol().to_ascii_uppercase();

        debug!("Opening {} resource {}", protocol, resource);

        if protocol.starts_with(serial::SERIAL_PREFIX) {
            let transport = SerialTransport::open(resource, self.baud_rate, self.timeout)?;
            return Ok(Box::new(transport));
        }

        if protocol.starts_with("TCPIP") {
            let transport = TcpTransport::open(resource, self.timeout)?;
            return Ok(Box::new(transport));
        }

        #[cfg(feature = "usbtmc")]
        if identifier.is_usb() {
            let transport = super::usbtmc::UsbTmcTransport::open(resource, self.timeout)?;
            return Ok(Box::new(transport));
        }

        Err(TransportError::Unsupported(resource.to_owned()))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // Handles are owned by their transports, nothing is held here
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_protocols_are_unsupported() {
        let mut manager = SystemResourceManager::new(9600, Duration::from_millis(100));

        assert!(matches!(
            manager.open_resource("GPIB0::12::INSTR"),
            Err(TransportError::Unsupported(_))
        ));
    }
}
