use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::debug;

use crate::error::TransportError;
use crate::transport::Transport;

/// Raw SCPI socket resources, `TCPIP<board>::<host>::<port>::SOCKET`
pub struct TcpTransport {
    resource: String,
    reader: Option<BufReader<TcpStream>>,
}

impl TcpTransport {
    pub fn open(resource: &str, timeout: Duration) -> Result<Self, TransportError> {
        let (host, port) = socket_address(resource)
            .ok_or_else(|| TransportError::Unsupported(resource.to_owned()))?;

        let address = (host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TransportError::ResourceNotFound(resource.to_owned()))?;

        debug!("Connecting to {}", address);

        let stream = TcpStream::connect_timeout(&address, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;

        Ok(Self {
            resource: resource.to_owned(),
            reader: Some(BufReader::new(stream)),
        })
    }

    fn reader(&mut self) -> Result<&mut BufReader<TcpStream>, TransportError> {
        self.reader.as_mut().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                ErrorKind::NotConnected,
                "socket has been closed",
            ))
        })
    }
}

impl Transport for TcpTransport {
    fn resource_name(&self) -> &str {
        &self.resource
    }

    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let stream = self.reader()?.get_mut();

        stream.write_all(command.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        Ok(())
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let resource = self.resource.clone();
        let mut line = String::new();

        match self.reader()?.read_line(&mut line) {
            Ok(0) => Err(TransportError::Io(ErrorKind::UnexpectedEof.into())),
            Ok(_) => Ok(line.trim_end_matches(['\r', '\n']).to_owned()),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(TransportError::Timeout(resource))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(reader) = self.reader.take() {
            reader.get_ref().shutdown(Shutdown::Both)?;
        }

        Ok(())
    }
}

/// Extracts host and port from a `TCPIP…::SOCKET` resource string
pub fn socket_address(resource: &str) -> Option<(String, u16)> {
    let parts: Vec<&str> = resource.split("::").collect();

    let [board, host, port, kind] = parts.as_slice() else {
        return None;
    };

    if !board.to_ascii_uppercase().starts_with("TCPIP") || !kind.eq_ignore_ascii_case("SOCKET") {
        return None;
    }

    Some((host.to_string(), port.parse().ok()?))
}
