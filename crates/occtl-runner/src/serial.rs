//! Local serial-port transport.

use std::io::{self, Read, Write};
use std::time::Duration;

use occtl_session::Transport;
use serialport::SerialPort;
use tracing::debug;

/// Baud rate used when none is configured.
pub const DEFAULT_BAUD: u32 = 19_200;

/// How long a blocking read or write on the port may take.
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// A [`Transport`] over a local serial port.
pub struct SerialTransport {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn open(path: &str, baud: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, baud).timeout(PORT_TIMEOUT).open()?;
        debug!("SerialTransport: opened {} at {} baud", path, baud);
        Ok(SerialTransport {
            path: path.to_string(),
            port: Some(port),
        })
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, format!("{} is closed", self.path))
        })
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let port = self.port()?;
        let waiting = port.bytes_to_read().map_err(io::Error::from)? as usize;
        if waiting == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; waiting];
        let n = port.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("SerialTransport: closed {}", self.path);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
