use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Read timeout used while waiting without a caller deadline.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Serial line settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    /// Line speed in bits per second. Default: 115200.
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { baud_rate: 115_200 }
    }
}

/// A serial TTY in raw 8N1 mode for GenCP traffic.
pub struct SerialPort {
    port: serial2::SerialPort,
    path: PathBuf,
    read_timeout: Option<Duration>,
}

impl SerialPort {
    /// Open and configure a serial device.
    pub fn open(path: impl AsRef<Path>, config: &SerialConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let port = serial2::SerialPort::open(&path, config.baud_rate).map_err(|source| {
            TransportError::Connect {
                path: path.clone(),
                source,
            }
        })?;

        info!(?path, baud = config.baud_rate, "opened serial port");
        Ok(Self {
            port,
            path,
            read_timeout: None,
        })
    }

    /// The device path this port was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a second handle to the same port.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            port: self.port.try_clone()?,
            path: self.path.clone(),
            read_timeout: None,
        })
    }

    pub(crate) fn write_bytes(&mut self, data: &[u8]) -> Result<usize> {
        loop {
            match self.port.write(data) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout(&err) => return Ok(0),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Read what arrives within `timeout`; `None` waits until data arrives.
    pub(crate) fn read_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.apply_read_timeout(timeout.unwrap_or(IDLE_WAIT))?;
        loop {
            match self.port.read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout(&err) && timeout.is_none() => continue,
                Err(err) if is_timeout(&err) => return Ok(0),
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub(crate) fn discard_input(&mut self) -> Result<usize> {
        self.port.discard_input_buffer()?;
        debug!(path = ?self.path, "discarded serial input buffer");
        Ok(0)
    }

    fn apply_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        if self.read_timeout != Some(timeout) {
            self.port.set_read_timeout(timeout)?;
            self.read_timeout = Some(timeout);
        }
        Ok(())
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("path", &self.path)
            .finish()
    }
}
