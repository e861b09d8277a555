use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// A byte-stream peer carrying GenCP packets.
///
/// `read` returns `Ok(0)` when `timeout` elapses without data. With
/// `timeout = None` it blocks, and `Ok(0)` means the peer closed the
/// stream. `Some(Duration::ZERO)` polls without blocking.
pub trait Transport {
    /// Write bytes, returning how many were accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize>;

    /// Discard any input already queued on the transport.
    ///
    /// Returns the number of bytes dropped.
    fn drain_input(&mut self) -> Result<usize> {
        let mut scratch = [0u8; 256];
        let mut dropped = 0usize;
        loop {
            let n = self.read(&mut scratch, Some(Duration::ZERO))?;
            if n == 0 {
                return Ok(dropped);
            }
            dropped += n;
        }
    }

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str {
        "transport"
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        (**self).read(buf, timeout)
    }

    fn drain_input(&mut self) -> Result<usize> {
        (**self).drain_input()
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}

/// A connected device link.
///
/// On Unix this wraps either a Unix domain socket stream or a serial TTY.
pub struct Link {
    inner: LinkInner,
}

enum LinkInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(unix)]
    Serial(crate::serial::SerialPort),
}

impl Link {
    /// Create a link from a Unix domain socket stream.
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: LinkInner::Unix(stream),
        }
    }

    /// Create a link from an opened serial port.
    #[cfg(unix)]
    pub fn from_serial(port: crate::serial::SerialPort) -> Self {
        Self {
            inner: LinkInner::Serial(port),
        }
    }

    /// Try to clone this link (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            LinkInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
            #[cfg(unix)]
            LinkInner::Serial(port) => Ok(Self::from_serial(port.try_clone()?)),
        }
    }
}

impl Transport for Link {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkInner::Unix(stream) => loop {
                match stream.write(data) {
                    Ok(n) => return Ok(n),
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err.into()),
                }
            },
            #[cfg(unix)]
            LinkInner::Serial(port) => port.write_bytes(data),
        }
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkInner::Unix(stream) => read_unix(stream, buf, timeout),
            #[cfg(unix)]
            LinkInner::Serial(port) => port.read_timeout(buf, timeout),
        }
    }

    fn drain_input(&mut self) -> Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkInner::Unix(stream) => {
                let mut scratch = [0u8; 256];
                let mut dropped = 0usize;
                loop {
                    let n = read_unix(stream, &mut scratch, Some(Duration::ZERO))?;
                    if n == 0 {
                        return Ok(dropped);
                    }
                    dropped += n;
                }
            }
            #[cfg(unix)]
            LinkInner::Serial(port) => port.discard_input(),
        }
    }

    fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            LinkInner::Unix(_) => "unix-domain-socket",
            #[cfg(unix)]
            LinkInner::Serial(_) => "serial",
        }
    }
}

#[cfg(unix)]
fn read_unix(
    stream: &mut std::os::unix::net::UnixStream,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<usize> {
    let poll_only = matches!(timeout, Some(t) if t.is_zero());
    if poll_only {
        stream.set_nonblocking(true)?;
    } else {
        stream.set_read_timeout(timeout)?;
    }

    let result = loop {
        match stream.read(buf) {
            Ok(n) => break Ok(n),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                break Ok(0)
            }
            Err(err) => break Err(err.into()),
        }
    };

    if poll_only {
        stream.set_nonblocking(false)?;
    }
    result
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("type", &self.transport_name())
            .finish()
    }
}
