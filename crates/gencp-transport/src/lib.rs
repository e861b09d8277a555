//! Byte-stream transports for GenCP devices.
//!
//! A GenCP control channel is a plain byte stream with a coarse per-read
//! timeout. This crate provides:
//! - the [`Transport`] trait the packet layer is written against
//! - [`Link`], a connected stream backed by a serial TTY or a Unix socket
//! - [`UnixDomainSocket`] for serial-over-socket bridges and simulators
//!
//! This is the lowest layer. Everything else builds on [`Transport`].

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod serial;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::{Link, Transport};

#[cfg(unix)]
pub use serial::{SerialConfig, SerialPort};
#[cfg(unix)]
pub use uds::UnixDomainSocket;

/// Open a device path as a [`Link`].
///
/// Character devices are opened as serial ports with `config`; any other
/// path is treated as a listening Unix-domain socket (e.g. a ser2net-style
/// bridge or `gencp simulate`).
#[cfg(unix)]
pub fn open(path: impl AsRef<std::path::Path>, config: &SerialConfig) -> Result<Link> {
    use std::os::unix::fs::FileTypeExt;

    let path = path.as_ref();
    let metadata = std::fs::metadata(path).map_err(|source| TransportError::Connect {
        path: path.to_path_buf(),
        source,
    })?;

    if metadata.file_type().is_char_device() {
        Ok(Link::from_serial(SerialPort::open(path, config)?))
    } else {
        UnixDomainSocket::connect(path)
    }
}
