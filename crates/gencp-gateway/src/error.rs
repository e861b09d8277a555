use gencp_packet::{GenCpError, Status};
use gencp_transport::TransportError;

use crate::command::ParseError;

/// Errors that can occur in gateway and client operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The text command did not parse. Nothing was sent.
    #[error("invalid command: {0}")]
    Parse(#[from] ParseError),

    /// Packet-level failure: validation, device status, timeout.
    #[error(transparent)]
    Codec(#[from] GenCpError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A read was attempted with no request in flight.
    #[error("no request outstanding")]
    NothingOutstanding,

    /// A new request was issued before the previous one settled.
    #[error("request {0} is still outstanding")]
    RequestOutstanding(u16),

    /// A manifest file is larger than the configured limit.
    #[error("file of {size} bytes exceeds limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    /// A memory range runs past the end of the 64-bit address space.
    #[error("{len} bytes at {address:#x} overflow the address space")]
    AddressOverflow { address: u64, len: u64 },

    /// The device reports more manifest entries than a host will list.
    #[error("manifest claims {count} entries, limit is {max}")]
    ManifestTooLarge { count: u64, max: u64 },

    /// The manifest has no entry at the requested index.
    #[error("manifest entry {index} out of range ({count} entries)")]
    NoSuchEntry { index: usize, count: u64 },
}

impl GatewayError {
    /// Classify this error in the GenCP status taxonomy.
    pub fn status(&self) -> Status {
        match self {
            Self::Parse(_)
            | Self::NoSuchEntry { .. }
            | Self::FileTooLarge { .. }
            | Self::ManifestTooLarge { .. } => Status::InvalidParameter,
            Self::AddressOverflow { .. } => Status::InvalidAddress,
            Self::Codec(err) => err.kind(),
            Self::RequestOutstanding(_) => Status::Busy,
            Self::Transport(_) | Self::NothingOutstanding => Status::GenericError,
        }
    }

    /// The 12-bit status code reported for this error.
    pub fn code(&self) -> u16 {
        match self {
            Self::Codec(err) => err.code(),
            other => other.status().code(),
        }
    }

    /// Whether this error is an acknowledgement timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Codec(err) if err.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
