use gencp_transport::TransportError;

use crate::status::{Status, StatusCode};

/// Errors raised while building, framing or validating GenCP packets.
#[derive(Debug, thiserror::Error)]
pub enum GenCpError {
    /// The packet does not start with the `0x0100` preamble.
    #[error("invalid preamble 0x{found:04X} (expected 0x0100)")]
    InvalidPreamble { found: u16 },

    /// The acknowledgement answers a different request.
    #[error("request id mismatch (expected {expected}, got {found})")]
    RequestIdMismatch { expected: u16, found: u16 },

    /// The stored CCD checksum does not match the packet contents.
    #[error("CCD checksum mismatch (computed 0x{computed:04X}, stored 0x{stored:04X})")]
    CcdChecksum {
        computed: u16,
        stored: u16,
        request_id: u16,
    },

    /// The stored SCD checksum does not match the packet contents.
    #[error("SCD checksum mismatch (computed 0x{computed:04X}, stored 0x{stored:04X})")]
    ScdChecksum {
        computed: u16,
        stored: u16,
        request_id: u16,
    },

    /// The packet carries a command id other than the one expected.
    #[error("unexpected command 0x{found:04X} (expected 0x{expected:04X})")]
    UnexpectedCommand {
        expected: u16,
        found: u16,
        request_id: u16,
    },

    /// The advertised SCD length exceeds the configured maximum.
    #[error("SCD length {len} exceeds maximum {max}")]
    ScdTooLong {
        len: usize,
        max: usize,
        request_id: Option<u16>,
    },

    /// The device answered with an error status.
    #[error("device reported {status}")]
    Device { status: StatusCode, request_id: u16 },

    /// A request payload exceeds the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The acknowledgement carries more data than the caller's buffer holds.
    #[error("acknowledgement carries {advertised} bytes but buffer holds {capacity}")]
    WouldTruncate {
        advertised: usize,
        capacity: usize,
        request_id: u16,
    },

    /// The SCD is shorter than the value being decoded from it.
    #[error("SCD holds {available} bytes, need {needed}")]
    ShortPayload { needed: usize, available: usize },

    /// The packet ends before its header or advertised SCD does.
    #[error("packet truncated ({available} bytes, need {needed})")]
    Truncated { needed: usize, available: usize },

    /// No complete acknowledgement arrived before the deadline.
    #[error("timed out waiting for acknowledgement ({buffered} bytes buffered)")]
    Timeout { buffered: usize },

    /// The peer closed the stream before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl GenCpError {
    /// Classify this error in the GenCP status taxonomy.
    ///
    /// Device errors outside the GenCP namespace, or with unknown codes,
    /// classify as [`Status::GenericError`]; [`code`](Self::code) still
    /// reports their raw 12-bit value.
    pub fn kind(&self) -> Status {
        match self {
            Self::InvalidPreamble { .. }
            | Self::RequestIdMismatch { .. }
            | Self::CcdChecksum { .. }
            | Self::ScdChecksum { .. }
            | Self::UnexpectedCommand { .. }
            | Self::ScdTooLong { .. }
            | Self::PayloadTooLarge { .. }
            | Self::WouldTruncate { .. }
            | Self::ShortPayload { .. }
            | Self::Truncated { .. } => Status::InvalidParameter,
            Self::Device { status, .. } => status.status().unwrap_or(Status::GenericError),
            Self::Timeout { .. } => Status::MessageTimeout,
            Self::ConnectionClosed | Self::Transport(_) => Status::GenericError,
        }
    }

    /// The 12-bit status code reported for this error.
    pub fn code(&self) -> u16 {
        match self {
            Self::Device { status, .. } => status.code(),
            other => other.kind().code(),
        }
    }

    /// The request id the failing packet carried, when one was read.
    pub fn request_id(&self) -> Option<u16> {
        match self {
            Self::RequestIdMismatch { found, .. } => Some(*found),
            Self::CcdChecksum { request_id, .. }
            | Self::ScdChecksum { request_id, .. }
            | Self::UnexpectedCommand { request_id, .. }
            | Self::Device { request_id, .. }
            | Self::WouldTruncate { request_id, .. } => Some(*request_id),
            Self::ScdTooLong { request_id, .. } => *request_id,
            _ => None,
        }
    }

    /// Whether this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, GenCpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failures_are_invalid_parameter() {
        let err = GenCpError::ScdChecksum {
            computed: 1,
            stored: 2,
            request_id: 9,
        };
        assert_eq!(err.kind(), Status::InvalidParameter);
        assert_eq!(err.code(), 2);
        assert_eq!(err.request_id(), Some(9));
    }

    #[test]
    fn device_status_keeps_raw_code() {
        let err = GenCpError::Device {
            status: StatusCode(0xC123),
            request_id: 4,
        };
        assert_eq!(err.kind(), Status::GenericError);
        assert_eq!(err.code(), 0x123);

        let known = GenCpError::Device {
            status: StatusCode::from(Status::WriteProtected),
            request_id: 4,
        };
        assert_eq!(known.kind(), Status::WriteProtected);
    }

    #[test]
    fn timeout_is_message_timeout() {
        let err = GenCpError::Timeout { buffered: 0 };
        assert!(err.is_timeout());
        assert_eq!(err.kind(), Status::MessageTimeout);
        assert_eq!(err.code(), 0xB);
        assert_eq!(err.request_id(), None);
    }
}
