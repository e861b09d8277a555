//! GenCP status codes.
//!
//! On the wire an acknowledgement's status word carries an error bit
//! (`0x8000`), a two-bit namespace (`0x6000`) and a 12-bit code.

use std::fmt;

const ERROR_BIT: u16 = 0x8000;
const NAMESPACE_MASK: u16 = 0x6000;
const CODE_MASK: u16 = 0x0FFF;

/// Status taxonomy of the GenCP namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    NotImplemented,
    InvalidParameter,
    InvalidAddress,
    WriteProtected,
    BadAlignment,
    AccessDenied,
    Busy,
    MessageTimeout,
    InvalidHeader,
    WrongConfiguration,
    GenericError,
}

impl Status {
    /// The 12-bit code of this status.
    pub const fn code(self) -> u16 {
        match self {
            Self::Success => 0x000,
            Self::NotImplemented => 0x001,
            Self::InvalidParameter => 0x002,
            Self::InvalidAddress => 0x003,
            Self::WriteProtected => 0x004,
            Self::BadAlignment => 0x005,
            Self::AccessDenied => 0x006,
            Self::Busy => 0x007,
            Self::MessageTimeout => 0x00B,
            Self::InvalidHeader => 0x00E,
            Self::WrongConfiguration => 0x00F,
            Self::GenericError => 0xFFF,
        }
    }

    /// Look up a GenCP-namespace code.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code & CODE_MASK {
            0x000 => Self::Success,
            0x001 => Self::NotImplemented,
            0x002 => Self::InvalidParameter,
            0x003 => Self::InvalidAddress,
            0x004 => Self::WriteProtected,
            0x005 => Self::BadAlignment,
            0x006 => Self::AccessDenied,
            0x007 => Self::Busy,
            0x00B => Self::MessageTimeout,
            0x00E => Self::InvalidHeader,
            0x00F => Self::WrongConfiguration,
            0xFFF => Self::GenericError,
            _ => return None,
        })
    }

    /// Short upper-case name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::InvalidAddress => "INVALID_ADDRESS",
            Self::WriteProtected => "WRITE_PROTECT",
            Self::BadAlignment => "BAD_ALIGNMENT",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::Busy => "BUSY",
            Self::MessageTimeout => "MSG_TIMEOUT",
            Self::InvalidHeader => "INVALID_HEADER",
            Self::WrongConfiguration => "WRONG_CONFIG",
            Self::GenericError => "ERROR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which body defined a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Codes defined by the GenCP standard.
    GenCp,
    /// Codes defined by the transport technology.
    Technology,
    /// Codes defined by the device vendor.
    Device,
    Reserved,
}

/// A raw status word as carried in an acknowledgement's CCD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const SUCCESS: Self = Self(0);

    /// Raw wire value.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Whether the error bit is set.
    pub const fn is_error(self) -> bool {
        self.0 & ERROR_BIT != 0
    }

    /// The 12-bit code.
    pub const fn code(self) -> u16 {
        self.0 & CODE_MASK
    }

    pub const fn namespace(self) -> Namespace {
        match self.0 & NAMESPACE_MASK {
            0x0000 => Namespace::GenCp,
            0x2000 => Namespace::Technology,
            0x4000 => Namespace::Device,
            _ => Namespace::Reserved,
        }
    }

    /// The GenCP status, if this word is in the GenCP namespace and known.
    pub fn status(self) -> Option<Status> {
        match self.namespace() {
            Namespace::GenCp => Status::from_code(self.code()),
            _ => None,
        }
    }
}

impl From<Status> for StatusCode {
    fn from(status: Status) -> Self {
        match status {
            Status::Success => Self::SUCCESS,
            other => Self(ERROR_BIT | other.code()),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() {
            Some(status) => write!(f, "{status} (0x{:04X})", self.0),
            None => write!(
                f,
                "{:?} code 0x{:03X} (0x{:04X})",
                self.namespace(),
                self.code(),
                self.0
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 12] = [
        Status::Success,
        Status::NotImplemented,
        Status::InvalidParameter,
        Status::InvalidAddress,
        Status::WriteProtected,
        Status::BadAlignment,
        Status::AccessDenied,
        Status::Busy,
        Status::MessageTimeout,
        Status::InvalidHeader,
        Status::WrongConfiguration,
        Status::GenericError,
    ];

    #[test]
    fn codes_match_the_standard() {
        assert_eq!(Status::InvalidParameter.code(), 2);
        assert_eq!(Status::MessageTimeout.code(), 0xB);
        assert_eq!(Status::GenericError.code(), 0xFFF);
    }

    #[test]
    fn from_code_inverts_code() {
        for status in ALL {
            assert_eq!(Status::from_code(status.code()), Some(status));
        }
        assert_eq!(Status::from_code(0x8), None);
    }

    #[test]
    fn status_word_fields() {
        let word = StatusCode(0x8000 | 0x4000 | 0x123);
        assert!(word.is_error());
        assert_eq!(word.namespace(), Namespace::Device);
        assert_eq!(word.code(), 0x123);
        assert_eq!(word.status(), None);

        let tech = StatusCode(0xA00B);
        assert_eq!(tech.namespace(), Namespace::Technology);
        assert_eq!(tech.code(), 0xB);
    }

    #[test]
    fn error_status_sets_error_bit() {
        let word = StatusCode::from(Status::InvalidAddress);
        assert_eq!(word.raw(), 0x8003);
        assert_eq!(word.status(), Some(Status::InvalidAddress));
        assert!(!StatusCode::from(Status::Success).is_error());
    }

    #[test]
    fn display() {
        assert_eq!(StatusCode(0x8004).to_string(), "WRITE_PROTECT (0x8004)");
        assert_eq!(Status::Busy.to_string(), "BUSY");
    }
}
