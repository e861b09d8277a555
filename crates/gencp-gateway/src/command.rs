//! The ASCII command grammar.
//!
//! ```text
//! C<count> <addr> ?          read <count> bytes as a string
//! C<count> <addr> =<text>    write <text>, zero-padded or cut to <count> bytes
//! U<bits>  <addr> ?          read an unsigned integer, bits in {16, 32, 64}
//! U<bits>  <addr> =<int>     write an integer truncated to <bits>
//! F<bits>  <addr> ?          read an IEEE float, bits in {32, 64}
//! F<bits>  <addr> =<float>   write a float
//! ```
//!
//! Integers (addresses and `U` values) follow C `%Li` rules: decimal,
//! `0x` hexadecimal or leading-`0` octal, with an optional sign.

use gencp_packet::Payload;
use tracing::debug;

/// Why a command line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command tag {0:?}")]
    UnknownTag(char),

    #[error("missing width after command tag")]
    MissingWidth,

    #[error("unsupported width {width} for {tag}")]
    UnsupportedWidth { tag: char, width: usize },

    #[error("count {count} exceeds maximum payload {max}")]
    CountTooLarge { count: usize, max: usize },

    #[error("invalid address {0:?}")]
    BadAddress(String),

    #[error("expected '?' or '=' after address")]
    MissingOperator,

    #[error("unexpected input after '?': {0:?}")]
    TrailingInput(String),

    #[error("invalid value {0:?}")]
    BadValue(String),
}

/// Shape of the value a read command expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// `len` bytes shown as text up to the first NUL.
    String { len: usize },
    /// Unsigned integer of `width` bytes.
    Unsigned { width: usize },
    /// IEEE float of `width` bytes.
    Float { width: usize },
}

impl ValueKind {
    /// Bytes requested from the device.
    pub fn byte_len(&self) -> usize {
        match *self {
            Self::String { len } => len,
            Self::Unsigned { width } | Self::Float { width } => width,
        }
    }
}

/// Value carried by a write command.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    Bytes(Vec<u8>),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl WriteValue {
    /// Borrow as a WriteMem payload.
    pub fn payload(&self) -> Payload<'_> {
        match self {
            Self::Bytes(bytes) => Payload::Bytes(bytes),
            Self::U16(v) => Payload::U16(*v),
            Self::U32(v) => Payload::U32(*v),
            Self::U64(v) => Payload::U64(*v),
            Self::F32(v) => Payload::F32(*v),
            Self::F64(v) => Payload::F64(*v),
        }
    }
}

/// A parsed gateway command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Read { address: u64, kind: ValueKind },
    Write { address: u64, value: WriteValue },
}

impl Command {
    pub fn address(&self) -> u64 {
        match self {
            Self::Read { address, .. } | Self::Write { address, .. } => *address,
        }
    }
}

/// Parse one command line. A trailing `\r\n` is ignored.
///
/// `max_payload` bounds the `C` count so a request always fits one packet.
pub fn parse(line: &str, max_payload: usize) -> Result<Command, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut chars = line.chars();
    let tag = chars.next().ok_or(ParseError::Empty)?;
    if !matches!(tag, 'C' | 'U' | 'F') {
        return Err(ParseError::UnknownTag(tag));
    }

    let rest = chars.as_str();
    let width_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if width_end == 0 {
        return Err(ParseError::MissingWidth);
    }
    let width: usize = rest[..width_end]
        .parse()
        .map_err(|_| ParseError::UnsupportedWidth { tag, width: usize::MAX })?;

    let rest = &rest[width_end..];
    if !rest.starts_with(char::is_whitespace) {
        return Err(ParseError::BadAddress(rest.to_string()));
    }
    let rest = rest.trim_start();
    let addr_end = rest
        .find(|c: char| c.is_whitespace() || c == '?' || c == '=')
        .unwrap_or(rest.len());
    let addr_token = &rest[..addr_end];
    let address = parse_c_integer(addr_token)
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| ParseError::BadAddress(addr_token.to_string()))?;

    let rest = rest[addr_end..].trim_start();
    let operand = if let Some(after) = rest.strip_prefix('?') {
        if !after.trim().is_empty() {
            return Err(ParseError::TrailingInput(after.to_string()));
        }
        None
    } else if let Some(value) = rest.strip_prefix('=') {
        Some(value)
    } else {
        return Err(ParseError::MissingOperator);
    };

    let command = match tag {
        'C' => {
            if width == 0 {
                return Err(ParseError::UnsupportedWidth { tag, width });
            }
            if width > max_payload {
                return Err(ParseError::CountTooLarge {
                    count: width,
                    max: max_payload,
                });
            }
            match operand {
                None => Command::Read {
                    address,
                    kind: ValueKind::String { len: width },
                },
                Some(text) => Command::Write {
                    address,
                    value: WriteValue::Bytes(fixed_width_text(text, width)?),
                },
            }
        }
        'U' => {
            if !matches!(width, 16 | 32 | 64) {
                return Err(ParseError::UnsupportedWidth { tag, width });
            }
            match operand {
                None => Command::Read {
                    address,
                    kind: ValueKind::Unsigned { width: width / 8 },
                },
                Some(text) => {
                    let bits = parse_unsigned_value(text)?;
                    let value = match width {
                        16 => WriteValue::U16(bits as u16),
                        32 => WriteValue::U32(bits as u32),
                        _ => WriteValue::U64(bits),
                    };
                    Command::Write { address, value }
                }
            }
        }
        _ => {
            if !matches!(width, 32 | 64) {
                return Err(ParseError::UnsupportedWidth { tag, width });
            }
            match operand {
                None => Command::Read {
                    address,
                    kind: ValueKind::Float { width: width / 8 },
                },
                Some(text) => {
                    let value: f64 = text
                        .trim()
                        .parse()
                        .map_err(|_| ParseError::BadValue(text.to_string()))?;
                    let value = if width == 32 {
                        WriteValue::F32(value as f32)
                    } else {
                        WriteValue::F64(value)
                    };
                    Command::Write { address, value }
                }
            }
        }
    };

    debug!(?command, "parsed command");
    Ok(command)
}

/// The text after `=` taken verbatim, zero-padded or cut to `count` bytes.
fn fixed_width_text(text: &str, count: usize) -> Result<Vec<u8>, ParseError> {
    if text.trim().is_empty() {
        return Err(ParseError::BadValue(text.to_string()));
    }
    let bytes = text.as_bytes();
    if bytes.len() > count {
        debug!(len = bytes.len(), count, "string value cut to register size");
    }
    let mut data = vec![0u8; count];
    let n = bytes.len().min(count);
    data[..n].copy_from_slice(&bytes[..n]);
    Ok(data)
}

/// `%Li` value reinterpreted as 64 unsigned bits; negatives wrap.
fn parse_unsigned_value(text: &str) -> Result<u64, ParseError> {
    let value = parse_c_integer(text.trim())
        .filter(|v| *v >= i128::from(i64::MIN) && *v <= i128::from(u64::MAX))
        .ok_or_else(|| ParseError::BadValue(text.to_string()))?;
    Ok(value as u64)
}

/// Parse an integer the way C's `%Li` conversion does.
fn parse_c_integer(token: &str) -> Option<i128> {
    let (negative, digits) = match token.as_bytes().first()? {
        b'-' => (true, &token[1..]),
        b'+' => (false, &token[1..]),
        _ => (false, token),
    };

    let (radix, body) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    if body.is_empty() || !body.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let magnitude = i128::try_from(u128::from_str_radix(body, radix).ok()?).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}
