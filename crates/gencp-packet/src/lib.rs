//! GenCP packet codec.
//!
//! Every GenCP packet on a serial-style channel is laid out as:
//! - an 8-byte prefix (preamble `0x0100`, CCD checksum, SCD checksum, channel id)
//! - an 8-byte common command data block (flags or status, command id,
//!   SCD length, request id)
//! - a variable specific command data block (address, size, payload)
//!
//! All multi-byte fields are big-endian. The codec functions are pure; the
//! [`PacketStream`] type layers them over a [`gencp_transport::Transport`].

pub mod checksum;
pub mod codec;
pub mod command;
pub mod error;
pub mod status;
pub mod stream;

pub use checksum::{checksum16, Checksum16};
pub use codec::{
    decode_packet, decode_request, encode_pending_ack, encode_read_ack, encode_read_request,
    encode_write_ack, encode_write_request, extract_bytes, extract_value, parse_pending_ack,
    validate_read_ack, validate_write_ack, Ack, CodecConfig, Header, Payload, Register, Request,
    ADDRESS_SIZE, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAX_SCD_LEN, PREAMBLE, READ_REQUEST_SCD_SIZE,
    WRITE_ACK_SCD_SIZE,
};
pub use error::{GenCpError, Result};
pub use status::{Namespace, Status, StatusCode};
pub use stream::{PacketStream, StreamConfig};
