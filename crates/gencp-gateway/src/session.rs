//! The ASCII gateway state machine.
//!
//! A [`GatewaySession`] performs no I/O. `write_command` turns a text line
//! into a request packet; the caller sends it and later hands the raw
//! acknowledgement to `read_response`, which formats one response line and
//! delivers it in chunks no larger than the caller's buffer. Whatever does
//! not fit is kept and returned by the following reads.

use bytes::{Buf, Bytes, BytesMut};
use gencp_packet::{
    encode_read_request, encode_write_request, extract_bytes, extract_value, validate_write_ack,
    GenCpError,
};
use tracing::{debug, warn};

use crate::command::{parse, Command, ValueKind};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::sequencer::RequestSequencer;

/// Input resynchronization state.
///
/// Any validation failure or timeout moves to `AwaitingFlush`; the next
/// write drains stale transport input first and returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resync {
    #[default]
    Idle,
    AwaitingFlush,
}

/// How the pending acknowledgement will be formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// WriteMem acknowledgement, shown as `OK`.
    Ack,
    String,
    Unsigned,
    Float,
}

/// What the session expects back for the request in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedResponse {
    pub kind: ResponseKind,
    /// Bytes for strings, value width for numbers, 0 for acks.
    pub element_count: usize,
    /// Size of the acknowledgement packet.
    pub expected_len: usize,
    pub address: u64,
    pub request_id: u16,
}

/// A request packet ready to transmit.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub packet: Bytes,
    pub request_id: u16,
    /// Discard pending transport input before sending.
    pub flush_input: bool,
}

/// Result of one read-side call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    pub bytes_read: usize,
    /// Set only on the call that delivers the last byte of a response.
    pub end_of_message: bool,
}

/// Per-channel gateway state: request ids, the request in flight, and the
/// undelivered tail of the last response.
#[derive(Debug)]
pub struct GatewaySession {
    config: GatewayConfig,
    sequencer: RequestSequencer,
    last_request: Option<Bytes>,
    expected: Option<ExpectedResponse>,
    pending: BytesMut,
    resync: Resync,
}

impl Default for GatewaySession {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

impl GatewaySession {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            pending: BytesMut::with_capacity(config.max_response),
            config,
            sequencer: RequestSequencer::new(),
            last_request: None,
            expected: None,
            resync: Resync::Idle,
        }
    }

    /// Parse a command line and build its request packet.
    ///
    /// Any undelivered response text is discarded and a request still in
    /// flight is abandoned. A line that does not parse leaves no request
    /// outstanding and asks for a flush before the next send.
    pub fn write_command(&mut self, line: &str) -> Result<OutboundRequest> {
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "discarding undelivered response");
            self.pending.clear();
        }
        if let Some(stale) = self.expected.take() {
            warn!(
                request_id = stale.request_id,
                "new command before previous response was read"
            );
            self.sequencer.abandon();
            self.resync = Resync::AwaitingFlush;
        }

        let command = match parse(line, self.config.codec.max_payload) {
            Ok(command) => command,
            Err(err) => {
                debug!(%err, "rejected command");
                self.resync = Resync::AwaitingFlush;
                return Err(err.into());
            }
        };

        let flush_input = self.resync == Resync::AwaitingFlush;
        self.resync = Resync::Idle;

        let request_id = self.sequencer.issue()?;
        let mut packet = BytesMut::new();
        let expected = match &command {
            Command::Read { address, kind } => {
                let size = kind.byte_len();
                encode_read_request(request_id, *address, size as u16, &mut packet);
                let response_kind = match kind {
                    ValueKind::String { .. } => ResponseKind::String,
                    ValueKind::Unsigned { .. } => ResponseKind::Unsigned,
                    ValueKind::Float { .. } => ResponseKind::Float,
                };
                ExpectedResponse {
                    kind: response_kind,
                    element_count: size,
                    expected_len: gencp_packet::HEADER_SIZE + size,
                    address: *address,
                    request_id,
                }
            }
            Command::Write { address, value } => {
                if let Err(err) = encode_write_request(
                    request_id,
                    *address,
                    &value.payload(),
                    self.config.codec.max_payload,
                    &mut packet,
                ) {
                    self.sequencer.abandon();
                    self.resync = Resync::AwaitingFlush;
                    return Err(err.into());
                }
                ExpectedResponse {
                    kind: ResponseKind::Ack,
                    element_count: 0,
                    expected_len: gencp_packet::HEADER_SIZE + gencp_packet::WRITE_ACK_SCD_SIZE,
                    address: *address,
                    request_id,
                }
            }
        };

        let packet = packet.freeze();
        self.expected = Some(expected);
        self.last_request = Some(packet.clone());
        debug!(request_id, flush_input, "built request");

        Ok(OutboundRequest {
            packet,
            request_id,
            flush_input,
        })
    }

    /// Consume the acknowledgement for the request in flight and deliver
    /// the formatted response into `dst`.
    ///
    /// Undelivered text from an earlier response is returned first, and
    /// `ack` is ignored in that case. Validation failures are reported
    /// in-band as an `ERR` line and move the session to
    /// [`Resync::AwaitingFlush`].
    pub fn read_response(&mut self, ack: &[u8], dst: &mut [u8]) -> Result<ReadOutcome> {
        if !self.pending.is_empty() {
            return Ok(self.read_pending(dst));
        }
        let expected = self.expected.take().ok_or(GatewayError::NothingOutstanding)?;
        self.sequencer.settle();

        let text = match self.format_ack(&expected, ack) {
            Ok(text) => text,
            Err(err) => {
                warn!(request_id = expected.request_id, %err, "acknowledgement rejected");
                self.resync = Resync::AwaitingFlush;
                format_error(err.code())
            }
        };
        Ok(self.deliver(text, dst))
    }

    /// Abandon the request in flight and deliver an `ERR` line for `err`.
    pub fn fail(&mut self, err: &GenCpError, dst: &mut [u8]) -> ReadOutcome {
        if let Some(expected) = self.expected.take() {
            warn!(request_id = expected.request_id, %err, "request failed");
        }
        self.sequencer.abandon();
        self.resync = Resync::AwaitingFlush;
        self.deliver(format_error(err.code()), dst)
    }

    /// Abandon the request in flight without producing a response.
    pub fn abort(&mut self) {
        self.expected = None;
        self.sequencer.abandon();
        self.resync = Resync::AwaitingFlush;
    }

    /// Deliver up to `dst.len()` bytes of undelivered response text.
    pub fn read_pending(&mut self, dst: &mut [u8]) -> ReadOutcome {
        if self.pending.is_empty() {
            return ReadOutcome {
                bytes_read: 0,
                end_of_message: false,
            };
        }
        let n = self.pending.len().min(dst.len());
        dst[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        ReadOutcome {
            bytes_read: n,
            end_of_message: self.pending.is_empty(),
        }
    }

    /// Whether response text is waiting to be delivered.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The request awaiting an acknowledgement, if any.
    pub fn expected(&self) -> Option<&ExpectedResponse> {
        self.expected.as_ref()
    }

    /// The last request packet built.
    pub fn last_request(&self) -> Option<&Bytes> {
        self.last_request.as_ref()
    }

    pub fn resync_state(&self) -> Resync {
        self.resync
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn format_ack(
        &self,
        expected: &ExpectedResponse,
        ack: &[u8],
    ) -> std::result::Result<String, GenCpError> {
        let max = self.config.codec.max_payload;
        let id = expected.request_id;
        let addr = expected.address;

        Ok(match (expected.kind, expected.element_count) {
            (ResponseKind::Ack, _) => {
                validate_write_ack(ack, id, max)?;
                "OK\n".to_string()
            }
            (ResponseKind::String, count) => {
                let mut buf = vec![0u8; count];
                let n = extract_bytes(ack, id, max, &mut buf)?;
                let text = &buf[..n];
                let end = text.iter().position(|b| *b == 0).unwrap_or(text.len());
                format!("R0x{addr:X}={}\n", String::from_utf8_lossy(&text[..end]))
            }
            (ResponseKind::Unsigned, 2) => {
                let value = extract_value::<u16>(ack, id, max)?;
                format_unsigned(addr, value.into(), 2)
            }
            (ResponseKind::Unsigned, 4) => {
                let value = extract_value::<u32>(ack, id, max)?;
                format_unsigned(addr, value.into(), 4)
            }
            (ResponseKind::Unsigned, _) => {
                format_unsigned(addr, extract_value::<u64>(ack, id, max)?, 8)
            }
            (ResponseKind::Float, 4) => {
                let value = extract_value::<f32>(ack, id, max)?;
                format!("R0x{addr:X}={:.6}\n", f64::from(value))
            }
            (ResponseKind::Float, _) => {
                let value = extract_value::<f64>(ack, id, max)?;
                format!("R0x{addr:X}={value:.6}\n")
            }
        })
    }

    fn deliver(&mut self, mut text: String, dst: &mut [u8]) -> ReadOutcome {
        if text.len() > self.config.max_response {
            warn!(
                len = text.len(),
                max = self.config.max_response,
                "response cut to maximum size"
            );
            let mut cut = self.config.max_response.saturating_sub(1);
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push('\n');
        }

        let bytes = text.as_bytes();
        let n = bytes.len().min(dst.len());
        dst[..n].copy_from_slice(&bytes[..n]);
        self.pending.clear();
        self.pending.extend_from_slice(&bytes[n..]);
        ReadOutcome {
            bytes_read: n,
            end_of_message: self.pending.is_empty(),
        }
    }
}

fn format_unsigned(addr: u64, value: u64, width: usize) -> String {
    format!(
        "R0x{addr:X}={value} (0x{value:0digits$X})\n",
        digits = width * 2
    )
}

/// Format an error response for a 12-bit status code.
pub fn format_error(code: u16) -> String {
    format!("ERR {code} (0x{code:X})\n")
}
