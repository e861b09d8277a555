use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::checksum::{Checksum16, MAX_CHECKSUM_LEN};
use crate::command::{
    FLAG_ACK_REQUESTED, PENDING_ACK, READMEM_ACK, READMEM_CMD, WRITEMEM_ACK, WRITEMEM_CMD,
};
use crate::error::{GenCpError, Result};
use crate::status::StatusCode;

/// Serial-channel packet preamble.
pub const PREAMBLE: u16 = 0x0100;

/// Prefix (8) + CCD (8).
pub const HEADER_SIZE: usize = 16;

/// Default maximum SCD data size in bytes.
pub const DEFAULT_MAX_PAYLOAD: usize = 64;

/// Width of the register address field in ReadMem/WriteMem SCDs.
pub const ADDRESS_SIZE: usize = 8;

/// ReadMem request SCD: address (8) + reserved (2) + size (2).
pub const READ_REQUEST_SCD_SIZE: usize = 12;

/// WriteMem acknowledgement SCD: reserved (2) + length written (2).
pub const WRITE_ACK_SCD_SIZE: usize = 4;

/// PendingAck SCD: reserved (2) + temporary timeout in ms (2).
pub const PENDING_ACK_SCD_SIZE: usize = 4;

const CHANNEL_ID: u16 = 0;

const OFF_PREAMBLE: usize = 0;
const OFF_CCD_CHECKSUM: usize = 2;
const OFF_SCD_CHECKSUM: usize = 4;
const OFF_CHANNEL: usize = 6;
const OFF_SCD_LEN: usize = 12;
const OFF_REQUEST_ID: usize = 14;

/// Largest SCD whose packet still fits the checksum range.
pub const MAX_SCD_LEN: usize = MAX_CHECKSUM_LEN - 1 - (HEADER_SIZE - OFF_CHANNEL);

/// Configuration for the packet codec.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Maximum data bytes per ReadMem/WriteMem. Default: 64.
    pub max_payload: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl CodecConfig {
    /// Largest SCD a device may receive: address plus payload.
    pub fn max_request_scd(&self) -> usize {
        self.max_payload + ADDRESS_SIZE
    }
}

/// The fixed 16-byte header of any GenCP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub preamble: u16,
    pub ccd_checksum: u16,
    pub scd_checksum: u16,
    pub channel_id: u16,
    /// Request flags on commands, status word on acknowledgements.
    pub flags_or_status: u16,
    pub command_id: u16,
    pub scd_length: u16,
    pub request_id: u16,
}

impl Header {
    /// Read the header fields without validating anything.
    pub fn parse(packet: &[u8]) -> Result<Self> {
        if packet.len() < HEADER_SIZE {
            return Err(GenCpError::Truncated {
                needed: HEADER_SIZE,
                available: packet.len(),
            });
        }
        let mut src = &packet[..HEADER_SIZE];
        Ok(Self {
            preamble: src.get_u16(),
            ccd_checksum: src.get_u16(),
            scd_checksum: src.get_u16(),
            channel_id: src.get_u16(),
            flags_or_status: src.get_u16(),
            command_id: src.get_u16(),
            scd_length: src.get_u16(),
            request_id: src.get_u16(),
        })
    }

    /// The status word, for acknowledgements.
    pub fn status(&self) -> StatusCode {
        StatusCode(self.flags_or_status)
    }

    /// Total packet size implied by the advertised SCD length.
    pub fn packet_len(&self) -> usize {
        HEADER_SIZE + usize::from(self.scd_length)
    }
}

/// A fixed-width register value with a big-endian wire form.
///
/// Floats travel as the bit pattern of the unsigned integer of equal
/// width; NaN payloads and denormals survive unchanged.
pub trait Register: Copy + Sized {
    /// Wire width in bytes.
    const WIDTH: usize;

    /// Append the big-endian encoding.
    fn put_be<B: BufMut>(self, dst: &mut B);

    /// Decode from the front of `src`, which must hold `WIDTH` bytes.
    fn get_be<B: Buf>(src: &mut B) -> Self;

    /// Wrap as a write payload.
    fn into_payload(self) -> Payload<'static>;
}

macro_rules! int_register {
    ($ty:ty, $variant:ident, $put:ident, $get:ident) => {
        impl Register for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn put_be<B: BufMut>(self, dst: &mut B) {
                dst.$put(self);
            }

            fn get_be<B: Buf>(src: &mut B) -> Self {
                src.$get()
            }

            fn into_payload(self) -> Payload<'static> {
                Payload::$variant(self)
            }
        }

        impl From<$ty> for Payload<'static> {
            fn from(value: $ty) -> Self {
                Payload::$variant(value)
            }
        }
    };
}

macro_rules! float_register {
    ($ty:ty, $variant:ident, $put:ident, $get:ident) => {
        impl Register for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn put_be<B: BufMut>(self, dst: &mut B) {
                dst.$put(self.to_bits());
            }

            fn get_be<B: Buf>(src: &mut B) -> Self {
                <$ty>::from_bits(src.$get())
            }

            fn into_payload(self) -> Payload<'static> {
                Payload::$variant(self)
            }
        }

        impl From<$ty> for Payload<'static> {
            fn from(value: $ty) -> Self {
                Payload::$variant(value)
            }
        }
    };
}

int_register!(u16, U16, put_u16, get_u16);
int_register!(u32, U32, put_u32, get_u32);
int_register!(u64, U64, put_u64, get_u64);
float_register!(f32, F32, put_u32, get_u32);
float_register!(f64, F64, put_u64, get_u64);

/// Data carried by a WriteMem request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    Bytes(&'a [u8]),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Payload<'_> {
    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.len(),
            Self::U16(_) => u16::WIDTH,
            Self::U32(_) => u32::WIDTH,
            Self::U64(_) => u64::WIDTH,
            Self::F32(_) => f32::WIDTH,
            Self::F64(_) => f64::WIDTH,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put(&self, dst: &mut BytesMut) {
        match *self {
            Self::Bytes(bytes) => dst.put_slice(bytes),
            Self::U16(v) => v.put_be(dst),
            Self::U32(v) => v.put_be(dst),
            Self::U64(v) => v.put_be(dst),
            Self::F32(v) => v.put_be(dst),
            Self::F64(v) => v.put_be(dst),
        }
    }
}

impl<'a> From<&'a [u8]> for Payload<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Payload::Bytes(bytes)
    }
}

/// Start a packet: header with zeroed checksums. Returns its offset in `dst`.
fn begin_packet(
    dst: &mut BytesMut,
    flags_or_status: u16,
    command_id: u16,
    scd_len: usize,
    request_id: u16,
) -> usize {
    let start = dst.len();
    dst.reserve(HEADER_SIZE + scd_len);
    dst.put_u16(PREAMBLE);
    dst.put_u16(0);
    dst.put_u16(0);
    dst.put_u16(CHANNEL_ID);
    dst.put_u16(flags_or_status);
    dst.put_u16(command_id);
    dst.put_u16(scd_len as u16);
    dst.put_u16(request_id);
    start
}

/// Fill in both checksums of a complete packet.
fn seal_packet(packet: &mut [u8]) {
    let (ccd, scd) = compute_checksums(packet);
    packet[OFF_CCD_CHECKSUM..OFF_CCD_CHECKSUM + 2].copy_from_slice(&ccd.to_be_bytes());
    packet[OFF_SCD_CHECKSUM..OFF_SCD_CHECKSUM + 2].copy_from_slice(&scd.to_be_bytes());
}

/// CCD checksum over `[channel .. end of CCD]`, SCD checksum over
/// `[channel .. end of packet]`, in one pass.
fn compute_checksums(packet: &[u8]) -> (u16, u16) {
    let mut acc = Checksum16::new();
    acc.update(&packet[OFF_CHANNEL..HEADER_SIZE]);
    let ccd = acc.finish();
    acc.update(&packet[HEADER_SIZE..]);
    (ccd, acc.finish())
}

/// Encode a ReadMem request for `size` bytes at `address`.
///
/// Wire format:
/// ```text
/// ┌──────────┬─────────┬─────────┬─────────┬────────┬────────┬─────────┬────────┐
/// │ 0x0100   │ CCD sum │ SCD sum │ chan 0  │ 0x4000 │ 0x0800 │ 0x000C  │ req id │
/// ├──────────┴─────────┴──┬──────┴─────────┴────────┴────────┴─────────┴────────┤
/// │ address (8B)          │ reserved (2B) │ size (2B)                           │
/// └───────────────────────┴───────────────┴─────────────────────────────────────┘
/// ```
pub fn encode_read_request(request_id: u16, address: u64, size: u16, dst: &mut BytesMut) {
    let start = begin_packet(
        dst,
        FLAG_ACK_REQUESTED,
        READMEM_CMD,
        READ_REQUEST_SCD_SIZE,
        request_id,
    );
    dst.put_u64(address);
    dst.put_u16(0);
    dst.put_u16(size);
    seal_packet(&mut dst[start..]);
}

/// Encode a WriteMem request of `payload` at `address`.
///
/// Fails if the payload is larger than `max_payload`.
pub fn encode_write_request(
    request_id: u16,
    address: u64,
    payload: &Payload<'_>,
    max_payload: usize,
    dst: &mut BytesMut,
) -> Result<()> {
    let max_payload = max_payload.min(MAX_SCD_LEN - ADDRESS_SIZE);
    if payload.len() > max_payload {
        return Err(GenCpError::PayloadTooLarge {
            size: payload.len(),
            max: max_payload,
        });
    }
    let start = begin_packet(
        dst,
        FLAG_ACK_REQUESTED,
        WRITEMEM_CMD,
        ADDRESS_SIZE + payload.len(),
        request_id,
    );
    dst.put_u64(address);
    payload.put(dst);
    seal_packet(&mut dst[start..]);
    Ok(())
}

/// A validated acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack<'a> {
    pub status: StatusCode,
    pub command_id: u16,
    pub request_id: u16,
    /// The SCD, exactly as long as advertised.
    pub scd: &'a [u8],
}

impl Ack<'_> {
    /// Bytes the device reports writing, for WriteMem acknowledgements.
    pub fn length_written(&self) -> Option<u16> {
        if self.command_id != WRITEMEM_ACK || self.scd.len() < WRITE_ACK_SCD_SIZE {
            return None;
        }
        Some(u16::from_be_bytes([self.scd[2], self.scd[3]]))
    }
}

/// Reject an advertised SCD too long to checksum.
fn checksum_range(header: &Header) -> Result<()> {
    let len = usize::from(header.scd_length);
    if len > MAX_SCD_LEN {
        return Err(GenCpError::ScdTooLong {
            len,
            max: MAX_SCD_LEN,
            request_id: Some(header.request_id),
        });
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum IdPolicy {
    Strict,
    WarnOnly,
}

fn validate_ack<'a>(
    packet: &'a [u8],
    expected_request_id: u16,
    expected_command: u16,
    max_scd: usize,
    id_policy: IdPolicy,
) -> Result<Ack<'a>> {
    let header = Header::parse(packet)?;

    if header.preamble != PREAMBLE {
        return Err(GenCpError::InvalidPreamble {
            found: header.preamble,
        });
    }

    if header.request_id != expected_request_id {
        match id_policy {
            IdPolicy::Strict => {
                return Err(GenCpError::RequestIdMismatch {
                    expected: expected_request_id,
                    found: header.request_id,
                })
            }
            IdPolicy::WarnOnly => warn!(
                expected = expected_request_id,
                found = header.request_id,
                "acknowledgement request id mismatch"
            ),
        }
    }

    let request_id = header.request_id;
    let mut acc = Checksum16::new();
    acc.update(&packet[OFF_CHANNEL..HEADER_SIZE]);
    let ccd = acc.finish();
    if ccd != header.ccd_checksum {
        return Err(GenCpError::CcdChecksum {
            computed: ccd,
            stored: header.ccd_checksum,
            request_id,
        });
    }

    checksum_range(&header)?;
    let end = header.packet_len();
    if packet.len() < end {
        return Err(GenCpError::Truncated {
            needed: end,
            available: packet.len(),
        });
    }
    acc.update(&packet[HEADER_SIZE..end]);
    let scd = acc.finish();
    if scd != header.scd_checksum {
        return Err(GenCpError::ScdChecksum {
            computed: scd,
            stored: header.scd_checksum,
            request_id,
        });
    }

    if header.command_id != expected_command {
        return Err(GenCpError::UnexpectedCommand {
            expected: expected_command,
            found: header.command_id,
            request_id,
        });
    }

    let scd_len = usize::from(header.scd_length);
    if scd_len > max_scd {
        return Err(GenCpError::ScdTooLong {
            len: scd_len,
            max: max_scd,
            request_id: Some(request_id),
        });
    }

    let status = header.status();
    if status.is_error() {
        return Err(GenCpError::Device { status, request_id });
    }
    if status != StatusCode::SUCCESS {
        debug!(%status, request_id, "acknowledgement carries non-error status");
    }

    Ok(Ack {
        status,
        command_id: header.command_id,
        request_id,
        scd: &packet[HEADER_SIZE..end],
    })
}

/// Validate a ReadMem acknowledgement.
///
/// Checks, in order: preamble, request id, CCD checksum, SCD checksum over
/// the advertised length, command id, SCD length against `max_scd`, and the
/// status error bit. A request id mismatch is fatal.
pub fn validate_read_ack(
    packet: &[u8],
    expected_request_id: u16,
    max_scd: usize,
) -> Result<Ack<'_>> {
    validate_ack(
        packet,
        expected_request_id,
        READMEM_ACK,
        max_scd,
        IdPolicy::Strict,
    )
}

/// Validate a WriteMem acknowledgement.
///
/// Same checks as [`validate_read_ack`], except that a request id mismatch
/// is only logged; some devices do not echo the id on writes.
pub fn validate_write_ack(
    packet: &[u8],
    expected_request_id: u16,
    max_scd: usize,
) -> Result<Ack<'_>> {
    validate_ack(
        packet,
        expected_request_id,
        WRITEMEM_ACK,
        max_scd,
        IdPolicy::WarnOnly,
    )
}

/// Validate a ReadMem acknowledgement and decode a register value from the
/// front of its SCD.
pub fn extract_value<R: Register>(
    packet: &[u8],
    expected_request_id: u16,
    max_scd: usize,
) -> Result<R> {
    let ack = validate_read_ack(packet, expected_request_id, max_scd)?;
    if ack.scd.len() < R::WIDTH {
        return Err(GenCpError::ShortPayload {
            needed: R::WIDTH,
            available: ack.scd.len(),
        });
    }
    let mut src = ack.scd;
    Ok(R::get_be(&mut src))
}

/// Validate a ReadMem acknowledgement and copy its data into `dst`.
///
/// Returns the number of bytes copied. Fails rather than truncating when the
/// acknowledgement carries more than `dst` can hold.
pub fn extract_bytes(
    packet: &[u8],
    expected_request_id: u16,
    max_scd: usize,
    dst: &mut [u8],
) -> Result<usize> {
    let ack = validate_read_ack(packet, expected_request_id, max_scd)?;
    if ack.scd.len() > dst.len() {
        return Err(GenCpError::WouldTruncate {
            advertised: ack.scd.len(),
            capacity: dst.len(),
            request_id: ack.request_id,
        });
    }
    dst[..ack.scd.len()].copy_from_slice(ack.scd);
    Ok(ack.scd.len())
}

/// If `packet` is a PendingAck for `expected_request_id`, return the
/// temporary timeout it announces in milliseconds.
///
/// Returns `Ok(None)` for any other command.
pub fn parse_pending_ack(packet: &[u8], expected_request_id: u16) -> Result<Option<u16>> {
    let header = Header::parse(packet)?;
    if header.command_id != PENDING_ACK {
        return Ok(None);
    }
    let ack = validate_ack(
        packet,
        expected_request_id,
        PENDING_ACK,
        PENDING_ACK_SCD_SIZE,
        IdPolicy::Strict,
    )?;
    if ack.scd.len() < PENDING_ACK_SCD_SIZE {
        return Err(GenCpError::ShortPayload {
            needed: PENDING_ACK_SCD_SIZE,
            available: ack.scd.len(),
        });
    }
    Ok(Some(u16::from_be_bytes([ack.scd[2], ack.scd[3]])))
}

/// Take one complete packet off the front of `src`.
///
/// Returns `Ok(None)` until the header and the advertised SCD are buffered.
/// Checksums are not verified here; that is the validator's job.
pub fn decode_packet(src: &mut BytesMut, max_scd: usize) -> Result<Option<Bytes>> {
    if src.len() < 2 {
        return Ok(None);
    }

    let preamble = u16::from_be_bytes([src[OFF_PREAMBLE], src[OFF_PREAMBLE + 1]]);
    if preamble != PREAMBLE {
        return Err(GenCpError::InvalidPreamble { found: preamble });
    }

    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let scd_len = usize::from(u16::from_be_bytes([src[OFF_SCD_LEN], src[OFF_SCD_LEN + 1]]));
    if scd_len > max_scd {
        let request_id = u16::from_be_bytes([src[OFF_REQUEST_ID], src[OFF_REQUEST_ID + 1]]);
        return Err(GenCpError::ScdTooLong {
            len: scd_len,
            max: max_scd,
            request_id: Some(request_id),
        });
    }

    let total = HEADER_SIZE + scd_len;
    if src.len() < total {
        return Ok(None);
    }

    Ok(Some(src.split_to(total).freeze()))
}

/// A request as seen by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadMem {
        request_id: u16,
        address: u64,
        size: u16,
        ack_requested: bool,
    },
    WriteMem {
        request_id: u16,
        address: u64,
        data: Bytes,
        ack_requested: bool,
    },
}

impl Request {
    pub fn request_id(&self) -> u16 {
        match self {
            Self::ReadMem { request_id, .. } | Self::WriteMem { request_id, .. } => *request_id,
        }
    }

    pub fn ack_requested(&self) -> bool {
        match self {
            Self::ReadMem { ack_requested, .. } | Self::WriteMem { ack_requested, .. } => {
                *ack_requested
            }
        }
    }
}

/// Validate and decode a ReadMem or WriteMem request packet.
pub fn decode_request(packet: &[u8], max_payload: usize) -> Result<Request> {
    let header = Header::parse(packet)?;
    if header.preamble != PREAMBLE {
        return Err(GenCpError::InvalidPreamble {
            found: header.preamble,
        });
    }

    let end = header.packet_len();
    if packet.len() < end {
        return Err(GenCpError::Truncated {
            needed: end,
            available: packet.len(),
        });
    }

    let request_id = header.request_id;
    checksum_range(&header)?;
    let (ccd, scd) = compute_checksums(&packet[..end]);
    if ccd != header.ccd_checksum {
        return Err(GenCpError::CcdChecksum {
            computed: ccd,
            stored: header.ccd_checksum,
            request_id,
        });
    }
    if scd != header.scd_checksum {
        return Err(GenCpError::ScdChecksum {
            computed: scd,
            stored: header.scd_checksum,
            request_id,
        });
    }

    let ack_requested = header.flags_or_status & FLAG_ACK_REQUESTED != 0;
    let mut body = &packet[HEADER_SIZE..end];
    match header.command_id {
        READMEM_CMD => {
            if body.len() < READ_REQUEST_SCD_SIZE {
                return Err(GenCpError::ShortPayload {
                    needed: READ_REQUEST_SCD_SIZE,
                    available: body.len(),
                });
            }
            let address = body.get_u64();
            let _reserved = body.get_u16();
            let size = body.get_u16();
            Ok(Request::ReadMem {
                request_id,
                address,
                size,
                ack_requested,
            })
        }
        WRITEMEM_CMD => {
            if body.len() < ADDRESS_SIZE {
                return Err(GenCpError::ShortPayload {
                    needed: ADDRESS_SIZE,
                    available: body.len(),
                });
            }
            let address = body.get_u64();
            if body.len() > max_payload {
                return Err(GenCpError::PayloadTooLarge {
                    size: body.len(),
                    max: max_payload,
                });
            }
            Ok(Request::WriteMem {
                request_id,
                address,
                data: Bytes::copy_from_slice(body),
                ack_requested,
            })
        }
        other => Err(GenCpError::UnexpectedCommand {
            expected: READMEM_CMD,
            found: other,
            request_id,
        }),
    }
}

/// Encode a ReadMem acknowledgement. Error acknowledgements carry no data.
pub fn encode_read_ack(request_id: u16, status: StatusCode, data: &[u8], dst: &mut BytesMut) {
    let start = begin_packet(dst, status.raw(), READMEM_ACK, data.len(), request_id);
    dst.put_slice(data);
    seal_packet(&mut dst[start..]);
}

/// Encode a WriteMem acknowledgement.
pub fn encode_write_ack(
    request_id: u16,
    status: StatusCode,
    length_written: u16,
    dst: &mut BytesMut,
) {
    let start = begin_packet(
        dst,
        status.raw(),
        WRITEMEM_ACK,
        WRITE_ACK_SCD_SIZE,
        request_id,
    );
    dst.put_u16(0);
    dst.put_u16(length_written);
    seal_packet(&mut dst[start..]);
}

/// Encode a PendingAck announcing a temporary timeout of `timeout_ms`.
pub fn encode_pending_ack(request_id: u16, timeout_ms: u16, dst: &mut BytesMut) {
    let start = begin_packet(
        dst,
        StatusCode::SUCCESS.raw(),
        PENDING_ACK,
        PENDING_ACK_SCD_SIZE,
        request_id,
    );
    dst.put_u16(0);
    dst.put_u16(timeout_ms);
    seal_packet(&mut dst[start..]);
}
