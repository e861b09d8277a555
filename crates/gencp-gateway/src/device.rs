//! An in-memory GenCP device.
//!
//! [`SimulatedDevice`] answers ReadMem and WriteMem requests from a flat
//! register space holding a populated bootstrap register map and a manifest
//! table that describes one XML description file. It backs the test suites
//! and `gencp simulate`.

use std::ops::Range;

use bytes::{Bytes, BytesMut};
use gencp_packet::command::WRITEMEM_CMD;
use gencp_packet::{
    decode_request, encode_pending_ack, encode_read_ack, encode_write_ack, CodecConfig,
    GenCpError, Header, PacketStream, Request, Status, StatusCode,
};
use gencp_transport::Transport;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::bootstrap;
use crate::manifest::MANIFEST_ENTRY_SIZE;

/// Size of the simulated register space.
pub const MEMORY_SIZE: usize = 0x1_0000;

/// Address of the manifest table.
pub const MANIFEST_BASE: u64 = 0x1000;

/// Address of the description file.
pub const FILE_BASE: u64 = 0x2000;

const GENCP_VERSION: u32 = 0x0001_0000;
const FILE_VERSION: u32 = (1 << 24) | (2 << 16) | 3;
const SCHEMA_VERSION_1_1: u32 = (1 << 24) | (1 << 16);

/// Description file served from the manifest.
pub const DESCRIPTION_XML: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n",
    "<RegisterDescription ModelName=\"SimCam GenCP-1\" VendorName=\"GenCP Labs\" ",
    "StandardNameSpace=\"None\" SchemaMajorVersion=\"1\" SchemaMinorVersion=\"1\" ",
    "MajorVersion=\"1\" MinorVersion=\"2\" SubMinorVersion=\"3\">\n",
    "  <Category Name=\"Root\"><pFeature>Scratch</pFeature></Category>\n",
    "  <Integer Name=\"Scratch\"><pValue>ScratchReg</pValue></Integer>\n",
    "  <IntReg Name=\"ScratchReg\"><Address>0x300</Address><Length>4</Length>",
    "<AccessMode>RW</AccessMode><Endianess>BigEndian</Endianess></IntReg>\n",
    "</RegisterDescription>\n",
);

/// Identity strings of the simulated device, by bootstrap offset.
const IDENTITY: [(u64, &str); 6] = [
    (bootstrap::MANUFACTURER_NAME, "GenCP Labs"),
    (bootstrap::MODEL_NAME, "SimCam GenCP-1"),
    (bootstrap::FAMILY_NAME, "SimCam"),
    (bootstrap::DEVICE_VERSION, "1.2.3"),
    (bootstrap::MANUFACTURER_INFO, "Simulated GenCP register device"),
    (bootstrap::SERIAL_NUMBER, "SIM-000001"),
];

/// A GenCP device backed by memory.
pub struct SimulatedDevice {
    memory: Vec<u8>,
    read_only: Vec<Range<u64>>,
    codec: CodecConfig,
    pending_ack_ms: Option<u16>,
    handled: u64,
}

impl SimulatedDevice {
    /// Create a device with the default register map.
    pub fn new() -> Self {
        let mut device = Self {
            memory: vec![0u8; MEMORY_SIZE],
            read_only: Vec::new(),
            codec: CodecConfig::default(),
            pending_ack_ms: None,
            handled: 0,
        };
        device.populate();
        device
    }

    /// Limit request payloads to `max_payload` bytes.
    pub fn with_codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }

    /// Precede every acknowledgement with a PendingAck of `timeout_ms`.
    pub fn with_pending_ack(mut self, timeout_ms: u16) -> Self {
        self.pending_ack_ms = Some(timeout_ms);
        self
    }

    fn populate(&mut self) {
        self.poke_u32(bootstrap::GENCP_VERSION, GENCP_VERSION);
        for (address, text) in IDENTITY {
            self.poke(address, text.as_bytes());
        }
        self.poke_u64(bootstrap::DEVICE_CAPABILITY, 0b0111);
        self.poke_u32(bootstrap::MAX_DEVICE_RESPONSE_TIME, 300);
        self.poke_u64(bootstrap::MANIFEST_TABLE_ADDRESS, MANIFEST_BASE);
        self.poke_u32(bootstrap::HEARTBEAT_TIMEOUT, 3000);
        self.poke_u64(bootstrap::TIMESTAMP_INCREMENT, 1000);
        self.poke_u32(bootstrap::PROTOCOL_ENDIANESS, 0xFFFF_FFFF);
        self.poke_u32(bootstrap::IMPLEMENTATION_ENDIANESS, 0xFFFF_FFFF);
        self.install_file(DESCRIPTION_XML.as_bytes(), 0);

        // Version and identity strings; the user-defined name stays writable.
        self.read_only.push(0..bootstrap::USER_DEFINED_NAME);
        self.read_only.push(MANIFEST_BASE..MEMORY_SIZE as u64);
    }

    /// Replace the manifest with a single entry describing `data`.
    ///
    /// `schema_type` 0 is uncompressed XML, 1 is zip. Returns `false` if
    /// the file does not fit in the register space.
    pub fn install_file(&mut self, data: &[u8], schema_type: u8) -> bool {
        if self.span(FILE_BASE, data.len()).is_none() {
            return false;
        }
        let mut entry = [0u8; MANIFEST_ENTRY_SIZE];
        entry[0..4].copy_from_slice(&FILE_VERSION.to_be_bytes());
        let schema = SCHEMA_VERSION_1_1 | (u32::from(schema_type & 0x3F) << 10);
        entry[4..8].copy_from_slice(&schema.to_be_bytes());
        entry[8..16].copy_from_slice(&FILE_BASE.to_be_bytes());
        entry[16..24].copy_from_slice(&(data.len() as u64).to_be_bytes());
        entry[24..44].copy_from_slice(&Sha1::digest(data));

        self.poke_u64(MANIFEST_BASE, 1);
        self.poke(MANIFEST_BASE + 8, &entry);
        self.poke(FILE_BASE, data)
    }

    /// Store bytes, ignoring write protection.
    ///
    /// Returns `false` if the range falls outside the register space.
    pub fn poke(&mut self, address: u64, data: &[u8]) -> bool {
        match self.span(address, data.len()) {
            Some(span) => {
                self.memory[span].copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    fn poke_u32(&mut self, address: u64, value: u32) {
        self.poke(address, &value.to_be_bytes());
    }

    fn poke_u64(&mut self, address: u64, value: u64) {
        self.poke(address, &value.to_be_bytes());
    }

    /// Borrow `len` bytes of register space.
    pub fn peek(&self, address: u64, len: usize) -> Option<&[u8]> {
        self.span(address, len).map(|span| &self.memory[span])
    }

    /// Number of requests handled so far.
    pub fn handled(&self) -> u64 {
        self.handled
    }

    fn span(&self, address: u64, len: usize) -> Option<Range<usize>> {
        let start = usize::try_from(address).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.memory.len()).then_some(start..end)
    }

    fn is_protected(&self, address: u64, len: usize) -> bool {
        let end = address.saturating_add(len as u64);
        self.read_only
            .iter()
            .any(|range| address < range.end && range.start < end)
    }

    /// Answer one request packet.
    ///
    /// Returns the acknowledgement bytes, or `None` when the request did not
    /// ask for one or the packet has no usable header.
    pub fn handle(&mut self, packet: &[u8]) -> Option<Bytes> {
        self.handled += 1;
        let mut out = BytesMut::new();

        let request = match decode_request(packet, self.codec.max_payload) {
            Ok(request) => request,
            Err(err) => {
                let header = Header::parse(packet).ok()?;
                warn!(%err, request_id = header.request_id, "rejecting request");
                let status = StatusCode::from(rejection_status(&err));
                match header.command_id {
                    WRITEMEM_CMD => encode_write_ack(header.request_id, status, 0, &mut out),
                    _ => encode_read_ack(header.request_id, status, &[], &mut out),
                }
                return Some(out.freeze());
            }
        };

        let request_id = request.request_id();
        let ack_requested = request.ack_requested();
        if ack_requested {
            if let Some(ms) = self.pending_ack_ms {
                encode_pending_ack(request_id, ms, &mut out);
            }
        }

        match request {
            Request::ReadMem { address, size, .. } => {
                let size = usize::from(size);
                let result = if size > self.codec.max_payload {
                    Err(Status::InvalidParameter)
                } else {
                    self.span(address, size).ok_or(Status::InvalidAddress)
                };
                debug!(request_id, address, size, ok = result.is_ok(), "read");
                match result {
                    Ok(span) => encode_read_ack(
                        request_id,
                        StatusCode::SUCCESS,
                        &self.memory[span],
                        &mut out,
                    ),
                    Err(status) => encode_read_ack(request_id, status.into(), &[], &mut out),
                }
            }
            Request::WriteMem { address, data, .. } => {
                let result = match self.span(address, data.len()) {
                    None => Err(Status::InvalidAddress),
                    Some(_) if self.is_protected(address, data.len()) => {
                        Err(Status::WriteProtected)
                    }
                    Some(span) => {
                        self.memory[span].copy_from_slice(&data);
                        Ok(data.len() as u16)
                    }
                };
                debug!(request_id, address, len = data.len(), ok = result.is_ok(), "write");
                match result {
                    Ok(written) => {
                        encode_write_ack(request_id, StatusCode::SUCCESS, written, &mut out)
                    }
                    Err(status) => encode_write_ack(request_id, status.into(), 0, &mut out),
                }
            }
        }

        ack_requested.then(|| out.freeze())
    }

    /// Answer requests arriving on `transport` until the peer closes.
    ///
    /// Input that does not frame as a GenCP packet is discarded.
    pub fn serve<T: Transport>(&mut self, transport: T) -> Result<(), GenCpError> {
        let mut stream = PacketStream::new(transport);
        let max_scd = self.codec.max_request_scd();
        info!(transport = stream.get_ref().transport_name(), "serving simulated device");

        loop {
            let packet = match stream.read_packet(max_scd, None) {
                Ok(packet) => packet,
                Err(GenCpError::ConnectionClosed) => {
                    info!(handled = self.handled, "peer closed connection");
                    return Ok(());
                }
                Err(err @ (GenCpError::Transport(_) | GenCpError::Timeout { .. })) => {
                    return Err(err)
                }
                Err(err) => {
                    let dropped = stream.drain_input()?;
                    warn!(%err, dropped, "discarded unframed input");
                    continue;
                }
            };
            if let Some(reply) = self.handle(&packet) {
                stream.send(&reply)?;
            }
        }
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn rejection_status(err: &GenCpError) -> Status {
    match err {
        GenCpError::UnexpectedCommand { .. } => Status::NotImplemented,
        GenCpError::InvalidPreamble { .. }
        | GenCpError::CcdChecksum { .. }
        | GenCpError::ScdChecksum { .. }
        | GenCpError::Truncated { .. }
        | GenCpError::ShortPayload { .. } => Status::InvalidHeader,
        _ => Status::InvalidParameter,
    }
}
