use bytes::{Bytes, BytesMut};
use gencp_packet::{
    encode_read_request, encode_write_request, extract_bytes, extract_value, validate_write_ack,
    GenCpError, PacketStream, Payload, Register,
};
use gencp_transport::Transport;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{GatewayError, Result};
use crate::sequencer::RequestSequencer;
use crate::session::Resync;

/// Typed register access to one GenCP device.
///
/// Every call is one request/acknowledgement exchange (or a run of them for
/// [`read_memory`](Self::read_memory)). After a failed exchange the next
/// request first drains stale input, as the gateway does.
pub struct DeviceClient<T> {
    stream: PacketStream<T>,
    sequencer: RequestSequencer,
    config: ClientConfig,
    resync: Resync,
}

impl<T: Transport> DeviceClient<T> {
    /// Create a client with default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// Create a client with explicit configuration.
    pub fn with_config(transport: T, config: ClientConfig) -> Self {
        Self {
            stream: PacketStream::with_config(transport, config.stream_config()),
            sequencer: RequestSequencer::new(),
            config,
            resync: Resync::Idle,
        }
    }

    /// Read one register value.
    pub fn read_register<R: Register>(&mut self, address: u64) -> Result<R> {
        let (id, ack) = self.transact(|id, dst| {
            encode_read_request(id, address, R::WIDTH as u16, dst);
            Ok(())
        })?;
        let max = self.config.codec.max_payload;
        self.checked(extract_value::<R>(&ack, id, max))
    }

    /// Read up to one packet's worth of bytes.
    pub fn read_bytes(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        let max = self.config.codec.max_payload;
        if len > max {
            return Err(GenCpError::PayloadTooLarge { size: len, max }.into());
        }
        let (id, ack) = self.transact(|id, dst| {
            encode_read_request(id, address, len as u16, dst);
            Ok(())
        })?;
        let mut data = vec![0u8; len];
        let n = self.checked(extract_bytes(&ack, id, max, &mut data))?;
        if n < len {
            warn!(address, requested = len, received = n, "short read");
            data.truncate(n);
        }
        Ok(data)
    }

    /// Read any amount of memory in packets of at most `max_payload` bytes.
    pub fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        if len > 0 && address.checked_add(len as u64 - 1).is_none() {
            return Err(GatewayError::AddressOverflow {
                address,
                len: len as u64,
            });
        }
        let chunk = self.config.codec.max_payload.max(1);
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            let want = (len - data.len()).min(chunk);
            let offset = data.len() as u64;
            let piece = self.read_bytes(address + offset, want)?;
            if piece.is_empty() {
                return Err(GenCpError::ShortPayload {
                    needed: want,
                    available: 0,
                }
                .into());
            }
            data.extend_from_slice(&piece);
        }
        Ok(data)
    }

    /// Read a string register of `len` bytes, stopping at the first NUL.
    pub fn read_string(&mut self, address: u64, len: usize) -> Result<String> {
        let data = self.read_memory(address, len)?;
        let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
        Ok(String::from_utf8_lossy(&data[..end]).into_owned())
    }

    /// Write one register value.
    pub fn write_register<R: Register>(&mut self, address: u64, value: R) -> Result<()> {
        self.write_payload(address, &value.into_payload())
    }

    /// Write raw bytes in a single packet.
    pub fn write_bytes(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.write_payload(address, &Payload::Bytes(data))
    }

    /// Write a payload in a single packet.
    pub fn write_payload(&mut self, address: u64, payload: &Payload<'_>) -> Result<()> {
        let max = self.config.codec.max_payload;
        let len = payload.len();
        let (id, ack) =
            self.transact(|id, dst| encode_write_request(id, address, payload, max, dst))?;
        let ack = self.checked(validate_write_ack(&ack, id, max))?;
        if let Some(written) = ack.length_written() {
            if usize::from(written) != len {
                warn!(address, len, written, "device wrote fewer bytes than sent");
            }
        }
        Ok(())
    }

    fn transact(
        &mut self,
        encode: impl FnOnce(u16, &mut BytesMut) -> std::result::Result<(), GenCpError>,
    ) -> Result<(u16, Bytes)> {
        if self.resync == Resync::AwaitingFlush {
            let dropped = self.stream.drain_input()?;
            debug!(dropped, "resynchronized input");
            self.resync = Resync::Idle;
        }

        let id = self.sequencer.issue()?;
        let mut packet = BytesMut::new();
        if let Err(err) = encode(id, &mut packet) {
            self.sequencer.abandon();
            return Err(err.into());
        }

        let timeout = Some(self.config.timeout);
        let result = self
            .stream
            .send(&packet)
            .and_then(|()| self.stream.read_ack(id, timeout));
        match result {
            Ok(ack) => {
                self.sequencer.settle();
                Ok((id, ack))
            }
            Err(err) => {
                self.sequencer.abandon();
                self.resync = Resync::AwaitingFlush;
                Err(err.into())
            }
        }
    }

    fn checked<V>(&mut self, result: std::result::Result<V, GenCpError>) -> Result<V> {
        result.map_err(|err| {
            self.resync = Resync::AwaitingFlush;
            GatewayError::from(err)
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        self.stream.get_ref()
    }

    /// Consume the client and return the transport.
    pub fn into_inner(self) -> T {
        self.stream.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gencp_packet::Status;

    use super::*;
    use crate::device::SimulatedDevice;
    use crate::testing::Loopback;

    fn client() -> DeviceClient<Loopback> {
        DeviceClient::with_config(
            Loopback::new(SimulatedDevice::new()),
            ClientConfig {
                timeout: Duration::from_millis(50),
                ..ClientConfig::default()
            },
        )
    }

    #[test]
    fn register_roundtrip_all_widths() {
        let mut c = client();
        c.write_register(0x300u64, 0xBEEFu16).unwrap();
        assert_eq!(c.read_register::<u16>(0x300).unwrap(), 0xBEEF);

        c.write_register(0x300u64, 0xDEAD_BEEFu32).unwrap();
        assert_eq!(c.read_register::<u32>(0x300).unwrap(), 0xDEAD_BEEF);

        c.write_register(0x300u64, u64::MAX - 7).unwrap();
        assert_eq!(c.read_register::<u64>(0x300).unwrap(), u64::MAX - 7);

        let nan = f32::from_bits(0x7FC0_0ABC);
        c.write_register(0x300u64, nan).unwrap();
        assert_eq!(c.read_register::<f32>(0x300).unwrap().to_bits(), nan.to_bits());

        c.write_register(0x300u64, -1.0e-310f64).unwrap();
        assert_eq!(
            c.read_register::<f64>(0x300).unwrap().to_bits(),
            (-1.0e-310f64).to_bits()
        );
    }

    #[test]
    fn read_memory_splits_into_packets() {
        let mut c = client();
        let pattern: Vec<u8> = (0..150u8).collect();
        for (i, piece) in pattern.chunks(64).enumerate() {
            c.write_bytes(0x400 + (i as u64) * 64, piece).unwrap();
        }
        let before = c.get_ref().requests;
        let data = c.read_memory(0x400, 150).unwrap();
        assert_eq!(data, pattern);
        assert_eq!(c.get_ref().requests - before, 3);
    }

    #[test]
    fn read_bytes_refuses_more_than_one_packet() {
        let mut c = client();
        let err = c.read_bytes(0, 65).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Codec(GenCpError::PayloadTooLarge { size: 65, max: 64 })
        ));
        assert_eq!(c.get_ref().requests, 0);
    }

    #[test]
    fn read_string_stops_at_nul() {
        let mut c = client();
        assert_eq!(c.read_string(0x44, 64).unwrap(), "SimCam GenCP-1");
    }

    #[test]
    fn device_errors_surface_with_status() {
        let mut c = client();
        let err = c.write_bytes(0x4, b"x").unwrap_err();
        assert_eq!(err.status(), Status::WriteProtected);

        let err = c.read_register::<u32>(0xFFFF_FFFF_0000).unwrap_err();
        assert_eq!(err.status(), Status::InvalidAddress);

        // The client recovers after an error.
        assert!(c.read_register::<u32>(0x0).is_ok());
    }

    #[test]
    fn range_past_address_space_is_refused() {
        let mut c = client();
        let err = c.read_memory(u64::MAX - 10, 100).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::AddressOverflow {
                address,
                len: 100
            } if address == u64::MAX - 10
        ));
        assert_eq!(err.status(), Status::InvalidAddress);
        assert_eq!(c.get_ref().requests, 0);

        // The last byte of the address space is still reachable.
        let err = c.read_memory(u64::MAX, 1).unwrap_err();
        assert_eq!(err.status(), Status::InvalidAddress);
        assert!(matches!(err, GatewayError::Codec(_)));
    }

    #[test]
    fn ids_advance_across_requests() {
        let mut c = client();
        c.read_register::<u32>(0).unwrap();
        c.read_register::<u32>(0).unwrap();
        assert_eq!(c.sequencer.peek_next(), 2);
        assert_eq!(c.sequencer.outstanding(), None);
    }
}
