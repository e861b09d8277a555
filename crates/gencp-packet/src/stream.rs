use std::io::ErrorKind;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use gencp_transport::{Transport, TransportError};
use tracing::{debug, trace};

use crate::codec::{decode_packet, parse_pending_ack, CodecConfig};
use crate::error::{GenCpError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// Configuration for a [`PacketStream`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub codec: CodecConfig,
    /// Bytes requested from the transport per read. Default: 128.
    pub read_chunk: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            codec: CodecConfig::default(),
            read_chunk: 128,
        }
    }
}

/// Sends GenCP packets and reassembles acknowledgements over a byte stream.
///
/// Handles partial reads internally; callers always get whole packets.
pub struct PacketStream<T> {
    inner: T,
    buf: BytesMut,
    config: StreamConfig,
}

impl<T: Transport> PacketStream<T> {
    /// Create a packet stream with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, StreamConfig::default())
    }

    /// Create a packet stream with explicit configuration.
    pub fn with_config(inner: T, config: StreamConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete packet (blocking).
    pub fn send(&mut self, packet: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < packet.len() {
            match self.inner.write(&packet[offset..])? {
                0 => return Err(GenCpError::ConnectionClosed),
                n => offset += n,
            }
        }
        debug!(len = packet.len(), "sent packet");
        trace!(bytes = ?packet, "packet bytes");
        Ok(())
    }

    /// Read the next complete packet whose SCD is at most `max_scd` bytes.
    ///
    /// With `timeout = None` this blocks until a packet arrives or the
    /// peer closes. Otherwise it fails with [`GenCpError::Timeout`] once the
    /// deadline passes.
    pub fn read_packet(&mut self, max_scd: usize, timeout: Option<Duration>) -> Result<Bytes> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut wait = timeout;
        let mut chunk = vec![0u8; self.config.read_chunk.max(1)];

        loop {
            if let Some(packet) = decode_packet(&mut self.buf, max_scd)? {
                debug!(len = packet.len(), "received packet");
                return Ok(packet);
            }

            let n = match self.inner.read(&mut chunk, wait) {
                Ok(n) => n,
                Err(TransportError::Io(err)) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if n == 0 {
                match deadline {
                    None => return Err(GenCpError::ConnectionClosed),
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Err(GenCpError::Timeout {
                                buffered: self.buf.len(),
                            });
                        }
                        wait = Some(deadline - now);
                        continue;
                    }
                }
            }

            self.buf.extend_from_slice(&chunk[..n]);
            if let Some(deadline) = deadline {
                wait = Some(deadline.saturating_duration_since(Instant::now()));
            }
        }
    }

    /// Read the acknowledgement to `request_id`.
    ///
    /// PendingAck packets for the same request restart the wait with the
    /// timeout the device announces.
    pub fn read_ack(&mut self, request_id: u16, timeout: Option<Duration>) -> Result<Bytes> {
        let mut timeout = timeout;
        loop {
            let packet = self.read_packet(self.config.codec.max_payload, timeout)?;
            match parse_pending_ack(&packet, request_id)? {
                Some(ms) => {
                    debug!(request_id, timeout_ms = ms, "device sent pending ack");
                    if timeout.is_some() {
                        timeout = Some(Duration::from_millis(u64::from(ms)));
                    }
                }
                None => return Ok(packet),
            }
        }
    }

    /// Discard buffered bytes and anything queued on the transport.
    ///
    /// Returns the number of bytes dropped.
    pub fn drain_input(&mut self) -> Result<usize> {
        let buffered = self.buf.len();
        self.buf.clear();
        let dropped = buffered + self.inner.drain_input()?;
        if dropped > 0 {
            debug!(dropped, "discarded stale input");
        }
        Ok(dropped)
    }

    /// Bytes received but not yet returned as a packet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the stream and return the inner transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current stream configuration.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::codec::{
        encode_pending_ack, encode_read_ack, encode_read_request, Header, HEADER_SIZE,
    };
    use crate::status::StatusCode;

    /// Scripted transport: each read returns the next queued chunk, or
    /// `Ok(0)` once the script is exhausted.
    #[derive(Default)]
    struct Scripted {
        reads: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        max_write: Option<usize>,
        byte_by_byte: bool,
        interrupt_first: bool,
    }

    impl Transport for Scripted {
        fn write(&mut self, data: &[u8]) -> gencp_transport::Result<usize> {
            let n = self.max_write.map_or(data.len(), |m| m.min(data.len()));
            self.written.extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn read(
            &mut self,
            buf: &mut [u8],
            _timeout: Option<Duration>,
        ) -> gencp_transport::Result<usize> {
            if self.interrupt_first {
                self.interrupt_first = false;
                return Err(TransportError::Io(std::io::Error::from(
                    std::io::ErrorKind::Interrupted,
                )));
            }
            let Some(front) = self.reads.front_mut() else {
                return Ok(0);
            };
            let n = if self.byte_by_byte {
                1
            } else {
                front.len().min(buf.len())
            };
            buf[..n].copy_from_slice(&front[..n]);
            front.drain(..n);
            if front.is_empty() {
                self.reads.pop_front();
            }
            Ok(n)
        }

        fn drain_input(&mut self) -> gencp_transport::Result<usize> {
            let n = self.reads.iter().map(Vec::len).sum();
            self.reads.clear();
            Ok(n)
        }
    }

    fn ack(request_id: u16, data: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_read_ack(request_id, StatusCode::SUCCESS, data, &mut buf);
        buf.to_vec()
    }

    const SHORT: Option<Duration> = Some(Duration::from_millis(20));

    #[test]
    fn send_retries_short_writes() {
        let mut stream = PacketStream::new(Scripted {
            max_write: Some(3),
            ..Scripted::default()
        });
        let mut packet = BytesMut::new();
        encode_read_request(1, 0x208, 4, &mut packet);

        stream.send(&packet).unwrap();
        assert_eq!(stream.get_ref().written, packet.to_vec());
    }

    #[test]
    fn send_fails_when_peer_accepts_nothing() {
        let mut stream = PacketStream::new(Scripted {
            max_write: Some(0),
            ..Scripted::default()
        });
        let err = stream.send(&[0x01, 0x00]).unwrap_err();
        assert!(matches!(err, GenCpError::ConnectionClosed));
    }

    #[test]
    fn reads_packet_delivered_byte_by_byte() {
        let wire = ack(3, b"abcd");
        let mut stream = PacketStream::new(Scripted {
            reads: VecDeque::from([wire.clone()]),
            byte_by_byte: true,
            ..Scripted::default()
        });

        let packet = stream.read_ack(3, SHORT).unwrap();
        assert_eq!(packet.as_ref(), wire.as_slice());
    }

    #[test]
    fn keeps_trailing_bytes_for_next_packet() {
        let mut wire = ack(1, b"one");
        wire.extend_from_slice(&ack(2, b"two"));
        let mut stream = PacketStream::new(Scripted {
            reads: VecDeque::from([wire]),
            ..Scripted::default()
        });

        let first = stream.read_ack(1, SHORT).unwrap();
        assert_eq!(Header::parse(&first).unwrap().request_id, 1);
        assert_eq!(stream.buffered(), HEADER_SIZE + 3);
        let second = stream.read_ack(2, SHORT).unwrap();
        assert_eq!(Header::parse(&second).unwrap().request_id, 2);
    }

    #[test]
    fn empty_transport_times_out() {
        let mut stream = PacketStream::new(Scripted::default());
        let err = stream.read_ack(1, SHORT).unwrap_err();
        assert!(matches!(err, GenCpError::Timeout { buffered: 0 }));
    }

    #[test]
    fn partial_packet_times_out_with_bytes_buffered() {
        let wire = ack(1, b"abcdef");
        let mut stream = PacketStream::new(Scripted {
            reads: VecDeque::from([wire[..10].to_vec()]),
            ..Scripted::default()
        });
        let err = stream.read_ack(1, SHORT).unwrap_err();
        assert!(matches!(err, GenCpError::Timeout { buffered: 10 }));
    }

    #[test]
    fn blocking_read_reports_closed_peer() {
        let mut stream = PacketStream::new(Scripted::default());
        let err = stream.read_packet(64, None).unwrap_err();
        assert!(matches!(err, GenCpError::ConnectionClosed));
    }

    #[test]
    fn interrupted_read_is_retried() {
        let wire = ack(8, b"xy");
        let mut stream = PacketStream::new(Scripted {
            reads: VecDeque::from([wire.clone()]),
            interrupt_first: true,
            ..Scripted::default()
        });
        let packet = stream.read_packet(64, SHORT).unwrap();
        assert_eq!(packet.as_ref(), wire.as_slice());
    }

    #[test]
    fn pending_ack_is_skipped() {
        let mut pending = BytesMut::new();
        encode_pending_ack(5, 50, &mut pending);
        let mut stream = PacketStream::new(Scripted {
            reads: VecDeque::from([pending.to_vec(), ack(5, &[0, 0, 0, 9])]),
            ..Scripted::default()
        });

        let packet = stream.read_ack(5, SHORT).unwrap();
        assert_eq!(&packet[HEADER_SIZE..], &[0, 0, 0, 9]);
    }

    #[test]
    fn drain_discards_buffer_and_transport() {
        let wire = ack(1, b"stale");
        let mut stream = PacketStream::new(Scripted {
            reads: VecDeque::from([wire[..5].to_vec(), vec![0xEE; 7]]),
            ..Scripted::default()
        });
        let _ = stream.read_packet(64, Some(Duration::ZERO));
        let dropped = stream.drain_input().unwrap();
        assert_eq!(stream.buffered(), 0);
        assert_eq!(dropped, 12);
    }

    #[cfg(unix)]
    #[test]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut host = PacketStream::new(SocketTransport(left));
        let mut device = PacketStream::new(SocketTransport(right));

        let mut request = BytesMut::new();
        encode_read_request(77, 0x44, 4, &mut request);
        host.send(&request).unwrap();

        let max_scd = CodecConfig::default().max_request_scd();
        let received = device
            .read_packet(max_scd, Some(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(received.as_ref(), request.as_ref());

        device.send(&ack(77, b"OK!!")).unwrap();
        let reply = host.read_ack(77, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(&reply[HEADER_SIZE..], b"OK!!");
    }

    /// Minimal `Transport` over a socket for the round-trip test.
    #[cfg(unix)]
    struct SocketTransport(std::os::unix::net::UnixStream);

    #[cfg(unix)]
    impl Transport for SocketTransport {
        fn write(&mut self, data: &[u8]) -> gencp_transport::Result<usize> {
            use std::io::Write;
            Ok(self.0.write(data)?)
        }

        fn read(
            &mut self,
            buf: &mut [u8],
            timeout: Option<Duration>,
        ) -> gencp_transport::Result<usize> {
            use std::io::Read;
            self.0.set_read_timeout(timeout)?;
            match self.0.read(buf) {
                Ok(n) => Ok(n),
                Err(err)
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    Ok(0)
                }
                Err(err) => Err(err.into()),
            }
        }
    }
}
