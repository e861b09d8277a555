use gencp_packet::{GenCpError, PacketStream};
use gencp_transport::Transport;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::session::{GatewaySession, ReadOutcome};

/// An ASCII gateway bound to a transport.
///
/// `write` sends the request for one command line; `read` collects the
/// acknowledgement and returns the formatted response in pieces no larger
/// than the caller's buffer.
pub struct Gateway<T> {
    stream: PacketStream<T>,
    session: GatewaySession,
}

impl<T: Transport> Gateway<T> {
    /// Create a gateway with default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, GatewayConfig::default())
    }

    /// Create a gateway with explicit configuration.
    pub fn with_config(transport: T, config: GatewayConfig) -> Self {
        Self {
            stream: PacketStream::with_config(transport, config.stream_config()),
            session: GatewaySession::new(config),
        }
    }

    /// Parse `line` and send its request.
    ///
    /// Returns the request id. Input left over from a failed exchange is
    /// drained first.
    pub fn write(&mut self, line: &str) -> Result<u16> {
        let outbound = self.session.write_command(line)?;
        if outbound.flush_input {
            match self.stream.drain_input() {
                Ok(dropped) => debug!(dropped, "resynchronized input"),
                Err(err) => warn!(%err, "input drain failed; sending anyway"),
            }
        }
        if let Err(err) = self.stream.send(&outbound.packet) {
            self.session.abort();
            return Err(err.into());
        }
        Ok(outbound.request_id)
    }

    /// Read the next piece of the current response into `dst`.
    ///
    /// Validation failures and, with a non-zero read timeout, missing
    /// acknowledgements come back as `ERR` text. With a zero timeout and
    /// nothing received yet, returns zero bytes without end-of-message and
    /// the request stays outstanding.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome> {
        if self.session.has_pending() {
            return Ok(self.session.read_pending(dst));
        }
        let request_id = self
            .session
            .expected()
            .map(|e| e.request_id)
            .ok_or(GatewayError::NothingOutstanding)?;

        let timeout = self.session.config().read_timeout;
        match self.stream.read_ack(request_id, timeout) {
            Ok(ack) => self.session.read_response(&ack, dst),
            Err(err @ GenCpError::Timeout { .. }) => match timeout {
                Some(t) if !t.is_zero() => Ok(self.session.fail(&err, dst)),
                _ => Ok(ReadOutcome {
                    bytes_read: 0,
                    end_of_message: false,
                }),
            },
            Err(err @ (GenCpError::ConnectionClosed | GenCpError::Transport(_))) => {
                self.session.abort();
                Err(err.into())
            }
            Err(err) => Ok(self.session.fail(&err, dst)),
        }
    }

    /// Read until end-of-message and return the whole response line.
    pub fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        let mut buf = vec![0u8; self.session.config().max_response];
        loop {
            let outcome = self.read(&mut buf)?;
            line.extend_from_slice(&buf[..outcome.bytes_read]);
            if outcome.end_of_message {
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
        }
    }

    /// Drop undelivered response text and stale transport input.
    pub fn flush(&mut self) -> Result<usize> {
        let mut scratch = vec![0u8; self.session.config().max_response];
        while self.session.has_pending() {
            self.session.read_pending(&mut scratch);
        }
        Ok(self.stream.drain_input()?)
    }

    pub fn session(&self) -> &GatewaySession {
        &self.session
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        self.stream.get_ref()
    }

    /// Consume the gateway and return the transport.
    pub fn into_inner(self) -> T {
        self.stream.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use bytes::BytesMut;
    use gencp_packet::{decode_request, encode_read_ack, Request, StatusCode};

    use super::*;
    use crate::device::SimulatedDevice;
    use crate::session::Resync;

    /// Loopback transport that answers every request from a simulated
    /// device, optionally dropping or corrupting replies.
    struct DeviceLoop {
        device: SimulatedDevice,
        inbox: VecDeque<u8>,
        silent: bool,
        corrupt_next: bool,
        drained: usize,
    }

    impl DeviceLoop {
        fn new() -> Self {
            Self {
                device: SimulatedDevice::new(),
                inbox: VecDeque::new(),
                silent: false,
                corrupt_next: false,
                drained: 0,
            }
        }
    }

    impl Transport for DeviceLoop {
        fn write(&mut self, data: &[u8]) -> gencp_transport::Result<usize> {
            if !self.silent {
                if let Some(reply) = self.device.handle(data) {
                    let mut reply = reply.to_vec();
                    if std::mem::take(&mut self.corrupt_next) {
                        let last = reply.len() - 1;
                        reply[last] ^= 0xFF;
                    }
                    self.inbox.extend(reply);
                }
            }
            Ok(data.len())
        }

        fn read(
            &mut self,
            buf: &mut [u8],
            _timeout: Option<Duration>,
        ) -> gencp_transport::Result<usize> {
            let n = buf.len().min(self.inbox.len());
            for (slot, byte) in buf.iter_mut().zip(self.inbox.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn drain_input(&mut self) -> gencp_transport::Result<usize> {
            let n = self.inbox.len();
            self.inbox.clear();
            self.drained += n;
            Ok(n)
        }
    }

    fn gateway(timeout: Option<Duration>) -> Gateway<DeviceLoop> {
        Gateway::with_config(
            DeviceLoop::new(),
            GatewayConfig {
                read_timeout: timeout,
                ..GatewayConfig::default()
            },
        )
    }

    #[test]
    fn write_then_read_back_register() {
        let mut gw = gateway(Some(Duration::from_millis(50)));
        gw.write("U32 0x208 = 5").unwrap();
        assert_eq!(gw.read_line().unwrap(), "OK\n");
        gw.write("U32 0x208 ?").unwrap();
        assert_eq!(gw.read_line().unwrap(), "R0x208=5 (0x00000005)\n");
    }

    #[test]
    fn reads_device_identity_string() {
        let mut gw = gateway(Some(Duration::from_millis(50)));
        gw.write("C20 0x44 ?").unwrap();
        assert_eq!(gw.read_line().unwrap(), "R0x44=SimCam GenCP-1\n");
    }

    #[test]
    fn single_byte_reads() {
        let mut gw = gateway(Some(Duration::from_millis(50)));
        gw.write("U16 0x300 = 7").unwrap();
        let mut out = Vec::new();
        let mut eom = Vec::new();
        for _ in 0..3 {
            let mut b = [0u8; 1];
            let outcome = gw.read(&mut b).unwrap();
            out.push(b[0]);
            eom.push(outcome.end_of_message);
        }
        assert_eq!(out, b"OK\n");
        assert_eq!(eom, [false, false, true]);
    }

    #[test]
    fn corrupted_reply_then_flush_on_next_write() {
        let mut gw = gateway(Some(Duration::from_millis(50)));
        gw.stream.get_mut().corrupt_next = true;

        gw.write("C20 0x44 ?").unwrap();
        assert_eq!(gw.read_line().unwrap(), "ERR 2 (0x2)\n");
        assert_eq!(gw.session().resync_state(), Resync::AwaitingFlush);

        // Late garbage from the failed exchange.
        gw.stream.get_mut().inbox.extend([0xAA; 5]);
        gw.write("U32 0x208 ?").unwrap();
        assert_eq!(gw.get_ref().drained, 5);
        assert_eq!(gw.session().resync_state(), Resync::Idle);
        assert!(gw.read_line().unwrap().starts_with("R0x208="));
    }

    #[test]
    fn silent_device_times_out_with_err() {
        let mut gw = gateway(Some(Duration::from_millis(20)));
        gw.stream.get_mut().silent = true;
        gw.write("U32 0x208 ?").unwrap();
        assert_eq!(gw.read_line().unwrap(), "ERR 11 (0xB)\n");
        assert_eq!(gw.session().resync_state(), Resync::AwaitingFlush);
    }

    #[test]
    fn zero_timeout_poll_keeps_request_outstanding() {
        let mut gw = gateway(Some(Duration::ZERO));
        gw.stream.get_mut().silent = true;
        gw.write("U32 0x208 ?").unwrap();

        let mut buf = [0u8; 16];
        let outcome = gw.read(&mut buf).unwrap();
        assert_eq!(outcome.bytes_read, 0);
        assert!(!outcome.end_of_message);
        assert!(gw.session().expected().is_some());
        assert_eq!(gw.session().resync_state(), Resync::Idle);

        let id = gw.session().expected().unwrap().request_id;
        let mut ack = BytesMut::new();
        encode_read_ack(id, StatusCode::SUCCESS, &[0, 0, 0, 3], &mut ack);
        gw.stream.get_mut().inbox.extend(ack.iter().copied());
        let outcome = gw.read(&mut buf).unwrap();
        assert_eq!(&buf[..outcome.bytes_read], b"R0x208=3 (0x00000003)\n");
    }

    #[test]
    fn device_rejection_is_reported_in_band() {
        let mut gw = gateway(Some(Duration::from_millis(50)));
        gw.write("C8 0x4 =hacked").unwrap();
        assert_eq!(gw.read_line().unwrap(), "ERR 4 (0x4)\n");
    }

    #[test]
    fn flush_drops_pending_text() {
        let mut gw = gateway(Some(Duration::from_millis(50)));
        gw.write("U32 0x208 ?").unwrap();
        let mut small = [0u8; 2];
        gw.read(&mut small).unwrap();
        assert!(gw.session().has_pending());
        gw.flush().unwrap();
        assert!(!gw.session().has_pending());
    }

    #[test]
    fn parse_error_sends_nothing() {
        let mut gw = gateway(Some(Duration::from_millis(50)));
        let err = gw.write("U12 0 ?").unwrap_err();
        assert!(matches!(err, GatewayError::Parse(_)));
        assert!(gw.get_ref().inbox.is_empty());
        assert!(matches!(
            gw.read(&mut [0u8; 8]),
            Err(GatewayError::NothingOutstanding)
        ));
    }

    #[test]
    fn requests_reach_device_with_increasing_ids() {
        let mut gw = gateway(Some(Duration::from_millis(50)));
        let a = gw.write("U16 0x300 ?").unwrap();
        gw.read_line().unwrap();
        let b = gw.write("U16 0x300 ?").unwrap();
        gw.read_line().unwrap();
        assert_eq!((a, b), (0, 1));

        let last = gw.session().last_request().unwrap().clone();
        assert!(matches!(
            decode_request(&last, 64).unwrap(),
            Request::ReadMem { request_id: 1, .. }
        ));
    }
}
