//! In-process transport doubles shared by the unit tests.

use std::collections::VecDeque;
use std::time::Duration;

use gencp_transport::{Result, Transport};

use crate::device::SimulatedDevice;

/// Transport that answers every write from a simulated device.
pub(crate) struct Loopback {
    pub device: SimulatedDevice,
    pub inbox: VecDeque<u8>,
    pub requests: usize,
}

impl Loopback {
    pub fn new(device: SimulatedDevice) -> Self {
        Self {
            device,
            inbox: VecDeque::new(),
            requests: 0,
        }
    }
}

impl Transport for Loopback {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.requests += 1;
        if let Some(reply) = self.device.handle(data) {
            self.inbox.extend(reply.iter().copied());
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Option<Duration>) -> Result<usize> {
        let n = buf.len().min(self.inbox.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
