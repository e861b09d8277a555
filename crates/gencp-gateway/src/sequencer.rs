use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// Allocates request ids and enforces one outstanding request per channel.
///
/// Ids start at 0 and wrap from 65535 back to 0. Each session or client owns
/// its own sequencer, so independent channels never share a counter.
#[derive(Debug, Clone, Default)]
pub struct RequestSequencer {
    next: u16,
    outstanding: Option<u16>,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting from `id`.
    pub fn starting_at(id: u16) -> Self {
        Self {
            next: id,
            outstanding: None,
        }
    }

    /// Allocate the next id and mark it outstanding.
    pub fn issue(&mut self) -> Result<u16> {
        if let Some(id) = self.outstanding {
            return Err(GatewayError::RequestOutstanding(id));
        }
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        self.outstanding = Some(id);
        debug!(request_id = id, "issued request id");
        Ok(id)
    }

    /// The id awaiting an acknowledgement, if any.
    pub fn outstanding(&self) -> Option<u16> {
        self.outstanding
    }

    /// The id the next [`issue`](Self::issue) will return.
    pub fn peek_next(&self) -> u16 {
        self.next
    }

    /// The outstanding request was acknowledged.
    pub fn settle(&mut self) -> Option<u16> {
        self.outstanding.take()
    }

    /// Give up on the outstanding request without an acknowledgement.
    pub fn abandon(&mut self) -> Option<u16> {
        let id = self.outstanding.take();
        if let Some(id) = id {
            warn!(request_id = id, "abandoned outstanding request");
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_count_up_from_zero() {
        let mut seq = RequestSequencer::new();
        assert_eq!(seq.issue().unwrap(), 0);
        seq.settle();
        assert_eq!(seq.issue().unwrap(), 1);
        seq.settle();
        assert_eq!(seq.peek_next(), 2);
    }

    #[test]
    fn second_issue_refused_while_outstanding() {
        let mut seq = RequestSequencer::new();
        let id = seq.issue().unwrap();
        assert!(matches!(seq.issue(), Err(GatewayError::RequestOutstanding(x)) if x == id));
        assert_eq!(seq.abandon(), Some(id));
        assert_eq!(seq.issue().unwrap(), id + 1);
    }

    #[test]
    fn wraps_at_u16_max() {
        let mut seq = RequestSequencer::starting_at(u16::MAX);
        assert_eq!(seq.issue().unwrap(), u16::MAX);
        seq.settle();
        assert_eq!(seq.issue().unwrap(), 0);
    }

    #[test]
    fn full_cycle_visits_every_id_once() {
        let mut seq = RequestSequencer::new();
        let mut seen = vec![false; 1 << 16];
        for _ in 0..(1u32 << 16) {
            let id = seq.issue().unwrap();
            assert!(!seen[usize::from(id)]);
            seen[usize::from(id)] = true;
            seq.settle();
        }
        assert!(seen.iter().all(|s| *s));
        assert_eq!(seq.peek_next(), 0);
    }

    #[test]
    fn independent_sequencers_do_not_share_state() {
        let mut a = RequestSequencer::new();
        let mut b = RequestSequencer::new();
        a.issue().unwrap();
        a.settle();
        assert_eq!(b.issue().unwrap(), 0);
    }

    #[test]
    fn settle_without_outstanding_is_none() {
        let mut seq = RequestSequencer::new();
        assert_eq!(seq.settle(), None);
        assert_eq!(seq.abandon(), None);
    }
}
