//! GOAWAY bookkeeping (RFC 7540 §6.8): tracks whether either side has begun
//! a graceful shutdown and which streams are still safe to use.

use crate::h2::frame::{GoAway, Reason, StreamId};

#[derive(Debug, Clone)]
pub struct GoAwayState {
    sent: Option<GoAway>,
    received: Option<GoAway>,
}

impl Default for GoAwayState {
    fn default() -> Self {
        GoAwayState {
            sent: None,
            received: None,
        }
    }
}

impl GoAwayState {
    pub fn record_sent(&mut self, last_stream_id: StreamId, reason: Reason) {
        self.sent = Some(GoAway::new(last_stream_id, reason));
    }

    pub fn record_received(&mut self, frame: GoAway) {
        self.received = Some(frame);
    }

    pub fn received(&self) -> Option<&GoAway> {
        self.received.as_ref()
    }

    pub fn is_going_away(&self) -> bool {
        self.sent.is_some() || self.received.is_some()
    }

    /// A stream initiated by us is still eligible for reuse only if the
    /// peer's GOAWAY (if any) named a `last_stream_id` at or beyond it.
    pub fn stream_is_refused(&self, stream_id: StreamId) -> bool {
        match &self.received {
            Some(goaway) => stream_id > goaway.last_stream_id(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_above_last_stream_id_are_refused() {
        let mut state = GoAwayState::default();
        state.record_received(GoAway::new(StreamId::new(5), Reason::NO_ERROR));
        assert!(!state.stream_is_refused(StreamId::new(3)));
        assert!(state.stream_is_refused(StreamId::new(7)));
    }
}
