//! Per-stream state machine (RFC 7540 §5.1).
//!
//! ```not_rust
//!                              +--------+
//!                     recv H   |  idle  |
//!                    ,---------|        |
//!                   v          +--------+
//!            +----------+          |
//!            |          |          | send H /
//!            |          |          | recv H
//!            |          v          v
//!            |      +--------+          recv ES /
//!            |      |  open  |----------send ES
//!            |      +--------+
//!            |      half   |     half
//!            |     closed  |    closed
//!            |    (remote) |   (local)
//!            |            \          /
//!            |             \        /
//!            |   send R /   v      v  recv R /
//!            |   recv R   +--------+  send R
//!            `----------->| closed |<-----------
//!                         +--------+
//! ```

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::body::IncomingSender;
use crate::h2::frame::{Pseudo, Reason, StreamId};

/// Who initiated a stream reset, used only for diagnostics/logging.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Initiator {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
enum Peer {
    #[default]
    AwaitingHeaders,
    Streaming,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Cause {
    EndStream,
    Reset(Reason, Initiator),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Inner {
    Idle,
    Open { local: Peer, remote: Peer },
    HalfClosedLocal(Peer),
    HalfClosedRemote(Peer),
    Closed(Cause),
}

/// The state of a single H2 stream.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct State {
    inner: Inner,
}

impl Default for State {
    fn default() -> State {
        State { inner: Inner::Idle }
    }
}

impl State {
    /// Opens the send-half when we issue a HEADERS frame.
    pub fn send_open(&mut self, end_stream: bool) {
        let local = Peer::Streaming;
        self.inner = match self.inner {
            Inner::Idle => {
                if end_stream {
                    Inner::HalfClosedLocal(Peer::AwaitingHeaders)
                } else {
                    Inner::Open {
                        local,
                        remote: Peer::AwaitingHeaders,
                    }
                }
            }
            Inner::Open {
                local: Peer::AwaitingHeaders,
                remote,
            } => {
                if end_stream {
                    Inner::HalfClosedLocal(remote)
                } else {
                    Inner::Open { local, remote }
                }
            }
            other => other,
        };
    }

    /// Opens the receive-half when a HEADERS frame arrives.
    pub fn recv_open(&mut self, end_stream: bool) {
        self.inner = match self.inner {
            Inner::Idle => {
                if end_stream {
                    Inner::HalfClosedRemote(Peer::AwaitingHeaders)
                } else {
                    Inner::Open {
                        local: Peer::AwaitingHeaders,
                        remote: Peer::Streaming,
                    }
                }
            }
            Inner::Open {
                local,
                remote: Peer::AwaitingHeaders,
            } => {
                if end_stream {
                    Inner::HalfClosedRemote(local)
                } else {
                    Inner::Open {
                        local,
                        remote: Peer::Streaming,
                    }
                }
            }
            other => other,
        };
    }

    pub fn recv_close(&mut self) {
        self.inner = match self.inner {
            Inner::Open { local, .. } => Inner::HalfClosedRemote(local),
            Inner::HalfClosedLocal(_) => Inner::Closed(Cause::EndStream),
            other => other,
        };
    }

    pub fn send_close(&mut self) {
        self.inner = match self.inner {
            Inner::Open { remote, .. } => Inner::HalfClosedLocal(remote),
            Inner::HalfClosedRemote(_) => Inner::Closed(Cause::EndStream),
            other => other,
        };
    }

    pub fn set_reset(&mut self, reason: Reason, initiator: Initiator) {
        self.inner = Inner::Closed(Cause::Reset(reason, initiator));
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.inner, Inner::Closed(_))
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.inner, Inner::Idle)
    }

    pub fn is_send_closed(&self) -> bool {
        matches!(self.inner, Inner::Closed(_) | Inner::HalfClosedLocal(_))
    }

    pub fn is_recv_closed(&self) -> bool {
        matches!(self.inner, Inner::Closed(_) | Inner::HalfClosedRemote(_))
    }

    pub fn reset_reason(&self) -> Option<(Reason, Initiator)> {
        match self.inner {
            Inner::Closed(Cause::Reset(reason, initiator)) => Some((reason, initiator)),
            _ => None,
        }
    }
}

/// Per-stream flow-control windows and state, keyed by stream id on the
/// owning `H2Connection`.
pub struct Stream {
    pub id: StreamId,
    pub state: State,
    pub send_flow_window: i64,
    pub recv_flow_window: i64,
    /// Fires once with the decoded response HEADERS; taken on first use so a
    /// trailers HEADERS frame later on the same stream is routed to
    /// `incoming` instead.
    pub response_tx: Option<oneshot::Sender<(Pseudo, http::HeaderMap)>>,
    /// The write half of this stream's body channel, fed DATA/trailers as
    /// they're dispatched. `None` once the stream has no caller left to
    /// deliver to (response dropped, or already ended).
    pub incoming: Option<IncomingSender>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("send_flow_window", &self.send_flow_window)
            .field("recv_flow_window", &self.recv_flow_window)
            .finish()
    }
}

impl Stream {
    pub fn new(id: StreamId, initial_send_window: u32, initial_recv_window: u32) -> Stream {
        Stream {
            id,
            state: State::default(),
            send_flow_window: initial_send_window as i64,
            recv_flow_window: initial_recv_window as i64,
            response_tx: None,
            incoming: None,
        }
    }
}

/// The live stream table for one H2 connection.
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: HashMap<StreamId, Stream>,
}

impl StreamTable {
    pub fn new() -> StreamTable {
        StreamTable::default()
    }

    pub fn insert(&mut self, stream: Stream) {
        self.streams.insert(stream.id, stream);
    }

    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub fn remove(&mut self, id: StreamId) -> Option<Stream> {
        self.streams.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn retain_open(&mut self) {
        self.streams.retain(|_, s| !s.state.is_closed());
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.streams.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_response_lifecycle_reaches_closed() {
        let mut state = State::default();
        state.send_open(false); // send HEADERS
        assert!(!state.is_send_closed());
        state.send_close(); // send END_STREAM on DATA
        assert!(state.is_send_closed());
        assert!(!state.is_closed());

        state.recv_open(false); // recv response HEADERS
        state.recv_close(); // recv END_STREAM
        assert!(state.is_closed());
    }

    #[test]
    fn remote_reset_closes_stream() {
        let mut state = State::default();
        state.send_open(true);
        state.set_reset(Reason::CANCEL, Initiator::Remote);
        assert!(state.is_closed());
        assert_eq!(state.reset_reason(), Some((Reason::CANCEL, Initiator::Remote)));
    }

    #[test]
    fn stream_table_prunes_closed_streams() {
        let mut table = StreamTable::new();
        let mut s = Stream::new(StreamId::new(1), 65535, 65535);
        s.state.send_open(true);
        s.state.set_reset(Reason::CANCEL, Initiator::Local);
        table.insert(s);
        table.insert(Stream::new(StreamId::new(3), 65535, 65535));
        table.retain_open();
        assert_eq!(table.len(), 1);
        assert!(table.get(StreamId::new(3)).is_some());
    }
}
