//! The H2 connection engine: reads and writes frames over a socket, keeping
//! the stream table, HPACK codecs, flow-control windows, keepalive and
//! GOAWAY bookkeeping in sync.

pub mod flow_control;
mod go_away;
mod ping;
mod settings;
mod streams;

pub use self::streams::{Initiator, State as StreamState};

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, instrument, trace, warn};

use crate::body::{Incoming, IncomingSender};
use crate::common::clock::{Clock, SystemClock};
use crate::error::{Error, Kind, Result};
use crate::h2::frame::{
    self, decode_header_block, is_end_headers, split_header_block, Data, GoAway, Head, Headers,
    Kind as FrameKind, Ping, Pseudo, Reason, RstStream, Settings, StreamId, WindowUpdate,
    HEADER_LEN,
};
use crate::h2::hpack;

use self::flow_control::FlowControl;
use self::go_away::GoAwayState;
use self::ping::{build_ping, build_pong, KeepAliveConfig, Ponger};
use self::settings::NegotiatedSettings;
use self::streams::{Stream, StreamTable};

/// The HTTP/2 connection preface a client sends before its first SETTINGS
/// frame (RFC 7540 §3.5).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Tunable parameters for one H2 connection (spec.md §9.3).
#[derive(Debug, Clone)]
pub struct H2Config {
    pub initial_stream_window_size: u32,
    pub initial_conn_window_size: u32,
    pub adaptive_window: bool,
    pub max_frame_size: u32,
    pub max_concurrent_streams: Option<u32>,
    pub max_header_list_size: Option<u32>,
    pub header_table_size: u32,
    pub keep_alive_interval: Option<Duration>,
    pub keep_alive_timeout: Duration,
    pub keep_alive_while_idle: bool,
}

impl Default for H2Config {
    fn default() -> Self {
        H2Config {
            initial_stream_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            initial_conn_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            adaptive_window: false,
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_streams: None,
            max_header_list_size: None,
            header_table_size: frame::DEFAULT_SETTINGS_HEADER_TABLE_SIZE as u32,
            keep_alive_interval: None,
            keep_alive_timeout: Duration::from_secs(1),
            keep_alive_while_idle: false,
        }
    }
}

impl H2Config {
    pub fn initial_stream_window_size(&mut self, size: u32) -> &mut Self {
        self.initial_stream_window_size = size;
        self
    }

    pub fn initial_connection_window_size(&mut self, size: u32) -> &mut Self {
        self.initial_conn_window_size = size;
        self
    }

    pub fn adaptive_window(&mut self, enabled: bool) -> &mut Self {
        self.adaptive_window = enabled;
        self
    }

    pub fn max_frame_size(&mut self, size: u32) -> &mut Self {
        self.max_frame_size = size;
        self
    }

    pub fn max_concurrent_streams(&mut self, max: u32) -> &mut Self {
        self.max_concurrent_streams = Some(max);
        self
    }

    pub fn keep_alive_interval(&mut self, interval: Option<Duration>) -> &mut Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn keep_alive_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.keep_alive_timeout = timeout;
        self
    }

    pub fn keep_alive_while_idle(&mut self, enabled: bool) -> &mut Self {
        self.keep_alive_while_idle = enabled;
        self
    }
}

struct Inner {
    streams: StreamTable,
    next_stream_id: u32,
    local_settings: NegotiatedSettings,
    remote_settings: NegotiatedSettings,
    conn_send_flow: FlowControl,
    conn_recv_flow: FlowControl,
    decoder: hpack::Decoder,
    encoder: hpack::Encoder,
    go_away: GoAwayState,
    ponger: Ponger,
}

/// One HTTP/2 connection's framing/protocol engine, driving a socket that
/// implements [`AsyncRead`] + [`AsyncWrite`].
///
/// Splitting reading and writing behind an internal [`Mutex`] (rather than
/// hyper's approach of driving everything from one poll loop) keeps this
/// engine usable both from a dedicated reader task and from direct
/// request-send calls, matching the cheap-handle-plus-background-task split
/// `client/conn/http2.rs`'s `SendRequest`/`Connection` pair uses.
pub struct H2Connection<T> {
    io: Mutex<T>,
    inner: Mutex<Inner>,
    config: H2Config,
    clock: Arc<dyn Clock>,
}

impl<T> H2Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Performs the client-side connection preface and initial SETTINGS
    /// exchange (RFC 7540 §3.5, §6.5).
    #[instrument(name = "h2_conn", skip_all)]
    pub async fn handshake(mut io: T, config: H2Config) -> Result<H2Connection<T>> {
        io.write_all(CONNECTION_PREFACE)
            .await
            .map_err(Error::new_io)?;

        let mut settings = Settings::default();
        settings.set_header_table_size(Some(config.header_table_size));
        settings.set_initial_window_size(Some(config.initial_stream_window_size));
        settings.set_max_frame_size(Some(config.max_frame_size));
        if let Some(max) = config.max_concurrent_streams {
            settings.set_max_concurrent_streams(Some(max));
        }
        if let Some(max) = config.max_header_list_size {
            settings.set_max_header_list_size(Some(max));
        }

        let mut buf = Vec::new();
        settings.encode(&mut buf);
        io.write_all(&buf).await.map_err(Error::new_io)?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ponger = Ponger::new(
            KeepAliveConfig {
                interval: config.keep_alive_interval,
                timeout: config.keep_alive_timeout,
                while_idle: config.keep_alive_while_idle,
            },
            &*clock,
        );

        debug!("sent connection preface and initial SETTINGS");

        Ok(H2Connection {
            io: Mutex::new(io),
            inner: Mutex::new(Inner {
                streams: StreamTable::new(),
                next_stream_id: 1,
                local_settings: NegotiatedSettings {
                    header_table_size: config.header_table_size,
                    initial_window_size: config.initial_stream_window_size,
                    max_frame_size: config.max_frame_size,
                    max_concurrent_streams: config.max_concurrent_streams,
                    max_header_list_size: config.max_header_list_size,
                    enable_push: false,
                },
                remote_settings: NegotiatedSettings::default(),
                conn_send_flow: FlowControl::new(frame::DEFAULT_INITIAL_WINDOW_SIZE),
                conn_recv_flow: FlowControl::new(config.initial_conn_window_size),
                decoder: hpack::Decoder::new(config.header_table_size as usize),
                encoder: hpack::Encoder::new(frame::DEFAULT_SETTINGS_HEADER_TABLE_SIZE),
                go_away: GoAwayState::default(),
                ponger,
            }),
            config,
            clock,
        })
    }

    /// Opens a new client-initiated stream (an odd stream id, RFC 7540
    /// §5.1.1) and sends its request HEADERS. Returns the stream id, a
    /// one-shot that resolves with the decoded response HEADERS, and the
    /// body the dispatch loop feeds as DATA/trailers arrive.
    #[instrument(name = "h2_stream", skip_all)]
    pub async fn send_request(
        &self,
        pseudo: Pseudo,
        fields: http::HeaderMap,
        end_stream: bool,
    ) -> Result<(StreamId, oneshot::Receiver<(Pseudo, http::HeaderMap)>, Incoming)> {
        let mut inner = self.inner.lock().await;

        if inner.go_away.is_going_away() {
            return Err(Error::new_no_route());
        }
        if let Some(max) = inner.local_settings.max_concurrent_streams {
            let open = inner.streams.len() as u32;
            if open >= max {
                return Err(Error::new(Kind::Http2));
            }
        }

        let id = StreamId::new(inner.next_stream_id);
        inner.next_stream_id += 2;

        let mut stream = Stream::new(
            id,
            inner.remote_settings.initial_window_size,
            self.config.initial_stream_window_size,
        );
        stream.state.send_open(end_stream);

        let (response_tx, response_rx) = oneshot::channel();
        let (incoming_tx, incoming) = Incoming::new(None);
        stream.response_tx = Some(response_tx);
        stream.incoming = Some(incoming_tx);
        inner.streams.insert(stream);

        let mut headers = Headers::request(id, pseudo, fields);
        headers.set_end_stream(end_stream);

        let mut buf = BytesMut::new();
        let max_frame_size = inner.remote_settings.max_frame_size as usize;
        headers.encode(&mut inner.encoder, max_frame_size, &mut buf);
        drop(inner);

        let mut io = self.io.lock().await;
        io.write_all(&buf).await.map_err(Error::new_io)?;

        trace!(stream.id = id.as_u32(), "sent request headers");
        Ok((id, response_rx, incoming))
    }

    /// Sends a DATA frame on an already-open stream, waiting for flow
    /// control credit on both the stream and the connection.
    pub async fn send_data(&self, id: StreamId, payload: Bytes, end_stream: bool) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            inner
                .conn_send_flow
                .wait_for_capacity(payload.len())
                .await;
            let stream = inner
                .streams
                .get_mut(id)
                .ok_or_else(Error::new_closed)?;
            stream.send_flow_window -= payload.len() as i64;
            inner.conn_send_flow.send_data(payload.len());
            if end_stream {
                inner
                    .streams
                    .get_mut(id)
                    .ok_or_else(Error::new_closed)?
                    .state
                    .send_close();
            }
        }

        let mut data = Data::new(id, payload);
        data.set_end_stream(end_stream);
        let mut buf = BytesMut::new();
        data.encode(&mut buf);

        let mut io = self.io.lock().await;
        io.write_all(&buf).await.map_err(Error::new_io)
    }

    /// Resets a stream locally, e.g. because the caller canceled its call.
    pub async fn reset_stream(&self, id: StreamId, reason: Reason) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(stream) = inner.streams.get_mut(id) {
                stream.state.set_reset(reason, Initiator::Local);
            }
        }
        let frame = RstStream::new(id, reason);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let mut io = self.io.lock().await;
        io.write_all(&buf).await.map_err(Error::new_io)
    }

    /// Sends a GOAWAY announcing we will process no streams above
    /// `last_stream_id` (RFC 7540 §6.8), e.g. during pool shutdown.
    pub async fn go_away(&self, reason: Reason) -> Result<()> {
        let last_stream_id = {
            let mut inner = self.inner.lock().await;
            let last = StreamId::new(inner.next_stream_id.saturating_sub(2));
            inner.go_away.record_sent(last, reason);
            last
        };
        let frame = GoAway::new(last_stream_id, reason);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let mut io = self.io.lock().await;
        io.write_all(&buf).await.map_err(Error::new_io)
    }

    /// Reads one frame's 9-byte header plus its exact-length payload off the
    /// socket, locking `self.io` only for the duration of the read.
    async fn read_frame(&self) -> Result<(Head, Bytes)> {
        let mut io = self.io.lock().await;
        let mut header = [0u8; HEADER_LEN];
        read_exact_or_eof(&mut *io, &mut header).await?;
        let head = Head::parse(&header);
        let mut payload = BytesMut::zeroed(head.length());
        read_exact_or_eof(&mut *io, &mut payload).await?;
        Ok((head, payload.freeze()))
    }

    async fn write_frame(&self, buf: &[u8]) -> Result<()> {
        let mut io = self.io.lock().await;
        io.write_all(buf).await.map_err(Error::new_io)
    }

    /// Reads and dispatches exactly one frame from the socket, updating
    /// stream state, flow-control windows, and keepalive/GOAWAY bookkeeping.
    /// Intended to be called in a loop from the connection's driving task.
    pub async fn poll_frame(&self) -> Result<()> {
        let (head, payload) = self.read_frame().await?;
        match head.kind() {
            FrameKind::Headers => self.dispatch_headers(head, payload).await,
            FrameKind::PushPromise => self.dispatch_push_promise(head, payload).await,
            FrameKind::Continuation => {
                // A bare CONTINUATION not following a HEADERS frame we're
                // still merging is a connection error (RFC 7540 §6.10).
                Err(Error::new(Kind::Http2))
            }
            FrameKind::Data => self.dispatch_data(head, payload).await,
            FrameKind::Settings => self.dispatch_settings(payload).await,
            FrameKind::GoAway => self.dispatch_go_away(payload).await,
            FrameKind::WindowUpdate => self.dispatch_window_update(head, &payload).await,
            FrameKind::Reset => self.dispatch_reset(head, &payload).await,
            FrameKind::Ping => self.dispatch_ping(head, &payload).await,
            FrameKind::Priority => {
                trace!("received PRIORITY frame");
                Ok(())
            }
            FrameKind::Unknown => {
                trace!("ignoring unknown frame type");
                Ok(())
            }
        }
    }

    /// Reassembles a HEADERS frame's header block across any follow-on
    /// CONTINUATION frames (RFC 7540 §6.2, §6.10) before HPACK-decoding it
    /// as a single unit, then routes the result to the stream's response
    /// channel (first HEADERS) or trailers (a later one with `END_STREAM`).
    async fn dispatch_headers(&self, head: Head, payload: Bytes) -> Result<()> {
        let stream_id = head.stream_id();
        let parts = split_header_block(head, payload).map_err(Error::new_h2)?;
        let mut block = BytesMut::from(&parts.block[..]);
        let mut end_headers = parts.end_headers;

        while !end_headers {
            let (next_head, next_payload) = self.read_frame().await?;
            if next_head.kind() != FrameKind::Continuation || next_head.stream_id() != stream_id {
                return Err(Error::new(Kind::Http2));
            }
            block.extend_from_slice(&next_payload);
            end_headers = is_end_headers(next_head.flag());
        }

        let mut inner = self.inner.lock().await;
        let headers = decode_header_block(
            stream_id,
            parts.end_stream,
            parts.stream_dependency,
            &block,
            &mut inner.decoder,
        )
        .map_err(Error::new_h2)?;
        let end_stream = headers.is_end_stream();

        let Some(stream) = inner.streams.get_mut(stream_id) else {
            trace!(stream.id = stream_id.as_u32(), "HEADERS for unknown stream, ignoring");
            return Ok(());
        };

        let (pseudo, fields) = headers.into_parts();
        if let Some(response_tx) = stream.response_tx.take() {
            stream.state.recv_open(end_stream);
            let _ = response_tx.send((pseudo, fields));
        } else if let Some(incoming) = &stream.incoming {
            incoming.send_trailers(fields);
        }

        if end_stream {
            stream.state.recv_close();
            stream.incoming = None;
        }

        Ok(())
    }

    /// A received PUSH_PROMISE is immediately refused: server push is out of
    /// scope for this crate's client-side core (spec.md §4.4).
    async fn dispatch_push_promise(&self, head: Head, payload: Bytes) -> Result<()> {
        let promised_id = {
            let mut inner = self.inner.lock().await;
            let (promise, _end_headers) =
                frame::PushPromise::load(head, payload, &mut inner.decoder).map_err(Error::new_h2)?;
            promise.promised_id()
        };
        debug!(stream.id = promised_id.as_u32(), "refusing server push");
        self.reset_stream(promised_id, Reason::REFUSED_STREAM).await
    }

    async fn dispatch_data(&self, head: Head, payload: Bytes) -> Result<()> {
        let len = payload.len();
        let data = Data::load(head, payload).map_err(Error::new_h2)?;
        let stream_id = data.stream_id();
        let end_stream = data.is_end_stream();

        let stream_known = {
            let mut inner = self.inner.lock().await;
            inner.conn_recv_flow.recv_data(len);
            match inner.streams.get_mut(stream_id) {
                Some(stream) => {
                    stream.recv_flow_window -= len as i64;
                    if let Some(incoming) = &stream.incoming {
                        incoming.send_data(data.into_payload());
                    }
                    if end_stream {
                        stream.state.recv_close();
                        stream.incoming = None;
                    }
                    true
                }
                None => false,
            }
        };

        // Replenish what was consumed so the peer's send window doesn't
        // starve; connection-level credit is refilled regardless of whether
        // the stream is still tracked, since it's shared across all streams.
        if len > 0 {
            self.send_window_update(StreamId::ZERO, len as u32).await?;
            if stream_known && !end_stream {
                self.send_window_update(stream_id, len as u32).await?;
            }
        }
        Ok(())
    }

    async fn send_window_update(&self, stream_id: StreamId, increment: u32) -> Result<()> {
        let frame = WindowUpdate::new(stream_id, increment);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        self.write_frame(&buf).await
    }

    async fn dispatch_settings(&self, payload: Bytes) -> Result<()> {
        let head = Head::new(FrameKind::Settings, 0, StreamId::ZERO);
        let settings = Settings::load(head, &payload).map_err(Error::new_h2)?;
        if settings.is_ack() {
            trace!("received SETTINGS ack");
            return Ok(());
        }

        {
            let mut inner = self.inner.lock().await;
            let window_delta = inner.remote_settings.apply(&settings);
            if window_delta != 0 {
                for stream in inner.streams.iter_mut() {
                    stream.send_flow_window += window_delta;
                }
            }
            if let Some(table_size) = settings.header_table_size() {
                inner.encoder.set_max_dynamic_table_size(table_size as usize);
            }
        }
        debug!(?settings, "applied SETTINGS frame, sending ack");

        let mut ack_buf = Vec::new();
        Settings::ack().encode(&mut ack_buf);
        self.write_frame(&ack_buf).await
    }

    async fn dispatch_go_away(&self, payload: Bytes) -> Result<()> {
        let goaway = GoAway::load(&payload).map_err(Error::new_h2)?;
        warn!(
            last_stream_id = goaway.last_stream_id().as_u32(),
            reason = ?goaway.reason(),
            "received GOAWAY"
        );
        self.inner.lock().await.go_away.record_received(goaway);
        Ok(())
    }

    async fn dispatch_window_update(&self, head: Head, payload: &[u8]) -> Result<()> {
        let update = WindowUpdate::load(head, payload).map_err(Error::new_h2)?;
        let mut inner = self.inner.lock().await;
        if update.stream_id().is_zero() {
            inner.conn_send_flow.expand(update.size_increment())?;
        } else if let Some(stream) = inner.streams.get_mut(update.stream_id()) {
            stream.send_flow_window = stream
                .send_flow_window
                .saturating_add(update.size_increment() as i64);
        }
        Ok(())
    }

    async fn dispatch_reset(&self, head: Head, payload: &[u8]) -> Result<()> {
        let reset = RstStream::load(head, payload).map_err(Error::new_h2)?;
        trace!(
            stream.id = reset.stream_id().as_u32(),
            reason = ?reset.reason(),
            "received RST_STREAM"
        );
        let mut inner = self.inner.lock().await;
        if let Some(stream) = inner.streams.get_mut(reset.stream_id()) {
            stream.state.set_reset(reset.reason(), Initiator::Remote);
            if let Some(incoming) = stream.incoming.take() {
                incoming.send_error(Error::new_stream_reset(reset.reason()));
            }
        }
        Ok(())
    }

    async fn dispatch_ping(&self, head: Head, payload: &[u8]) -> Result<()> {
        let ping = Ping::load(head, payload).map_err(Error::new_h2)?;
        if ping.is_ack() {
            trace!("received PONG");
            self.inner.lock().await.ponger.recv_pong(&*self.clock);
            return Ok(());
        }

        trace!("received PING, sending PONG");
        self.inner.lock().await.ponger.record_activity(&*self.clock);
        let pong = build_pong(&ping);
        let mut buf = BytesMut::new();
        pong.encode(&mut buf);
        self.write_frame(&buf).await
    }

    /// True if an outstanding keepalive ping has missed its deadline; the
    /// pool's health check uses this to route new non-idempotent calls to a
    /// different connection (spec.md §4.4, SPEC_FULL.md's supplemented
    /// `is_degraded` accessor).
    pub async fn is_degraded(&self) -> bool {
        self.inner.lock().await.ponger.poll_timeout(&*self.clock)
    }

    pub async fn open_stream_count(&self) -> usize {
        self.inner.lock().await.streams.len()
    }

    /// The peer's `SETTINGS_MAX_CONCURRENT_STREAMS`, capping this
    /// connection's [`crate::connection::AllocationLimit`].
    pub async fn remote_max_concurrent_streams(&self) -> Option<u32> {
        self.inner.lock().await.remote_settings.max_concurrent_streams
    }

    pub async fn is_going_away(&self) -> bool {
        self.inner.lock().await.go_away.is_going_away()
    }
}

impl<T> H2Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Spawns the connection's dedicated reader task via `exec`, looping
    /// `poll_frame` until the socket closes or a fatal protocol error
    /// occurs (spec.md §4.4: "the reader is driven by a single dedicated
    /// task, ... the writer is driven by whoever calls the submit APIs").
    pub fn spawn_reader<E>(self: Arc<Self>, exec: &E)
    where
        E: crate::rt::bounds::ConnectionDriverExec,
    {
        exec.execute_driver(async move {
            loop {
                if self.poll_frame().await.is_err() {
                    debug!("h2 connection reader task exiting");
                    break;
                }
            }
        });
    }

    /// Spawns a task driving the configured keepalive ping schedule
    /// (spec.md §4.4): sends a PING once the interval elapses, and sends a
    /// GOAWAY and stops once an outstanding ping has been missed for longer
    /// than `keep_alive_timeout`. A no-op if no interval is configured.
    pub fn spawn_keepalive<E>(self: Arc<Self>, exec: &E)
    where
        E: crate::rt::bounds::ConnectionDriverExec,
    {
        let Some(interval) = self.config.keep_alive_interval else {
            return;
        };
        let tick = interval.min(self.config.keep_alive_timeout).max(Duration::from_millis(1));

        exec.execute_driver(async move {
            loop {
                tokio::time::sleep(tick).await;

                let streams_open = self.open_stream_count().await > 0;
                let payload = {
                    let mut inner = self.inner.lock().await;
                    inner.ponger.poll_send_ping(&*self.clock, streams_open)
                };
                if let Some(payload) = payload {
                    trace!("sending keepalive PING");
                    let mut buf = BytesMut::new();
                    build_ping(payload).encode(&mut buf);
                    if self.write_frame(&buf).await.is_err() {
                        break;
                    }
                }

                let degraded = {
                    let mut inner = self.inner.lock().await;
                    inner.ponger.poll_timeout(&*self.clock)
                };
                if degraded {
                    warn!("keepalive ping timed out, closing connection");
                    let _ = self.go_away(Reason::PROTOCOL_ERROR).await;
                    break;
                }
            }
        });
    }
}

async fn read_exact_or_eof<T: AsyncRead + Unpin>(io: &mut T, buf: &mut [u8]) -> Result<()> {
    match io.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::new_closed()),
        Err(e) => Err(Error::new_io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method, Uri};

    #[tokio::test]
    async fn handshake_writes_preface_and_settings() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let handshake = tokio::spawn(H2Connection::handshake(client_io, H2Config::default()));

        let mut buf = vec![0u8; CONNECTION_PREFACE.len()];
        server_io.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, CONNECTION_PREFACE);

        let mut header = [0u8; HEADER_LEN];
        server_io.read_exact(&mut header).await.unwrap();
        let head = Head::parse(&header);
        assert_eq!(head.kind(), FrameKind::Settings);

        handshake.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_request_assigns_odd_stream_ids() {
        let (client_io, mut server_io) = tokio::io::duplex(8192);
        let conn = tokio::spawn(async move {
            let conn = H2Connection::handshake(client_io, H2Config::default())
                .await
                .unwrap();
            let uri: Uri = "https://example.com/a".parse().unwrap();
            let (id1, ..) = conn
                .send_request(Pseudo::request(Method::GET, &uri), HeaderMap::new(), true)
                .await
                .unwrap();
            let (id2, ..) = conn
                .send_request(Pseudo::request(Method::GET, &uri), HeaderMap::new(), true)
                .await
                .unwrap();
            (id1, id2)
        });

        // Drain the preface + SETTINGS + two HEADERS frames the server would
        // otherwise block the client on once the duplex buffer fills.
        let mut sink = vec![0u8; 8192];
        let _ = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            server_io.read(&mut sink),
        )
        .await;

        let (id1, id2) = conn.await.unwrap();
        assert!(id1.is_client_initiated());
        assert!(id2.is_client_initiated());
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn dispatch_headers_delivers_response_to_caller() {
        let (client_io, mut server_io) = tokio::io::duplex(8192);
        let conn = H2Connection::handshake(client_io, H2Config::default())
            .await
            .unwrap();

        let mut preface_and_settings = vec![0u8; CONNECTION_PREFACE.len() + HEADER_LEN];
        server_io.read_exact(&mut preface_and_settings).await.unwrap();

        let uri: Uri = "https://example.com/a".parse().unwrap();
        let (stream_id, response_rx, _body) = conn
            .send_request(Pseudo::request(Method::GET, &uri), HeaderMap::new(), true)
            .await
            .unwrap();

        let mut header = [0u8; HEADER_LEN];
        server_io.read_exact(&mut header).await.unwrap();
        let head = Head::parse(&header);
        let mut req_payload = vec![0u8; head.length()];
        server_io.read_exact(&mut req_payload).await.unwrap();

        let mut encoder = hpack::Encoder::new(4096);
        let mut response_headers = Headers::request(
            stream_id,
            Pseudo::response(http::StatusCode::OK),
            HeaderMap::new(),
        );
        response_headers.set_end_stream(true);
        let mut buf = BytesMut::new();
        response_headers.encode(&mut encoder, 16_384, &mut buf);
        server_io.write_all(&buf).await.unwrap();

        conn.poll_frame().await.unwrap();

        let (pseudo, _fields) = response_rx.await.unwrap();
        assert_eq!(pseudo.status, Some(http::StatusCode::OK));
    }

    #[tokio::test]
    async fn inbound_ping_is_answered_with_pong() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let conn = H2Connection::handshake(client_io, H2Config::default())
            .await
            .unwrap();

        let mut preface_and_settings = vec![0u8; CONNECTION_PREFACE.len() + HEADER_LEN];
        server_io.read_exact(&mut preface_and_settings).await.unwrap();

        let mut buf = BytesMut::new();
        Ping::new([1, 2, 3, 4, 5, 6, 7, 8]).encode(&mut buf);
        server_io.write_all(&buf).await.unwrap();

        conn.poll_frame().await.unwrap();

        let mut header = [0u8; HEADER_LEN];
        server_io.read_exact(&mut header).await.unwrap();
        let head = Head::parse(&header);
        assert_eq!(head.kind(), FrameKind::Ping);
        let mut payload = [0u8; 8];
        server_io.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn inbound_settings_are_applied_and_acked() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let conn = H2Connection::handshake(client_io, H2Config::default())
            .await
            .unwrap();

        let mut preface_and_settings = vec![0u8; CONNECTION_PREFACE.len() + HEADER_LEN];
        server_io.read_exact(&mut preface_and_settings).await.unwrap();

        let mut settings = Settings::default();
        settings.set_initial_window_size(Some(1_000));
        let mut buf = Vec::new();
        settings.encode(&mut buf);
        server_io.write_all(&buf).await.unwrap();

        conn.poll_frame().await.unwrap();

        let mut header = [0u8; HEADER_LEN];
        server_io.read_exact(&mut header).await.unwrap();
        let head = Head::parse(&header);
        assert_eq!(head.kind(), FrameKind::Settings);
        assert_eq!(head.length(), 0, "an ACK SETTINGS frame carries no payload");
        assert_eq!(conn.inner.lock().await.remote_settings.initial_window_size, 1_000);
    }
}
