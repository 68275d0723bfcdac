//! The exchange codec a caller gets back from [`super::Connection::new_codec`]:
//! either route it falls through to the out-of-scope HTTP/1 collaborator, or
//! speak directly to the H2 frame engine.

use std::sync::Arc;

use http::HeaderMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use crate::body::Incoming;
use crate::error::Result;
use crate::h2::frame::{Pseudo, StreamId};
use crate::h2::proto::H2Connection;

/// A bound handle for sending one exchange over its connection.
#[allow(missing_debug_implementations)]
pub enum Codec<T> {
    /// The caller must use the out-of-scope `Http1Codec` collaborator
    /// directly; connectcore only tracks connection identity for H1.
    Http1,
    Http2(Arc<H2Connection<T>>),
}

impl<T> Codec<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Sends request headers on a fresh H2 stream, returning its stream id,
    /// a one-shot that resolves with the decoded response HEADERS, and the
    /// body the dispatch loop feeds as DATA/trailers arrive. Panics if
    /// called on an `Http1` codec — callers must check `is_http2` before
    /// reaching here.
    pub async fn send_h2_request(
        &self,
        pseudo: Pseudo,
        fields: HeaderMap,
        end_stream: bool,
    ) -> Result<(StreamId, oneshot::Receiver<(Pseudo, HeaderMap)>, Incoming)> {
        match self {
            Codec::Http2(h2) => h2.send_request(pseudo, fields, end_stream).await,
            Codec::Http1 => panic!("send_h2_request called on an Http1 codec"),
        }
    }

    pub fn is_http2(&self) -> bool {
        matches!(self, Codec::Http2(_))
    }
}
