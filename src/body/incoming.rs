//! Bridges one H2 stream's DATA/trailer frames to the [`http_body::Body`]
//! contract a caller polls against, grounded on the channel-backed body the
//! teacher uses to decouple body production from body consumption.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::ready;
use http::HeaderMap;
use http_body::{Body, SizeHint};
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;

/// One chunk of a streamed body: either more data, or the final trailers.
#[derive(Debug)]
pub(crate) enum Chunk {
    Data(Bytes),
    Trailers(HeaderMap),
}

/// The read half of a streamed response/request body, fed by the H2
/// connection's frame-dispatch loop as DATA and trailing HEADERS frames
/// arrive for this stream.
pub struct Incoming {
    content_length: Option<u64>,
    data_done: bool,
    rx: mpsc::UnboundedReceiver<Result<Chunk, Error>>,
}

impl Incoming {
    pub(crate) fn new(
        content_length: Option<u64>,
    ) -> (IncomingSender, Incoming) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            IncomingSender { tx },
            Incoming {
                content_length,
                data_done: false,
                rx,
            },
        )
    }

    /// An already-complete, empty body — used for requests/responses with
    /// `END_STREAM` set on their HEADERS frame.
    pub fn empty() -> Incoming {
        let (tx, rx) = Incoming::new(Some(0));
        drop(tx);
        rx
    }
}

/// The write half, held by the H2 connection engine and fed as frames
/// arrive; dropping it without sending anything ends the body with an
/// error on the next poll, mirroring a reset stream.
pub(crate) struct IncomingSender {
    tx: mpsc::UnboundedSender<Result<Chunk, Error>>,
}

impl IncomingSender {
    pub(crate) fn send_data(&self, data: Bytes) {
        let _ = self.tx.send(Ok(Chunk::Data(data)));
    }

    pub(crate) fn send_trailers(&self, trailers: HeaderMap) {
        let _ = self.tx.send(Ok(Chunk::Trailers(trailers)));
    }

    pub(crate) fn send_error(&self, err: Error) {
        let _ = self.tx.send(Err(err));
    }
}

impl Body for Incoming {
    type Data = Bytes;
    type Error = Error;

    fn poll_data(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        if self.data_done {
            return Poll::Ready(None);
        }
        match ready!(self.rx.poll_recv(cx)) {
            Some(Ok(Chunk::Data(bytes))) => Poll::Ready(Some(Ok(bytes))),
            Some(Ok(Chunk::Trailers(_))) => {
                self.data_done = true;
                Poll::Ready(None)
            }
            Some(Err(e)) => {
                self.data_done = true;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                self.data_done = true;
                Poll::Ready(None)
            }
        }
    }

    fn poll_trailers(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        if !self.data_done {
            // Drain any remaining data frames first; a well-behaved caller
            // always exhausts `poll_data` before asking for trailers.
            return Poll::Ready(Ok(None));
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(Chunk::Trailers(h)))) => Poll::Ready(Ok(Some(h))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Err(e)),
            Poll::Ready(_) | Poll::Pending => Poll::Ready(Ok(None)),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.data_done
    }

    fn size_hint(&self) -> SizeHint {
        match self.content_length {
            Some(len) => SizeHint::with_exact(len),
            None => SizeHint::default(),
        }
    }
}

impl std::fmt::Debug for Incoming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incoming").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::poll_fn;
    use http_body::Body as _;

    #[tokio::test]
    async fn yields_data_then_ends() {
        let (tx, mut body) = Incoming::new(Some(5));
        tx.send_data(Bytes::from_static(b"hello"));
        drop(tx);

        let mut collected = Vec::new();
        loop {
            match poll_fn(|cx| Pin::new(&mut body).poll_data(cx)).await {
                Some(chunk) => collected.push(chunk.unwrap()),
                None => break,
            }
        }
        assert_eq!(collected.concat(), b"hello");
        assert!(body.is_end_stream());
    }

    #[test]
    fn empty_body_has_zero_size_hint() {
        let body = Incoming::empty();
        assert_eq!(body.size_hint().exact(), Some(0));
    }
}
