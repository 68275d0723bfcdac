//! Error and Result module.
//!
//! The error taxonomy mirrors the core's propagation policy: connection-layer
//! errors that are classifiable as retryable are caught by the
//! [`route::finder`](crate::route::finder) and attached as suppressed to a
//! first error; non-retryable errors propagate immediately.

use std::error::Error as StdError;
use std::fmt;

use crate::h2::Reason;

/// Result type often returned from methods that can have `connectcore` `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur routing, pooling or multiplexing a call.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub enum Kind {
    /// Socket read/write/connect failure.
    ///
    /// Retryable iff the request is idempotent, or no request body bytes
    /// were transmitted and another route is available.
    Io,
    /// The TLS handshake failed with a certificate validity problem. Not retried.
    TlsCertInvalid,
    /// The TLS handshake failed certificate pinning. Not retried.
    TlsCertPinningFailure,
    /// The TLS handshake failed in a way that suggests a TLS-parameter
    /// downgrade might succeed. Retried with the next `ConnectionSpec`.
    TlsDowngradeCandidate,
    /// An H2 stream was reset by the peer, or reset locally.
    StreamReset(Reason),
    /// An H2 connection-level protocol violation (GOAWAY, bad frame, bad HPACK).
    Http2,
    /// A pending item was dropped before ever being processed.
    Canceled,
    /// A call-wide or per-phase timeout elapsed.
    Timeout,
    /// A background route-planning or pool operation found no further route.
    NoRoute,
    /// A handle into a connection/pool/stream was used after the other side
    /// went away (e.g. the dispatcher task shut down).
    ChannelClosed,
}

// Sentinel type to indicate the error was caused by a timeout.
#[derive(Debug)]
pub(crate) struct TimedOut;

impl Error {
    /// Returns true if this was about a call that was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// Returns true if a sender's channel, or a pooled connection handle, is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::ChannelClosed)
    }

    /// Returns true if the error was caused by a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::Timeout) || self.find_source::<TimedOut>().is_some()
    }

    /// Returns true if this was a TLS handshake failure that a fallback
    /// [`crate::route::address::ConnectionSpec`] might still succeed at
    /// (spec.md §4.2's TLS-fallback classification).
    pub fn is_tls_downgrade_candidate(&self) -> bool {
        matches!(self.inner.kind, Kind::TlsDowngradeCandidate)
    }

    /// Returns true if this error kind is safe to retry against a different route.
    ///
    /// Mirrors the retry table: network I/O and TLS-downgrade candidates may
    /// be retried by the exchange finder; certificate failures, cancellation
    /// and protocol errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::Io | Kind::TlsDowngradeCandidate | Kind::NoRoute
        )
    }

    /// Consumes the error, returning its cause.
    pub fn into_cause(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.inner.cause
    }

    /// Returns the H2 [`Reason`] this error carries, if it is a stream reset.
    pub fn stream_reset_reason(&self) -> Option<Reason> {
        match self.inner.kind {
            Kind::StreamReset(reason) => Some(reason),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.inner.kind
    }

    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut cause = self.source();
        while let Some(err) = cause {
            if let Some(typed) = err.downcast_ref() {
                return Some(typed);
            }
            cause = err.source();
        }
        None
    }

    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(crate) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    pub(crate) fn new_closed() -> Error {
        Error::new(Kind::ChannelClosed)
    }

    pub(crate) fn new_timeout() -> Error {
        Error::new(Kind::Timeout).with(TimedOut)
    }

    pub(crate) fn new_no_route() -> Error {
        Error::new(Kind::NoRoute)
    }

    pub(crate) fn new_stream_reset(reason: Reason) -> Error {
        Error::new(Kind::StreamReset(reason))
    }

    pub(crate) fn new_h2<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Http2).with(cause)
    }

    pub(crate) fn new_hpack<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Http2).with(cause)
    }

    pub(crate) fn new_tls_downgrade_candidate<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::TlsDowngradeCandidate).with(cause)
    }

    pub(crate) fn new_tls_cert_invalid<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::TlsCertInvalid).with(cause)
    }

    pub(crate) fn new_tls_pinning_failure<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::TlsCertPinningFailure).with(cause)
    }

    /// The error's standalone message, without the message from the source.
    pub fn message(&self) -> impl fmt::Display + '_ {
        self.description()
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Io => "network I/O error",
            Kind::TlsCertInvalid => "TLS certificate validation failed",
            Kind::TlsCertPinningFailure => "certificate pinning failure",
            Kind::TlsDowngradeCandidate => "TLS handshake failed, a fallback spec may succeed",
            Kind::StreamReset(_) => "stream was reset",
            Kind::Http2 => "http2 protocol error",
            Kind::Canceled => "operation was canceled",
            Kind::Timeout => "operation timed out",
            Kind::NoRoute => "no further route to attempt",
            Kind::ChannelClosed => "channel closed",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("connectcore::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.inner.kind, &self.inner.cause) {
            (Kind::StreamReset(reason), _) => write!(f, "stream was reset: {}", reason),
            (_, Some(cause)) => write!(f, "{}: {}", self.description(), cause),
            (_, None) => f.write_str(self.description()),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

#[doc(hidden)]
trait AssertSendSync: Send + Sync + 'static {}
#[doc(hidden)]
impl AssertSendSync for Error {}

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation timed out")
    }
}

impl StdError for TimedOut {}

/// Carries the first error seen across a multi-attempt route search,
/// suppressing the rest (spec §7 propagation policy, §9 "suppressed chains").
pub(crate) struct FirstError {
    first: Option<Error>,
    suppressed: Vec<Error>,
}

impl FirstError {
    pub(crate) fn new() -> Self {
        FirstError {
            first: None,
            suppressed: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, err: Error) {
        if self.first.is_none() {
            self.first = Some(err);
        } else {
            self.suppressed.push(err);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Converts the carrier into its visible `Error`. Suppressed secondaries
    /// are expected to already have been logged at the push site.
    pub(crate) fn into_error(self) -> Error {
        self.first.unwrap_or_else(Error::new_no_route)
    }

    pub(crate) fn suppressed(&self) -> &[Error] {
        &self.suppressed
    }
}

impl fmt::Debug for FirstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirstError")
            .field("first", &self.first)
            .field("suppressed", &self.suppressed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn error_size_of() {
        assert_eq!(mem::size_of::<Error>(), mem::size_of::<usize>());
    }

    #[test]
    fn display_includes_cause() {
        let err = Error::new_io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn stream_reset_message_uses_reason_name() {
        let err = Error::new_stream_reset(Reason::REFUSED_STREAM);
        assert_eq!(err.to_string(), "stream was reset: REFUSED_STREAM");
    }

    #[test]
    fn retryable_kinds() {
        assert!(Error::new_io(std::io::Error::new(std::io::ErrorKind::Other, "x")).is_retryable());
        assert!(!Error::new_canceled().is_retryable());
        assert!(!Error::new_tls_cert_invalid(TimedOut).is_retryable());
    }

    #[test]
    fn first_error_keeps_only_first_visible() {
        let mut carrier = FirstError::new();
        carrier.push(Error::new_stream_reset(Reason::REFUSED_STREAM));
        carrier.push(Error::new_stream_reset(Reason::CANCEL));
        assert_eq!(carrier.suppressed().len(), 1);
        let visible = carrier.into_error();
        assert_eq!(visible.stream_reset_reason(), Some(Reason::REFUSED_STREAM));
    }
}
