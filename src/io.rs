//! The unified transport type routes are connected into: plain TCP for
//! cleartext addresses, or whatever stream a [`route::collab::TlsConnector`]
//! hands back for TLS ones. The route layer erases the concrete type behind
//! this trait object so [`connection::Connection`] doesn't need a type
//! parameter per TLS implementation.

use tokio::io::{AsyncRead, AsyncWrite};

/// A connected, possibly-TLS-wrapped byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// The boxed form stored on [`crate::connection::Connection`] once a route
/// has finished connecting.
pub type BoxedTransport = Box<dyn Transport>;
