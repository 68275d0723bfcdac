//! The external-collaborator traits named by spec.md §6: DNS resolution,
//! proxy selection, TLS, certificate pinning, authentication and event
//! notification all live outside the core and are reached only through
//! these object-safe traits.

use std::net::SocketAddr;

use async_trait::async_trait;
use http::{HeaderMap, Request, Response};

use crate::error::Result;
use crate::route::address::Address;
use crate::route::route::{Proxy, Route};

/// Resolves a host to a set of candidate IP addresses.
#[async_trait]
pub trait Dns: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<Vec<SocketAddr>>;
}

/// Chooses proxies to try for an address, in preference order.
pub trait ProxySelector: Send + Sync {
    fn select(&self, address: &Address) -> Vec<Proxy>;
}

/// Performs the TLS handshake on an already-connected TCP stream. Returns
/// the negotiated ALPN protocol name (`"h2"` or `"http/1.1"`) alongside the
/// wrapped stream; `connectcore` never implements TLS itself.
#[async_trait]
pub trait TlsConnector<T>: Send + Sync {
    type TlsStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin;

    async fn handshake(
        &self,
        stream: T,
        server_name: &str,
        spec_index: usize,
    ) -> Result<(Self::TlsStream, &'static str)>;
}

/// Validates that a certificate chain observed for one host also covers a
/// second host, the predicate spec.md §3 calls "certificate verification
/// would also accept the new host" for H2 connection coalescing.
pub trait CertificatePinner: Send + Sync {
    fn covers(&self, observed_host: &str, candidate_host: &str) -> bool;
}

/// Produces credentials in response to a 407 Proxy Authentication Required
/// during tunnel construction (spec.md §4.2).
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        challenge_response: &Response<()>,
        route: &Route,
    ) -> Result<Option<HeaderMap>>;
}

/// Observes pool/routing lifecycle events; implementations must be
/// thread-safe and are invoked without the pool's locks held.
pub trait EventListener: Send + Sync {
    fn connect_start(&self, _route: &Route) {}
    fn connect_end(&self, _route: &Route, _success: bool) {}
    fn connection_acquired(&self, _address: &Address) {}
    fn connection_released(&self, _address: &Address) {}
}

/// A no-op [`EventListener`] used where the pool synthesises its own
/// internal calls (spec.md §4.1's `open_connections`, "no call, no event
/// listeners").
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventListener;

impl EventListener for NullEventListener {}

/// The out-of-scope HTTP/1 wire codec, reached only through this contract:
/// given a connection's byte stream, write a request and read back a
/// response.
#[async_trait]
pub trait Http1Codec<T>: Send + Sync {
    async fn exchange(&self, io: &mut T, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>>;
}
