//! An attempt to obtain a usable connection (spec.md §3's `Plan`).

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{instrument, trace};

use crate::common::clock::Clock;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::h2::proto::{H2Config, H2Connection};
use crate::route::address::ConnectionSpec;
use crate::route::collab::TlsConnector;
use crate::route::route::Route;

/// The result of one connect phase: either it made progress toward a usable
/// connection, or it failed and optionally handed back a follow-up plan
/// (spec.md §3's `ConnectResult`).
pub struct ConnectResult<T> {
    pub success: bool,
    pub next_plan: Option<Plan<T>>,
    pub failure: Option<Error>,
}

impl<T> ConnectResult<T> {
    pub fn ok() -> ConnectResult<T> {
        ConnectResult {
            success: true,
            next_plan: None,
            failure: None,
        }
    }

    pub fn failed(err: Error) -> ConnectResult<T> {
        ConnectResult {
            success: false,
            next_plan: None,
            failure: Some(err),
        }
    }

    pub fn retry_with(plan: Plan<T>) -> ConnectResult<T> {
        ConnectResult {
            success: false,
            next_plan: Some(plan),
            failure: None,
        }
    }
}

/// An attempt to obtain a usable connection: either reuse one already held,
/// or connect a fresh TCP+TLS socket (spec.md §3).
pub enum Plan<T> {
    Reuse(Arc<Connection<T>>),
    Connect(ConnectPlan),
}

/// Parameters for a fresh TCP+TLS connect: the route to dial, which TLS
/// fallback [`ConnectionSpec`] index to try, and which attempt number this
/// is (for logging/metrics).
#[derive(Clone)]
pub struct ConnectPlan {
    pub route: Route,
    pub tls_fallback_index: usize,
    pub attempt: u32,
}

impl ConnectPlan {
    pub fn new(route: Route, attempt: u32) -> ConnectPlan {
        ConnectPlan {
            route,
            tls_fallback_index: 0,
            attempt,
        }
    }

    pub fn is_ready(&self) -> bool {
        false
    }

    #[instrument(name = "connect", skip_all, fields(route = ?self.route))]
    pub async fn connect_tcp(&self) -> Result<TcpStream> {
        trace!("dialing tcp");
        TcpStream::connect(self.route.socket_addr)
            .await
            .map_err(Error::new_io)
    }

    /// Performs the TLS handshake via the caller-supplied collaborator,
    /// applying TLS-fallback on a downgradable failure (spec.md §4.2).
    pub async fn connect_tls<C, S>(
        &self,
        stream: S,
        connector: &C,
    ) -> Result<(C::TlsStream, &'static str)>
    where
        C: TlsConnector<S>,
    {
        let specs = &self.route.address.connection_specs;
        if self.tls_fallback_index >= specs.len() {
            return Err(Error::new_no_route());
        }
        // Failures here are classified by the caller via `is_retryable()`
        // and `next_tls_fallback()`, since only TLS version/cipher mismatch
        // is downgradable, not a certificate error (spec.md §4.2).
        connector
            .handshake(stream, self.route.address.host(), self.tls_fallback_index)
            .await
    }

    fn has_next_tls_spec(&self, specs: &[ConnectionSpec]) -> bool {
        self.tls_fallback_index + 1 < specs.len()
    }

    /// Builds the next TLS-fallback attempt, or `None` if every
    /// [`ConnectionSpec`] has been exhausted.
    pub fn next_tls_fallback(&self) -> Option<ConnectPlan> {
        let specs = &self.route.address.connection_specs;
        if self.has_next_tls_spec(specs) {
            Some(ConnectPlan {
                route: self.route.clone(),
                tls_fallback_index: self.tls_fallback_index + 1,
                attempt: self.attempt,
            })
        } else {
            None
        }
    }

    /// Completes a successful handshake into a pooled [`Connection`]
    /// (spec.md §3's `handle_success`). `negotiated_alpn` selects H1 vs H2.
    /// `clock` stamps the pooled connection's idle/age timestamps, the same
    /// source of time the H2 engine uses for its own keepalive bookkeeping.
    pub async fn handle_success<T>(
        &self,
        io: T,
        negotiated_alpn: &str,
        h2_config: H2Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Connection<T>>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        if negotiated_alpn == "h2" {
            let h2 = H2Connection::handshake(io, h2_config).await?;
            let max_concurrent_streams = h2.remote_max_concurrent_streams().await.unwrap_or(u32::MAX);
            Ok(Connection::new_http2_with_clock(
                self.route.clone(),
                Arc::new(h2),
                max_concurrent_streams,
                clock,
            ))
        } else {
            let _ = io;
            Ok(Connection::new_http1_with_clock(self.route.clone(), clock))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::uri::Scheme;
    use crate::route::address::Address;
    use crate::route::route::Proxy;

    fn plan() -> ConnectPlan {
        ConnectPlan::new(
            Route::new(
                Address::new(Scheme::HTTPS, "example.com".parse().unwrap()),
                Proxy::Direct,
                "127.0.0.1:443".parse().unwrap(),
            ),
            0,
        )
    }

    #[test]
    fn single_connection_spec_has_no_fallback() {
        assert!(plan().next_tls_fallback().is_none());
    }

    #[test]
    fn not_ready_until_handle_success() {
        assert!(!plan().is_ready());
    }
}
