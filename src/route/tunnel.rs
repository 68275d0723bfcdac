//! Builds an HTTP `CONNECT` tunnel through an HTTP proxy so a TLS handshake
//! can be layered on top (spec.md §4.2's tunnel construction). Only used
//! when a route's [`Proxy`] is [`Proxy::Http`] and the target address is
//! HTTPS; a plain-HTTP request through a proxy is just forwarded, no tunnel
//! needed.

use http::{HeaderMap, Method, Request, StatusCode, Uri};
use tracing::debug;

use crate::error::{Error, Result};
use crate::route::collab::{Authenticator, Http1Codec};
use crate::route::route::Route;

const USER_AGENT: &str = concat!("connectcore/", env!("CARGO_PKG_VERSION"));

fn connect_request(route: &Route, extra_headers: Option<HeaderMap>) -> Result<Request<Vec<u8>>> {
    let target: Uri = format!(
        "{}:{}",
        route.address.host(),
        route.address.port()
    )
    .parse()
    .map_err(|e: http::uri::InvalidUri| Error::new_io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

    let mut builder = Request::builder()
        .method(Method::CONNECT)
        .uri(target.clone())
        .header(http::header::HOST, target.to_string())
        .header("Proxy-Connection", "Keep-Alive")
        .header(http::header::USER_AGENT, USER_AGENT);

    if let Some(headers) = extra_headers {
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }
    }

    builder
        .body(Vec::new())
        .map_err(|e| Error::new_io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))
}

/// Issues the `CONNECT` request over `io` and, on a 407, asks `authenticator`
/// for credentials and retries exactly once. Returns once the proxy has
/// agreed to relay bytes; the caller then layers TLS directly on `io`.
pub async fn establish<T, C, A>(
    io: &mut T,
    route: &Route,
    codec: &C,
    authenticator: &A,
) -> Result<()>
where
    C: Http1Codec<T>,
    A: Authenticator,
{
    let request = connect_request(route, None)?;
    let response = codec.exchange(io, request).await?;

    if response.status().is_success() {
        return Ok(());
    }

    if response.status() != StatusCode::PROXY_AUTHENTICATION_REQUIRED {
        return Err(Error::new_io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("proxy refused CONNECT: {}", response.status()),
        )));
    }

    debug!(route = ?route, "proxy requested authentication for CONNECT");
    let challenge = http::Response::from_parts(response.into_parts().0, ());
    let credentials = authenticator.authenticate(&challenge, route).await?;
    let Some(headers) = credentials else {
        return Err(Error::new_io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "proxy authentication required, no credentials available",
        )));
    };

    let retried = connect_request(route, Some(headers))?;
    let response = codec.exchange(io, retried).await?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(Error::new_io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("proxy refused CONNECT after authentication: {}", response.status()),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::uri::Scheme;
    use http::Response;

    use crate::route::address::Address;
    use crate::route::route::Proxy;

    fn route() -> Route {
        Route::new(
            Address::new(Scheme::HTTPS, "example.com".parse().unwrap()),
            Proxy::Http("127.0.0.1:3128".parse().unwrap()),
            "127.0.0.1:3128".parse().unwrap(),
        )
    }

    #[test]
    fn connect_request_targets_host_and_port() {
        let req = connect_request(&route(), None).unwrap();
        assert_eq!(req.method(), Method::CONNECT);
        assert_eq!(req.uri().to_string(), "example.com:443");
        assert_eq!(
            req.headers().get("Proxy-Connection").unwrap(),
            "Keep-Alive"
        );
    }

    struct OkCodec;

    #[async_trait::async_trait]
    impl Http1Codec<Vec<u8>> for OkCodec {
        async fn exchange(
            &self,
            _io: &mut Vec<u8>,
            _request: Request<Vec<u8>>,
        ) -> Result<Response<Vec<u8>>> {
            Ok(Response::builder().status(200).body(Vec::new()).unwrap())
        }
    }

    struct NoCredsAuthenticator;

    #[async_trait::async_trait]
    impl Authenticator for NoCredsAuthenticator {
        async fn authenticate(
            &self,
            _challenge_response: &http::Response<()>,
            _route: &Route,
        ) -> Result<Option<HeaderMap>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn successful_connect_returns_ok() {
        let mut io = Vec::new();
        establish(&mut io, &route(), &OkCodec, &NoCredsAuthenticator)
            .await
            .unwrap();
    }
}
