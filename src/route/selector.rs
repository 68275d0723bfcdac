//! Enumerates `(proxy, inet)` candidate pairs for an address: proxy choices
//! come from a [`ProxySelector`], inet choices from [`Dns`] (spec.md §4.2
//! step 4b).

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::route::address::Address;
use crate::route::collab::{Dns, ProxySelector};
use crate::route::route::{Proxy, Route};

/// Steps through proxies for one address, resolving each proxy's inet
/// addresses lazily and yielding one [`Route`] at a time.
pub struct RouteSelector {
    address: Address,
    proxies: std::vec::IntoIter<Proxy>,
    current_proxy: Option<Proxy>,
    pending_addrs: std::vec::IntoIter<SocketAddr>,
}

impl RouteSelector {
    pub fn new(address: Address, proxy_selector: &dyn ProxySelector) -> RouteSelector {
        let proxies = proxy_selector.select(&address).into_iter();
        RouteSelector {
            address,
            proxies,
            current_proxy: None,
            pending_addrs: Vec::new().into_iter(),
        }
    }

    pub fn has_next(&self) -> bool {
        self.pending_addrs.len() > 0 || self.current_proxy.is_some() || self.proxies.len() > 0
    }

    /// Advances to the next candidate route, resolving through `dns` as
    /// needed. Returns `Ok(None)` once every proxy/address combination has
    /// been exhausted.
    pub async fn next(&mut self, dns: &dyn Dns) -> Result<Option<Route>> {
        loop {
            if let Some(addr) = self.pending_addrs.next() {
                let proxy = self.current_proxy.clone().unwrap_or(Proxy::Direct);
                return Ok(Some(Route::new(self.address.clone(), proxy, addr)));
            }

            let proxy = match self.proxies.next() {
                Some(p) => p,
                None => return Ok(None),
            };

            let resolve_host = match &proxy {
                Proxy::Direct => self.address.host().to_owned(),
                Proxy::Http(addr) => addr.ip().to_string(),
            };

            self.current_proxy = Some(proxy.clone());
            self.pending_addrs = if matches!(proxy, Proxy::Http(_)) {
                // Already resolved to a concrete socket address by the
                // selector; nothing further to look up.
                vec![match proxy {
                    Proxy::Http(addr) => addr,
                    Proxy::Direct => unreachable!(),
                }]
                .into_iter()
            } else {
                let port = self.address.port();
                dns.lookup(&resolve_host)
                    .await?
                    .into_iter()
                    .map(|addr| SocketAddr::new(addr.ip(), port))
                    .collect::<Vec<_>>()
                    .into_iter()
            };

            if self.pending_addrs.len() == 0 {
                return Err(Error::new_no_route());
            }
        }
    }
}

/// An in-memory DNS map, the only `Dns` implementation this crate ships,
/// intended for tests (SPEC_FULL.md §6).
#[derive(Debug, Default)]
pub struct StaticDns {
    entries: std::collections::HashMap<String, Vec<SocketAddr>>,
}

impl StaticDns {
    pub fn new() -> StaticDns {
        StaticDns::default()
    }

    pub fn insert(&mut self, host: impl Into<String>, addrs: Vec<SocketAddr>) {
        self.entries.insert(host.into(), addrs);
    }
}

#[async_trait::async_trait]
impl Dns for StaticDns {
    async fn lookup(&self, host: &str) -> Result<Vec<SocketAddr>> {
        self.entries
            .get(host)
            .cloned()
            .filter(|v| !v.is_empty())
            .ok_or_else(Error::new_no_route)
    }
}

/// A `ProxySelector` that always returns [`Proxy::Direct`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectProxySelector;

impl ProxySelector for DirectProxySelector {
    fn select(&self, _address: &Address) -> Vec<Proxy> {
        vec![Proxy::Direct]
    }
}

#[allow(dead_code)]
fn assert_send_sync<T: Send + Sync>() {}
#[allow(dead_code)]
fn _assertions() {
    assert_send_sync::<Arc<StaticDns>>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::uri::Scheme;

    #[tokio::test]
    async fn direct_selector_yields_every_resolved_address() {
        let mut dns = StaticDns::new();
        dns.insert(
            "example.com",
            vec!["127.0.0.1:0".parse().unwrap(), "127.0.0.2:0".parse().unwrap()],
        );
        let address = Address::new(Scheme::HTTPS, "example.com".parse().unwrap());
        let mut selector = RouteSelector::new(address, &DirectProxySelector);

        let first = selector.next(&dns).await.unwrap().unwrap();
        assert_eq!(first.socket_addr.ip().to_string(), "127.0.0.1");
        let second = selector.next(&dns).await.unwrap().unwrap();
        assert_eq!(second.socket_addr.ip().to_string(), "127.0.0.2");
        assert!(selector.next(&dns).await.unwrap().is_none());
    }
}
