//! A concrete path to an [`Address`]: proxy choice plus resolved socket
//! address, and the database that deprioritises recently-failed routes
//! (spec.md §3, §4.2).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::route::address::Address;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Proxy {
    Direct,
    Http(SocketAddr),
}

/// An [`Address`] plus a concrete proxy choice and resolved IP, i.e. exactly
/// what is needed to open a socket (spec.md §3's `Route`).
#[derive(Debug, Clone)]
pub struct Route {
    pub address: Address,
    pub proxy: Proxy,
    pub socket_addr: SocketAddr,
}

impl Route {
    pub fn new(address: Address, proxy: Proxy, socket_addr: SocketAddr) -> Route {
        Route {
            address,
            proxy,
            socket_addr,
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("address", &self.address)
            .field("proxy", &self.proxy)
            .field("socket_addr", &self.socket_addr)
            .finish()
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct FailedRouteKey {
    proxy_addr: Option<SocketAddr>,
    socket_addr: SocketAddr,
}

fn key_for(route: &Route) -> FailedRouteKey {
    FailedRouteKey {
        proxy_addr: match route.proxy {
            Proxy::Direct => None,
            Proxy::Http(addr) => Some(addr),
        },
        socket_addr: route.socket_addr,
    }
}

/// Tracks routes that recently failed so the planner can deprioritise them
/// on the next attempt, per call. Persisted across calls within a process
/// (the SUPPLEMENTED `RouteDatabase` persistence hook lets a caller snapshot
/// and restore this across process restarts).
#[derive(Debug, Default)]
pub struct RouteDatabase {
    failed: Mutex<HashSet<FailedRouteKey>>,
}

impl RouteDatabase {
    pub fn new() -> RouteDatabase {
        RouteDatabase::default()
    }

    pub fn connect_failed(&self, route: &Route) {
        self.failed.lock().unwrap().insert(key_for(route));
    }

    pub fn connect_succeeded(&self, route: &Route) {
        self.failed.lock().unwrap().remove(&key_for(route));
    }

    pub fn should_postpone(&self, route: &Route) -> bool {
        self.failed.lock().unwrap().contains(&key_for(route))
    }

    /// Serializable snapshot for the persistence hook (SPEC_FULL.md's
    /// supplemented `RouteDatabase` feature): a flat list of `(ip, port)`
    /// pairs a caller can write to disk and restore on the next process.
    pub fn snapshot(&self) -> Vec<SocketAddr> {
        self.failed
            .lock()
            .unwrap()
            .iter()
            .map(|k| k.socket_addr)
            .collect()
    }

    pub fn restore(&self, socket_addrs: impl IntoIterator<Item = SocketAddr>) {
        let mut failed = self.failed.lock().unwrap();
        for addr in socket_addrs {
            failed.insert(FailedRouteKey {
                proxy_addr: None,
                socket_addr: addr,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::uri::Scheme;

    fn route(port: u16) -> Route {
        Route::new(
            Address::new(Scheme::HTTPS, "example.com".parse().unwrap()),
            Proxy::Direct,
            format!("127.0.0.1:{port}").parse().unwrap(),
        )
    }

    #[test]
    fn failed_route_is_postponed_until_success() {
        let db = RouteDatabase::new();
        let r = route(443);
        assert!(!db.should_postpone(&r));
        db.connect_failed(&r);
        assert!(db.should_postpone(&r));
        db.connect_succeeded(&r);
        assert!(!db.should_postpone(&r));
    }
}
