//! Caches warm connections per [`Address`], evicts them under age/capacity
//! pressure, and tops them up to satisfy per-address minimum-concurrency
//! policies (spec.md §4.1), grounded on the teacher's async connection
//! pool's idle-list-plus-closer-task shape.

pub mod address_state;

pub use self::address_state::{AddressPolicy, AddressState};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, instrument, trace, warn};

use crate::connection::Connection;
use crate::error::Result;
use crate::io::BoxedTransport;
use crate::route::address::Address;
use crate::route::collab::CertificatePinner;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_idle_per_address: usize,
    pub keep_alive: std::time::Duration,
}

impl Default for PoolConfig {
    fn default() -> PoolConfig {
        PoolConfig {
            max_idle_per_address: 8,
            keep_alive: std::time::Duration::from_secs(300),
        }
    }
}

/// Synthesises a fresh connection for an address with no call or event
/// listener attached, used only by the pool's pre-emptive opener
/// (spec.md §4.1's `open_connections`). Implemented by whatever composes
/// the pool with a [`crate::route::RoutePlanner`]/[`crate::route::finder::ExchangeFinder`]
/// pair, kept behind a trait so the pool itself never depends on the
/// routing layer above it.
#[async_trait]
pub trait ConnectionOpener: Send + Sync {
    async fn open(&self, address: &Address) -> Result<Arc<Connection<BoxedTransport>>>;
}

type ConnList = Vec<Arc<Connection<BoxedTransport>>>;

/// A cache of warm connections keyed by [`Address`], plus the policies
/// driving pre-emptive opening and idle eviction (spec.md §3's
/// `ConnectionPool`).
pub struct ConnectionPool {
    config: PoolConfig,
    idle: Mutex<HashMap<Address, ConnList>>,
    /// Secondary index by resolved socket address, used only to find H2
    /// coalescing candidates opened for a *different* hostname that happens
    /// to share an IP (spec.md §3/§4.2 step 2's second pool attempt). `idle`
    /// stays the source of truth for eviction; entries here are pruned
    /// alongside it so a connection closed via `idle` can never be handed
    /// back out through this index.
    by_ip: Mutex<HashMap<SocketAddr, ConnList>>,
    policies: Mutex<HashMap<Address, AddressState>>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> ConnectionPool {
        ConnectionPool {
            config,
            idle: Mutex::new(HashMap::new()),
            by_ip: Mutex::new(HashMap::new()),
            policies: Mutex::new(HashMap::new()),
        }
    }

    /// Scans the pool for a connection eligible for `address`, running a
    /// health check on the first candidate found and discarding it (and
    /// continuing the scan) if the check fails (spec.md §4.1's `acquire`).
    #[instrument(skip(self), fields(address = ?address))]
    pub async fn acquire(
        &self,
        address: &Address,
        require_multiplexed: bool,
        extensive_health_check: bool,
    ) -> Option<Arc<Connection<BoxedTransport>>> {
        loop {
            let candidate = {
                let idle = self.idle.lock().unwrap();
                idle.get(address)
                    .into_iter()
                    .flatten()
                    .find(|c| c.is_eligible(address) && (!require_multiplexed || c.is_http2()))
                    .cloned()
            };
            let candidate = candidate?;
            if candidate.is_healthy(extensive_health_check).await {
                return Some(candidate);
            }
            candidate.set_no_new_exchanges();
            self.remove(&candidate);
            trace!(address = ?address, "discarded unhealthy pooled connection");
        }
    }

    /// Inserts a newly connected (or pre-emptively opened) connection.
    pub fn put(&self, connection: Arc<Connection<BoxedTransport>>) {
        let mut idle = self.idle.lock().unwrap();
        let list = idle.entry(connection.route.address.clone()).or_default();
        if !list.iter().any(|c| Arc::ptr_eq(c, &connection)) {
            list.push(connection.clone());
        }
        drop(idle);

        let mut by_ip = self.by_ip.lock().unwrap();
        let ip_list = by_ip.entry(connection.route.socket_addr).or_default();
        if !ip_list.iter().any(|c| Arc::ptr_eq(c, &connection)) {
            ip_list.push(connection);
        }
    }

    fn remove(&self, connection: &Arc<Connection<BoxedTransport>>) {
        let mut idle = self.idle.lock().unwrap();
        if let Some(list) = idle.get_mut(&connection.route.address) {
            list.retain(|c| !Arc::ptr_eq(c, connection));
        }
        drop(idle);

        let mut by_ip = self.by_ip.lock().unwrap();
        if let Some(list) = by_ip.get_mut(&connection.route.socket_addr) {
            list.retain(|c| !Arc::ptr_eq(c, connection));
        }
    }

    /// Scans the IP-keyed index for an already-open H2 connection to a
    /// *different* hostname sharing `socket_addr`, returning it only if
    /// `pinner` certifies its certificate would also be accepted for
    /// `address`'s host (spec.md §3/§4.2's H2 connection coalescing).
    /// HTTP/1 connections are never coalescing candidates: a connection in
    /// that mode already has one hostname's request on the wire.
    #[instrument(skip(self, pinner), fields(address = ?address))]
    pub async fn acquire_coalesced(
        &self,
        socket_addr: SocketAddr,
        address: &Address,
        pinner: &dyn CertificatePinner,
        extensive_health_check: bool,
    ) -> Option<Arc<Connection<BoxedTransport>>> {
        if !address.is_https() {
            return None;
        }
        loop {
            let candidate = {
                let by_ip = self.by_ip.lock().unwrap();
                by_ip
                    .get(&socket_addr)
                    .into_iter()
                    .flatten()
                    .find(|c| {
                        c.is_http2()
                            && !c.no_new_exchanges()
                            && c.route.address.host() != address.host()
                            && pinner.covers(c.route.address.host(), address.host())
                    })
                    .cloned()
            };
            let candidate = candidate?;
            if candidate.is_healthy(extensive_health_check).await {
                trace!(address = ?address, via = ?candidate.route.address, "coalesced onto existing h2 connection");
                return Some(candidate);
            }
            candidate.set_no_new_exchanges();
            self.remove(&candidate);
            trace!(address = ?address, "discarded unhealthy coalescing candidate");
        }
    }

    /// Called when a connection's last allocation is released. Removes it
    /// immediately if it can no longer serve calls or idling is disabled;
    /// otherwise leaves it for the next `close_connections` sweep
    /// (spec.md §4.1's `became_idle`).
    pub fn became_idle(&self, connection: &Arc<Connection<BoxedTransport>>) -> bool {
        if connection.no_new_exchanges() || self.config.max_idle_per_address == 0 {
            self.remove(connection);
            return true;
        }
        false
    }

    /// Closes every connection with no live allocation, leaving in-use
    /// connections untouched (spec.md §4.1's `evict_all`).
    pub fn evict_all(&self) {
        let mut evicted = Vec::new();
        {
            let mut idle = self.idle.lock().unwrap();
            for list in idle.values_mut() {
                list.retain(|c| {
                    let keep = c.allocation_count() > 0;
                    if !keep {
                        debug!(route = ?c.route, "evicting idle connection");
                        evicted.push(c.clone());
                    }
                    keep
                });
            }
        }
        self.prune_by_ip(&evicted);
    }

    /// Removes the given connections from `by_ip` after they've already
    /// been dropped from `idle`, so a coalescing lookup can never hand back
    /// a connection the eviction sweep just closed.
    fn prune_by_ip(&self, evicted: &[Arc<Connection<BoxedTransport>>]) {
        if evicted.is_empty() {
            return;
        }
        let mut by_ip = self.by_ip.lock().unwrap();
        for connection in evicted {
            if let Some(list) = by_ip.get_mut(&connection.route.socket_addr) {
                list.retain(|c| !Arc::ptr_eq(c, connection));
            }
        }
    }

    /// Installs or replaces an address's policy (spec.md §4.1's
    /// `set_policy`). Returns `true` if the new minimum now exceeds the
    /// capacity already open, i.e. an opener sweep should run.
    pub fn set_policy(&self, address: Address, policy: AddressPolicy) -> bool {
        let capacity = self.concurrent_call_capacity(&address);
        let mut policies = self.policies.lock().unwrap();
        let needs_opener = policy.min_concurrent_calls > capacity;
        policies.insert(
            address,
            AddressState {
                policy,
                concurrent_call_capacity: capacity,
            },
        );
        needs_opener
    }

    fn concurrent_call_capacity(&self, address: &Address) -> u32 {
        self.idle
            .lock()
            .unwrap()
            .get(address)
            .into_iter()
            .flatten()
            .map(|c| c.allocation_limit().as_u32())
            .sum()
    }

    /// One periodic eviction pass (spec.md §4.1's `close_connections`):
    /// closes at most one connection — the oldest idle-past-`keep_alive`
    /// one if any exist, else the oldest connection in excess of
    /// `max_idle_per_address` that isn't required by a policy — and reports
    /// when the next pass should run.
    #[instrument(skip(self))]
    pub fn close_connections(&self) -> Option<std::time::Duration> {
        let mut evicted = Vec::new();
        let next_wake = {
            let mut idle = self.idle.lock().unwrap();
            let policies = self.policies.lock().unwrap();
            let mut next_wake: Option<std::time::Duration> = None;

            for (address, list) in idle.iter_mut() {
                let min_required = policies.get(address).map(|s| s.policy.min_concurrent_calls);

                if let Some(idx) = oldest_past_keep_alive(list, self.config.keep_alive) {
                    debug!(route = ?list[idx].route, "closing connection past keep-alive");
                    evicted.push(list.remove(idx));
                    continue;
                }

                let total_capacity: u32 = list.iter().map(|c| c.allocation_limit().as_u32()).sum();
                let evictable: Vec<usize> = list
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| {
                        let capacity_without = total_capacity - c.allocation_limit().as_u32();
                        min_required.map_or(true, |min| capacity_without >= min)
                    })
                    .map(|(i, _)| i)
                    .collect();

                if evictable.len() > self.config.max_idle_per_address {
                    if let Some(&idx) = evictable
                        .iter()
                        .max_by_key(|&&i| list[i].idle_duration().unwrap_or_default())
                    {
                        debug!(route = ?list[idx].route, "closing excess idle connection");
                        evicted.push(list.remove(idx));
                    }
                    continue;
                }

                if let Some(remaining) = list
                    .iter()
                    .filter_map(|c| c.idle_duration().map(|d| self.config.keep_alive.saturating_sub(d)))
                    .min()
                {
                    next_wake = Some(next_wake.map_or(remaining, |w| w.min(remaining)));
                }
            }

            next_wake
        };
        self.prune_by_ip(&evicted);
        next_wake
    }

    /// Tops up `address` to its policy's minimum, retrying with backoff on
    /// failure (spec.md §4.1's `open_connections`). Intended to be driven by
    /// a caller-owned timer per address with an installed policy.
    #[instrument(skip(self, opener), fields(address = ?address))]
    pub async fn open_connections(&self, address: &Address, opener: &dyn ConnectionOpener) {
        loop {
            let policy = match self.policies.lock().unwrap().get(address) {
                Some(state) if state.policy.min_concurrent_calls > 0 => state.policy,
                _ => return,
            };
            if self.concurrent_call_capacity(address) >= policy.min_concurrent_calls {
                return;
            }
            match opener.open(address).await {
                Ok(conn) => {
                    self.put(conn);
                }
                Err(err) => {
                    warn!(address = ?address, error = %err, "pre-emptive connection open failed, backing off");
                    tokio::time::sleep(policy.backoff_with_jitter()).await;
                }
            }
        }
    }

    /// Prunes allocations whose caller was dropped without releasing,
    /// across every idle connection (spec.md §4.1's leak detection), run by
    /// the same periodic sweep as `close_connections`.
    pub fn prune_leaks(&self) -> usize {
        let idle = self.idle.lock().unwrap();
        idle.values()
            .flatten()
            .map(|c| c.prune_leaked_allocations())
            .sum()
    }
}

fn oldest_past_keep_alive(
    list: &[Arc<Connection<BoxedTransport>>],
    keep_alive: std::time::Duration,
) -> Option<usize> {
    list.iter()
        .enumerate()
        .filter(|(_, c)| c.idle_duration().map(|d| d >= keep_alive).unwrap_or(false))
        .max_by_key(|(_, c)| c.idle_duration().unwrap_or_default())
        .map(|(i, _)| i)
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("addresses", &self.idle.lock().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::uri::Scheme;

    fn address() -> Address {
        Address::new(Scheme::HTTPS, "example.com".parse().unwrap())
    }

    fn route() -> crate::route::route::Route {
        crate::route::route::Route::new(
            address(),
            crate::route::route::Proxy::Direct,
            "127.0.0.1:443".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn acquire_returns_eligible_connection() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let conn: Arc<Connection<BoxedTransport>> = Arc::new(Connection::new_http1(route()));
        pool.put(conn.clone());

        let acquired = pool.acquire(&address(), false, false).await;
        assert!(acquired.is_some());
    }

    #[tokio::test]
    async fn acquire_skips_unhealthy_connection() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let conn: Arc<Connection<BoxedTransport>> = Arc::new(Connection::new_http1(route()));
        conn.set_no_new_exchanges();
        pool.put(conn);

        assert!(pool.acquire(&address(), false, false).await.is_none());
    }

    #[test]
    fn became_idle_removes_when_no_new_exchanges() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let conn: Arc<Connection<BoxedTransport>> = Arc::new(Connection::new_http1(route()));
        pool.put(conn.clone());
        conn.set_no_new_exchanges();
        assert!(pool.became_idle(&conn));
    }

    #[test]
    fn evict_all_keeps_allocated_connections() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let conn: Arc<Connection<BoxedTransport>> = Arc::new(Connection::new_http1(route()));
        pool.put(conn.clone());
        pool.evict_all();
        assert!(pool.idle.lock().unwrap().get(&address()).unwrap().is_empty());
    }

    #[test]
    fn set_policy_reports_when_opener_needed() {
        let pool = ConnectionPool::new(PoolConfig::default());
        let needs_opener = pool.set_policy(
            address(),
            AddressPolicy {
                min_concurrent_calls: 2,
                ..AddressPolicy::none()
            },
        );
        assert!(needs_opener);
    }

    fn http1_conn_with_clock(clock: Arc<crate::common::clock::TestClock>) -> Arc<Connection<BoxedTransport>> {
        Arc::new(Connection::new_http1_with_clock(route(), clock))
    }

    #[test]
    fn close_connections_evicts_oldest_past_keep_alive() {
        let clock = Arc::new(crate::common::clock::TestClock::new());
        let pool = ConnectionPool::new(PoolConfig {
            max_idle_per_address: 8,
            keep_alive: std::time::Duration::from_secs(10),
        });

        pool.put(http1_conn_with_clock(clock.clone()));
        clock.advance(std::time::Duration::from_secs(5));
        pool.put(http1_conn_with_clock(clock.clone()));

        // Past keep-alive only for the first connection; the sweep evicts it
        // and reports no wake time for this pass (it only schedules a wake
        // once nothing more needs evicting).
        clock.advance(std::time::Duration::from_secs(6));
        assert_eq!(pool.close_connections(), None);
        assert_eq!(pool.idle.lock().unwrap().get(&address()).unwrap().len(), 1);

        // Next sweep: the survivor is 6s into its 10s keep-alive window, so
        // nothing is evicted and the wake time is the remaining 4s.
        assert_eq!(
            pool.close_connections(),
            Some(std::time::Duration::from_secs(4))
        );
        assert_eq!(pool.idle.lock().unwrap().get(&address()).unwrap().len(), 1);
    }

    #[test]
    fn close_connections_reports_no_wake_when_nothing_idle() {
        let pool = ConnectionPool::new(PoolConfig::default());
        assert_eq!(pool.close_connections(), None);
    }

    #[test]
    fn close_connections_evicts_excess_beyond_max_idle_oldest_first() {
        let clock = Arc::new(crate::common::clock::TestClock::new());
        let pool = ConnectionPool::new(PoolConfig {
            max_idle_per_address: 1,
            keep_alive: std::time::Duration::from_secs(3600),
        });

        let oldest = http1_conn_with_clock(clock.clone());
        pool.put(oldest.clone());
        clock.advance(std::time::Duration::from_secs(1));
        pool.put(http1_conn_with_clock(clock.clone()));

        pool.close_connections();

        let remaining = pool.idle.lock().unwrap().get(&address()).unwrap().clone();
        assert_eq!(remaining.len(), 1);
        assert!(!remaining.iter().any(|c| Arc::ptr_eq(c, &oldest)));
    }

    struct StaticPinner(bool);
    impl CertificatePinner for StaticPinner {
        fn covers(&self, _observed_host: &str, _candidate_host: &str) -> bool {
            self.0
        }
    }

    async fn h2_connection_on(route: crate::route::route::Route) -> Arc<Connection<BoxedTransport>> {
        let (client_io, _server_io) = tokio::io::duplex(4096);
        let io: BoxedTransport = Box::new(client_io);
        let h2 = crate::h2::H2Connection::handshake(io, crate::h2::H2Config::default())
            .await
            .unwrap();
        Arc::new(Connection::new_http2(route, Arc::new(h2), 100))
    }

    #[tokio::test]
    async fn acquire_coalesced_returns_h2_connection_when_pinner_covers_other_host() {
        let original = crate::route::route::Route::new(
            Address::new(Scheme::HTTPS, "a.example.com".parse().unwrap()),
            crate::route::route::Proxy::Direct,
            "127.0.0.1:443".parse().unwrap(),
        );
        let conn = h2_connection_on(original).await;
        let pool = ConnectionPool::new(PoolConfig::default());
        pool.put(conn.clone());

        let other_address = Address::new(Scheme::HTTPS, "b.example.com".parse().unwrap());
        let coalesced = pool
            .acquire_coalesced(
                "127.0.0.1:443".parse().unwrap(),
                &other_address,
                &StaticPinner(true),
                false,
            )
            .await;
        assert!(coalesced.is_some());
        assert!(Arc::ptr_eq(&coalesced.unwrap(), &conn));
    }

    #[tokio::test]
    async fn acquire_coalesced_rejects_when_pinner_does_not_cover() {
        let original = crate::route::route::Route::new(
            Address::new(Scheme::HTTPS, "a.example.com".parse().unwrap()),
            crate::route::route::Proxy::Direct,
            "127.0.0.1:443".parse().unwrap(),
        );
        let conn = h2_connection_on(original).await;
        let pool = ConnectionPool::new(PoolConfig::default());
        pool.put(conn);

        let other_address = Address::new(Scheme::HTTPS, "b.example.com".parse().unwrap());
        let coalesced = pool
            .acquire_coalesced(
                "127.0.0.1:443".parse().unwrap(),
                &other_address,
                &StaticPinner(false),
                false,
            )
            .await;
        assert!(coalesced.is_none());
    }

    #[tokio::test]
    async fn acquire_coalesced_ignores_http1_connections() {
        let pool = ConnectionPool::new(PoolConfig::default());
        pool.put(Arc::new(Connection::new_http1(route())));

        let other_address = Address::new(Scheme::HTTPS, "b.example.com".parse().unwrap());
        let coalesced = pool
            .acquire_coalesced(
                "127.0.0.1:443".parse().unwrap(),
                &other_address,
                &StaticPinner(true),
                false,
            )
            .await;
        assert!(coalesced.is_none());
    }

    #[test]
    fn close_connections_keeps_excess_connections_required_by_policy() {
        let clock = Arc::new(crate::common::clock::TestClock::new());
        let pool = ConnectionPool::new(PoolConfig {
            max_idle_per_address: 0,
            keep_alive: std::time::Duration::from_secs(3600),
        });
        pool.set_policy(
            address(),
            AddressPolicy {
                min_concurrent_calls: 1,
                ..AddressPolicy::none()
            },
        );

        pool.put(http1_conn_with_clock(clock));
        pool.close_connections();

        assert_eq!(pool.idle.lock().unwrap().get(&address()).unwrap().len(), 1);
    }
}
