//! The per-socket wrapper: one object per live connection, bridging either
//! an HTTP/1 codec or the H2 frame engine (spec.md §4.6).

mod codec;

pub use self::codec::Codec;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::common::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::h2::proto::H2Connection;
use crate::route::address::Address;
use crate::route::route::Route;

/// A placeholder for the application-level handle a `Connection` keeps a
/// weak reference to, so leaked allocations can be detected without keeping
/// the caller alive (spec.md §4.1's leak detection).
pub trait CallHandle: Send + Sync {}

/// How many concurrent exchanges a connection accepts: always 1 for H1, the
/// peer's `SETTINGS_MAX_CONCURRENT_STREAMS` (capped locally) for H2.
#[derive(Debug, Clone, Copy)]
pub enum AllocationLimit {
    Http1,
    Http2 { max_concurrent_streams: u32 },
}

impl AllocationLimit {
    pub fn as_u32(&self) -> u32 {
        match self {
            AllocationLimit::Http1 => 1,
            AllocationLimit::Http2 {
                max_concurrent_streams,
            } => *max_concurrent_streams,
        }
    }
}

enum Transport<T> {
    Http1,
    Http2(Arc<H2Connection<T>>),
}

/// One live socket: a route identity, a codec (H1 or H2), and the
/// bookkeeping the pool and planner need to decide eligibility (spec.md §3's
/// `Connection` data model).
pub struct Connection<T> {
    pub route: Route,
    transport: Transport<T>,
    negotiated_protocol: &'static str,
    idle_since_ns: Mutex<Option<u64>>,
    allocation_limit: AllocationLimit,
    allocations: Mutex<Vec<Weak<dyn CallHandle>>>,
    no_new_exchanges: AtomicBool,
    success_count: AtomicU32,
    route_failure_count: AtomicU32,
    created_at_ns: u64,
    bytes_notice_epoch_ns: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl<T> Connection<T> {
    /// Builds an HTTP/1 connection, stamping idle/age timestamps from the
    /// system clock (spec.md §4.1).
    pub fn new_http1(route: Route) -> Connection<T> {
        Connection::new_http1_with_clock(route, Arc::new(SystemClock))
    }

    pub fn new_http1_with_clock(route: Route, clock: Arc<dyn Clock>) -> Connection<T> {
        let now = clock.now_ns();
        Connection {
            route,
            transport: Transport::Http1,
            negotiated_protocol: "http/1.1",
            idle_since_ns: Mutex::new(Some(now)),
            allocation_limit: AllocationLimit::Http1,
            allocations: Mutex::new(Vec::new()),
            no_new_exchanges: AtomicBool::new(false),
            success_count: AtomicU32::new(0),
            route_failure_count: AtomicU32::new(0),
            created_at_ns: now,
            bytes_notice_epoch_ns: AtomicU64::new(0),
            clock,
        }
    }

    /// Builds an HTTP/2 connection, stamping idle/age timestamps from the
    /// system clock (spec.md §4.1).
    pub fn new_http2(route: Route, h2: Arc<H2Connection<T>>, max_concurrent_streams: u32) -> Connection<T> {
        Connection::new_http2_with_clock(route, h2, max_concurrent_streams, Arc::new(SystemClock))
    }

    pub fn new_http2_with_clock(
        route: Route,
        h2: Arc<H2Connection<T>>,
        max_concurrent_streams: u32,
        clock: Arc<dyn Clock>,
    ) -> Connection<T> {
        let now = clock.now_ns();
        Connection {
            route,
            transport: Transport::Http2(h2),
            negotiated_protocol: "h2",
            idle_since_ns: Mutex::new(Some(now)),
            allocation_limit: AllocationLimit::Http2 {
                max_concurrent_streams,
            },
            allocations: Mutex::new(Vec::new()),
            no_new_exchanges: AtomicBool::new(false),
            success_count: AtomicU32::new(0),
            route_failure_count: AtomicU32::new(0),
            created_at_ns: now,
            bytes_notice_epoch_ns: AtomicU64::new(0),
            clock,
        }
    }

    pub fn is_http2(&self) -> bool {
        matches!(self.transport, Transport::Http2(_))
    }

    pub fn negotiated_protocol(&self) -> &'static str {
        self.negotiated_protocol
    }

    pub fn allocation_limit(&self) -> AllocationLimit {
        self.allocation_limit
    }

    pub fn h2(&self) -> Option<&Arc<H2Connection<T>>> {
        match &self.transport {
            Transport::Http2(conn) => Some(conn),
            Transport::Http1 => None,
        }
    }

    /// Binds a new `Codec` to this connection, per spec.md §4.6's
    /// `new_codec`.
    pub fn new_codec(self: &Arc<Self>) -> Codec<T> {
        match &self.transport {
            Transport::Http1 => Codec::Http1,
            Transport::Http2(h2) => Codec::Http2(h2.clone()),
        }
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.lock().unwrap().len()
    }

    pub fn push_allocation(&self, handle: Weak<dyn CallHandle>) {
        let mut allocations = self.allocations.lock().unwrap();
        allocations.push(handle);
        *self.idle_since_ns.lock().unwrap() = None;
    }

    pub fn release_allocation(&self, handle: &Weak<dyn CallHandle>) {
        let mut allocations = self.allocations.lock().unwrap();
        allocations.retain(|h| !h.ptr_eq(handle));
        if allocations.is_empty() {
            *self.idle_since_ns.lock().unwrap() = Some(self.clock.now_ns());
        }
    }

    /// Drops allocations whose referent has already been dropped without a
    /// proper release — spec.md §4.1's leak detection.
    pub fn prune_leaked_allocations(&self) -> usize {
        let mut allocations = self.allocations.lock().unwrap();
        let before = allocations.len();
        allocations.retain(|h| h.upgrade().is_some());
        let pruned = before - allocations.len();
        if pruned > 0 {
            warn!(pruned, route = ?self.route, "pruned leaked connection allocations");
            if allocations.is_empty() {
                *self.idle_since_ns.lock().unwrap() = Some(self.clock.now_ns());
            }
        }
        pruned
    }

    pub fn idle_duration(&self) -> Option<Duration> {
        self.idle_since_ns
            .lock()
            .unwrap()
            .map(|since| Duration::from_nanos(self.clock.now_ns().saturating_sub(since)))
    }

    pub fn age(&self) -> Duration {
        Duration::from_nanos(self.clock.now_ns().saturating_sub(self.created_at_ns))
    }

    pub fn no_new_exchanges(&self) -> bool {
        self.no_new_exchanges.load(Ordering::Acquire)
    }

    pub fn set_no_new_exchanges(&self) {
        self.no_new_exchanges.store(true, Ordering::Release);
    }

    /// Address equality and (for TLS) coalescing eligibility (spec.md §4.6).
    pub fn is_eligible(&self, address: &Address) -> bool {
        &self.route.address == address && !self.no_new_exchanges()
    }

    pub fn increment_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.route_failure_count.store(0, Ordering::Relaxed);
    }

    /// Records a call failure; hard failures flip `no_new_exchanges` and
    /// bump the route failure count (spec.md §4.6). `REFUSED_STREAM` is
    /// tolerated since a fresh stream on the same connection can retry.
    pub fn note_failure(&self, err: &Error) {
        if err.stream_reset_reason().map(|r| r == crate::h2::Reason::REFUSED_STREAM) == Some(true)
        {
            debug!(route = ?self.route, "tolerating refused-stream failure");
            return;
        }
        self.no_new_exchanges.store(true, Ordering::Release);
        self.route_failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn route_failure_count(&self) -> u32 {
        self.route_failure_count.load(Ordering::Relaxed)
    }
}

impl<T> Connection<T>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    /// Cheap/extensive health check dispatch (spec.md §4.1).
    pub async fn is_healthy(&self, extensive: bool) -> bool {
        if self.no_new_exchanges() {
            return false;
        }
        match &self.transport {
            Transport::Http1 => true, // actual socket liveness is owned by the H1 codec collaborator.
            Transport::Http2(h2) => {
                if h2.is_going_away().await {
                    return false;
                }
                if extensive && h2.is_degraded().await {
                    return false;
                }
                true
            }
        }
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("route", &self.route)
            .field("negotiated_protocol", &self.negotiated_protocol)
            .field("no_new_exchanges", &self.no_new_exchanges())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::uri::Scheme;

    fn test_route() -> Route {
        Route::new(
            Address::new(Scheme::HTTPS, "example.com".parse().unwrap()),
            crate::route::route::Proxy::Direct,
            "127.0.0.1:443".parse().unwrap(),
        )
    }

    #[test]
    fn note_failure_flips_no_new_exchanges() {
        let conn: Connection<tokio::io::DuplexStream> = Connection::new_http1(test_route());
        assert!(!conn.no_new_exchanges());
        conn.note_failure(&Error::new_io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(conn.no_new_exchanges());
    }

    #[test]
    fn refused_stream_failure_is_tolerated() {
        let conn: Connection<tokio::io::DuplexStream> = Connection::new_http1(test_route());
        conn.note_failure(&Error::new_stream_reset(crate::h2::Reason::REFUSED_STREAM));
        assert!(!conn.no_new_exchanges());
    }

    #[test]
    fn idle_duration_and_age_follow_injected_clock() {
        use crate::common::clock::TestClock;

        let clock = Arc::new(TestClock::new());
        let conn: Connection<tokio::io::DuplexStream> =
            Connection::new_http1_with_clock(test_route(), clock.clone());
        assert_eq!(conn.idle_duration(), Some(Duration::ZERO));
        assert_eq!(conn.age(), Duration::ZERO);

        clock.advance(Duration::from_secs(5));
        assert_eq!(conn.idle_duration(), Some(Duration::from_secs(5)));
        assert_eq!(conn.age(), Duration::from_secs(5));

        let handle: Weak<dyn CallHandle> = Weak::<NoopHandle>::new();
        conn.push_allocation(handle.clone());
        assert_eq!(conn.idle_duration(), None);

        clock.advance(Duration::from_secs(1));
        conn.release_allocation(&handle);
        assert_eq!(conn.idle_duration(), Some(Duration::ZERO));
        assert_eq!(conn.age(), Duration::from_secs(6));
    }

    struct NoopHandle;
    impl CallHandle for NoopHandle {}

    #[test]
    fn success_resets_route_failure_count() {
        let conn: Connection<tokio::io::DuplexStream> = Connection::new_http1(test_route());
        conn.note_failure(&Error::new_stream_reset(crate::h2::Reason::INTERNAL_ERROR));
        conn.note_failure(&Error::new_io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(conn.route_failure_count() >= 1);
        conn.increment_success();
        assert_eq!(conn.route_failure_count(), 0);
    }
}
