//! Executes a route planner's plans until one yields a usable connection
//! (spec.md §4.3): a sequential finder that steps through candidates one at
//! a time, and a fast-fallback finder that races them happy-eyeballs-style.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, instrument, trace};

use crate::common::clock::{Clock, SystemClock};
use crate::connection::Connection;
use crate::error::{Error, FirstError, Result};
use crate::h2::proto::H2Config;
use crate::io::BoxedTransport;
use crate::route::collab::TlsConnector;
use crate::route::plan::{ConnectPlan, Plan};

/// Minimum spacing between race attempts (spec.md §4.3's "strict" 250 ms).
pub const FAST_FALLBACK_DELAY: Duration = Duration::from_millis(250);

/// The slice of a route planner an [`ExchangeFinder`] drives: ask for the
/// next plan, check whether another attempt remains, and feed back the
/// deferred/stashed plans the finders produce along the way.
#[async_trait]
pub trait RoutePlanner: Send {
    async fn plan(&mut self) -> Result<Plan<BoxedTransport>>;

    /// True iff another attempt could still be made after a retryable
    /// failure (spec.md §4.2's `has_next`).
    fn has_next(&self) -> bool;

    /// Pushes a tunnel follow-up or TLS-fallback plan to the front of the
    /// deferred queue, preferred over planning a fresh connect.
    fn push_deferred(&mut self, plan: ConnectPlan);

    /// Stashes a fast-fallback race loser's route so the next "plan a new
    /// connect" step tries it before consulting the route selector.
    fn stash_next_route(&mut self, plan: ConnectPlan);
}

/// Returns a usable, already-pooled connection (spec.md §4.3's shared
/// `find() → Connection` contract).
#[async_trait]
pub trait ExchangeFinder: Send {
    async fn find(&mut self) -> Result<Arc<Connection<BoxedTransport>>>;
}

/// Connects a [`ConnectPlan`]'s TCP socket, optionally wraps it in TLS, and
/// hands the result to [`ConnectPlan::handle_success`]. Shared by both
/// finders; the only difference between them is how many of these run
/// concurrently.
async fn finish_connect<C>(
    plan: &ConnectPlan,
    tcp: TcpStream,
    connector: &C,
    h2_config: &H2Config,
    clock: &Arc<dyn Clock>,
) -> Result<Connection<BoxedTransport>>
where
    C: TlsConnector<TcpStream>,
    <C as TlsConnector<TcpStream>>::TlsStream: 'static,
{
    if plan.route.address.is_https() {
        let (tls, alpn) = plan.connect_tls(tcp, connector).await?;
        let io: BoxedTransport = Box::new(tls);
        plan.handle_success(io, alpn, h2_config.clone(), clock.clone()).await
    } else {
        let io: BoxedTransport = Box::new(tcp);
        plan.handle_success(io, "http/1.1", h2_config.clone(), clock.clone()).await
    }
}

/// If `err` is TLS-fallback-classifiable, queues the next `ConnectionSpec`
/// attempt on the planner and reports whether one was queued.
fn queue_tls_fallback(planner: &mut dyn RoutePlanner, plan: &ConnectPlan, err: &Error) -> bool {
    if !err.is_tls_downgrade_candidate() {
        return false;
    }
    match plan.next_tls_fallback() {
        Some(next) => {
            planner.push_deferred(next);
            true
        }
        None => false,
    }
}

/// Steps through one plan at a time: connect, and on failure either drain a
/// TLS-fallback/deferred plan or accumulate the failure and ask the planner
/// for the next route (spec.md §4.3's sequential finder).
pub struct SequentialFinder<P, C> {
    planner: P,
    connector: Arc<C>,
    h2_config: H2Config,
    clock: Arc<dyn Clock>,
}

impl<P, C> SequentialFinder<P, C> {
    pub fn new(planner: P, connector: Arc<C>, h2_config: H2Config) -> SequentialFinder<P, C> {
        SequentialFinder {
            planner,
            connector,
            h2_config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(
        planner: P,
        connector: Arc<C>,
        h2_config: H2Config,
        clock: Arc<dyn Clock>,
    ) -> SequentialFinder<P, C> {
        SequentialFinder {
            planner,
            connector,
            h2_config,
            clock,
        }
    }
}

#[async_trait]
impl<P, C> ExchangeFinder for SequentialFinder<P, C>
where
    P: RoutePlanner + Sync,
    C: TlsConnector<TcpStream>,
    <C as TlsConnector<TcpStream>>::TlsStream: 'static,
{
    #[instrument(name = "sequential_find", skip_all)]
    async fn find(&mut self) -> Result<Arc<Connection<BoxedTransport>>> {
        let mut first_error = FirstError::new();
        loop {
            let plan = self.planner.plan().await?;
            let connect_plan = match plan {
                Plan::Reuse(conn) => return Ok(conn),
                Plan::Connect(connect_plan) => connect_plan,
            };

            let outcome = async {
                let tcp = connect_plan.connect_tcp().await?;
                finish_connect(&connect_plan, tcp, &*self.connector, &self.h2_config, &self.clock).await
            }
            .await;

            match outcome {
                Ok(conn) => return Ok(Arc::new(conn)),
                Err(err) => {
                    if queue_tls_fallback(&mut self.planner, &connect_plan, &err) {
                        trace!(route = ?connect_plan.route, "deferring tls fallback attempt");
                        continue;
                    }
                    let retryable = err.is_retryable();
                    first_error.push(err);
                    if retryable && self.planner.has_next() {
                        continue;
                    }
                    return Err(first_error.into_error());
                }
            }
        }
    }
}

/// One in-flight TCP race participant: its cancellation handle, the plan it
/// came from, and the sequence number used to identify it among the
/// `JoinSet`'s completed results (`ConnectPlan` itself carries no identity).
struct Racer {
    id: u64,
    abort: AbortHandle,
    plan: ConnectPlan,
}

/// Races candidate routes happy-eyeballs-style: starts a new TCP connect at
/// most every 250 ms, cancels the losers the instant one TCP connect
/// completes, and only the winner ever attempts TLS (spec.md §4.3's
/// fast-fallback finder).
pub struct FastFallbackFinder<P, C> {
    planner: P,
    connector: Arc<C>,
    h2_config: H2Config,
    next_id: u64,
    /// When the most recent racer was spawned, so a run of immediate
    /// failures still can't start the next one sooner than
    /// [`FAST_FALLBACK_DELAY`] after it (spec.md §8 Invariant 10).
    last_spawn: Option<tokio::time::Instant>,
    clock: Arc<dyn Clock>,
}

impl<P, C> FastFallbackFinder<P, C> {
    pub fn new(planner: P, connector: Arc<C>, h2_config: H2Config) -> FastFallbackFinder<P, C> {
        FastFallbackFinder {
            planner,
            connector,
            h2_config,
            next_id: 0,
            last_spawn: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(
        planner: P,
        connector: Arc<C>,
        h2_config: H2Config,
        clock: Arc<dyn Clock>,
    ) -> FastFallbackFinder<P, C> {
        FastFallbackFinder {
            planner,
            connector,
            h2_config,
            next_id: 0,
            last_spawn: None,
            clock,
        }
    }

    fn spawn_racer(
        &mut self,
        racing: &mut JoinSet<(u64, ConnectPlan, Result<TcpStream>)>,
        racers: &mut Vec<Racer>,
        connect_plan: ConnectPlan,
    ) {
        let id = self.next_id;
        self.next_id += 1;
        self.last_spawn = Some(tokio::time::Instant::now());
        let tracked = connect_plan.clone();
        let abort = racing.spawn(async move {
            let res = connect_plan.connect_tcp().await;
            (id, connect_plan, res)
        });
        racers.push(Racer {
            id,
            abort,
            plan: tracked,
        });
    }
}

#[async_trait]
impl<P, C> ExchangeFinder for FastFallbackFinder<P, C>
where
    P: RoutePlanner,
    C: TlsConnector<TcpStream> + 'static,
{
    #[instrument(name = "fast_fallback_find", skip_all)]
    async fn find(&mut self) -> Result<Arc<Connection<BoxedTransport>>> {
        let mut first_error = FirstError::new();
        let mut racing: JoinSet<(u64, ConnectPlan, Result<TcpStream>)> = JoinSet::new();
        let mut racers: Vec<Racer> = Vec::new();

        loop {
            if racing.is_empty() {
                // Every intervening racer has already failed. Still hold the
                // 250 ms spacing between spawns rather than planning the next
                // route immediately.
                if let Some(last_spawn) = self.last_spawn {
                    tokio::time::sleep_until(last_spawn + FAST_FALLBACK_DELAY).await;
                }
                match self.planner.plan().await? {
                    Plan::Reuse(conn) => return Ok(conn),
                    Plan::Connect(connect_plan) => {
                        self.spawn_racer(&mut racing, &mut racers, connect_plan)
                    }
                }
            }

            let pace = sleep(FAST_FALLBACK_DELAY);
            tokio::pin!(pace);

            tokio::select! {
                _ = &mut pace, if self.planner.has_next() => {
                    if let Plan::Connect(connect_plan) = self.planner.plan().await? {
                        self.spawn_racer(&mut racing, &mut racers, connect_plan);
                    }
                }
                joined = racing.join_next(), if !racing.is_empty() => {
                    let (id, connect_plan, result) = match joined {
                        Some(Ok(triple)) => triple,
                        // Aborted losers surface here as join errors; nothing to do.
                        Some(Err(_)) | None => continue,
                    };
                    racers.retain(|r| r.id != id);

                    match result {
                        Err(err) => {
                            first_error.push(err);
                            if racing.is_empty() && !self.planner.has_next() {
                                return Err(first_error.into_error());
                            }
                        }
                        Ok(tcp) => {
                            // Winner: the remaining racers lose the race and
                            // are stashed for retry, never starting TLS.
                            for loser in racers.drain(..) {
                                loser.abort.abort();
                                self.planner.stash_next_route(loser.plan);
                            }
                            racing.abort_all();
                            while racing.join_next().await.is_some() {}

                            match finish_connect(&connect_plan, tcp, &*self.connector, &self.h2_config, &self.clock).await {
                                Ok(conn) => return Ok(Arc::new(conn)),
                                Err(err) => {
                                    debug!(route = ?connect_plan.route, "winner's handshake failed");
                                    let fell_back = queue_tls_fallback(&mut self.planner, &connect_plan, &err);
                                    let retryable = err.is_retryable();
                                    first_error.push(err);
                                    if !(fell_back || (retryable && self.planner.has_next())) {
                                        return Err(first_error.into_error());
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
