//! The routing layer: per-call decisions about how to obtain a connection,
//! composed of an [`Address`]/[`Route`] data model, the external
//! collaborator traits ([`collab`]), a [`RouteSelector`] over (proxy, inet)
//! pairs, [`Plan`]/[`ConnectPlan`] attempts, and the two [`finder`]
//! implementations that drive them (spec.md §4.2, §4.3).

pub mod address;
pub mod collab;
pub mod finder;
pub mod plan;
pub mod route;
pub mod selector;
pub mod tunnel;

pub use self::address::Address;
pub use self::route::{Proxy, Route, RouteDatabase};

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::connection::Connection;
use crate::error::Result;
use crate::io::BoxedTransport;
use crate::pool::ConnectionPool;
use crate::route::collab::{CertificatePinner, Dns, ProxySelector};
use crate::route::plan::{ConnectPlan, Plan};
use crate::route::selector::RouteSelector;

/// One call's plan-producing state: implements [`finder::RoutePlanner`] by
/// following the four-step preference order in spec.md §4.2 — reuse the
/// call's existing connection, reuse a pooled one, drain a deferred plan,
/// else step the [`RouteSelector`] for a fresh connect.
pub struct Planner<'a> {
    address: Address,
    pool: Arc<ConnectionPool>,
    database: Arc<RouteDatabase>,
    dns: &'a dyn Dns,
    proxy_selector: &'a dyn ProxySelector,
    certificate_pinner: &'a dyn CertificatePinner,
    require_multiplexed: bool,
    existing: Option<Arc<Connection<BoxedTransport>>>,
    selector: Option<RouteSelector>,
    deferred_plans: VecDeque<ConnectPlan>,
    next_route_to_try: Option<ConnectPlan>,
    attempt: u32,
}

impl<'a> Planner<'a> {
    pub fn new(
        address: Address,
        pool: Arc<ConnectionPool>,
        database: Arc<RouteDatabase>,
        dns: &'a dyn Dns,
        proxy_selector: &'a dyn ProxySelector,
        certificate_pinner: &'a dyn CertificatePinner,
        require_multiplexed: bool,
    ) -> Planner<'a> {
        Planner {
            address,
            pool,
            database,
            dns,
            proxy_selector,
            certificate_pinner,
            require_multiplexed,
            existing: None,
            selector: None,
            deferred_plans: VecDeque::new(),
            next_route_to_try: None,
            attempt: 0,
        }
    }

    /// Attaches the call's already-held connection, tried first on the next
    /// `plan()` (spec.md §4.2 step 1).
    pub fn with_existing_connection(mut self, connection: Arc<Connection<BoxedTransport>>) -> Planner<'a> {
        self.existing = Some(connection);
        self
    }

    fn next_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }
}

#[async_trait]
impl<'a> finder::RoutePlanner for Planner<'a> {
    async fn plan(&mut self) -> Result<Plan<BoxedTransport>> {
        // Step 1: reuse the call's existing connection if it is still
        // eligible; otherwise release it and never look at it again.
        if let Some(conn) = self.existing.take() {
            if conn.is_eligible(&self.address) && conn.is_healthy(false).await {
                trace!(address = ?self.address, "reusing call's existing connection");
                return Ok(Plan::Reuse(conn));
            }
        }

        // Step 2: reuse a pooled connection by Address.
        if let Some(conn) = self
            .pool
            .acquire(&self.address, self.require_multiplexed, false)
            .await
        {
            trace!(address = ?self.address, "reusing pooled connection");
            return Ok(Plan::Reuse(conn));
        }

        // Step 3: drain a deferred plan (tunnel follow-up or TLS fallback).
        if let Some(plan) = self.deferred_plans.pop_front() {
            trace!(address = ?self.address, "draining deferred plan");
            return Ok(Plan::Connect(plan));
        }

        // Step 4a: a fast-fallback race loser stashed for retry.
        if let Some(plan) = self.next_route_to_try.take() {
            trace!(address = ?self.address, "retrying stashed race-loser route");
            return Ok(Plan::Connect(plan));
        }

        // Step 4b: step the route selector for a fresh candidate, skipping
        // routes the database knows recently failed where an alternative
        // remains.
        let address = self.address.clone();
        let proxy_selector = self.proxy_selector;
        let selector = self
            .selector
            .get_or_insert_with(|| RouteSelector::new(address, proxy_selector));

        loop {
            match selector.next(self.dns).await? {
                Some(route) => {
                    if self.database.should_postpone(&route) && selector.has_next() {
                        trace!(route = ?route, "postponing recently-failed route");
                        continue;
                    }
                    // After materialising a concrete IP, check for an H2
                    // connection already open to a *different* hostname that
                    // shares this IP and whose certificate also covers ours
                    // (spec.md §3/§4.2 step 2's second pool attempt).
                    if let Some(conn) = self
                        .pool
                        .acquire_coalesced(
                            route.socket_addr,
                            &self.address,
                            self.certificate_pinner,
                            false,
                        )
                        .await
                    {
                        return Ok(Plan::Reuse(conn));
                    }
                    let attempt = self.next_attempt();
                    return Ok(Plan::Connect(ConnectPlan::new(route, attempt)));
                }
                None => return Err(crate::error::Error::new_no_route()),
            }
        }
    }

    /// A connection's route is retryable iff it never saw a request
    /// succeed or fail, never flipped `no_new_exchanges`, and the route
    /// selector (or a stashed/deferred plan) still has a candidate to offer
    /// (spec.md §4.2's `has_next`).
    fn has_next(&self) -> bool {
        self.next_route_to_try.is_some()
            || !self.deferred_plans.is_empty()
            || self.selector.as_ref().map(|s| s.has_next()).unwrap_or(true)
    }

    fn push_deferred(&mut self, plan: ConnectPlan) {
        self.deferred_plans.push_front(plan);
    }

    fn stash_next_route(&mut self, plan: ConnectPlan) {
        self.next_route_to_try = Some(plan);
    }
}
