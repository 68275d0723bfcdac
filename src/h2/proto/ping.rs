//! Connection keepalive via PING, and BDP-style degraded-connection
//! detection, ported from the runtime-orchestration half of an H2 client's
//! ping logic (the frame itself is encoded by [`crate::h2::frame::Ping`];
//! this module owns *when* to send one and what to do if the pong never
//! comes back).

use std::time::Duration;

use crate::common::clock::Clock;
use crate::h2::frame;

/// Configuration for keepalive pings, mirrored from `H2Config`.
#[derive(Debug, Clone, Copy)]
pub struct KeepAliveConfig {
    pub interval: Option<Duration>,
    pub timeout: Duration,
    pub while_idle: bool,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        KeepAliveConfig {
            interval: None,
            timeout: Duration::from_secs(1),
            while_idle: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum State {
    Idle,
    /// A PING has been sent; `sent_at_ns` records when for timeout purposes.
    AwaitingPong { sent_at_ns: u64 },
    /// One pong deadline was missed; the connection is still usable but
    /// should be deprioritized for new non-idempotent calls (spec.md §4.4's
    /// "degraded pong timeout").
    Degraded,
}

/// Tracks outstanding keepalive pings for one H2 connection.
#[derive(Debug)]
pub struct Ponger {
    state: State,
    config: KeepAliveConfig,
    last_activity_ns: u64,
}

impl Ponger {
    pub fn new(config: KeepAliveConfig, clock: &dyn Clock) -> Ponger {
        Ponger {
            state: State::Idle,
            config,
            last_activity_ns: clock.now_ns(),
        }
    }

    pub fn record_activity(&mut self, clock: &dyn Clock) {
        self.last_activity_ns = clock.now_ns();
    }

    /// Returns a fresh opaque payload to send as a PING frame if the
    /// keepalive interval has elapsed and no ping is already outstanding.
    pub fn poll_send_ping(&mut self, clock: &dyn Clock, streams_open: bool) -> Option<[u8; 8]> {
        let interval = self.config.interval?;
        if matches!(self.state, State::AwaitingPong { .. }) {
            return None;
        }
        if !streams_open && !self.config.while_idle {
            return None;
        }
        let now = clock.now_ns();
        let elapsed = Duration::from_nanos(now.saturating_sub(self.last_activity_ns));
        if elapsed < interval {
            return None;
        }
        self.state = State::AwaitingPong { sent_at_ns: now };
        Some(now.to_be_bytes())
    }

    /// Call when a PONG is received; clears the degraded flag.
    pub fn recv_pong(&mut self, clock: &dyn Clock) {
        self.state = State::Idle;
        self.record_activity(clock);
    }

    /// Checks whether the outstanding ping (if any) has exceeded
    /// `keep_alive_timeout`, marking the connection degraded rather than
    /// failing it outright.
    pub fn poll_timeout(&mut self, clock: &dyn Clock) -> bool {
        if let State::AwaitingPong { sent_at_ns } = self.state {
            let now = clock.now_ns();
            let elapsed = Duration::from_nanos(now.saturating_sub(sent_at_ns));
            if elapsed >= self.config.timeout {
                self.state = State::Degraded;
            }
        }
        self.is_degraded()
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.state, State::Degraded)
    }
}

/// Builds the PING frame `Ponger::poll_send_ping` requested.
pub fn build_ping(payload: [u8; 8]) -> frame::Ping {
    frame::Ping::new(payload)
}

/// Builds the PONG to answer a received PING, echoing its payload per
/// RFC 7540 §6.7.
pub fn build_pong(received: &frame::Ping) -> frame::Ping {
    frame::Ping::pong(*received.payload())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::clock::TestClock;

    #[test]
    fn pong_received_clears_degraded_state() {
        let clock = TestClock::new();
        let mut ponger = Ponger::new(
            KeepAliveConfig {
                interval: Some(Duration::from_secs(10)),
                timeout: Duration::from_secs(1),
                while_idle: true,
            },
            &clock,
        );

        let payload = ponger.poll_send_ping(&clock, true).unwrap();
        clock.advance(Duration::from_secs(2));
        assert!(ponger.poll_timeout(&clock));

        ponger.recv_pong(&clock);
        assert!(!ponger.is_degraded());
        let _ = build_ping(payload);
    }

    #[test]
    fn no_ping_sent_without_interval_configured() {
        let clock = TestClock::new();
        let mut ponger = Ponger::new(KeepAliveConfig::default(), &clock);
        assert!(ponger.poll_send_ping(&clock, true).is_none());
    }
}
