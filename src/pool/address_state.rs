//! Per-address minimum-concurrency policy and the bookkeeping the pool's
//! periodic opener/closer tasks need to honor it (spec.md §4.1's
//! `AddressState`).

use std::time::Duration;

/// How many connections the pool should keep warm for one address, and how
/// aggressively to retry after a pre-emptive open fails.
#[derive(Debug, Clone, Copy)]
pub struct AddressPolicy {
    pub min_concurrent_calls: u32,
    pub backoff: Duration,
    pub backoff_jitter: Duration,
}

impl AddressPolicy {
    pub fn none() -> AddressPolicy {
        AddressPolicy {
            min_concurrent_calls: 0,
            backoff: Duration::from_secs(1),
            backoff_jitter: Duration::from_millis(200),
        }
    }

    /// A backoff delay randomised within `backoff ± backoff_jitter`
    /// (spec.md §4.1's `open_connections` failure reschedule).
    pub fn backoff_with_jitter(&self) -> Duration {
        if self.backoff_jitter.is_zero() {
            return self.backoff;
        }
        let jitter_ms = self.backoff_jitter.as_millis() as i64;
        let offset = rand::random::<i64>() % (jitter_ms * 2 + 1) - jitter_ms;
        let base_ms = self.backoff.as_millis() as i64;
        Duration::from_millis((base_ms + offset).max(0) as u64)
    }
}

/// Installed policy plus the capacity already covered by open connections,
/// recomputed by the pool's closer task on every sweep.
#[derive(Debug, Clone, Copy)]
pub struct AddressState {
    pub policy: AddressPolicy,
    pub concurrent_call_capacity: u32,
}

impl AddressState {
    pub fn new(policy: AddressPolicy) -> AddressState {
        AddressState {
            policy,
            concurrent_call_capacity: 0,
        }
    }

    pub fn needs_more_connections(&self) -> bool {
        self.concurrent_call_capacity < self.policy.min_concurrent_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_with_jitter_stays_nonnegative() {
        let policy = AddressPolicy {
            min_concurrent_calls: 1,
            backoff: Duration::from_millis(10),
            backoff_jitter: Duration::from_millis(50),
        };
        for _ in 0..100 {
            assert!(policy.backoff_with_jitter() <= Duration::from_millis(60));
        }
    }

    #[test]
    fn needs_more_connections_compares_capacity() {
        let mut state = AddressState::new(AddressPolicy {
            min_concurrent_calls: 2,
            ..AddressPolicy::none()
        });
        assert!(state.needs_more_connections());
        state.concurrent_call_capacity = 2;
        assert!(!state.needs_more_connections());
    }
}
