//! Connection- and stream-level flow-control windows (RFC 7540 §6.9).
//!
//! Waiting for window credit is expressed with `tokio::sync::Notify` rather
//! than the condition-variable-plus-lock pattern a thread-based client would
//! use (spec.md §9's translation note), since every waiter here is already
//! inside an async task.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{Error, Kind, Result};

/// A single flow-control window: negative values are legal transiently (a
/// SETTINGS_INITIAL_WINDOW_SIZE decrease can push a stream's window below
/// zero; RFC 7540 §6.9.2), they just block new sends until acknowledged.
#[derive(Debug)]
pub struct FlowControl {
    window: i64,
    notify: Arc<Notify>,
}

impl FlowControl {
    pub fn new(initial: u32) -> FlowControl {
        FlowControl {
            window: initial as i64,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn available(&self) -> i64 {
        self.window
    }

    /// Applies a WINDOW_UPDATE increment, per RFC 7540 §6.9.1's 31-bit range.
    pub fn expand(&mut self, increment: u32) -> Result<()> {
        let new_window = self
            .window
            .checked_add(increment as i64)
            .ok_or_else(|| Error::new(Kind::Http2))?;
        if new_window > (1i64 << 31) - 1 {
            return Err(Error::new(Kind::Http2));
        }
        self.window = new_window;
        self.notify.notify_waiters();
        Ok(())
    }

    /// Reduces the window by `size`, as we send DATA bytes.
    pub fn send_data(&mut self, size: usize) {
        self.window -= size as i64;
    }

    /// Reduces the window by `size`, as we receive DATA bytes (accounted
    /// before the peer's credit is replenished by our own WINDOW_UPDATE).
    pub fn recv_data(&mut self, size: usize) {
        self.window -= size as i64;
    }

    /// Applies a SETTINGS_INITIAL_WINDOW_SIZE change across the delta
    /// between the old and new values, per RFC 7540 §6.9.2.
    pub fn apply_initial_window_size_delta(&mut self, delta: i64) {
        self.window += delta;
    }

    pub fn has_capacity(&self, size: usize) -> bool {
        self.window >= size as i64
    }

    /// Waits until the window has at least `size` bytes of capacity.
    pub async fn wait_for_capacity(&mut self, size: usize) {
        while !self.has_capacity(size) {
            let notified = self.notify.notified();
            if self.has_capacity(size) {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_adds_credit() {
        let mut fc = FlowControl::new(0);
        fc.expand(100).unwrap();
        assert_eq!(fc.available(), 100);
    }

    #[test]
    fn send_data_can_go_negative_after_shrink() {
        let mut fc = FlowControl::new(10);
        fc.apply_initial_window_size_delta(-20);
        assert_eq!(fc.available(), -10);
        assert!(!fc.has_capacity(1));
    }

    #[tokio::test]
    async fn wait_for_capacity_returns_immediately_once_available() {
        let mut fc = FlowControl::new(0);
        fc.expand(10).unwrap();
        // Already has capacity, so this must not block.
        tokio::time::timeout(std::time::Duration::from_millis(50), fc.wait_for_capacity(10))
            .await
            .expect("wait_for_capacity should not block when capacity is already available");
    }
}
