//! Applying and merging SETTINGS frames against a connection's negotiated
//! parameters (RFC 7540 §6.5.2).

use crate::h2::frame::{self, Settings};

/// The negotiated parameters for one side of an H2 connection, seeded from
/// [`super::H2Config`] and updated as SETTINGS frames are exchanged.
#[derive(Debug, Clone)]
pub struct NegotiatedSettings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for NegotiatedSettings {
    fn default() -> Self {
        NegotiatedSettings {
            header_table_size: frame::DEFAULT_SETTINGS_HEADER_TABLE_SIZE as u32,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl NegotiatedSettings {
    /// Applies a peer's SETTINGS frame, returning the delta to apply to
    /// every open stream's send-flow window (RFC 7540 §6.9.2).
    pub fn apply(&mut self, settings: &Settings) -> i64 {
        let mut window_delta = 0i64;

        if let Some(table_size) = settings.header_table_size() {
            self.header_table_size = table_size;
        }
        if let Some(push) = settings.is_push_enabled() {
            self.enable_push = push;
        }
        if let Some(max) = settings.max_concurrent_streams() {
            self.max_concurrent_streams = Some(max);
        }
        if let Some(window) = settings.initial_window_size() {
            window_delta = window as i64 - self.initial_window_size as i64;
            self.initial_window_size = window;
        }
        if let Some(frame_size) = settings.max_frame_size() {
            self.max_frame_size = frame_size;
        }
        if let Some(header_list) = settings.max_header_list_size() {
            self.max_header_list_size = Some(header_list);
        }

        window_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applying_smaller_initial_window_yields_negative_delta() {
        let mut negotiated = NegotiatedSettings::default();
        let mut settings = Settings::default();
        settings.set_initial_window_size(Some(1_000));
        let delta = negotiated.apply(&settings);
        assert_eq!(delta, 1_000 - frame::DEFAULT_INITIAL_WINDOW_SIZE as i64);
        assert_eq!(negotiated.initial_window_size, 1_000);
    }
}
