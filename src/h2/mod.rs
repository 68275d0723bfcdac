//! The HTTP/2 framing engine: wire frames, HPACK header compression, and the
//! stream/connection-level protocol state machine that drives them.

pub mod frame;
pub mod hpack;
pub mod proto;

pub use self::frame::Reason;
pub use self::proto::{H2Config, H2Connection};
