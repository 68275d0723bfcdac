//! Body plumbing. This crate has no user-facing request/response builders
//! (spec.md's Non-goals); [`Incoming`] exists only as the seam between the
//! H2 frame engine and whatever builds the final `http::Response` on top of
//! this crate.

mod incoming;

pub use self::incoming::Incoming;
pub(crate) use self::incoming::IncomingSender;
