#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # connectcore
//!
//! `connectcore` is the core of an HTTP client: it turns a stream of
//! user-issued HTTP calls into properly multiplexed bytes over TCP/TLS
//! connections. It owns three tightly coupled pieces:
//!
//! - a [`pool`] of warm HTTP/1 and HTTP/2 connections,
//! - a [`route`] planner and exchange finder that picks a route per attempt
//!   and races candidates "happy-eyeballs"-style,
//! - an [`h2`] framing engine (frames, HPACK, flow control, settings,
//!   ping/keepalive, goaway).
//!
//! This crate is deliberately low-level: it has no user-facing request or
//! response builder, no HTTP/1 wire codec, no DNS resolver, and no TLS
//! implementation of its own. Those are reached only through the
//! collaborator traits in [`route::collab`].

pub mod body;
pub mod common;
pub mod connection;
mod error;
pub mod h2;
pub mod io;
pub mod pool;
pub mod route;
pub mod rt;

pub use crate::error::{Error, Kind, Result};
