//! # Ares Middleware
//!
//! Middleware for Ares servers and clients, built from two pieces:
//!
//! - [`chain`] composes a list of [`Link`]s around a terminal handler, the
//!   first link being the outermost.
//! - [`Plugin`] bundles one link per handler shape so that a single value
//!   (rate limiting, recovery, logging) can be installed on HTTP servers, RPC
//!   servers and RPC clients alike.
//!
//! ## Standard plugins
//!
//! | Plugin | HTTP | Unary | Stream | Client |
//! |--------|------|-------|--------|--------|
//! | [`plugins::Recovery`] | yes | yes | yes | - |
//! | [`plugins::AccessLog`] | yes | yes | yes | - |
//! | [`plugins::Metrics`] | yes | yes | yes | - |
//! | [`plugins::RateLimit`] | yes | yes | yes | - |
//! | [`plugins::CircuitBreaker`] | - | - | - | yes |
//! | [`plugins::Retry`] | - | - | - | yes |
//! | [`plugins::Tracer`] | - | - | - | yes |
//!
//! Recovery is normally installed first so that it also catches panics
//! raised inside other links.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod chain;
mod plugin;
pub mod plugins;

pub use chain::{chain, identity, ClientUnaryLink, HttpLink, Link, StreamLink, UnaryLink};
pub use plugin::Plugin;
