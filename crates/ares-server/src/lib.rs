//! # Ares Server
//!
//! HTTP and gRPC servers for the Ares runtime.
//!
//! This crate provides:
//!
//! - [`ConnectionTracker`] / [`TrackedListener`] - counted connections with
//!   idempotent close, the basis of graceful drain
//! - [`ServerState`] / [`StateCell`] - the `Idle → Starting → Running →
//!   Draining → Stopped` state machine
//! - [`Server`] - the object-safe contract the process lifecycle drives
//! - [`HttpServer`] - HTTP/1.1 over Hyper with radix routing
//! - [`RpcServer`] - gRPC over HTTP/2 with unary and streaming methods
//!
//! ## Stopping
//!
//! [`Server::stop`] closes the listener and every connection at once.
//! [`Server::graceful_stop`] closes the listener, lets each connection finish
//! its in-flight requests and waits until none are left; that wait is
//! unbounded unless the server was built with a drain timeout.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod codec;
mod error;
mod http_server;
mod rpc;
mod server;
mod state;
mod tracker;

pub use error::{ServerError, ServerResult};
pub use http_server::{ErrorHandler, HttpServer, HttpServerBuilder, RouteGroup};
pub use rpc::{GrpcBody, MethodHandler, RpcServer, RpcServerBuilder};
pub use server::Server;
pub use state::{ServerState, StateCell};
pub use tracker::{CloseHandle, ConnectionTracker, TrackedConnection, TrackedListener, KEEPALIVE_PERIOD};
