//! # Ares Core
//!
//! Core types shared by every Ares crate:
//!
//! - [`AresError`] / [`ErrorCategory`] - HTTP-side errors with status mapping
//! - [`Status`] / [`Code`] - RPC call outcomes
//! - [`RequestContext`] / [`RpcContext`] - per-request state
//! - [`HttpHandler`], [`UnaryHandler`], [`StreamHandler`], [`UnaryInvoker`] -
//!   the closed set of handler shapes middleware links wrap
//! - [`ServerStream`] - the handler side of a streaming call

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod handler;
pub mod response;
mod status;
mod stream;

pub use context::{RequestContext, RequestId, RpcContext, REQUEST_ID_HEADER};
pub use error::{AresError, AresResult, ErrorCategory, ErrorDetail, ErrorEnvelope};
pub use handler::{
    http_handler, stream_handler, unary_handler, unary_invoker, BoxFuture, HttpHandler, Request,
    Response, StreamHandler, UnaryHandler, UnaryInvoker,
};
pub use status::{Code, Status};
pub use stream::{ServerStream, StreamPeer};
