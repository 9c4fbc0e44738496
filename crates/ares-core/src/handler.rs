//! Handler shapes.
//!
//! Ares dispatches through a closed set of handler shapes, one per transport
//! and call style. Each shape is a reference-counted async closure so that
//! middleware links can wrap it and servers can share it between connection
//! tasks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::context::{RequestContext, RpcContext};
use crate::error::AresError;
use crate::status::Status;
use crate::stream::ServerStream;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The HTTP request type seen by handlers: the body is fully buffered.
pub type Request = http::Request<Bytes>;

/// The HTTP response type produced by handlers.
pub type Response = http::Response<Bytes>;

/// An HTTP request handler.
pub type HttpHandler =
    Arc<dyn Fn(RequestContext, Request) -> BoxFuture<'static, Result<Response, AresError>> + Send + Sync>;

/// A unary RPC handler: one request message in, one response message out.
pub type UnaryHandler =
    Arc<dyn Fn(RpcContext, Bytes) -> BoxFuture<'static, Result<Bytes, Status>> + Send + Sync>;

/// A streaming RPC handler.
pub type StreamHandler =
    Arc<dyn Fn(RpcContext, ServerStream) -> BoxFuture<'static, Result<(), Status>> + Send + Sync>;

/// The client-side unary call, wrapped by client links.
pub type UnaryInvoker =
    Arc<dyn Fn(RpcContext, Bytes) -> BoxFuture<'static, Result<Bytes, Status>> + Send + Sync>;

/// Wraps an async function as an [`HttpHandler`].
///
/// # Example
///
/// ```
/// use ares_core::{http_handler, response, RequestContext, Request};
///
/// let handler = http_handler(|ctx: RequestContext, _req: Request| async move {
///     Ok(response::text(http::StatusCode::OK, format!("hello {}", ctx.path())))
/// });
/// # let _ = handler;
/// ```
pub fn http_handler<F, Fut>(f: F) -> HttpHandler
where
    F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, AresError>> + Send + 'static,
{
    Arc::new(move |ctx, req| Box::pin(f(ctx, req)))
}

/// Wraps an async function as a [`UnaryHandler`].
pub fn unary_handler<F, Fut>(f: F) -> UnaryHandler
where
    F: Fn(RpcContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, Status>> + Send + 'static,
{
    Arc::new(move |ctx, msg| Box::pin(f(ctx, msg)))
}

/// Wraps an async function as a [`StreamHandler`].
pub fn stream_handler<F, Fut>(f: F) -> StreamHandler
where
    F: Fn(RpcContext, ServerStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    Arc::new(move |ctx, stream| Box::pin(f(ctx, stream)))
}

/// Wraps an async function as a [`UnaryInvoker`].
pub fn unary_invoker<F, Fut>(f: F) -> UnaryInvoker
where
    F: Fn(RpcContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, Status>> + Send + 'static,
{
    Arc::new(move |ctx, msg| Box::pin(f(ctx, msg)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn test_http_handler_invocation() {
        let handler = http_handler(|ctx: RequestContext, req: Request| async move {
            assert_eq!(req.body().as_ref(), b"payload");
            Ok(crate::response::text(http::StatusCode::OK, ctx.path().to_string()))
        });

        let req = http::Request::builder()
            .uri("/echo")
            .body(Bytes::from_static(b"payload"))
            .unwrap();
        let resp = tokio_test::block_on(handler(RequestContext::new(Method::GET, "/echo"), req)).unwrap();
        assert_eq!(resp.body().as_ref(), b"/echo");
    }

    #[test]
    fn test_unary_handler_error() {
        let handler = unary_handler(|_ctx, _msg| async { Err(Status::not_found("missing")) });
        let err = tokio_test::block_on(handler(RpcContext::new("s", "m"), Bytes::new())).unwrap_err();
        assert_eq!(err.code(), crate::Code::NotFound);
    }
}
