//! Access logging.
//!
//! Emits one `tracing` event per request after the inner layers return,
//! carrying the method, the path (or RPC method), the outcome and the
//! latency. Server errors are logged at `warn`, everything else at `info`.

use std::sync::Arc;
use std::time::Instant;

use ares_core::{
    http_handler, stream_handler, unary_handler, Code, HttpHandler, Status, StreamHandler,
    UnaryHandler,
};

use crate::chain::{HttpLink, StreamLink, UnaryLink};
use crate::plugin::Plugin;

/// Logs every request once it completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLog;

impl AccessLog {
    /// Creates the access log plugin.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn log_rpc(kind: &'static str, method: &str, started: Instant, result: Result<(), &Status>) {
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(()) => tracing::info!(kind, method, code = %Code::Ok, latency_ms, "rpc"),
        Err(status) if matches!(status.code(), Code::Internal | Code::Unknown | Code::DataLoss) => {
            tracing::warn!(kind, method, code = %status.code(), error = %status.message(), latency_ms, "rpc");
        }
        Err(status) => {
            tracing::info!(kind, method, code = %status.code(), error = %status.message(), latency_ms, "rpc");
        }
    }
}

impl Plugin for AccessLog {
    fn name(&self) -> &'static str {
        "access_log"
    }

    fn http_link(&self) -> HttpLink {
        Arc::new(|next: HttpHandler| -> HttpHandler {
            http_handler(move |ctx, req| {
                let next = Arc::clone(&next);
                async move {
                    let started = Instant::now();
                    let method = ctx.method().clone();
                    let path = ctx.path().to_string();
                    let request_id = ctx.request_id();

                    let result = next(ctx, req).await;
                    let status = match &result {
                        Ok(resp) => resp.status(),
                        Err(err) => err.status_code(),
                    };
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    if status.is_server_error() {
                        tracing::warn!(%request_id, %method, path = %path, status = status.as_u16(), latency_ms, "http");
                    } else {
                        tracing::info!(%request_id, %method, path = %path, status = status.as_u16(), latency_ms, "http");
                    }
                    result
                }
            })
        })
    }

    fn unary_link(&self) -> UnaryLink {
        Arc::new(|next: UnaryHandler| -> UnaryHandler {
            unary_handler(move |ctx, msg| {
                let next = Arc::clone(&next);
                async move {
                    let started = Instant::now();
                    let method = ctx.full_method();
                    let result = next(ctx, msg).await;
                    log_rpc("unary", &method, started, result.as_ref().map(|_| ()));
                    result
                }
            })
        })
    }

    fn stream_link(&self) -> StreamLink {
        Arc::new(|next: StreamHandler| -> StreamHandler {
            stream_handler(move |ctx, stream| {
                let next = Arc::clone(&next);
                async move {
                    let started = Instant::now();
                    let method = ctx.full_method();
                    let result = next(ctx, stream).await;
                    log_rpc("stream", &method, started, result.as_ref().copied());
                    result
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::chain;
    use ares_core::{response, AresError, RequestContext, RpcContext};
    use bytes::Bytes;
    use http::{Method, StatusCode};

    #[tokio::test]
    async fn test_http_result_is_returned_unchanged() {
        let ok = http_handler(|_ctx, _req| async { Ok(response::text(StatusCode::CREATED, "made")) });
        let handler = chain(ok, &[AccessLog.http_link()]);
        let req = http::Request::builder().uri("/things").body(Bytes::new()).unwrap();

        let resp = handler(RequestContext::new(Method::POST, "/things"), req)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_http_error_is_returned_unchanged() {
        let failing = http_handler(|_ctx, _req| async { Err(AresError::internal("db down")) });
        let handler = chain(failing, &[AccessLog.http_link()]);
        let req = http::Request::builder().uri("/").body(Bytes::new()).unwrap();

        let err = handler(RequestContext::new(Method::GET, "/"), req)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_unary_status_passes_through() {
        let failing = unary_handler(|_ctx, _msg| async { Err(Status::not_found("nope")) });
        let handler = chain(failing, &[AccessLog.unary_link()]);
        let err = handler(RpcContext::new("svc", "Get"), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }
}
