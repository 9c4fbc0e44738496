//! Request metrics.
//!
//! Records a request counter and a latency histogram through
//! [`ares_telemetry::record_request`], labelled by transport, route pattern
//! (or full RPC method) and outcome. Requests that matched no route share the
//! [`UNMATCHED_ROUTE`] label. Whether anything is exported depends on
//! the recorder installed by `ares_telemetry::init_metrics`.

use std::sync::Arc;
use std::time::Instant;

use ares_core::{
    http_handler, stream_handler, unary_handler, Code, HttpHandler, RequestContext, StreamHandler,
    UnaryHandler,
};
use ares_telemetry::record_request;

use crate::chain::{HttpLink, StreamLink, UnaryLink};
use crate::plugin::Plugin;

/// Records request metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    /// Creates the metrics plugin.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Route label for requests that matched no pattern.
pub const UNMATCHED_ROUTE: &str = "<unmatched>";

// Raw paths would make the label set unbounded
fn route_label(ctx: &RequestContext) -> String {
    ctx.pattern().unwrap_or(UNMATCHED_ROUTE).to_string()
}

fn rpc_status(code: Code) -> String {
    code.as_i32().to_string()
}

impl Plugin for Metrics {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn http_link(&self) -> HttpLink {
        Arc::new(|next: HttpHandler| -> HttpHandler {
            http_handler(move |ctx, req| {
                let next = Arc::clone(&next);
                async move {
                    let started = Instant::now();
                    let route = route_label(&ctx);

                    let result = next(ctx, req).await;
                    let status = match &result {
                        Ok(resp) => resp.status(),
                        Err(err) => err.status_code(),
                    };
                    record_request("http", &route, status.as_str(), started.elapsed());
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
                    let code = result.as_ref().map_or_else(|s| s.code(), |_| Code::Ok);
                    record_request("grpc", &method, &rpc_status(code), started.elapsed());
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
                    let code = result.as_ref().map_or_else(|s| s.code(), |()| Code::Ok);
                    record_request("grpc", &method, &rpc_status(code), started.elapsed());
                    result
                }
            })
        })
    }
}
