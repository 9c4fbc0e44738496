//! Panic recovery.
//!
//! Register this plugin first so that it is the outermost layer: a panic
//! anywhere inside it, in another link or in the handler, becomes a single
//! internal error for that request and the connection stays up.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use ares_core::{
    http_handler, stream_handler, unary_handler, AresError, HttpHandler, Status, StreamHandler,
    UnaryHandler,
};
use futures_util::FutureExt;

use crate::chain::{HttpLink, StreamLink, UnaryLink};
use crate::plugin::Plugin;

/// Converts panics into internal errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Recovery;

impl Recovery {
    /// Creates the recovery plugin.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Plugin for Recovery {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn http_link(&self) -> HttpLink {
        Arc::new(|next: HttpHandler| -> HttpHandler {
            http_handler(move |ctx, req| {
                let next = Arc::clone(&next);
                async move {
                    let method = ctx.method().clone();
                    let path = ctx.path().to_string();
                    let request_id = ctx.request_id();
                    // The call itself happens inside the guarded future
                    let guarded = AssertUnwindSafe(async move { next(ctx, req).await });
                    match guarded.catch_unwind().await {
                        Ok(result) => result,
                        Err(panic) => {
                            tracing::error!(
                                %request_id,
                                %method,
                                path = %path,
                                panic = %panic_message(panic.as_ref()),
                                "handler panicked"
                            );
                            Err(AresError::internal("internal server error"))
                        }
                    }
                }
            })
        })
    }

    fn unary_link(&self) -> UnaryLink {
        Arc::new(|next: UnaryHandler| -> UnaryHandler {
            unary_handler(move |ctx, msg| {
                let next = Arc::clone(&next);
                async move {
                    let method = ctx.full_method();
                    let guarded = AssertUnwindSafe(async move { next(ctx, msg).await });
                    guarded.catch_unwind().await.unwrap_or_else(|panic| {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(method = %method, panic = %message, "rpc handler panicked");
                        Err(Status::internal(format!("panic: {message}")))
                    })
                }
            })
        })
    }

    fn stream_link(&self) -> StreamLink {
        Arc::new(|next: StreamHandler| -> StreamHandler {
            stream_handler(move |ctx, stream| {
                let next = Arc::clone(&next);
                async move {
                    let method = ctx.full_method();
                    let guarded = AssertUnwindSafe(async move { next(ctx, stream).await });
                    guarded.catch_unwind().await.unwrap_or_else(|panic| {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(method = %method, panic = %message, "stream handler panicked");
                        Err(Status::internal(format!("panic: {message}")))
                    })
                }
            })
        })
    }
}
