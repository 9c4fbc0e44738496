//! # Ares
//!
//! **Embeddable HTTP and gRPC server runtime with graceful lifecycle
//! management**
//!
//! - Radix tree routing with path parameters and wildcards
//! - One middleware model (links) for HTTP handlers, unary RPCs, streaming
//!   RPCs and outgoing client calls
//! - Connection tracking with graceful drain or immediate stop
//! - A process lifecycle manager that gates discovery registration on
//!   startup, maps OS signals to shutdown policies and runs cleanups
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ares::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<std::process::ExitCode, AppError> {
//!     let http = HttpServer::new("api", "0.0.0.0:8080");
//!     http.use_plugin(&Recovery::new())?;
//!     http.get("/v1/user/:id", http_handler(|ctx, _req| async move {
//!         Ok(response::text(StatusCode::OK, ctx.param("id").unwrap_or_default().to_string()))
//!     }))?;
//!
//!     let mut app = App::builder().name("users").build();
//!     app.serve(Arc::new(http))?;
//!     Ok(app.run().await?.into())
//! }
//! ```
//!
//! ## Shutdown
//!
//! ```text
//! SIGHUP / SIGQUIT / SIGUSR1  → Graceful  → unregister → drain → defers → exit 0
//! SIGINT / SIGTERM / SIGUSR2  → Immediate → unregister → stop  → defers → exit 1
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod app;
pub mod discovery;
mod error;
pub mod signal;
pub mod worker;

pub use app::{App, AppBuilder, ShutdownHandle, DEFAULT_STARTUP_TIMEOUT, INSTANCE_ID_ENV};
pub use error::{AppError, Exit};

// Re-export core types
pub use ares_core as core;

// Re-export configuration
pub use ares_config as config;

// Re-export middleware types
pub use ares_middleware as middleware;

// Re-export router types
pub use ares_router as router;

// Re-export server types
pub use ares_server as server;

// Re-export telemetry
pub use ares_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use ares::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    pub use ares_core::{
        http_handler, response, stream_handler, unary_handler, AresError, Code, HttpHandler,
        RequestContext, RpcContext, ServerStream, Status, StreamHandler, UnaryHandler,
    };
    pub use ares_middleware::plugins::{
        AccessLog, Backoff, CircuitBreaker, Metrics, RateLimit, Recovery, Retry, Tracer,
    };
    pub use ares_middleware::{HttpLink, Plugin, StreamLink, UnaryLink};
    pub use ares_server::{HttpServer, RpcServer, Server, ServerError, ServerState};
    pub use http::{Method, StatusCode};

    pub use crate::discovery::{Discovery, MemoryDiscovery, NoopDiscovery};
    pub use crate::signal::Policy;
    pub use crate::worker::{CronWorker, Flow, Singleton, Worker};
    pub use crate::{App, AppError, Exit, ShutdownHandle};
}
