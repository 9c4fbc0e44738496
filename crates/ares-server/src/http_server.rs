//! HTTP/1.1 server.
//!
//! Routes are registered against an [`ares_router::Router`] with their links
//! composed at registration time: server-wide links added with
//! [`HttpServer::use_link`] so far, then group links, then route links. Once
//! [`Server::serve`] runs the route table is frozen and further
//! registrations fail with [`ServerError::RoutesLocked`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ares_core::{http_handler, response};
//! use ares_server::{HttpServer, Server};
//! use http::StatusCode;
//!
//! # async fn run() -> Result<(), ares_server::ServerError> {
//! let server = Arc::new(HttpServer::builder().name("api").addr("127.0.0.1:8080").build());
//! server.get(
//!     "/users/:id",
//!     http_handler(|ctx, _req| async move {
//!         Ok(response::text(StatusCode::OK, ctx.param("id").unwrap_or_default().to_string()))
//!     }),
//! )?;
//! server.serve().await
//! # }
//! ```

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use ares_core::{
    http_handler, response, AresError, BoxFuture, HttpHandler, RequestContext, RequestId, Response,
    REQUEST_ID_HEADER,
};
use ares_middleware::{chain, HttpLink, Plugin};
use ares_router::{Route, Router};
use bytes::Bytes;
use http::{HeaderValue, Method};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::error::{ServerError, ServerResult};
use crate::server::{drive, Lifecycle, Server};
use crate::state::ServerState;

/// Renders a handler failure into a response.
pub type ErrorHandler = Arc<dyn Fn(&AresError, RequestId) -> Response + Send + Sync>;

type Hook = Box<dyn FnOnce(&HttpServer) + Send>;

struct Registry {
    router: Router<HttpHandler>,
    links: Vec<HttpLink>,
    hooks: Vec<Hook>,
}

struct Dispatch {
    router: Arc<Router<HttpHandler>>,
    not_found: HttpHandler,
    method_not_allowed: HttpHandler,
    error_handler: ErrorHandler,
}

/// An HTTP/1.1 server.
pub struct HttpServer {
    lifecycle: Lifecycle,
    aliases: Vec<String>,
    not_found: HttpHandler,
    error_handler: ErrorHandler,
    registry: Mutex<Option<Registry>>,
    dispatch: OnceLock<Arc<Dispatch>>,
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("name", &self.lifecycle.name())
            .field("addr", &self.lifecycle.addr())
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

impl HttpServer {
    /// Creates a server with default handlers.
    #[must_use]
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self::builder().name(name).addr(addr).build()
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder() -> HttpServerBuilder {
        HttpServerBuilder::default()
    }

    /// Returns the alias names of this server.
    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Returns the bound address once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr()
    }

    /// Subscribes to state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ServerState> {
        self.lifecycle.subscribe()
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.lifecycle.tracker().active()
    }

    fn with_registry<T>(&self, f: impl FnOnce(&mut Registry) -> ServerResult<T>) -> ServerResult<T> {
        let mut guard = self.registry.lock();
        let registry = guard
            .as_mut()
            .ok_or_else(|| ServerError::RoutesLocked(self.lifecycle.name().to_string()))?;
        f(registry)
    }

    /// Registers `handler` for `method` on `pattern`, wrapped by the
    /// server-wide links registered so far and then by `links`.
    pub fn route(
        &self,
        method: Method,
        pattern: &str,
        handler: HttpHandler,
        links: &[HttpLink],
    ) -> ServerResult<()> {
        self.with_registry(|registry| {
            let mut all = registry.links.clone();
            all.extend_from_slice(links);
            registry.router.insert(method, pattern, chain(handler, &all))?;
            Ok(())
        })
    }

    /// Registers a `GET` route.
    pub fn get(&self, pattern: &str, handler: HttpHandler) -> ServerResult<()> {
        self.route(Method::GET, pattern, handler, &[])
    }

    /// Registers a `POST` route.
    pub fn post(&self, pattern: &str, handler: HttpHandler) -> ServerResult<()> {
        self.route(Method::POST, pattern, handler, &[])
    }

    /// Registers a `PUT` route.
    pub fn put(&self, pattern: &str, handler: HttpHandler) -> ServerResult<()> {
        self.route(Method::PUT, pattern, handler, &[])
    }

    /// Registers a `DELETE` route.
    pub fn delete(&self, pattern: &str, handler: HttpHandler) -> ServerResult<()> {
        self.route(Method::DELETE, pattern, handler, &[])
    }

    /// Registers a `PATCH` route.
    pub fn patch(&self, pattern: &str, handler: HttpHandler) -> ServerResult<()> {
        self.route(Method::PATCH, pattern, handler, &[])
    }

    /// Registers a `HEAD` route.
    pub fn head(&self, pattern: &str, handler: HttpHandler) -> ServerResult<()> {
        self.route(Method::HEAD, pattern, handler, &[])
    }

    /// Registers an `OPTIONS` route.
    pub fn options(&self, pattern: &str, handler: HttpHandler) -> ServerResult<()> {
        self.route(Method::OPTIONS, pattern, handler, &[])
    }

    /// Starts a route group under `prefix` whose routes are also wrapped by
    /// `links`.
    pub fn group(&self, prefix: &str, links: Vec<HttpLink>) -> RouteGroup<'_> {
        RouteGroup {
            server: self,
            prefix: prefix.to_string(),
            links,
        }
    }

    /// Adds a server-wide link for routes registered after this call.
    pub fn use_link(&self, link: HttpLink) -> ServerResult<()> {
        self.with_registry(|registry| {
            registry.links.push(link);
            Ok(())
        })
    }

    /// Adds the HTTP link of `plugin` as a server-wide link.
    pub fn use_plugin(&self, plugin: &dyn Plugin) -> ServerResult<()> {
        tracing::debug!(server = %self.lifecycle.name(), plugin = plugin.name(), "plugin installed");
        self.use_link(plugin.http_link())
    }

    /// Runs `hook` right before the server starts accepting connections.
    /// Hooks may still register routes.
    pub fn hook_before_serve(&self, hook: impl FnOnce(&HttpServer) + Send + 'static) -> ServerResult<()> {
        self.with_registry(|registry| {
            registry.hooks.push(Box::new(hook));
            Ok(())
        })
    }

    /// Returns every registered route.
    #[must_use]
    pub fn routes(&self) -> Vec<Route> {
        if let Some(dispatch) = self.dispatch.get() {
            return dispatch.router.routes().to_vec();
        }
        self.registry
            .lock()
            .as_ref()
            .map(|registry| registry.router.routes().to_vec())
            .unwrap_or_default()
    }

    fn freeze(&self) -> ServerResult<Arc<Dispatch>> {
        let hooks = self.with_registry(|registry| Ok(std::mem::take(&mut registry.hooks)))?;
        for hook in hooks {
            hook(self);
        }

        let registry = self
            .registry
            .lock()
            .take()
            .ok_or_else(|| ServerError::RoutesLocked(self.lifecycle.name().to_string()))?;

        let router = Arc::new(registry.router);
        let method_not_allowed = {
            let router = Arc::clone(&router);
            http_handler(move |ctx, req| {
                let allowed = router
                    .allowed_methods(ctx.path())
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                async move { Err(AresError::method_not_allowed(req.method().as_str(), allowed)) }
            })
        };

        // Unmatched requests still pass through every server-wide link
        let dispatch = Arc::new(Dispatch {
            router,
            not_found: chain(Arc::clone(&self.not_found), &registry.links),
            method_not_allowed: chain(method_not_allowed, &registry.links),
            error_handler: Arc::clone(&self.error_handler),
        });
        let _ = self.dispatch.set(Arc::clone(&dispatch));
        Ok(dispatch)
    }

    fn dump_routes(&self, dispatch: &Dispatch) {
        for route in dispatch.router.routes() {
            tracing::info!(
                server = %self.lifecycle.name(),
                method = %route.method,
                pattern = %route.pattern,
                "route"
            );
        }
    }
}

impl Server for HttpServer {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn scheme(&self) -> &'static str {
        "http"
    }

    fn addr(&self) -> String {
        self.lifecycle.addr()
    }

    fn state(&self) -> ServerState {
        self.lifecycle.state()
    }

    fn serve(self: Arc<Self>) -> BoxFuture<'static, ServerResult<()>> {
        Box::pin(async move {
            self.lifecycle.begin()?;
            let dispatch = match self.freeze() {
                Ok(dispatch) => dispatch,
                Err(err) => {
                    self.lifecycle.fail();
                    return Err(err);
                }
            };
            let listener = match self.lifecycle.bind().await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!(server = %self.lifecycle.name(), error = %err, "bind failed");
                    self.lifecycle.fail();
                    return Err(err);
                }
            };
            self.dump_routes(&dispatch);

            self.lifecycle
                .run(listener, move |conn, closing| {
                    let dispatch = Arc::clone(&dispatch);
                    async move {
                        let remote = conn.remote_addr();
                        let handle = conn.handle();
                        let service = service_fn(move |req: hyper::Request<Incoming>| {
                            let dispatch = Arc::clone(&dispatch);
                            async move { Ok::<_, Infallible>(dispatch.handle(req, remote).await) }
                        });
                        let conn = http1::Builder::new().serve_connection(TokioIo::new(conn), service);
                        drive(conn, |conn| conn.graceful_shutdown(), closing, handle).await;
                    }
                })
                .await;
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.lifecycle.stop() })
    }

    fn graceful_stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.lifecycle.graceful_stop())
    }
}

impl Dispatch {
    async fn handle(&self, req: hyper::Request<Incoming>, remote: SocketAddr) -> hyper::Response<Full<Bytes>> {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(RequestId::parse)
            .unwrap_or_default();

        let (parts, body) = req.into_parts();
        let mut ctx = RequestContext::new(parts.method.clone(), parts.uri.path())
            .with_request_id(request_id)
            .with_remote_addr(remote);

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                let err = AresError::validation(format!("failed to read request body: {err}"));
                return self.finish(Err(err), request_id);
            }
        };
        let request = http::Request::from_parts(parts, body);

        let handler = match self.router.find(request.method(), ctx.path()) {
            Some(found) => {
                let handler = Arc::clone(found.handler);
                ctx = ctx.with_route(found.pattern, found.params);
                handler
            }
            None if self.router.allowed_methods(ctx.path()).is_empty() => Arc::clone(&self.not_found),
            None => Arc::clone(&self.method_not_allowed),
        };

        let result = handler(ctx, request).await;
        self.finish(result, request_id)
    }

    fn finish(&self, result: Result<Response, AresError>, request_id: RequestId) -> hyper::Response<Full<Bytes>> {
        let mut resp = match result {
            Ok(resp) => resp,
            Err(err) => {
                if err.status_code().is_server_error() {
                    tracing::error!(%request_id, error = %err, "request failed");
                }
                (self.error_handler)(&err, request_id)
            }
        };
        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            resp.headers_mut().entry(REQUEST_ID_HEADER).or_insert(value);
        }
        resp.map(Full::new)
    }
}

/// A set of routes sharing a path prefix and links.
pub struct RouteGroup<'a> {
    server: &'a HttpServer,
    prefix: String,
    links: Vec<HttpLink>,
}

impl RouteGroup<'_> {
    /// Registers a route under the group prefix.
    pub fn route(
        &self,
        method: Method,
        pattern: &str,
        handler: HttpHandler,
        links: &[HttpLink],
    ) -> ServerResult<()> {
        let mut all = self.links.clone();
        all.extend_from_slice(links);
        self.server
            .route(method, &format!("{}{}", self.prefix, pattern), handler, &all)
    }

    /// Registers a `GET` route under the group prefix.
    pub fn get(&self, pattern: &str, handler: HttpHandler) -> ServerResult<()> {
        self.route(Method::GET, pattern, handler, &[])
    }

    /// Registers a `POST` route under the group prefix.
    pub fn post(&self, pattern: &str, handler: HttpHandler) -> ServerResult<()> {
        self.route(Method::POST, pattern, handler, &[])
    }

    /// Registers a `PUT` route under the group prefix.
    pub fn put(&self, pattern: &str, handler: HttpHandler) -> ServerResult<()> {
        self.route(Method::PUT, pattern, handler, &[])
    }

    /// Registers a `DELETE` route under the group prefix.
    pub fn delete(&self, pattern: &str, handler: HttpHandler) -> ServerResult<()> {
        self.route(Method::DELETE, pattern, handler, &[])
    }

    /// Starts a nested group.
    pub fn group(&self, prefix: &str, links: Vec<HttpLink>) -> RouteGroup<'_> {
        let mut all = self.links.clone();
        all.extend(links);
        RouteGroup {
            server: self.server,
            prefix: format!("{}{}", self.prefix, prefix),
            links: all,
        }
    }
}

/// Builder for [`HttpServer`].
pub struct HttpServerBuilder {
    name: String,
    addr: String,
    aliases: Vec<String>,
    listener: Option<TcpListener>,
    drain_timeout: Option<Duration>,
    not_found: Option<HttpHandler>,
    error_handler: Option<ErrorHandler>,
}

impl Default for HttpServerBuilder {
    fn default() -> Self {
        Self {
            name: "http".to_string(),
            addr: "127.0.0.1:8080".to_string(),
            aliases: Vec::new(),
            listener: None,
            drain_timeout: None,
            not_found: None,
            error_handler: None,
        }
    }
}

impl HttpServerBuilder {
    /// Sets the server name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the listen address.
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Adds an alias name.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Serves on an already bound listener instead of binding `addr`.
    pub fn listener(mut self, listener: TcpListener) -> Self {
        if let Ok(addr) = listener.local_addr() {
            self.addr = addr.to_string();
        }
        self.listener = Some(listener);
        self
    }

    /// Bounds the graceful drain; unbounded by default.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    /// Replaces the handler for unmatched paths.
    pub fn not_found(mut self, handler: HttpHandler) -> Self {
        self.not_found = Some(handler);
        self
    }

    /// Replaces the renderer for handler failures.
    pub fn error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Builds the server.
    pub fn build(self) -> HttpServer {
        let not_found = self.not_found.unwrap_or_else(|| {
            http_handler(|ctx, _req| async move {
                Err(AresError::not_found(format!("no route for {}", ctx.path())))
            })
        });
        let error_handler = self.error_handler.unwrap_or_else(|| {
            let render: ErrorHandler = Arc::new(|err: &AresError, request_id: RequestId| {
                response::error(err, Some(request_id.to_string().as_str()))
            });
            render
        });

        HttpServer {
            lifecycle: Lifecycle::new(self.name, self.addr, self.listener, self.drain_timeout),
            aliases: self.aliases,
            not_found,
            error_handler,
            registry: Mutex::new(Some(Registry {
                router: Router::new(),
                links: Vec::new(),
                hooks: Vec::new(),
            })),
            dispatch: OnceLock::new(),
        }
    }
}
