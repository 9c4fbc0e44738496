//! Per-request context types.
//!
//! A [`RequestContext`] (HTTP) or [`RpcContext`] (RPC) is created by the
//! server for every request and owned by the task serving it. Links read it
//! and may enrich it before passing it inward.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use ares_router::Params;
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header used to propagate request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log lines for concurrent requests
/// sortable by arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parses a request ID propagated by a caller.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-request context for HTTP dispatch.
///
/// # Example
///
/// ```
/// use ares_core::RequestContext;
/// use http::Method;
///
/// let ctx = RequestContext::new(Method::GET, "/v1/user/42");
/// assert_eq!(ctx.path(), "/v1/user/42");
/// assert!(ctx.pattern().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    method: Method,
    path: String,
    pattern: Option<String>,
    params: Params,
    remote_addr: Option<SocketAddr>,
    started_at: Instant,
}

impl RequestContext {
    /// Creates a context for a request with a fresh request ID.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            method,
            path: path.into(),
            pattern: None,
            params: Params::new(),
            remote_addr: None,
            started_at: Instant::now(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns a new context with the given request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Returns the request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the route pattern that matched, if routing succeeded.
    #[must_use]
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// Returns a new context with the matched route attached.
    #[must_use]
    pub fn with_route(mut self, pattern: impl Into<String>, params: Params) -> Self {
        self.pattern = Some(pattern.into());
        self.params = params;
        self
    }

    /// Returns the extracted path parameters.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Returns a path parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Returns the peer address.
    #[must_use]
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns a new context with the peer address set.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Per-call context for RPC dispatch.
#[derive(Debug, Clone)]
pub struct RpcContext {
    request_id: RequestId,
    service: String,
    method: String,
    metadata: HeaderMap,
    remote_addr: Option<SocketAddr>,
    started_at: Instant,
}

impl RpcContext {
    /// Creates a context for a call to `service`/`method`.
    #[must_use]
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            service: service.into(),
            method: method.into(),
            metadata: HeaderMap::new(),
            remote_addr: None,
            started_at: Instant::now(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns a new context with the given request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Returns the fully qualified service name, e.g. `greeter.Greeter`.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the method name, e.g. `SayHello`.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the request path form, `/{service}/{method}`.
    #[must_use]
    pub fn full_method(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }

    /// Returns the call metadata (request headers).
    #[must_use]
    pub const fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    /// Returns mutable call metadata, used by client links to inject headers.
    pub fn metadata_mut(&mut self) -> &mut HeaderMap {
        &mut self.metadata
    }

    /// Returns a new context with the given metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns the peer address.
    #[must_use]
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns a new context with the peer address set.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Returns the elapsed time since the call started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_new_generates_unique_ids() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2, "Each RequestId should be unique");
    }

    #[test]
    fn test_request_id_parse() {
        let id = RequestId::new();
        assert_eq!(RequestId::parse(&id.to_string()), Some(id));
        assert_eq!(RequestId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_request_context_route() {
        let mut params = Params::new();
        params.push("id", "42");
        let ctx = RequestContext::new(Method::GET, "/v1/user/42").with_route("/v1/user/:id", params);

        assert_eq!(ctx.pattern(), Some("/v1/user/:id"));
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.method(), Method::GET);
    }

    #[test]
    fn test_rpc_context_full_method() {
        let mut ctx = RpcContext::new("greeter.Greeter", "SayHello");
        assert_eq!(ctx.full_method(), "/greeter.Greeter/SayHello");

        ctx.metadata_mut()
            .insert("x-tenant", http::HeaderValue::from_static("acme"));
        assert_eq!(ctx.metadata().get("x-tenant").unwrap(), "acme");
    }

    #[test]
    fn test_elapsed_advances() {
        let ctx = RpcContext::new("s", "m");
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.elapsed() >= Duration::from_millis(5));
    }
}
