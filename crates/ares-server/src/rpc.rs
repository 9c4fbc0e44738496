//! gRPC server over HTTP/2.
//!
//! Services are registered explicitly as a table of
//! `service → method → handler`, where each handler is either unary or
//! streaming. Server-wide links are composed around every handler of the
//! matching shape when serving starts.
//!
//! Requests are routed on the `/{service}/{method}` path. Messages use the
//! standard length-prefixed framing (see [`crate::codec`]) and the outcome is
//! reported in `grpc-status` / `grpc-message` trailers. A `grpc-timeout`
//! header bounds the call and expires as `DeadlineExceeded`.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use ares_core::{
    BoxFuture, Code, RequestId, RpcContext, ServerStream, Status, StreamHandler, StreamPeer,
    UnaryHandler, REQUEST_ID_HEADER,
};
use ares_middleware::{chain, Plugin, StreamLink, UnaryLink};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, Incoming};
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::codec::{encode, encode_message, parse_timeout, Decoder};
use crate::error::{ServerError, ServerResult};
use crate::server::{drive, Lifecycle, Server};
use crate::state::ServerState;

const GRPC_CONTENT_TYPE: &str = "application/grpc";
const STREAM_BUFFER: usize = 32;

/// A registered RPC method.
#[derive(Clone)]
pub enum MethodHandler {
    /// One request message, one response message.
    Unary(UnaryHandler),
    /// Messages flow in both directions until the handler returns.
    Streaming(StreamHandler),
}

impl fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(_) => f.write_str("Unary"),
            Self::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

type ServiceTable = BTreeMap<String, BTreeMap<String, MethodHandler>>;

struct Registry {
    services: ServiceTable,
    unary_links: Vec<UnaryLink>,
    stream_links: Vec<StreamLink>,
}

struct Dispatch {
    services: ServiceTable,
    max_message_size: usize,
}

/// A gRPC server.
pub struct RpcServer {
    lifecycle: Lifecycle,
    max_message_size: usize,
    registry: Mutex<Option<Registry>>,
    dispatch: OnceLock<Arc<Dispatch>>,
}

impl fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("name", &self.lifecycle.name())
            .field("addr", &self.lifecycle.addr())
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

impl RpcServer {
    /// Creates a server with default limits.
    #[must_use]
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self::builder().name(name).addr(addr).build()
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder() -> RpcServerBuilder {
        RpcServerBuilder::default()
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

    fn with_registry<T>(&self, f: impl FnOnce(&mut Registry) -> ServerResult<T>) -> ServerResult<T> {
        let mut guard = self.registry.lock();
        let registry = guard
            .as_mut()
            .ok_or_else(|| ServerError::RoutesLocked(self.lifecycle.name().to_string()))?;
        f(registry)
    }

    /// Registers a method handler.
    pub fn register(&self, service: &str, method: &str, handler: MethodHandler) -> ServerResult<()> {
        self.with_registry(|registry| {
            let methods = registry.services.entry(service.to_string()).or_default();
            if methods.contains_key(method) {
                return Err(ServerError::DuplicateMethod(format!("/{service}/{method}")));
            }
            methods.insert(method.to_string(), handler);
            Ok(())
        })
    }

    /// Registers a unary method.
    pub fn register_unary(&self, service: &str, method: &str, handler: UnaryHandler) -> ServerResult<()> {
        self.register(service, method, MethodHandler::Unary(handler))
    }

    /// Registers a streaming method.
    pub fn register_stream(&self, service: &str, method: &str, handler: StreamHandler) -> ServerResult<()> {
        self.register(service, method, MethodHandler::Streaming(handler))
    }

    /// Adds a link around every unary handler.
    pub fn use_unary_link(&self, link: UnaryLink) -> ServerResult<()> {
        self.with_registry(|registry| {
            registry.unary_links.push(link);
            Ok(())
        })
    }

    /// Adds a link around every streaming handler.
    pub fn use_stream_link(&self, link: StreamLink) -> ServerResult<()> {
        self.with_registry(|registry| {
            registry.stream_links.push(link);
            Ok(())
        })
    }

    /// Adds the unary and stream links of `plugin`.
    pub fn use_plugin(&self, plugin: &dyn Plugin) -> ServerResult<()> {
        tracing::debug!(server = %self.lifecycle.name(), plugin = plugin.name(), "plugin installed");
        self.use_unary_link(plugin.unary_link())?;
        self.use_stream_link(plugin.stream_link())
    }

    /// Returns every registered method as `/{service}/{method}`.
    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        let list = |services: &ServiceTable| -> Vec<String> {
            services
                .iter()
                .flat_map(|(service, methods)| methods.keys().map(move |method| format!("/{service}/{method}")))
                .collect()
        };
        if let Some(dispatch) = self.dispatch.get() {
            return list(&dispatch.services);
        }
        self.registry
            .lock()
            .as_ref()
            .map(|registry| list(&registry.services))
            .unwrap_or_default()
    }

    fn freeze(&self) -> ServerResult<Arc<Dispatch>> {
        let registry = self
            .registry
            .lock()
            .take()
            .ok_or_else(|| ServerError::RoutesLocked(self.lifecycle.name().to_string()))?;

        let services = registry
            .services
            .into_iter()
            .map(|(service, methods)| {
                let methods = methods
                    .into_iter()
                    .map(|(name, handler)| {
                        let handler = match handler {
                            MethodHandler::Unary(h) => MethodHandler::Unary(chain(h, &registry.unary_links)),
                            MethodHandler::Streaming(h) => {
                                MethodHandler::Streaming(chain(h, &registry.stream_links))
                            }
                        };
                        (name, handler)
                    })
                    .collect();
                (service, methods)
            })
            .collect();

        let dispatch = Arc::new(Dispatch {
            services,
            max_message_size: self.max_message_size,
        });
        let _ = self.dispatch.set(Arc::clone(&dispatch));
        Ok(dispatch)
    }
}

impl Server for RpcServer {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn scheme(&self) -> &'static str {
        "grpc"
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
            for method in self.methods() {
                tracing::info!(server = %self.lifecycle.name(), %method, "rpc method");
            }

            self.lifecycle
                .run(listener, move |conn, closing| {
                    let dispatch = Arc::clone(&dispatch);
                    async move {
                        let remote = conn.remote_addr();
                        let handle = conn.handle();
                        let service = service_fn(move |req: hyper::Request<Incoming>| {
                            let dispatch = Arc::clone(&dispatch);
                            async move { Ok::<_, Infallible>(dispatch.handle(req, remote)) }
                        });
                        let conn = http2::Builder::new(TokioExecutor::new())
                            .serve_connection(TokioIo::new(conn), service);
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

/// Response body fed from a channel of frames, so trailers can follow the
/// data once the handler completes.
#[derive(Debug)]
pub struct GrpcBody {
    rx: mpsc::Receiver<Frame<Bytes>>,
}

impl Body for GrpcBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

fn trailers(result: &Result<(), Status>) -> HeaderMap {
    let (code, message) = match result {
        Ok(()) => (Code::Ok, ""),
        Err(status) => (status.code(), status.message()),
    };
    let mut map = HeaderMap::new();
    map.insert("grpc-status", HeaderValue::from(code.as_i32()));
    if !message.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&encode_message(message)) {
            map.insert("grpc-message", value);
        }
    }
    map
}

fn reply(status: StatusCode, rx: mpsc::Receiver<Frame<Bytes>>) -> hyper::Response<GrpcBody> {
    let mut resp = hyper::Response::new(GrpcBody { rx });
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    resp
}

impl Dispatch {
    fn handle(&self, req: hyper::Request<Incoming>, remote: SocketAddr) -> hyper::Response<GrpcBody> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (parts, body) = req.into_parts();

        if parts.method != Method::POST {
            return reply(StatusCode::METHOD_NOT_ALLOWED, rx);
        }
        let is_grpc = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with(GRPC_CONTENT_TYPE));
        if !is_grpc {
            return reply(StatusCode::UNSUPPORTED_MEDIA_TYPE, rx);
        }

        let path = parts.uri.path();
        let target = path
            .strip_prefix('/')
            .and_then(|rest| rest.split_once('/'))
            .and_then(|(service, method)| {
                let handler = self.services.get(service)?.get(method)?.clone();
                Some((service, method, handler))
            });
        let Some((service, method, handler)) = target else {
            let status = Status::unimplemented(format!("unknown method {path}"));
            tokio::spawn(async move {
                let _ = tx.send(Frame::trailers(trailers(&Err(status)))).await;
            });
            return reply(StatusCode::OK, rx);
        };

        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(RequestId::parse)
            .unwrap_or_default();
        let deadline = parts
            .headers
            .get("grpc-timeout")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_timeout);
        let ctx = RpcContext::new(service, method)
            .with_request_id(request_id)
            .with_remote_addr(remote)
            .with_metadata(parts.headers.clone());
        let max_message_size = self.max_message_size;

        tokio::spawn(async move {
            let full_method = ctx.full_method();
            let call = async {
                match handler {
                    MethodHandler::Unary(h) => call_unary(h, ctx, body, max_message_size, &tx).await,
                    MethodHandler::Streaming(h) => call_stream(h, ctx, body, max_message_size, &tx).await,
                }
            };
            let result = match deadline {
                Some(deadline) => tokio::time::timeout(deadline, call)
                    .await
                    .unwrap_or_else(|_| Err(Status::deadline_exceeded("deadline exceeded"))),
                None => call.await,
            };
            if let Err(status) = &result {
                if matches!(status.code(), Code::Internal | Code::Unknown | Code::DataLoss) {
                    tracing::warn!(method = %full_method, code = %status.code(), error = %status.message(), "rpc failed");
                }
            }
            let _ = tx.send(Frame::trailers(trailers(&result))).await;
        });

        reply(StatusCode::OK, rx)
    }
}

async fn call_unary(
    handler: UnaryHandler,
    ctx: RpcContext,
    body: Incoming,
    max_message_size: usize,
    tx: &mpsc::Sender<Frame<Bytes>>,
) -> Result<(), Status> {
    let bytes = body
        .collect()
        .await
        .map_err(|err| Status::cancelled(format!("failed to read request: {err}")))?
        .to_bytes();

    let mut decoder = Decoder::new(max_message_size);
    decoder.push(&bytes);
    let request = decoder
        .next_message()?
        .ok_or_else(|| Status::internal("missing request message"))?;
    if !decoder.is_empty() {
        return Err(Status::internal("unary call carried more than one request message"));
    }

    let response = handler(ctx, request).await?;
    let _ = tx.send(Frame::data(encode(&response)?)).await;
    Ok(())
}

async fn call_stream(
    handler: StreamHandler,
    ctx: RpcContext,
    body: Incoming,
    max_message_size: usize,
    tx: &mpsc::Sender<Frame<Bytes>>,
) -> Result<(), Status> {
    let (stream, peer) = ServerStream::pair(STREAM_BUFFER);
    let StreamPeer { inbound, mut outbound } = peer;

    let reader = tokio::spawn(read_messages(body, inbound, max_message_size));
    let frames = tx.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if frames.send(Frame::data(encode(&message)?)).await.is_err() {
                break;
            }
        }
        Ok::<_, Status>(())
    });

    let result = handler(ctx, stream).await;
    reader.abort();
    let written = writer
        .await
        .unwrap_or_else(|err| Err(Status::internal(format!("response writer failed: {err}"))));
    result.and(written)
}

async fn read_messages(
    mut body: Incoming,
    inbound: mpsc::Sender<Result<Bytes, Status>>,
    max_message_size: usize,
) {
    let mut decoder = Decoder::new(max_message_size);
    while let Some(frame) = body.frame().await {
        let data = match frame {
            Ok(frame) => match frame.into_data() {
                Ok(data) => data,
                Err(_) => continue,
            },
            Err(err) => {
                let _ = inbound
                    .send(Err(Status::cancelled(format!("request stream failed: {err}"))))
                    .await;
                return;
            }
        };

        decoder.push(&data);
        loop {
            match decoder.next_message() {
                Ok(Some(message)) => {
                    if inbound.send(Ok(message)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(status) => {
                    let _ = inbound.send(Err(status)).await;
                    return;
                }
            }
        }
    }
    if !decoder.is_empty() {
        let _ = inbound
            .send(Err(Status::internal("request stream ended inside a message")))
            .await;
    }
}

/// Builder for [`RpcServer`].
#[derive(Debug)]
pub struct RpcServerBuilder {
    name: String,
    addr: String,
    listener: Option<TcpListener>,
    drain_timeout: Option<Duration>,
    max_message_size: usize,
}

impl Default for RpcServerBuilder {
    fn default() -> Self {
        Self {
            name: "grpc".to_string(),
            addr: "127.0.0.1:9090".to_string(),
            listener: None,
            drain_timeout: None,
            max_message_size: crate::codec::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl RpcServerBuilder {
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

    /// Sets the largest accepted request message.
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Builds the server.
    pub fn build(self) -> RpcServer {
        RpcServer {
            lifecycle: Lifecycle::new(self.name, self.addr, self.listener, self.drain_timeout),
            max_message_size: self.max_message_size,
            registry: Mutex::new(Some(Registry {
                services: BTreeMap::new(),
                unary_links: Vec::new(),
                stream_links: Vec::new(),
            })),
            dispatch: OnceLock::new(),
        }
    }
}
