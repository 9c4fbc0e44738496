//! The server contract and the serving loop shared by every transport.
//!
//! A concrete server owns a [`Lifecycle`] and only supplies the per
//! connection protocol driver; binding, the accept loop, state transitions,
//! graceful drain and hard stop all live here.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use ares_core::BoxFuture;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::error::{ServerError, ServerResult};
use crate::state::{ServerState, StateCell};
use crate::tracker::{CloseHandle, ConnectionTracker, TrackedConnection, TrackedListener};

/// A network server managed by the process lifecycle.
///
/// The trait is object safe; the lifecycle manager holds servers as
/// `Arc<dyn Server>`.
pub trait Server: Send + Sync {
    /// Returns the server name.
    fn name(&self) -> &str;

    /// Returns the URL scheme served (`http`, `grpc`).
    fn scheme(&self) -> &'static str;

    /// Returns the bound address once listening, the configured one before.
    fn addr(&self) -> String;

    /// Returns the current lifecycle state.
    fn state(&self) -> ServerState;

    /// Returns true while accepting connections.
    fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Binds and serves until stopped.
    ///
    /// Resolves once the server reaches [`ServerState::Stopped`].
    fn serve(self: Arc<Self>) -> BoxFuture<'static, ServerResult<()>>;

    /// Closes the listener and every open connection without waiting.
    fn stop(&self) -> BoxFuture<'_, ()>;

    /// Closes the listener and waits for open connections to finish their
    /// in-flight requests.
    fn graceful_stop(&self) -> BoxFuture<'_, ()>;
}

/// Listener, state and connection bookkeeping for one server.
pub(crate) struct Lifecycle {
    name: Arc<str>,
    addr: String,
    state: StateCell,
    tracker: ConnectionTracker,
    closing: watch::Sender<bool>,
    // True whenever no accept loop holds the listener
    released: watch::Sender<bool>,
    adopted: Mutex<Option<TcpListener>>,
    local_addr: OnceLock<SocketAddr>,
    drain_timeout: Option<Duration>,
}

impl Lifecycle {
    pub(crate) fn new(
        name: String,
        addr: String,
        listener: Option<TcpListener>,
        drain_timeout: Option<Duration>,
    ) -> Self {
        let (closing, _) = watch::channel(false);
        let (released, _) = watch::channel(true);
        Self {
            name: name.into(),
            addr,
            state: StateCell::new(),
            tracker: ConnectionTracker::new(),
            closing,
            released,
            adopted: Mutex::new(listener),
            local_addr: OnceLock::new(),
            drain_timeout,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn addr(&self) -> String {
        self.local_addr
            .get()
            .map_or_else(|| self.addr.clone(), ToString::to_string)
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub(crate) fn state(&self) -> ServerState {
        self.state.get()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub(crate) fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Idle → Starting.
    pub(crate) fn begin(&self) -> ServerResult<()> {
        self.state
            .transition(&[ServerState::Idle], ServerState::Starting)
            .map(|_| ())
            .map_err(|_| ServerError::AlreadyStarted(self.name.to_string()))
    }

    /// Marks a failed start.
    pub(crate) fn fail(&self) {
        self.state.set(ServerState::Stopped);
    }

    /// Adopts the provided listener or binds the configured address.
    pub(crate) async fn bind(&self) -> ServerResult<TrackedListener> {
        let adopted = self.adopted.lock().take();
        let listener = match adopted {
            Some(listener) => listener,
            None => TcpListener::bind(self.addr.as_str()).await.map_err(|source| {
                if source.kind() == io::ErrorKind::InvalidInput {
                    ServerError::InvalidAddress {
                        addr: self.addr.clone(),
                        reason: source.to_string(),
                    }
                } else {
                    ServerError::Bind {
                        addr: self.addr.clone(),
                        source,
                    }
                }
            })?,
        };
        if let Ok(local) = listener.local_addr() {
            let _ = self.local_addr.set(local);
        }
        self.released.send_replace(false);
        Ok(TrackedListener::new(listener, self.tracker.clone()))
    }

    /// Starting → Running, then accepts until a stop is requested and waits
    /// for [`ServerState::Stopped`].
    pub(crate) async fn run<F, Fut>(&self, listener: TrackedListener, serve_conn: F)
    where
        F: Fn(TrackedConnection, watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut closing = self.closing.subscribe();
        if self
            .state
            .transition(&[ServerState::Starting], ServerState::Running)
            .is_ok()
            && !*closing.borrow_and_update()
        {
            tracing::info!(server = %self.name, addr = %self.addr(), "listening");
            loop {
                tokio::select! {
                    biased;
                    _ = closing.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(conn) => {
                            let name = Arc::clone(&self.name);
                            let task = serve_conn(conn, self.closing.subscribe());
                            ares_telemetry::metrics::connection_opened(&name);
                            tokio::spawn(async move {
                                task.await;
                                ares_telemetry::metrics::connection_closed(&name);
                            });
                        }
                        Err(err) => {
                            tracing::warn!(server = %self.name, error = %err, "accept failed");
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    },
                }
            }
        }
        drop(listener);
        self.released.send_replace(true);
        self.state.wait_for(ServerState::Stopped).await;
    }

    pub(crate) fn stop(&self) {
        let previous = self.state.get();
        self.state.set(ServerState::Stopped);
        self.closing.send_replace(true);
        let closed = self.tracker.close_all();
        if previous != ServerState::Stopped {
            tracing::info!(server = %self.name, closed, "server stopped");
        }
    }

    pub(crate) async fn graceful_stop(&self) {
        match self.state.transition(
            &[ServerState::Starting, ServerState::Running],
            ServerState::Draining,
        ) {
            Ok(_) => {}
            Err(ServerState::Idle) => {
                self.closing.send_replace(true);
                self.state.set(ServerState::Stopped);
                return;
            }
            Err(ServerState::Draining) => {
                self.state.wait_for(ServerState::Stopped).await;
                return;
            }
            Err(_) => return,
        }

        tracing::info!(server = %self.name, active = self.tracker.active(), "draining");
        self.closing.send_replace(true);

        // Nothing accepted after this point can join the tracker
        let _ = self.released.subscribe().wait_for(|released| *released).await;

        let drained = match self.drain_timeout {
            Some(timeout) => self.tracker.wait_timeout(timeout).await,
            None => {
                self.tracker.wait().await;
                true
            }
        };
        if !drained {
            let closed = self.tracker.close_all();
            tracing::warn!(server = %self.name, closed, "drain timed out, closing remaining connections");
        }

        self.state.set(ServerState::Stopped);
        tracing::info!(server = %self.name, "server stopped");
    }
}

/// Drives one protocol connection until it finishes, is closed from
/// outside, or finishes its in-flight work after a drain was requested.
pub(crate) async fn drive<C, G>(
    conn: C,
    graceful: G,
    mut closing: watch::Receiver<bool>,
    handle: CloseHandle,
) where
    C: Future<Output = Result<(), hyper::Error>>,
    G: FnOnce(Pin<&mut C>),
{
    tokio::pin!(conn);
    let mut graceful = Some(graceful);

    if *closing.borrow_and_update() {
        if let Some(shutdown) = graceful.take() {
            shutdown(conn.as_mut());
        }
    }

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(err) = result {
                    tracing::debug!(peer = %handle.remote_addr(), error = %err, "connection error");
                }
                return;
            }
            () = handle.closed() => {
                tracing::debug!(peer = %handle.remote_addr(), "connection closed by server");
                return;
            }
            changed = closing.changed(), if graceful.is_some() => {
                if changed.is_err() || *closing.borrow() {
                    if let Some(shutdown) = graceful.take() {
                        shutdown(conn.as_mut());
                    }
                }
            }
        }
    }
}
