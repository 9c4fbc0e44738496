//! Connection tracking for graceful drain.
//!
//! Every connection accepted through a [`TrackedListener`] is counted by a
//! shared [`ConnectionTracker`] until it closes. Closing is idempotent: a
//! connection may be closed by its own task finishing, by being dropped, or
//! from outside through its [`CloseHandle`], and only the first of these
//! decrements the count.
//!
//! # Example
//!
//! ```rust,no_run
//! use ares_server::{ConnectionTracker, TrackedListener};
//!
//! # async fn run() -> std::io::Result<()> {
//! let tracker = ConnectionTracker::new();
//! let listener = TrackedListener::bind("127.0.0.1:0", tracker.clone()).await?;
//!
//! let conn = listener.accept().await?;
//! assert_eq!(tracker.active(), 1);
//! drop(conn);
//! tracker.wait().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Notify;

/// TCP keep-alive period applied to accepted connections.
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(20);

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicUsize,
    next_id: AtomicU64,
    idle: Notify,
    open: Mutex<HashMap<u64, CloseHandle>>,
}

/// Counts open connections and lets a supervisor wait for them to close.
///
/// Cloning is cheap; all clones share the same count.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    /// Creates a tracker with no connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    fn register(&self, remote_addr: SocketAddr) -> CloseHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = CloseHandle {
            state: Arc::new(ConnState {
                id,
                remote_addr,
                closed: Mutex::new(false),
                kill: Notify::new(),
                tracker: self.clone(),
            }),
        };
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        self.inner.open.lock().insert(id, handle.clone());
        handle
    }

    fn release(&self, id: u64) {
        self.inner.open.lock().remove(&id);
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }

    /// Closes every open connection, returning how many were closed.
    pub fn close_all(&self) -> usize {
        let handles: Vec<CloseHandle> = self.inner.open.lock().values().cloned().collect();
        handles.iter().filter(|handle| handle.close()).count()
    }

    /// Resolves once no connection is open.
    pub async fn wait(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.active() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `true` if every connection closed in time.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

struct ConnState {
    id: u64,
    remote_addr: SocketAddr,
    closed: Mutex<bool>,
    kill: Notify,
    tracker: ConnectionTracker,
}

impl std::fmt::Debug for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnState")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &*self.closed.lock())
            .finish_non_exhaustive()
    }
}

impl ConnState {
    fn close(&self) -> bool {
        let mut closed = self.closed.lock();
        if *closed {
            return false;
        }
        *closed = true;
        self.tracker.release(self.id);
        true
    }
}

/// Closes a tracked connection from outside its serving task.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    state: Arc<ConnState>,
}

impl CloseHandle {
    /// Marks the connection closed and tells its task to drop it.
    ///
    /// Returns `false` if the connection was already closed.
    pub fn close(&self) -> bool {
        let first = self.state.close();
        if first {
            self.state.kill.notify_one();
        }
        first
    }

    /// Returns true once the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.state.closed.lock()
    }

    /// Returns the peer address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.state.remote_addr
    }

    /// Resolves when [`close`](Self::close) is called on any clone.
    pub async fn closed(&self) {
        self.state.kill.notified().await;
    }
}

/// A TCP listener whose accepted connections are tracked.
#[derive(Debug)]
pub struct TrackedListener {
    listener: TcpListener,
    tracker: ConnectionTracker,
}

impl TrackedListener {
    /// Wraps an already bound listener.
    #[must_use]
    pub fn new(listener: TcpListener, tracker: ConnectionTracker) -> Self {
        Self { listener, tracker }
    }

    /// Binds `addr` and wraps the listener.
    pub async fn bind(addr: impl ToSocketAddrs, tracker: ConnectionTracker) -> io::Result<Self> {
        Ok(Self::new(TcpListener::bind(addr).await?, tracker))
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns the tracker counting this listener's connections.
    #[must_use]
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accepts the next connection, enabling keep-alive and nodelay on it.
    ///
    /// The connection is counted before it is returned.
    pub async fn accept(&self) -> io::Result<TrackedConnection> {
        let (stream, remote_addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        SockRef::from(&stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_PERIOD))?;

        let handle = self.tracker.register(remote_addr);
        Ok(TrackedConnection { stream, handle })
    }
}

/// An accepted connection that stays counted until closed or dropped.
#[derive(Debug)]
pub struct TrackedConnection {
    stream: TcpStream,
    handle: CloseHandle,
}

impl TrackedConnection {
    /// Returns the peer address.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.handle.remote_addr()
    }

    /// Returns a handle that can close this connection from another task.
    #[must_use]
    pub fn handle(&self) -> CloseHandle {
        self.handle.clone()
    }

    /// Marks the connection closed. The socket itself is released on drop.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.handle.state.close()
    }
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        self.handle.state.close();
    }
}

impl AsyncRead for TrackedConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedConnection {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
