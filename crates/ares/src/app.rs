//! The process lifecycle manager.
//!
//! An [`App`] owns every server and worker of the process. [`App::run`]
//! starts them, gates discovery registration on every server reaching
//! `Running` within the startup window, then waits for a shutdown trigger
//! (an OS signal or a [`ShutdownHandle`]) and applies its [`Policy`]:
//!
//! | Policy      | Servers and workers            | Defers           | Exit |
//! |-------------|--------------------------------|------------------|------|
//! | `Graceful`  | `graceful_stop`, concurrently  | reverse order    | 0    |
//! | `Immediate` | `stop`, without waiting        | reverse order    | 1    |
//!
//! Registrations are withdrawn first on every shutdown path, including a
//! panic escaping the run loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use ares_config::AppConfig;
use ares_middleware::plugins::Tracer;
use ares_server::{Server, ServerState};
use ares_telemetry::{app_span, LogConfig};
use futures_util::future::{join, join_all};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;

use crate::discovery::{Discovery, NoopDiscovery, RegistrationRecord};
use crate::error::{AppError, Exit};
use crate::signal::{Policy, Signal, Signals};
use crate::worker::Worker;

/// Default time every server has to reach `Running`.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Environment variable consulted for the instance id.
pub const INSTANCE_ID_ENV: &str = "ARES_INSTANCE_ID";

const STARTUP_POLL: Duration = Duration::from_millis(10);

type Deferred = Box<dyn FnOnce() + Send>;

/// Triggers shutdown from inside the process.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<Policy>,
}

impl ShutdownHandle {
    /// Requests shutdown with `policy`. Returns false once the app is gone.
    pub fn trigger(&self, policy: Policy) -> bool {
        self.tx.send(policy).is_ok()
    }

    /// Requests a graceful shutdown.
    pub fn graceful(&self) -> bool {
        self.trigger(Policy::Graceful)
    }

    /// Requests an immediate shutdown.
    pub fn immediate(&self) -> bool {
        self.trigger(Policy::Immediate)
    }
}

/// Builder for [`App`].
#[derive(Default)]
pub struct AppBuilder {
    name: Option<String>,
    instance_id: Option<String>,
    discovery: Option<Arc<dyn Discovery>>,
    startup_timeout: Option<Duration>,
    handle_signals: Option<bool>,
}

impl AppBuilder {
    /// Takes name, instance id and startup window from configuration.
    pub fn config(mut self, config: &AppConfig) -> Self {
        self.name = Some(config.name.clone());
        if !config.instance_id.is_empty() {
            self.instance_id = Some(config.instance_id.clone());
        }
        self.startup_timeout = Some(config.startup_timeout());
        self
    }

    /// Sets the application name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the instance id. Defaults to `ARES_INSTANCE_ID`, then a fresh UUID.
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Sets the discovery client. Defaults to [`NoopDiscovery`].
    pub fn discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Sets the startup window.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// Whether `run` installs OS signal handlers. Defaults to true.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = Some(enabled);
        self
    }

    /// Builds the application.
    pub fn build(self) -> App {
        let instance_id = self
            .instance_id
            .or_else(|| std::env::var(INSTANCE_ID_ENV).ok().filter(|id| !id.is_empty()))
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        App {
            name: self.name.unwrap_or_else(|| "ares".to_string()),
            instance_id,
            discovery: self.discovery.unwrap_or_else(|| Arc::new(NoopDiscovery)),
            startup_timeout: self.startup_timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT),
            handle_signals: self.handle_signals.unwrap_or(true),
            servers: Vec::new(),
            workers: Vec::new(),
            defers: Mutex::new(Vec::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }
}

/// A process: its servers, workers and cleanups.
///
/// # Example
///
/// ```rust,ignore
/// let mut app = App::builder().name("greeter").build();
/// app.serve(Arc::new(http))?;
/// app.add_worker("sweeper", Arc::new(sweeper));
/// app.defer(|| tracing::info!("bye"));
/// let exit = app.run().await?;
/// std::process::exit(exit.code());
/// ```
pub struct App {
    name: String,
    instance_id: String,
    discovery: Arc<dyn Discovery>,
    startup_timeout: Duration,
    handle_signals: bool,
    servers: Vec<(String, Arc<dyn Server>)>,
    workers: Vec<(String, Arc<dyn Worker>)>,
    defers: Mutex<Vec<Deferred>>,
    shutdown_tx: mpsc::UnboundedSender<Policy>,
    shutdown_rx: mpsc::UnboundedReceiver<Policy>,
}

impl App {
    /// Returns a builder.
    pub fn builder() -> AppBuilder {
        AppBuilder::default()
    }

    /// Returns the application name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the instance id.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Returns a client plugin stamping outgoing calls with this
    /// application's name and instance id.
    ///
    /// # Errors
    ///
    /// Fails if either value cannot be sent as call metadata.
    pub fn tracer(&self) -> Result<Tracer, http::header::InvalidHeaderValue> {
        Tracer::new(&self.name, &self.instance_id)
    }

    /// Returns the labels of the managed servers.
    pub fn server_labels(&self) -> Vec<&str> {
        self.servers.iter().map(|(label, _)| label.as_str()).collect()
    }

    /// Adds a server, labelled `scheme:app:addr`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::DuplicateServer`] if the label is taken.
    pub fn serve(&mut self, server: Arc<dyn Server>) -> Result<(), AppError> {
        let label = format!("{}:{}:{}", server.scheme(), self.name, server.addr());
        if self.servers.iter().any(|(l, _)| *l == label) {
            return Err(AppError::DuplicateServer(label));
        }
        tracing::debug!(server = %label, name = %server.name(), "server added");
        self.servers.push((label, server));
        Ok(())
    }

    /// Adds a background worker.
    pub fn add_worker(&mut self, label: impl Into<String>, worker: Arc<dyn Worker>) {
        self.workers.push((label.into(), worker));
    }

    /// Adds a cleanup run at shutdown. Cleanups run in reverse order.
    pub fn defer(&mut self, cleanup: impl FnOnce() + Send + 'static) {
        self.defers.get_mut().push(Box::new(cleanup));
    }

    /// Returns a handle that triggers shutdown programmatically.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Runs until shut down.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::StartupTimeout`] if a server is not running once
    /// the startup window closes (nothing is registered in that case), or
    /// [`AppError::Signal`] if signal handlers cannot be installed.
    ///
    /// # Panics
    ///
    /// A panic escaping the run loop withdraws every registration and is
    /// then resumed.
    pub async fn run(self) -> Result<Exit, AppError> {
        let span = app_span(&LogConfig::default().app(self.name.clone(), self.instance_id.clone()));
        let discovery = Arc::clone(&self.discovery);

        match AssertUnwindSafe(self.run_inner().instrument(span))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                tracing::error!("run loop panicked, withdrawing registrations");
                discovery.unregister_all().await;
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn run_inner(mut self) -> Result<Exit, AppError> {
        let mut signals = if self.handle_signals {
            Some(Signals::install().map_err(AppError::Signal)?)
        } else {
            None
        };

        let mut workers = JoinSet::new();
        for (label, worker) in &self.workers {
            let worker = Arc::clone(worker);
            let label = label.clone();
            workers.spawn(async move {
                worker.run().await;
                tracing::debug!(worker = %label, "worker exited");
            });
        }

        let mut servers = JoinSet::new();
        for (label, server) in &self.servers {
            let server = Arc::clone(server);
            let label = label.clone();
            servers.spawn(async move {
                if let Err(err) = server.serve().await {
                    tracing::error!(server = %label, error = %err, "server failed");
                }
            });
        }

        if let Err(err) = self.await_startup().await {
            tracing::error!(error = %err, "startup failed");
            self.stop_all().await;
            servers.abort_all();
            workers.abort_all();
            self.run_defers();
            return Err(err);
        }

        self.register().await;
        tracing::info!(
            servers = self.servers.len(),
            workers = self.workers.len(),
            "application running"
        );

        let has_servers = !servers.is_empty();
        let policy = tokio::select! {
            Some(signal) = next_signal(signals.as_mut()) => {
                tracing::warn!(%signal, policy = ?signal.policy(), "received signal");
                signal.policy()
            }
            Some(policy) = self.shutdown_rx.recv() => {
                tracing::warn!(?policy, "shutdown requested");
                policy
            }
            () = drain_tasks(&mut servers), if has_servers => {
                tracing::warn!("every server exited");
                Policy::Graceful
            }
        };

        Ok(self.shutdown(policy, &mut servers, &mut workers).await)
    }

    async fn await_startup(&self) -> Result<(), AppError> {
        let deadline = Instant::now() + self.startup_timeout;
        loop {
            let pending: Vec<&(String, Arc<dyn Server>)> =
                self.servers.iter().filter(|(_, s)| !s.is_running()).collect();
            if pending.is_empty() {
                return Ok(());
            }
            let failed = pending.iter().any(|(_, s)| s.state() == ServerState::Stopped);
            if failed || Instant::now() >= deadline {
                return Err(AppError::StartupTimeout {
                    servers: pending.into_iter().map(|(label, _)| label.clone()).collect(),
                });
            }
            tokio::time::sleep(STARTUP_POLL).await;
        }
    }

    async fn register(&self) {
        for (label, server) in &self.servers {
            let record = RegistrationRecord {
                scheme: server.scheme().to_string(),
                address: server.addr(),
                instance_id: self.instance_id.clone(),
            };
            let key = record.service_key(&self.name);
            match self.discovery.register_instance(&key, &record.address).await {
                Ok(()) => tracing::info!(server = %label, key = %key, %record, "registered"),
                Err(err) => tracing::warn!(server = %label, key = %key, error = %err, "registration failed"),
            }
        }
    }

    async fn stop_all(&self) {
        let servers = join_all(self.servers.iter().map(|(_, s)| s.stop()));
        let workers = join_all(self.workers.iter().map(|(_, w)| w.stop()));
        join(servers, workers).await;
    }

    async fn shutdown(
        mut self,
        policy: Policy,
        servers: &mut JoinSet<()>,
        workers: &mut JoinSet<()>,
    ) -> Exit {
        self.discovery.unregister_all().await;

        let exit = match policy {
            Policy::Graceful => {
                tracing::warn!("draining servers and workers");
                let s = join_all(self.servers.iter().map(|(_, s)| s.graceful_stop()));
                let w = join_all(self.workers.iter().map(|(_, w)| w.graceful_stop()));
                join(s, w).await;
                drain_tasks(servers).await;
                drain_tasks(workers).await;
                Exit::Graceful
            }
            Policy::Immediate => {
                tracing::warn!("stopping servers and workers");
                self.stop_all().await;
                servers.abort_all();
                workers.abort_all();
                Exit::Immediate
            }
        };

        self.run_defers();
        tracing::warn!(code = exit.code(), "shutdown complete");
        exit
    }

    fn run_defers(&mut self) {
        let defers = self.defers.get_mut();
        if defers.is_empty() {
            return;
        }
        tracing::info!(count = defers.len(), "running cleanups");
        while let Some(cleanup) = defers.pop() {
            cleanup();
        }
    }
}

async fn next_signal(signals: Option<&mut Signals>) -> Option<Signal> {
    match signals {
        Some(signals) => signals.recv().await,
        None => std::future::pending().await,
    }
}

async fn drain_tasks(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            if err.is_panic() {
                tracing::error!(error = %err, "task panicked");
            }
        }
    }
}
