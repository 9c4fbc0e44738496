//! Background workers.
//!
//! A [`Worker`] runs alongside the servers for the whole life of the
//! process. The lifecycle manager starts every worker's [`Worker::run`]
//! concurrently and calls [`Worker::stop`] or [`Worker::graceful_stop`]
//! according to the shutdown policy.

mod cron;
mod flow;
mod singleton;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ares_core::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::watch;

pub use self::cron::CronWorker;
pub use self::flow::Flow;
pub use self::singleton::Singleton;

/// A long-running background task.
pub trait Worker: Send + Sync {
    /// Runs until stopped.
    fn run(self: Arc<Self>) -> BoxFuture<'static, ()>;

    /// Asks the worker to stop, abandoning in-flight work.
    fn stop(&self) -> BoxFuture<'_, ()>;

    /// Asks the worker to stop and waits for in-flight work to finish.
    fn graceful_stop(&self) -> BoxFuture<'_, ()>;
}

/// A unit of scheduled work.
pub(crate) type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) fn job<F, Fut>(func: F) -> Job
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || Box::pin(func()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Running,
    Graceful,
    Immediate,
}

/// Stop signalling shared by the scheduled workers.
///
/// A run is never interrupted by a graceful stop; an immediate stop drops
/// the in-flight run.
pub(crate) struct Control {
    name: String,
    mode: watch::Sender<Mode>,
    finished: watch::Sender<bool>,
    started: AtomicBool,
    runs: AtomicU64,
}

impl Control {
    pub(crate) fn new(name: String) -> Self {
        let (mode, _) = watch::channel(Mode::Running);
        let (finished, _) = watch::channel(false);
        Self {
            name,
            mode,
            finished,
            started: AtomicBool::new(false),
            runs: AtomicU64::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn runs(&self) -> u64 {
        self.runs.load(Ordering::Acquire)
    }

    pub(crate) fn record_run(&self) {
        self.runs.fetch_add(1, Ordering::AcqRel);
    }

    /// Claims the single run of this worker, returning the stop mode feed.
    pub(crate) fn start(&self) -> Option<watch::Receiver<Mode>> {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::warn!(worker = %self.name, "worker already running");
            return None;
        }
        Some(self.mode.subscribe())
    }

    pub(crate) fn finish(&self) {
        tracing::info!(worker = %self.name, runs = self.runs(), "worker stopped");
        self.finished.send_replace(true);
    }

    /// Runs `job` whenever `next_delay` says it is due, until stopped.
    /// `next_delay` returning `None` means no run will ever be due again.
    pub(crate) async fn drive(&self, job: &Job, mut next_delay: impl FnMut() -> Option<Duration>) {
        let Some(mut mode) = self.start() else {
            return;
        };
        tracing::info!(worker = %self.name, "worker started");

        while let Some(delay) = next_delay() {
            let due = tokio::select! {
                biased;
                _ = mode.wait_for(|m| *m != Mode::Running) => false,
                () = tokio::time::sleep(delay) => true,
            };
            if !due {
                break;
            }

            let run = AssertUnwindSafe(job()).catch_unwind();
            tokio::select! {
                biased;
                _ = mode.wait_for(|m| *m == Mode::Immediate) => {
                    tracing::warn!(worker = %self.name, "in-flight run abandoned");
                    break;
                }
                outcome = run => {
                    self.record_run();
                    if outcome.is_err() {
                        tracing::error!(worker = %self.name, "worker run panicked");
                    }
                }
            }
        }

        self.finish();
    }

    pub(crate) fn stop(&self) {
        self.mode.send_replace(Mode::Immediate);
    }

    pub(crate) async fn graceful_stop(&self) {
        self.mode.send_if_modified(|mode| {
            if *mode == Mode::Running {
                *mode = Mode::Graceful;
                true
            } else {
                false
            }
        });
        if self.started.load(Ordering::Acquire) {
            let mut finished = self.finished.subscribe();
            let _ = finished.wait_for(|done| *done).await;
        }
    }
}
