//! Fixed-interval worker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ares_core::BoxFuture;
use tokio::time::Instant;

use super::{job, Control, Job, Worker};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Time from `elapsed` to the next multiple of `interval`.
fn until_next_tick(elapsed: Duration, interval: Duration) -> Duration {
    let period = interval.as_nanos();
    let now = elapsed.as_nanos();
    let next = (now / period + 1) * period;
    Duration::from_nanos(u64::try_from(next - now).unwrap_or(u64::MAX))
}

/// Runs a job immediately and then on every interval tick.
///
/// Runs never overlap: ticks that fire while a run is in progress are
/// skipped, so a slow run delays the next one.
///
/// # Example
///
/// ```rust,ignore
/// use ares::worker::Singleton;
/// use std::time::Duration;
///
/// let sweeper = Singleton::new("session-sweeper", Duration::from_secs(60), || async {
///     sweep_expired_sessions().await;
/// });
/// app.add_worker("sweeper", Arc::new(sweeper));
/// ```
pub struct Singleton {
    interval: Duration,
    job: Job,
    control: Control,
}

impl Singleton {
    /// Creates a worker running `func` every `interval`.
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            interval: interval.max(MIN_INTERVAL),
            job: job(func),
            control: Control::new(name.into()),
        }
    }

    /// Returns the worker name.
    pub fn name(&self) -> &str {
        self.control.name()
    }

    /// Returns the number of completed runs.
    pub fn runs(&self) -> u64 {
        self.control.runs()
    }
}

impl Worker for Singleton {
    fn run(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let start = Instant::now();
            let mut first = true;
            self.control
                .drive(&self.job, || {
                    if std::mem::take(&mut first) {
                        return Some(Duration::ZERO);
                    }
                    Some(until_next_tick(start.elapsed(), self.interval))
                })
                .await;
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.control.stop() })
    }

    fn graceful_stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.control.graceful_stop())
    }
}
