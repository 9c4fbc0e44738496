//! Cron-scheduled worker.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ares_core::BoxFuture;
use chrono::{DateTime, Utc};
use cron::Schedule;

use super::{job, Control, Job, Worker};
use crate::error::AppError;

/// Runs a job on a cron schedule (seconds field included, UTC).
///
/// Runs never overlap; a run still in progress when the next fire time
/// passes pushes that run to the following fire time.
pub struct CronWorker {
    expression: String,
    schedule: Schedule,
    job: Job,
    control: Control,
}

impl CronWorker {
    /// Creates a worker running `func` on `expression`, e.g. `0 */5 * * * *`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidSchedule`] if the expression does not parse.
    pub fn new<F, Fut>(name: impl Into<String>, expression: &str, func: F) -> Result<Self, AppError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let schedule = Schedule::from_str(expression).map_err(|e| AppError::InvalidSchedule {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
            job: job(func),
            control: Control::new(name.into()),
        })
    }

    /// Returns the worker name.
    pub fn name(&self) -> &str {
        self.control.name()
    }

    /// Returns the cron expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the number of completed runs.
    pub fn runs(&self) -> u64 {
        self.control.runs()
    }

    /// Returns the delay from `now` until the next fire time.
    pub fn delay_after(&self, now: DateTime<Utc>) -> Option<Duration> {
        let next = self.schedule.after(&now).next()?;
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }
}

impl Worker for CronWorker {
    fn run(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            tracing::debug!(worker = %self.name(), cron = %self.expression, "cron worker scheduled");
            self.control
                .drive(&self.job, || self.delay_after(Utc::now()))
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
