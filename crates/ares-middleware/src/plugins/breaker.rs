//! Client-side circuit breaker.
//!
//! Wraps outgoing unary calls. After `failure_threshold` consecutive failures
//! the breaker opens and rejects calls with `Unavailable` without invoking
//! the remote side. Once `cool_down` has elapsed a single trial call is let
//! through: success closes the breaker, failure opens it again, and so does
//! a trial that is cancelled or panics before it completes.
//!
//! Only codes that indicate an unhealthy upstream count as failures; an
//! `InvalidArgument` or `NotFound` says nothing about the peer's health.

use std::sync::Arc;
use std::time::Duration;

use ares_core::{unary_invoker, Code, Status, UnaryInvoker};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::chain::ClientUnaryLink;
use crate::plugin::Plugin;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the cool-down elapses.
    Open,
    /// A trial call is deciding whether to close.
    HalfOpen,
}

#[derive(Debug)]
enum Inner {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct Shared {
    failure_threshold: u32,
    cool_down: Duration,
    inner: Mutex<Inner>,
}

impl Shared {
    /// Decides whether a call may proceed.
    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        match *inner {
            Inner::Closed { .. } => Admission::Call,
            Inner::Open { until } if Instant::now() >= until => {
                *inner = Inner::HalfOpen;
                Admission::Trial
            }
            Inner::Open { .. } | Inner::HalfOpen => Admission::Rejected,
        }
    }

    /// Reopens after a trial call that ended without an outcome.
    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        if matches!(*inner, Inner::HalfOpen) {
            tracing::warn!("circuit breaker trial abandoned");
            *inner = self.open();
        }
    }

    fn record(&self, result: Result<(), Code>) {
        let mut inner = self.inner.lock();
        let failed = matches!(result, Err(code) if trips(code));
        let next = match *inner {
            _ if !failed => Inner::Closed { failures: 0 },
            Inner::Closed { failures } if failures + 1 < self.failure_threshold => Inner::Closed {
                failures: failures + 1,
            },
            Inner::Closed { failures } => {
                tracing::warn!(failures = failures + 1, "circuit breaker opened");
                self.open()
            }
            Inner::HalfOpen | Inner::Open { .. } => {
                tracing::warn!("circuit breaker trial failed");
                self.open()
            }
        };
        *inner = next;
    }

    fn open(&self) -> Inner {
        Inner::Open {
            until: Instant::now() + self.cool_down,
        }
    }
}

enum Admission {
    Call,
    Trial,
    Rejected,
}

/// Settles a trial call. Dropped unsettled, the breaker opens again.
struct Trial {
    shared: Arc<Shared>,
    settled: bool,
}

impl Trial {
    fn settle(mut self, result: Result<(), Code>) {
        self.settled = true;
        self.shared.record(result);
    }
}

impl Drop for Trial {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.abandon_trial();
        }
    }
}

const fn trips(code: Code) -> bool {
    matches!(
        code,
        Code::Unknown
            | Code::DeadlineExceeded
            | Code::ResourceExhausted
            | Code::Internal
            | Code::Unavailable
            | Code::DataLoss
    )
}

/// Circuit breaker plugin for client unary calls.
///
/// Every call to [`Plugin::client_unary_link`] shares the same breaker, so
/// one breaker should be created per upstream.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5))
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(failure_threshold: u32, cool_down: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                failure_threshold: failure_threshold.max(1),
                cool_down,
                inner: Mutex::new(Inner::Closed { failures: 0 }),
            }),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        match *self.shared.inner.lock() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen => BreakerState::HalfOpen,
        }
    }
}

impl Plugin for CircuitBreaker {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn client_unary_link(&self) -> ClientUnaryLink {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |next: UnaryInvoker| -> UnaryInvoker {
            let shared = Arc::clone(&shared);
            unary_invoker(move |ctx, msg| {
                let next = Arc::clone(&next);
                let shared = Arc::clone(&shared);
                async move {
                    let trial = match shared.admit() {
                        Admission::Rejected => {
                            return Err(Status::unavailable(format!(
                                "circuit open: {}",
                                ctx.full_method()
                            )));
                        }
                        Admission::Trial => Some(Trial {
                            shared: Arc::clone(&shared),
                            settled: false,
                        }),
                        Admission::Call => None,
                    };
                    let result = next(ctx, msg).await;
                    let outcome = result.as_ref().map(|_| ()).map_err(Status::code);
                    match trial {
                        Some(trial) => trial.settle(outcome),
                        None => shared.record(outcome),
                    }
                    result
                }
            })
        })
    }
}
