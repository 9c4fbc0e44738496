//! Client-side retries.
//!
//! [`Retry`] re-issues a unary call that failed with a transient code, at
//! most `max_attempts` times in total, waiting between attempts as its
//! [`Backoff`] policy says.

use std::sync::Arc;
use std::time::Duration;

use ares_core::{unary_invoker, Code, UnaryInvoker};

use crate::chain::ClientUnaryLink;
use crate::plugin::Plugin;

/// Delay policy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    Zero,
    /// Never retry.
    Stop,
    /// Wait the same interval before every retry.
    Constant(Duration),
}

impl Backoff {
    /// Returns the wait before the next attempt, or `None` to give up.
    #[must_use]
    pub const fn next_delay(&self) -> Option<Duration> {
        match self {
            Self::Zero => Some(Duration::ZERO),
            Self::Stop => None,
            Self::Constant(interval) => Some(*interval),
        }
    }
}

const fn retryable(code: Code) -> bool {
    matches!(
        code,
        Code::Unavailable | Code::ResourceExhausted | Code::Aborted
    )
}

/// Retries transient client call failures.
///
/// Installed outside a [`CircuitBreaker`](super::CircuitBreaker), every
/// attempt passes through the breaker, so once the circuit opens the
/// remaining attempts are rejected without reaching the upstream.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    max_attempts: u32,
    backoff: Backoff,
}

impl Retry {
    /// Allows up to `max_attempts` calls in total, at least one.
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Returns the total number of calls allowed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(3, Backoff::Constant(Duration::from_millis(100)))
    }
}

impl Plugin for Retry {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn client_unary_link(&self) -> ClientUnaryLink {
        let policy = *self;
        Arc::new(move |next: UnaryInvoker| -> UnaryInvoker {
            unary_invoker(move |ctx, msg| {
                let next = Arc::clone(&next);
                async move {
                    let mut attempt = 1;
                    loop {
                        let status = match next(ctx.clone(), msg.clone()).await {
                            Err(status) if attempt < policy.max_attempts && retryable(status.code()) => {
                                status
                            }
                            done => return done,
                        };
                        let Some(delay) = policy.backoff.next_delay() else {
                            return Err(status);
                        };
                        tracing::debug!(
                            method = %ctx.full_method(),
                            attempt,
                            code = ?status.code(),
                            "retrying call"
                        );
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        attempt += 1;
                    }
                }
            })
        })
    }
}
