//! Token bucket rate limiting.
//!
//! The bucket starts full with `capacity` tokens and regains one token every
//! `fill_interval`. A request takes one token. When none is available the
//! request may wait for the next token as long as that wait does not exceed
//! `max_wait`; otherwise it is rejected without reaching the inner layers
//! (`429` over HTTP, `ResourceExhausted` over RPC).
//!
//! Each link produced by the plugin owns its own bucket, shared by every
//! request that passes through that link.

use std::sync::Arc;
use std::time::Duration;

use ares_core::{
    http_handler, stream_handler, unary_handler, AresError, HttpHandler, Status, StreamHandler,
    UnaryHandler,
};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::chain::{HttpLink, StreamLink, UnaryLink};
use crate::plugin::Plugin;

/// A token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: i64,
    fill_interval: Duration,
    start: Instant,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    /// May go negative when callers are queued waiting for future tokens.
    available: i64,
    latest_tick: u64,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// A zero `fill_interval` is treated as one nanosecond.
    #[must_use]
    pub fn new(capacity: u64, fill_interval: Duration) -> Self {
        let capacity = i64::try_from(capacity).unwrap_or(i64::MAX);
        Self {
            capacity,
            fill_interval: fill_interval.max(Duration::from_nanos(1)),
            start: Instant::now(),
            state: Mutex::new(BucketState {
                available: capacity,
                latest_tick: 0,
            }),
        }
    }

    /// Takes one token, returning how long the caller must wait before
    /// using it, or `None` if that wait would exceed `max_wait`. A rejected
    /// call takes nothing.
    pub fn take_max_duration(&self, max_wait: Duration) -> Option<Duration> {
        self.take_at(Instant::now(), max_wait)
    }

    fn tick(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.start).as_nanos();
        u64::try_from(elapsed / self.fill_interval.as_nanos()).unwrap_or(u64::MAX)
    }

    fn take_at(&self, now: Instant, max_wait: Duration) -> Option<Duration> {
        let tick = self.tick(now);
        let mut state = self.state.lock();

        if state.available < self.capacity {
            let refill = i64::try_from(tick.saturating_sub(state.latest_tick)).unwrap_or(i64::MAX);
            state.available = state.available.saturating_add(refill).min(self.capacity);
        }
        state.latest_tick = tick;

        if state.available > 0 {
            state.available -= 1;
            return Some(Duration::ZERO);
        }

        let missing = u64::try_from(1 - state.available).unwrap_or(u64::MAX);
        let ready_nanos = self
            .fill_interval
            .as_nanos()
            .saturating_mul(u128::from(tick.saturating_add(missing)));
        let ready_at = self.start + Duration::from_nanos(u64::try_from(ready_nanos).unwrap_or(u64::MAX));
        let wait = ready_at.saturating_duration_since(now);
        if wait > max_wait {
            return None;
        }
        state.available -= 1;
        Some(wait)
    }

    /// Returns the number of tokens currently available (negative when
    /// callers are waiting).
    #[must_use]
    pub fn available(&self) -> i64 {
        self.state.lock().available
    }
}

/// Rate limiting plugin.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use ares_middleware::plugins::RateLimit;
///
/// let limiter = RateLimit::new(100, Duration::from_millis(10))
///     .max_wait(Duration::from_millis(50));
/// # let _ = limiter;
/// ```
#[derive(Debug, Clone)]
pub struct RateLimit {
    capacity: u64,
    fill_interval: Duration,
    max_wait: Duration,
}

impl RateLimit {
    /// Creates a limiter with `capacity` tokens refilled one per
    /// `fill_interval`; requests never wait by default.
    #[must_use]
    pub fn new(capacity: u64, fill_interval: Duration) -> Self {
        Self {
            capacity,
            fill_interval,
            max_wait: Duration::ZERO,
        }
    }

    /// Sets the longest a request may wait for a token.
    #[must_use]
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    fn bucket(&self) -> Arc<TokenBucket> {
        Arc::new(TokenBucket::new(self.capacity, self.fill_interval))
    }
}

async fn admit(bucket: &TokenBucket, max_wait: Duration) -> bool {
    match bucket.take_max_duration(max_wait) {
        Some(wait) if wait.is_zero() => true,
        Some(wait) => {
            tokio::time::sleep(wait).await;
            true
        }
        None => false,
    }
}

impl Plugin for RateLimit {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn http_link(&self) -> HttpLink {
        let bucket = self.bucket();
        let max_wait = self.max_wait;
        Arc::new(move |next: HttpHandler| -> HttpHandler {
            let bucket = Arc::clone(&bucket);
            http_handler(move |ctx, req| {
                let next = Arc::clone(&next);
                let bucket = Arc::clone(&bucket);
                async move {
                    if !admit(&bucket, max_wait).await {
                        tracing::debug!(path = %ctx.path(), "rate limited");
                        return Err(AresError::rate_limited("too many requests"));
                    }
                    next(ctx, req).await
                }
            })
        })
    }

    fn unary_link(&self) -> UnaryLink {
        let bucket = self.bucket();
        let max_wait = self.max_wait;
        Arc::new(move |next: UnaryHandler| -> UnaryHandler {
            let bucket = Arc::clone(&bucket);
            unary_handler(move |ctx, msg| {
                let next = Arc::clone(&next);
                let bucket = Arc::clone(&bucket);
                async move {
                    if !admit(&bucket, max_wait).await {
                        return Err(Status::resource_exhausted("too many requests"));
                    }
                    next(ctx, msg).await
                }
            })
        })
    }

    fn stream_link(&self) -> StreamLink {
        let bucket = self.bucket();
        let max_wait = self.max_wait;
        Arc::new(move |next: StreamHandler| -> StreamHandler {
            let bucket = Arc::clone(&bucket);
            stream_handler(move |ctx, stream| {
                let next = Arc::clone(&next);
                let bucket = Arc::clone(&bucket);
                async move {
                    if !admit(&bucket, max_wait).await {
                        return Err(Status::resource_exhausted("too many requests"));
                    }
                    next(ctx, stream).await
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::chain;
    use ares_core::{response, Code, RequestContext, RpcContext};
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_bucket_starts_full() {
        let bucket = TokenBucket::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert_eq!(bucket.take_max_duration(Duration::ZERO), Some(Duration::ZERO));
        }
        assert_eq!(bucket.take_max_duration(Duration::ZERO), None);
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let bucket = TokenBucket::new(2, Duration::from_millis(10));
        let t0 = bucket.start;
        assert!(bucket.take_at(t0, Duration::ZERO).is_some());
        assert!(bucket.take_at(t0, Duration::ZERO).is_some());
        assert!(bucket.take_at(t0, Duration::ZERO).is_none());

        // Three intervals later only `capacity` tokens are back
        let later = t0 + Duration::from_millis(30);
        assert!(bucket.take_at(later, Duration::ZERO).is_some());
        assert!(bucket.take_at(later, Duration::ZERO).is_some());
        assert!(bucket.take_at(later, Duration::ZERO).is_none());
    }

    #[test]
    fn test_bucket_wait_within_max() {
        let bucket = TokenBucket::new(1, Duration::from_millis(10));
        let t0 = bucket.start;
        assert_eq!(bucket.take_at(t0, Duration::ZERO), Some(Duration::ZERO));

        let wait = bucket.take_at(t0, Duration::from_millis(20)).unwrap();
        assert_eq!(wait, Duration::from_millis(10));
        assert_eq!(bucket.available(), -1);

        // The next caller queues behind the first
        assert_eq!(bucket.take_at(t0, Duration::from_millis(15)), None);
        assert_eq!(bucket.take_at(t0, Duration::from_millis(20)), Some(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_http_rejects_with_429_without_calling_next() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let ok = http_handler(move |_ctx, _req| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok(response::empty(StatusCode::OK)) }
        });
        let handler = chain(ok, &[RateLimit::new(1, Duration::from_secs(60)).http_link()]);

        let call = |handler: HttpHandler| async move {
            let req = http::Request::builder().uri("/").body(Bytes::new()).unwrap();
            handler(RequestContext::new(Method::GET, "/"), req).await
        };

        assert!(call(Arc::clone(&handler)).await.is_ok());
        let err = call(Arc::clone(&handler)).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unary_rejects_with_resource_exhausted() {
        let ok = unary_handler(|_ctx, msg| async move { Ok(msg) });
        let handler = chain(ok, &[RateLimit::new(1, Duration::from_secs(60)).unary_link()]);

        assert!(handler(RpcContext::new("s", "m"), Bytes::new()).await.is_ok());
        let err = handler(RpcContext::new("s", "m"), Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_token_within_max_wait() {
        let ok = unary_handler(|_ctx, msg| async move { Ok(msg) });
        let limiter = RateLimit::new(1, Duration::from_millis(50)).max_wait(Duration::from_millis(100));
        let handler = chain(ok, &[limiter.unary_link()]);

        assert!(handler(RpcContext::new("s", "m"), Bytes::new()).await.is_ok());
        assert!(handler(RpcContext::new("s", "m"), Bytes::new()).await.is_ok());
    }
}
