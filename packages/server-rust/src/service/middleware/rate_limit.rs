//! Token-bucket admission control.
//!
//! Rejects calls with [`CallError::RateLimited`] when the bucket is empty. In
//! wait mode (`max_wait > 0`) a call may instead reserve a future token and
//! sleep until it matures, bounded by its own deadline and cancellation.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::debug;

use crate::service::call::{Call, CallError};
use crate::service::config::{ConfigError, RateLimitConfig};
use crate::service::operation::{wait_until, CallFuture};

// ---------------------------------------------------------------------------
// TokenBucket
// ---------------------------------------------------------------------------

/// Lazily refilled token bucket.
///
/// Tokens are tracked as `f64` so slow rates accrue fractional credit instead
/// of being truncated away. Starts full.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    max_wait: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket that rejects immediately when empty.
    ///
    /// Callers are expected to pass validated settings; see
    /// [`TokenBucket::from_config`].
    #[must_use]
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_second,
            max_wait: Duration::ZERO,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Allows calls to wait up to `max_wait` for a token.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// # Errors
    ///
    /// Returns [`ConfigError`] if the settings are out of range.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config.capacity, config.refill_per_second).with_max_wait(config.max_wait()))
    }

    #[must_use]
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Takes one token if available.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> bool {
        self.reserve_at(now, Duration::ZERO).is_some()
    }

    /// Reserves one token, returning how long the caller must wait before
    /// using it, or `None` if that wait would exceed `max_wait`.
    ///
    /// A successful reservation is consumed immediately, so concurrent callers
    /// queue behind it.
    pub fn reserve(&self, max_wait: Duration) -> Option<Duration> {
        self.reserve_at(Instant::now(), max_wait)
    }

    pub fn reserve_at(&self, now: Instant, max_wait: Duration) -> Option<Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Some(Duration::ZERO);
        }

        // A wait too long to represent is longer than any `max_wait`.
        let wait = Duration::try_from_secs_f64((1.0 - state.tokens) / self.refill_per_second).ok()?;
        if wait <= max_wait {
            state.tokens -= 1.0;
            Some(wait)
        } else {
            None
        }
    }

    /// Tokens currently available, after refill. Negative while reservations
    /// are outstanding.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        if now <= state.last_refill {
            return;
        }
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.capacity);
        state.last_refill = now;
    }
}

// ---------------------------------------------------------------------------
// RateLimitLayer
// ---------------------------------------------------------------------------

/// Tower layer admitting calls through a shared [`TokenBucket`].
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    method: &'static str,
    bucket: Arc<TokenBucket>,
}

impl RateLimitLayer {
    #[must_use]
    pub fn new(method: &'static str, bucket: Arc<TokenBucket>) -> Self {
        Self { method, bucket }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            method: self.method,
            bucket: Arc::clone(&self.bucket),
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimitService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    method: &'static str,
    bucket: Arc<TokenBucket>,
}

impl<S, Req> Service<Call<Req>> for RateLimitService<S>
where
    S: Service<Call<Req>, Error = CallError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = CallError;
    type Future = CallFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        let method = self.method;
        let max_wait = call
            .ctx
            .remaining()
            .map_or(self.bucket.max_wait(), |left| left.min(self.bucket.max_wait()));

        let Some(wait) = self.bucket.reserve(max_wait) else {
            debug!(method, "rate limit exceeded");
            return Box::pin(async move { Err(CallError::RateLimited { method }) });
        };

        if wait.is_zero() {
            return Box::pin(self.inner.call(call));
        }

        // The readied service is the one that must be called; leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move {
            debug!(method, wait_ms = wait.as_millis(), "waiting for rate limit token");
            let cancel = call.ctx.cancellation().clone();
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CallError::Cancelled),
                () = wait_until(call.ctx.deadline()) => return Err(CallError::DeadlineExceeded),
                () = tokio::time::sleep(wait) => {}
            }
            inner.call(call).await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
