//! Three-state circuit breaker.
//!
//! Closed breakers record outcomes in a sliding time window and open when the
//! trip condition is met. Open breakers reject every call with
//! [`CallError::CircuitOpen`] until the cooldown elapses; the next admission
//! check then moves to half-open and lets a bounded number of trial calls
//! through. A trial success closes the breaker, a trial failure reopens it.
//!
//! Every transition bumps a generation counter so outcomes of calls admitted
//! under a superseded state are ignored.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, info, warn};

use crate::service::call::{Call, CallError, Failer};
use crate::service::config::{CircuitBreakerConfig, ConfigError, TripCondition};
use crate::service::operation::CallFuture;

// ---------------------------------------------------------------------------
// CircuitState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Breaker guarding one capability. Shared by every clone of its pipeline.
#[derive(Debug)]
pub struct CircuitBreaker {
    method: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    generation: u64,
    /// `(recorded_at, failed)` for every outcome inside the window, oldest first.
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    trials_in_flight: u32,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any threshold, window, or cooldown is zero
    /// or out of range.
    pub fn new(method: &'static str, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        metrics::gauge!("waypoint_circuit_state", "method" => method)
            .set(CircuitState::Closed.gauge_value());
        Ok(Self {
            method,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                outcomes: VecDeque::new(),
                opened_at: None,
                trials_in_flight: 0,
            }),
        })
    }

    #[must_use]
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// The stored state. An open breaker whose cooldown has elapsed still
    /// reports `Open` until the next admission check.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Asks to admit one call. `None` means the call must be rejected.
    ///
    /// The returned permit must be used to record the call's outcome; dropping
    /// it unrecorded releases a half-open trial slot without counting.
    #[must_use]
    pub fn acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        self.acquire_at(Instant::now())
    }

    fn acquire_at(self: &Arc<Self>, now: Instant) -> Option<BreakerPermit> {
        let mut st = self.inner.lock();

        if st.state == CircuitState::Open {
            let cooled = st
                .opened_at
                .is_none_or(|at| now.saturating_duration_since(at) >= self.config.cooldown());
            if !cooled {
                return None;
            }
            self.transition(&mut st, CircuitState::HalfOpen, now);
        }

        let trial = st.state == CircuitState::HalfOpen;
        if trial {
            if st.trials_in_flight >= self.config.half_open_max_calls {
                return None;
            }
            st.trials_in_flight += 1;
        }

        Some(BreakerPermit {
            breaker: Arc::clone(self),
            generation: st.generation,
            trial,
            recorded: false,
        })
    }

    fn record(&self, generation: u64, failed: bool, now: Instant) {
        let mut st = self.inner.lock();
        if st.generation != generation {
            return;
        }

        match st.state {
            CircuitState::Closed => {
                st.outcomes.push_back((now, failed));
                self.prune(&mut st, now);
                if self.should_trip(&st) {
                    self.transition(&mut st, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                st.trials_in_flight = st.trials_in_flight.saturating_sub(1);
                let next = if failed {
                    CircuitState::Open
                } else {
                    CircuitState::Closed
                };
                self.transition(&mut st, next, now);
            }
            // Permits issued while open carry an older generation.
            CircuitState::Open => {}
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut st = self.inner.lock();
        if st.generation == generation && st.state == CircuitState::HalfOpen {
            st.trials_in_flight = st.trials_in_flight.saturating_sub(1);
        }
    }

    fn prune(&self, st: &mut BreakerState, now: Instant) {
        let window = self.config.window();
        while let Some(&(at, _)) = st.outcomes.front() {
            if now.saturating_duration_since(at) < window {
                break;
            }
            st.outcomes.pop_front();
        }
    }

    fn should_trip(&self, st: &BreakerState) -> bool {
        let failures = st.outcomes.iter().filter(|(_, failed)| *failed).count();
        match self.config.trip {
            TripCondition::Failures { count } => failures >= count as usize,
            TripCondition::FailureRatio { ratio, min_calls } => {
                let total = st.outcomes.len();
                #[allow(clippy::cast_precision_loss)]
                let share = failures as f64 / total as f64;
                total >= min_calls as usize && share >= ratio
            }
        }
    }

    fn transition(&self, st: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = st.state;
        st.state = to;
        st.generation += 1;
        st.outcomes.clear();
        st.trials_in_flight = 0;
        st.opened_at = (to == CircuitState::Open).then_some(now);

        let method = self.method;
        match to {
            CircuitState::Open => warn!(
                method,
                from = from.as_str(),
                cooldown_ms = self.config.cooldown_ms,
                "circuit breaker opened"
            ),
            CircuitState::Closed => info!(method, from = from.as_str(), "circuit breaker closed"),
            CircuitState::HalfOpen => debug!(method, "circuit breaker half-open"),
        }
        metrics::gauge!("waypoint_circuit_state", "method" => method).set(to.gauge_value());
    }
}

// ---------------------------------------------------------------------------
// BreakerPermit
// ---------------------------------------------------------------------------

/// Admission granted by [`CircuitBreaker::acquire`].
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    trial: bool,
    recorded: bool,
}

impl BreakerPermit {
    /// Records the outcome of the admitted call.
    pub fn record(mut self, failed: bool) {
        self.recorded = true;
        self.breaker.record(self.generation, failed, Instant::now());
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.trial && !self.recorded {
            self.breaker.release_trial(self.generation);
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerLayer {
    #[must_use]
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            breaker: Arc::clone(&self.breaker),
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerService
// ---------------------------------------------------------------------------

/// Checks the breaker before calling inward and feeds it the outcome after.
///
/// A response carrying an application error counts as a failure, as does any
/// call error except cancellation.
#[derive(Debug, Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
}

impl<S, Req> Service<Call<Req>> for CircuitBreakerService<S>
where
    S: Service<Call<Req>, Error = CallError> + Send,
    S::Future: Send + 'static,
    S::Response: Failer + Send + 'static,
{
    type Response = S::Response;
    type Error = CallError;
    type Future = CallFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        let Some(permit) = self.breaker.acquire() else {
            let method = self.breaker.method();
            debug!(method, "circuit breaker rejected call");
            return Box::pin(async move { Err(CallError::CircuitOpen { method }) });
        };

        let fut = self.inner.call(call);
        Box::pin(async move {
            let result = fut.await;
            match &result {
                Ok(resp) => permit.record(resp.failed().is_some()),
                Err(e) if e.counts_as_failure() => permit.record(true),
                Err(_) => drop(permit),
            }
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use tower::ServiceExt;
    use waypoint_core::AppError;

    use super::*;
    use crate::service::call::CallContext;
    use crate::service::operation::{operation_fn, OperationService};

    #[derive(Debug)]
    struct Reply {
        err: Option<AppError>,
    }

    impl Failer for Reply {
        fn failed(&self) -> Option<&AppError> {
            self.err.as_ref()
        }
    }

    fn config(count: u32, cooldown_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            trip: TripCondition::Failures { count },
            window_ms: 60_000,
            cooldown_ms,
            half_open_max_calls: 1,
        }
    }

    fn breaker(config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new("Sum", config).unwrap())
    }

    /// Operation that fails while `failing` is set and counts invocations.
    fn guarded(
        breaker: Arc<CircuitBreaker>,
    ) -> (
        Arc<AtomicBool>,
        Arc<AtomicUsize>,
        CircuitBreakerService<impl Service<Call<()>, Response = Reply, Error = CallError, Future = CallFuture<Reply>>>,
    ) {
        let failing = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let (f, c) = (Arc::clone(&failing), Arc::clone(&calls));
        let op = operation_fn(move |_ctx: CallContext, (): ()| {
            c.fetch_add(1, Ordering::SeqCst);
            let err = f
                .load(Ordering::SeqCst)
                .then(|| AppError::new("can't sum two zeroes"));
            async move { Ok::<_, CallError>(Reply { err }) }
        });
        let svc = CircuitBreakerLayer::new(breaker).layer(OperationService::new(Arc::new(op)));
        (failing, calls, svc)
    }

    async fn send<S>(svc: &mut S) -> Result<Reply, CallError>
    where
        S: Service<Call<()>, Response = Reply, Error = CallError>,
    {
        svc.ready().await?.call(Call::new(CallContext::new(), ())).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_recovers_after_cooldown() {
        let cb = breaker(config(3, 30_000));
        let (failing, calls, mut svc) = guarded(Arc::clone(&cb));

        for _ in 0..3 {
            let reply = send(&mut svc).await.unwrap();
            assert!(reply.err.is_some());
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        let err = send(&mut svc).await.unwrap_err();
        assert!(matches!(err, CallError::CircuitOpen { method: "Sum" }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(21)).await;
        failing.store(false, Ordering::SeqCst);
        let reply = send(&mut svc).await.unwrap();
        assert!(reply.err.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_and_restarts_cooldown() {
        let cb = breaker(config(1, 1_000));
        let (_failing, calls, mut svc) = guarded(Arc::clone(&cb));

        send(&mut svc).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        send(&mut svc).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(matches!(
            send(&mut svc).await,
            Err(CallError::CircuitOpen { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_limits_concurrent_trials() {
        let cb = breaker(config(1, 1_000));
        let first = cb.acquire().unwrap();
        first.record(true);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        let trial = cb.acquire().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.acquire().is_none());

        // Dropping an unrecorded trial frees the slot without a transition.
        drop(trial);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let retry = cb.acquire().unwrap();
        retry.record(false);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn outcomes_from_a_superseded_state_are_ignored() {
        let cb = breaker(config(1, 1_000));
        let stale = cb.acquire().unwrap();
        cb.acquire().unwrap().record(true);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        let trial = cb.acquire().unwrap();

        // A late success admitted while closed must not close the half-open breaker.
        stale.record(false);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        trial.record(false);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_outside_the_window_do_not_count() {
        let mut cfg = config(2, 1_000);
        cfg.window_ms = 1_000;
        let cb = breaker(cfg);

        cb.acquire().unwrap().record(true);
        tokio::time::advance(Duration::from_millis(1_500)).await;
        cb.acquire().unwrap().record(true);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.acquire().unwrap().record(true);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn failure_ratio_waits_for_minimum_calls() {
        let cb = breaker(CircuitBreakerConfig {
            trip: TripCondition::FailureRatio {
                ratio: 0.5,
                min_calls: 4,
            },
            window_ms: 60_000,
            cooldown_ms: 1_000,
            half_open_max_calls: 1,
        });

        cb.acquire().unwrap().record(true);
        cb.acquire().unwrap().record(true);
        cb.acquire().unwrap().record(false);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.acquire().unwrap().record(false);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn cancellation_is_not_a_failure() {
        let cb = breaker(config(1, 1_000));
        let op = operation_fn(|_ctx: CallContext, (): ()| async {
            Ok::<_, CallError>(Reply { err: None })
        });
        let svc = CircuitBreakerLayer::new(Arc::clone(&cb)).layer(OperationService::new(Arc::new(op)));

        let ctx = CallContext::new();
        ctx.cancel();
        let err = svc.oneshot(Call::new(ctx, ())).await.unwrap_err();
        assert!(matches!(err, CallError::Cancelled));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn state_gauge_follows_transitions() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let gauge = || {
            snapshotter
                .snapshot()
                .into_vec()
                .into_iter()
                .find_map(|(key, _, _, value)| match value {
                    DebugValue::Gauge(v) if key.key().name() == "waypoint_circuit_state" => {
                        let labels: Vec<_> = key
                            .key()
                            .labels()
                            .map(|l| (l.key().to_string(), l.value().to_string()))
                            .collect();
                        assert_eq!(labels, [("method".to_string(), "Sum".to_string())]);
                        Some(v.into_inner())
                    }
                    _ => None,
                })
        };

        metrics::with_local_recorder(&recorder, || {
            let cb = breaker(config(1, 30_000));
            assert_eq!(gauge(), Some(0.0));

            cb.acquire().unwrap().record(true);
            assert_eq!(cb.state(), CircuitState::Open);
            assert_eq!(gauge(), Some(1.0));
        });
    }

    #[test]
    fn rejects_zero_settings() {
        assert!(CircuitBreaker::new("Sum", config(0, 1_000)).is_err());
        assert!(CircuitBreaker::new("Sum", config(1, 0)).is_err());
    }
}
