//! Graceful shutdown controller with in-flight call tracking.
//!
//! Health state lives in a `watch` channel so handlers read it without locks
//! and lifecycle code can await transitions. In-flight calls are counted with
//! RAII guards; the last guard to drop wakes any drain waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};

/// Server health state, transitioned by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Server is initializing (not yet accepting calls).
    Starting,
    /// Server is fully operational and accepting calls.
    Ready,
    /// Server is draining in-flight calls (no new calls accepted).
    Draining,
    /// Server has fully stopped (all in-flight calls completed).
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    drained: Notify,
}

/// Controls graceful shutdown with health state management and in-flight tracking.
///
/// 1. Health probes check `health_state()` to report readiness
/// 2. The RPC middleware asks `try_admit()` before running a call
/// 3. `trigger_shutdown()` moves to Draining and signals all listeners
/// 4. `wait_for_drain()` waits until in-flight calls complete
#[derive(Debug)]
pub struct ShutdownController {
    state: watch::Sender<HealthState>,
    in_flight: Arc<InFlight>,
}

impl ShutdownController {
    /// Creates a new shutdown controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (state, _rx) = watch::channel(HealthState::Starting);
        Self {
            state,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Transitions to `Ready`. Has no effect once shutdown was triggered.
    pub fn set_ready(&self) {
        self.state.send_if_modified(|s| {
            if *s == HealthState::Starting {
                *s = HealthState::Ready;
                true
            } else {
                false
            }
        });
    }

    /// Initiates graceful shutdown.
    ///
    /// Transitions to `Draining` and notifies every state receiver. New calls
    /// are rejected from here on.
    pub fn trigger_shutdown(&self) {
        self.state.send_if_modified(|s| {
            if matches!(s, HealthState::Starting | HealthState::Ready) {
                *s = HealthState::Draining;
                true
            } else {
                false
            }
        });
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        *self.state.borrow()
    }

    /// Receiver observing every health state transition.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<HealthState> {
        self.state.subscribe()
    }

    /// Admits a call unless the server is draining or stopped.
    ///
    /// The returned guard counts the call as in flight until it is dropped.
    #[must_use]
    pub fn try_admit(&self) -> Option<InFlightGuard> {
        let guard = self.in_flight_guard();
        // Checked after incrementing so a concurrent drain either sees the
        // call or the call sees the drain.
        match self.health_state() {
            HealthState::Draining | HealthState::Stopped => None,
            HealthState::Starting | HealthState::Ready => Some(guard),
        }
    }

    /// Creates an RAII guard that tracks an in-flight call.
    ///
    /// The counter is decremented when the guard is dropped, even if the
    /// handler panics.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits for all in-flight calls to complete, up to `timeout`.
    ///
    /// Returns `true` and transitions to `Stopped` if everything drained.
    /// Returns `false` if the timeout expired; the state stays `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.in_flight.drained.notified();
                tokio::pin!(notified);
                // Register before checking so a release between the check and
                // the await is not missed.
                notified.as_mut().enable();
                if self.in_flight_count() == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        if drained {
            self.state.send_replace(HealthState::Stopped);
        }
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.drained.notify_waiters();
        }
    }
}
