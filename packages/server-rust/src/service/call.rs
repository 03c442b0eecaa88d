//! Call model shared by every pipeline stage: context, call envelope, and the
//! error taxonomy for failures that are not application errors.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use waypoint_core::{AppError, DecodeError, TraceContext};

// ---------------------------------------------------------------------------
// CallContext
// ---------------------------------------------------------------------------

/// Context carried with every call through the pipeline.
///
/// Cloning is cheap; clones share the same cancellation token.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    trace: Option<TraceContext>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// Creates a context with no trace, no deadline, and a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the deadline to `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    pub(crate) fn set_trace(&mut self, trace: TraceContext) {
        self.trace = Some(trace);
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, or `None` when the call has no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels the call and every clone of this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// A typed request travelling through a pipeline together with its context.
#[derive(Debug, Clone)]
pub struct Call<Req> {
    pub ctx: CallContext,
    pub request: Req,
}

impl<Req> Call<Req> {
    pub fn new(ctx: CallContext, request: Req) -> Self {
        Self { ctx, request }
    }
}

// ---------------------------------------------------------------------------
// Failer
// ---------------------------------------------------------------------------

/// Implemented by every response type so decorators can observe the
/// application error without knowing the concrete response.
pub trait Failer {
    /// The application error carried by this response, if any.
    fn failed(&self) -> Option<&AppError>;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Broad class of a call failure, used to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before the operation ran (rate limit, open circuit, draining).
    Admission,
    /// The call did not complete meaningfully: decode, network, or remote failure.
    Transport,
    /// The caller gave up: cancellation or deadline.
    Cancelled,
    /// Bug or unexpected condition on this side of the boundary.
    Internal,
}

/// Failure of the call itself.
///
/// Application errors never appear here; they travel inside the response.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("rate limit exceeded for {method}")]
    RateLimited { method: &'static str },
    #[error("circuit breaker open for {method}")]
    CircuitOpen { method: &'static str },
    #[error("server is shutting down, try again later")]
    Unavailable,
    #[error("call cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote call failed with status {status} ({kind}): {message}")]
    Remote {
        status: u16,
        kind: String,
        message: String,
    },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CallError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited { .. } | Self::CircuitOpen { .. } | Self::Unavailable => {
                ErrorClass::Admission
            }
            Self::Cancelled | Self::DeadlineExceeded => ErrorClass::Cancelled,
            Self::Decode(_) | Self::Transport(_) | Self::Remote { .. } => ErrorClass::Transport,
            Self::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether blindly retrying the same call may succeed.
    ///
    /// Local admission errors are left to the caller's policy and report `false`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Remote { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Stable machine-readable name, sent as the `x-rpc-error` header.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Decode(_) => "decode",
            Self::Transport(_) => "transport",
            Self::Remote { .. } => "remote",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether this failure says something about the health of the wrapped
    /// operation. Cancellation by the caller does not.
    #[must_use]
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Error returned by business service traits: either the operation refused
/// the request, or the call carrying it failed.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Application(#[from] AppError),
    #[error(transparent)]
    Call(#[from] CallError),
}

impl ServiceError {
    /// The application error, if this is one.
    #[must_use]
    pub fn as_application(&self) -> Option<&AppError> {
        match self {
            Self::Application(e) => Some(e),
            Self::Call(_) => None,
        }
    }
}

/// Splits a service result into "operation outcome" and "call failure".
///
/// Endpoint operations use this to place application errors into the response
/// while propagating call failures through the pipeline.
pub trait IntoOutcome<T> {
    /// # Errors
    ///
    /// Returns the [`CallError`] when the service failed at the call level.
    fn into_outcome(self) -> Result<Result<T, AppError>, CallError>;
}

impl<T> IntoOutcome<T> for Result<T, ServiceError> {
    fn into_outcome(self) -> Result<Result<T, AppError>, CallError> {
        match self {
            Ok(v) => Ok(Ok(v)),
            Err(ServiceError::Application(e)) => Ok(Err(e)),
            Err(ServiceError::Call(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_errors_are_not_retryable() {
        let err = CallError::RateLimited { method: "Sum" };
        assert_eq!(err.class(), ErrorClass::Admission);
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "rate_limited");
        assert_eq!(err.to_string(), "rate limit exceeded for Sum");
    }

    #[test]
    fn transport_failures_are_retryable() {
        assert!(CallError::Transport("connection refused".into()).is_retryable());
        let remote = CallError::Remote {
            status: 503,
            kind: "circuit_open".into(),
            message: "circuit breaker open for Sum".into(),
        };
        assert_eq!(remote.class(), ErrorClass::Transport);
        assert!(remote.is_retryable());

        let decode = CallError::Remote {
            status: 400,
            kind: "decode".into(),
            message: "bad".into(),
        };
        assert!(!decode.is_retryable());
    }

    #[test]
    fn cancellation_does_not_count_against_the_operation() {
        assert!(!CallError::Cancelled.counts_as_failure());
        assert!(CallError::DeadlineExceeded.counts_as_failure());
        assert_eq!(CallError::Cancelled.class(), ErrorClass::Cancelled);
    }

    #[test]
    fn into_outcome_separates_application_errors() {
        let app: Result<i64, ServiceError> = Err(AppError::new("nope").into());
        assert_eq!(app.into_outcome().unwrap().unwrap_err().message(), "nope");

        let call: Result<i64, ServiceError> = Err(CallError::Cancelled.into());
        assert!(matches!(call.into_outcome(), Err(CallError::Cancelled)));

        let ok: Result<i64, ServiceError> = Ok(5);
        assert_eq!(ok.into_outcome().unwrap().unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_tracks_the_deadline() {
        let ctx = CallContext::new().with_timeout(Duration::from_secs(2));
        assert_eq!(ctx.remaining(), Some(Duration::from_secs(2)));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
        assert!(CallContext::new().remaining().is_none());
    }

    #[test]
    fn clones_share_cancellation() {
        let ctx = CallContext::new();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.cancellation().is_cancelled());
    }
}
