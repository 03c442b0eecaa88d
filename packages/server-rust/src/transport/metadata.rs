//! Call metadata carried in HTTP headers, and the mapping of call failures
//! onto HTTP responses.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;
use waypoint_core::{TraceContext, TRACEPARENT_HEADER};

use crate::service::call::{CallContext, CallError};

/// Remaining time budget of the caller, in whole milliseconds.
pub const CALL_TIMEOUT_HEADER: &str = "x-call-timeout-ms";
/// Machine-readable kind of a call failure (see [`CallError::kind`]).
pub const RPC_ERROR_HEADER: &str = "x-rpc-error";

/// Builds the server-side context for an inbound call.
///
/// A malformed `traceparent` or timeout header is ignored. The deadline is
/// the smaller of the caller's budget and `max_timeout`.
#[must_use]
pub fn inbound_context(headers: &HeaderMap, max_timeout: Duration) -> CallContext {
    let mut ctx = CallContext::new();

    if let Some(raw) = headers.get(TRACEPARENT_HEADER) {
        match raw.to_str().map(str::parse::<TraceContext>) {
            Ok(Ok(trace)) => ctx = ctx.with_trace(trace),
            Ok(Err(e)) => debug!(error = %e, "ignoring malformed traceparent"),
            Err(_) => debug!("ignoring non-ascii traceparent"),
        }
    }

    let requested = headers.get(CALL_TIMEOUT_HEADER).and_then(|raw| {
        let parsed = raw.to_str().ok().and_then(|s| s.trim().parse::<u64>().ok());
        if parsed.is_none() {
            debug!(value = ?raw, "ignoring malformed call timeout");
        }
        parsed.map(Duration::from_millis)
    });

    ctx.with_timeout(requested.map_or(max_timeout, |t| t.min(max_timeout)))
}

/// Headers propagating `ctx` to the next hop.
#[must_use]
pub fn outbound_metadata(ctx: &CallContext) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(trace) = ctx.trace() {
        if let Ok(value) = HeaderValue::from_str(&trace.to_traceparent()) {
            headers.insert(HeaderName::from_static(TRACEPARENT_HEADER), value);
        }
    }
    if let Some(left) = ctx.remaining() {
        let millis = u64::try_from(left.as_millis()).unwrap_or(u64::MAX);
        headers.insert(HeaderName::from_static(CALL_TIMEOUT_HEADER), HeaderValue::from(millis));
    }
    headers
}

#[must_use]
pub fn status_for(err: &CallError) -> StatusCode {
    match err {
        CallError::Decode(_) => StatusCode::BAD_REQUEST,
        CallError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        CallError::CircuitOpen { .. } | CallError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        CallError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        CallError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        CallError::Transport(_) | CallError::Remote { .. } => StatusCode::BAD_GATEWAY,
        CallError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Non-2xx response for a call failure: status, `x-rpc-error` kind, and the
/// error message as a text body.
#[must_use]
pub fn error_response(err: &CallError) -> Response {
    (
        status_for(err),
        [(RPC_ERROR_HEADER, err.kind())],
        err.to_string(),
    )
        .into_response()
}

/// Rebuilds the call error described by a non-2xx response.
pub(crate) fn remote_error(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> CallError {
    let kind = headers
        .get(RPC_ERROR_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    CallError::Remote {
        status: status.as_u16(),
        kind,
        message: String::from_utf8_lossy(body).into_owned(),
    }
}
