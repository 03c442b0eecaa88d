//! HTTP middleware for the Waypoint server.
//!
//! Two pieces:
//! - [`build_http_layers`]: tower-http layers applied to every request.
//! - [`track_in_flight`]: admission for RPC routes, tied to the shutdown
//!   controller.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::HeaderName;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use super::config::NetworkConfig;
use super::shutdown::ShutdownController;
use crate::service::call::CallError;
use crate::transport::metadata::error_response;

/// The composed Tower layer type produced by [`build_http_layers`].
///
/// Each layer wraps the next in a `Stack`, from outermost (first applied) to
/// innermost (last applied).
type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<
            TraceLayer<
                tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
            >,
            tower::layer::util::Stack<
                SetRequestIdLayer<MakeRequestUuid>,
                tower::layer::util::Identity,
            >,
        >,
    >,
>;

/// Builds the HTTP-level Tower middleware stack.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` to every incoming request
/// 2. `Tracing` -- logs request/response with structured trace spans
/// 3. `Timeout` -- answers 408 when a request outlives `request_timeout`
/// 4. `PropagateRequestId` -- copies `X-Request-Id` from the request to the response
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Rejects RPCs with 503 `unavailable` while draining; otherwise counts the
/// call as in flight until its response is produced.
pub async fn track_in_flight(
    State(shutdown): State<Arc<ShutdownController>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(_guard) = shutdown.try_admit() else {
        debug!(path = %request.uri().path(), "rejecting call while draining");
        return error_response(&CallError::Unavailable);
    };
    next.run(request).await
}
