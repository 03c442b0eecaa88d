//! Instrumentation decorator: call counts and latency per method, role, and
//! outcome, through the `metrics` facade.

use std::task::{Context, Poll};

use tokio::time::Instant;
use tower::{Layer, Service};

use super::trace::SpanKind;
use crate::service::call::{Call, CallError, Failer};
use crate::service::operation::CallFuture;

/// Counter of completed calls.
pub const CALLS_TOTAL: &str = "waypoint_calls_total";
/// Histogram of call latency in seconds.
pub const CALL_DURATION_SECONDS: &str = "waypoint_call_duration_seconds";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer {
    method: &'static str,
    role: SpanKind,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(method: &'static str, role: SpanKind) -> Self {
        Self { method, role }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            method: self.method,
            role: self.role,
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    method: &'static str,
    role: SpanKind,
}

/// `ok`, `app_error` (the response carries an application error), or `error`.
fn outcome_of<R: Failer>(result: &Result<R, CallError>) -> &'static str {
    match result {
        Ok(resp) if resp.failed().is_some() => "app_error",
        Ok(_) => "ok",
        Err(_) => "error",
    }
}

impl<S, Req> Service<Call<Req>> for MetricsService<S>
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
        let method = self.method;
        let role = self.role.as_str();
        let fut = self.inner.call(call);

        Box::pin(async move {
            let start = Instant::now();
            let result = fut.await;
            let elapsed = start.elapsed().as_secs_f64();
            let outcome = outcome_of(&result);

            metrics::counter!(CALLS_TOTAL, "method" => method, "role" => role, "outcome" => outcome)
                .increment(1);
            metrics::histogram!(
                CALL_DURATION_SECONDS,
                "method" => method,
                "role" => role,
                "outcome" => outcome
            )
            .record(elapsed);

            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use tower::ServiceExt;
    use waypoint_core::AppError;

    use super::*;
    use crate::service::call::CallContext;
    use crate::service::operation::{operation_fn, OperationService};

    #[derive(Debug, PartialEq)]
    struct Reply(Option<AppError>);

    impl Failer for Reply {
        fn failed(&self) -> Option<&AppError> {
            self.0.as_ref()
        }
    }

    #[test]
    fn classifies_outcomes() {
        assert_eq!(outcome_of(&Ok::<_, CallError>(Reply(None))), "ok");
        assert_eq!(
            outcome_of(&Ok::<_, CallError>(Reply(Some(AppError::new("x"))))),
            "app_error"
        );
        assert_eq!(outcome_of::<Reply>(&Err(CallError::Cancelled)), "error");
    }

    /// Runs one call through a `MetricsLayer` under a local debugging
    /// recorder and returns every recorded metric with its sorted labels.
    fn recorded(result: fn() -> Result<Reply, CallError>) -> Vec<(String, Vec<(String, String)>, DebugValue)> {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            let op = operation_fn(move |_ctx: CallContext, (): ()| async move { result() });
            let svc = MetricsLayer::new("Sum", SpanKind::Client).layer(OperationService::new(Arc::new(op)));
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let _ = rt.block_on(svc.oneshot(Call::new(CallContext::new(), ())));
        });

        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, value)| {
                let key = key.key();
                let mut labels: Vec<_> = key
                    .labels()
                    .map(|l| (l.key().to_string(), l.value().to_string()))
                    .collect();
                labels.sort();
                (key.name().to_string(), labels, value)
            })
            .collect()
    }

    fn labels(outcome: &str) -> Vec<(String, String)> {
        vec![
            ("method".to_string(), "Sum".to_string()),
            ("outcome".to_string(), outcome.to_string()),
            ("role".to_string(), "client".to_string()),
        ]
    }

    #[test]
    fn records_one_count_and_one_latency_per_call() {
        let cases: [(fn() -> Result<Reply, CallError>, &str); 3] = [
            (|| Ok(Reply(None)), "ok"),
            (|| Ok(Reply(Some(AppError::new("can't sum two zeroes")))), "app_error"),
            (|| Err(CallError::Cancelled), "error"),
        ];

        for (result, outcome) in cases {
            let metrics = recorded(result);
            assert_eq!(metrics.len(), 2, "{outcome}: {metrics:?}");

            let (_, counter_labels, count) = metrics
                .iter()
                .find(|(name, _, _)| name == CALLS_TOTAL)
                .unwrap();
            assert_eq!(counter_labels, &labels(outcome));
            assert_eq!(count, &DebugValue::Counter(1));

            let (_, histogram_labels, samples) = metrics
                .iter()
                .find(|(name, _, _)| name == CALL_DURATION_SECONDS)
                .unwrap();
            assert_eq!(histogram_labels, &labels(outcome));
            match samples {
                DebugValue::Histogram(samples) => assert_eq!(samples.len(), 1),
                other => panic!("expected a histogram, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let op = operation_fn(|_ctx: CallContext, (): ()| async {
            Ok::<_, CallError>(Reply(Some(AppError::new("user not found"))))
        });
        let svc = MetricsLayer::new("GetUser", SpanKind::Server).layer(OperationService::new(Arc::new(op)));

        let resp = svc.oneshot(Call::new(CallContext::new(), ())).await.unwrap();
        assert_eq!(resp, Reply(Some(AppError::new("user not found"))));
    }
}
