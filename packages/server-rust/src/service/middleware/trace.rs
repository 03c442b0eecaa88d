//! Tracing decorator: one `rpc` span per call, and trace context propagation.

use std::fmt;
use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::{field, info_span, Instrument};
use waypoint_core::TraceContext;

use crate::service::call::{Call, CallError, Failer};
use crate::service::operation::CallFuture;

/// Which side of the boundary a pipeline runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanKind {
    Server,
    Client,
}

impl SpanKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TraceLayer
// ---------------------------------------------------------------------------

/// Derives a child trace context for each call and wraps it in a span.
///
/// The child replaces the context on the call, so everything further in
/// (including a client transport injecting `traceparent`) sees this span as
/// the current one.
#[derive(Debug, Clone)]
pub struct TraceLayer {
    method: &'static str,
    kind: SpanKind,
}

impl TraceLayer {
    #[must_use]
    pub fn new(method: &'static str, kind: SpanKind) -> Self {
        Self { method, kind }
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            method: self.method,
            kind: self.kind,
        }
    }
}

// ---------------------------------------------------------------------------
// TraceService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TraceService<S> {
    inner: S,
    method: &'static str,
    kind: SpanKind,
}

impl<S, Req> Service<Call<Req>> for TraceService<S>
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

    fn call(&mut self, mut call: Call<Req>) -> Self::Future {
        let trace = call
            .ctx
            .trace()
            .map_or_else(TraceContext::new_root, TraceContext::child);
        call.ctx.set_trace(trace);

        let span = info_span!(
            "rpc",
            rpc.method = self.method,
            otel.kind = self.kind.as_str(),
            trace_id = %trace.trace_id(),
            span_id = %trace.span_id(),
            parent_span_id = field::Empty,
            otel.status_code = field::Empty,
        );
        if let Some(parent) = trace.parent_span_id() {
            span.record("parent_span_id", field::display(parent));
        }

        let fut = {
            let _entered = span.enter();
            self.inner.call(call)
        };

        Box::pin(
            async move {
                let result = fut.await;
                // Application errors in the response fail the span too.
                let status = match &result {
                    Ok(resp) if resp.failed().is_none() => "OK",
                    _ => "ERROR",
                };
                tracing::Span::current().record("otel.status_code", status);
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tower::ServiceExt;
    use tracing::field::{Field, Visit};
    use tracing::span;
    use tracing_subscriber::layer::{self, SubscriberExt};
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

    /// Collects every value recorded into `otel.status_code`.
    #[derive(Clone, Default)]
    struct StatusCodes(Arc<Mutex<Vec<String>>>);

    struct StatusVisitor<'a>(&'a mut Vec<String>);

    impl Visit for StatusVisitor<'_> {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "otel.status_code" {
                self.0.push(value.to_owned());
            }
        }

        fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {}
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for StatusCodes {
        fn on_record(&self, _id: &span::Id, values: &span::Record<'_>, _ctx: layer::Context<'_, S>) {
            values.record(&mut StatusVisitor(&mut self.0.lock()));
        }
    }

    async fn status_of(result: fn() -> Result<Reply, CallError>) -> Vec<String> {
        let codes = StatusCodes::default();
        let subscriber = tracing_subscriber::registry().with(codes.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let op = operation_fn(move |_ctx: CallContext, (): ()| async move { result() });
        let svc = TraceLayer::new("Sum", SpanKind::Server).layer(OperationService::new(Arc::new(op)));
        let _ = svc.oneshot(Call::new(CallContext::new(), ())).await;

        let recorded = codes.0.lock().clone();
        recorded
    }

    fn capturing(
        kind: SpanKind,
    ) -> (
        Arc<Mutex<Option<TraceContext>>>,
        TraceService<impl Service<Call<()>, Response = Reply, Error = CallError, Future = CallFuture<Reply>>>,
    ) {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let op = operation_fn(move |ctx: CallContext, (): ()| {
            *sink.lock() = ctx.trace().copied();
            async { Ok::<_, CallError>(Reply(None)) }
        });
        let svc = TraceLayer::new("Sum", kind).layer(OperationService::new(Arc::new(op)));
        (seen, svc)
    }

    #[tokio::test]
    async fn continues_incoming_trace() {
        let (seen, svc) = capturing(SpanKind::Server);
        let incoming: TraceContext = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
            .parse()
            .unwrap();

        svc.oneshot(Call::new(CallContext::new().with_trace(incoming), ()))
            .await
            .unwrap();

        let inner = seen.lock().unwrap();
        assert_eq!(inner.trace_id(), incoming.trace_id());
        assert_eq!(inner.parent_span_id(), Some(incoming.span_id()));
        assert_ne!(inner.span_id(), incoming.span_id());
    }

    #[tokio::test]
    async fn starts_a_root_trace_when_none_is_present() {
        let (seen, svc) = capturing(SpanKind::Client);
        svc.oneshot(Call::new(CallContext::new(), ())).await.unwrap();

        let inner = seen.lock().unwrap();
        assert!(inner.parent_span_id().is_none());
        assert!(inner.is_sampled());
    }

    #[tokio::test]
    async fn errors_pass_through_unchanged() {
        let op = operation_fn(|_ctx: CallContext, (): ()| async {
            Err::<Reply, _>(CallError::Transport("connection reset".into()))
        });
        let svc = TraceLayer::new("Sum", SpanKind::Client).layer(OperationService::new(Arc::new(op)));
        let err = svc.oneshot(Call::new(CallContext::new(), ())).await.unwrap_err();
        assert!(matches!(err, CallError::Transport(ref m) if m == "connection reset"));
    }

    #[tokio::test]
    async fn span_status_reflects_the_outcome() {
        assert_eq!(status_of(|| Ok(Reply(None))).await, vec!["OK"]);
        assert_eq!(
            status_of(|| Ok(Reply(Some(AppError::new("can't sum two zeroes"))))).await,
            vec!["ERROR"]
        );
        assert_eq!(
            status_of(|| Err(CallError::Transport("connection reset".into()))).await,
            vec!["ERROR"]
        );
    }
}
