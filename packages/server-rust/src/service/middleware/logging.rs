//! Logging decorator: exactly one record per call, after it returns.

use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::{info, warn};

use crate::service::call::{Call, CallError, Failer};
use crate::service::operation::CallFuture;

#[derive(Debug, Clone)]
pub struct LoggingLayer {
    method: &'static str,
}

impl LoggingLayer {
    #[must_use]
    pub fn new(method: &'static str) -> Self {
        Self { method }
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            method: self.method,
        }
    }
}

/// Logs `method` and `err` (empty on success) at `info`, or at `warn` when
/// either the call failed or the response carries an application error.
#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    inner: S,
    method: &'static str,
}

impl<S, Req> Service<Call<Req>> for LoggingService<S>
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
        let fut = self.inner.call(call);
        Box::pin(async move {
            let result = fut.await;
            match &result {
                Ok(resp) => match resp.failed() {
                    None => info!(method, err = "", "call completed"),
                    Some(e) => warn!(method, err = e.message(), "call completed"),
                },
                Err(e) => warn!(method, err = %e, kind = e.kind(), "call failed"),
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tower::ServiceExt;
    use tracing_subscriber::fmt::MakeWriter;
    use waypoint_core::AppError;

    use super::*;
    use crate::service::call::CallContext;
    use crate::service::operation::{operation_fn, OperationService};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock())
                .lines()
                .map(str::to_owned)
                .collect()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[derive(Debug, PartialEq)]
    struct Reply {
        err: Option<AppError>,
    }

    impl Failer for Reply {
        fn failed(&self) -> Option<&AppError> {
            self.err.as_ref()
        }
    }

    async fn run_logged(result: fn() -> Result<Reply, CallError>) -> (Vec<String>, Result<Reply, CallError>) {
        let out = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(out.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let op = operation_fn(move |_ctx: CallContext, (): ()| async move { result() });
        let svc = LoggingLayer::new("Sum").layer(OperationService::new(Arc::new(op)));
        let result = svc.oneshot(Call::new(CallContext::new(), ())).await;
        (out.lines(), result)
    }

    #[tokio::test]
    async fn logs_one_info_record_on_success() {
        let (lines, result) = run_logged(|| Ok(Reply { err: None })).await;
        assert_eq!(result.unwrap(), Reply { err: None });
        assert_eq!(lines.len(), 1, "{lines:?}");
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].contains("Sum"));
    }

    #[tokio::test]
    async fn logs_application_error_without_touching_the_response() {
        let (lines, result) = run_logged(|| {
            Ok(Reply {
                err: Some(AppError::new("can't sum two zeroes")),
            })
        })
        .await;
        assert_eq!(
            result.unwrap().err.unwrap().message(),
            "can't sum two zeroes"
        );
        assert_eq!(lines.len(), 1, "{lines:?}");
        assert!(lines[0].contains("WARN"));
        assert!(lines[0].contains("can't sum two zeroes"));
    }

    #[tokio::test]
    async fn logs_call_failures() {
        let (lines, result) = run_logged(|| Err(CallError::DeadlineExceeded)).await;
        assert!(matches!(result, Err(CallError::DeadlineExceeded)));
        assert_eq!(lines.len(), 1, "{lines:?}");
        assert!(lines[0].contains("deadline exceeded"));
    }
}
