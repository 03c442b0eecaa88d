//! Server side of the transport: decode, run the pipeline, encode.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tower::ServiceExt;
use tracing::debug;
use waypoint_core::codec::CONTENT_TYPE;

use super::metadata::{error_response, inbound_context};
use super::method::{read_request, write_response, RpcMethod};
use crate::service::call::{Call, CallError};
use crate::service::middleware::Pipeline;

// ---------------------------------------------------------------------------
// ServerHandler
// ---------------------------------------------------------------------------

/// Serves one capability from its pipeline.
pub struct ServerHandler<M: RpcMethod> {
    pipeline: Pipeline<M::Request, M::Response>,
    call_timeout: Duration,
}

impl<M: RpcMethod> ServerHandler<M> {
    #[must_use]
    pub fn new(pipeline: Pipeline<M::Request, M::Response>, call_timeout: Duration) -> Self {
        Self {
            pipeline,
            call_timeout,
        }
    }

    /// Handles one encoded request.
    ///
    /// The request is decoded and validated before the pipeline runs. The call
    /// is cancelled if this future is dropped before completing.
    ///
    /// # Errors
    ///
    /// Returns the [`CallError`] of a call that did not produce a response.
    /// Application errors are encoded into the reply instead.
    pub async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>, CallError> {
        let request = read_request::<M>(body)?;
        let ctx = inbound_context(headers, self.call_timeout);

        let guard = ctx.cancellation().clone().drop_guard();
        let result = self.pipeline.clone().oneshot(Call::new(ctx, request)).await;
        let _ = guard.disarm();

        write_response::<M>(result?)
    }

    async fn respond(&self, headers: HeaderMap, body: Bytes) -> Response {
        match self.handle(&headers, &body).await {
            Ok(reply) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], reply).into_response(),
            Err(e) => {
                debug!(method = M::NAME, kind = e.kind(), error = %e, "rpc call failed");
                error_response(&e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RpcRouter
// ---------------------------------------------------------------------------

/// Collects RPC routes (`POST <path>`) into an axum [`Router`].
pub struct RpcRouter {
    router: Router,
    call_timeout: Duration,
}

impl RpcRouter {
    /// `call_timeout` caps the deadline of every inbound call.
    #[must_use]
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            router: Router::new(),
            call_timeout,
        }
    }

    /// Mounts `pipeline` at `M::PATH`.
    #[must_use]
    pub fn route<M: RpcMethod>(mut self, pipeline: Pipeline<M::Request, M::Response>) -> Self {
        let handler = Arc::new(ServerHandler::<M>::new(pipeline, self.call_timeout));
        self.router = self.router.route(
            M::PATH,
            post(move |headers: HeaderMap, body: Bytes| {
                let handler = Arc::clone(&handler);
                async move { handler.respond(headers, body).await }
            }),
        );
        self
    }

    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use serde::{Deserialize, Serialize};
    use tower::ServiceExt;
    use waypoint_core::{codec, decode_error, encode_error, AppError, DecodeError};

    use super::*;
    use crate::service::call::{CallContext, Failer};
    use crate::service::middleware::{PipelineBuilder, SpanKind};
    use crate::service::operation::operation_fn;
    use crate::transport::metadata::RPC_ERROR_HEADER;

    #[derive(Debug, Serialize, Deserialize)]
    pub(crate) struct HalveWire {
        pub n: i64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub(crate) struct HalveReplyWire {
        pub v: i64,
        pub err: String,
    }

    #[derive(Debug, PartialEq)]
    pub(crate) struct Halved {
        pub value: i64,
        pub err: Option<AppError>,
    }

    impl Failer for Halved {
        fn failed(&self) -> Option<&AppError> {
            self.err.as_ref()
        }
    }

    /// Halves even numbers; odd numbers are an application error and
    /// negative numbers never pass decoding.
    pub(crate) struct Halve;

    impl RpcMethod for Halve {
        const NAME: &'static str = "Halve";
        const PATH: &'static str = "/rpc/test/Halve";

        type Request = i64;
        type Response = Halved;
        type WireRequest = HalveWire;
        type WireReply = HalveReplyWire;

        fn decode_request(wire: HalveWire) -> Result<i64, DecodeError> {
            if wire.n < 0 {
                return Err(DecodeError::Invalid {
                    field: "n",
                    reason: "must not be negative".into(),
                });
            }
            Ok(wire.n)
        }

        fn encode_response(response: Halved) -> HalveReplyWire {
            HalveReplyWire {
                v: response.value,
                err: encode_error(response.err.as_ref()),
            }
        }

        fn encode_request(request: i64) -> HalveWire {
            HalveWire { n: request }
        }

        fn decode_reply(wire: HalveReplyWire) -> Result<Halved, DecodeError> {
            Ok(Halved {
                value: wire.v,
                err: decode_error(&wire.err),
            })
        }
    }

    pub(crate) fn halve_pipeline() -> Pipeline<i64, Halved> {
        PipelineBuilder::new(Halve::NAME, SpanKind::Server)
            .with_tracing()
            .build(operation_fn(|_ctx: CallContext, n: i64| async move {
                let reply = if n % 2 == 0 {
                    Halved {
                        value: n / 2,
                        err: None,
                    }
                } else {
                    Halved {
                        value: 0,
                        err: Some(AppError::new("odd number")),
                    }
                };
                Ok::<_, CallError>(reply)
            }))
    }

    fn post_request(body: Vec<u8>) -> axum::http::Request<axum::body::Body> {
        axum::http::Request::post(Halve::PATH)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .body(axum::body::Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn handler_encodes_application_errors_into_the_reply() {
        let handler = ServerHandler::<Halve>::new(halve_pipeline(), Duration::from_secs(5));

        let ok = handler
            .handle(&HeaderMap::new(), &codec::encode(&HalveWire { n: 10 }).unwrap())
            .await
            .unwrap();
        let ok: HalveReplyWire = codec::decode(&ok).unwrap();
        assert_eq!((ok.v, ok.err.as_str()), (5, ""));

        let odd = handler
            .handle(&HeaderMap::new(), &codec::encode(&HalveWire { n: 3 }).unwrap())
            .await
            .unwrap();
        let odd: HalveReplyWire = codec::decode(&odd).unwrap();
        assert_eq!(odd.err, "odd number");
    }

    #[tokio::test]
    async fn invalid_requests_fail_before_the_pipeline() {
        let handler = ServerHandler::<Halve>::new(halve_pipeline(), Duration::from_secs(5));
        let err = handler
            .handle(&HeaderMap::new(), &codec::encode(&HalveWire { n: -1 }).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Decode(DecodeError::Invalid { field: "n", .. })));

        let err = handler.handle(&HeaderMap::new(), b"\xc1").await.unwrap_err();
        assert!(matches!(err, CallError::Decode(DecodeError::Malformed(_))));
    }

    #[tokio::test]
    async fn router_maps_failures_to_http_statuses() {
        let router = RpcRouter::new(Duration::from_secs(5))
            .route::<Halve>(halve_pipeline())
            .into_router();

        let resp = router
            .clone()
            .oneshot(post_request(codec::encode(&HalveWire { n: 8 }).unwrap()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], CONTENT_TYPE);

        let resp = router
            .oneshot(post_request(b"not msgpack".to_vec()))
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        assert_eq!(resp.headers()[RPC_ERROR_HEADER], "decode");
    }
}
