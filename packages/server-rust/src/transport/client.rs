//! Client side of the transport: channels and the remote-call operation.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request};
use axum::Router;
use tower::ServiceExt;
use waypoint_core::codec::CONTENT_TYPE;

use super::metadata::{outbound_metadata, remote_error};
use super::method::{read_reply, write_request, RpcMethod};
use crate::service::call::{CallContext, CallError};
use crate::service::operation::Operation;

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Carries one encoded unary call to a server and returns the encoded reply.
///
/// A non-2xx response is [`CallError::Remote`]; failing to reach the server
/// at all is [`CallError::Transport`].
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    async fn unary(
        &self,
        path: &'static str,
        metadata: HeaderMap,
        body: Vec<u8>,
    ) -> Result<Bytes, CallError>;
}

/// Channel over HTTP/1.1 using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpChannel {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChannel {
    /// `base_url` is the server origin, e.g. `http://127.0.0.1:8080`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn transport(err: impl std::fmt::Display) -> CallError {
    CallError::Transport(err.to_string())
}

#[async_trait]
impl Channel for HttpChannel {
    async fn unary(
        &self,
        path: &'static str,
        metadata: HeaderMap,
        body: Vec<u8>,
    ) -> Result<Bytes, CallError> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base_url))
            .headers(metadata)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(transport)?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(remote_error(status, &headers, &body))
        }
    }
}

/// Channel driving an axum [`Router`] in-process. Used by tests and when a
/// client and server are embedded in one binary.
#[derive(Debug, Clone)]
pub struct RouterChannel {
    router: Router,
}

impl RouterChannel {
    #[must_use]
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Channel for RouterChannel {
    async fn unary(
        &self,
        path: &'static str,
        metadata: HeaderMap,
        body: Vec<u8>,
    ) -> Result<Bytes, CallError> {
        let mut req = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .body(Body::from(body))
            .map_err(|e| CallError::Internal(e.into()))?;
        req.headers_mut().extend(metadata);

        let resp = match self.router.clone().oneshot(req).await {
            Ok(resp) => resp,
            Err(never) => match never {},
        };

        let (parts, body) = resp.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(transport)?;
        if parts.status.is_success() {
            Ok(body)
        } else {
            Err(remote_error(parts.status, &parts.headers, &body))
        }
    }
}

// ---------------------------------------------------------------------------
// RemoteCall
// ---------------------------------------------------------------------------

/// Operation that performs `M` on a remote server. Wrapped in a client-role
/// pipeline, it stands in for the local operation.
pub struct RemoteCall<M> {
    channel: Arc<dyn Channel>,
    _method: PhantomData<fn() -> M>,
}

impl<M> RemoteCall<M> {
    #[must_use]
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            _method: PhantomData,
        }
    }
}

#[async_trait]
impl<M: RpcMethod> Operation<M::Request> for RemoteCall<M> {
    type Response = M::Response;

    async fn call(&self, ctx: CallContext, request: M::Request) -> Result<M::Response, CallError> {
        let body = write_request::<M>(request)?;
        let reply = self
            .channel
            .unary(M::PATH, outbound_metadata(&ctx), body)
            .await?;
        Ok(read_reply::<M>(&reply)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
