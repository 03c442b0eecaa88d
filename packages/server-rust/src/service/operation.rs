//! The innermost pipeline stage: a business operation and the tower adapter
//! that runs it under the call's cancellation token and deadline.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::time::Instant;
use tower::Service;

use super::call::{Call, CallContext, CallError};

/// Boxed future returned by every pipeline stage.
pub type CallFuture<Resp> = Pin<Box<dyn Future<Output = Result<Resp, CallError>> + Send>>;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// One business capability.
///
/// Application errors belong inside `Response`; `Err` is reserved for
/// failures of the call itself.
#[async_trait]
pub trait Operation<Req: Send + 'static>: Send + Sync + 'static {
    type Response: Send + 'static;

    async fn call(&self, ctx: CallContext, request: Req) -> Result<Self::Response, CallError>;
}

/// [`Operation`] backed by a closure. Built with [`operation_fn`].
pub struct FnOperation<F> {
    f: F,
}

/// Wraps a closure returning a future as an [`Operation`].
pub fn operation_fn<Req, Resp, F, Fut>(f: F) -> FnOperation<F>
where
    F: Fn(CallContext, Req) -> Fut,
    Fut: Future<Output = Result<Resp, CallError>>,
{
    FnOperation { f }
}

#[async_trait]
impl<Req, Resp, F, Fut> Operation<Req> for FnOperation<F>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, CallError>> + Send + 'static,
{
    type Response = Resp;

    async fn call(&self, ctx: CallContext, request: Req) -> Result<Resp, CallError> {
        (self.f)(ctx, request).await
    }
}

// ---------------------------------------------------------------------------
// OperationService
// ---------------------------------------------------------------------------

/// Tower service at the bottom of every pipeline.
///
/// The operation is raced against the call's cancellation token and deadline;
/// whichever fires first aborts the call and drops the operation's future.
pub struct OperationService<Req, O> {
    op: Arc<O>,
    _req: PhantomData<fn(Req)>,
}

impl<Req, O> OperationService<Req, O> {
    pub fn new(op: Arc<O>) -> Self {
        Self {
            op,
            _req: PhantomData,
        }
    }
}

impl<Req, O> Clone for OperationService<Req, O> {
    fn clone(&self) -> Self {
        Self {
            op: Arc::clone(&self.op),
            _req: PhantomData,
        }
    }
}

impl<Req, O> Service<Call<Req>> for OperationService<Req, O>
where
    Req: Send + 'static,
    O: Operation<Req>,
{
    type Response = O::Response;
    type Error = CallError;
    type Future = CallFuture<O::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        let op = Arc::clone(&self.op);
        Box::pin(async move {
            let Call { ctx, request } = call;
            let cancel = ctx.cancellation().clone();
            let deadline = ctx.deadline();
            let fut = op.call(ctx, request);

            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(CallError::Cancelled),
                () = wait_until(deadline) => Err(CallError::DeadlineExceeded),
                result = fut => result,
            }
        })
    }
}

/// Sleeps until `deadline`, or forever when there is none.
pub(crate) async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
