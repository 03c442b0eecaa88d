//! Business domains exposed over RPC.
//!
//! Each domain provides:
//! - a service trait and a basic implementation over injected storage
//! - endpoint operations adapting the trait to [`Operation`]
//! - one [`RpcMethod`] per capability
//! - an endpoint set holding one pipeline per capability, built either around
//!   the local service (server role) or around [`RemoteCall`] (client role).
//!   The endpoint set implements the service trait itself.

pub mod order;
pub mod product;
pub mod user;

use std::sync::Arc;

use tower::ServiceExt;

use crate::service::call::{Call, CallContext, CallError};
use crate::service::config::{ConfigError, ServiceConfig};
use crate::service::middleware::{Pipeline, PipelineBuilder, SpanKind};
use crate::service::operation::Operation;
use crate::transport::{Channel, RemoteCall, RpcMethod};

pub use order::{BasicOrderService, Order, OrderEndpoints, OrderError, OrderService};
pub use product::{BasicProductService, ProductEndpoints, ProductError, ProductService};
pub use user::{BasicUserService, User, UserEndpoints, UserError, UserProfile, UserService};

/// Server-role pipeline for `M` around a local operation.
fn server_pipeline<M, O>(
    op: O,
    config: &ServiceConfig,
) -> Result<Pipeline<M::Request, M::Response>, ConfigError>
where
    M: RpcMethod,
    O: Operation<M::Request, Response = M::Response>,
{
    Ok(
        PipelineBuilder::from_config(M::NAME, SpanKind::Server, config.server.pipeline_for(M::NAME))?
            .build(op),
    )
}

/// Client-role pipeline for `M` around a remote call over `channel`.
fn client_pipeline<M: RpcMethod>(
    channel: &Arc<dyn Channel>,
    config: &ServiceConfig,
) -> Result<Pipeline<M::Request, M::Response>, ConfigError> {
    Ok(
        PipelineBuilder::from_config(M::NAME, SpanKind::Client, config.client.pipeline_for(M::NAME))?
            .build(RemoteCall::<M>::new(Arc::clone(channel))),
    )
}

async fn invoke<Req, Resp>(
    pipeline: &Pipeline<Req, Resp>,
    ctx: CallContext,
    request: Req,
) -> Result<Resp, CallError>
where
    Req: Send + 'static,
{
    pipeline.clone().oneshot(Call::new(ctx, request)).await
}

/// Milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
