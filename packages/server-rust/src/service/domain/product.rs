//! Product domain: summing two 32-bit integers.

use std::sync::Arc;

use async_trait::async_trait;
use waypoint_core::messages::product as wire;
use waypoint_core::{decode_error, encode_error, AppError, DecodeError};

use super::{client_pipeline, invoke, server_pipeline};
use crate::service::call::{CallContext, CallError, Failer, IntoOutcome, ServiceError};
use crate::service::config::{ConfigError, ServiceConfig};
use crate::service::middleware::Pipeline;
use crate::service::operation::Operation;
use crate::transport::{Channel, RpcMethod, RpcRouter};

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProductError {
    #[error("can't sum two zeroes")]
    TwoZeroes,
    #[error("integer overflow")]
    IntOverflow,
}

impl From<ProductError> for AppError {
    fn from(err: ProductError) -> Self {
        AppError::from_display(&err)
    }
}

impl From<ProductError> for ServiceError {
    fn from(err: ProductError) -> Self {
        ServiceError::Application(err.into())
    }
}

#[async_trait]
pub trait ProductService: Send + Sync + 'static {
    /// Sums `a` and `b`, both within the 32-bit signed range.
    async fn sum(&self, ctx: CallContext, a: i64, b: i64) -> Result<i64, ServiceError>;
}

#[derive(Debug, Default)]
pub struct BasicProductService;

#[async_trait]
impl ProductService for BasicProductService {
    async fn sum(&self, _ctx: CallContext, a: i64, b: i64) -> Result<i64, ServiceError> {
        if a == 0 && b == 0 {
            return Err(ProductError::TwoZeroes.into());
        }
        let v = a
            .checked_add(b)
            .filter(|v| i32::try_from(*v).is_ok())
            .ok_or(ProductError::IntOverflow)?;
        Ok(v)
    }
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SumRequest {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SumResponse {
    pub value: i64,
    pub err: Option<AppError>,
}

impl SumResponse {
    /// # Errors
    ///
    /// Returns the application error carried by the response.
    pub fn into_result(self) -> Result<i64, AppError> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(self.value),
        }
    }
}

impl From<Result<i64, AppError>> for SumResponse {
    fn from(outcome: Result<i64, AppError>) -> Self {
        match outcome {
            Ok(value) => Self { value, err: None },
            Err(e) => Self {
                value: 0,
                err: Some(e),
            },
        }
    }
}

impl Failer for SumResponse {
    fn failed(&self) -> Option<&AppError> {
        self.err.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Endpoint operation and wire mapping
// ---------------------------------------------------------------------------

/// Adapts [`ProductService::sum`] to an [`Operation`].
pub struct SumEndpoint {
    svc: Arc<dyn ProductService>,
}

#[async_trait]
impl Operation<SumRequest> for SumEndpoint {
    type Response = SumResponse;

    async fn call(&self, ctx: CallContext, req: SumRequest) -> Result<SumResponse, CallError> {
        let outcome = self.svc.sum(ctx, req.a, req.b).await.into_outcome()?;
        Ok(outcome.into())
    }
}

pub struct SumMethod;

fn check_i32(field: &'static str, value: i64) -> Result<i64, DecodeError> {
    i32::try_from(value).map(i64::from).map_err(|_| DecodeError::Invalid {
        field,
        reason: format!("{value} is outside the 32-bit signed range"),
    })
}

impl RpcMethod for SumMethod {
    const NAME: &'static str = "Sum";
    const PATH: &'static str = "/rpc/product/Sum";

    type Request = SumRequest;
    type Response = SumResponse;
    type WireRequest = wire::SumRequest;
    type WireReply = wire::SumReply;

    fn decode_request(wire: wire::SumRequest) -> Result<SumRequest, DecodeError> {
        Ok(SumRequest {
            a: check_i32("a", wire.a)?,
            b: check_i32("b", wire.b)?,
        })
    }

    fn encode_response(response: SumResponse) -> wire::SumReply {
        wire::SumReply {
            v: response.value,
            err: encode_error(response.err.as_ref()),
        }
    }

    fn encode_request(request: SumRequest) -> wire::SumRequest {
        wire::SumRequest {
            a: request.a,
            b: request.b,
        }
    }

    fn decode_reply(wire: wire::SumReply) -> Result<SumResponse, DecodeError> {
        Ok(SumResponse {
            value: wire.v,
            err: decode_error(&wire.err),
        })
    }
}

// ---------------------------------------------------------------------------
// ProductEndpoints
// ---------------------------------------------------------------------------

/// Pipelines for every product capability.
#[derive(Clone)]
pub struct ProductEndpoints {
    sum: Pipeline<SumRequest, SumResponse>,
}

impl ProductEndpoints {
    /// Server-role pipelines around a local service.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the server pipeline configuration is invalid.
    pub fn serve(svc: Arc<dyn ProductService>, config: &ServiceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            sum: server_pipeline::<SumMethod, _>(SumEndpoint { svc }, config)?,
        })
    }

    /// Client-role pipelines calling a remote server over `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the client pipeline configuration is invalid.
    pub fn remote(channel: &Arc<dyn Channel>, config: &ServiceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            sum: client_pipeline::<SumMethod>(channel, config)?,
        })
    }

    /// Mounts every capability on `router`.
    #[must_use]
    pub fn mount(&self, router: RpcRouter) -> RpcRouter {
        router.route::<SumMethod>(self.sum.clone())
    }

    #[must_use]
    pub fn sum_pipeline(&self) -> &Pipeline<SumRequest, SumResponse> {
        &self.sum
    }
}

#[async_trait]
impl ProductService for ProductEndpoints {
    async fn sum(&self, ctx: CallContext, a: i64, b: i64) -> Result<i64, ServiceError> {
        let resp = invoke(&self.sum, ctx, SumRequest { a, b }).await?;
        Ok(resp.into_result()?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
