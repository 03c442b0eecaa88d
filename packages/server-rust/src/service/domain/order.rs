//! Order domain: creating and listing a user's orders.

use std::sync::Arc;

use async_trait::async_trait;
use waypoint_core::messages::order as wire;
use waypoint_core::{decode_error, encode_error, AppError, DecodeError};

use super::{client_pipeline, invoke, now_millis, server_pipeline};
use crate::service::call::{CallContext, CallError, Failer, IntoOutcome, ServiceError};
use crate::service::config::{ConfigError, ServiceConfig};
use crate::service::middleware::Pipeline;
use crate::service::operation::Operation;
use crate::storage::KeyValueStore;
use crate::transport::method::require_non_empty;
use crate::transport::{Channel, RpcMethod, RpcRouter};

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub amount: f32,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("order amount must be positive")]
    NonPositiveAmount,
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        AppError::from_display(&err)
    }
}

impl From<OrderError> for ServiceError {
    fn from(err: OrderError) -> Self {
        ServiceError::Application(err.into())
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OrderService: Send + Sync + 'static {
    /// Creates an order and returns its id.
    async fn create_order(&self, ctx: CallContext, user_id: String, amount: f32) -> Result<String, ServiceError>;

    /// All orders of `user_id`, oldest first. Unknown users have none.
    async fn get_orders(&self, ctx: CallContext, user_id: String) -> Result<Vec<Order>, ServiceError>;
}

/// Order service storing each user's orders under the user id.
pub struct BasicOrderService {
    orders: Arc<dyn KeyValueStore<Vec<Order>>>,
}

impl BasicOrderService {
    #[must_use]
    pub fn new(orders: Arc<dyn KeyValueStore<Vec<Order>>>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl OrderService for BasicOrderService {
    async fn create_order(&self, _ctx: CallContext, user_id: String, amount: f32) -> Result<String, ServiceError> {
        if amount.is_nan() || amount <= 0.0 {
            return Err(OrderError::NonPositiveAmount.into());
        }

        let order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            amount,
            created_at: now_millis(),
        };
        let id = order.id.clone();
        let key = order.user_id.clone();
        let mut pending = Some(order);
        self.orders.update(&key, Vec::new(), &mut |orders| orders.extend(pending.take()));
        Ok(id)
    }

    async fn get_orders(&self, _ctx: CallContext, user_id: String) -> Result<Vec<Order>, ServiceError> {
        Ok(self.orders.get(&user_id).unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub amount: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrderResponse {
    pub id: String,
    pub err: Option<AppError>,
}

impl From<Result<String, AppError>> for CreateOrderResponse {
    fn from(outcome: Result<String, AppError>) -> Self {
        match outcome {
            Ok(id) => Self { id, err: None },
            Err(e) => Self {
                id: String::new(),
                err: Some(e),
            },
        }
    }
}

impl Failer for CreateOrderResponse {
    fn failed(&self) -> Option<&AppError> {
        self.err.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOrdersRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetOrdersResponse {
    pub orders: Vec<Order>,
    pub err: Option<AppError>,
}

impl From<Result<Vec<Order>, AppError>> for GetOrdersResponse {
    fn from(outcome: Result<Vec<Order>, AppError>) -> Self {
        match outcome {
            Ok(orders) => Self { orders, err: None },
            Err(e) => Self {
                orders: Vec::new(),
                err: Some(e),
            },
        }
    }
}

impl Failer for GetOrdersResponse {
    fn failed(&self) -> Option<&AppError> {
        self.err.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Endpoint operations
// ---------------------------------------------------------------------------

pub struct CreateOrderEndpoint {
    svc: Arc<dyn OrderService>,
}

#[async_trait]
impl Operation<CreateOrderRequest> for CreateOrderEndpoint {
    type Response = CreateOrderResponse;

    async fn call(&self, ctx: CallContext, req: CreateOrderRequest) -> Result<CreateOrderResponse, CallError> {
        let outcome = self.svc.create_order(ctx, req.user_id, req.amount).await;
        Ok(outcome.into_outcome()?.into())
    }
}

pub struct GetOrdersEndpoint {
    svc: Arc<dyn OrderService>,
}

#[async_trait]
impl Operation<GetOrdersRequest> for GetOrdersEndpoint {
    type Response = GetOrdersResponse;

    async fn call(&self, ctx: CallContext, req: GetOrdersRequest) -> Result<GetOrdersResponse, CallError> {
        Ok(self.svc.get_orders(ctx, req.user_id).await.into_outcome()?.into())
    }
}

// ---------------------------------------------------------------------------
// Wire mapping
// ---------------------------------------------------------------------------

pub struct CreateOrderMethod;

impl RpcMethod for CreateOrderMethod {
    const NAME: &'static str = "CreateOrder";
    const PATH: &'static str = "/rpc/order/CreateOrder";

    type Request = CreateOrderRequest;
    type Response = CreateOrderResponse;
    type WireRequest = wire::CreateOrderRequest;
    type WireReply = wire::CreateOrderReply;

    fn decode_request(wire: wire::CreateOrderRequest) -> Result<CreateOrderRequest, DecodeError> {
        require_non_empty("userId", &wire.user_id)?;
        if !wire.amount.is_finite() {
            return Err(DecodeError::Invalid {
                field: "amount",
                reason: format!("{} is not a finite number", wire.amount),
            });
        }
        Ok(CreateOrderRequest {
            user_id: wire.user_id,
            amount: wire.amount,
        })
    }

    fn encode_response(response: CreateOrderResponse) -> wire::CreateOrderReply {
        wire::CreateOrderReply {
            err: encode_error(response.err.as_ref()),
            id: response.id,
        }
    }

    fn encode_request(request: CreateOrderRequest) -> wire::CreateOrderRequest {
        wire::CreateOrderRequest {
            user_id: request.user_id,
            amount: request.amount,
        }
    }

    fn decode_reply(wire: wire::CreateOrderReply) -> Result<CreateOrderResponse, DecodeError> {
        let err = decode_error(&wire.err);
        if err.is_none() {
            require_non_empty("id", &wire.id)?;
        }
        Ok(CreateOrderResponse { id: wire.id, err })
    }
}

pub struct GetOrdersMethod;

impl RpcMethod for GetOrdersMethod {
    const NAME: &'static str = "GetOrders";
    const PATH: &'static str = "/rpc/order/GetOrders";

    type Request = GetOrdersRequest;
    type Response = GetOrdersResponse;
    type WireRequest = wire::GetOrdersRequest;
    type WireReply = wire::GetOrdersReply;

    fn decode_request(wire: wire::GetOrdersRequest) -> Result<GetOrdersRequest, DecodeError> {
        require_non_empty("userId", &wire.user_id)?;
        Ok(GetOrdersRequest {
            user_id: wire.user_id,
        })
    }

    fn encode_response(response: GetOrdersResponse) -> wire::GetOrdersReply {
        wire::GetOrdersReply {
            err: encode_error(response.err.as_ref()),
            orders: response
                .orders
                .into_iter()
                .map(|o| wire::OrderRecord {
                    id: o.id,
                    user_id: o.user_id,
                    amount: o.amount,
                    created_at: o.created_at,
                })
                .collect(),
        }
    }

    fn encode_request(request: GetOrdersRequest) -> wire::GetOrdersRequest {
        wire::GetOrdersRequest {
            user_id: request.user_id,
        }
    }

    fn decode_reply(wire: wire::GetOrdersReply) -> Result<GetOrdersResponse, DecodeError> {
        Ok(GetOrdersResponse {
            err: decode_error(&wire.err),
            orders: wire
                .orders
                .into_iter()
                .map(|o| Order {
                    id: o.id,
                    user_id: o.user_id,
                    amount: o.amount,
                    created_at: o.created_at,
                })
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// OrderEndpoints
// ---------------------------------------------------------------------------

/// Pipelines for every order capability.
#[derive(Clone)]
pub struct OrderEndpoints {
    create_order: Pipeline<CreateOrderRequest, CreateOrderResponse>,
    get_orders: Pipeline<GetOrdersRequest, GetOrdersResponse>,
}

impl OrderEndpoints {
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the server pipeline configuration is invalid.
    pub fn serve(svc: Arc<dyn OrderService>, config: &ServiceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            create_order: server_pipeline::<CreateOrderMethod, _>(
                CreateOrderEndpoint {
                    svc: Arc::clone(&svc),
                },
                config,
            )?,
            get_orders: server_pipeline::<GetOrdersMethod, _>(GetOrdersEndpoint { svc }, config)?,
        })
    }

    /// # Errors
    ///
    /// Returns [`ConfigError`] if the client pipeline configuration is invalid.
    pub fn remote(channel: &Arc<dyn Channel>, config: &ServiceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            create_order: client_pipeline::<CreateOrderMethod>(channel, config)?,
            get_orders: client_pipeline::<GetOrdersMethod>(channel, config)?,
        })
    }

    #[must_use]
    pub fn mount(&self, router: RpcRouter) -> RpcRouter {
        router
            .route::<CreateOrderMethod>(self.create_order.clone())
            .route::<GetOrdersMethod>(self.get_orders.clone())
    }
}

#[async_trait]
impl OrderService for OrderEndpoints {
    async fn create_order(&self, ctx: CallContext, user_id: String, amount: f32) -> Result<String, ServiceError> {
        let resp = invoke(&self.create_order, ctx, CreateOrderRequest { user_id, amount }).await?;
        match resp.err {
            Some(e) => Err(e.into()),
            None => Ok(resp.id),
        }
    }

    async fn get_orders(&self, ctx: CallContext, user_id: String) -> Result<Vec<Order>, ServiceError> {
        let resp = invoke(&self.get_orders, ctx, GetOrdersRequest { user_id }).await?;
        match resp.err {
            Some(e) => Err(e.into()),
            None => Ok(resp.orders),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
