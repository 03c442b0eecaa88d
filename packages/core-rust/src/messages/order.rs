//! Order service messages.

use serde::{Deserialize, Serialize};

/// Wire form of a stored order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: String,
    pub user_id: String,
    pub amount: f32,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at: u64,
}

/// Request for `order.CreateOrder`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub amount: f32,
}

/// Reply for `order.CreateOrder`. `id` is empty when `err` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderReply {
    pub id: String,
    pub err: String,
}

/// Request for `order.GetOrders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetOrdersRequest {
    pub user_id: String,
}

/// Reply for `order.GetOrders`. `orders` is empty when `err` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetOrdersReply {
    pub orders: Vec<OrderRecord>,
    pub err: String,
}
