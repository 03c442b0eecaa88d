//! Wire schema for the exposed capabilities.
//!
//! One submodule per service. Every response message carries a required
//! `err: String` field: absence of an error is the empty string, never a
//! missing or null field, so every response is always fully populated.

pub mod order;
pub mod product;
pub mod user;

pub use order::{CreateOrderReply, CreateOrderRequest, GetOrdersReply, GetOrdersRequest, OrderRecord};
pub use product::{SumReply, SumRequest};
pub use user::{GetUserReply, GetUserRequest, RegisterReply, RegisterRequest, UserRecord};
