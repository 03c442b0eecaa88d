//! Unary RPC over HTTP with `MsgPack` bodies.
//!
//! - [`method`]: per-capability wire mapping ([`RpcMethod`])
//! - [`metadata`]: trace/deadline headers and failure-to-status mapping
//! - [`server`]: [`ServerHandler`] and [`RpcRouter`]
//! - [`client`]: [`Channel`] implementations and [`RemoteCall`]

pub mod client;
pub mod metadata;
pub mod method;
pub mod server;

pub use client::{Channel, HttpChannel, RemoteCall, RouterChannel};
pub use metadata::{CALL_TIMEOUT_HEADER, RPC_ERROR_HEADER};
pub use method::RpcMethod;
pub use server::{RpcRouter, ServerHandler};
