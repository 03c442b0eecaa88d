//! Product service messages.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` and are encoded as
//! named `MsgPack` maps via `rmp_serde::to_vec_named()`.

use serde::{Deserialize, Serialize};

/// Request for `product.Sum`.
///
/// Operands travel as 64-bit integers; range validation happens when the
/// message is converted into an internal request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SumRequest {
    pub a: i64,
    pub b: i64,
}

/// Reply for `product.Sum`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SumReply {
    pub v: i64,
    /// Application error message; empty when the call succeeded.
    pub err: String,
}
