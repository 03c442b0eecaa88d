//! Per-capability mapping between wire messages and internal types.

use serde::de::DeserializeOwned;
use serde::Serialize;
use waypoint_core::codec;
use waypoint_core::DecodeError;

use crate::service::call::{CallError, Failer};

/// Describes one exposed capability: its route, its wire messages, and the
/// conversions on both sides of the boundary.
///
/// Conversions into internal types validate; conversions into wire types
/// cannot fail. Application errors cross as the `err` string sentinel.
pub trait RpcMethod: Send + Sync + 'static {
    /// Method name used in logs, metrics, and config overrides.
    const NAME: &'static str;
    /// HTTP route, e.g. `/rpc/product/Sum`.
    const PATH: &'static str;

    type Request: Send + 'static;
    type Response: Failer + Send + 'static;
    type WireRequest: Serialize + DeserializeOwned + Send;
    type WireReply: Serialize + DeserializeOwned + Send;

    /// Server side: validates an inbound wire request.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when a field is missing or out of range.
    fn decode_request(wire: Self::WireRequest) -> Result<Self::Request, DecodeError>;

    /// Server side: builds the wire reply, folding any application error into `err`.
    fn encode_response(response: Self::Response) -> Self::WireReply;

    /// Client side: builds the outbound wire request.
    fn encode_request(request: Self::Request) -> Self::WireRequest;

    /// Client side: validates a wire reply, rebuilding the application error
    /// from `err`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the reply is inconsistent, e.g. reports
    /// success without the data success implies.
    fn decode_reply(wire: Self::WireReply) -> Result<Self::Response, DecodeError>;
}

/// Decodes and validates a request body.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] for undecodable bytes, or whatever
/// [`RpcMethod::decode_request`] rejects.
pub fn read_request<M: RpcMethod>(body: &[u8]) -> Result<M::Request, DecodeError> {
    let wire: M::WireRequest = codec::decode(body)?;
    M::decode_request(wire)
}

/// Encodes a response body.
///
/// # Errors
///
/// Returns [`CallError::Internal`] if serialization fails.
pub fn write_response<M: RpcMethod>(response: M::Response) -> Result<Vec<u8>, CallError> {
    codec::encode(&M::encode_response(response)).map_err(|e| CallError::Internal(e.into()))
}

/// Encodes a request body.
///
/// # Errors
///
/// Returns [`CallError::Internal`] if serialization fails.
pub fn write_request<M: RpcMethod>(request: M::Request) -> Result<Vec<u8>, CallError> {
    codec::encode(&M::encode_request(request)).map_err(|e| CallError::Internal(e.into()))
}

/// Decodes and validates a reply body.
///
/// # Errors
///
/// Returns [`DecodeError`] for undecodable or inconsistent replies.
pub fn read_reply<M: RpcMethod>(body: &[u8]) -> Result<M::Response, DecodeError> {
    let wire: M::WireReply = codec::decode(body)?;
    M::decode_reply(wire)
}

/// Rejects an empty string field.
pub(crate) fn require_non_empty(field: &'static str, value: &str) -> Result<(), DecodeError> {
    if value.is_empty() {
        Err(DecodeError::Invalid {
            field,
            reason: "must not be empty".into(),
        })
    } else {
        Ok(())
    }
}
