//! `MsgPack` codec for wire messages and the decode error taxonomy.
//!
//! Messages are encoded as named maps (`rmp_serde::to_vec_named`) so that
//! field names, not positions, define the schema.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Content type used for every wire message body.
pub const CONTENT_TYPE: &str = "application/msgpack";

/// Failure to serialize or deserialize a wire message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// A wire message that could not be turned into a valid internal request or
/// response.
///
/// Decode errors are call failures: they are never placed into a response's
/// `err` field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<CodecError> for DecodeError {
    fn from(err: CodecError) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Encodes a message as a named `MsgPack` map.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if the value cannot be serialized.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(message)?)
}

/// Decodes a message from `MsgPack` bytes.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the bytes are not a valid encoding of `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
