//! Waypoint core: wire schema, `MsgPack` codec, application error sentinel,
//! and W3C trace context.

pub mod codec;
pub mod error;
pub mod messages;
pub mod trace;

pub use codec::{CodecError, DecodeError};
pub use error::{decode_error, encode_error, AppError};
pub use trace::{TraceContext, TraceParseError, TRACEPARENT_HEADER};
