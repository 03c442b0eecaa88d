//! Application errors and the string sentinel that carries them over the wire.
//!
//! The wire schema has no first-class error representation, so every response
//! message carries an `err: String` field. An empty string means "no error";
//! any other value is the message of the error raised by the operation.
//!
//! The conversion is lossy: only the message survives the boundary, not the
//! identity or concrete type of the original error.

use std::borrow::Cow;
use std::fmt;

/// Error produced by business logic and carried inside a response.
///
/// Application errors are distinct from call failures: the call completed, the
/// operation simply reported that it could not do what was asked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppError {
    message: Cow<'static, str>,
}

impl AppError {
    /// Creates an application error with the given message.
    #[must_use]
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Creates an application error from any displayable error, keeping only
    /// its message.
    #[must_use]
    pub fn from_display(err: &impl fmt::Display) -> Self {
        Self::new(err.to_string())
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AppError {}

/// Serializes an optional application error into the wire `err` field.
///
/// `None` becomes the empty string. An error whose message is itself empty is
/// indistinguishable from "no error" on the other side, so it is replaced with
/// a placeholder to keep the failure visible.
#[must_use]
pub fn encode_error(err: Option<&AppError>) -> String {
    match err {
        None => String::new(),
        Some(e) if e.message().is_empty() => UNSPECIFIED.to_string(),
        Some(e) => e.message().to_string(),
    }
}

/// Deserializes the wire `err` field back into an optional application error.
#[must_use]
pub fn decode_error(wire: &str) -> Option<AppError> {
    if wire.is_empty() {
        None
    } else {
        Some(AppError::new(wire.to_string()))
    }
}

/// Message used when an application error with an empty message is encoded.
const UNSPECIFIED: &str = "unspecified application error";

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn no_error_encodes_as_empty_string() {
        assert_eq!(encode_error(None), "");
        assert!(decode_error("").is_none());
    }

    #[test]
    fn message_survives_round_trip() {
        let err = AppError::new("can't sum two zeroes");
        let wire = encode_error(Some(&err));
        assert_eq!(wire, "can't sum two zeroes");
        assert_eq!(decode_error(&wire), Some(err));
    }

    #[test]
    fn empty_message_stays_an_error() {
        let wire = encode_error(Some(&AppError::new("")));
        assert!(!wire.is_empty());
        assert!(decode_error(&wire).is_some());
    }

    #[test]
    fn from_display_keeps_only_the_message() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such user");
        let err = AppError::from_display(&io);
        assert_eq!(err.message(), "no such user");
        assert_eq!(err.to_string(), "no such user");
    }

    proptest! {
        #[test]
        fn any_non_empty_message_round_trips(msg in ".+") {
            let wire = encode_error(Some(&AppError::new(msg.clone())));
            let decoded = decode_error(&wire).expect("non-empty message decodes to an error");
            prop_assert_eq!(decoded.message(), msg.as_str());
        }
    }
}
