//! Trace context propagated across the call boundary.
//!
//! Serialized as a W3C `traceparent` header value:
//! `{version:2}-{trace-id:32}-{parent-id:16}-{flags:2}`, all lowercase hex.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

/// Header name carrying the serialized trace context.
pub const TRACEPARENT_HEADER: &str = "traceparent";

const VERSION: &str = "00";
const SAMPLED_FLAG: u8 = 0x01;

/// 128-bit trace identifier shared by every span of one trace. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u128);

/// 64-bit span identifier. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl TraceId {
    fn random() -> Self {
        let mut rng = rand::rng();
        loop {
            let id: u128 = rng.random();
            if id != 0 {
                return Self(id);
            }
        }
    }
}

impl SpanId {
    fn random() -> Self {
        let mut rng = rand::rng();
        loop {
            let id: u64 = rng.random();
            if id != 0 {
                return Self(id);
            }
        }
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Position of one span inside a distributed trace.
///
/// `parent_span_id` is local bookkeeping: it is not part of the `traceparent`
/// encoding, where the span id of the sender becomes the parent of the
/// receiver's span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    sampled: bool,
}

impl TraceContext {
    /// Starts a new, sampled trace.
    #[must_use]
    pub fn new_root() -> Self {
        Self {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_span_id: None,
            sampled: true,
        }
    }

    /// Derives a child span in the same trace.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
            parent_span_id: Some(self.span_id),
            sampled: self.sampled,
        }
    }

    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    #[must_use]
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    #[must_use]
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    /// Serializes this context as a `traceparent` header value.
    #[must_use]
    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { SAMPLED_FLAG } else { 0 };
        format!("{VERSION}-{}-{}-{flags:02x}", self.trace_id, self.span_id)
    }
}

/// Reasons a `traceparent` value is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceParseError {
    #[error("expected 4 dash-separated fields, found {0}")]
    FieldCount(usize),
    #[error("unsupported traceparent version `{0}`")]
    Version(String),
    #[error("invalid {field}: `{value}`")]
    Field { field: &'static str, value: String },
}

impl FromStr for TraceContext {
    type Err = TraceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        let [version, trace_id, span_id, flags] = parts.as_slice() else {
            return Err(TraceParseError::FieldCount(parts.len()));
        };

        if *version != VERSION {
            return Err(TraceParseError::Version((*version).to_string()));
        }

        let trace_id = parse_hex_field(trace_id, 32, "trace-id", |v| u128::from_str_radix(v, 16))?;
        let span_id = parse_hex_field(span_id, 16, "parent-id", |v| u64::from_str_radix(v, 16))?;
        let flags = parse_hex_field(flags, 2, "trace-flags", |v| u8::from_str_radix(v, 16))?;

        if trace_id == 0 {
            return Err(invalid("trace-id", "0".repeat(32)));
        }
        if span_id == 0 {
            return Err(invalid("parent-id", "0".repeat(16)));
        }

        Ok(Self {
            trace_id: TraceId(trace_id),
            span_id: SpanId(span_id),
            parent_span_id: None,
            sampled: flags & SAMPLED_FLAG != 0,
        })
    }
}

fn invalid(field: &'static str, value: impl Into<String>) -> TraceParseError {
    TraceParseError::Field {
        field,
        value: value.into(),
    }
}

/// Parses a fixed-width lowercase hex field.
fn parse_hex_field<T, E>(
    value: &str,
    width: usize,
    field: &'static str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<T, TraceParseError> {
    let well_formed = value.len() == width
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !well_formed {
        return Err(invalid(field, value));
    }
    parse(value).map_err(|_| invalid(field, value))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const SAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn parses_w3c_example() {
        let ctx: TraceContext = SAMPLE.parse().unwrap();
        assert_eq!(ctx.trace_id().to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id().to_string(), "00f067aa0ba902b7");
        assert!(ctx.is_sampled());
        assert_eq!(ctx.to_traceparent(), SAMPLE);
    }

    #[test]
    fn child_keeps_trace_and_links_parent() {
        let root = TraceContext::new_root();
        let child = root.child();
        assert_eq!(child.trace_id(), root.trace_id());
        assert_ne!(child.span_id(), root.span_id());
        assert_eq!(child.parent_span_id(), Some(root.span_id()));
    }

    #[test]
    fn rejects_malformed_values() {
        assert_eq!(
            "garbage".parse::<TraceContext>().unwrap_err(),
            TraceParseError::FieldCount(1)
        );
        assert!(matches!(
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".parse::<TraceContext>(),
            Err(TraceParseError::Version(_))
        ));
        assert!(matches!(
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01".parse::<TraceContext>(),
            Err(TraceParseError::Field { field: "trace-id", .. })
        ));
        assert!(matches!(
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01".parse::<TraceContext>(),
            Err(TraceParseError::Field { field: "trace-id", .. })
        ));
        assert!(matches!(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01".parse::<TraceContext>(),
            Err(TraceParseError::Field { field: "parent-id", .. })
        ));
    }

    #[test]
    fn unsampled_flag_is_preserved() {
        let ctx: TraceContext = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00"
            .parse()
            .unwrap();
        assert!(!ctx.is_sampled());
        assert!(ctx.to_traceparent().ends_with("-00"));
    }

    proptest! {
        #[test]
        fn traceparent_round_trips(trace in 1u128.., span in 1u64.., sampled: bool) {
            let ctx = TraceContext {
                trace_id: TraceId(trace),
                span_id: SpanId(span),
                parent_span_id: None,
                sampled,
            };
            let parsed: TraceContext = ctx.to_traceparent().parse().unwrap();
            prop_assert_eq!(parsed, ctx);
        }
    }
}
